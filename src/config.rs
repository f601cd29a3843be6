use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    error::{ClaimError, Result},
    solana::{TokenAmount, MAX_DECIMALS, STABLECOIN_DECIMALS},
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub payout: PayoutConfig,
    pub limits: LimitsConfig,
    pub cashback: CashbackConfig,
    pub referral: ReferralConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PayoutConfig {
    /// Path to a JSON keypair file, or a base58 secret key
    pub funding_wallet_key: Option<String>,
    pub funding_wallet_address: Option<String>,
    pub rpc_url: String,
    /// Mint of the payout token
    pub token_address: String,
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    /// Whole tokens; 0 disables the warning
    #[serde(default)]
    pub low_balance_warning: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_per_tx: f64,
    pub max_per_wallet: f64,
    pub max_claims_per_wallet: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CashbackConfig {
    /// Fraction of the order amount, e.g. 0.01 for 1%
    pub reward_rate: f64,
    /// RFC 3339 instant after which claims are refused
    pub campaign_end: Option<String>,
    pub expected_network: String,
    #[serde(default)]
    pub min_volume: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferralConfig {
    pub referrer_reward: f64,
    pub referred_reward: f64,
    #[serde(default)]
    pub min_volume: f64,
    pub campaign_end: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    pub identity_url: String,
    pub kyc_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

fn default_token_symbol() -> String {
    "USDC".to_string()
}

fn default_token_decimals() -> u8 {
    STABLECOIN_DECIMALS
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Caps in base units of the payout token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimLimits {
    pub max_per_tx: u64,
    pub max_per_wallet: u64,
    pub max_claims_per_wallet: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CashbackSettings {
    pub reward_rate_bps: u64,
    pub campaign_end: Option<DateTime<Utc>>,
    pub expected_network: String,
    pub min_volume: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferralSettings {
    pub referrer_reward: u64,
    pub referred_reward: u64,
    pub min_volume: u64,
    pub campaign_end: Option<DateTime<Utc>>,
}

/// Validated claim policy, assembled once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSettings {
    pub token_symbol: String,
    pub token: TokenAmount,
    pub limits: ClaimLimits,
    pub cashback: CashbackSettings,
    pub referral: ReferralSettings,
}

/// Signing credential and address of the custodial payout wallet
#[derive(Debug, Clone)]
pub struct FundingWallet {
    pub key: String,
    pub address: String,
}

impl Config {
    /// Layers the optional config file, then `CLAIMS__SECTION__KEY` environment variables
    pub fn load(path: &str) -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CLAIMS").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// The funding wallet, when both its key and address are configured
    pub fn funding_wallet(&self) -> Option<FundingWallet> {
        let key = self.payout.funding_wallet_key.as_deref().map(str::trim).unwrap_or_default();
        let address = self.payout.funding_wallet_address.as_deref().map(str::trim).unwrap_or_default();

        if key.is_empty() || address.is_empty() {
            return None;
        }

        Some(FundingWallet {
            key: key.to_string(),
            address: address.to_string(),
        })
    }

    pub fn claim_settings(&self) -> Result<ClaimSettings> {
        if self.payout.token_decimals > MAX_DECIMALS {
            return Err(ClaimError::Config(format!(
                "payout.token_decimals must be at most {}, got {}",
                MAX_DECIMALS, self.payout.token_decimals
            )));
        }
        let token = TokenAmount::new(self.payout.token_decimals);
        let to_units = |value: f64, name: &str| -> Result<u64> {
            token
                .from_ui(value)
                .ok_or_else(|| ClaimError::Config(format!("{} must be a non-negative amount", name)))
        };

        let rate = self.cashback.reward_rate;
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ClaimError::Config(format!(
                "cashback.reward_rate must be in (0, 1], got {}",
                rate
            )));
        }
        let reward_rate_bps = (rate * 10_000.0).round() as u64;
        if reward_rate_bps == 0 {
            return Err(ClaimError::Config(format!(
                "cashback.reward_rate {} is below one basis point",
                rate
            )));
        }

        let limits = ClaimLimits {
            max_per_tx: to_units(self.limits.max_per_tx, "limits.max_per_tx")?,
            max_per_wallet: to_units(self.limits.max_per_wallet, "limits.max_per_wallet")?,
            max_claims_per_wallet: self.limits.max_claims_per_wallet,
        };
        if limits.max_per_tx == 0 || limits.max_per_wallet == 0 || limits.max_claims_per_wallet == 0 {
            return Err(ClaimError::Config("claim limits must be greater than zero".to_string()));
        }

        let referral = ReferralSettings {
            referrer_reward: to_units(self.referral.referrer_reward, "referral.referrer_reward")?,
            referred_reward: to_units(self.referral.referred_reward, "referral.referred_reward")?,
            min_volume: to_units(self.referral.min_volume, "referral.min_volume")?,
            campaign_end: parse_instant(self.referral.campaign_end.as_deref(), "referral.campaign_end")?,
        };
        if referral.referrer_reward > limits.max_per_tx || referral.referred_reward > limits.max_per_tx {
            return Err(ClaimError::Config(
                "referral rewards cannot exceed limits.max_per_tx".to_string(),
            ));
        }

        Ok(ClaimSettings {
            token_symbol: self.payout.token_symbol.clone(),
            token,
            limits,
            cashback: CashbackSettings {
                reward_rate_bps,
                campaign_end: parse_instant(self.cashback.campaign_end.as_deref(), "cashback.campaign_end")?,
                expected_network: self.cashback.expected_network.clone(),
                min_volume: to_units(self.cashback.min_volume, "cashback.min_volume")?,
            },
            referral,
        })
    }
}

fn parse_instant(raw: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| ClaimError::Config(format!("{} is not RFC 3339: {}", name, e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            payout: PayoutConfig {
                funding_wallet_key: Some("key".to_string()),
                funding_wallet_address: Some("addr".to_string()),
                rpc_url: "http://127.0.0.1:8899".to_string(),
                token_address: "mint".to_string(),
                token_symbol: "USDC".to_string(),
                token_decimals: 6,
                commitment: "confirmed".to_string(),
                low_balance_warning: 0.0,
            },
            limits: LimitsConfig {
                max_per_tx: 100.0,
                max_per_wallet: 500.0,
                max_claims_per_wallet: 10,
            },
            cashback: CashbackConfig {
                reward_rate: 0.01,
                campaign_end: Some("2030-01-01T00:00:00Z".to_string()),
                expected_network: "solana".to_string(),
                min_volume: 10.0,
            },
            referral: ReferralConfig {
                referrer_reward: 1.0,
                referred_reward: 1.0,
                min_volume: 20.0,
                campaign_end: None,
            },
            providers: ProvidersConfig {
                identity_url: "http://auth/session".to_string(),
                kyc_url: "http://kyc/verify".to_string(),
                timeout_secs: 10,
            },
            server: ServerConfig::default(),
            database: DatabaseConfig {
                path: ":memory:".to_string(),
            },
        }
    }

    #[test]
    fn test_claim_settings_converts_to_base_units() {
        let settings = sample().claim_settings().unwrap();
        assert_eq!(settings.limits.max_per_tx, 100_000_000);
        assert_eq!(settings.limits.max_per_wallet, 500_000_000);
        assert_eq!(settings.cashback.reward_rate_bps, 100);
        assert_eq!(settings.cashback.min_volume, 10_000_000);
        assert_eq!(settings.referral.referrer_reward, 1_000_000);
        assert!(settings.cashback.campaign_end.is_some());
        assert!(settings.referral.campaign_end.is_none());
    }

    #[test]
    fn test_rejects_bad_rate_and_dates() {
        let mut config = sample();
        config.cashback.reward_rate = 1.5;
        assert!(config.claim_settings().is_err());

        let mut config = sample();
        config.cashback.campaign_end = Some("next tuesday".to_string());
        assert!(config.claim_settings().is_err());

        let mut config = sample();
        config.referral.referrer_reward = 150.0;
        assert!(config.claim_settings().is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_token_and_rate() {
        let mut config = sample();
        config.payout.token_decimals = MAX_DECIMALS + 1;
        match config.claim_settings() {
            Err(ClaimError::Config(message)) => assert!(message.contains("token_decimals")),
            other => panic!("expected a config error, got {:?}", other),
        }

        let mut config = sample();
        config.cashback.reward_rate = 0.00004;
        assert!(matches!(config.claim_settings(), Err(ClaimError::Config(_))));

        config.cashback.reward_rate = 0.0001;
        assert_eq!(config.claim_settings().unwrap().cashback.reward_rate_bps, 1);
    }

    #[test]
    fn test_funding_wallet_requires_key_and_address() {
        let mut config = sample();
        assert!(config.funding_wallet().is_some());

        config.payout.funding_wallet_key = Some("  ".to_string());
        assert!(config.funding_wallet().is_none());
    }
}
