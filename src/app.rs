//! Wires configuration into the ledger, collaborators and claim orchestrators.

use anyhow::{bail, Context};
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    api::AppState,
    claims::{CashbackProgram, ClaimOrchestrator, Collaborators, PayoutExecutor, ReferralProgram},
    config::{ClaimSettings, Config, FundingWallet},
    providers::{HttpIdentityResolver, HttpKycProvider},
    solana::{load_keypair, parse_commitment, parse_pubkey, SolanaTransferClient},
    storage::Database,
    treasury::FundingMonitor,
};

pub struct App {
    pub db: Arc<Database>,
    pub settings: ClaimSettings,
    pub executor: Option<Arc<PayoutExecutor>>,
    pub monitor: Option<Arc<FundingMonitor>>,
    pub cashback: Arc<ClaimOrchestrator>,
    pub referral: Arc<ClaimOrchestrator>,
}

impl App {
    pub fn build(config: &Config) -> anyhow::Result<Self> {
        let settings = config.claim_settings()?;
        let db = Arc::new(
            Database::new(&config.database.path)
                .with_context(|| format!("opening ledger at {}", config.database.path))?,
        );

        let timeout = Duration::from_secs(config.providers.timeout_secs);
        let collaborators = Collaborators {
            identity: Arc::new(HttpIdentityResolver::new(&config.providers.identity_url, timeout)?),
            kyc: Arc::new(HttpKycProvider::new(&config.providers.kyc_url, timeout)?),
            subjects: db.clone(),
            ledger: db.clone(),
        };

        let executor = Self::payout_executor(config)?;
        let monitor = executor.as_ref().map(|executor| {
            Arc::new(FundingMonitor::new(
                executor.clone(),
                settings.token,
                settings.limits.max_per_tx,
                settings
                    .token
                    .from_ui(config.payout.low_balance_warning)
                    .unwrap_or_default(),
            ))
        });

        let cashback = ClaimOrchestrator::new(
            Arc::new(CashbackProgram::new(settings.cashback.clone(), &settings.token_symbol)),
            collaborators.clone(),
            settings.limits,
            settings.token,
            executor.clone(),
        );
        let referral = ClaimOrchestrator::new(
            Arc::new(ReferralProgram::new(settings.referral.clone(), &settings.token_symbol)),
            collaborators,
            settings.limits,
            settings.token,
            executor.clone(),
        );

        Ok(Self {
            db,
            settings,
            executor,
            monitor,
            cashback: Arc::new(cashback),
            referral: Arc::new(referral),
        })
    }

    /// One executor, shared by both programs, per funding wallet
    fn payout_executor(config: &Config) -> anyhow::Result<Option<Arc<PayoutExecutor>>> {
        let Some(funding) = config.funding_wallet() else {
            warn!("No funding wallet configured; every claim will be refused");
            return Ok(None);
        };

        let signer = funding_signer(&funding)?;
        let client = SolanaTransferClient::new(
            &config.payout.rpc_url,
            parse_commitment(&config.payout.commitment),
            signer,
            config.payout.token_decimals,
        );
        info!(
            "Payouts from {} in {} ({})",
            client.funding_address(),
            config.payout.token_symbol,
            config.payout.token_address
        );

        Ok(Some(Arc::new(PayoutExecutor::new(
            Arc::new(client),
            funding.address,
            config.payout.token_address.clone(),
            config.payout.token_symbol.clone(),
        ))))
    }

    pub fn state(&self) -> AppState {
        AppState {
            cashback: self.cashback.clone(),
            referral: self.referral.clone(),
            monitor: self.monitor.clone(),
        }
    }
}

/// Loads the funding key and checks it signs for the configured address
fn funding_signer(funding: &FundingWallet) -> anyhow::Result<Keypair> {
    let signer = load_keypair(&funding.key).context("loading funding wallet key")?;
    let address = parse_pubkey(&funding.address, "funding wallet address")?;
    if signer.pubkey() != address {
        bail!(
            "funding wallet address {} does not match the loaded key {}",
            address,
            signer.pubkey()
        );
    }
    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    fn funding(keypair: &Keypair, address: String) -> FundingWallet {
        FundingWallet {
            key: bs58::encode(keypair.to_bytes()).into_string(),
            address,
        }
    }

    #[test]
    fn test_funding_signer_matches_address() {
        let keypair = Keypair::new();
        let signer = funding_signer(&funding(&keypair, keypair.pubkey().to_string())).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_funding_signer_rejects_mismatched_address() {
        let keypair = Keypair::new();
        let err = funding_signer(&funding(&keypair, Pubkey::new_unique().to_string())).unwrap_err();
        assert!(err.to_string().contains("does not match"));

        assert!(funding_signer(&funding(&keypair, "0xalice".to_string())).is_err());
    }
}
