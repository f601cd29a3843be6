use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a claim row. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Completed,
    Failed,
}

impl ClaimStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClaimStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Failed => "failed",
        }
    }

    /// Only `pending -> completed` and `pending -> failed` are allowed
    pub fn can_transition_to(&self, next: ClaimStatus) -> bool {
        !self.is_terminal() && next.is_terminal()
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "completed" => Ok(ClaimStatus::Completed),
            "failed" => Ok(ClaimStatus::Failed),
            other => Err(format!("unknown claim status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    Cashback,
    Referral,
}

impl ClaimKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::Cashback => "cashback",
            ClaimKind::Referral => "referral",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cashback" => Ok(ClaimKind::Cashback),
            "referral" => Ok(ClaimKind::Referral),
            other => Err(format!("unknown claim kind '{}'", other)),
        }
    }
}

/// One transfer within a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimLeg {
    pub recipient: String,
    /// Base units of the payout token
    pub amount: u64,
    pub token_symbol: String,
    pub tx_hash: Option<String>,
}

impl ClaimLeg {
    pub fn new(recipient: impl Into<String>, amount: u64, token_symbol: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            amount,
            token_symbol: token_symbol.into(),
            tx_hash: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: i64,
    pub subject_id: String,
    pub kind: ClaimKind,
    pub claimant_wallet: String,
    pub legs: Vec<ClaimLeg>,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    pub fn total_amount(&self) -> u64 {
        self.legs.iter().map(|leg| leg.amount).sum()
    }

    /// Hashes of the legs that succeeded, in leg order
    pub fn tx_hashes(&self) -> Vec<String> {
        self.legs.iter().filter_map(|leg| leg.tx_hash.clone()).collect()
    }

    pub fn token_symbol(&self) -> Option<&str> {
        self.legs.first().map(|leg| leg.token_symbol.as_str())
    }
}

/// Input to the ledger's insert-or-fetch
#[derive(Debug, Clone)]
pub struct NewClaim {
    pub subject_id: String,
    pub kind: ClaimKind,
    pub claimant_wallet: String,
    pub legs: Vec<ClaimLeg>,
}

/// Result of `ClaimLedger::create_provisional`
#[derive(Debug, Clone)]
pub enum Provisional {
    Created(Claim),
    /// A row for the subject already existed, possibly created by a concurrent request
    Existing(Claim),
}

/// Aggregate of a wallet's completed claims
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletTotals {
    pub count: u64,
    pub total_amount: u64,
}

/// What the caller sent, before identity resolution
#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    pub auth_token: Option<String>,
    pub subject_id: Option<String>,
}

impl ClaimRequest {
    pub fn new(auth_token: Option<String>, subject_id: Option<String>) -> Self {
        Self {
            auth_token,
            subject_id,
        }
    }
}

/// Lower-cases hex (`0x…`) addresses. Base58 addresses are case-sensitive and only trimmed.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(ClaimStatus::Pending.can_transition_to(ClaimStatus::Completed));
        assert!(ClaimStatus::Pending.can_transition_to(ClaimStatus::Failed));
        assert!(!ClaimStatus::Completed.can_transition_to(ClaimStatus::Pending));
        assert!(!ClaimStatus::Completed.can_transition_to(ClaimStatus::Failed));
        assert!(!ClaimStatus::Failed.can_transition_to(ClaimStatus::Pending));
        assert!(!ClaimStatus::Failed.can_transition_to(ClaimStatus::Completed));
        assert!(!ClaimStatus::Pending.can_transition_to(ClaimStatus::Pending));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(" 0xABCdef01 "), "0xabcdef01");
        assert_eq!(
            normalize_address("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"),
            "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"
        );
    }

    #[test]
    fn test_claim_hashes_follow_leg_order() {
        let mut first = ClaimLeg::new("referrer", 1_000_000, "USDC");
        first.tx_hash = Some("sig-1".to_string());
        let second = ClaimLeg::new("referred", 1_000_000, "USDC");
        let claim = Claim {
            id: 1,
            subject_id: "ref-1".to_string(),
            kind: ClaimKind::Referral,
            claimant_wallet: "referred".to_string(),
            legs: vec![first, second],
            status: ClaimStatus::Failed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(claim.total_amount(), 2_000_000);
        assert_eq!(claim.tx_hashes(), vec!["sig-1".to_string()]);
    }
}
