//! Interfaces of the external collaborators the claim flow reads from or pays through.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use http::{HttpIdentityResolver, HttpKycProvider};

/// Resolves a verified auth context into a wallet address
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, auth_token: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycStatus {
    pub verified: bool,
}

#[async_trait]
pub trait KycProvider: Send + Sync {
    async fn status(&self, wallet: &str) -> Result<KycStatus>;
}

/// An off-ramp order as seen by the transaction store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub sender: String,
    pub network: String,
    pub status: String,
    /// Base units of the settlement token
    pub amount: u64,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn is_settled(&self) -> bool {
        self.status.eq_ignore_ascii_case("settled")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub id: String,
    pub referrer: String,
    pub referred: String,
    pub created_at: DateTime<Utc>,
}

impl ReferralRecord {
    pub fn involves(&self, wallet: &str) -> bool {
        self.referrer == wallet || self.referred == wallet
    }
}

/// Read-only view over orders and referral records
#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn transaction(&self, id: &str) -> Result<Option<TransactionRecord>>;

    async fn referral(&self, id: &str) -> Result<Option<ReferralRecord>>;

    async fn referral_for_wallet(&self, wallet: &str) -> Result<Option<ReferralRecord>>;

    /// Sum of the wallet's settled order amounts
    async fn settled_volume(&self, wallet: &str) -> Result<u64>;
}

/// Signing and balance capability of the funding wallet.
///
/// Implementations are not required to be nonce-safe under concurrent use;
/// `PayoutExecutor` serializes calls per funding wallet.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn balance_of(&self, funding_wallet: &str, token_address: &str) -> Result<u64>;

    /// Whether `recipient` is an address this client can pay. Checked before any ledger write.
    fn validate_recipient(&self, _recipient: &str) -> Result<()> {
        Ok(())
    }

    /// Submits and confirms a transfer, returning its transaction hash
    async fn transfer(
        &self,
        funding_wallet: &str,
        token_address: &str,
        recipient: &str,
        amount: u64,
    ) -> Result<String>;
}
