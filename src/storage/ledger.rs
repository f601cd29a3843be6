use async_trait::async_trait;

use crate::{
    claims::types::{Claim, ClaimStatus, NewClaim, Provisional, WalletTotals},
    error::Result,
};

/// Durable record of payout decisions.
///
/// `create_provisional` must be a single atomic operation on a uniqueness
/// constraint over `subject_id`; on conflict the existing row is returned
/// instead of an error.
#[async_trait]
pub trait ClaimLedger: Send + Sync {
    async fn find(&self, subject_id: &str) -> Result<Option<Claim>>;

    async fn create_provisional(&self, claim: NewClaim) -> Result<Provisional>;

    /// Moves a pending claim to a terminal status and records the hashes of
    /// the legs that went through. Terminal claims are refused.
    async fn transition(&self, claim_id: i64, status: ClaimStatus, tx_hashes: &[String]) -> Result<()>;

    /// Completed-claim count for the wallet as claimant, and the total
    /// completed amount paid to it
    async fn sum_completed(&self, wallet: &str) -> Result<WalletTotals>;
}
