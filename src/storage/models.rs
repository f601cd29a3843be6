use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::claims::types::{Claim, ClaimKind, ClaimStatus};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub total_claims: usize,
    pub pending_claims: usize,
    pub completed_claims: usize,
    pub failed_claims: usize,
    pub total_paid: u64,
    pub cashback_paid: u64,
    pub referral_paid: u64,
}

/// Flattened view of a claim for listings
#[derive(Debug, Clone, Serialize)]
pub struct ClaimSummary {
    pub id: i64,
    pub subject_id: String,
    pub kind: ClaimKind,
    pub claimant_wallet: String,
    pub status: ClaimStatus,
    pub amount: u64,
    pub legs: usize,
    pub tx_hashes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Claim> for ClaimSummary {
    fn from(claim: &Claim) -> Self {
        Self {
            id: claim.id,
            subject_id: claim.subject_id.clone(),
            kind: claim.kind,
            claimant_wallet: claim.claimant_wallet.clone(),
            status: claim.status,
            amount: claim.total_amount(),
            legs: claim.legs.len(),
            tx_hashes: claim.tx_hashes(),
            updated_at: claim.updated_at,
        }
    }
}
