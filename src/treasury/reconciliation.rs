use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::{
    claims::types::{Claim, ClaimStatus},
    error::{ClaimError, Result},
    storage::{ClaimLedger, Database},
};

/// Operator decision for a claim left `pending`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every leg was paid; one hash per leg, in leg order
    Completed(Vec<String>),
    /// Hashes of the legs that did go through, possibly none
    Failed(Vec<String>),
}

impl Resolution {
    pub fn status(&self) -> ClaimStatus {
        match self {
            Resolution::Completed(_) => ClaimStatus::Completed,
            Resolution::Failed(_) => ClaimStatus::Failed,
        }
    }

    pub fn tx_hashes(&self) -> &[String] {
        match self {
            Resolution::Completed(hashes) | Resolution::Failed(hashes) => hashes,
        }
    }

    fn validate(&self, claim: &Claim) -> Result<()> {
        let legs = claim.legs.len();
        match self {
            Resolution::Completed(hashes) if hashes.len() != legs => Err(ClaimError::InvalidResolution(format!(
                "claim {} has {} legs, {} hashes given",
                claim.id,
                legs,
                hashes.len()
            ))),
            Resolution::Failed(hashes) if hashes.len() >= legs && legs > 0 => {
                Err(ClaimError::InvalidResolution(format!(
                    "claim {} paid all {} legs; resolve it as completed",
                    claim.id, legs
                )))
            }
            _ if self.tx_hashes().iter().any(|h| h.trim().is_empty()) => {
                Err(ClaimError::InvalidResolution("empty transaction hash".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Finds and settles claims stuck in `pending` after a crash or a lost ledger write
pub struct PendingReconciliation {
    db: Arc<Database>,
}

impl PendingReconciliation {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Pending claims not updated for at least `older_than`
    pub fn stale(&self, older_than: Duration) -> Result<Vec<Claim>> {
        self.db.list_stale_pending(Utc::now() - older_than)
    }

    /// Applies the operator's decision through the ledger's monotonic transition
    pub async fn resolve(&self, claim_id: i64, resolution: Resolution) -> Result<Claim> {
        let claim = self
            .db
            .get_claim(claim_id)?
            .ok_or_else(|| ClaimError::ClaimNotFound(claim_id.to_string()))?;

        resolution.validate(&claim)?;
        self.db
            .transition(claim_id, resolution.status(), resolution.tx_hashes())
            .await?;

        info!(
            "Claim {} ({}) resolved as {} with {} tx hashes",
            claim.id,
            claim.subject_id,
            resolution.status(),
            resolution.tx_hashes().len()
        );

        self.db
            .get_claim(claim_id)?
            .ok_or_else(|| ClaimError::ClaimNotFound(claim_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::types::{ClaimKind, ClaimLeg, NewClaim, Provisional};

    async fn pending_referral(db: &Database) -> Claim {
        let provisional = db
            .create_provisional(NewClaim {
                subject_id: "ref-1".to_string(),
                kind: ClaimKind::Referral,
                claimant_wallet: "dave".to_string(),
                legs: vec![
                    ClaimLeg::new("carol", 1_000_000, "USDC"),
                    ClaimLeg::new("dave", 1_000_000, "USDC"),
                ],
            })
            .await
            .unwrap();
        match provisional {
            Provisional::Created(claim) => claim,
            Provisional::Existing(_) => panic!("expected a new claim"),
        }
    }

    #[tokio::test]
    async fn test_resolve_completed_requires_hash_per_leg() {
        let db = Arc::new(Database::in_memory().unwrap());
        let claim = pending_referral(&db).await;
        let reconciliation = PendingReconciliation::new(db.clone());

        let err = reconciliation
            .resolve(claim.id, Resolution::Completed(vec!["sig-1".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::InvalidResolution(_)));

        let resolved = reconciliation
            .resolve(
                claim.id,
                Resolution::Completed(vec!["sig-1".to_string(), "sig-2".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(resolved.status, ClaimStatus::Completed);
        assert_eq!(resolved.tx_hashes(), vec!["sig-1".to_string(), "sig-2".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_is_refused_once_terminal() {
        let db = Arc::new(Database::in_memory().unwrap());
        let claim = pending_referral(&db).await;
        let reconciliation = PendingReconciliation::new(db.clone());

        reconciliation
            .resolve(claim.id, Resolution::Failed(vec!["sig-1".to_string()]))
            .await
            .unwrap();

        let err = reconciliation
            .resolve(claim.id, Resolution::Failed(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::InvalidTransition { .. }));

        let stored = db.get_claim(claim.id).unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Failed);
        assert_eq!(stored.tx_hashes(), vec!["sig-1".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_lists_only_old_pending() {
        let db = Arc::new(Database::in_memory().unwrap());
        pending_referral(&db).await;
        let reconciliation = PendingReconciliation::new(db);

        assert!(reconciliation.stale(Duration::minutes(10)).unwrap().is_empty());
        assert_eq!(reconciliation.stale(Duration::minutes(-1)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_claim() {
        let reconciliation = PendingReconciliation::new(Arc::new(Database::in_memory().unwrap()));
        let err = reconciliation.resolve(42, Resolution::Failed(Vec::new())).await.unwrap_err();
        assert!(matches!(err, ClaimError::ClaimNotFound(_)));
    }
}
