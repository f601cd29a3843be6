//! Claim programs: the per-reward policy plugged into the generic verifier and orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    claims::{
        eligibility::EligibilityError,
        types::{normalize_address, ClaimKind, ClaimLeg, ClaimRequest},
    },
    config::{CashbackSettings, ClaimLimits, ReferralSettings},
    providers::{ReferralRecord, SubjectStore, TransactionRecord},
    solana::TokenAmount,
};

/// The record a claim is about
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    Transaction(TransactionRecord),
    Referral(ReferralRecord),
}

fn store_unavailable(e: crate::error::ClaimError) -> EligibilityError {
    warn!("Subject store lookup failed: {}", e);
    EligibilityError::Dependency("subject store".to_string())
}

#[async_trait]
pub trait ClaimProgram: Send + Sync {
    fn kind(&self) -> ClaimKind;

    fn campaign_end(&self) -> Option<DateTime<Utc>>;

    /// Idempotency key for the request. Only reads.
    async fn subject_id(
        &self,
        wallet: &str,
        request: &ClaimRequest,
        subjects: &dyn SubjectStore,
    ) -> Result<String, EligibilityError>;

    async fn resolve_subject(
        &self,
        subject_id: &str,
        subjects: &dyn SubjectStore,
    ) -> Result<Subject, EligibilityError>;

    fn check_ownership(&self, _wallet: &str, _subject: &Subject) -> Result<(), EligibilityError> {
        Ok(())
    }

    /// Wallets that must be KYC verified. Fails if the claimant takes no part in the subject.
    fn participants(&self, wallet: &str, subject: &Subject) -> Result<Vec<String>, EligibilityError>;

    async fn qualifying_volume(
        &self,
        subject: &Subject,
        subjects: &dyn SubjectStore,
    ) -> Result<u64, EligibilityError>;

    fn min_volume(&self) -> u64;

    /// Payout legs, in execution order
    fn legs(&self, wallet: &str, subject: &Subject, limits: &ClaimLimits) -> Vec<ClaimLeg>;
}

/// Percentage cashback on a settled off-ramp order, paid to the order's sender
pub struct CashbackProgram {
    settings: CashbackSettings,
    token_symbol: String,
}

impl CashbackProgram {
    pub fn new(settings: CashbackSettings, token_symbol: impl Into<String>) -> Self {
        Self {
            settings,
            token_symbol: token_symbol.into(),
        }
    }

    /// `rate * order amount`, clamped to the per-transaction cap
    pub fn reward_for(&self, order_amount: u64, limits: &ClaimLimits) -> u64 {
        TokenAmount::apply_rate_bps(order_amount, self.settings.reward_rate_bps).min(limits.max_per_tx)
    }
}

#[async_trait]
impl ClaimProgram for CashbackProgram {
    fn kind(&self) -> ClaimKind {
        ClaimKind::Cashback
    }

    fn campaign_end(&self) -> Option<DateTime<Utc>> {
        self.settings.campaign_end
    }

    async fn subject_id(
        &self,
        _wallet: &str,
        request: &ClaimRequest,
        _subjects: &dyn SubjectStore,
    ) -> Result<String, EligibilityError> {
        request
            .subject_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| EligibilityError::InvalidRequest("transactionId is required".to_string()))
    }

    async fn resolve_subject(
        &self,
        subject_id: &str,
        subjects: &dyn SubjectStore,
    ) -> Result<Subject, EligibilityError> {
        let record = subjects
            .transaction(subject_id)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| EligibilityError::SubjectNotFound(subject_id.to_string()))?;

        if !record.is_settled() {
            return Err(EligibilityError::NotSettled {
                subject: record.id,
                status: record.status,
            });
        }

        if !record.network.eq_ignore_ascii_case(&self.settings.expected_network) {
            return Err(EligibilityError::InvalidNetwork {
                subject: record.id,
                found: record.network,
                expected: self.settings.expected_network.clone(),
            });
        }

        Ok(Subject::Transaction(record))
    }

    fn check_ownership(&self, wallet: &str, subject: &Subject) -> Result<(), EligibilityError> {
        match subject {
            Subject::Transaction(record) if normalize_address(&record.sender) == wallet => Ok(()),
            Subject::Transaction(record) => Err(EligibilityError::NotOwner {
                wallet: wallet.to_string(),
                subject: record.id.clone(),
            }),
            Subject::Referral(record) => Err(EligibilityError::SubjectNotFound(record.id.clone())),
        }
    }

    fn participants(&self, wallet: &str, _subject: &Subject) -> Result<Vec<String>, EligibilityError> {
        Ok(vec![wallet.to_string()])
    }

    async fn qualifying_volume(
        &self,
        subject: &Subject,
        _subjects: &dyn SubjectStore,
    ) -> Result<u64, EligibilityError> {
        match subject {
            Subject::Transaction(record) => Ok(record.amount),
            Subject::Referral(record) => Err(EligibilityError::SubjectNotFound(record.id.clone())),
        }
    }

    fn min_volume(&self) -> u64 {
        self.settings.min_volume
    }

    fn legs(&self, wallet: &str, subject: &Subject, limits: &ClaimLimits) -> Vec<ClaimLeg> {
        match subject {
            Subject::Transaction(record) => vec![ClaimLeg::new(
                wallet,
                self.reward_for(record.amount, limits),
                self.token_symbol.clone(),
            )],
            Subject::Referral(_) => Vec::new(),
        }
    }
}

/// Fixed bonus to both sides of a referral once the referred wallet has traded enough
pub struct ReferralProgram {
    settings: ReferralSettings,
    token_symbol: String,
}

impl ReferralProgram {
    pub fn new(settings: ReferralSettings, token_symbol: impl Into<String>) -> Self {
        Self {
            settings,
            token_symbol: token_symbol.into(),
        }
    }
}

#[async_trait]
impl ClaimProgram for ReferralProgram {
    fn kind(&self) -> ClaimKind {
        ClaimKind::Referral
    }

    fn campaign_end(&self) -> Option<DateTime<Utc>> {
        self.settings.campaign_end
    }

    async fn subject_id(
        &self,
        wallet: &str,
        request: &ClaimRequest,
        subjects: &dyn SubjectStore,
    ) -> Result<String, EligibilityError> {
        if let Some(id) = request.subject_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        // Implicit subject: the referral that brought this wallet in
        subjects
            .referral_for_wallet(wallet)
            .await
            .map_err(store_unavailable)?
            .map(|record| record.id)
            .ok_or_else(|| EligibilityError::NotParticipant(wallet.to_string()))
    }

    async fn resolve_subject(
        &self,
        subject_id: &str,
        subjects: &dyn SubjectStore,
    ) -> Result<Subject, EligibilityError> {
        subjects
            .referral(subject_id)
            .await
            .map_err(store_unavailable)?
            .map(|record| {
                Subject::Referral(ReferralRecord {
                    referrer: normalize_address(&record.referrer),
                    referred: normalize_address(&record.referred),
                    ..record
                })
            })
            .ok_or_else(|| EligibilityError::SubjectNotFound(subject_id.to_string()))
    }

    fn participants(&self, wallet: &str, subject: &Subject) -> Result<Vec<String>, EligibilityError> {
        match subject {
            Subject::Referral(record) if record.involves(wallet) => {
                Ok(vec![record.referred.clone(), record.referrer.clone()])
            }
            _ => Err(EligibilityError::NotParticipant(wallet.to_string())),
        }
    }

    async fn qualifying_volume(
        &self,
        subject: &Subject,
        subjects: &dyn SubjectStore,
    ) -> Result<u64, EligibilityError> {
        match subject {
            Subject::Referral(record) => subjects
                .settled_volume(&record.referred)
                .await
                .map_err(store_unavailable),
            Subject::Transaction(record) => Err(EligibilityError::SubjectNotFound(record.id.clone())),
        }
    }

    fn min_volume(&self) -> u64 {
        self.settings.min_volume
    }

    fn legs(&self, _wallet: &str, subject: &Subject, _limits: &ClaimLimits) -> Vec<ClaimLeg> {
        match subject {
            Subject::Referral(record) => vec![
                ClaimLeg::new(
                    record.referrer.clone(),
                    self.settings.referrer_reward,
                    self.token_symbol.clone(),
                ),
                ClaimLeg::new(
                    record.referred.clone(),
                    self.settings.referred_reward,
                    self.token_symbol.clone(),
                ),
            ],
            Subject::Transaction(_) => Vec::new(),
        }
    }
}
