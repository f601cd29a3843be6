use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    claims::{
        programs::{ClaimProgram, Subject},
        types::{normalize_address, ClaimLeg, WalletTotals},
    },
    config::ClaimLimits,
    error::ErrorCode,
    providers::{IdentityResolver, KycProvider, SubjectStore},
    solana::TokenAmount,
    storage::ClaimLedger,
};

/// Why a wallet may not claim. Every variant maps to one response code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EligibilityError {
    #[error("authentication required")]
    AuthRequired,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("campaign ended at {0}")]
    CampaignEnded(DateTime<Utc>),

    #[error("subject {0} not found")]
    SubjectNotFound(String),

    #[error("subject {subject} is '{status}', not settled")]
    NotSettled { subject: String, status: String },

    #[error("subject {subject} is on network '{found}', expected '{expected}'")]
    InvalidNetwork {
        subject: String,
        found: String,
        expected: String,
    },

    #[error("wallet {wallet} does not own {subject}")]
    NotOwner { wallet: String, subject: String },

    #[error("wallet {0} is not a participant")]
    NotParticipant(String),

    #[error("wallet {0} is not KYC verified")]
    KycRequired(String),

    #[error("qualifying volume {volume} below required {required}")]
    VolumeNotMet { volume: u64, required: u64 },

    #[error("wallet has {count} completed claims, limit {max}")]
    MaxClaimsReached { count: u64, max: u64 },

    #[error("wallet {wallet} would reach {would_total}, limit {max}")]
    MaxAmountReached {
        wallet: String,
        would_total: u64,
        max: u64,
    },

    #[error("dependency unavailable: {0}")]
    Dependency(String),
}

impl EligibilityError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EligibilityError::AuthRequired => ErrorCode::AuthRequired,
            EligibilityError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            EligibilityError::CampaignEnded(_) => ErrorCode::CampaignEnded,
            EligibilityError::SubjectNotFound(_) => ErrorCode::TransactionNotFound,
            EligibilityError::NotSettled { .. } => ErrorCode::TransactionNotSettled,
            EligibilityError::InvalidNetwork { .. } => ErrorCode::InvalidNetwork,
            EligibilityError::NotOwner { .. } => ErrorCode::NotTransactionOwner,
            EligibilityError::NotParticipant(_) => ErrorCode::NotAParticipant,
            EligibilityError::KycRequired(_) => ErrorCode::KycRequired,
            EligibilityError::VolumeNotMet { .. } => ErrorCode::VolumeNotMet,
            EligibilityError::MaxClaimsReached { .. } => ErrorCode::MaxClaimsReached,
            EligibilityError::MaxAmountReached { .. } => ErrorCode::MaxCashbackReached,
            EligibilityError::Dependency(_) => ErrorCode::ServiceUnavailable,
        }
    }

    /// Structured, user-safe context for the response envelope
    pub fn details(&self, token: &TokenAmount) -> Option<serde_json::Value> {
        match self {
            EligibilityError::CampaignEnded(ended_at) => Some(json!({ "endedAt": ended_at.to_rfc3339() })),
            EligibilityError::VolumeNotMet { volume, required } => Some(json!({
                "currentVolume": token.to_ui(*volume),
                "requiredVolume": token.to_ui(*required),
            })),
            EligibilityError::MaxClaimsReached { count, max } => Some(json!({
                "claims": count,
                "maxClaims": max,
            })),
            EligibilityError::MaxAmountReached { max, .. } => Some(json!({ "maxAmount": token.to_ui(*max) })),
            _ => None,
        }
    }
}

/// Per-request facts gathered by the checks. Never persisted.
#[derive(Debug, Clone)]
pub struct EligibilityContext {
    pub wallet: String,
    pub subject_id: String,
    pub window_open: bool,
    pub subject: Option<Subject>,
    /// Verification flag per required party, in check order
    pub kyc: Vec<(String, bool)>,
    pub volume: u64,
    pub prior: WalletTotals,
    pub legs: Vec<ClaimLeg>,
}

impl EligibilityContext {
    pub fn new(wallet: &str, subject_id: &str) -> Self {
        Self {
            wallet: wallet.to_string(),
            subject_id: subject_id.to_string(),
            window_open: false,
            subject: None,
            kyc: Vec::new(),
            volume: 0,
            prior: WalletTotals::default(),
            legs: Vec::new(),
        }
    }

    fn subject(&self) -> Result<&Subject, EligibilityError> {
        self.subject
            .as_ref()
            .ok_or_else(|| EligibilityError::SubjectNotFound(self.subject_id.clone()))
    }
}

/// Fails once the program's campaign has ended
pub fn check_campaign_window(program: &dyn ClaimProgram) -> Result<(), EligibilityError> {
    match program.campaign_end() {
        Some(ends_at) if Utc::now() > ends_at => Err(EligibilityError::CampaignEnded(ends_at)),
        _ => Ok(()),
    }
}

/// Check stages after identity resolution, in the order they must run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStage {
    CampaignWindow,
    Subject,
    Ownership,
    Participation,
    Threshold,
    WalletCaps,
}

pub const CHECK_ORDER: [CheckStage; 6] = [
    CheckStage::CampaignWindow,
    CheckStage::Subject,
    CheckStage::Ownership,
    CheckStage::Participation,
    CheckStage::Threshold,
    CheckStage::WalletCaps,
];

/// Read-only gatekeeper. The first failing check decides the reported error.
pub struct EligibilityVerifier {
    identity: Arc<dyn IdentityResolver>,
    kyc: Arc<dyn KycProvider>,
    subjects: Arc<dyn SubjectStore>,
    ledger: Arc<dyn ClaimLedger>,
    limits: ClaimLimits,
}

impl EligibilityVerifier {
    pub fn new(
        identity: Arc<dyn IdentityResolver>,
        kyc: Arc<dyn KycProvider>,
        subjects: Arc<dyn SubjectStore>,
        ledger: Arc<dyn ClaimLedger>,
        limits: ClaimLimits,
    ) -> Self {
        Self {
            identity,
            kyc,
            subjects,
            ledger,
            limits,
        }
    }

    pub fn subjects(&self) -> &dyn SubjectStore {
        self.subjects.as_ref()
    }

    /// First check of the chain: the auth context must yield a wallet
    pub async fn resolve_identity(&self, auth_token: Option<&str>) -> Result<String, EligibilityError> {
        let token = auth_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(EligibilityError::AuthRequired)?;

        match self.identity.resolve(token).await {
            Ok(wallet) => Ok(normalize_address(&wallet)),
            Err(e) => {
                debug!("Identity resolution failed: {}", e);
                Err(EligibilityError::AuthRequired)
            }
        }
    }

    pub async fn verify(
        &self,
        program: &dyn ClaimProgram,
        wallet: &str,
        subject_id: &str,
    ) -> Result<EligibilityContext, EligibilityError> {
        let mut ctx = EligibilityContext::new(wallet, subject_id);

        for stage in CHECK_ORDER {
            if let Err(e) = self.run_stage(stage, program, &mut ctx).await {
                debug!(
                    "{} claim for {} by {} failed at {:?}: {}",
                    program.kind(),
                    subject_id,
                    wallet,
                    stage,
                    e
                );
                return Err(e);
            }
        }

        Ok(ctx)
    }

    async fn run_stage(
        &self,
        stage: CheckStage,
        program: &dyn ClaimProgram,
        ctx: &mut EligibilityContext,
    ) -> Result<(), EligibilityError> {
        match stage {
            CheckStage::CampaignWindow => {
                check_campaign_window(program)?;
                ctx.window_open = true;
            }

            CheckStage::Subject => {
                let subject = program.resolve_subject(&ctx.subject_id, self.subjects.as_ref()).await?;
                ctx.subject = Some(subject);
            }

            CheckStage::Ownership => {
                program.check_ownership(&ctx.wallet, ctx.subject()?)?;
            }

            CheckStage::Participation => {
                let parties = program.participants(&ctx.wallet, ctx.subject()?)?;
                for party in parties {
                    let status = self.kyc.status(&party).await.map_err(|e| {
                        warn!("KYC lookup for {} failed: {}", party, e);
                        EligibilityError::Dependency("kyc".to_string())
                    })?;
                    ctx.kyc.push((party.clone(), status.verified));
                    if !status.verified {
                        return Err(EligibilityError::KycRequired(party));
                    }
                }
            }

            CheckStage::Threshold => {
                let volume = program
                    .qualifying_volume(ctx.subject()?, self.subjects.as_ref())
                    .await?;
                ctx.volume = volume;
                let required = program.min_volume();
                if volume < required {
                    return Err(EligibilityError::VolumeNotMet { volume, required });
                }

                ctx.legs = program.legs(&ctx.wallet, ctx.subject()?, &self.limits);
                if ctx.legs.is_empty() || ctx.legs.iter().any(|leg| leg.amount == 0) {
                    return Err(EligibilityError::VolumeNotMet { volume, required });
                }
            }

            CheckStage::WalletCaps => {
                self.check_caps(ctx).await?;
            }
        }

        Ok(())
    }

    async fn check_caps(&self, ctx: &mut EligibilityContext) -> Result<(), EligibilityError> {
        let totals_for = |wallet: String| {
            let ledger = self.ledger.clone();
            async move {
                ledger.sum_completed(&wallet).await.map_err(|e| {
                    warn!("Completed-claim aggregate for {} failed: {}", wallet, e);
                    EligibilityError::Dependency("ledger".to_string())
                })
            }
        };

        ctx.prior = totals_for(ctx.wallet.clone()).await?;
        if ctx.prior.count >= self.limits.max_claims_per_wallet {
            return Err(EligibilityError::MaxClaimsReached {
                count: ctx.prior.count,
                max: self.limits.max_claims_per_wallet,
            });
        }

        let mut incoming: BTreeMap<&str, u64> = BTreeMap::new();
        for leg in &ctx.legs {
            if leg.amount > self.limits.max_per_tx {
                return Err(EligibilityError::MaxAmountReached {
                    wallet: leg.recipient.clone(),
                    would_total: leg.amount,
                    max: self.limits.max_per_tx,
                });
            }
            *incoming.entry(leg.recipient.as_str()).or_default() += leg.amount;
        }

        // claimant first so its limit is the one reported when several are exceeded
        let mut recipients: Vec<&str> = incoming.keys().copied().collect();
        recipients.sort_by_key(|r| *r != ctx.wallet.as_str());

        for recipient in recipients {
            let already = if recipient == ctx.wallet {
                ctx.prior.total_amount
            } else {
                totals_for(recipient.to_string()).await?.total_amount
            };
            let would_total = already.saturating_add(incoming[recipient]);
            if would_total > self.limits.max_per_wallet {
                return Err(EligibilityError::MaxAmountReached {
                    wallet: recipient.to_string(),
                    would_total,
                    max: self.limits.max_per_wallet,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        claims::{
            programs::CashbackProgram,
            types::{Claim, NewClaim, Provisional},
        },
        config::CashbackSettings,
        error::{ClaimError, Result},
        providers::{KycStatus, ReferralRecord, TransactionRecord},
    };
    use async_trait::async_trait;
    use chrono::Duration;

    struct Anyone;

    #[async_trait]
    impl IdentityResolver for Anyone {
        async fn resolve(&self, auth_token: &str) -> Result<String> {
            Ok(auth_token.to_string())
        }
    }

    struct Kyc(bool);

    #[async_trait]
    impl KycProvider for Kyc {
        async fn status(&self, _wallet: &str) -> Result<KycStatus> {
            Ok(KycStatus { verified: self.0 })
        }
    }

    struct OneOrder;

    #[async_trait]
    impl SubjectStore for OneOrder {
        async fn transaction(&self, id: &str) -> Result<Option<TransactionRecord>> {
            Ok((id == "order-1").then(|| TransactionRecord {
                id: id.to_string(),
                sender: "0xAlice".to_string(),
                network: "solana".to_string(),
                status: "settled".to_string(),
                amount: 50_000_000,
                updated_at: Utc::now(),
            }))
        }

        async fn referral(&self, _id: &str) -> Result<Option<ReferralRecord>> {
            Ok(None)
        }

        async fn referral_for_wallet(&self, _wallet: &str) -> Result<Option<ReferralRecord>> {
            Ok(None)
        }

        async fn settled_volume(&self, _wallet: &str) -> Result<u64> {
            Ok(0)
        }
    }

    /// Ledger with fixed prior totals; never written to by the verifier
    struct Totals(std::result::Result<WalletTotals, ()>);

    #[async_trait]
    impl ClaimLedger for Totals {
        async fn find(&self, _subject_id: &str) -> Result<Option<Claim>> {
            Ok(None)
        }

        async fn create_provisional(&self, _claim: NewClaim) -> Result<Provisional> {
            panic!("verifier must not write")
        }

        async fn transition(&self, _claim_id: i64, _status: crate::claims::ClaimStatus, _tx_hashes: &[String]) -> Result<()> {
            panic!("verifier must not write")
        }

        async fn sum_completed(&self, _wallet: &str) -> Result<WalletTotals> {
            self.0
                .clone()
                .map_err(|_| ClaimError::Provider("ledger offline".to_string()))
        }
    }

    fn limits() -> ClaimLimits {
        ClaimLimits {
            max_per_tx: 100_000_000,
            max_per_wallet: 500_000_000,
            max_claims_per_wallet: 10,
        }
    }

    fn cashback(campaign_end: Option<DateTime<Utc>>) -> CashbackProgram {
        CashbackProgram::new(
            CashbackSettings {
                reward_rate_bps: 100,
                campaign_end,
                expected_network: "solana".to_string(),
                min_volume: 0,
            },
            "USDC",
        )
    }

    fn verifier(kyc: bool, totals: std::result::Result<WalletTotals, ()>) -> EligibilityVerifier {
        EligibilityVerifier::new(
            Arc::new(Anyone),
            Arc::new(Kyc(kyc)),
            Arc::new(OneOrder),
            Arc::new(Totals(totals)),
            limits(),
        )
    }

    #[test]
    fn test_campaign_window_is_checked_first() {
        assert_eq!(CHECK_ORDER[0], CheckStage::CampaignWindow);
        assert!(check_campaign_window(&cashback(None)).is_ok());
        assert!(check_campaign_window(&cashback(Some(Utc::now() + Duration::days(1)))).is_ok());
        assert!(matches!(
            check_campaign_window(&cashback(Some(Utc::now() - Duration::days(1)))),
            Err(EligibilityError::CampaignEnded(_))
        ));
    }

    #[test]
    fn test_error_codes_and_details() {
        let usdc = TokenAmount::default();
        let volume = EligibilityError::VolumeNotMet {
            volume: 5_000_000,
            required: 20_000_000,
        };
        assert_eq!(volume.code(), ErrorCode::VolumeNotMet);
        assert_eq!(volume.details(&usdc), Some(json!({ "currentVolume": 5.0, "requiredVolume": 20.0 })));

        let cap = EligibilityError::MaxAmountReached {
            wallet: "carol".to_string(),
            would_total: 501_000_000,
            max: 500_000_000,
        };
        assert_eq!(cap.code(), ErrorCode::MaxCashbackReached);
        assert_eq!(cap.details(&usdc), Some(json!({ "maxAmount": 500.0 })));

        assert_eq!(EligibilityError::Dependency("kyc".to_string()).code(), ErrorCode::ServiceUnavailable);
        assert_eq!(EligibilityError::NotParticipant("mallory".to_string()).details(&usdc), None);
    }

    #[tokio::test]
    async fn test_identity_is_normalized_and_required() {
        let verifier = verifier(true, Ok(WalletTotals::default()));
        assert_eq!(verifier.resolve_identity(Some(" 0xAlice ")).await, Ok("0xalice".to_string()));
        assert_eq!(verifier.resolve_identity(Some("  ")).await, Err(EligibilityError::AuthRequired));
        assert_eq!(verifier.resolve_identity(None).await, Err(EligibilityError::AuthRequired));
    }

    #[tokio::test]
    async fn test_verify_collects_context() {
        let ctx = verifier(true, Ok(WalletTotals::default()))
            .verify(&cashback(None), "0xalice", "order-1")
            .await
            .unwrap();

        assert!(ctx.window_open);
        assert_eq!(ctx.kyc, vec![("0xalice".to_string(), true)]);
        assert_eq!(ctx.volume, 50_000_000);
        assert_eq!(ctx.legs.len(), 1);
        assert_eq!(ctx.legs[0].amount, 500_000);
    }

    #[tokio::test]
    async fn test_first_failing_check_wins() {
        // Unverified and at the claim cap: KYC runs first
        let verifier = verifier(
            false,
            Ok(WalletTotals {
                count: 10,
                total_amount: 0,
            }),
        );
        assert!(matches!(
            verifier.verify(&cashback(None), "0xalice", "order-1").await,
            Err(EligibilityError::KycRequired(wallet)) if wallet == "0xalice"
        ));

        let ended = cashback(Some(Utc::now() - Duration::hours(1)));
        assert!(matches!(
            verifier.verify(&ended, "0xalice", "missing").await,
            Err(EligibilityError::CampaignEnded(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_outage_is_a_dependency_failure() {
        let result = verifier(true, Err(()))
            .verify(&cashback(None), "0xalice", "order-1")
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::ServiceUnavailable);
    }
}
