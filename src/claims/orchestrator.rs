//! Sequences one claim request: identity, replay detection, eligibility,
//! provisional ledger row, payout and reconciliation.
//!
//! Phases run in a fixed order through a single loop. A phase either lets the
//! request continue, finishes it with a response, or aborts it; an abort runs
//! the compensation of every completed phase in reverse order.

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    claims::{
        eligibility::{check_campaign_window, EligibilityContext, EligibilityError, EligibilityVerifier},
        payout::{PayoutExecutor, PayoutFailure},
        programs::ClaimProgram,
        response::{ClaimResponse, ClaimView},
        types::{Claim, ClaimRequest, ClaimStatus, NewClaim, Provisional},
    },
    config::ClaimLimits,
    error::ErrorCode,
    providers::{IdentityResolver, KycProvider, SubjectStore},
    solana::TokenAmount,
    storage::ClaimLedger,
};

/// External services a claim flow depends on
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityResolver>,
    pub kyc: Arc<dyn KycProvider>,
    pub subjects: Arc<dyn SubjectStore>,
    pub ledger: Arc<dyn ClaimLedger>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Identity,
    FundingConfig,
    SubjectKey,
    Replay,
    Eligibility,
    Provisional,
    Payout,
    Reconcile,
}

pub const PHASES: [Phase; 8] = [
    Phase::Identity,
    Phase::FundingConfig,
    Phase::SubjectKey,
    Phase::Replay,
    Phase::Eligibility,
    Phase::Provisional,
    Phase::Payout,
    Phase::Reconcile,
];

const PAYOUT_REVIEW_MESSAGE: &str =
    "The reward could not be paid out. An operator will review this claim.";

enum Step {
    Continue,
    /// Stop here; nothing to undo
    Finish(ClaimResponse),
    /// Stop here and compensate completed phases
    Abort(ClaimResponse),
}

/// Request-scoped state threaded through the phases
#[derive(Default)]
struct Flow {
    wallet: String,
    subject_id: String,
    eligibility: Option<EligibilityContext>,
    claim: Option<Claim>,
    tx_hashes: Vec<String>,
}

pub struct ClaimOrchestrator {
    program: Arc<dyn ClaimProgram>,
    verifier: EligibilityVerifier,
    ledger: Arc<dyn ClaimLedger>,
    token: TokenAmount,
    payout: Option<Arc<PayoutExecutor>>,
}

impl ClaimOrchestrator {
    /// `payout` is `None` when no funding wallet is configured; every claim is then refused.
    pub fn new(
        program: Arc<dyn ClaimProgram>,
        collaborators: Collaborators,
        limits: ClaimLimits,
        token: TokenAmount,
        payout: Option<Arc<PayoutExecutor>>,
    ) -> Self {
        let verifier = EligibilityVerifier::new(
            collaborators.identity,
            collaborators.kyc,
            collaborators.subjects,
            collaborators.ledger.clone(),
            limits,
        );

        Self {
            program,
            verifier,
            ledger: collaborators.ledger,
            token,
            payout,
        }
    }

    pub fn payouts_configured(&self) -> bool {
        self.payout.is_some()
    }

    pub async fn claim(&self, request: ClaimRequest) -> ClaimResponse {
        let started = Instant::now();
        let mut flow = Flow::default();
        let mut completed: Vec<Phase> = Vec::with_capacity(PHASES.len());

        for phase in PHASES {
            match self.run_phase(phase, &request, &mut flow).await {
                Step::Continue => completed.push(phase),
                Step::Finish(response) => return response.timed(started),
                Step::Abort(response) => {
                    for done in completed.iter().rev() {
                        self.compensate(*done, &flow).await;
                    }
                    return response.timed(started);
                }
            }
        }

        // Reconcile always finishes the request
        error!("{} claim flow ran out of phases", self.program.kind());
        ClaimResponse::failure(ErrorCode::InternalError).timed(started)
    }

    async fn run_phase(&self, phase: Phase, request: &ClaimRequest, flow: &mut Flow) -> Step {
        match phase {
            Phase::Identity => match self.verifier.resolve_identity(request.auth_token.as_deref()).await {
                Ok(wallet) => {
                    flow.wallet = wallet;
                    Step::Continue
                }
                Err(e) => Step::Finish(ClaimResponse::failure(e.code())),
            },

            Phase::FundingConfig => {
                if self.payout.is_some() {
                    Step::Continue
                } else {
                    warn!(
                        "Refusing {} claim from {}: no funding wallet configured",
                        self.program.kind(),
                        flow.wallet
                    );
                    Step::Finish(ClaimResponse::failure(ErrorCode::ServiceUnavailable))
                }
            }

            Phase::SubjectKey => {
                match self
                    .program
                    .subject_id(&flow.wallet, request, self.verifier.subjects())
                    .await
                {
                    Ok(subject_id) => {
                        flow.subject_id = subject_id;
                        Step::Continue
                    }
                    Err(e) => {
                        // A closed campaign outranks participation and lookup failures
                        let e = match e {
                            EligibilityError::InvalidRequest(_) => e,
                            other => check_campaign_window(self.program.as_ref()).err().unwrap_or(other),
                        };
                        Step::Finish(ClaimResponse::failure(e.code()).with_details(e.details(&self.token)))
                    }
                }
            }

            Phase::Replay => match self.ledger.find(&flow.subject_id).await {
                Ok(Some(existing)) => {
                    debug!(
                        "Replay of {} claim {} for {} ({})",
                        existing.kind, existing.id, existing.subject_id, existing.status
                    );
                    Step::Finish(ClaimResponse::replay(&existing, &self.token))
                }
                Ok(None) => Step::Continue,
                Err(e) => {
                    warn!("Ledger lookup for {} failed: {}", flow.subject_id, e);
                    Step::Finish(ClaimResponse::failure(ErrorCode::ServiceUnavailable))
                }
            },

            Phase::Eligibility => {
                match self
                    .verifier
                    .verify(self.program.as_ref(), &flow.wallet, &flow.subject_id)
                    .await
                {
                    Ok(ctx) => {
                        let unpayable = self.payout.as_ref().and_then(|executor| executor.unpayable_leg(&ctx.legs));
                        if let Some(leg) = unpayable {
                            warn!(
                                "Refusing {} claim {} for {}: leg {} recipient is not payable",
                                self.program.kind(),
                                flow.subject_id,
                                flow.wallet,
                                leg
                            );
                            return Step::Finish(
                                ClaimResponse::failure(ErrorCode::InvalidRecipient)
                                    .with_details(Some(json!({ "failedLeg": leg }))),
                            );
                        }
                        flow.eligibility = Some(ctx);
                        Step::Continue
                    }
                    Err(e) => Step::Finish(ClaimResponse::failure(e.code()).with_details(e.details(&self.token))),
                }
            }

            Phase::Provisional => {
                let legs = flow
                    .eligibility
                    .as_ref()
                    .map(|ctx| ctx.legs.clone())
                    .unwrap_or_default();
                let new_claim = NewClaim {
                    subject_id: flow.subject_id.clone(),
                    kind: self.program.kind(),
                    claimant_wallet: flow.wallet.clone(),
                    legs,
                };

                match self.ledger.create_provisional(new_claim).await {
                    Ok(Provisional::Created(claim)) => {
                        info!(
                            "Created {} claim {} for {} ({} legs, {} total)",
                            claim.kind,
                            claim.id,
                            claim.subject_id,
                            claim.legs.len(),
                            self.token
                                .format(claim.total_amount(), claim.token_symbol().unwrap_or_default())
                        );
                        flow.claim = Some(claim);
                        Step::Continue
                    }
                    Ok(Provisional::Existing(existing)) => {
                        info!(
                            "Lost insert race for {}: claim {} is {}",
                            existing.subject_id, existing.id, existing.status
                        );
                        Step::Finish(ClaimResponse::replay(&existing, &self.token))
                    }
                    Err(e) => {
                        error!("Provisional claim for {} not recorded: {}", flow.subject_id, e);
                        Step::Finish(ClaimResponse::failure(ErrorCode::ClaimCreationFailed))
                    }
                }
            }

            Phase::Payout => {
                let (Some(executor), Some(claim)) = (self.payout.as_ref(), flow.claim.as_ref()) else {
                    return Step::Abort(ClaimResponse::failure(ErrorCode::InternalError));
                };

                match executor.execute(claim).await {
                    Ok(receipt) => {
                        flow.tx_hashes = receipt.tx_hashes;
                        Step::Continue
                    }
                    Err(failure) => {
                        let response = self.payout_failure_response(claim, &failure);
                        flow.tx_hashes = failure.tx_hashes;
                        Step::Abort(response)
                    }
                }
            }

            Phase::Reconcile => {
                let Some(claim) = flow.claim.as_mut() else {
                    return Step::Finish(ClaimResponse::failure(ErrorCode::InternalError));
                };

                if let Err(e) = self
                    .ledger
                    .transition(claim.id, ClaimStatus::Completed, &flow.tx_hashes)
                    .await
                {
                    // Funds moved; the caller is told so and the row is left for reconciliation
                    error!(
                        "Claim {} paid but not marked completed (tx hashes: {}): {}",
                        claim.id,
                        flow.tx_hashes.join(", "),
                        e
                    );
                }

                apply_hashes(claim, &flow.tx_hashes);
                claim.status = ClaimStatus::Completed;
                info!(
                    "{} claim {} completed for {}",
                    claim.kind, claim.id, claim.claimant_wallet
                );
                Step::Finish(ClaimResponse::success(ClaimView::new(claim, &self.token)))
            }
        }
    }

    async fn compensate(&self, phase: Phase, flow: &Flow) {
        if phase != Phase::Provisional {
            return;
        }
        let Some(claim) = flow.claim.as_ref() else {
            return;
        };

        match self
            .ledger
            .transition(claim.id, ClaimStatus::Failed, &flow.tx_hashes)
            .await
        {
            Ok(()) => info!(
                "Claim {} marked failed ({} of {} legs paid)",
                claim.id,
                flow.tx_hashes.len(),
                claim.legs.len()
            ),
            Err(e) => error!(
                "Claim {} could not be marked failed (tx hashes: {}): {}",
                claim.id,
                flow.tx_hashes.join(", "),
                e
            ),
        }
    }

    fn payout_failure_response(&self, claim: &Claim, failure: &PayoutFailure) -> ClaimResponse {
        let mut details = json!({ "completedLegs": failure.tx_hashes.len() });
        if let Some(leg) = failure.error.failed_leg() {
            details["failedLeg"] = json!(leg);
        }
        if failure.is_partial() {
            details["txHashes"] = json!(failure.tx_hashes);
        }

        warn!("Payout of claim {} failed: {}", claim.id, failure.error);
        let response = ClaimResponse::failure(failure.error.code()).with_details(Some(details));
        match failure.error.code() {
            // The row is terminal now, so these must not invite a retry
            ErrorCode::ServiceUnavailable | ErrorCode::InternalError => {
                response.with_message(PAYOUT_REVIEW_MESSAGE)
            }
            _ => response,
        }
    }
}

/// Writes leg hashes onto the in-memory claim, in leg order
fn apply_hashes(claim: &mut Claim, tx_hashes: &[String]) {
    for (leg, hash) in claim.legs.iter_mut().zip(tx_hashes) {
        leg.tx_hash = Some(hash.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::types::{ClaimKind, ClaimLeg};
    use chrono::Utc;

    #[test]
    fn test_phase_order() {
        let replay = PHASES.iter().position(|p| *p == Phase::Replay).unwrap();
        let eligibility = PHASES.iter().position(|p| *p == Phase::Eligibility).unwrap();
        let provisional = PHASES.iter().position(|p| *p == Phase::Provisional).unwrap();
        let payout = PHASES.iter().position(|p| *p == Phase::Payout).unwrap();

        assert_eq!(PHASES[0], Phase::Identity);
        assert!(replay < eligibility);
        assert!(eligibility < provisional);
        assert!(provisional < payout);
        assert_eq!(PHASES[PHASES.len() - 1], Phase::Reconcile);
    }

    #[test]
    fn test_apply_hashes_fills_legs_in_order() {
        let mut claim = Claim {
            id: 1,
            subject_id: "ref-1".to_string(),
            kind: ClaimKind::Referral,
            claimant_wallet: "dave".to_string(),
            legs: vec![ClaimLeg::new("carol", 1, "USDC"), ClaimLeg::new("dave", 1, "USDC")],
            status: ClaimStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        apply_hashes(&mut claim, &["sig-1".to_string()]);
        assert_eq!(claim.legs[0].tx_hash.as_deref(), Some("sig-1"));
        assert!(claim.legs[1].tx_hash.is_none());
    }
}
