pub mod eligibility;
pub mod orchestrator;
pub mod payout;
pub mod programs;
pub mod response;
pub mod types;

pub use eligibility::{EligibilityError, EligibilityVerifier};
pub use orchestrator::{ClaimOrchestrator, Collaborators};
pub use payout::{PayoutExecutor, PayoutFailure, PayoutReceipt};
pub use programs::{CashbackProgram, ClaimProgram, ReferralProgram, Subject};
pub use response::{ClaimResponse, ClaimView};
pub use types::{Claim, ClaimKind, ClaimLeg, ClaimRequest, ClaimStatus};
