pub mod monitor;
pub mod reconciliation;

pub use monitor::{FundingMonitor, FundingStatus};
pub use reconciliation::{PendingReconciliation, Resolution};
