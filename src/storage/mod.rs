pub mod db;
pub mod ledger;
pub mod models;

pub use db::Database;
pub use ledger::ClaimLedger;
pub use models::{ClaimSummary, LedgerStats};
