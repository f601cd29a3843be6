pub mod api;
pub mod app;
pub mod claims;
pub mod config;
pub mod error;
pub mod providers;
pub mod solana;
pub mod storage;
pub mod treasury;
pub mod utils;

pub use config::Config;
pub use error::{ClaimError, ErrorCode, Result};
