//! HTTP surface of the claim service

pub mod routes;

pub use routes::{router, AppState};
