pub mod amount;
pub mod client;

pub use amount::{TokenAmount, MAX_DECIMALS, STABLECOIN_DECIMALS};
pub use client::{load_keypair, parse_commitment, parse_pubkey, SolanaTransferClient};
