use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    claims::types::{Claim, ClaimLeg},
    error::{ErrorCode, Result},
    providers::TransferClient,
};

/// Category of a failed transfer. Only changes the code reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorKind {
    InsufficientFunds,
    NonceConflict,
    GasEstimationFailed,
    Generic,
}

impl TransferErrorKind {
    /// Classifies raw client errors by recognizable substrings
    pub fn classify(message: &str) -> Self {
        let message = message.to_ascii_lowercase();

        if message.contains("insufficient funds")
            || message.contains("insufficient lamports")
            || message.contains("insufficient balance")
            || message.contains("exceeds balance")
            || has_program_error(&message, "0x1")
        {
            TransferErrorKind::InsufficientFunds
        } else if message.contains("nonce")
            || message.contains("blockhash not found")
            || message.contains("already been processed")
            || message.contains("replacement transaction")
        {
            TransferErrorKind::NonceConflict
        } else if message.contains("gas")
            || message.contains("fee")
            || message.contains("simulation failed")
            || message.contains("compute budget")
            || message.contains("estimate")
        {
            TransferErrorKind::GasEstimationFailed
        } else {
            TransferErrorKind::Generic
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            TransferErrorKind::InsufficientFunds => ErrorCode::InsufficientFunds,
            TransferErrorKind::NonceConflict => ErrorCode::NonceError,
            TransferErrorKind::GasEstimationFailed => ErrorCode::GasEstimationFailed,
            TransferErrorKind::Generic => ErrorCode::TransferFailed,
        }
    }
}

/// Matches `custom program error: <code>` exactly, so 0x1 does not match 0x10
fn has_program_error(message: &str, code: &str) -> bool {
    let needle = format!("custom program error: {}", code);
    message.match_indices(&needle).any(|(at, _)| {
        message[at + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_hexdigit())
    })
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayoutError {
    #[error("funding wallet holds {available}, claim requires {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("funding balance unavailable: {0}")]
    BalanceUnavailable(String),

    #[error("leg {leg} uses token {found}, executor pays {expected}")]
    TokenMismatch {
        leg: usize,
        found: String,
        expected: String,
    },

    #[error("leg {leg} transfer failed ({kind:?}): {message}")]
    Transfer {
        leg: usize,
        kind: TransferErrorKind,
        message: String,
    },
}

impl PayoutError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PayoutError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            PayoutError::BalanceUnavailable(_) => ErrorCode::ServiceUnavailable,
            PayoutError::TokenMismatch { .. } => ErrorCode::InternalError,
            PayoutError::Transfer { kind, .. } => kind.code(),
        }
    }

    pub fn failed_leg(&self) -> Option<usize> {
        match self {
            PayoutError::Transfer { leg, .. } | PayoutError::TokenMismatch { leg, .. } => Some(*leg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutReceipt {
    pub tx_hashes: Vec<String>,
}

/// A payout that stopped early. `tx_hashes` holds the legs that went through, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutFailure {
    pub tx_hashes: Vec<String>,
    pub error: PayoutError,
}

impl PayoutFailure {
    pub fn is_partial(&self) -> bool {
        !self.tx_hashes.is_empty()
    }
}

/// Pays claims out of one funding wallet.
///
/// All `execute` calls on an executor share one payout lane, so the funding
/// wallet's signing key never has two transfers in flight. Share a single
/// executor (`Arc`) between every program paying from the same wallet.
pub struct PayoutExecutor {
    client: Arc<dyn TransferClient>,
    funding_wallet: String,
    token_address: String,
    token_symbol: String,
    lane: Mutex<()>,
}

impl PayoutExecutor {
    pub fn new(
        client: Arc<dyn TransferClient>,
        funding_wallet: impl Into<String>,
        token_address: impl Into<String>,
        token_symbol: impl Into<String>,
    ) -> Self {
        Self {
            client,
            funding_wallet: funding_wallet.into(),
            token_address: token_address.into(),
            token_symbol: token_symbol.into(),
            lane: Mutex::new(()),
        }
    }

    pub fn funding_wallet(&self) -> &str {
        &self.funding_wallet
    }

    pub fn token_symbol(&self) -> &str {
        &self.token_symbol
    }

    /// First leg whose recipient the transfer client cannot pay
    pub fn unpayable_leg(&self, legs: &[ClaimLeg]) -> Option<usize> {
        legs.iter().position(|leg| match self.client.validate_recipient(&leg.recipient) {
            Ok(()) => false,
            Err(e) => {
                warn!("Leg recipient {} is not payable: {}", leg.recipient, e);
                true
            }
        })
    }

    pub async fn balance(&self) -> Result<u64> {
        self.client.balance_of(&self.funding_wallet, &self.token_address).await
    }

    pub async fn execute(&self, claim: &Claim) -> std::result::Result<PayoutReceipt, PayoutFailure> {
        let _lane = self.lane.lock().await;

        let fail = |tx_hashes: Vec<String>, error: PayoutError| PayoutFailure { tx_hashes, error };

        if let Some((leg, found)) = claim
            .legs
            .iter()
            .enumerate()
            .find(|(_, leg)| leg.token_symbol != self.token_symbol)
            .map(|(i, leg)| (i, leg.token_symbol.clone()))
        {
            return Err(fail(
                Vec::new(),
                PayoutError::TokenMismatch {
                    leg,
                    found,
                    expected: self.token_symbol.clone(),
                },
            ));
        }

        let required = claim.total_amount();
        let available = match self.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Balance pre-flight for claim {} failed: {}", claim.id, e);
                return Err(fail(Vec::new(), PayoutError::BalanceUnavailable(e.to_string())));
            }
        };

        if available < required {
            warn!(
                "Funding wallet {} holds {} {}, claim {} needs {}",
                self.funding_wallet, available, self.token_symbol, claim.id, required
            );
            return Err(fail(Vec::new(), PayoutError::InsufficientBalance { available, required }));
        }

        let mut tx_hashes = Vec::with_capacity(claim.legs.len());
        for (index, leg) in claim.legs.iter().enumerate() {
            match self
                .client
                .transfer(&self.funding_wallet, &self.token_address, &leg.recipient, leg.amount)
                .await
            {
                Ok(hash) => {
                    info!(
                        "Claim {} leg {}/{}: paid {} to {} ({})",
                        claim.id,
                        index + 1,
                        claim.legs.len(),
                        leg.amount,
                        leg.recipient,
                        hash
                    );
                    tx_hashes.push(hash);
                }
                Err(e) => {
                    let message = e.to_string();
                    let kind = TransferErrorKind::classify(&message);
                    error!(
                        "Claim {} leg {}/{} to {} failed ({:?}): {}",
                        claim.id,
                        index + 1,
                        claim.legs.len(),
                        leg.recipient,
                        kind,
                        message
                    );
                    return Err(fail(
                        tx_hashes,
                        PayoutError::Transfer {
                            leg: index,
                            kind,
                            message,
                        },
                    ));
                }
            }
        }

        Ok(PayoutReceipt { tx_hashes })
    }
}
