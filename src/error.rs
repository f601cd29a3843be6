use serde::Serialize;
use thiserror::Error;

use crate::claims::types::ClaimStatus;

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("Solana RPC error: {0}")]
    SolanaRpc(#[from] solana_client::client_error::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Claim not found: {0}")]
    ClaimNotFound(String),

    #[error("Refusing transition of claim {claim_id}: {from} -> {to}")]
    InvalidTransition {
        claim_id: i64,
        from: ClaimStatus,
        to: ClaimStatus,
    },

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClaimError>;

/// Machine-readable response codes. Callers branch on these instead of
/// matching on `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthRequired,
    InvalidRequest,
    InvalidRecipient,
    CampaignEnded,
    TransactionNotFound,
    TransactionNotSettled,
    InvalidNetwork,
    NotTransactionOwner,
    KycRequired,
    NotAParticipant,
    VolumeNotMet,
    MaxClaimsReached,
    MaxCashbackReached,
    ClaimPending,
    ClaimFailed,
    ServiceUnavailable,
    InsufficientBalance,
    ClaimCreationFailed,
    TransferFailed,
    InsufficientFunds,
    NonceError,
    GasEstimationFailed,
    InternalError,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidRequest
            | ErrorCode::InvalidRecipient
            | ErrorCode::TransactionNotSettled
            | ErrorCode::InvalidNetwork
            | ErrorCode::VolumeNotMet => 400,
            ErrorCode::AuthRequired => 401,
            ErrorCode::NotTransactionOwner
            | ErrorCode::KycRequired
            | ErrorCode::NotAParticipant => 403,
            ErrorCode::TransactionNotFound => 404,
            ErrorCode::ClaimPending | ErrorCode::ClaimFailed => 409,
            ErrorCode::CampaignEnded => 410,
            ErrorCode::MaxClaimsReached | ErrorCode::MaxCashbackReached => 429,
            ErrorCode::ClaimCreationFailed
            | ErrorCode::TransferFailed
            | ErrorCode::InsufficientFunds
            | ErrorCode::NonceError
            | ErrorCode::GasEstimationFailed
            | ErrorCode::InternalError => 500,
            ErrorCode::ServiceUnavailable | ErrorCode::InsufficientBalance => 503,
        }
    }

    /// Human-readable category, rendered as the envelope's `error` field
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "Authentication required",
            ErrorCode::InvalidRequest | ErrorCode::InvalidRecipient => "Invalid request",
            ErrorCode::CampaignEnded => "Campaign ended",
            ErrorCode::TransactionNotFound => "Not found",
            ErrorCode::TransactionNotSettled
            | ErrorCode::InvalidNetwork
            | ErrorCode::VolumeNotMet => "Not eligible",
            ErrorCode::NotTransactionOwner
            | ErrorCode::KycRequired
            | ErrorCode::NotAParticipant => "Forbidden",
            ErrorCode::MaxClaimsReached | ErrorCode::MaxCashbackReached => "Limit reached",
            ErrorCode::ClaimPending | ErrorCode::ClaimFailed => "Already processed",
            ErrorCode::ServiceUnavailable | ErrorCode::InsufficientBalance => "Service unavailable",
            ErrorCode::ClaimCreationFailed | ErrorCode::InternalError => "Internal error",
            ErrorCode::TransferFailed
            | ErrorCode::InsufficientFunds
            | ErrorCode::NonceError
            | ErrorCode::GasEstimationFailed => "Transfer failed",
        }
    }

    /// User-safe explanation. Never carries internal error text.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "Please sign in with your wallet to claim rewards.",
            ErrorCode::InvalidRequest => "The request is missing a valid claim subject.",
            ErrorCode::InvalidRecipient => "A reward recipient is not a valid address on the payout network.",
            ErrorCode::CampaignEnded => "This campaign has ended.",
            ErrorCode::TransactionNotFound => "We could not find the record for this claim.",
            ErrorCode::TransactionNotSettled => "The transaction has not settled yet.",
            ErrorCode::InvalidNetwork => "The transaction was made on an unsupported network.",
            ErrorCode::NotTransactionOwner => "This transaction does not belong to your wallet.",
            ErrorCode::KycRequired => "Identity verification is required before claiming.",
            ErrorCode::NotAParticipant => "Your wallet is not a participant in this reward.",
            ErrorCode::VolumeNotMet => "The minimum qualifying volume has not been reached.",
            ErrorCode::MaxClaimsReached => "You have reached the maximum number of claims.",
            ErrorCode::MaxCashbackReached => "You have reached the maximum reward amount.",
            ErrorCode::ClaimPending => "This claim is already being processed.",
            ErrorCode::ClaimFailed => "This claim was already processed and did not complete. An operator will review it.",
            ErrorCode::ServiceUnavailable => "Rewards are temporarily unavailable. Please try again later.",
            ErrorCode::InsufficientBalance => "The reward pool could not cover this claim. An operator will review it.",
            ErrorCode::ClaimCreationFailed => "We could not record your claim. Please try again.",
            ErrorCode::TransferFailed => "The reward transfer failed.",
            ErrorCode::InsufficientFunds => "The reward transfer failed due to insufficient funds.",
            ErrorCode::NonceError => "The reward transfer conflicted with another transfer. An operator will review this claim.",
            ErrorCode::GasEstimationFailed => "The reward transfer could not be priced by the network.",
            ErrorCode::InternalError => "Something went wrong. Please try again.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::MaxCashbackReached).unwrap();
        assert_eq!(json, "\"MAX_CASHBACK_REACHED\"");
        let json = serde_json::to_string(&ErrorCode::NotAParticipant).unwrap();
        assert_eq!(json, "\"NOT_A_PARTICIPANT\"");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::AuthRequired.http_status(), 401);
        assert_eq!(ErrorCode::MaxClaimsReached.http_status(), 429);
        assert_eq!(ErrorCode::InsufficientBalance.http_status(), 503);
        assert_eq!(ErrorCode::NonceError.http_status(), 500);
        assert_eq!(ErrorCode::TransactionNotFound.http_status(), 404);
        assert_eq!(ErrorCode::InvalidRecipient.http_status(), 400);
    }

    #[test]
    fn test_post_payout_messages_do_not_promise_a_retry() {
        for code in [
            ErrorCode::ClaimFailed,
            ErrorCode::InsufficientBalance,
            ErrorCode::TransferFailed,
            ErrorCode::InsufficientFunds,
            ErrorCode::NonceError,
            ErrorCode::GasEstimationFailed,
        ] {
            assert!(
                !code.default_message().to_lowercase().contains("try again"),
                "{:?}",
                code
            );
        }
    }
}
