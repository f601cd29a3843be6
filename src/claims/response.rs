use serde::Serialize;
use std::time::Instant;

use crate::{
    claims::types::{Claim, ClaimStatus},
    error::ErrorCode,
    solana::TokenAmount,
};

/// Claim summary embedded in responses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub amount: f64,
    pub token_type: String,
    pub status: ClaimStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hashes: Option<Vec<String>>,
}

impl ClaimView {
    /// Single-leg claims report `txHash`, multi-leg claims `txHashes`
    pub fn new(claim: &Claim, token: &TokenAmount) -> Self {
        let hashes = claim.tx_hashes();
        let (tx_hash, tx_hashes) = if claim.legs.len() > 1 {
            (None, Some(hashes))
        } else {
            (hashes.into_iter().next(), None)
        };

        Self {
            amount: token.to_ui(claim.total_amount()),
            token_type: claim.token_symbol().unwrap_or_default().to_string(),
            status: claim.status,
            tx_hash,
            tx_hashes,
        }
    }
}

/// Response envelope shared by every claim endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimView>,
    #[serde(rename = "response_time_ms")]
    pub response_time_ms: u64,
    #[serde(skip)]
    pub http_status: u16,
}

impl ClaimResponse {
    pub fn success(claim: ClaimView) -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            message: None,
            details: None,
            claim: Some(claim),
            response_time_ms: 0,
            http_status: 200,
        }
    }

    pub fn failure(code: ErrorCode) -> Self {
        Self {
            success: false,
            error: Some(code.category().to_string()),
            code: Some(code),
            message: Some(code.default_message().to_string()),
            details: None,
            claim: None,
            response_time_ms: 0,
            http_status: code.http_status(),
        }
    }

    /// Outcome of a claim that already had a ledger row
    pub fn replay(claim: &Claim, token: &TokenAmount) -> Self {
        let view = ClaimView::new(claim, token);
        match claim.status {
            ClaimStatus::Completed => Self::success(view),
            ClaimStatus::Pending => Self::failure(ErrorCode::ClaimPending).with_claim(view),
            ClaimStatus::Failed => Self::failure(ErrorCode::ClaimFailed).with_claim(view),
        }
    }

    pub fn with_claim(mut self, claim: ClaimView) -> Self {
        self.claim = Some(claim);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Option<serde_json::Value>) -> Self {
        self.details = details;
        self
    }

    pub fn timed(mut self, started: Instant) -> Self {
        self.response_time_ms = started.elapsed().as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::types::{ClaimKind, ClaimLeg};
    use chrono::Utc;

    fn claim(legs: Vec<ClaimLeg>, status: ClaimStatus) -> Claim {
        Claim {
            id: 7,
            subject_id: "8453-order1".to_string(),
            kind: ClaimKind::Cashback,
            claimant_wallet: "0xalice".to_string(),
            legs,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_failure_envelope_shape() {
        let response = ClaimResponse::failure(ErrorCode::MaxClaimsReached);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "MAX_CLAIMS_REACHED");
        assert_eq!(json["error"], "Limit reached");
        assert!(json.get("claim").is_none());
        assert!(json.get("http_status").is_none());
        assert!(json.get("response_time_ms").is_some());
        assert_eq!(response.http_status, 429);
    }

    #[test]
    fn test_single_leg_uses_tx_hash() {
        let mut leg = ClaimLeg::new("0xalice", 500_000, "USDC");
        leg.tx_hash = Some("sig-1".to_string());
        let response = ClaimResponse::replay(&claim(vec![leg], ClaimStatus::Completed), &TokenAmount::default());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["claim"]["txHash"], "sig-1");
        assert_eq!(json["claim"]["amount"], 0.5);
        assert_eq!(json["claim"]["tokenType"], "USDC");
        assert_eq!(json["claim"]["status"], "completed");
        assert!(json["claim"].get("txHashes").is_none());
    }

    #[test]
    fn test_multi_leg_uses_tx_hashes_and_pending_replay_is_not_success() {
        let legs = vec![
            ClaimLeg::new("0xcarol", 1_000_000, "USDC"),
            ClaimLeg::new("0xdave", 1_000_000, "USDC"),
        ];
        let response = ClaimResponse::replay(&claim(legs, ClaimStatus::Pending), &TokenAmount::default());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "CLAIM_PENDING");
        assert_eq!(json["claim"]["txHashes"], serde_json::json!([]));
        assert_eq!(json["claim"]["status"], "pending");
    }
}
