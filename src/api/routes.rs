use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    claims::{ClaimOrchestrator, ClaimRequest, ClaimResponse},
    treasury::{FundingMonitor, FundingStatus},
};

#[derive(Clone)]
pub struct AppState {
    pub cashback: Arc<ClaimOrchestrator>,
    pub referral: Arc<ClaimOrchestrator>,
    pub monitor: Option<Arc<FundingMonitor>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/claims/cashback", post(claim_cashback))
        .route("/api/claims/referral", post(claim_referral))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CashbackBody {
    transaction_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferralBody {
    referral_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub payouts_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding: Option<FundingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `Authorization: Bearer <token>`; the scheme is matched case-insensitively
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

/// Bodies are parsed leniently so authentication is always reported first.
/// An empty or malformed body reads as one without a subject.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    if body.iter().all(u8::is_ascii_whitespace) {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!("Ignoring malformed claim body: {}", e);
        T::default()
    })
}

fn reply(response: ClaimResponse) -> (StatusCode, Json<ClaimResponse>) {
    let status = StatusCode::from_u16(response.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}

pub async fn claim_cashback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ClaimResponse>) {
    let body: CashbackBody = parse_body(&body);
    let request = ClaimRequest::new(bearer_token(&headers), body.transaction_id);
    reply(state.cashback.claim(request).await)
}

pub async fn claim_referral(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ClaimResponse>) {
    let body: ReferralBody = parse_body(&body);
    let request = ClaimRequest::new(bearer_token(&headers), body.referral_id);
    reply(state.referral.claim(request).await)
}

pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let payouts_configured = state.cashback.payouts_configured() && state.referral.payouts_configured();

    let Some(monitor) = state.monitor.as_ref() else {
        return (
            StatusCode::OK,
            Json(HealthResponse {
                status: "degraded",
                payouts_configured,
                funding: None,
                reason: Some("funding wallet not configured".to_string()),
            }),
        );
    };

    match monitor.check().await {
        Ok(funding) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: if funding.low_balance { "degraded" } else { "ok" },
                reason: funding.low_balance.then(|| "funding balance low".to_string()),
                payouts_configured,
                funding: Some(funding),
            }),
        ),
        Err(e) => {
            warn!("Health check could not read funding balance: {}", e);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "degraded",
                    payouts_configured,
                    funding: None,
                    reason: Some("funding balance unavailable".to_string()),
                }),
            )
        }
    }
}
