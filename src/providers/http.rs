use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::{
    error::{ClaimError, Result},
    providers::{IdentityResolver, KycProvider, KycStatus},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    wallet_address: Option<String>,
}

/// Resolves bearer tokens against the auth service's session endpoint
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    session_url: String,
}

impl HttpIdentityResolver {
    pub fn new(session_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            session_url: session_url.to_string(),
        })
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, auth_token: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.session_url)
            .bearer_auth(auth_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClaimError::Provider(format!(
                "identity service returned {}",
                response.status()
            )));
        }

        let session: SessionResponse = response.json().await?;
        match session.wallet_address {
            Some(wallet) if !wallet.trim().is_empty() => Ok(wallet),
            _ => Err(ClaimError::Provider("session has no wallet address".to_string())),
        }
    }
}

/// KYC lookups: `GET {base_url}/{address}` answering `{ "verified": bool }`
pub struct HttpKycProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKycProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl KycProvider for HttpKycProvider {
    async fn status(&self, wallet: &str) -> Result<KycStatus> {
        let url = format!("{}/{}", self.base_url, wallet);
        let status = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<KycStatus>()
            .await?;

        debug!("KYC status for {}: verified={}", wallet, status.verified);
        Ok(status)
    }
}
