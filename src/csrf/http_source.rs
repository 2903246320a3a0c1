//! `TokenSource` backed by the server's anti-forgery endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::AntiForgeryConfig;
use crate::csrf::token::{AntiForgeryToken, FetchError, TokenSource};
use crate::runtime::Clock;

/// Body returned by the anti-forgery endpoint.
///
/// Expiry is either relative (`expires_in`, seconds) or absolute
/// (`expires_at`, unix seconds).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "csrfToken", alias = "csrf_token")]
    token: String,
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<u64>,
    #[serde(default, alias = "expiresAt")]
    expires_at: Option<u64>,
}

impl TokenResponse {
    fn into_token(self, now: SystemTime) -> Result<AntiForgeryToken, FetchError> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => SystemTime::UNIX_EPOCH + Duration::from_secs(at),
            (None, Some(secs)) => now + Duration::from_secs(secs),
            (None, None) => {
                return Err(FetchError::InvalidResponse("response carries no expiry".to_string()))
            }
        };
        Ok(AntiForgeryToken::new(self.token, now, expires_at))
    }
}

/// Fetches tokens over HTTP with reqwest.
pub struct HttpTokenSource {
    client: reqwest::Client,
    endpoint: String,
    clock: Arc<dyn Clock>,
}

impl HttpTokenSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            clock,
        })
    }

    /// Build from the `[anti_forgery]` config section, if an endpoint is set.
    pub fn from_config(config: &AntiForgeryConfig, clock: Arc<dyn Clock>) -> Option<Result<Self, FetchError>> {
        let endpoint = config.endpoint.as_ref()?;
        Some(Self::new(
            endpoint.clone(),
            Duration::from_millis(config.request_timeout_ms),
            clock,
        ))
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> Result<AntiForgeryToken, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(endpoint = %self.endpoint, status = %status, "Anti-forgery endpoint rejected request");
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        body.into_token(self.clock.now())
    }
}
