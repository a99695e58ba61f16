//! Client-credentials token acquisition with expiry-aware caching.

use crate::graph::{GraphError, GraphSettings};
use crate::throttle::{ApiCall, ThrottledClient};
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Tokens are treated as stale this long before their reported expiry.
const EXPIRY_SKEW_SECS: u64 = 60;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Acquires and caches the service principal's bearer token.
pub struct TokenProvider {
    throttle: Arc<ThrottledClient>,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider for the principal described by `settings`.
    pub fn new(throttle: Arc<ThrottledClient>, settings: &GraphSettings) -> Self {
        Self {
            throttle,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                settings.authority_host.trim_end_matches('/'),
                settings.tenant_id
            ),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, fetched anew only when the cache is stale.
    ///
    /// The lock is held across the fetch, so concurrent callers wait for one
    /// refresh instead of stampeding the authority.
    pub async fn bearer_token(&self) -> Result<String, GraphError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.expires_at
        {
            return Ok(token.value.clone());
        }

        let call = ApiCall::new(Method::POST, &self.token_url).form(vec![
            ("client_id".to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
            ("scope".to_string(), self.scope.clone()),
            ("grant_type".to_string(), "client_credentials".to_string()),
        ]);
        let response = self.throttle.submit(call).await.map_err(GraphError::Token)?;
        let parsed: TokenResponse = response.json_as().map_err(GraphError::Token)?;

        *cached = Some(CachedToken {
            value: parsed.access_token.clone(),
            expires_at: Instant::now() + cache_ttl_for(parsed.expires_in),
        });
        tracing::debug!(expires_in = parsed.expires_in, "Acquired directory token");
        Ok(parsed.access_token)
    }
}

/// How long a token with the given lifetime stays cached.
fn cache_ttl_for(expires_in: u64) -> Duration {
    Duration::from_secs(expires_in.saturating_sub(EXPIRY_SKEW_SECS))
}
