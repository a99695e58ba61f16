//! Throttled outbound HTTP execution shared by every upstream service wrapper.
//!
//! All exterior calls (embeddings, vision, the search index, the directory
//! API) funnel through a [`ThrottledClient`]. Three independent mechanisms
//! compose per call: a semaphore bounds how many calls are in flight, a
//! rolling [`RateWindow`] bounds how many attempts start per window, and a
//! [`RetrySchedule`] turns transient failures into bounded exponential
//! backoff. The caller's permit stays held across retries, so a call that is
//! backing off occupies its own slot and never blocks sibling submits.

mod types;
mod window;

pub use types::{ApiAuth, ApiBody, ApiCall, ApiResponse, CallError, RetrySchedule};
pub use window::RateWindow;

use crate::config::get_config;
use reqwest::{Client, Response, StatusCode, header};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Semaphore;

/// User agent attached to every outbound request.
pub(crate) const USER_AGENT: &str = "docgate/0.2";

/// Tuning knobs for a [`ThrottledClient`].
#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    /// Maximum simultaneously in-flight calls.
    pub max_concurrent: usize,
    /// Attempts admitted per rolling window.
    pub window_limit: usize,
    /// Length of the rolling window.
    pub window: Duration,
    /// Total attempts per call, first try included.
    pub max_attempts: u32,
    /// Base backoff delay.
    pub retry_base: Duration,
    /// Ceiling on a single backoff delay.
    pub retry_cap: Duration,
}

impl ThrottleSettings {
    /// Settings drawn from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            max_concurrent: config.max_concurrent_requests,
            window_limit: config.rate_limit_requests,
            window: Duration::from_secs(config.rate_limit_window_secs),
            max_attempts: config.retry_max_attempts,
            retry_base: Duration::from_millis(config.retry_base_ms),
            retry_cap: Duration::from_millis(config.retry_cap_ms),
        }
    }
}

/// Concurrency-bounded, rate-limited, retrying HTTP client.
pub struct ThrottledClient {
    pub(crate) client: Client,
    pub(crate) gate: Semaphore,
    pub(crate) window: RateWindow,
    pub(crate) max_attempts: u32,
    pub(crate) retry_base: Duration,
    pub(crate) retry_cap: Duration,
}

impl ThrottledClient {
    /// Wrap a prebuilt HTTP client with the given limits.
    pub fn new(client: Client, settings: ThrottleSettings) -> Self {
        Self {
            client,
            gate: Semaphore::new(settings.max_concurrent),
            window: RateWindow::new(settings.window_limit, settings.window),
            max_attempts: settings.max_attempts,
            retry_base: settings.retry_base,
            retry_cap: settings.retry_cap,
        }
    }

    /// Build a client with limits drawn from the process configuration.
    pub fn from_config() -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::new(client, ThrottleSettings::from_config()))
    }

    /// Execute a call to completion.
    ///
    /// Suspends until the admission gate and rate window admit the attempt,
    /// retries retryable failures with exponential backoff, and returns the
    /// final classified outcome as a value. Safe to invoke from any number of
    /// tasks concurrently.
    pub async fn submit(&self, call: ApiCall) -> Result<ApiResponse, CallError> {
        let _permit = self.gate.acquire().await.expect("admission gate closed");
        let mut schedule = RetrySchedule::new(self.max_attempts, self.retry_base, self.retry_cap);

        loop {
            self.window.acquire().await;
            let error = match self.attempt(&call).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            let hint = match &error {
                CallError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            match schedule.record_failure(hint) {
                Some(delay) => {
                    tracing::warn!(
                        url = %call.url,
                        attempt = schedule.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying throttled call"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(
                        url = %call.url,
                        attempts = schedule.attempt(),
                        error = %error,
                        "Retry budget exhausted"
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(&self, call: &ApiCall) -> Result<ApiResponse, CallError> {
        let mut request = self.client.request(call.method.clone(), &call.url);
        request = match &call.auth {
            ApiAuth::None => request,
            ApiAuth::ApiKey(key) => request.header("api-key", key),
            ApiAuth::Bearer(token) => {
                request.header(header::AUTHORIZATION, format!("Bearer {token}"))
            }
        };
        request = match &call.body {
            Some(ApiBody::Json(value)) => request.json(value),
            Some(ApiBody::Form(fields)) => request.form(fields),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|err| CallError::TransientNetwork(err.to_string()))?;
        classify(response).await
    }
}

/// Map a raw HTTP response onto the call error taxonomy.
async fn classify(response: Response) -> Result<ApiResponse, CallError> {
    let status = response.status();

    if status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };
        return Ok(ApiResponse { status, body });
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_retry_after(response.headers());
        return Err(CallError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CallError::AuthFailure {
            status: status.as_u16(),
            body,
        });
    }
    if status.is_server_error() {
        return Err(CallError::TransientNetwork(format!("{status}: {body}")));
    }
    Err(CallError::PermanentRequest {
        status: status.as_u16(),
        body,
    })
}

/// Read a seconds-valued `Retry-After` header. Date-formatted values are
/// ignored.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
