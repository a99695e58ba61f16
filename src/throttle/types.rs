//! Shared types for the throttled outbound client.

use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Largest exponent applied to the backoff base; the cap makes anything
/// beyond this unreachable anyway.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Errors surfaced by throttled API calls.
///
/// The variants carry owned strings instead of source errors so one failure
/// can be cloned into several per-item outcomes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// Transport failure or 5xx response; the call may be retried.
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),
    /// The service rejected the call with 429.
    #[error("Rate limited by upstream service")]
    RateLimited {
        /// Server-provided wait hint, when present.
        retry_after: Option<Duration>,
    },
    /// A non-retryable client-side rejection.
    #[error("Request rejected ({status}): {body}")]
    PermanentRequest {
        /// HTTP status of the rejection.
        status: u16,
        /// Body text returned with the rejection.
        body: String,
    },
    /// Authentication or authorization was refused.
    #[error("Authentication failed ({status}): {body}")]
    AuthFailure {
        /// HTTP status of the refusal (401 or 403).
        status: u16,
        /// Body text returned with the refusal.
        body: String,
    },
    /// The response arrived but violated a structural expectation.
    #[error("Validation failed: {0}")]
    ValidationFailure(String),
}

impl CallError {
    /// Whether the retry loop may re-issue the call after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::RateLimited { .. })
    }
}

/// Description of one outbound HTTP call.
///
/// Holds everything needed to rebuild the request, since each retry attempt
/// constructs a fresh one.
#[derive(Debug, Clone)]
pub struct ApiCall {
    /// HTTP method.
    pub method: Method,
    /// Fully-formed request URL.
    pub url: String,
    /// Authentication attached to the request.
    pub auth: ApiAuth,
    /// Optional request body.
    pub body: Option<ApiBody>,
}

impl ApiCall {
    /// Start describing a call with the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            auth: ApiAuth::None,
            body: None,
        }
    }

    /// Attach an authentication scheme.
    pub fn auth(mut self, auth: ApiAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(ApiBody::Json(body));
        self
    }

    /// Attach a form-encoded body.
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(ApiBody::Form(fields));
        self
    }
}

/// Authentication schemes understood by the upstream services.
#[derive(Debug, Clone)]
pub enum ApiAuth {
    /// No authentication header.
    None,
    /// `api-key: <value>` header.
    ApiKey(String),
    /// `Authorization: Bearer <value>` header.
    Bearer(String),
}

/// Request payloads supported by the client.
#[derive(Debug, Clone)]
pub enum ApiBody {
    /// JSON-encoded body.
    Json(Value),
    /// `application/x-www-form-urlencoded` body.
    Form(Vec<(String, String)>),
}

/// Successful response captured as status plus parsed JSON body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status of the final attempt.
    pub status: StatusCode,
    /// Parsed JSON body; `Value::Null` when the body was empty or not JSON.
    pub body: Value,
}

impl ApiResponse {
    /// Deserialize the body into a typed value.
    pub fn json_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, CallError> {
        serde_json::from_value(self.body.clone())
            .map_err(|err| CallError::ValidationFailure(format!("unexpected response shape: {err}")))
    }
}

/// Retry state threaded through a call's attempt loop.
///
/// Carrying the counter and delay math in one value keeps the submit loop a
/// flat state machine: issue, classify, record, sleep.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    attempt: u32,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetrySchedule {
    /// Create a schedule allowing `max_attempts` total attempts.
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base,
            cap,
        }
    }

    /// Attempts issued so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt, returning how long to back off before the
    /// next one, or `None` when the attempt budget is spent.
    ///
    /// The computed delay doubles per attempt and is bounded by the cap; a
    /// server-provided hint wins only when it is larger than the computed
    /// value.
    pub fn record_failure(&mut self, hint: Option<Duration>) -> Option<Duration> {
        let failed = self.attempt;
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let computed = self
            .base
            .saturating_mul(2u32.saturating_pow(failed.min(MAX_BACKOFF_EXPONENT)))
            .min(self.cap);
        Some(match hint {
            Some(hint) if hint > computed => hint,
            _ => computed,
        })
    }
}
