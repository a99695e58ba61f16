//! Wire client for the embeddings endpoint.

use crate::config::{ApiFlavor, get_config};
use crate::throttle::{ApiAuth, ApiCall, CallError, ThrottledClient};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Connection and validation settings for the embeddings endpoint.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Full URL of the embeddings endpoint.
    pub endpoint: String,
    /// API key or bearer token, depending on flavor.
    pub api_key: String,
    /// Wire dialect of the endpoint.
    pub flavor: ApiFlavor,
    /// Model name sent in the request body; required for the OpenAI flavor.
    pub model: Option<String>,
    /// Expected vector dimension.
    pub dimension: usize,
    /// Inputs longer than this are truncated before submission.
    pub max_input_chars: usize,
}

impl EmbeddingSettings {
    /// Settings drawn from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            endpoint: config.embedding_endpoint.clone(),
            api_key: config.embedding_api_key.clone(),
            flavor: config.embedding_flavor,
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            max_input_chars: config.embedding_max_chars,
        }
    }
}

/// Client producing validated embedding vectors for unit and query text.
pub struct EmbeddingClient {
    throttle: Arc<ThrottledClient>,
    settings: EmbeddingSettings,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Create a client over the shared throttled executor.
    pub fn new(throttle: Arc<ThrottledClient>, settings: EmbeddingSettings) -> Self {
        Self { throttle, settings }
    }

    /// Embed one piece of text, returning a validated vector.
    ///
    /// Overlong input is truncated at a character boundary before submission;
    /// truncation is logged but never fails the call.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, CallError> {
        let input = self.prepare_input(text);
        let call = ApiCall::new(Method::POST, &self.settings.endpoint)
            .auth(self.auth())
            .json(self.request_body(input));

        let response = self.throttle.submit(call).await?;
        let parsed: EmbeddingResponse = response.json_as()?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| {
                CallError::ValidationFailure("embedding response carried no vectors".to_string())
            })?;
        validate_vector(vector, self.settings.dimension)
    }

    fn auth(&self) -> ApiAuth {
        match self.settings.flavor {
            ApiFlavor::Azure => ApiAuth::ApiKey(self.settings.api_key.clone()),
            ApiFlavor::OpenAI => ApiAuth::Bearer(self.settings.api_key.clone()),
        }
    }

    fn request_body(&self, input: &str) -> Value {
        match (self.settings.flavor, &self.settings.model) {
            // Azure routes the model through the deployment in the URL.
            (ApiFlavor::Azure, _) | (ApiFlavor::OpenAI, None) => json!({ "input": input }),
            (ApiFlavor::OpenAI, Some(model)) => json!({ "input": input, "model": model }),
        }
    }

    fn prepare_input<'a>(&self, text: &'a str) -> &'a str {
        match char_boundary_at(text, self.settings.max_input_chars) {
            Some(cut) => {
                tracing::warn!(
                    limit = self.settings.max_input_chars,
                    chars = text.chars().count(),
                    "Truncating overlong embedding input"
                );
                &text[..cut]
            }
            None => text,
        }
    }
}

/// Byte offset of the `limit`-th character, when the text runs past it.
fn char_boundary_at(text: &str, limit: usize) -> Option<usize> {
    text.char_indices().nth(limit).map(|(offset, _)| offset)
}

/// Check a returned vector against structural expectations.
pub(crate) fn validate_vector(vector: Vec<f32>, dimension: usize) -> Result<Vec<f32>, CallError> {
    if vector.is_empty() {
        return Err(CallError::ValidationFailure(
            "embedding vector is empty".to_string(),
        ));
    }
    if vector.len() != dimension {
        return Err(CallError::ValidationFailure(format!(
            "embedding dimension mismatch: expected {dimension}, got {}",
            vector.len()
        )));
    }
    if let Some(position) = vector.iter().position(|value| !value.is_finite()) {
        return Err(CallError::ValidationFailure(format!(
            "embedding vector holds a non-finite value at position {position}"
        )));
    }
    Ok(vector)
}
