//! Wire client for the vision chat-completions endpoint.

use crate::config::{Config, get_config};
use crate::document::ExtractedImage;
use crate::document::units::current_timestamp_rfc3339;
use crate::throttle::{ApiAuth, ApiCall, CallError, ThrottledClient};
use crate::vision::types::ImageAnalysis;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Confidence stamped on analyses recovered from non-JSON replies.
const FALLBACK_CONFIDENCE: f32 = 0.8;

/// Instructions sent with every image.
const ANALYSIS_PROMPT: &str = r#"Analyze this image and reply with a JSON object of this exact shape:
{
    "description": "detailed description of the image content",
    "extracted_text": "any text visible in the image, empty string if none",
    "objects_detected": ["list", "of", "recognizable", "objects"],
    "confidence_score": 0.95
}
Reply with the JSON object only."#;

/// Connection settings for the vision endpoint.
#[derive(Debug, Clone)]
pub struct VisionSettings {
    /// Full URL of the chat-completions endpoint.
    pub endpoint: String,
    /// API key sent with every request.
    pub api_key: String,
    /// Completion token budget per image.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Image detail level requested from the model.
    pub detail: String,
}

impl VisionSettings {
    /// Settings drawn from the process configuration.
    ///
    /// Returns `None` when no vision endpoint is configured; image analysis
    /// is an optional stage. An endpoint without its own key borrows the
    /// embedding key, so one shared credential can serve both endpoints.
    pub fn from_config() -> Option<Self> {
        Self::resolve(get_config())
    }

    fn resolve(config: &Config) -> Option<Self> {
        let endpoint = config.vision_endpoint.clone()?;
        let api_key = config
            .vision_api_key
            .clone()
            .unwrap_or_else(|| config.embedding_api_key.clone());
        Some(Self {
            endpoint,
            api_key,
            max_tokens: config.vision_max_tokens,
            temperature: config.vision_temperature,
            detail: config.vision_detail.clone(),
        })
    }
}

/// Client describing images through a multimodal completion model.
pub struct VisionClient {
    throttle: Arc<ThrottledClient>,
    settings: VisionSettings,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

/// Fields the model is asked to return.
#[derive(Deserialize)]
struct AnalysisFields {
    #[serde(default)]
    description: String,
    #[serde(default)]
    extracted_text: String,
    #[serde(default)]
    objects_detected: Vec<String>,
    #[serde(default = "fallback_confidence")]
    confidence_score: f32,
}

fn fallback_confidence() -> f32 {
    FALLBACK_CONFIDENCE
}

impl VisionClient {
    /// Create a client over the shared throttled executor.
    pub fn new(throttle: Arc<ThrottledClient>, settings: VisionSettings) -> Self {
        Self { throttle, settings }
    }

    /// Analyze one extracted image.
    pub async fn analyze(&self, image: &ExtractedImage) -> Result<ImageAnalysis, CallError> {
        let call = ApiCall::new(Method::POST, &self.settings.endpoint)
            .auth(ApiAuth::ApiKey(self.settings.api_key.clone()))
            .json(self.request_body(image));

        let response = self.throttle.submit(call).await?;
        let reply: ChatResponse = response.json_as()?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                CallError::ValidationFailure("vision reply carried no content".to_string())
            })?;

        let fields = parse_analysis_fields(&content);
        tracing::debug!(
            image = %image.id,
            tokens = reply.usage.total_tokens,
            objects = fields.objects_detected.len(),
            "Analyzed image"
        );
        Ok(ImageAnalysis {
            image_id: image.id.clone(),
            source_file: image.source_file.clone(),
            page_number: image.page_number,
            description: fields.description,
            extracted_text: fields.extracted_text,
            objects_detected: fields.objects_detected,
            confidence_score: fields.confidence_score,
            analyzed_at: current_timestamp_rfc3339(),
            tokens_used: reply.usage.total_tokens,
        })
    }

    fn request_body(&self, image: &ExtractedImage) -> serde_json::Value {
        let data_url = format!(
            "data:image/{};base64,{}",
            image.format,
            STANDARD.encode(&image.bytes)
        );
        json!({
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": ANALYSIS_PROMPT },
                        {
                            "type": "image_url",
                            "image_url": { "url": data_url, "detail": self.settings.detail }
                        }
                    ]
                }
            ],
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature
        })
    }
}

/// Pull structured fields out of a model reply.
///
/// The outermost brace-delimited span is tried as JSON; anything else, and
/// any reply without valid JSON, degrades to a plain-text description with a
/// reduced confidence stamp.
fn parse_analysis_fields(content: &str) -> AnalysisFields {
    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}'))
        && start < end
        && let Ok(fields) = serde_json::from_str::<AnalysisFields>(&content[start..=end])
    {
        return fields;
    }

    AnalysisFields {
        description: content.trim().to_string(),
        extracted_text: String::new(),
        objects_detected: Vec::new(),
        confidence_score: FALLBACK_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::RateWindow;
    use httpmock::{Method::POST, MockServer};
    use reqwest::Client;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn client(endpoint: String) -> VisionClient {
        let throttle = Arc::new(ThrottledClient {
            client: Client::builder()
                .user_agent("docgate-test")
                .build()
                .expect("client"),
            gate: Semaphore::new(8),
            window: RateWindow::new(100, Duration::from_secs(60)),
            max_attempts: 1,
            retry_base: Duration::from_millis(1),
            retry_cap: Duration::from_secs(1),
        });
        VisionClient::new(
            throttle,
            VisionSettings {
                endpoint,
                api_key: "secret".to_string(),
                max_tokens: 500,
                temperature: 0.1,
                detail: "high".to_string(),
            },
        )
    }

    fn image() -> ExtractedImage {
        ExtractedImage {
            id: "report.pdf_p2_img1".to_string(),
            source_file: "report.pdf".to_string(),
            page_number: 2,
            format: "png".to_string(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[tokio::test]
    async fn analysis_sends_data_url_and_parses_json_reply() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/vision")
                    .header("api-key", "secret")
                    .body_contains("data:image/png;base64,iVBORw==")
                    .body_contains("\"detail\":\"high\"");
                then.status(200).json_body(json!({
                    "choices": [{
                        "message": {
                            "content": "Here you go:\n{\"description\": \"A revenue chart\", \
                             \"extracted_text\": \"Q1 Q2\", \
                             \"objects_detected\": [\"chart\"], \
                             \"confidence_score\": 0.92}"
                        }
                    }],
                    "usage": { "total_tokens": 184 }
                }));
            })
            .await;

        let analysis = client(server.url("/vision"))
            .analyze(&image())
            .await
            .expect("analyze");

        mock.assert_async().await;
        assert_eq!(analysis.image_id, "report.pdf_p2_img1");
        assert_eq!(analysis.description, "A revenue chart");
        assert_eq!(analysis.extracted_text, "Q1 Q2");
        assert_eq!(analysis.objects_detected, vec!["chart".to_string()]);
        assert!((analysis.confidence_score - 0.92).abs() < f32::EPSILON);
        assert_eq!(analysis.tokens_used, 184);
        assert_eq!(analysis.page_number, 2);
    }

    #[tokio::test]
    async fn plain_text_reply_degrades_to_description() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/vision");
                then.status(200).json_body(json!({
                    "choices": [{
                        "message": { "content": "A photograph of a whiteboard." }
                    }],
                    "usage": { "total_tokens": 40 }
                }));
            })
            .await;

        let analysis = client(server.url("/vision"))
            .analyze(&image())
            .await
            .expect("analyze");

        assert_eq!(analysis.description, "A photograph of a whiteboard.");
        assert!(analysis.extracted_text.is_empty());
        assert!(analysis.objects_detected.is_empty());
        assert!((analysis.confidence_score - FALLBACK_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn empty_reply_is_a_validation_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/vision");
                then.status(200)
                    .json_body(json!({ "choices": [], "usage": { "total_tokens": 0 } }));
            })
            .await;

        let error = client(server.url("/vision"))
            .analyze(&image())
            .await
            .expect_err("analyze should fail");
        assert!(matches!(error, CallError::ValidationFailure(_)));
    }

    #[test]
    fn fields_are_sliced_out_of_surrounding_prose() {
        let fields = parse_analysis_fields(
            "Sure! {\"description\": \"a cat\", \"confidence_score\": 0.5} Hope that helps.",
        );
        assert_eq!(fields.description, "a cat");
        assert!((fields.confidence_score - 0.5).abs() < f32::EPSILON);
        assert!(fields.extracted_text.is_empty());
    }

    #[test]
    fn broken_json_falls_back_to_full_text() {
        let fields = parse_analysis_fields("{not json at all");
        assert_eq!(fields.description, "{not json at all");
        assert!((fields.confidence_score - FALLBACK_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_confidence_defaults_to_fallback() {
        let fields = parse_analysis_fields("{\"description\": \"a dog\"}");
        assert_eq!(fields.description, "a dog");
        assert!((fields.confidence_score - FALLBACK_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_vision_key_borrows_the_embedding_key() {
        let mut config = Config::sample();
        config.vision_endpoint = Some("https://vision.example.net/chat".into());
        config.vision_api_key = None;

        let settings = VisionSettings::resolve(&config).expect("endpoint is configured");
        assert_eq!(settings.api_key, "embed-key");
        assert_eq!(settings.endpoint, "https://vision.example.net/chat");
    }

    #[test]
    fn explicit_vision_key_wins_over_the_shared_one() {
        let mut config = Config::sample();
        config.vision_endpoint = Some("https://vision.example.net/chat".into());
        config.vision_api_key = Some("vision-key".into());

        let settings = VisionSettings::resolve(&config).expect("endpoint is configured");
        assert_eq!(settings.api_key, "vision-key");
    }

    #[test]
    fn unset_endpoint_disables_analysis() {
        let config = Config::sample();
        assert!(VisionSettings::resolve(&config).is_none());
    }
}
