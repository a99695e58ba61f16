//! Fan-out embedding over batches of content units.

use crate::document::ContentUnit;
use crate::embedding::client::EmbeddingClient;
use crate::embedding::types::EmbeddingOutcome;
use futures_util::future::join_all;
use std::sync::Arc;

/// Embeds whole batches with per-unit failure isolation.
///
/// Every unit gets exactly one outcome and outcomes keep submission order, so
/// callers can collate by position or by id. Backpressure lives in the shared
/// throttled client; the pipeline submits everything at once.
pub struct EmbeddingPipeline {
    client: Arc<EmbeddingClient>,
}

impl EmbeddingPipeline {
    /// Create a pipeline over the given client.
    pub fn new(client: Arc<EmbeddingClient>) -> Self {
        Self { client }
    }

    /// Embed every unit in the batch.
    pub async fn process_batch(&self, units: &[ContentUnit]) -> Vec<EmbeddingOutcome> {
        if units.is_empty() {
            return Vec::new();
        }

        let tasks = units.iter().map(|unit| async {
            match self.client.embed(&unit.text).await {
                Ok(vector) => EmbeddingOutcome::success(unit.id.clone(), vector),
                Err(error) => {
                    tracing::warn!(unit = %unit.id, error = %error, "Embedding failed for unit");
                    EmbeddingOutcome::failure(unit.id.clone(), error)
                }
            }
        });
        let outcomes = join_all(tasks).await;

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        tracing::info!(
            total = outcomes.len(),
            succeeded,
            failed = outcomes.len() - succeeded,
            "Embedding batch finished"
        );
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiFlavor;
    use crate::document::{PageText, UnitBuilder};
    use crate::embedding::client::EmbeddingSettings;
    use crate::throttle::{CallError, RateWindow, ThrottledClient};
    use httpmock::{Method::POST, MockServer};
    use reqwest::Client;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn pipeline(endpoint: String) -> EmbeddingPipeline {
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
        EmbeddingPipeline::new(Arc::new(EmbeddingClient::new(
            throttle,
            EmbeddingSettings {
                endpoint,
                api_key: "secret".to_string(),
                flavor: ApiFlavor::Azure,
                model: None,
                dimension: 2,
                max_input_chars: 7000,
            },
        )))
    }

    fn units(texts: &[&str]) -> Vec<ContentUnit> {
        let builder = UnitBuilder::new(
            500,
            0,
            BTreeSet::from(["group-a".to_string()]),
            None,
        )
        .expect("builder");
        texts
            .iter()
            .enumerate()
            .map(|(page, text)| {
                let pages = [PageText {
                    number: page as u32 + 1,
                    text: text.to_string(),
                }];
                let (mut built, _) = builder.units_for_pages("doc.pdf", &pages);
                built.remove(0)
            })
            .collect()
    }

    #[tokio::test]
    async fn outcomes_keep_order_and_isolate_failures() {
        let server = MockServer::start_async().await;
        let healthy = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings").body_contains("wholesome");
                then.status(200)
                    .json_body(serde_json::json!({ "data": [{ "embedding": [0.1, 0.2] }] }));
            })
            .await;
        let poisoned = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings").body_contains("poison");
                then.status(400).body("cannot embed that");
            })
            .await;

        let batch = units(&[
            "wholesome text one",
            "poison text",
            "wholesome text two",
        ]);
        let outcomes = pipeline(server.url("/embeddings")).process_batch(&batch).await;

        assert_eq!(healthy.hits_async().await, 2);
        assert_eq!(poisoned.hits_async().await, 1);
        assert_eq!(outcomes.len(), batch.len());
        for (unit, outcome) in batch.iter().zip(&outcomes) {
            assert_eq!(unit.id, outcome.unit_id);
        }
        assert!(outcomes[0].succeeded());
        assert!(!outcomes[1].succeeded());
        assert!(outcomes[2].succeeded());
        assert!(matches!(
            outcomes[1].error,
            Some(CallError::PermanentRequest { status: 400, .. })
        ));
        assert!(outcomes[1].vector.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_issues_no_calls() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200)
                    .json_body(serde_json::json!({ "data": [{ "embedding": [0.1, 0.2] }] }));
            })
            .await;

        let outcomes = pipeline(server.url("/embeddings")).process_batch(&[]).await;

        assert!(outcomes.is_empty());
        assert_eq!(mock.hits_async().await, 0);
    }
}
