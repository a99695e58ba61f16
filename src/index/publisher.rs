//! Publishing embedded units to the index in bounded batches.

use crate::document::ContentUnit;
use crate::embedding::EmbeddingOutcome;
use crate::index::service::SearchIndexService;
use crate::index::types::{IndexDocument, UploadReport};
use std::collections::HashMap;
use std::sync::Arc;

/// Uploads units whose embedding succeeded, batch by batch.
///
/// Batches are independent: a failed batch is recorded and the next one still
/// goes out. Units without a usable vector never reach the wire.
pub struct IndexPublisher {
    service: Arc<SearchIndexService>,
    batch_size: usize,
}

impl IndexPublisher {
    /// Create a publisher uploading at most `batch_size` documents per call.
    pub fn new(service: Arc<SearchIndexService>, batch_size: usize) -> Self {
        Self {
            service,
            batch_size: batch_size.max(1),
        }
    }

    /// Publish every unit that has a successful embedding outcome.
    pub async fn publish(
        &self,
        units: &[ContentUnit],
        outcomes: &[EmbeddingOutcome],
    ) -> UploadReport {
        let mut report = UploadReport::default();
        let by_unit: HashMap<&str, &EmbeddingOutcome> = outcomes
            .iter()
            .map(|outcome| (outcome.unit_id.as_str(), outcome))
            .collect();

        let mut documents = Vec::new();
        for unit in units {
            match by_unit.get(unit.id.as_str()) {
                Some(outcome) if outcome.succeeded() => {
                    documents.push(IndexDocument::from_unit(unit, outcome.vector.clone()));
                }
                _ => report.skipped_no_embedding += 1,
            }
        }
        if documents.is_empty() {
            tracing::info!(
                skipped = report.skipped_no_embedding,
                "No documents to publish"
            );
            return report;
        }

        for (batch_index, batch) in documents.chunks(self.batch_size).enumerate() {
            match self.service.upload_batch(batch).await {
                Ok(statuses) => {
                    for status in statuses {
                        if status.status {
                            report.succeeded += 1;
                        } else {
                            report.failed += 1;
                            report.errors.push(format!(
                                "{} rejected ({}): {}",
                                status.key,
                                status.status_code,
                                status.error_message.unwrap_or_default()
                            ));
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(
                        batch = batch_index + 1,
                        size = batch.len(),
                        error = %error,
                        "Batch upload failed"
                    );
                    report.failed += batch.len();
                    report.errors.push(format!("batch {} failed: {error}", batch_index + 1));
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped_no_embedding,
            "Publish finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::UnitKind;
    use crate::index::service::IndexSettings;
    use crate::throttle::{CallError, RateWindow, ThrottledClient};
    use httpmock::{Method::POST, MockServer};
    use reqwest::Client;
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn publisher(endpoint: String, batch_size: usize) -> IndexPublisher {
        let throttle = Arc::new(ThrottledClient {
            client: Client::builder()
                .user_agent("docgate-test")
                .build()
                .expect("client"),
            gate: Semaphore::new(8),
            window: RateWindow::new(1000, Duration::from_secs(60)),
            max_attempts: 1,
            retry_base: Duration::from_millis(1),
            retry_cap: Duration::from_secs(1),
        });
        let service = Arc::new(SearchIndexService::new(
            throttle,
            IndexSettings {
                endpoint,
                api_key: "admin-key".to_string(),
                index_name: "units-test".to_string(),
                api_version: "2024-07-01".to_string(),
                embedding_dimension: 2,
            },
        ));
        IndexPublisher::new(service, batch_size)
    }

    fn unit(id: &str) -> ContentUnit {
        ContentUnit {
            id: id.to_string(),
            kind: UnitKind::Text,
            text: format!("text for {id}"),
            title: "Doc".to_string(),
            headline: "text".to_string(),
            source_file: "doc.pdf".to_string(),
            page_number: 1,
            chunk_index: 0,
            token_count: 3,
            content_hash: format!("hash-{id}"),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            groups: BTreeSet::from(["g1".to_string()]),
            default_group: None,
        }
    }

    fn success(id: &str) -> EmbeddingOutcome {
        EmbeddingOutcome {
            unit_id: id.to_string(),
            vector: vec![0.1, 0.2],
            error: None,
        }
    }

    #[tokio::test]
    async fn batches_are_split_by_the_configured_size() {
        let server = MockServer::start_async().await;
        // Batch boundaries at 100: markers unit_000, unit_100, unit_200.
        let mut batch_mocks = Vec::new();
        for (marker, size) in [("unit_000", 100usize), ("unit_100", 100), ("unit_200", 50)] {
            let statuses: Vec<Value> = (0..size)
                .map(|i| json!({ "key": format!("{marker}-{i}"), "status": true, "statusCode": 201 }))
                .collect();
            let mock = server
                .mock_async(move |when, then| {
                    when.method(POST)
                        .path("/indexes/units-test/docs/index")
                        .body_contains(format!("\"id\":\"{marker}\""));
                    then.status(200).json_body(json!({ "value": statuses }));
                })
                .await;
            batch_mocks.push(mock);
        }

        let units: Vec<ContentUnit> = (0..250).map(|i| unit(&format!("unit_{i:03}"))).collect();
        let outcomes: Vec<EmbeddingOutcome> =
            units.iter().map(|u| success(&u.id)).collect();

        let report = publisher(server.base_url(), 100).publish(&units, &outcomes).await;

        for mock in &batch_mocks {
            assert_eq!(mock.hits_async().await, 1);
        }
        assert_eq!(report.succeeded, 250);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped_no_embedding, 0);
    }

    #[tokio::test]
    async fn rejected_documents_are_counted_with_their_reason() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/indexes/units-test/docs/index");
                then.status(207).json_body(json!({
                    "value": [
                        { "key": "ok", "status": true, "statusCode": 201 },
                        { "key": "bad", "status": false, "statusCode": 422, "errorMessage": "invalid key" }
                    ]
                }));
            })
            .await;

        let units = [unit("ok"), unit("bad")];
        let outcomes = [success("ok"), success("bad")];
        let report = publisher(server.base_url(), 100).publish(&units, &outcomes).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("bad"));
        assert!(report.errors[0].contains("invalid key"));
    }

    #[tokio::test]
    async fn units_without_vectors_are_skipped_not_uploaded() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/indexes/units-test/docs/index");
                then.status(200).json_body(json!({
                    "value": [{ "key": "good", "status": true, "statusCode": 201 }]
                }));
            })
            .await;

        let units = [unit("good"), unit("failed"), unit("unembedded")];
        let outcomes = [
            success("good"),
            EmbeddingOutcome {
                unit_id: "failed".to_string(),
                vector: Vec::new(),
                error: Some(CallError::ValidationFailure("empty".to_string())),
            },
        ];
        let report = publisher(server.base_url(), 100).publish(&units, &outcomes).await;

        assert_eq!(mock.hits_async().await, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped_no_embedding, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn failed_batch_does_not_block_later_batches() {
        let server = MockServer::start_async().await;
        let broken = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/units-test/docs/index")
                    .body_contains("\"id\":\"unit-one\"");
                then.status(503).body("index unavailable");
            })
            .await;
        let healthy = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/units-test/docs/index")
                    .body_contains("\"id\":\"unit-two\"");
                then.status(200).json_body(json!({
                    "value": [{ "key": "unit-two", "status": true, "statusCode": 201 }]
                }));
            })
            .await;

        let units = [unit("unit-one"), unit("unit-two")];
        let outcomes = [success("unit-one"), success("unit-two")];
        let report = publisher(server.base_url(), 1).publish(&units, &outcomes).await;

        assert_eq!(broken.hits_async().await, 1);
        assert_eq!(healthy.hits_async().await, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].starts_with("batch 1 failed"));
    }

    #[tokio::test]
    async fn nothing_publishable_issues_no_calls() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/indexes/units-test/docs/index");
                then.status(200).json_body(json!({ "value": [] }));
            })
            .await;

        let units = [unit("only")];
        let outcomes = [EmbeddingOutcome {
            unit_id: "only".to_string(),
            vector: Vec::new(),
            error: Some(CallError::RateLimited { retry_after: None }),
        }];
        let report = publisher(server.base_url(), 100).publish(&units, &outcomes).await;

        assert_eq!(mock.hits_async().await, 0);
        assert_eq!(report.skipped_no_embedding, 1);
        assert_eq!(report.succeeded, 0);
    }
}
