//! Fan-out analysis over batches of extracted images.

use crate::document::ExtractedImage;
use crate::vision::client::VisionClient;
use crate::vision::types::VisionOutcome;
use futures_util::future::join_all;
use std::sync::Arc;

/// Analyzes whole batches with per-image failure isolation.
///
/// Mirrors the embedding pipeline's contract: one outcome per submitted
/// image, in submission order. The shared throttled client provides the
/// backpressure.
pub struct VisionPipeline {
    client: Arc<VisionClient>,
}

impl VisionPipeline {
    /// Create a pipeline over the given client.
    pub fn new(client: Arc<VisionClient>) -> Self {
        Self { client }
    }

    /// Analyze every image in the batch.
    pub async fn analyze_batch(&self, images: &[ExtractedImage]) -> Vec<VisionOutcome> {
        if images.is_empty() {
            return Vec::new();
        }

        let tasks = images.iter().map(|image| async {
            match self.client.analyze(image).await {
                Ok(analysis) => VisionOutcome::success(image.id.clone(), analysis),
                Err(error) => {
                    tracing::warn!(image = %image.id, error = %error, "Image analysis failed");
                    VisionOutcome::failure(image.id.clone(), error)
                }
            }
        });
        let outcomes = join_all(tasks).await;

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        tracing::info!(
            total = outcomes.len(),
            succeeded,
            failed = outcomes.len() - succeeded,
            "Image analysis batch finished"
        );
        outcomes
    }
}
