//! End-to-end ingestion: discovery, extraction, analysis, embedding,
//! publishing.
//!
//! [`IngestService`] drives one run over a source directory. Stages hand off
//! plain value types, so a failure in one document or one image never stops
//! the run; only a missing directory or an index that cannot be prepared is
//! fatal. A shared shutdown flag is checked between stages, letting a run
//! stop at the next boundary without leaving a half-written batch behind.

use crate::document::{
    ContentUnit, DocumentExtractor, ExtractedImage, UnitBuilder, UnitKind, discover_pdfs,
};
use crate::embedding::EmbeddingPipeline;
use crate::index::{IndexPublisher, SearchIndexService, UploadReport};
use crate::metrics::ActivityMetrics;
use crate::throttle::CallError;
use crate::vision::VisionPipeline;
use futures_util::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Errors that stop an ingest run before any document work happens.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The source directory does not exist.
    #[error("Source directory {0} does not exist")]
    MissingDirectory(String),
    /// The target index could not be created or updated.
    #[error("Index setup failed: {0}")]
    IndexSetup(#[from] CallError),
}

/// Counters for one ingest run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// PDF files found under the source directory.
    pub files_discovered: usize,
    /// Files whose content was extracted successfully.
    pub files_extracted: usize,
    /// Pages read across all extracted files.
    pub pages: usize,
    /// Text units built from page chunks.
    pub text_units: usize,
    /// Chunks dropped because their content repeated an earlier chunk.
    pub duplicate_chunks: usize,
    /// Images found across all extracted files.
    pub images_found: usize,
    /// Images the vision backend described successfully.
    pub images_analyzed: usize,
    /// Units built from analyzed images.
    pub image_units: usize,
    /// Units that received an embedding.
    pub embedded: usize,
    /// Units whose embedding attempt failed.
    pub embedding_failures: usize,
    /// Outcome of the publish stage.
    pub upload: UploadReport,
    /// Whether the run stopped early at a shutdown check.
    pub interrupted: bool,
}

/// Orchestrates one ingest run over a directory of source documents.
pub struct IngestService {
    extractor: Box<dyn DocumentExtractor>,
    units: UnitBuilder,
    vision: Option<VisionPipeline>,
    embeddings: EmbeddingPipeline,
    publisher: IndexPublisher,
    index: Arc<SearchIndexService>,
    metrics: Arc<ActivityMetrics>,
    max_concurrent_documents: usize,
    shutdown: Arc<AtomicBool>,
}

impl IngestService {
    /// Assemble a service from its stages.
    ///
    /// `vision` may be `None`; images are then counted but not analyzed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        extractor: Box<dyn DocumentExtractor>,
        units: UnitBuilder,
        vision: Option<VisionPipeline>,
        embeddings: EmbeddingPipeline,
        publisher: IndexPublisher,
        index: Arc<SearchIndexService>,
        metrics: Arc<ActivityMetrics>,
        max_concurrent_documents: usize,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            extractor,
            units,
            vision,
            embeddings,
            publisher,
            index,
            metrics,
            max_concurrent_documents: max_concurrent_documents.max(1),
            shutdown,
        }
    }

    /// Ingest every PDF under `source_dir` into the index.
    pub async fn run(&self, source_dir: &Path) -> Result<IngestReport, IngestError> {
        let run_id = Uuid::new_v4().to_string();
        let mut report = IngestReport::default();
        if self.stopped(&mut report, "start") {
            return Ok(report);
        }
        if !source_dir.is_dir() {
            return Err(IngestError::MissingDirectory(
                source_dir.display().to_string(),
            ));
        }

        tracing::info!(run = %run_id, dir = %source_dir.display(), "Ingest run starting");
        self.index.ensure_index().await?;

        let paths = discover_pdfs(source_dir);
        report.files_discovered = paths.len();
        if paths.is_empty() {
            tracing::info!(run = %run_id, "No PDF files found; nothing to ingest");
            return Ok(report);
        }
        if self.stopped(&mut report, "discovery") {
            return Ok(report);
        }

        let documents = self.extract_all(&paths).await;
        report.files_extracted = documents.len();
        self.metrics.record_documents(documents.len() as u64);
        if self.stopped(&mut report, "extraction") {
            return Ok(report);
        }

        let mut units: Vec<ContentUnit> = Vec::new();
        let mut images: Vec<ExtractedImage> = Vec::new();
        for document in &documents {
            report.pages += document.pages.len();
            let (text_units, duplicates) =
                self.units.units_for_pages(&document.file_name, &document.pages);
            report.text_units += text_units.len();
            report.duplicate_chunks += duplicates;
            units.extend(text_units);
            images.extend(document.images.iter().cloned());
        }
        report.images_found = images.len();

        if !images.is_empty() {
            match &self.vision {
                Some(vision) => {
                    let outcomes = vision.analyze_batch(&images).await;
                    for outcome in outcomes {
                        let Some(analysis) = outcome.analysis else {
                            continue;
                        };
                        report.images_analyzed += 1;
                        let text = analysis.embedding_text();
                        if text.is_empty() {
                            tracing::debug!(image = %analysis.image_id, "Analysis produced no text");
                            continue;
                        }
                        units.push(self.units.standalone_unit(
                            &format!("image_{}", analysis.image_id),
                            UnitKind::Image,
                            &analysis.source_file,
                            analysis.page_number,
                            text,
                        ));
                        report.image_units += 1;
                    }
                }
                None => {
                    tracing::warn!(
                        images = images.len(),
                        "No vision backend configured; images not indexed"
                    );
                }
            }
        }
        if self.stopped(&mut report, "analysis") {
            return Ok(report);
        }

        let outcomes = self.embeddings.process_batch(&units).await;
        report.embedded = outcomes.iter().filter(|o| o.succeeded()).count();
        report.embedding_failures = outcomes.len() - report.embedded;
        self.metrics.record_embedding_batch(
            report.embedded as u64,
            report.embedding_failures as u64,
        );
        if self.stopped(&mut report, "embedding") {
            return Ok(report);
        }

        report.upload = self.publisher.publish(&units, &outcomes).await;
        self.metrics
            .record_publish(report.upload.succeeded as u64, report.upload.failed as u64);

        tracing::info!(
            run = %run_id,
            files = report.files_extracted,
            units = units.len(),
            published = report.upload.succeeded,
            "Ingest run finished"
        );
        Ok(report)
    }

    /// Extract every file, a bounded number at a time.
    ///
    /// Files that fail to extract are logged and dropped; the order of the
    /// returned documents follows the input paths.
    async fn extract_all(
        &self,
        paths: &[std::path::PathBuf],
    ) -> Vec<crate::document::ExtractedDocument> {
        let gate = Semaphore::new(self.max_concurrent_documents);
        let tasks = paths.iter().map(|path| {
            let gate = &gate;
            async move {
                let _permit = gate.acquire().await.expect("extraction gate closed");
                self.extractor.extract(path).await
            }
        });
        join_all(tasks)
            .await
            .into_iter()
            .zip(paths)
            .filter_map(|(result, path)| match result {
                Ok(document) => Some(document),
                Err(error) => {
                    tracing::error!(path = %path.display(), error = %error, "Extraction failed");
                    None
                }
            })
            .collect()
    }

    fn stopped(&self, report: &mut IngestReport, stage: &str) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            tracing::warn!(stage, "Shutdown requested; stopping ingest run");
            report.interrupted = true;
            true
        } else {
            false
        }
    }
}
