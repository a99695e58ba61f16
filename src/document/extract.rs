//! Source-document extraction boundary.
//!
//! The pipeline consumes [`ExtractedDocument`]s and never touches file
//! formats directly; everything format-specific hides behind the
//! [`DocumentExtractor`] trait. The stock implementation reads PDF bytes and
//! yields per-page text. Extractors that also surface embedded images hand
//! them back through the same document value, which is how image analysis
//! receives its input.

use crate::document::types::{ExtractError, ExtractedDocument, PageText};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Turns one source file into pages of text plus any embedded images.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract the document at `path`.
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError>;
}

/// PDF extractor producing per-page text and no images.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

#[async_trait]
impl DocumentExtractor for PdfTextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        let display_path = path.display().to_string();
        let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
            path: display_path.clone(),
            source,
        })?;

        // Parsing is CPU-bound and runs to completion without yielding.
        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|err| {
            ExtractError::Malformed {
                path: display_path,
                message: err.to_string(),
            }
        })?;

        let file_name = file_name_of(path);
        let pages: Vec<PageText> = pages
            .into_iter()
            .enumerate()
            .map(|(index, text)| PageText {
                number: index as u32 + 1,
                text,
            })
            .collect();
        tracing::debug!(
            file = %file_name,
            pages = pages.len(),
            bytes = bytes.len(),
            "Extracted document"
        );

        Ok(ExtractedDocument {
            file_name,
            pages,
            images: Vec::new(),
        })
    }
}

/// Find PDF files under `dir`, recursively, in a stable order.
///
/// Unreadable directory entries are skipped with a log line rather than
/// failing the walk.
pub fn discover_pdfs(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();
    paths
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
