//! Shared types for document extraction and unit building.

use std::collections::BTreeSet;
use thiserror::Error;

/// Kinds of searchable content units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Unit built from a chunk of page text.
    Text,
    /// Unit built from an analyzed image.
    Image,
}

impl UnitKind {
    /// Stable string form stored in the index.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// One embeddable, indexable piece of content derived from a source document.
///
/// Units are immutable once built; the embedding and publishing stages only
/// read them and correlate results back through `id`.
#[derive(Debug, Clone)]
pub struct ContentUnit {
    /// Index-key-safe unique identifier.
    pub id: String,
    /// Whether the unit came from page text or an analyzed image.
    pub kind: UnitKind,
    /// Text submitted for embedding and stored as the unit body.
    pub text: String,
    /// Human-readable title derived from the source file name.
    pub title: String,
    /// Short preview line stored with the unit.
    pub headline: String,
    /// Source file name, directory components stripped.
    pub source_file: String,
    /// One-based page the unit came from.
    pub page_number: u32,
    /// Position of the chunk within its page.
    pub chunk_index: u32,
    /// Token count of `text` under the `cl100k_base` encoding.
    pub token_count: usize,
    /// SHA-256 hash of `text`, used for duplicate detection and drift checks.
    pub content_hash: String,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// Group ids allowed to see the unit; never empty.
    pub groups: BTreeSet<String>,
    /// Configured fallback group, stored alongside the explicit groups.
    pub default_group: Option<String>,
}

/// Page text extracted from a source document.
#[derive(Debug, Clone)]
pub struct PageText {
    /// One-based page number.
    pub number: u32,
    /// Raw extracted text.
    pub text: String,
}

/// Raw image pulled out of a source document.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    /// Identifier unique within the ingest run.
    pub id: String,
    /// Source file name.
    pub source_file: String,
    /// One-based page the image appeared on.
    pub page_number: u32,
    /// Image format label (`png`, `jpeg`, ...), used for the data URL.
    pub format: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

/// A document reduced to pages of text and standalone images.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    /// Source file name, directory components stripped.
    pub file_name: String,
    /// Page texts in document order.
    pub pages: Vec<PageText>,
    /// Images found in the document.
    pub images: Vec<ExtractedImage>,
}

/// Errors raised while reading source documents.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file could not be read from disk.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the unreadable file.
        path: String,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// The document payload could not be parsed.
    #[error("Failed to extract {path}: {message}")]
    Malformed {
        /// Path of the malformed file.
        path: String,
        /// Parser-provided description.
        message: String,
    },
}
