//! Wire and report types for the search index.

use crate::document::ContentUnit;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One document as stored in the search index.
///
/// Shape mirrors the index schema; the group stamps ride along so query-time
/// trimming has something to match against.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocument {
    /// Index key; equal to the originating unit id.
    pub id: String,
    /// Human-readable title derived from the source file name.
    pub title: String,
    /// Unit text body.
    pub content: String,
    /// Short preview line.
    pub headline: String,
    /// Embedding vector for the content.
    pub embedding: Vec<f32>,
    /// Source file name.
    pub file_name: String,
    /// One-based source page.
    pub page_number: u32,
    /// Chunk position within the page.
    pub chunk_index: u32,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// Token count of the content.
    pub token_count: usize,
    /// `text` or `image`.
    pub content_kind: String,
    /// Group ids allowed to see the document.
    pub access_groups: Vec<String>,
    /// Configured fallback group, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_group: Option<String>,
}

impl IndexDocument {
    /// Build an index document from a unit and its embedding vector.
    pub fn from_unit(unit: &ContentUnit, embedding: Vec<f32>) -> Self {
        Self {
            id: unit.id.clone(),
            title: unit.title.clone(),
            content: unit.text.clone(),
            headline: unit.headline.clone(),
            embedding,
            file_name: unit.source_file.clone(),
            page_number: unit.page_number,
            chunk_index: unit.chunk_index,
            created_at: unit.created_at.clone(),
            token_count: unit.token_count,
            content_kind: unit.kind.as_str().to_string(),
            access_groups: unit.groups.iter().cloned().collect(),
            default_group: unit.default_group.clone(),
        }
    }
}

/// Per-document verdict from a batch upload.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStatus {
    /// Key of the document the verdict applies to.
    pub key: String,
    /// Whether the index accepted the document.
    pub status: bool,
    /// Per-document HTTP-style status code.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Rejection detail, when present.
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

/// Summary of one publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Documents the index accepted.
    pub succeeded: usize,
    /// Documents the index rejected or that failed with their batch.
    pub failed: usize,
    /// Units left out because they carried no usable embedding.
    pub skipped_no_embedding: usize,
    /// Human-readable failure details.
    pub errors: Vec<String>,
}

/// One query against the index.
#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    /// Text to match lexically; omitted for pure vector queries.
    pub search_text: Option<String>,
    /// Vector to match against stored embeddings.
    pub vector: Option<Vec<f32>>,
    /// OData predicate restricting the candidate set.
    pub filter: Option<String>,
    /// Maximum results to return.
    pub top: usize,
    /// Whether to request the total match count.
    pub include_total: bool,
    /// Fields to facet on.
    pub facets: Vec<String>,
}

/// One result row from the index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexHit {
    /// Relevance score as reported by the index, unmodified.
    #[serde(rename = "@search.score", default)]
    pub score: f32,
    /// Document key.
    pub id: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Document body.
    #[serde(default)]
    pub content: String,
    /// Preview line.
    #[serde(default)]
    pub headline: String,
    /// Source file name.
    #[serde(default)]
    pub file_name: String,
    /// One-based source page.
    #[serde(default)]
    pub page_number: u32,
    /// Chunk position within the page.
    #[serde(default)]
    pub chunk_index: u32,
    /// RFC3339 creation timestamp.
    #[serde(default)]
    pub created_at: String,
    /// Token count of the content.
    #[serde(default)]
    pub token_count: usize,
    /// `text` or `image`.
    #[serde(default)]
    pub content_kind: String,
}

/// One facet bucket returned alongside results.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FacetBucket {
    /// Facet value; a string for string fields.
    pub value: Value,
    /// Number of matching documents carrying the value.
    pub count: u64,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct IndexPage {
    /// Result rows in score order.
    pub results: Vec<IndexHit>,
    /// Total match count, when the query asked for it.
    pub total_count: Option<u64>,
    /// Facet buckets keyed by field name.
    pub facets: BTreeMap<String, Vec<FacetBucket>>,
}
