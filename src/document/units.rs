//! Content-unit construction: cleaning, naming, ids, and access stamping.

use crate::config::get_config;
use crate::document::chunking::{LengthCounter, chunk_text, token_counter};
use crate::document::types::{ContentUnit, PageText, UnitKind};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors raised while building content units.
#[derive(Debug, Error)]
pub enum UnitError {
    /// No access group is available to stamp onto units.
    #[error("No access groups configured; refusing to build unprotected units")]
    NoAccessGroups,
}

/// Builds [`ContentUnit`]s from extracted document content.
///
/// The builder owns the chunking budget and the access-control stamp. It
/// refuses to exist without at least one group to stamp, so a unit with an
/// empty group set cannot be constructed through this path.
pub struct UnitBuilder {
    chunk_size: usize,
    overlap: usize,
    groups: BTreeSet<String>,
    default_group: Option<String>,
    token_counter: LengthCounter,
}

impl std::fmt::Debug for UnitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `token_counter` is a closure and has no Debug form.
        f.debug_struct("UnitBuilder")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .field("groups", &self.groups)
            .field("default_group", &self.default_group)
            .finish_non_exhaustive()
    }
}

impl UnitBuilder {
    /// Create a builder with explicit settings.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        groups: BTreeSet<String>,
        default_group: Option<String>,
    ) -> Result<Self, UnitError> {
        if groups.is_empty() && default_group.is_none() {
            return Err(UnitError::NoAccessGroups);
        }
        Ok(Self {
            chunk_size,
            overlap,
            groups,
            default_group,
            token_counter: token_counter(),
        })
    }

    /// Create a builder from the process configuration.
    pub fn from_config() -> Result<Self, UnitError> {
        let config = get_config();
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.document_groups.iter().cloned().collect(),
            config.default_group.clone(),
        )
    }

    /// Chunk one document's pages into text units.
    ///
    /// Returns the units plus the number of chunks skipped because their
    /// content duplicated an earlier chunk of the same document.
    pub fn units_for_pages(
        &self,
        file_name: &str,
        pages: &[PageText],
    ) -> (Vec<ContentUnit>, usize) {
        let stem = file_stem(file_name);
        let key_base = sanitize_key(&stem);
        let title = title_from_stem(&stem, file_name);
        let created_at = current_timestamp_rfc3339();

        let mut units = Vec::new();
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut duplicates = 0usize;

        for page in pages {
            let cleaned = clean_text(&page.text);
            if cleaned.is_empty() {
                continue;
            }
            let mut chunk_index = 0u32;
            for chunk in chunk_text(&cleaned, self.chunk_size, self.overlap) {
                let content_hash = compute_content_hash(&chunk);
                if !seen_hashes.insert(content_hash.clone()) {
                    duplicates += 1;
                    continue;
                }
                units.push(ContentUnit {
                    id: format!("{key_base}_{}_{chunk_index}", page.number),
                    kind: UnitKind::Text,
                    headline: derive_headline(&chunk),
                    token_count: self.token_counter.as_ref()(&chunk),
                    content_hash,
                    text: chunk,
                    title: title.clone(),
                    source_file: file_name.to_string(),
                    page_number: page.number,
                    chunk_index,
                    created_at: created_at.clone(),
                    groups: self.effective_groups(),
                    default_group: self.default_group.clone(),
                });
                chunk_index += 1;
            }
        }

        if duplicates > 0 {
            tracing::debug!(file = file_name, duplicates, "Skipped duplicate chunks");
        }
        (units, duplicates)
    }

    /// Build a unit for content that is not a page chunk, such as an analyzed
    /// image. The id is derived from `id_seed` and the text is stored as-is.
    pub fn standalone_unit(
        &self,
        id_seed: &str,
        kind: UnitKind,
        source_file: &str,
        page_number: u32,
        text: String,
    ) -> ContentUnit {
        let stem = file_stem(source_file);
        ContentUnit {
            id: sanitize_key(id_seed),
            kind,
            headline: derive_headline(&text),
            token_count: self.token_counter.as_ref()(&text),
            content_hash: compute_content_hash(&text),
            text,
            title: title_from_stem(&stem, source_file),
            source_file: source_file.to_string(),
            page_number,
            chunk_index: 0,
            created_at: current_timestamp_rfc3339(),
            groups: self.effective_groups(),
            default_group: self.default_group.clone(),
        }
    }

    fn effective_groups(&self) -> BTreeSet<String> {
        if self.groups.is_empty() {
            self.default_group.iter().cloned().collect()
        } else {
            self.groups.clone()
        }
    }
}

/// Restrict a string to the index-key alphabet, replacing everything else
/// with underscores.
pub(crate) fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Collapse whitespace runs and strip non-whitespace control characters.
pub(crate) fn clean_text(raw: &str) -> String {
    let visible: String = raw
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    visible.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First sentence of the text, or its first hundred characters with an
/// ellipsis when the opening sentence runs long.
pub(crate) fn derive_headline(text: &str) -> String {
    const HEADLINE_CHAR_LIMIT: usize = 100;

    let first_sentence = text.split('.').next().unwrap_or("").trim();
    if !first_sentence.is_empty() && first_sentence.chars().count() <= HEADLINE_CHAR_LIMIT {
        return first_sentence.to_string();
    }

    let truncated: String = text.chars().take(HEADLINE_CHAR_LIMIT).collect();
    format!("{}...", truncated.trim_end())
}

/// Compute a deterministic SHA-256 hash for unit text.
pub(crate) fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current timestamp formatted for index storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

fn title_from_stem(stem: &str, file_name: &str) -> String {
    let title = stem
        .split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        file_name.to_string()
    } else {
        title
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
