//! Character-budgeted semantic chunking.
//!
//! Page text is split along semantic boundaries with a hard character budget
//! per chunk, then adjacent chunks receive a sliding character overlap so
//! spans near boundaries stay visible to retrieval. Token counting is a
//! separate concern: chunk budgets are character-based, while the stored
//! per-unit token count uses the `cl100k_base` encoding with a whitespace
//! fallback.

use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::cl100k_base;

pub(crate) type LengthCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Split text into chunks of at most `chunk_size` characters with a sliding
/// overlap between neighbours.
///
/// Returns an empty vector when the input is all whitespace. An overlap at or
/// above the chunk size is clamped to `chunk_size - 1` so progress is always
/// made.
pub(crate) fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunker = Chunker::new(
        chunk_size,
        Box::new(|segment: &str| segment.chars().count()),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap)
}

/// Build a token counter for stored token counts.
///
/// Prefers the `cl100k_base` encoding; falls back to whitespace counting if
/// the encoder cannot be constructed.
pub(crate) fn token_counter() -> LengthCounter {
    match cl100k_base() {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(error = %error, "Tokenizer unavailable; using whitespace counts");
            Arc::new(|segment: &str| {
                let tokens = segment.split_whitespace().count();
                if tokens == 0 && !segment.is_empty() {
                    1
                } else {
                    tokens
                }
            })
        }
    }
}

/// Prepend a character-limited tail of each previous chunk onto the next one.
fn apply_overlap(chunks: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 {
        return chunks;
    }

    let mut iter = chunks.into_iter();
    let Some(mut previous) = iter.next() else {
        return Vec::new();
    };
    let mut overlapped = Vec::with_capacity(iter.len() + 1);
    overlapped.push(previous.clone());

    for current in iter {
        overlapped.push(build_overlapped_chunk(
            &previous,
            &current,
            effective_overlap,
            chunk_size,
        ));
        previous = current;
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
) -> String {
    let tail = tail_chars(previous, overlap);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        if !ends_with_whitespace(tail) && !starts_with_whitespace(current) {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    trim_to_char_budget(&combined, chunk_size)
}

/// Last `limit` characters of `text`, leading whitespace trimmed.
fn tail_chars(text: &str, limit: usize) -> &str {
    if limit == 0 {
        return "";
    }
    let total = text.chars().count();
    if total <= limit {
        return text.trim_start();
    }
    let skip = total - limit;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len());
    text[start..].trim_start()
}

/// Drop characters from the front until the text fits the budget.
fn trim_to_char_budget(text: &str, budget: usize) -> String {
    let total = text.chars().count();
    if total <= budget {
        return text.to_string();
    }
    let skip = total - budget;
    text.char_indices()
        .nth(skip)
        .map(|(offset, _)| text[offset..].trim_start().to_string())
        .unwrap_or_default()
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_whitespace)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars().next_back().is_some_and(char::is_whitespace)
}
