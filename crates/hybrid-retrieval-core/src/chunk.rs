//! Splits document text into bounded chunks.
//!
//! Chunk boundaries prefer paragraph breaks (`\n\n`) and fall back to a
//! hard split on whitespace for any paragraph that alone exceeds the
//! target length. Every chunk produced here carries an empty `vector`;
//! the embedding gateway fills it in before the vector store upsert.

use std::collections::BTreeSet;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Rough characters-per-token ratio used to convert a token budget into a
/// character budget without pulling in a tokenizer for the chunker itself.
const CHARS_PER_TOKEN: usize = 4;

/// Splits `text` into chunks of at most `max_tokens` tokens (approximated
/// via [`CHARS_PER_TOKEN`]), attached to `document_id`.
///
/// Always returns at least one chunk, even for empty input, so that a
/// document with no meaningful text still gets a document node.
#[allow(clippy::too_many_arguments)]
pub fn chunk_text(
    document_id: &str,
    source: &str,
    source_url: Option<&str>,
    title: Option<&str>,
    text: &str,
    quality_score: f32,
    topic_tags: &BTreeSet<String>,
    max_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();

    for paragraph in text.split("\n\n") {
        if paragraph.trim().is_empty() {
            continue;
        }
        if paragraph.len() <= max_chars {
            pieces.push(paragraph.to_string());
        } else {
            pieces.extend(hard_split(paragraph, max_chars));
        }
    }

    if pieces.is_empty() {
        pieces.push(text.to_string());
    }

    let total_chunks = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, piece)| {
            make_chunk(
                document_id,
                source,
                source_url,
                title,
                chunk_index,
                total_chunks,
                piece,
                quality_score,
                topic_tags.clone(),
            )
        })
        .collect()
}

/// Splits an oversized paragraph at whitespace/newline boundaries closest
/// to, but not exceeding, `max_chars`.
fn hard_split(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = paragraph;

    while rest.len() > max_chars {
        let window = &rest[..max_chars];
        let split_at = window
            .rfind(|c: char| c == '\n' || c.is_whitespace())
            .unwrap_or(max_chars);
        let split_at = split_at.max(1);
        out.push(rest[..split_at].trim().to_string());
        rest = rest[split_at..].trim_start();
    }
    if !rest.is_empty() {
        out.push(rest.trim().to_string());
    }
    out.into_iter().filter(|s| !s.is_empty()).collect()
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    document_id: &str,
    source: &str,
    source_url: Option<&str>,
    title: Option<&str>,
    chunk_index: usize,
    total_chunks: usize,
    text: String,
    quality_score: f32,
    topic_tags: BTreeSet<String>,
) -> Chunk {
    let id = chunk_id(document_id, chunk_index);
    let now = Utc::now();
    Chunk {
        id,
        document_id: document_id.to_string(),
        source: source.to_string(),
        source_url: source_url.map(str::to_string),
        title: title.map(str::to_string),
        text,
        chunk_index,
        total_chunks,
        quality_score,
        topic_tags,
        vector: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Stable chunk id derived from `(document_id, chunk_index)` — the
/// `(source, ordinal)` identity required by the chunk's data-model
/// invariant, since `document_id` is itself derived from the source.
pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"#");
    hasher.update(chunk_index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable document id derived from `(source, url)`, so the same page
/// produces the same document id across ingestions.
pub fn document_id(source: &str, url: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(url.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content hash over the full page text, used to detect unchanged
/// re-ingestion (§4.6 step 1).
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn small_text_yields_single_chunk() {
        let chunks = chunk_text("doc1", "web", None, None, "hello world", 1.0, &tags(), 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn empty_text_still_yields_one_chunk() {
        let chunks = chunk_text("doc1", "web", None, None, "", 1.0, &tags(), 100);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn paragraphs_under_limit_stay_whole() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird paragraph";
        let chunks = chunk_text("doc1", "web", None, None, text, 1.0, &tags(), 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, "second paragraph");
    }

    #[test]
    fn oversized_paragraph_is_hard_split() {
        let long_word_para = "word ".repeat(50);
        let chunks = chunk_text("doc1", "web", None, None, &long_word_para, 1.0, &tags(), 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 5 * CHARS_PER_TOKEN + 1);
        }
    }

    #[test]
    fn chunk_indices_are_contiguous() {
        let text = "a\n\nb\n\nc\n\nd";
        let chunks = chunk_text("doc1", "web", None, None, text, 1.0, &tags(), 100);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.total_chunks, chunks.len());
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "alpha\n\nbeta\n\ngamma";
        let a = chunk_text("doc1", "web", None, None, text, 0.9, &tags(), 100);
        let b = chunk_text("doc1", "web", None, None, text, 0.9, &tags(), 100);
        let ids_a: Vec<_> = a.iter().map(|c| c.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn chunk_ids_depend_on_document_and_index() {
        assert_ne!(chunk_id("doc1", 0), chunk_id("doc2", 0));
        assert_ne!(chunk_id("doc1", 0), chunk_id("doc1", 1));
    }

    #[test]
    fn document_id_is_stable_per_source_and_url() {
        let a = document_id("web", Some("https://example.com/x"));
        let b = document_id("web", Some("https://example.com/x"));
        assert_eq!(a, b);
        assert_ne!(a, document_id("web", Some("https://example.com/y")));
    }
}
