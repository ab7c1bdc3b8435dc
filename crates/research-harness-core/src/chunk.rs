//! Paragraph-boundary chunker for collection ingestion.
//!
//! Fetched pages are stored in their collection as [`Chunk`]s of at most
//! `max_tokens` tokens (4 chars ≈ 1 token), so later retrieval works on
//! passages rather than whole pages.
//!
//! # Algorithm
//!
//! 1. Split text on `\n\n` and drop blank paragraphs.
//! 2. Pack paragraphs into a buffer until the next one would overflow.
//! 3. Hard-split a paragraph that alone exceeds the limit, preferring the
//!    last newline or space before the limit.
//! 4. Always return at least one chunk.
//!
//! ```rust
//! use research_harness_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("https://a.test", "Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::tokens::{snap_to_char_boundary, CHARS_PER_TOKEN};

/// A passage of an ingested source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// URL (or other identifier) of the source document.
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Split `text` from `source` into chunks with contiguous indices from 0.
pub fn chunk_text(source: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            hard_split(para, max_chars, &mut pieces);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(para);
        }
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(source, i as i64, piece))
        .collect()
}

fn hard_split(para: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = para;
    while !remaining.is_empty() {
        let first_char = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        let limit = snap_to_char_boundary(remaining, max_chars).max(first_char);
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

fn make_chunk(source: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("u", "Hello, world!", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].source, "u");
    }

    #[test]
    fn test_empty_text_still_one_chunk() {
        let chunks = chunk_text("u", "", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_paragraphs_packed_then_flushed() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("u", &text, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.text.len() <= 40);
        }
    }

    #[test]
    fn test_long_paragraph_hard_split_on_spaces() {
        let text = "lorem ipsum ".repeat(100);
        let chunks = chunk_text("u", &text, 5);
        for c in &chunks {
            assert!(c.text.len() <= 20);
            assert!(!c.text.starts_with(' '));
        }
    }

    #[test]
    fn test_multibyte_utf8() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text("u", text, 3);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_hash_is_content_hash() {
        let a = chunk_text("u", "Alpha\n\nBeta", 700);
        let b = chunk_text("v", "Alpha\n\nBeta", 700);
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[0].id, b[0].id);
    }
}
