//! Deterministic chunking and id derivation.
//!
//! Everything here is a pure function of its inputs, so a retry, a
//! reconciliation pass, or a delete regenerates byte-identical chunks and
//! vector ids from the stored document alone.
//!
//! # Ids
//!
//! - Document id: hex SHA-256 over the repository name and the
//!   [normalised](normalize_content) content.
//! - Vector id: UUIDv5 over `"{document_id}:{sequence}"`.
//!
//! # Policies
//!
//! Chunking always operates on the normalised content; caller-supplied
//! boundary offsets are byte offsets into that normalised text.
//!
//! | Policy | Behaviour |
//! |--------|-----------|
//! | [`ChunkPolicy::Paragraph`] | pack `\n\n` paragraphs up to `max_tokens × 4` chars |
//! | [`ChunkPolicy::Fixed`] | fixed char windows with overlap |
//! | [`ChunkPolicy::Boundaries`] | cut at the given offsets |
//!
//! # Example
//!
//! ```rust
//! use docindex_core::chunk::{chunk_document, document_id};
//! use docindex_core::ChunkPolicy;
//!
//! let id = document_id("docs", "the quick brown fox");
//! let chunks = chunk_document(&id, "the quick brown fox", &ChunkPolicy::default()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].sequence, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::IndexError;
use crate::models::{Chunk, ChunkPolicy};

/// Approximate characters-per-token ratio for [`ChunkPolicy::Paragraph`].
const CHARS_PER_TOKEN: usize = 4;

/// Namespace for vector id derivation. Changing it re-keys every index.
const VECTOR_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_93d4_4b0a_8e51_d2c7_0b3f_9a14);

/// Normalise content before hashing and chunking.
///
/// CRLF and lone CR become LF, trailing whitespace is stripped from every
/// line, and leading/trailing blank space is trimmed.
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}

/// Content-hash id of a document within a repository.
pub fn document_id(repository: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_content(content).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable vector id for chunk `sequence` of `document_id`.
pub fn vector_id(document_id: &str, sequence: u32) -> String {
    Uuid::new_v5(
        &VECTOR_ID_NAMESPACE,
        format!("{document_id}:{sequence}").as_bytes(),
    )
    .to_string()
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split a document into chunks according to `policy`.
///
/// # Guarantees
///
/// - Sequences are contiguous: `0, 1, …, N-1`.
/// - Non-empty content yields at least one chunk; blank spans are dropped.
/// - The output depends only on `(document_id, content, policy)`.
///
/// # Errors
///
/// [`IndexError::InvalidInput`] for a zero-sized policy, an overlap not
/// smaller than the window, or boundary offsets that are not strictly
/// increasing, out of range, or not on a char boundary.
pub fn chunk_document(
    document_id: &str,
    content: &str,
    policy: &ChunkPolicy,
) -> Result<Vec<Chunk>, IndexError> {
    let text = normalize_content(content);
    let pieces = match policy {
        ChunkPolicy::Paragraph { max_tokens } => {
            if *max_tokens == 0 {
                return Err(IndexError::InvalidInput("max_tokens must be > 0".into()));
            }
            split_paragraphs(&text, max_tokens * CHARS_PER_TOKEN)
        }
        ChunkPolicy::Fixed { size, overlap } => {
            if *size == 0 || overlap >= size {
                return Err(IndexError::InvalidInput(format!(
                    "fixed chunking needs size > overlap (size={size}, overlap={overlap})"
                )));
            }
            split_fixed(&text, *size, *overlap)
        }
        ChunkPolicy::Boundaries { offsets } => split_at_offsets(&text, offsets)?,
    };

    Ok(pieces
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .enumerate()
        .map(|(i, piece)| make_chunk(document_id, i as u32, piece.trim()))
        .collect())
}

/// Vector ids for every chunk the policy produces, in sequence order.
pub fn vector_ids(
    document_id: &str,
    content: &str,
    policy: &ChunkPolicy,
) -> Result<Vec<String>, IndexError> {
    Ok(chunk_document(document_id, content, policy)?
        .into_iter()
        .map(|c| c.vector_id)
        .collect())
}

fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }
    pieces
}

/// Split an oversized paragraph, preferring the last newline or space
/// before `max_chars`.
fn hard_split(paragraph: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        let split_at = if split_at == 0 {
            next_char_boundary(remaining)
        } else {
            split_at
        };
        pieces.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }
}

fn split_fixed(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size - overlap;
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

fn split_at_offsets(text: &str, offsets: &[usize]) -> Result<Vec<String>, IndexError> {
    let mut pieces = Vec::with_capacity(offsets.len() + 1);
    let mut start = 0;
    for &offset in offsets {
        if offset <= start || offset >= text.len() {
            return Err(IndexError::InvalidInput(format!(
                "boundary offset {offset} must be strictly increasing and inside 1..{}",
                text.len()
            )));
        }
        if !text.is_char_boundary(offset) {
            return Err(IndexError::InvalidInput(format!(
                "boundary offset {offset} is not on a char boundary"
            )));
        }
        pieces.push(text[start..offset].to_string());
        start = offset;
    }
    pieces.push(text[start..].to_string());
    Ok(pieces)
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

fn make_chunk(document_id: &str, sequence: u32, text: &str) -> Chunk {
    Chunk {
        document_id: document_id.to_string(),
        sequence,
        hash: hash_text(text),
        vector_id: vector_id(document_id, sequence),
        text: text.to_string(),
    }
}
