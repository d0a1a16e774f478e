//! Recursive-boundary text chunker with overlap.
//!
//! Splits a [`SourceDocument`]'s text into [`Chunk`]s of at most
//! `max_chars` characters. Each cut is placed on the largest semantic
//! boundary that fits in the current window, tried in this order:
//!
//! 1. paragraph break (`\n\n`)
//! 2. line break (`\n`)
//! 3. sentence end (`. `, `! `, `? `)
//! 4. word break (` `)
//! 5. hard cut at `max_chars`
//!
//! Every chunk after the first begins with the trailing `overlap_chars`
//! characters of its predecessor. Chunks are exact slices of the text, so
//! dropping the first `overlap_chars` characters of every chunk but the
//! first and concatenating reproduces the document.
//!
//! Chunk IDs are UUIDv5 values over the source name, sequence index and
//! content hash, so rebuilding from the same input yields identical chunks.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, SourceDocument};

/// Boundary tiers, largest first. Within a tier the latest match wins.
const SEPARATOR_TIERS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Split a document into overlapping chunks.
pub fn chunk_document(doc: &SourceDocument, config: &ChunkingConfig) -> Vec<Chunk> {
    chunk_text(
        &doc.source_name,
        &doc.raw_text,
        config.max_chars,
        config.overlap_chars,
    )
}

/// Split text into chunks of at most `max_chars` characters, each overlapping
/// the previous one by exactly `overlap_chars` characters.
///
/// Returns no chunks for empty text. Sizes are counted in `char`s, never in
/// bytes, so multi-byte text is never cut inside a code point.
///
/// # Panics
///
/// Panics if `overlap_chars >= max_chars`; config validation rejects this.
pub fn chunk_text(source_name: &str, text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    assert!(
        overlap_chars < max_chars,
        "overlap_chars must be smaller than max_chars"
    );

    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char position, plus the end of the text.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        if total - start <= max_chars {
            let piece = &text[offsets[start]..];
            chunks.push(make_chunk(source_name, chunks.len() as i64, piece));
            break;
        }

        let window_end = start + max_chars;
        let cut = find_cut(text, &offsets, start, window_end, overlap_chars).unwrap_or(window_end);
        let piece = &text[offsets[start]..offsets[cut]];
        chunks.push(make_chunk(source_name, chunks.len() as i64, piece));
        start = cut - overlap_chars;
    }

    chunks
}

/// Find the char position right after the best separator in
/// `[start, window_end)`. The cut must leave more than `overlap_chars`
/// characters in the chunk so the next window always advances.
fn find_cut(
    text: &str,
    offsets: &[usize],
    start: usize,
    window_end: usize,
    overlap_chars: usize,
) -> Option<usize> {
    let window_start_byte = offsets[start];
    let window = &text[window_start_byte..offsets[window_end]];

    for tier in SEPARATOR_TIERS {
        let best_byte = tier
            .iter()
            .filter_map(|sep| window.rfind(sep).map(|pos| pos + sep.len()))
            .max();
        if let Some(end_byte) = best_byte {
            let cut = char_position(offsets, window_start_byte + end_byte);
            if cut > start + overlap_chars {
                return Some(cut);
            }
        }
    }
    None
}

/// Convert a byte offset that lies on a char boundary back to a char position.
fn char_position(offsets: &[usize], byte: usize) -> usize {
    match offsets.binary_search(&byte) {
        Ok(pos) => pos,
        Err(pos) => pos,
    }
}

fn make_chunk(source_name: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id_seed = format!("{}\u{1f}{}\u{1f}{}", source_name, index, hash);
    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, id_seed.as_bytes()).to_string(),
        source_name: source_name.to_string(),
        sequence_index: index,
        text: text.to_string(),
        hash,
    }
}
