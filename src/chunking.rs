//! Chunking utilities for splitting long documents into overlapping segments.
//!
//! Documents longer than the configured chunk size are cut into windows of
//! `chunk_size` characters. Before each cut the chunker looks up to
//! `sentence_margin` characters around the nominal cut point for the last
//! sentence terminator (`.`, `!`, `?`) and, when it lies past the middle of
//! the window, moves the cut just after it. Consecutive windows share
//! exactly `overlap` characters; emitted chunks are trimmed, so the visible
//! overlap can be slightly smaller.
//!
//! A snapped cut lies past the window midpoint, so each window starts at
//! least `min(chunk_size, chunk_size / 2 + 2) - overlap` characters (and
//! never less than one) after the previous one.
//!
//! All positions are character positions, so multi-byte text never gets
//! split inside a code point.

use crate::{
    config::{ChunkingConfig, DEFAULT_SENTENCE_MARGIN},
    error::Result,
};

const SENTENCE_TERMINALS: &[char] = &['.', '!', '?'];

/// Split text into overlapping, sentence-aligned chunks.
///
/// Uses the default sentence margin. Text that fits in one chunk is returned
/// unchanged; blank text yields no chunks.
///
/// # Examples
///
/// ```
/// use docrag::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 1000, 200).unwrap();
/// assert_eq!(chunks, vec!["Hello, world!".to_string()]);
///
/// let text = "word ".repeat(500);
/// let chunks = chunk_text(&text, 1000, 200).unwrap();
/// assert!(chunks.len() >= 2);
///
/// assert!(chunk_text("anything", 10, 10).is_err());
/// ```
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>> {
    let config = ChunkingConfig {
        chunk_size,
        overlap,
        sentence_margin: DEFAULT_SENTENCE_MARGIN,
    };
    chunk_with(text, &config)
}

/// Split text according to a full [`ChunkingConfig`].
pub fn chunk_with(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    config.validate()?;
    let ChunkingConfig {
        chunk_size,
        overlap,
        sentence_margin,
    } = *config;

    let char_count = text.chars().count();

    // Short text doesn't need chunking
    if char_count <= chunk_size {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![text.to_string()]);
    }

    // Build a map of char index -> byte index for O(1) lookups
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < char_count {
        let nominal_end = start + chunk_size;
        let mut end = nominal_end.min(char_count);

        if nominal_end < char_count {
            let search_start =
                start + chunk_size.saturating_sub(sentence_margin);
            let search_end = (nominal_end + sentence_margin).min(char_count);
            if let Some(terminal) = find_sentence_end(
                text,
                &char_to_byte,
                search_start,
                search_end,
            ) && terminal > start + chunk_size / 2
            {
                end = terminal + 1;
            }
            // A snapped cut must still move the next window forward.
            if end <= start + overlap {
                end = nominal_end;
            }
        }

        let piece = text[char_to_byte[start]..char_to_byte[end]].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= char_count {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Char index of the last sentence terminator in `[from, to)`.
fn find_sentence_end(
    text: &str,
    char_to_byte: &[usize],
    from: usize,
    to: usize,
) -> Option<usize> {
    if from >= to {
        return None;
    }
    let region = &text[char_to_byte[from]..char_to_byte[to]];
    region
        .rfind(SENTENCE_TERMINALS)
        .map(|byte_offset| from + region[..byte_offset].chars().count())
}
