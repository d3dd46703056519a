//! Overlapping text chunker.
//!
//! Splits essay text into pieces of at most `chunk_size` characters, with
//! consecutive pieces sharing up to `chunk_overlap` characters. Splitting
//! prefers the coarsest boundary that fits: paragraphs (`\n\n`), then
//! lines, then sentences, then words, and only as a last resort single
//! characters.
//!
//! Each chunk gets a deterministic id derived from its essay URL and index,
//! so re-ingesting an essay overwrites its previous passages.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub index: usize,
    pub text: String,
}

/// Chunk one essay. Blank text yields no chunks.
pub fn chunk_essay(url: &str, text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    split_text(text, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            id: chunk_id(url, index),
            index,
            text,
        })
        .collect()
}

/// SHA-256 of `url:index`, hex encoded.
pub fn chunk_id(url: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split `text` into trimmed, non-empty pieces of at most `chunk_size`
/// characters.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size - 1);
    split_recursive(text, SEPARATORS, chunk_size, chunk_overlap)
}

fn split_recursive(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
    // First separator present in the text; "" always matches.
    let (pos, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(*sep))
        .map(|(i, sep)| (i, *sep))
        .unwrap_or((separators.len(), ""));
    let finer = separators.get(pos + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut out = Vec::new();
    let mut small = Vec::new();
    for piece in pieces {
        if char_len(&piece) <= size {
            small.push(piece);
            continue;
        }
        if !small.is_empty() {
            out.extend(merge(&small, separator, size, overlap));
            small.clear();
        }
        if finer.is_empty() {
            out.push(piece);
        } else {
            out.extend(split_recursive(&piece, finer, size, overlap));
        }
    }
    if !small.is_empty() {
        out.extend(merge(&small, separator, size, overlap));
    }
    out
}

/// Greedily join pieces into chunks, carrying up to `overlap` characters
/// of trailing pieces into the next chunk.
fn merge(pieces: &[String], separator: &str, size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joined_len = |window: &VecDeque<&str>, total: usize| {
            total + len + if window.is_empty() { 0 } else { sep_len }
        };

        if joined_len(&window, total) > size && !window.is_empty() {
            push_chunk(&mut chunks, &window, separator);
            while !window.is_empty()
                && (total > overlap || joined_len(&window, total) > size)
            {
                let first = window.pop_front().map(char_len).unwrap_or(0);
                total -= first + if window.is_empty() { 0 } else { sep_len };
            }
        }

        total += len + if window.is_empty() { 0 } else { sep_len };
        window.push_back(piece);
    }
    push_chunk(&mut chunks, &window, separator);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let text = window.iter().copied().collect::<Vec<_>>().join(separator);
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(text.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
