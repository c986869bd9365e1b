//! Recursive text splitting into bounded, overlapping segments.
//!
//! Text is cut on the coarsest separator that occurs in it (paragraph,
//! line, sentence, word, and finally single characters). Each piece keeps
//! its trailing separator, so the pieces tile the input exactly. Pieces
//! that are still longer than the chunk size are split again with the next
//! finer separator. Pieces are then packed greedily into windows of at most
//! `chunk_size` characters, and each new window starts with as many
//! trailing pieces of the previous one as fit in `chunk_overlap`.
//!
//! All lengths are counted in characters, never bytes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separator hierarchy, coarsest first. The empty separator means
/// "split between characters".
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Chunk size and overlap, both in characters.
///
/// # Examples
///
/// ```
/// use hydrag::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::new(500, 50).unwrap();
/// assert_eq!(config.chunk_size, 500);
///
/// // Overlap must be strictly smaller than the chunk size.
/// assert!(ChunkingConfig::new(100, 100).is_err());
/// assert!(ChunkingConfig::new(0, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Maximum overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A bounded, provenance-tagged piece of a document.
///
/// Chunks are created once by the loader and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Document identifier with any directory components stripped.
    pub source: String,
    /// 1-based page number within the source document.
    pub page: u32,
    /// 0-based position of the chunk within its document.
    pub sequence_index: u32,
}

/// A window of a single text produced by [`split_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Byte offset where this segment starts in the original text.
    pub start_offset: usize,
}

impl Segment {
    /// Byte offset one past the end of this segment in the original text.
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.text.len()
    }
}

/// Split text into overlapping segments of at most `chunk_size` characters.
///
/// Empty or whitespace-only text yields no segments.
///
/// # Examples
///
/// ```
/// use hydrag::chunking::{split_text, ChunkingConfig};
///
/// let config = ChunkingConfig::new(1000, 100).unwrap();
/// let segments = split_text("Hello, world!", &config);
/// assert_eq!(segments.len(), 1);
/// assert_eq!(segments[0].text, "Hello, world!");
///
/// let text = "word ".repeat(500);
/// let segments = split_text(&text, &config);
/// assert!(segments.len() >= 3);
/// assert!(segments.iter().all(|s| s.text.chars().count() <= 1000));
/// ```
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<Segment> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    atomize(text, 0, SEPARATORS, config.chunk_size, &mut pieces);
    merge(text, &pieces, config)
}

/// A contiguous byte range of the input with its length in characters.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

fn atomize(
    text: &str,
    base: usize,
    separators: &[&str],
    limit: usize,
    out: &mut Vec<Piece>,
) {
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep));

    let Some(position) = position else {
        hard_split(text, base, limit, out);
        return;
    };

    let separator = separators[position];
    if separator.is_empty() {
        hard_split(text, base, limit, out);
        return;
    }

    let finer = &separators[position + 1..];
    let mut offset = base;
    for part in text.split_inclusive(separator) {
        let chars = part.chars().count();
        if chars <= limit {
            out.push(Piece {
                start: offset,
                end: offset + part.len(),
                chars,
            });
        } else {
            atomize(part, offset, finer, limit, out);
        }
        offset += part.len();
    }
}

/// Cut text into windows of exactly `limit` characters (the last one may
/// be shorter).
fn hard_split(text: &str, base: usize, limit: usize, out: &mut Vec<Piece>) {
    let mut start = 0;
    let mut chars = 0;
    for (idx, _) in text.char_indices() {
        if chars == limit {
            out.push(Piece {
                start: base + start,
                end: base + idx,
                chars,
            });
            start = idx;
            chars = 0;
        }
        chars += 1;
    }
    if chars > 0 {
        out.push(Piece {
            start: base + start,
            end: base + text.len(),
            chars,
        });
    }
}

fn merge(text: &str, pieces: &[Piece], config: &ChunkingConfig) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut window: VecDeque<Piece> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        if total + piece.chars > config.chunk_size && !window.is_empty() {
            segments.push(emit(text, &window));

            while let Some(front) = window.front() {
                let over_overlap = total > config.chunk_overlap;
                let no_room = total + piece.chars > config.chunk_size;
                if !(over_overlap || no_room) {
                    break;
                }
                total -= front.chars;
                window.pop_front();
            }
        }

        window.push_back(piece);
        total += piece.chars;
    }

    if !window.is_empty() {
        segments.push(emit(text, &window));
    }

    segments
}

fn emit(text: &str, window: &VecDeque<Piece>) -> Segment {
    let start = window.front().map_or(0, |p| p.start);
    let end = window.back().map_or(start, |p| p.end);
    Segment {
        text: text[start..end].to_string(),
        start_offset: start,
    }
}
