//! Splitting source documents into overlapping chunks.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], which
//! splits hierarchically by paragraphs, lines, sentences, then words, and
//! only falls back to a hard character cut when a single word does not fit
//! in the window.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::config::RagConfig;
use crate::document::{Chunk, SourceDocument};

/// Boundaries tried in order; the empty separator is the hard cut.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " ", ""];

/// A strategy for splitting documents into chunks.
///
/// Implementors only provide [`split_text`](Chunker::split_text). The provided
/// [`chunk`](Chunker::chunk) method stamps every piece with its document's id
/// and full text.
pub trait Chunker: Send + Sync {
    /// Split one text into window-sized pieces.
    ///
    /// Returns an empty `Vec` for empty text.
    fn split_text(&self, text: &str) -> Vec<String>;

    /// Split a batch of documents into chunks.
    ///
    /// Builds the `source_id → full_text` lookup first, splits every
    /// document, then constructs each [`Chunk`] with its full text already
    /// set. Ids must be unique: a document repeating an earlier id is
    /// skipped with a warning. No I/O and no mutation of the input.
    fn chunk(&self, documents: &[SourceDocument]) -> Vec<Chunk> {
        let mut full_texts: HashMap<&str, &str> = HashMap::with_capacity(documents.len());
        let mut unique = Vec::with_capacity(documents.len());
        for document in documents {
            match full_texts.entry(document.id()) {
                Entry::Vacant(slot) => {
                    slot.insert(document.text());
                    unique.push(document);
                }
                Entry::Occupied(_) => {
                    warn!(source_id = document.id(), "skipping document with a duplicate id");
                }
            }
        }

        let pieces: Vec<(&str, String)> = unique
            .into_iter()
            .flat_map(|document| {
                self.split_text(document.text()).into_iter().map(move |text| (document.id(), text))
            })
            .collect();

        pieces
            .into_iter()
            .filter_map(|(source_id, text)| {
                let full_text = full_texts.get(source_id)?;
                Some(Chunk::new(text, source_id.to_string(), (*full_text).to_string()))
            })
            .collect()
    }
}

/// Splits text hierarchically: paragraphs → lines → sentences → words → characters.
///
/// Sizes are counted in `char`s. Consecutive pieces are merged greedily up to
/// `chunk_size`; each new window starts with up to `chunk_overlap` characters
/// carried over from the end of the previous one.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{Chunker, RecursiveChunker, SourceDocument};
///
/// let chunker = RecursiveChunker::new(500, 50);
/// let chunks = chunker.chunk(&[SourceDocument::new("faq.txt", text)]);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk (at least 1)
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }

    /// Create a chunker from the sizes in a validated [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|separator| separator.is_empty() || text.contains(separator))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces = if separator.is_empty() {
            split_chars(text)
        } else {
            split_keeping_separator(text, separator)
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if remaining.is_empty() {
                chunks.extend(self.merge(&split_chars(piece)));
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }

        chunks
    }

    /// Merge pieces that each fit the window into overlapping windows.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_window(&mut chunks, &window);
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    let Some((_, dropped)) = window.pop_front() else {
                        break;
                    };
                    total -= dropped;
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_window(&mut chunks, &window);
        }

        chunks
    }
}

impl Chunker for RecursiveChunker {
    fn split_text(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }
        self.split_recursive(text, SEPARATORS)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_window(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
}
