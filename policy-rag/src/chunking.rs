//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`FixedSizeChunker`], which
//! splits text into overlapping character windows. Chunking is lossless:
//! dropping the overlap prefix of every span after the first and concatenating
//! the rest reproduces the original text exactly (see [`rejoin`]).

use crate::document::TextSpan;

/// A strategy for splitting document text into spans.
pub trait Chunker: Send + Sync {
    /// Split text into ordered spans.
    ///
    /// Returns an empty `Vec` for empty text.
    fn chunk(&self, text: &str) -> Vec<TextSpan>;

    /// Number of characters shared by consecutive spans.
    fn overlap(&self) -> usize;
}

/// Splits text into fixed-size windows by character count with overlap.
///
/// Sizes count Unicode scalar values, so multi-byte text never splits inside
/// a character. Consecutive spans share exactly `chunk_overlap` characters and
/// no span is longer than `chunk_size`. Text no longer than one chunk yields a
/// single span.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(800, 200);
/// let spans = chunker.chunk(&document.text);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// `chunk_overlap` is clamped below `chunk_size` so the window always
    /// advances; [`RagConfig`](crate::RagConfig) rejects such settings earlier.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self { chunk_size, chunk_overlap: chunk_overlap.min(chunk_size - 1) }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<TextSpan> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every character boundary, plus the end of the text.
        let boundaries: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let char_len = boundaries.len() - 1;
        let step = self.chunk_size - self.chunk_overlap;

        let mut spans = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(char_len);
            spans.push(TextSpan {
                index: spans.len(),
                char_start: start,
                text: text[boundaries[start]..boundaries[end]].to_string(),
            });
            if end == char_len {
                break;
            }
            start += step;
        }

        spans
    }

    fn overlap(&self) -> usize {
        self.chunk_overlap
    }
}

/// Reassemble chunker output by dropping each later span's overlap prefix.
pub fn rejoin(spans: &[TextSpan], overlap: usize) -> String {
    let mut out = String::new();
    for (i, span) in spans.iter().enumerate() {
        if i == 0 {
            out.push_str(&span.text);
        } else {
            out.extend(span.text.chars().skip(overlap));
        }
    }
    out
}

/// Join consecutive spans of one document using their character offsets.
///
/// Each span is `(char_start, text)`. Characters already covered by the
/// previous span are skipped, so overlapping neighbors are not duplicated.
pub fn stitch<'a>(spans: impl IntoIterator<Item = (usize, &'a str)>) -> String {
    let mut out = String::new();
    let mut covered_to: Option<usize> = None;
    for (char_start, text) in spans {
        let len = text.chars().count();
        let skip = covered_to.map_or(0, |end| end.saturating_sub(char_start));
        if skip < len {
            if covered_to.is_some_and(|end| end < char_start) {
                out.push('\n');
            }
            out.extend(text.chars().skip(skip));
        }
        covered_to = Some(covered_to.map_or(char_start + len, |end| end.max(char_start + len)));
    }
    out
}
