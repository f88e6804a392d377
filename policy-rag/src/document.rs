//! Data types for documents, passages, and retrieval results.

use serde::{Deserialize, Serialize};

/// Name of the collection shared by every bank.
pub const COMMON_COLLECTION: &str = "common";

/// Returns `true` if `collection` is the shared collection.
pub fn is_common(collection: &str) -> bool {
    collection.eq_ignore_ascii_case(COMMON_COLLECTION)
}

/// A source document read from a collection directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// The collection (bank id or `common`) the document belongs to.
    pub collection: String,
    /// File name of the original document, used as its display name.
    pub name: String,
    /// Extracted text content.
    pub text: String,
}

/// One contiguous span of a document produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Position of the span within its document.
    pub index: usize,
    /// Offset of the first character of the span, in characters.
    pub char_start: usize,
    /// The span text.
    pub text: String,
}

impl TextSpan {
    /// Offset one past the last character of the span.
    pub fn char_end(&self) -> usize {
        self.char_start + self.text.chars().count()
    }
}

/// Metadata for one indexed passage.
///
/// Stored in the same order as the vectors of its
/// [`CollectionIndex`](crate::CollectionIndex); position `i` in both refers to
/// the same passage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    /// The collection the passage belongs to.
    pub collection: String,
    /// File name of the source document.
    pub source_document: String,
    /// Position of the passage within its collection.
    pub sequence: usize,
    /// Position of the passage within its source document.
    pub chunk_index: usize,
    /// Character offset of the passage in its source document.
    pub char_start: usize,
    /// The passage text.
    pub text: String,
}

/// A passage returned for a query, paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    /// The collection the passage came from.
    pub collection: String,
    /// File name of the source document.
    pub source_document: String,
    /// Passage text, stitched with its neighbors when enabled.
    pub text: String,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
    /// Position of the passage within its collection.
    pub sequence: usize,
}
