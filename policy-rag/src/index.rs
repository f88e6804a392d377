//! Exact nearest-neighbor index over one collection.
//!
//! A [`CollectionIndex`] holds the embedding vectors of one collection and a
//! parallel sequence of [`Passage`] metadata. The two sequences always have the
//! same length and position `i` in both refers to the same passage; the
//! constructor and the deserializer both enforce this.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunking::stitch;
use crate::document::Passage;
use crate::error::{RagError, Result};

/// Build-time facts persisted alongside an index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// The collection this index covers.
    pub collection: String,
    /// [`EmbeddingProvider::model_id`](crate::EmbeddingProvider::model_id) used to build it.
    pub embedding_model: String,
    /// Dimensionality of every vector.
    pub dimensions: usize,
    /// Chunk size used while building.
    pub chunk_size: usize,
    /// Chunk overlap used while building.
    pub chunk_overlap: usize,
    /// When the index was built.
    pub built_at: DateTime<Utc>,
}

/// A scored position in a [`CollectionIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Position of the passage in the index.
    pub position: usize,
    /// Cosine similarity to the query.
    pub score: f32,
}

#[derive(Deserialize)]
struct RawIndex {
    manifest: IndexManifest,
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

impl TryFrom<RawIndex> for CollectionIndex {
    type Error = RagError;

    fn try_from(raw: RawIndex) -> Result<Self> {
        CollectionIndex::new(raw.manifest, raw.passages, raw.vectors)
    }
}

/// An immutable exact-search index with parallel passage metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawIndex")]
pub struct CollectionIndex {
    manifest: IndexManifest,
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

impl CollectionIndex {
    /// Assemble an index, checking the metadata/vector invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::StorageError`] if the sequences differ in length, a
    /// vector has the wrong dimensionality, or a passage's `sequence` or
    /// `collection` does not match its position and the manifest.
    pub fn new(
        manifest: IndexManifest,
        passages: Vec<Passage>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let invalid = |message: String| RagError::StorageError {
            backend: "index".to_string(),
            message: format!("collection '{}': {message}", manifest.collection),
        };

        if passages.len() != vectors.len() {
            return Err(invalid(format!(
                "{} passages but {} vectors",
                passages.len(),
                vectors.len()
            )));
        }
        if let Some(i) = vectors.iter().position(|v| v.len() != manifest.dimensions) {
            return Err(invalid(format!(
                "vector {i} has {} dimensions, expected {}",
                vectors[i].len(),
                manifest.dimensions
            )));
        }
        for (i, passage) in passages.iter().enumerate() {
            if passage.sequence != i || passage.collection != manifest.collection {
                return Err(invalid(format!("passage at position {i} is out of place")));
            }
        }

        Ok(Self { manifest, passages, vectors })
    }

    /// Build-time facts for this index.
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// The collection this index covers.
    pub fn collection(&self) -> &str {
        &self.manifest.collection
    }

    /// Passage metadata, in index order.
    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Returns `true` if the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Check that this index was built by the given embedder.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingMismatch`] if the model id or the
    /// dimensionality differ.
    pub fn check_embedder(&self, model_id: &str, dimensions: usize) -> Result<()> {
        if self.manifest.embedding_model != model_id {
            return Err(RagError::EmbeddingMismatch {
                collection: self.manifest.collection.clone(),
                message: format!(
                    "built with '{}', queried with '{model_id}'",
                    self.manifest.embedding_model
                ),
            });
        }
        if self.manifest.dimensions != dimensions {
            return Err(RagError::EmbeddingMismatch {
                collection: self.manifest.collection.clone(),
                message: format!(
                    "built with {} dimensions, queried with {dimensions}",
                    self.manifest.dimensions
                ),
            });
        }
        Ok(())
    }

    /// Return the `top_k` positions most similar to `query`.
    ///
    /// Results are ordered by descending score; equal scores keep ascending
    /// position order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<Hit> {
        if top_k == 0 || query.len() != self.manifest.dimensions {
            return Vec::new();
        }

        let mut hits: Vec<Hit> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| Hit { position, score: cosine_similarity(vector, query) })
            .collect();

        hits.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then(a.position.cmp(&b.position))
        });
        hits.truncate(top_k);
        hits
    }

    /// Text of the passage at `position` stitched with its neighbors.
    ///
    /// Neighbors are the directly preceding and following passages of the same
    /// source document; their overlapping characters are not repeated.
    pub fn stitched_text(&self, position: usize) -> Option<String> {
        let current = self.passages.get(position)?;
        let is_neighbor = |other: &Passage, offset: isize| {
            other.source_document == current.source_document
                && other.chunk_index as isize == current.chunk_index as isize + offset
        };

        let previous = position
            .checked_sub(1)
            .and_then(|i| self.passages.get(i))
            .filter(|p| is_neighbor(p, -1));
        let next = self.passages.get(position + 1).filter(|p| is_neighbor(p, 1));

        let parts = previous.into_iter().chain(Some(current)).chain(next);
        Some(stitch(parts.map(|p| (p.char_start, p.text.as_str()))))
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
