//! Configuration for chunking, retrieval, and answer composition.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Tunable parameters shared by the index builder, retriever, and composer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of passages taken from each searched index.
    pub top_k_per_index: usize,
    /// Number of passages returned after merging all searched indexes.
    pub top_n: usize,
    /// Maximum number of banks kept when a query names no bank.
    pub max_banks_unfiltered: usize,
    /// Stitch each hit with its neighboring passages from the same document.
    pub merge_neighbors: bool,
    /// Maximum length of a source snippet in characters.
    pub snippet_chars: usize,
    /// Number of recent session turns fed into the prompt.
    pub history_turns: usize,
    /// Maximum number of turns retained per session.
    pub session_capacity: usize,
    /// Number of chunks sent to the embedding service per request.
    pub embed_batch_size: usize,
    /// Upper bound on a single language model call.
    #[serde(with = "duration_secs")]
    pub generation_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
            top_k_per_index: 5,
            top_n: 10,
            max_banks_unfiltered: 5,
            merge_neighbors: true,
            snippet_chars: 400,
            history_turns: 6,
            session_capacity: 20,
            embed_batch_size: 32,
            generation_timeout: Duration::from_secs(60),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of passages taken from each searched index.
    pub fn top_k_per_index(mut self, k: usize) -> Self {
        self.config.top_k_per_index = k;
        self
    }

    /// Set the number of passages returned after merging.
    pub fn top_n(mut self, n: usize) -> Self {
        self.config.top_n = n;
        self
    }

    /// Set how many banks an unfiltered query may draw from.
    pub fn max_banks_unfiltered(mut self, banks: usize) -> Self {
        self.config.max_banks_unfiltered = banks;
        self
    }

    /// Enable or disable neighbor stitching.
    pub fn merge_neighbors(mut self, merge: bool) -> Self {
        self.config.merge_neighbors = merge;
        self
    }

    /// Set the maximum source snippet length.
    pub fn snippet_chars(mut self, chars: usize) -> Self {
        self.config.snippet_chars = chars;
        self
    }

    /// Set how many recent turns are included in the prompt.
    pub fn history_turns(mut self, turns: usize) -> Self {
        self.config.history_turns = turns;
        self
    }

    /// Set the per-session history capacity.
    pub fn session_capacity(mut self, capacity: usize) -> Self {
        self.config.session_capacity = capacity;
        self
    }

    /// Set the embedding batch size used while building indexes.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the language model timeout.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = timeout;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k_per_index == 0` or `top_n == 0`
    /// - `session_capacity == 0` or `embed_batch_size == 0`
    /// - `generation_timeout` is zero
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k_per_index == 0 {
            return Err(RagError::ConfigError(
                "top_k_per_index must be greater than zero".to_string(),
            ));
        }
        if config.top_n == 0 {
            return Err(RagError::ConfigError("top_n must be greater than zero".to_string()));
        }
        if config.session_capacity == 0 {
            return Err(RagError::ConfigError(
                "session_capacity must be greater than zero".to_string(),
            ));
        }
        if config.embed_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        if config.generation_timeout.is_zero() {
            return Err(RagError::ConfigError(
                "generation_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ingestion_settings() {
        let config = RagConfig::default();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k_per_index, 5);
        assert!(RagConfig::builder().build().is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("chunk_overlap")));
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(RagConfig::builder().top_k_per_index(0).build().is_err());
        assert!(RagConfig::builder().top_n(0).build().is_err());
        assert!(RagConfig::builder().session_capacity(0).build().is_err());
        assert!(RagConfig::builder().generation_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn timeout_serializes_as_seconds() {
        let config = RagConfig::builder().generation_timeout(Duration::from_secs(12)).build().unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["generation_timeout"], 12);
        let back: RagConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }
}
