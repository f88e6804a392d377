//! Error types for the `policy-rag` crate.

use thiserror::Error;

/// Errors that can occur while building indexes or answering questions.
///
/// Most query-time failures never reach the caller: the
/// [`PolicyAssistant`](crate::PolicyAssistant) degrades them into a fallback
/// [`StructuredAnswer`](crate::StructuredAnswer). These variants surface at
/// build time, at start-up, and between internal components.
#[derive(Debug, Error)]
pub enum RagError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The language model call failed or timed out.
    #[error("Language model error ({provider}): {message}")]
    ModelError {
        /// The model provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Reading or writing a persisted index failed.
    #[error("Index storage error ({backend}): {message}")]
    StorageError {
        /// The storage backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A persisted index does not match the embedder used to query it.
    #[error("Embedding mismatch for collection '{collection}': {message}")]
    EmbeddingMismatch {
        /// The collection whose index was rejected.
        collection: String,
        /// What differed.
        message: String,
    },

    /// A collection could not be built.
    #[error("Ingestion error ({collection}): {message}")]
    IngestionError {
        /// The collection being built.
        collection: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The caller supplied an unusable request (for example an empty question).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
