//! # policy-rag
//!
//! Retrieval-augmented answering over bank policy documents.
//!
//! ## Overview
//!
//! Policy documents are organised in collections: one per bank plus a shared
//! `common` collection. This crate provides:
//!
//! - [`FixedSizeChunker`]: lossless overlapping character windows
//! - [`IndexBuilder`]: chunk, embed, and persist one [`CollectionIndex`] per collection
//! - [`Retriever`]: query-time search across a bank and `common`, or every collection
//! - [`AnswerComposer`]: one bounded language model call per question
//! - [`AnswerExtractor`]: parse, repair, and coerce model output into a [`StructuredAnswer`]
//! - [`SessionStore`]: bounded per-session conversation history
//! - [`PolicyAssistant`]: the facade tying retrieval, composition, and sessions together
//!
//! ## Features
//!
//! - `openai` (default): OpenAI-compatible embeddings and chat completions
//! - `gemini` (default): Gemini embeddings and content generation
//! - `pdf` (default): text extraction from `.pdf` documents

mod answer;
mod assistant;
mod builder;
mod catalog;
mod chunking;
mod composer;
mod config;
mod document;
mod embedding;
mod error;
mod extract;
mod index;
mod inmemory;
mod llm;
mod loader;
mod retriever;
mod retry;
mod session;
mod storage;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

pub use answer::{DEFAULT_SNIPPET_CHARS, DISCLAIMER, NOT_MENTIONED, Source, Steps, StructuredAnswer, sources_from_chunks};
pub use assistant::{AskRequest, AskResponse, PolicyAssistant, PolicyAssistantBuilder, detect_bank};
pub use builder::{BuildReport, BuildSummary, IndexBuilder};
pub use catalog::IndexCatalog;
pub use chunking::{Chunker, FixedSizeChunker, rejoin, stitch};
pub use composer::{AnswerComposer, build_prompt};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{COMMON_COLLECTION, Document, Passage, RetrievedChunk, TextSpan, is_common};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use extract::{AnswerExtractor, Extracted, Extraction, extract_answer};
pub use index::{CollectionIndex, Hit, IndexManifest, cosine_similarity};
pub use inmemory::InMemoryIndexStorage;
pub use llm::LanguageModel;
pub use loader::{CollectionDir, DocumentSource, LoadedDocuments, SkippedDocument, document_paths, read_document_text};
pub use retriever::{CollectionFilter, Retriever};
pub use retry::{RetryPolicy, RetryingModel};
pub use session::{SessionStore, Turn};
pub use storage::{FsIndexStorage, IndexStorage, is_valid_collection_name};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiEmbeddingProvider, GeminiModel};
#[cfg(feature = "openai")]
pub use openai::{OpenAIChatModel, OpenAIEmbeddingProvider};
