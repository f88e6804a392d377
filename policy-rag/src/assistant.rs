//! The question-answering facade.
//!
//! [`PolicyAssistant`] wires the [`Retriever`], the [`AnswerComposer`], and the
//! [`SessionStore`] together. Construct one via [`PolicyAssistant::builder()`].
//!
//! # Example
//!
//! ```rust,ignore
//! use policy_rag::{AskRequest, FsIndexStorage, PolicyAssistant, RagConfig};
//!
//! let assistant = PolicyAssistant::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .language_model(Arc::new(model))
//!     .index_storage(Arc::new(FsIndexStorage::new("storage")))
//!     .build()?;
//!
//! let response = assistant.ask(AskRequest::new("How do I open an account?", "session-1")).await?;
//! println!("{}", response.answer.summary);
//! ```

use std::sync::Arc;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::answer::StructuredAnswer;
use crate::catalog::IndexCatalog;
use crate::composer::AnswerComposer;
use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::LanguageModel;
use crate::retriever::{CollectionFilter, Retriever};
use crate::session::SessionStore;
use crate::storage::IndexStorage;

/// A question from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    /// The question text. Must not be blank.
    pub question: String,
    /// Bank to restrict retrieval to, besides `common`.
    #[serde(default)]
    pub bank: Option<String>,
    /// Conversation the question belongs to.
    pub session_id: String,
    /// Override of the per-index result count.
    #[serde(default)]
    pub top_k_per_index: Option<usize>,
}

impl AskRequest {
    /// A request with no bank and default retrieval settings.
    pub fn new(question: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            bank: None,
            session_id: session_id.into(),
            top_k_per_index: None,
        }
    }

    /// Restrict the request to `bank`.
    pub fn with_bank(mut self, bank: impl Into<String>) -> Self {
        self.bank = Some(bank.into());
        self
    }

    /// Override the per-index result count.
    pub fn with_top_k_per_index(mut self, k: usize) -> Self {
        self.top_k_per_index = Some(k);
        self
    }
}

/// The answer to an [`AskRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    /// The conversation the answer was recorded in.
    pub session_id: String,
    /// The bank retrieval was restricted to, if any.
    pub bank: Option<String>,
    /// The answer.
    pub answer: StructuredAnswer,
}

/// Answers policy questions over the built collection indexes.
pub struct PolicyAssistant {
    config: RagConfig,
    retriever: Retriever,
    composer: AnswerComposer,
    sessions: Arc<SessionStore>,
}

impl PolicyAssistant {
    /// Create a new [`PolicyAssistantBuilder`].
    pub fn builder() -> PolicyAssistantBuilder {
        PolicyAssistantBuilder::default()
    }

    /// The configuration in use.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The index catalog.
    pub fn catalog(&self) -> &Arc<IndexCatalog> {
        self.retriever.catalog()
    }

    /// Banks with a built index, sorted ascending.
    pub async fn available_banks(&self) -> Vec<String> {
        self.catalog().available_banks().await
    }

    /// Re-read every index from storage, atomically replacing the loaded set.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be listed; the loaded indexes are
    /// kept in that case.
    pub async fn reload(&self) -> Result<Vec<String>> {
        self.catalog().reload().await
    }

    /// Answer a question.
    ///
    /// The bank is taken from the request, else from the session, else from a
    /// known bank named in the question. The turn, and the bank when it has an
    /// index, are recorded in the session only once the answer is complete.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidRequest`] for a blank question or session id.
    /// Every other failure is reported inside the returned answer.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("question cannot be empty".to_string()));
        }
        let session_id = request.session_id.trim();
        if session_id.is_empty() {
            return Err(RagError::InvalidRequest("session_id cannot be empty".to_string()));
        }

        let bank = self.resolve_bank(session_id, request.bank.as_deref(), question).await;

        let filter = CollectionFilter::from_bank(bank.as_deref());
        let chunks = self.retriever.retrieve(question, &filter, request.top_k_per_index).await;
        let history = self.sessions.recent(session_id, self.config.history_turns).await;

        let answer = self.composer.compose(question, bank.as_deref(), &chunks, &history).await;

        // Only banks with an index are remembered.
        if let Some(bank) = &bank {
            if self.available_banks().await.contains(bank) {
                self.sessions.set_bank(session_id, Some(bank.clone())).await;
            }
        }
        self.sessions.append(session_id, question, answer.clone()).await;

        info!(session_id, bank = bank.as_deref(), chunk_count = chunks.len(), "answered question");
        Ok(AskResponse { session_id: session_id.to_string(), bank, answer })
    }

    async fn resolve_bank(&self, session_id: &str, requested: Option<&str>, question: &str) -> Option<String> {
        if let CollectionFilter::Bank(bank) = CollectionFilter::from_bank(requested) {
            return Some(bank);
        }
        if let Some(bank) = self.sessions.bank(session_id).await {
            debug!(session_id, bank = %bank, "using session bank");
            return Some(bank);
        }
        let detected = detect_bank(question, &self.available_banks().await);
        if let Some(bank) = &detected {
            debug!(session_id, bank = %bank, "detected bank in question");
        }
        detected
    }
}

/// The first of `banks` named as a whole word in `question`, ignoring case.
pub fn detect_bank(question: &str, banks: &[String]) -> Option<String> {
    banks
        .iter()
        .find(|bank| {
            RegexBuilder::new(&format!(r"\b{}\b", regex::escape(bank)))
                .case_insensitive(true)
                .build()
                .is_ok_and(|re| re.is_match(question))
        })
        .cloned()
}

/// Builder for constructing a [`PolicyAssistant`].
///
/// The embedding provider, language model, and index storage are required.
/// Without a session store a new one is created with the configured capacity.
#[derive(Default)]
pub struct PolicyAssistantBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    index_storage: Option<Arc<dyn IndexStorage>>,
    session_store: Option<Arc<SessionStore>>,
}

impl PolicyAssistantBuilder {
    /// Set the configuration. Defaults to [`RagConfig::default()`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider. It must be the one the indexes were built with.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the language model.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Set the storage the indexes are read from.
    pub fn index_storage(mut self, storage: Arc<dyn IndexStorage>) -> Self {
        self.index_storage = Some(storage);
        self
    }

    /// Share an existing session store.
    pub fn session_store(mut self, sessions: Arc<SessionStore>) -> Self {
        self.session_store = Some(sessions);
        self
    }

    /// Build the [`PolicyAssistant`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required component is missing.
    pub fn build(self) -> Result<PolicyAssistant> {
        let config = self.config.unwrap_or_default();
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let language_model = self
            .language_model
            .ok_or_else(|| RagError::ConfigError("language_model is required".to_string()))?;
        let index_storage = self
            .index_storage
            .ok_or_else(|| RagError::ConfigError("index_storage is required".to_string()))?;
        let sessions =
            self.session_store.unwrap_or_else(|| Arc::new(SessionStore::new(config.session_capacity)));

        let catalog = Arc::new(IndexCatalog::new(index_storage));
        let retriever = Retriever::new(embedding_provider, catalog, config.clone());
        let composer =
            AnswerComposer::new(language_model, config.generation_timeout, config.snippet_chars);

        Ok(PolicyAssistant { config, retriever, composer, sessions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_detection_matches_whole_words() {
        let banks = vec!["hdfc".to_string(), "sbi".to_string()];
        assert_eq!(detect_bank("What are SBI locker charges?", &banks).as_deref(), Some("sbi"));
        assert_eq!(detect_bank("hdfc vs sbi", &banks).as_deref(), Some("hdfc"));
        assert_eq!(detect_bank("What is sbin?", &banks), None);
        assert_eq!(detect_bank("Any bank", &[]), None);
    }

    #[test]
    fn builder_requires_components() {
        let err = PolicyAssistant::builder().build().err().unwrap();
        assert!(matches!(err, RagError::ConfigError(_)));
    }
}
