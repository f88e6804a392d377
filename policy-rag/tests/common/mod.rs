//! Deterministic test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use policy_rag::{
    CollectionIndex, EmbeddingProvider, IndexManifest, LanguageModel, Passage, RagError, Result,
};

/// Embeds text as keyword counts over a fixed vocabulary plus a constant bias
/// component, so every vector is non-zero.
pub struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
    model: String,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&'static str]) -> Self {
        Self { vocabulary: vocabulary.to_vec(), model: "test/keyword".to_string() }
    }

    pub fn banking() -> Self {
        Self::new(&["account", "loan", "card", "deposit", "kyc", "interest", "locker", "fee"])
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let mut vector: Vec<f32> =
            self.vocabulary.iter().map(|word| text.matches(word).count() as f32).collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len() + 1
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}

/// Always embeds to the same vector.
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector.clone())
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    fn model_id(&self) -> String {
        "test/fixed".to_string()
    }
}

/// A language model that replays scripted replies and records every prompt.
///
/// Once the script runs out it keeps returning the last reply.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    last: Mutex<std::result::Result<String, String>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Self {
        Self::script(vec![Ok(reply.to_string())])
    }

    pub fn failing(message: &str) -> Self {
        Self::script(vec![Err(message.to_string())])
    }

    pub fn script(replies: Vec<std::result::Result<String, String>>) -> Self {
        let last = replies.last().cloned().unwrap_or_else(|| Ok("{}".to_string()));
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(last),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        let reply = reply.unwrap_or_else(|| self.last.lock().unwrap().clone());
        reply.map_err(|message| RagError::ModelError { provider: "scripted".to_string(), message })
    }
}

/// An index whose passages each come from their own document.
pub fn index_with_vectors(collection: &str, model: &str, vectors: Vec<Vec<f32>>) -> CollectionIndex {
    let dimensions = vectors.first().map_or(0, Vec::len);
    let passages = (0..vectors.len())
        .map(|i| Passage {
            collection: collection.to_string(),
            source_document: format!("{collection}-{i}.pdf"),
            sequence: i,
            chunk_index: 0,
            char_start: 0,
            text: format!("{collection} passage {i}"),
        })
        .collect();
    let manifest = IndexManifest {
        collection: collection.to_string(),
        embedding_model: model.to_string(),
        dimensions,
        chunk_size: 800,
        chunk_overlap: 200,
        built_at: Utc::now(),
    };
    CollectionIndex::new(manifest, passages, vectors).unwrap()
}
