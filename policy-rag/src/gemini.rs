//! Gemini embedding and generation providers.
//!
//! This module is only available when the `gemini` feature is enabled. It
//! talks to the Generative Language REST API with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::LanguageModel;

/// The default Generative Language API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";
const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::ConfigError(format!("failed to build Gemini HTTP client: {e}")))
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") { model.to_string() } else { format!("models/{model}") }
}

async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    format!("API returned {status}: {detail}")
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// # Configuration
///
/// - `model` – defaults to `gemini-embedding-001` (3072 dimensions).
/// - `task_type` – defaults to `RETRIEVAL_DOCUMENT`; the same task type is
///   used for indexing and querying so both share one embedding function.
/// - `output_dimensionality` – optional truncation of the output vector.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::new("your-api-key")?.with_output_dimensionality(768);
/// let embedding = provider.embed("fixed deposit premature withdrawal").await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    task_type: String,
    output_dimensionality: Option<usize>,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Default embedding dimensions for `gemini-embedding-001`.
    const DEFAULT_DIMENSIONS: usize = 3072;

    /// Create a new provider using the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }

        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            api_key,
            base_url: GEMINI_API_BASE.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            task_type: "RETRIEVAL_DOCUMENT".into(),
            output_dimensionality: None,
            dimensions: Self::DEFAULT_DIMENSIONS,
        })
    }

    /// Set the embedding model and its native dimensionality.
    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    /// Set the task type used for embedding requests.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Set the output dimensionality (truncates the embedding vector).
    pub fn with_output_dimensionality(mut self, dims: usize) -> Self {
        self.output_dimensionality = Some(dims);
        self.dimensions = dims;
        self
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    fn request_for(&self, text: &str) -> serde_json::Value {
        let mut request = json!({
            "model": model_path(&self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": self.task_type,
        });
        if let Some(dims) = self.output_dimensionality {
            request["outputDimensionality"] = json!(dims);
        }
        request
    }

    fn embedding_error(message: String) -> RagError {
        RagError::EmbeddingError { provider: "Gemini".into(), message }
    }
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "Gemini", text_len = text.len(), "embedding single text");

        let response = self
            .client
            .post(format!("{}/{}:embedContent", self.base_url, model_path(&self.model)))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_for(text))
            .send()
            .await
            .map_err(|e| {
                error!(provider = "Gemini", error = %e, "embedding request failed");
                Self::embedding_error(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let message = error_detail(response).await;
            error!(provider = "Gemini", %message, "API error");
            return Err(Self::embedding_error(message));
        }

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| Self::embedding_error(format!("failed to parse response: {e}")))?;
        Ok(parsed.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = "Gemini", batch_size = texts.len(), "embedding batch");

        let requests: Vec<serde_json::Value> = texts.iter().map(|t| self.request_for(t)).collect();
        let response = self
            .client
            .post(format!("{}/{}:batchEmbedContents", self.base_url, model_path(&self.model)))
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| {
                error!(provider = "Gemini", error = %e, "batch embedding request failed");
                Self::embedding_error(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let message = error_detail(response).await;
            error!(provider = "Gemini", %message, "API error");
            return Err(Self::embedding_error(message));
        }

        let parsed: BatchEmbedContentsResponse = response
            .json()
            .await
            .map_err(|e| Self::embedding_error(format!("failed to parse response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Self::embedding_error(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> String {
        match self.output_dimensionality {
            Some(dims) => format!("gemini/{}@{dims}", self.model),
            None => format!("gemini/{}", self.model),
        }
    }
}

/// A [`LanguageModel`] backed by Gemini `generateContent`.
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl GeminiModel {
    /// Create a client for the default model (`gemini-2.5-flash`).
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }

        Ok(Self {
            client: build_client(Duration::from_secs(60))?,
            api_key,
            base_url: GEMINI_API_BASE.into(),
            model: DEFAULT_GENERATION_MODEL.into(),
            temperature: 0.2,
        })
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        Ok(self)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(provider = "Gemini", model = %self.model, prompt_len = prompt.len(), "generating");

        let body = GenerateContentRequest {
            contents: vec![RequestContent { role: "user", parts: vec![RequestPart { text: prompt }] }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(format!("{}/{}:generateContent", self.base_url, model_path(&self.model)))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = "Gemini", error = %e, "generation request failed");
                RagError::ModelError {
                    provider: "Gemini".into(),
                    message: format!("request failed: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let message = error_detail(response).await;
            error!(provider = "Gemini", %message, "API error");
            return Err(RagError::ModelError { provider: "Gemini".into(), message });
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| RagError::ModelError {
                provider: "Gemini".into(),
                message: format!("failed to parse response: {e}"),
            })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join("")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_path_is_prefixed_once() {
        assert_eq!(model_path("gemini-2.5-flash"), "models/gemini-2.5-flash");
        assert_eq!(model_path("models/gemini-2.5-flash"), "models/gemini-2.5-flash");
    }

    #[test]
    fn model_id_records_truncated_dimensions() {
        let provider = GeminiEmbeddingProvider::new("key").unwrap().with_output_dimensionality(768);
        assert_eq!(provider.dimensions(), 768);
        assert_eq!(provider.model_id(), "gemini/gemini-embedding-001@768");
        let request = provider.request_for("hello");
        assert_eq!(request["outputDimensionality"], 768);
        assert_eq!(request["model"], "models/gemini-embedding-001");
    }

    #[test]
    fn rejects_empty_api_key() {
        assert!(GeminiModel::new("").is_err());
        assert!(GeminiEmbeddingProvider::new("").is_err());
    }
}
