//! Start-up settings read from the environment.
//!
//! A `.env` file in the working directory is loaded first; variables already
//! set in the process environment win.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use policy_rag::{
    EmbeddingProvider, GeminiEmbeddingProvider, GeminiModel, LanguageModel, OpenAIChatModel,
    OpenAIEmbeddingProvider, RagConfig, RetryPolicy, RetryingModel,
};

use crate::server::ServerConfig;

/// A hosted model vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" | "google" => Ok(Self::Gemini),
            other => bail!("unknown provider `{other}`, expected `openai` or `gemini`"),
        }
    }
}

/// Everything the binary needs to serve or ingest.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub server: ServerConfig,
    pub embedding_provider: Provider,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
    pub embedding_base_url: Option<String>,
    pub llm_provider: Provider,
    pub llm_model: Option<String>,
    pub llm_max_attempts: u32,
    pub http_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub rag: RagConfig,
}

impl Settings {
    /// Load `.env` and read settings from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = RagConfig::default();
        let rag = RagConfig::builder()
            .chunk_size(parse_or(&get, "CHUNK_SIZE", defaults.chunk_size)?)
            .chunk_overlap(parse_or(&get, "CHUNK_OVERLAP", defaults.chunk_overlap)?)
            .top_k_per_index(parse_or(&get, "TOP_K_PER_INDEX", defaults.top_k_per_index)?)
            .top_n(parse_or(&get, "TOP_N", defaults.top_n)?)
            .max_banks_unfiltered(parse_or(&get, "MAX_BANKS_UNFILTERED", defaults.max_banks_unfiltered)?)
            .merge_neighbors(parse_or(&get, "MERGE_NEIGHBORS", defaults.merge_neighbors)?)
            .snippet_chars(parse_or(&get, "SNIPPET_CHARS", defaults.snippet_chars)?)
            .history_turns(parse_or(&get, "HISTORY_TURNS", defaults.history_turns)?)
            .session_capacity(parse_or(&get, "SESSION_CAPACITY", defaults.session_capacity)?)
            .embed_batch_size(parse_or(&get, "EMBED_BATCH_SIZE", defaults.embed_batch_size)?)
            .generation_timeout(Duration::from_secs(parse_or(
                &get,
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )?))
            .build()
            .context("invalid retrieval settings")?;

        let defaults = ServerConfig::default();
        let server = ServerConfig {
            host: get("POLICY_HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "POLICY_PORT", defaults.port)?,
        };

        Ok(Self {
            data_dir: get("POLICY_DATA_DIR").map_or_else(|| PathBuf::from("data"), PathBuf::from),
            storage_dir: get("POLICY_STORAGE_DIR").map_or_else(|| PathBuf::from("storage"), PathBuf::from),
            server,
            embedding_provider: get("EMBEDDING_PROVIDER").as_deref().unwrap_or("openai").parse()?,
            embedding_model: get("EMBEDDING_MODEL"),
            embedding_dimensions: get("EMBEDDING_DIMENSIONS")
                .map(|v| v.parse().with_context(|| format!("EMBEDDING_DIMENSIONS `{v}` is not a number")))
                .transpose()?,
            embedding_base_url: get("EMBEDDING_BASE_URL"),
            llm_provider: get("LLM_PROVIDER").as_deref().unwrap_or("gemini").parse()?,
            llm_model: get("LLM_MODEL"),
            llm_max_attempts: parse_or(&get, "LLM_MAX_ATTEMPTS", 2)?,
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 30)?),
            openai_api_key: get("OPENAI_API_KEY"),
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            rag,
        })
    }

    fn api_key(&self, provider: Provider) -> anyhow::Result<&str> {
        let (key, hint) = match provider {
            Provider::OpenAI => (&self.openai_api_key, "OPENAI_API_KEY"),
            Provider::Gemini => (&self.gemini_api_key, "GEMINI_API_KEY or GOOGLE_API_KEY"),
        };
        key.as_deref().ok_or_else(|| anyhow!("{hint} must be set for the {provider:?} provider"))
    }

    /// The configured embedding provider.
    pub fn embedding_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        let api_key = self.api_key(self.embedding_provider)?;
        let provider: Arc<dyn EmbeddingProvider> = match self.embedding_provider {
            Provider::OpenAI => {
                let mut provider = OpenAIEmbeddingProvider::new(api_key)?.with_timeout(self.http_timeout)?;
                if let Some(model) = &self.embedding_model {
                    provider = provider.with_model(model);
                }
                if let Some(dims) = self.embedding_dimensions {
                    provider = provider.with_dimensions(dims);
                }
                if let Some(url) = &self.embedding_base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
            Provider::Gemini => {
                let mut provider = GeminiEmbeddingProvider::new(api_key)?.with_timeout(self.http_timeout)?;
                if let Some(model) = &self.embedding_model {
                    let dims = self.embedding_dimensions.with_context(|| {
                        format!("EMBEDDING_DIMENSIONS must be set for Gemini model `{model}`")
                    })?;
                    provider = provider.with_model(model, dims);
                } else if let Some(dims) = self.embedding_dimensions {
                    provider = provider.with_output_dimensionality(dims);
                }
                if let Some(url) = &self.embedding_base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
        };
        Ok(provider)
    }

    /// The configured language model, wrapped with the retry policy.
    pub fn language_model(&self) -> anyhow::Result<Arc<dyn LanguageModel>> {
        let api_key = self.api_key(self.llm_provider)?;
        let timeout = self.rag.generation_timeout;
        let model: Arc<dyn LanguageModel> = match self.llm_provider {
            Provider::OpenAI => {
                let mut model = OpenAIChatModel::new(api_key)?.with_timeout(timeout)?;
                if let Some(name) = &self.llm_model {
                    model = model.with_model(name);
                }
                Arc::new(model)
            }
            Provider::Gemini => {
                let mut model = GeminiModel::new(api_key)?.with_timeout(timeout)?;
                if let Some(name) = &self.llm_model {
                    model = model.with_model(name);
                }
                Arc::new(model)
            }
        };
        let policy = RetryPolicy { max_attempts: self.llm_max_attempts, ..RetryPolicy::default() };
        Ok(Arc::new(RetryingModel::new(model, policy)))
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(value) => value.parse().with_context(|| format!("{key} has invalid value `{value}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert_eq!(settings.storage_dir, PathBuf::from("storage"));
        assert_eq!(settings.embedding_provider, Provider::OpenAI);
        assert_eq!(settings.llm_provider, Provider::Gemini);
        assert_eq!(settings.rag, RagConfig::default());
        assert_eq!(settings.server.port, ServerConfig::default().port);
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = settings(&[
            ("CHUNK_SIZE", "500"),
            ("CHUNK_OVERLAP", "50"),
            ("MERGE_NEIGHBORS", "false"),
            ("POLICY_PORT", "9000"),
            ("LLM_PROVIDER", "OpenAI"),
            ("GOOGLE_API_KEY", "g-key"),
        ])
        .unwrap();
        assert_eq!(settings.rag.chunk_size, 500);
        assert_eq!(settings.rag.chunk_overlap, 50);
        assert!(!settings.rag.merge_neighbors);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.llm_provider, Provider::OpenAI);
        assert_eq!(settings.gemini_api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(settings(&[("TOP_N", "ten")]).is_err());
        assert!(settings(&[("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "100")]).is_err());
        assert!(settings(&[("EMBEDDING_PROVIDER", "cohere")]).is_err());
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let settings = settings(&[("OPENAI_API_KEY", "  ")]).unwrap();
        let err = settings.embedding_provider().err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(settings.language_model().is_err());
    }

    #[test]
    fn providers_build_with_credentials() {
        let settings = settings(&[("OPENAI_API_KEY", "sk-test"), ("GEMINI_API_KEY", "g-test")]).unwrap();
        let embedder = settings.embedding_provider().unwrap();
        assert_eq!(embedder.dimensions(), 1536);
        let model = settings.language_model().unwrap();
        assert_eq!(model.name(), "gemini-2.5-flash");
    }
}
