//! `policy-server` serves the bank policy assistant over HTTP and builds
//! collection indexes from the document tree.

pub mod cli;
pub mod server;
pub mod settings;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use policy_rag::{FsIndexStorage, PolicyAssistant};

pub use server::{AppState, ServerConfig, app_router, run_server};
pub use settings::{Provider, Settings};
pub use telemetry::{LogFormat, init_telemetry};

/// Build the assistant described by `settings`, reading indexes from its storage directory.
pub async fn build_assistant(settings: &Settings) -> anyhow::Result<Arc<PolicyAssistant>> {
    let assistant = PolicyAssistant::builder()
        .config(settings.rag.clone())
        .embedding_provider(settings.embedding_provider()?)
        .language_model(settings.language_model()?)
        .index_storage(Arc::new(FsIndexStorage::new(&settings.storage_dir)))
        .build()
        .context("failed to build policy assistant")?;

    assistant.reload().await.context("failed to load collection indexes")?;
    Ok(Arc::new(assistant))
}
