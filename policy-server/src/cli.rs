use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use policy_rag::{BuildReport, DocumentSource, FsIndexStorage, IndexBuilder};
use tracing::info;

use crate::{build_assistant, run_server, settings::Settings};

/// Bank policy assistant
#[derive(Parser, Debug)]
#[command(name = "policy-assistant")]
#[command(version)]
#[command(about = "Answer questions about bank policies from indexed documents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API
    Serve,

    /// Build collection indexes from the document tree
    Ingest {
        /// Rebuild only this collection
        #[arg(long)]
        collection: Option<String>,
    },
}

/// Execute a CLI command
pub async fn execute(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command {
        Commands::Serve => {
            let assistant = build_assistant(&settings).await?;
            run_server(settings.server.clone(), assistant).await
        }
        Commands::Ingest { collection } => ingest(&settings, collection.as_deref()).await,
    }
}

async fn ingest(settings: &Settings, collection: Option<&str>) -> Result<()> {
    let source = DocumentSource::new(&settings.data_dir);
    let builder = IndexBuilder::new(
        settings.embedding_provider()?,
        Arc::new(FsIndexStorage::new(&settings.storage_dir)),
        settings.rag.clone(),
    );

    if let Some(id) = collection {
        let dir = source
            .collection(id)?
            .with_context(|| format!("no collection '{id}' under {}", source.root().display()))?;
        let report = builder
            .build_collection(&source, &dir)
            .await
            .with_context(|| format!("failed to build collection '{}'", dir.id))?;
        print_report(&report);
        return Ok(());
    }

    let summary = builder.build_all(&source).await?;
    for report in &summary.built {
        print_report(report);
    }
    for (collection, reason) in &summary.failed {
        println!("{collection}: FAILED ({reason})");
    }
    info!(built = summary.built.len(), failed = summary.failed.len(), "ingestion finished");

    if summary.built.is_empty() && !summary.failed.is_empty() {
        bail!("no collection could be built");
    }
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!(
        "{}: {} documents, {} chunks indexed ({} skipped), {} unreadable documents",
        report.collection,
        report.documents,
        report.chunks_indexed,
        report.chunks_skipped,
        report.skipped_documents
    );
}
