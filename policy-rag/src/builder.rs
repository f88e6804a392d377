//! Offline index building: chunk, embed, persist.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::chunking::{Chunker, FixedSizeChunker};
use crate::config::RagConfig;
use crate::document::{Document, Passage, TextSpan};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{CollectionIndex, IndexManifest};
use crate::loader::{CollectionDir, DocumentSource};
use crate::storage::{IndexStorage, is_valid_collection_name};

/// What a collection build did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// The collection that was built.
    pub collection: String,
    /// Documents that produced at least one chunk.
    pub documents: usize,
    /// Documents that could not be read.
    pub skipped_documents: usize,
    /// Chunks embedded and indexed.
    pub chunks_indexed: usize,
    /// Chunks dropped because their embedding failed.
    pub chunks_skipped: usize,
}

/// Outcome of building every collection under a document root.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Collections that were rebuilt.
    pub built: Vec<BuildReport>,
    /// Collections whose build failed, with the reason. Their previous index
    /// is untouched.
    pub failed: Vec<(String, String)>,
}

struct PendingChunk<'a> {
    document: &'a str,
    span: TextSpan,
}

/// Builds one [`CollectionIndex`] per collection and persists it.
///
/// Chunks whose embedding fails, or comes back with the wrong dimensionality,
/// are skipped and logged. A build fails only when no chunk at all could be
/// embedded, in which case nothing is written.
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    storage: Arc<dyn IndexStorage>,
    chunker: FixedSizeChunker,
    config: RagConfig,
}

impl IndexBuilder {
    /// Create a builder. Chunking parameters come from `config`.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        storage: Arc<dyn IndexStorage>,
        config: RagConfig,
    ) -> Self {
        let chunker = FixedSizeChunker::new(config.chunk_size, config.chunk_overlap);
        Self { embedder, storage, chunker, config }
    }

    /// Build and persist the index of `collection` from already-read documents.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IngestionError`] if the collection name is unusable
    /// or no chunk could be embedded, and propagates storage failures.
    pub async fn build_documents(&self, collection: &str, documents: &[Document]) -> Result<BuildReport> {
        if !is_valid_collection_name(collection) {
            return Err(RagError::IngestionError {
                collection: collection.to_string(),
                message: "invalid collection name".to_string(),
            });
        }

        let mut pending = Vec::new();
        let mut documents_with_text = 0;
        for document in documents {
            let spans = self.chunker.chunk(&document.text);
            if !spans.is_empty() {
                documents_with_text += 1;
            }
            pending.extend(spans.into_iter().map(|span| PendingChunk { document: &document.name, span }));
        }

        let dimensions = self.embedder.dimensions();
        let vectors = self.embed_all(collection, &pending).await;

        let mut passages = Vec::new();
        let mut kept_vectors = Vec::new();
        let mut chunks_skipped = 0;
        for (chunk, vector) in pending.iter().zip(vectors) {
            match vector {
                Some(vector) if vector.len() == dimensions => {
                    passages.push(Passage {
                        collection: collection.to_string(),
                        source_document: chunk.document.to_string(),
                        sequence: passages.len(),
                        chunk_index: chunk.span.index,
                        char_start: chunk.span.char_start,
                        text: chunk.span.text.clone(),
                    });
                    kept_vectors.push(vector);
                }
                Some(vector) => {
                    warn!(
                        collection,
                        document = chunk.document,
                        chunk_index = chunk.span.index,
                        expected = dimensions,
                        actual = vector.len(),
                        "skipping chunk with wrong embedding dimensions"
                    );
                    chunks_skipped += 1;
                }
                None => chunks_skipped += 1,
            }
        }

        if passages.is_empty() {
            error!(collection, chunk_count = pending.len(), "no chunk could be indexed; keeping previous index");
            return Err(RagError::IngestionError {
                collection: collection.to_string(),
                message: format!("none of {} chunks could be embedded", pending.len()),
            });
        }

        let manifest = IndexManifest {
            collection: collection.to_string(),
            embedding_model: self.embedder.model_id(),
            dimensions,
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
            built_at: Utc::now(),
        };
        let index = CollectionIndex::new(manifest, passages, kept_vectors)?;
        self.storage.save(&index).await.map_err(|e| {
            error!(collection, error = %e, "failed to persist index");
            e
        })?;

        let report = BuildReport {
            collection: collection.to_string(),
            documents: documents_with_text,
            skipped_documents: 0,
            chunks_indexed: index.len(),
            chunks_skipped,
        };
        info!(
            collection,
            documents = report.documents,
            chunk_count = report.chunks_indexed,
            chunks_skipped,
            "built index"
        );
        Ok(report)
    }

    /// Embed every pending chunk in batches.
    ///
    /// A failed batch is retried one chunk at a time so a single bad chunk
    /// does not sink its neighbors. `None` marks a chunk that failed alone.
    async fn embed_all(&self, collection: &str, pending: &[PendingChunk<'_>]) -> Vec<Option<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(pending.len());
        for batch in pending.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<&str> = batch.iter().map(|c| c.span.text.as_str()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(batch_vectors) if batch_vectors.len() == texts.len() => {
                    vectors.extend(batch_vectors.into_iter().map(Some));
                    continue;
                }
                Ok(batch_vectors) => warn!(
                    collection,
                    expected = texts.len(),
                    actual = batch_vectors.len(),
                    "embedding batch returned wrong count; embedding chunks one by one"
                ),
                Err(e) => warn!(collection, error = %e, "embedding batch failed; embedding chunks one by one"),
            }

            for chunk in batch {
                match self.embedder.embed(&chunk.span.text).await {
                    Ok(vector) => vectors.push(Some(vector)),
                    Err(e) => {
                        warn!(
                            collection,
                            document = chunk.document,
                            chunk_index = chunk.span.index,
                            error = %e,
                            "skipping chunk whose embedding failed"
                        );
                        vectors.push(None);
                    }
                }
            }
        }
        vectors
    }

    /// Read and build one collection directory.
    ///
    /// # Errors
    ///
    /// As [`build_documents`](Self::build_documents); a collection with no
    /// readable document is an [`RagError::IngestionError`].
    pub async fn build_collection(&self, source: &DocumentSource, dir: &CollectionDir) -> Result<BuildReport> {
        let loaded = {
            let source = source.clone();
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || source.read_documents(&dir))
        }
        .await
        .map_err(|e| RagError::IngestionError {
            collection: dir.id.clone(),
            message: format!("document reader failed: {e}"),
        })?;

        if loaded.documents.is_empty() {
            return Err(RagError::IngestionError {
                collection: dir.id.clone(),
                message: format!("no readable documents in '{}'", dir.path.display()),
            });
        }

        let mut report = self.build_documents(&dir.id, &loaded.documents).await?;
        report.skipped_documents = loaded.skipped.len();
        Ok(report)
    }

    /// Rebuild every collection under `source`.
    ///
    /// A failing collection is logged and recorded; the others still build.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the document root cannot be listed.
    pub async fn build_all(&self, source: &DocumentSource) -> Result<BuildSummary> {
        let mut summary = BuildSummary::default();
        for dir in source.collections()? {
            match self.build_collection(source, &dir).await {
                Ok(report) => summary.built.push(report),
                Err(e) => {
                    error!(collection = %dir.id, error = %e, "collection build failed");
                    summary.failed.push((dir.id, e.to_string()));
                }
            }
        }
        info!(built = summary.built.len(), failed = summary.failed.len(), "finished building indexes");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::inmemory::InMemoryIndexStorage;

    /// Embeds by text length; refuses any chunk containing "poison".
    struct LengthEmbedder {
        batches: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("poison") {
                return Err(RagError::EmbeddingError { provider: "length".into(), message: "rejected".into() });
            }
            Ok(vec![text.chars().count() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if !self.batches {
                return Err(RagError::EmbeddingError { provider: "length".into(), message: "no batching".into() });
            }
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_id(&self) -> String {
            "test/length".into()
        }
    }

    fn config() -> RagConfig {
        RagConfig::builder().chunk_size(10).chunk_overlap(2).embed_batch_size(2).build().unwrap()
    }

    fn document(name: &str, text: &str) -> Document {
        Document { collection: "sbi".into(), name: name.into(), text: text.into() }
    }

    #[tokio::test]
    async fn builds_parallel_metadata_and_vectors() {
        let storage = Arc::new(InMemoryIndexStorage::new());
        let builder = IndexBuilder::new(Arc::new(LengthEmbedder { batches: true }), storage.clone(), config());

        let report = builder
            .build_documents("sbi", &[document("a.txt", "0123456789abcdefgh"), document("b.txt", "short")])
            .await
            .unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks_skipped, 0);

        let index = storage.load("sbi").await.unwrap().unwrap();
        assert_eq!(index.len(), index.passages().len());
        assert_eq!(index.len(), report.chunks_indexed);
        assert_eq!(index.manifest().embedding_model, "test/length");
        assert!(index.passages().iter().enumerate().all(|(i, p)| p.sequence == i));
    }

    #[tokio::test]
    async fn failed_chunks_are_skipped_individually() {
        let storage = Arc::new(InMemoryIndexStorage::new());
        let builder = IndexBuilder::new(Arc::new(LengthEmbedder { batches: true }), storage.clone(), config());

        let report = builder
            .build_documents("sbi", &[document("a.txt", "fine text"), document("b.txt", "poison")])
            .await
            .unwrap();
        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(report.chunks_skipped, 1);
        assert_eq!(storage.load("sbi").await.unwrap().unwrap().passages()[0].source_document, "a.txt");
    }

    #[tokio::test]
    async fn zero_successes_keep_the_previous_index() {
        let storage = Arc::new(InMemoryIndexStorage::new());
        let builder = IndexBuilder::new(Arc::new(LengthEmbedder { batches: false }), storage.clone(), config());

        builder.build_documents("sbi", &[document("a.txt", "original")]).await.unwrap();
        let err = builder.build_documents("sbi", &[document("a.txt", "poison")]).await.unwrap_err();
        assert!(matches!(err, RagError::IngestionError { .. }));

        let index = storage.load("sbi").await.unwrap().unwrap();
        assert_eq!(index.passages()[0].text, "original");
    }

    #[tokio::test]
    async fn builds_collections_from_a_document_tree() {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("SBI")).unwrap();
        std::fs::create_dir_all(data.path().join("empty")).unwrap();
        std::fs::write(data.path().join("SBI/accounts.txt"), "Savings accounts need KYC.").unwrap();

        let storage = Arc::new(InMemoryIndexStorage::new());
        let builder = IndexBuilder::new(Arc::new(LengthEmbedder { batches: true }), storage.clone(), config());
        let summary = builder.build_all(&DocumentSource::new(data.path())).await.unwrap();

        assert_eq!(summary.built.len(), 1);
        assert_eq!(summary.built[0].collection, "sbi");
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "empty");
        assert_eq!(storage.list_collections().await.unwrap(), vec!["sbi"]);
    }
}
