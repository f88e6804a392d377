//! Durable storage for collection indexes.
//!
//! [`FsIndexStorage`] keeps one file per collection at
//! `<root>/<collection>/index.json`, holding the manifest, the passage
//! metadata, and the vectors together. A save writes a temporary file in the
//! same directory and renames it over the previous index, so a reader sees
//! either the old complete index or the new complete index.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::index::CollectionIndex;

const INDEX_FILE: &str = "index.json";

/// A storage backend for persisted [`CollectionIndex`]es.
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// Persist an index, fully replacing any previous index of the collection.
    async fn save(&self, index: &CollectionIndex) -> Result<()>;

    /// Load a collection's index, or `None` if it has never been built.
    async fn load(&self, collection: &str) -> Result<Option<CollectionIndex>>;

    /// Names of all collections with a persisted index, sorted ascending.
    async fn list_collections(&self) -> Result<Vec<String>>;
}

/// Returns `true` if `name` is usable as a collection id.
///
/// Collection ids become directory names, so path separators, `..`, and
/// hidden names are rejected.
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Filesystem-backed [`IndexStorage`].
#[derive(Debug, Clone)]
pub struct FsIndexStorage {
    root: PathBuf,
}

impl FsIndexStorage {
    /// Create a storage rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self, collection: &str) -> PathBuf {
        self.root.join(collection).join(INDEX_FILE)
    }

    fn storage_error(message: String) -> RagError {
        RagError::StorageError { backend: "fs".to_string(), message }
    }
}

#[async_trait]
impl IndexStorage for FsIndexStorage {
    async fn save(&self, index: &CollectionIndex) -> Result<()> {
        let collection = index.collection();
        if !is_valid_collection_name(collection) {
            return Err(Self::storage_error(format!("invalid collection name '{collection}'")));
        }

        let dir = self.root.join(collection);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Self::storage_error(format!("failed to create '{}': {e}", dir.display()))
        })?;

        let bytes = serde_json::to_vec(index)
            .map_err(|e| Self::storage_error(format!("failed to serialize '{collection}': {e}")))?;

        let tmp_path = dir.join(format!(".{INDEX_FILE}.{}.tmp", Uuid::new_v4()));
        let final_path = self.index_path(collection);

        if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Self::storage_error(format!(
                "failed to write '{}': {e}",
                tmp_path.display()
            )));
        }

        // Atomic swap
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Self::storage_error(format!(
                "failed to replace '{}': {e}",
                final_path.display()
            )));
        }

        info!(collection, passages = index.len(), path = %final_path.display(), "saved index");
        Ok(())
    }

    async fn load(&self, collection: &str) -> Result<Option<CollectionIndex>> {
        if !is_valid_collection_name(collection) {
            return Ok(None);
        }

        let path = self.index_path(collection);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(collection, "no persisted index");
                return Ok(None);
            }
            Err(e) => {
                return Err(Self::storage_error(format!(
                    "failed to read '{}': {e}",
                    path.display()
                )));
            }
        };

        let index: CollectionIndex = serde_json::from_slice(&bytes).map_err(|e| {
            Self::storage_error(format!("corrupt index '{}': {e}", path.display()))
        })?;
        if index.collection() != collection {
            return Err(Self::storage_error(format!(
                "index at '{}' belongs to collection '{}'",
                path.display(),
                index.collection()
            )));
        }
        Ok(Some(index))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Self::storage_error(format!(
                    "failed to list '{}': {e}",
                    self.root.display()
                )));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::storage_error(format!("failed to list storage: {e}")))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
            if is_valid_collection_name(&name) && entry.path().join(INDEX_FILE).is_file() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::document::Passage;
    use crate::index::IndexManifest;

    fn sample_index(collection: &str, texts: &[&str]) -> CollectionIndex {
        let passages = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Passage {
                collection: collection.into(),
                source_document: "policy.pdf".into(),
                sequence: i,
                chunk_index: i,
                char_start: i * 10,
                text: text.to_string(),
            })
            .collect();
        let vectors = texts.iter().map(|_| vec![1.0, 0.0]).collect();
        let manifest = IndexManifest {
            collection: collection.into(),
            embedding_model: "test/embedder".into(),
            dimensions: 2,
            chunk_size: 10,
            chunk_overlap: 2,
            built_at: Utc::now(),
        };
        CollectionIndex::new(manifest, passages, vectors).unwrap()
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let storage = FsIndexStorage::new(temp.path());

        let index = sample_index("hdfc", &["first", "second"]);
        storage.save(&index).await.unwrap();

        let loaded = storage.load("hdfc").await.unwrap().unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.passages().len(), loaded.len());
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_index_without_leftovers() {
        let temp = tempfile::tempdir().unwrap();
        let storage = FsIndexStorage::new(temp.path());

        storage.save(&sample_index("sbi", &["old", "old", "old"])).await.unwrap();
        storage.save(&sample_index("sbi", &["new"])).await.unwrap();

        let loaded = storage.load("sbi").await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.passages()[0].text, "new");

        let files: Vec<_> = std::fs::read_dir(temp.path().join("sbi")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn missing_collection_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let storage = FsIndexStorage::new(temp.path().join("never-created"));
        assert!(storage.load("axis").await.unwrap().is_none());
        assert!(storage.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_only_built_collections() {
        let temp = tempfile::tempdir().unwrap();
        let storage = FsIndexStorage::new(temp.path());
        storage.save(&sample_index("sbi", &["a"])).await.unwrap();
        storage.save(&sample_index("common", &["b"])).await.unwrap();
        std::fs::create_dir_all(temp.path().join("empty")).unwrap();

        assert_eq!(storage.list_collections().await.unwrap(), vec!["common", "sbi"]);
    }

    #[tokio::test]
    async fn corrupt_index_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("icici")).unwrap();
        std::fs::write(temp.path().join("icici/index.json"), b"{\"manifest\":").unwrap();

        let storage = FsIndexStorage::new(temp.path());
        assert!(matches!(storage.load("icici").await, Err(RagError::StorageError { .. })));
    }

    #[tokio::test]
    async fn path_like_names_are_never_read() {
        let temp = tempfile::tempdir().unwrap();
        let storage = FsIndexStorage::new(temp.path());
        assert!(storage.load("../etc").await.unwrap().is_none());
        assert!(!is_valid_collection_name(".hidden"));
        assert!(is_valid_collection_name("kotak_mahindra-2"));
    }
}
