//! In-memory index storage.
//!
//! This module provides [`InMemoryIndexStorage`], an [`IndexStorage`] backed by
//! a `HashMap` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and deployments that rebuild indexes at start-up.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RagError, Result};
use crate::index::CollectionIndex;
use crate::storage::{IndexStorage, is_valid_collection_name};

/// An in-memory [`IndexStorage`].
///
/// A save replaces the whole entry under the write lock, so concurrent loads
/// observe either the previous or the new index.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::{InMemoryIndexStorage, IndexStorage};
///
/// let storage = InMemoryIndexStorage::new();
/// storage.save(&index).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryIndexStorage {
    indexes: RwLock<HashMap<String, CollectionIndex>>,
}

impl InMemoryIndexStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStorage for InMemoryIndexStorage {
    async fn save(&self, index: &CollectionIndex) -> Result<()> {
        if !is_valid_collection_name(index.collection()) {
            return Err(RagError::StorageError {
                backend: "InMemory".to_string(),
                message: format!("invalid collection name '{}'", index.collection()),
            });
        }
        let mut indexes = self.indexes.write().await;
        indexes.insert(index.collection().to_string(), index.clone());
        Ok(())
    }

    async fn load(&self, collection: &str) -> Result<Option<CollectionIndex>> {
        let indexes = self.indexes.read().await;
        Ok(indexes.get(collection).cloned())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let indexes = self.indexes.read().await;
        let mut names: Vec<String> = indexes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
