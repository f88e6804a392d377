//! Read-side cache of collection indexes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::document::is_common;
use crate::error::Result;
use crate::index::CollectionIndex;
use crate::storage::IndexStorage;

/// Lazily loads collection indexes from an [`IndexStorage`] and shares them
/// read-only.
///
/// Indexes are handed out as `Arc<CollectionIndex>`, so searches never hold
/// the catalog lock. [`reload`](IndexCatalog::reload) swaps the whole map at
/// once: in-flight queries keep the index they already hold, new queries see
/// the rebuilt one.
pub struct IndexCatalog {
    storage: Arc<dyn IndexStorage>,
    loaded: RwLock<HashMap<String, Arc<CollectionIndex>>>,
}

impl IndexCatalog {
    /// Create a catalog over `storage`. Nothing is loaded until first use.
    pub fn new(storage: Arc<dyn IndexStorage>) -> Self {
        Self { storage, loaded: RwLock::new(HashMap::new()) }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Arc<dyn IndexStorage> {
        &self.storage
    }

    /// Names of all built collections, sorted ascending.
    ///
    /// A storage failure is logged and reported as no collections.
    pub async fn collections(&self) -> Vec<String> {
        match self.storage.list_collections().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "failed to list collections");
                Vec::new()
            }
        }
    }

    /// Names of built bank collections (everything except `common`).
    pub async fn available_banks(&self) -> Vec<String> {
        self.collections().await.into_iter().filter(|name| !is_common(name)).collect()
    }

    /// Get a collection's index, loading it on first use.
    ///
    /// Returns `None` when the collection has no index or its index cannot be
    /// read; the latter is logged.
    pub async fn get(&self, collection: &str) -> Option<Arc<CollectionIndex>> {
        if let Some(index) = self.loaded.read().await.get(collection) {
            return Some(Arc::clone(index));
        }

        let index = match self.storage.load(collection).await {
            Ok(Some(index)) => Arc::new(index),
            Ok(None) => return None,
            Err(e) => {
                warn!(collection, error = %e, "skipping unreadable index");
                return None;
            }
        };

        let mut loaded = self.loaded.write().await;
        let entry = loaded.entry(collection.to_string()).or_insert(index);
        info!(collection, passages = entry.len(), "loaded index");
        Some(Arc::clone(entry))
    }

    /// Re-read every collection from storage and atomically replace the cache.
    ///
    /// Returns the names of the collections now loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the collections cannot be listed; the current cache
    /// is kept in that case.
    pub async fn reload(&self) -> Result<Vec<String>> {
        let names = self.storage.list_collections().await?;
        let loads = join_all(names.iter().map(|name| self.storage.load(name))).await;

        let mut fresh = HashMap::with_capacity(names.len());
        for (name, loaded) in names.into_iter().zip(loads) {
            match loaded {
                Ok(Some(index)) => {
                    fresh.insert(name, Arc::new(index));
                }
                Ok(None) => {}
                Err(e) => warn!(collection = %name, error = %e, "skipping unreadable index"),
            }
        }

        let mut loaded_names: Vec<String> = fresh.keys().cloned().collect();
        loaded_names.sort();
        *self.loaded.write().await = fresh;
        info!(collections = ?loaded_names, "reloaded indexes");
        Ok(loaded_names)
    }
}
