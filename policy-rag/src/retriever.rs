//! Query-time retrieval across collection indexes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::IndexCatalog;
use crate::config::RagConfig;
use crate::document::{COMMON_COLLECTION, RetrievedChunk, is_common};
use crate::embedding::EmbeddingProvider;
use crate::index::{CollectionIndex, Hit};

/// Which collections a query searches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CollectionFilter {
    /// Every built collection, `common` first.
    #[default]
    All,
    /// One bank plus `common`.
    Bank(String),
}

impl CollectionFilter {
    /// Filter for an optional bank id. Blank ids mean [`CollectionFilter::All`].
    pub fn from_bank(bank: Option<&str>) -> Self {
        match bank.map(str::trim) {
            Some(bank) if !bank.is_empty() => Self::Bank(bank.to_lowercase()),
            _ => Self::All,
        }
    }

    /// The selected bank, if any.
    pub fn bank(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Bank(bank) => Some(bank),
        }
    }

    /// Returns `true` if results from `collection` may be returned.
    pub fn admits(&self, collection: &str) -> bool {
        match self {
            Self::All => true,
            Self::Bank(bank) => collection == bank || is_common(collection),
        }
    }

    /// Collections to search, in tie-break order.
    fn search_order(&self, built: &[String]) -> Vec<String> {
        let mut order = Vec::new();
        match self {
            Self::Bank(bank) => {
                order.push(bank.clone());
                if !is_common(bank) {
                    order.push(COMMON_COLLECTION.to_string());
                }
            }
            Self::All => {
                order.push(COMMON_COLLECTION.to_string());
                order.extend(built.iter().filter(|name| !is_common(name)).cloned());
            }
        }
        order.retain(|name| built.contains(name));
        order
    }
}

struct Candidate {
    rank: usize,
    index: Arc<CollectionIndex>,
    hit: Hit,
}

fn by_relevance(a: &Candidate, b: &Candidate) -> Ordering {
    b.hit
        .score
        .partial_cmp(&a.hit.score)
        .unwrap_or(Ordering::Equal)
        .then(a.rank.cmp(&b.rank))
        .then(a.hit.position.cmp(&b.hit.position))
}

/// Embeds queries and searches the selected collection indexes.
///
/// Retrieval never fails: missing or unreadable indexes, indexes built with a
/// different embedder, and query embedding failures are logged and contribute
/// no results.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    catalog: Arc<IndexCatalog>,
    config: RagConfig,
}

impl Retriever {
    /// Create a retriever over `catalog`, embedding queries with `embedder`.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        catalog: Arc<IndexCatalog>,
        config: RagConfig,
    ) -> Self {
        Self { embedder, catalog, config }
    }

    /// The catalog searched by this retriever.
    pub fn catalog(&self) -> &Arc<IndexCatalog> {
        &self.catalog
    }

    /// Retrieve the most relevant passages for `query`.
    ///
    /// Each searched index contributes at most `top_k_per_index` hits
    /// (defaulting to the configured value). The union is ordered by
    /// descending score, ties broken by collection search order and then by
    /// sequence, and cut to the configured `top_n`.
    pub async fn retrieve(
        &self,
        query: &str,
        filter: &CollectionFilter,
        top_k_per_index: Option<usize>,
    ) -> Vec<RetrievedChunk> {
        let top_k = top_k_per_index.filter(|k| *k > 0).unwrap_or(self.config.top_k_per_index);
        let order = filter.search_order(&self.catalog.collections().await);
        if order.is_empty() {
            info!(filter = ?filter, "no built collections to search");
            return Vec::new();
        }

        let query_vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "query embedding failed; returning no results");
                return Vec::new();
            }
        };

        let model_id = self.embedder.model_id();
        let dimensions = self.embedder.dimensions();

        let mut candidates = Vec::new();
        for (rank, collection) in order.iter().enumerate() {
            let Some(index) = self.catalog.get(collection).await else { continue };
            if let Err(e) = index.check_embedder(&model_id, dimensions) {
                warn!(collection = %collection, error = %e, "skipping index built with another embedder");
                continue;
            }
            let hits = index.search(&query_vector, top_k);
            debug!(collection = %collection, hits = hits.len(), "searched index");
            candidates.extend(hits.into_iter().map(|hit| Candidate {
                rank,
                index: Arc::clone(&index),
                hit,
            }));
        }

        if matches!(filter, CollectionFilter::All) {
            candidates = self.cap_banks(candidates);
        }

        candidates.sort_by(by_relevance);
        candidates.truncate(self.config.top_n);

        let chunks: Vec<RetrievedChunk> = candidates.into_iter().filter_map(|c| self.to_chunk(&c)).collect();
        info!(chunk_count = chunks.len(), filter = ?filter, "retrieval completed");
        chunks
    }

    /// Keep `common` hits plus the hits of the best-scoring banks.
    fn cap_banks(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut best: HashMap<usize, f32> = HashMap::new();
        for candidate in candidates.iter().filter(|c| !is_common(c.index.collection())) {
            let entry = best.entry(candidate.rank).or_insert(f32::NEG_INFINITY);
            *entry = entry.max(candidate.hit.score);
        }

        let mut banks: Vec<(usize, f32)> = best.into_iter().collect();
        banks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        banks.truncate(self.config.max_banks_unfiltered);

        candidates
            .into_iter()
            .filter(|c| is_common(c.index.collection()) || banks.iter().any(|(rank, _)| *rank == c.rank))
            .collect()
    }

    fn to_chunk(&self, candidate: &Candidate) -> Option<RetrievedChunk> {
        let passage = candidate.index.passages().get(candidate.hit.position)?;
        let text = if self.config.merge_neighbors {
            candidate.index.stitched_text(candidate.hit.position)?
        } else {
            passage.text.clone()
        };
        Some(RetrievedChunk {
            collection: passage.collection.clone(),
            source_document: passage.source_document.clone(),
            text,
            score: candidate.hit.score,
            sequence: passage.sequence,
        })
    }
}
