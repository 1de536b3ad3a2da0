//! Hybrid search combining BM25 keyword matching with vector similarity.
//!
//! Both rankers over-fetch `2k` candidates. Each result set is min-max
//! normalized on its own, then fused as
//! `bm25_weight * bm25 + vector_weight * vector`. A document found by only one
//! ranker gets 0 for the other signal.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::memory::core::config::SearchConfig;
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::embedding::embedder::{Embedder, check_dims, embed_checked};
use crate::memory::retrieval::bm25::Bm25Index;
use crate::memory::retrieval::ranking::normalize_min_max;
use crate::memory::storage::record_store::{RecordWrite, SqliteRecordStore, decode_records};
use crate::memory::storage::vector_index::VectorIndex;

const TABLE: &str = "documents";

/// A searchable document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Caller-chosen identifier.
    pub id: String,
    /// Text indexed by both rankers.
    pub content: String,
    /// Flat metadata returned with hits.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl IndexedDocument {
    /// Document without metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result from hybrid search with the score breakdown.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HybridSearchResult {
    /// Document identifier.
    pub id: String,
    /// Document text.
    pub content: String,
    /// Document metadata.
    pub metadata: BTreeMap<String, String>,
    /// Normalized BM25 score (0 when the lexical ranker missed it).
    pub bm25_score: f64,
    /// Normalized vector score (0 when the vector ranker missed it).
    pub vector_score: f64,
    /// Fused score.
    pub combined_score: f64,
}

/// Index statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchStats {
    /// Indexed documents.
    pub documents: usize,
    /// Distinct BM25 terms.
    pub vocabulary_size: usize,
    /// Average document length in tokens.
    pub average_length: f64,
    /// Lexical weight.
    pub bm25_weight: f64,
    /// Vector weight.
    pub vector_weight: f64,
}

#[derive(Default)]
struct SearchState {
    documents: BTreeMap<String, IndexedDocument>,
    bm25: Bm25Index,
    vectors: VectorIndex,
}

impl SearchState {
    fn refit(&mut self) {
        self.bm25.fit(
            self.documents
                .values()
                .map(|doc| (doc.id.as_str(), doc.content.as_str())),
        );
    }
}

/// Hybrid searcher combining keyword and vector search.
pub struct HybridSearchEngine {
    records: SqliteRecordStore,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
    state: RwLock<SearchState>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl HybridSearchEngine {
    /// Open the engine stored under `dir`, rebuilding both indices from disk.
    ///
    /// # Errors
    /// Returns an error if the store cannot be opened or the config is invalid.
    pub async fn open(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> MemoryResult<Self> {
        let capacity = NonZeroUsize::new(config.query_cache_capacity).ok_or_else(|| {
            MemoryError::InvalidConfig("search.query_cache_capacity must be > 0".to_string())
        })?;
        let records = SqliteRecordStore::open(&dir.join("search.sqlite"), TABLE).await?;
        let rows = records.load_all().await?;

        let mut state = SearchState {
            bm25: Bm25Index::new(config.k1, config.b),
            ..SearchState::default()
        };
        for (doc, vector) in decode_records::<IndexedDocument>(rows, embedder.ndims(), TABLE) {
            state.vectors.insert(doc.id.clone(), vector);
            state.documents.insert(doc.id.clone(), doc);
        }
        state.refit();
        info!(documents = state.documents.len(), "Hybrid search index loaded");

        Ok(Self {
            records,
            embedder,
            config,
            state: RwLock::new(state),
            query_cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Index (or replace) one document and refit BM25.
    ///
    /// # Errors
    /// Returns an error if embedding or persistence fails; nothing changes in that case.
    pub async fn index(&self, document: IndexedDocument) -> MemoryResult<()> {
        self.index_batch(vec![document]).await
    }

    /// Index several documents with one embedding call and one transaction, then refit once.
    ///
    /// # Errors
    /// Returns an error if embedding or persistence fails; nothing changes in that case.
    pub async fn index_batch(&self, documents: Vec<IndexedDocument>) -> MemoryResult<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let texts = documents.iter().map(|doc| doc.content.clone()).collect();
        let vectors = self.embedder.embed_texts(texts).await?;
        if vectors.len() != documents.len() {
            return Err(MemoryError::invalid_input(format!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                documents.len()
            )));
        }
        for vector in &vectors {
            check_dims(self.embedder.ndims(), vector)?;
        }

        let mut writes = Vec::with_capacity(documents.len());
        for (doc, vector) in documents.iter().zip(&vectors) {
            writes.push(RecordWrite::with_embedding(
                doc.id.clone(),
                serde_json::to_string(doc)?,
                vector.clone(),
            ));
        }

        let mut state = self.state.write().await;
        self.records.write_batch(writes).await?;
        let count = documents.len();
        for (doc, vector) in documents.into_iter().zip(vectors) {
            state.vectors.insert(doc.id.clone(), vector);
            state.documents.insert(doc.id.clone(), doc);
        }
        state.refit();
        debug!(count, total = state.documents.len(), "Indexed documents");
        Ok(())
    }

    /// Remove a document and refit BM25. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn remove(&self, id: &str) -> MemoryResult<bool> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(id) {
            return Ok(false);
        }
        self.records.delete(id).await?;
        state.documents.remove(id);
        state.vectors.remove(id);
        state.refit();
        Ok(true)
    }

    /// Make the index hold exactly `documents`: stale ids are removed, the rest upserted.
    ///
    /// Returns the number of stale documents removed.
    ///
    /// # Errors
    /// Returns an error if embedding or persistence fails.
    pub async fn replace_all(&self, documents: Vec<IndexedDocument>) -> MemoryResult<usize> {
        let stale: Vec<String> = {
            let keep: BTreeSet<&str> = documents.iter().map(|doc| doc.id.as_str()).collect();
            let state = self.state.read().await;
            state
                .documents
                .keys()
                .filter(|id| !keep.contains(id.as_str()))
                .cloned()
                .collect()
        };
        self.index_batch(documents).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        self.records.delete_many(stale.clone()).await?;
        for id in &stale {
            state.documents.remove(id);
            state.vectors.remove(id);
        }
        state.refit();
        Ok(stale.len())
    }

    /// Fetch a document by id.
    pub async fn get(&self, id: &str) -> Option<IndexedDocument> {
        self.state.read().await.documents.get(id).cloned()
    }

    /// Search with the configured `min_score` floor.
    ///
    /// # Errors
    /// Returns an error if the query cannot be embedded.
    pub async fn search(&self, query: &str, k: usize) -> MemoryResult<Vec<HybridSearchResult>> {
        self.search_with_floor(query, k, self.config.min_score).await
    }

    /// Search, dropping results whose fused score is below `min_score`.
    ///
    /// # Errors
    /// Returns an error if the query cannot be embedded.
    pub async fn search_with_floor(
        &self,
        query: &str,
        k: usize,
        min_score: f64,
    ) -> MemoryResult<Vec<HybridSearchResult>> {
        if k == 0 || self.state.read().await.documents.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.query_embedding(query).await?;
        let fetch = k.saturating_mul(2);

        let state = self.state.read().await;
        let lexical = state.bm25.search(query, fetch);
        let semantic: Vec<(String, f64)> = state
            .vectors
            .nearest(&query_vector, fetch, |_| true)
            .into_iter()
            .map(|hit| (hit.id, hit.similarity))
            .collect();

        let lexical_norm = normalize_min_max(&lexical);
        let semantic_norm = normalize_min_max(&semantic);
        let candidates: BTreeSet<&String> = lexical_norm.keys().chain(semantic_norm.keys()).collect();

        let mut results: Vec<HybridSearchResult> = candidates
            .into_iter()
            .filter_map(|id| {
                let doc = state.documents.get(id)?;
                let bm25_score = lexical_norm.get(id).copied().unwrap_or(0.0);
                let vector_score = semantic_norm.get(id).copied().unwrap_or(0.0);
                let combined_score = self
                    .config
                    .bm25_weight
                    .mul_add(bm25_score, self.config.vector_weight * vector_score);
                Some(HybridSearchResult {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    metadata: doc.metadata.clone(),
                    bm25_score,
                    vector_score,
                    combined_score,
                })
            })
            .filter(|result| result.combined_score >= min_score)
            .collect();

        results.sort_by(|a, b| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(k);
        Ok(results)
    }

    /// Index statistics.
    pub async fn stats(&self) -> SearchStats {
        let state = self.state.read().await;
        SearchStats {
            documents: state.documents.len(),
            vocabulary_size: state.bm25.vocabulary_size(),
            average_length: state.bm25.average_length(),
            bm25_weight: self.config.bm25_weight,
            vector_weight: self.config.vector_weight,
        }
    }

    async fn query_embedding(&self, query: &str) -> MemoryResult<Vec<f32>> {
        if let Some(vector) = self.query_cache.lock().await.get(query) {
            return Ok(vector.clone());
        }
        let vector = embed_checked(self.embedder.as_ref(), query).await?;
        self.query_cache
            .lock()
            .await
            .put(query.to_string(), vector.clone());
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embedding::hashing::HashingEmbedder;

    async fn engine(dir: &Path, config: SearchConfig) -> HybridSearchEngine {
        HybridSearchEngine::open(dir, Arc::new(HashingEmbedder::new(128)), config)
            .await
            .unwrap()
    }

    fn docs() -> Vec<IndexedDocument> {
        vec![
            IndexedDocument::new("d1", "docker compose up starts every container")
                .with_meta("type", "episode"),
            IndexedDocument::new("d2", "rust borrow checker rejects aliasing"),
            IndexedDocument::new("d3", "install docker engine on debian"),
        ]
    }

    #[tokio::test]
    async fn test_search_ranks_lexical_and_vector_matches() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), SearchConfig::default()).await;
        engine.index_batch(docs()).await.unwrap();

        let results = engine.search("docker compose", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "d1");
        assert_eq!(results[0].metadata.get("type").map(String::as_str), Some("episode"));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.combined_score)));
        assert!(results[0].combined_score >= results[1].combined_score);
    }

    #[tokio::test]
    async fn test_missing_signal_scores_zero_not_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let config = SearchConfig {
            bm25_weight: 1.0,
            vector_weight: 0.0,
            ..SearchConfig::default()
        };
        let engine = engine(dir.path(), config).await;
        engine.index_batch(docs()).await.unwrap();

        let results = engine.search_with_floor("debian", 3, 0.0).await.unwrap();
        let d3 = results.iter().find(|r| r.id == "d3").unwrap();
        assert!((d3.bm25_score - 1.0).abs() < 1e-12);
        for other in results.iter().filter(|r| r.id != "d3") {
            assert!(other.bm25_score.abs() < 1e-12);
        }

        let floored = engine.search_with_floor("debian", 3, 0.5).await.unwrap();
        assert_eq!(floored.len(), 1);
        assert_eq!(floored[0].id, "d3");
    }

    #[tokio::test]
    async fn test_state_survives_reopen_and_remove_refits() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine(dir.path(), SearchConfig::default()).await;
            engine.index_batch(docs()).await.unwrap();
        }
        let engine = engine(dir.path(), SearchConfig::default()).await;
        assert_eq!(engine.stats().await.documents, 3);
        assert!(engine.get("d2").await.is_some());

        assert!(engine.remove("d3").await.unwrap());
        assert!(!engine.remove("d3").await.unwrap());
        let results = engine.search_with_floor("debian", 5, 0.0).await.unwrap();
        assert!(results.iter().all(|r| r.id != "d3"));
    }

    #[tokio::test]
    async fn test_replace_all_drops_stale_documents() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), SearchConfig::default()).await;
        engine.index_batch(docs()).await.unwrap();
        let removed = engine
            .replace_all(vec![IndexedDocument::new("d9", "fresh document")])
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(engine.stats().await.documents, 1);
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), SearchConfig::default()).await;
        assert!(engine.search("anything", 5).await.unwrap().is_empty());
    }
}
