//! Knowledge graph of subject-predicate-object triples.
//!
//! Triples persist in `SQLite` with their embeddings. Three in-memory indices
//! (subject, predicate, object, all case-folded) map to triple ids.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::memory::core::config::KnowledgeConfig;
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::ids::{EpisodeId, TripleId};
use crate::memory::core::triple::KnowledgeTriple;
use crate::memory::embedding::embedder::{Embedder, embed_checked};
use crate::memory::graph::extraction::TripleExtractor;
use crate::memory::storage::record_store::{RecordWrite, SqliteRecordStore, decode_records};
use crate::memory::storage::vector_index::VectorIndex;

const TABLE: &str = "triples";

/// Which edges of an entity to return.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// Triples where the entity is the subject.
    Outgoing,
    /// Triples where the entity is the object.
    Incoming,
    #[default]
    Both,
}

/// A triple with its similarity to a query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredTriple {
    /// Matching triple.
    pub triple: KnowledgeTriple,
    /// Cosine similarity to the query in `[0, 1]`.
    pub similarity: f64,
}

/// Graph statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphStats {
    /// Stored triples.
    pub total_triples: usize,
    /// Distinct subjects and objects.
    pub unique_entities: usize,
    /// Distinct predicates.
    pub unique_predicates: usize,
    /// Up to five most used predicates with their counts.
    pub top_predicates: Vec<(String, usize)>,
}

#[derive(Default)]
struct GraphState {
    triples: HashMap<String, KnowledgeTriple>,
    by_subject: HashMap<String, Vec<TripleId>>,
    by_predicate: HashMap<String, Vec<TripleId>>,
    by_object: HashMap<String, Vec<TripleId>>,
    vectors: VectorIndex,
}

fn index_add(index: &mut HashMap<String, Vec<TripleId>>, key: &str, id: &TripleId) {
    let ids = index.entry(key.to_lowercase()).or_default();
    if !ids.contains(id) {
        ids.push(id.clone());
    }
}

fn index_remove(index: &mut HashMap<String, Vec<TripleId>>, key: &str, id: &TripleId) {
    let key = key.to_lowercase();
    if let Some(ids) = index.get_mut(&key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(&key);
        }
    }
}

impl GraphState {
    fn put(&mut self, triple: KnowledgeTriple) {
        index_add(&mut self.by_subject, &triple.subject, &triple.id);
        index_add(&mut self.by_predicate, &triple.predicate, &triple.id);
        index_add(&mut self.by_object, &triple.object, &triple.id);
        self.triples.insert(triple.id.to_string(), triple);
    }

    fn take(&mut self, id: &TripleId) -> Option<KnowledgeTriple> {
        let triple = self.triples.remove(id.as_str())?;
        index_remove(&mut self.by_subject, &triple.subject, id);
        index_remove(&mut self.by_predicate, &triple.predicate, id);
        index_remove(&mut self.by_object, &triple.object, id);
        self.vectors.remove(id.as_str());
        Some(triple)
    }

    fn materialize(&self, ids: Option<&Vec<TripleId>>) -> Vec<KnowledgeTriple> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.triples.get(id.as_str()).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    fn outgoing(&self, entity: &str) -> Vec<KnowledgeTriple> {
        self.materialize(self.by_subject.get(&entity.to_lowercase()))
    }
}

/// Graph of relational facts.
pub struct KnowledgeGraph {
    records: SqliteRecordStore,
    embedder: Arc<dyn Embedder>,
    config: KnowledgeConfig,
    extractor: TripleExtractor,
    state: RwLock<GraphState>,
}

impl KnowledgeGraph {
    /// Open the graph under `dir`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or read.
    pub async fn open(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        config: KnowledgeConfig,
    ) -> MemoryResult<Self> {
        let records = SqliteRecordStore::open(&dir.join("knowledge.sqlite"), TABLE).await?;
        let rows = records.load_all().await?;
        let mut state = GraphState::default();
        for (triple, vector) in decode_records::<KnowledgeTriple>(rows, embedder.ndims(), TABLE) {
            state.vectors.insert(triple.id.as_str(), vector);
            state.put(triple);
        }
        info!(triples = state.triples.len(), "Knowledge graph loaded");
        Ok(Self {
            records,
            embedder,
            config,
            extractor: TripleExtractor::new()?,
            state: RwLock::new(state),
        })
    }

    /// Add a triple, or raise the confidence of an identical one.
    ///
    /// Identity ignores case and surrounding whitespace. An existing triple keeps
    /// `max(old, new)` confidence and its id is returned.
    ///
    /// # Errors
    /// Returns an error on invalid input, provider or storage failure.
    pub async fn add_triple(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        confidence: f64,
        source_episode: Option<EpisodeId>,
    ) -> MemoryResult<TripleId> {
        let triple =
            KnowledgeTriple::new(subject, predicate, object, confidence, source_episode, Utc::now())?;

        if self.state.read().await.triples.contains_key(triple.id.as_str()) {
            return self.raise_confidence(&triple.id, confidence).await;
        }

        let vector = embed_checked(self.embedder.as_ref(), &triple.embedding_text()).await?;
        let payload = serde_json::to_string(&triple)?;
        let mut state = self.state.write().await;
        if state.triples.contains_key(triple.id.as_str()) {
            drop(state);
            return self.raise_confidence(&triple.id, confidence).await;
        }
        self.records
            .upsert(triple.id.to_string(), payload, vector.clone())
            .await?;
        let id = triple.id.clone();
        state.vectors.insert(id.as_str(), vector);
        debug!(triple_id = %id, subject = %triple.subject, predicate = %triple.predicate, "Added triple");
        state.put(triple);
        Ok(id)
    }

    async fn raise_confidence(&self, id: &TripleId, confidence: f64) -> MemoryResult<TripleId> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.triples.get(id.as_str()) {
            if confidence > existing.confidence {
                let mut updated = existing.clone();
                updated.confidence = confidence;
                updated.metadata.touch(Utc::now());
                self.records
                    .write_batch(vec![RecordWrite::payload(
                        id.to_string(),
                        serde_json::to_string(&updated)?,
                    )])
                    .await?;
                state.put(updated);
            }
        }
        Ok(id.clone())
    }

    /// Mine triples from free text with the lexical templates.
    ///
    /// Returns the ids of created or reinforced triples, without duplicates.
    ///
    /// # Errors
    /// Returns an error if a triple cannot be stored.
    pub async fn extract_from_text(
        &self,
        text: &str,
        source_episode: Option<&EpisodeId>,
    ) -> MemoryResult<Vec<TripleId>> {
        let mut ids: Vec<TripleId> = Vec::new();
        for candidate in self.extractor.extract(text) {
            let id = self
                .add_triple(
                    &candidate.subject,
                    &candidate.predicate,
                    &candidate.object,
                    self.config.extraction_confidence,
                    source_episode.cloned(),
                )
                .await?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Triples ranked by vector similarity alone.
    ///
    /// # Errors
    /// Returns an error if the query cannot be embedded.
    pub async fn query_semantic(&self, text: &str, k: usize) -> MemoryResult<Vec<ScoredTriple>> {
        if k == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }
        let query_vector = embed_checked(self.embedder.as_ref(), text).await?;
        let state = self.state.read().await;
        Ok(state
            .vectors
            .nearest(&query_vector, k, |_| true)
            .into_iter()
            .filter_map(|hit| {
                state.triples.get(&hit.id).map(|triple| ScoredTriple {
                    triple: triple.clone(),
                    similarity: hit.similarity,
                })
            })
            .collect())
    }

    /// Triples touching `entity`.
    pub async fn relations_of(&self, entity: &str, direction: Direction) -> Vec<KnowledgeTriple> {
        let state = self.state.read().await;
        let key = entity.to_lowercase();
        let mut triples = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            triples.extend(state.materialize(state.by_subject.get(&key)));
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            triples.extend(state.materialize(state.by_object.get(&key)));
        }
        triples
    }

    /// Triples with the given predicate.
    pub async fn by_predicate(&self, predicate: &str) -> Vec<KnowledgeTriple> {
        let state = self.state.read().await;
        state.materialize(state.by_predicate.get(&predicate.to_lowercase()))
    }

    /// Breadth-first expansion over outgoing edges.
    ///
    /// Keys are depths starting at 1. Each entity is expanded at most once.
    pub async fn traverse(
        &self,
        start: &str,
        max_depth: usize,
        predicate: Option<&str>,
    ) -> BTreeMap<usize, Vec<KnowledgeTriple>> {
        let state = self.state.read().await;
        let predicate = predicate.map(str::to_lowercase);
        let mut levels: BTreeMap<usize, Vec<KnowledgeTriple>> = BTreeMap::new();
        let mut visited: HashSet<String> = HashSet::from([start.to_lowercase()]);
        let mut frontier = vec![start.to_string()];

        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for entity in &frontier {
                for triple in state.outgoing(entity) {
                    if predicate
                        .as_deref()
                        .is_some_and(|p| triple.predicate.to_lowercase() != p)
                    {
                        continue;
                    }
                    if visited.insert(triple.object.to_lowercase()) {
                        next.push(triple.object.clone());
                    }
                    levels.entry(depth).or_default().push(triple);
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        levels
    }

    /// First shortest chain of outgoing edges from `source` to `target`.
    ///
    /// `Some(vec![])` when both name the same entity, `None` when no path of at
    /// most `max_depth` edges exists.
    pub async fn shortest_path(
        &self,
        source: &str,
        target: &str,
        max_depth: usize,
    ) -> Option<Vec<KnowledgeTriple>> {
        let target = target.to_lowercase();
        if source.to_lowercase() == target {
            return Some(Vec::new());
        }
        let state = self.state.read().await;
        let mut visited: HashSet<String> = HashSet::from([source.to_lowercase()]);
        let mut queue: VecDeque<(String, Vec<KnowledgeTriple>)> =
            VecDeque::from([(source.to_string(), Vec::new())]);

        while let Some((entity, path)) = queue.pop_front() {
            if path.len() >= max_depth {
                continue;
            }
            for triple in state.outgoing(&entity) {
                let object = triple.object.to_lowercase();
                if object == target {
                    let mut found = path;
                    found.push(triple);
                    return Some(found);
                }
                if visited.insert(object) {
                    let mut extended = path.clone();
                    let next = triple.object.clone();
                    extended.push(triple);
                    queue.push_back((next, extended));
                }
            }
        }
        None
    }

    /// Fetch a triple by id.
    pub async fn get(&self, id: &TripleId) -> Option<KnowledgeTriple> {
        self.state.read().await.triples.get(id.as_str()).cloned()
    }

    /// Remove a triple. Returns `false` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_triple(&self, id: &TripleId) -> MemoryResult<bool> {
        let mut state = self.state.write().await;
        if !state.triples.contains_key(id.as_str()) {
            return Ok(false);
        }
        self.records.delete(id.as_str()).await?;
        state.take(id);
        info!(triple_id = %id, "Deleted triple");
        Ok(true)
    }

    /// Distinct subjects and objects, as stored.
    pub async fn entities(&self) -> BTreeSet<String> {
        let state = self.state.read().await;
        state
            .triples
            .values()
            .flat_map(|t| [t.subject.clone(), t.object.clone()])
            .collect()
    }

    /// Every triple, ordered by subject, predicate and object.
    pub async fn all(&self) -> Vec<KnowledgeTriple> {
        let state = self.state.read().await;
        let mut triples: Vec<KnowledgeTriple> = state.triples.values().cloned().collect();
        triples.sort_by(|a, b| {
            (&a.subject, &a.predicate, &a.object).cmp(&(&b.subject, &b.predicate, &b.object))
        });
        triples
    }

    /// Number of triples.
    pub async fn len(&self) -> usize {
        self.state.read().await.triples.len()
    }

    /// Whether the graph is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Totals and the most frequent predicates.
    pub async fn stats(&self) -> GraphStats {
        let unique_entities = self.entities().await.len();
        let state = self.state.read().await;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for triple in state.triples.values() {
            *counts.entry(triple.predicate.as_str()).or_insert(0) += 1;
        }
        let unique_predicates = counts.len();
        let mut top: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(predicate, count)| (predicate.to_string(), count))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(5);
        GraphStats {
            total_triples: state.triples.len(),
            unique_entities,
            unique_predicates,
            top_predicates: top,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embedding::hashing::HashingEmbedder;
    use crate::memory::embedding::testing::FailingEmbedder;

    async fn graph(dir: &Path) -> KnowledgeGraph {
        KnowledgeGraph::open(dir, Arc::new(HashingEmbedder::new(128)), KnowledgeConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_triple_is_idempotent_with_max_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph(dir.path()).await;
        let first = graph.add_triple("Aura", "uses", "Rust", 0.6, None).await.unwrap();
        let second = graph.add_triple("aura", "USES", "rust ", 0.9, None).await.unwrap();
        let third = graph.add_triple("Aura", "uses", "Rust", 0.3, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(graph.len().await, 1);
        let stored = graph.get(&first).await.unwrap();
        assert!((stored.confidence - 0.9).abs() < 1e-12);
        assert_eq!(stored.subject, "Aura");
    }

    #[tokio::test]
    async fn test_relations_and_predicate_index() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph(dir.path()).await;
        graph.add_triple("Aura", "uses", "Rust", 1.0, None).await.unwrap();
        graph.add_triple("Dev", "likes", "Aura", 1.0, None).await.unwrap();

        assert_eq!(graph.relations_of("aura", Direction::Outgoing).await.len(), 1);
        assert_eq!(graph.relations_of("AURA", Direction::Incoming).await.len(), 1);
        assert_eq!(graph.relations_of("Aura", Direction::Both).await.len(), 2);
        assert_eq!(graph.by_predicate("USES").await[0].object, "Rust");
        assert!(graph.relations_of("nobody", Direction::Both).await.is_empty());
    }

    #[tokio::test]
    async fn test_traverse_handles_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph(dir.path()).await;
        graph.add_triple("a", "to", "b", 1.0, None).await.unwrap();
        graph.add_triple("b", "to", "c", 1.0, None).await.unwrap();
        graph.add_triple("c", "to", "a", 1.0, None).await.unwrap();
        graph.add_triple("a", "other", "z", 1.0, None).await.unwrap();

        let levels = graph.traverse("a", 10, Some("to")).await;
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[&1][0].object, "b");
        assert_eq!(levels[&2][0].object, "c");
        assert_eq!(levels[&3][0].object, "a");

        let unfiltered = graph.traverse("a", 1, None).await;
        assert_eq!(unfiltered[&1].len(), 2);
    }

    #[tokio::test]
    async fn test_shortest_path() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph(dir.path()).await;
        graph.add_triple("a", "to", "b", 1.0, None).await.unwrap();
        graph.add_triple("b", "to", "c", 1.0, None).await.unwrap();
        graph.add_triple("a", "to", "x", 1.0, None).await.unwrap();

        let path = graph.shortest_path("a", "c", 4).await.unwrap();
        let hops: Vec<&str> = path.iter().map(|t| t.object.as_str()).collect();
        assert_eq!(hops, vec!["b", "c"]);
        assert_eq!(graph.shortest_path("A", "a", 4).await, Some(Vec::new()));
        assert_eq!(graph.shortest_path("c", "a", 4).await, None);
        assert_eq!(graph.shortest_path("a", "c", 1).await, None);
    }

    #[tokio::test]
    async fn test_extract_and_semantic_query() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph(dir.path()).await;
        let source = EpisodeId::derive(Utc::now(), "ctx", "act");
        let ids = graph
            .extract_from_text("Aura uses Rust. Aura uses Rust.", Some(&source))
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        let triple = graph.get(&ids[0]).await.unwrap();
        assert!((triple.confidence - 0.7).abs() < 1e-12);
        assert_eq!(triple.source_episode, Some(source));

        let hits = graph.query_semantic("Rust", 3).await.unwrap();
        assert_eq!(hits[0].triple.id, ids[0]);
    }

    #[tokio::test]
    async fn test_delete_reopen_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let keep = {
            let graph = graph(dir.path()).await;
            let keep = graph.add_triple("a", "uses", "b", 1.0, None).await.unwrap();
            graph.add_triple("a", "uses", "c", 1.0, None).await.unwrap();
            let gone = graph.add_triple("c", "has", "d", 1.0, None).await.unwrap();
            assert!(graph.delete_triple(&gone).await.unwrap());
            assert!(!graph.delete_triple(&gone).await.unwrap());
            keep
        };
        let graph = graph(dir.path()).await;
        assert!(graph.get(&keep).await.is_some());
        let stats = graph.stats().await;
        assert_eq!(stats.total_triples, 2);
        assert_eq!(stats.unique_entities, 3);
        assert_eq!(stats.top_predicates, vec![("uses".to_string(), 2)]);
        assert!(graph.relations_of("c", Direction::Outgoing).await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let graph =
            KnowledgeGraph::open(dir.path(), Arc::new(FailingEmbedder::new(8)), KnowledgeConfig::default())
                .await
                .unwrap();
        assert!(graph.add_triple("a", "b", "c", 1.0, None).await.is_err());
        assert!(graph.is_empty().await);
    }
}
