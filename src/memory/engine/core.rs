//! Memory engine orchestration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::memory::consolidation::consolidator::{
    ConsolidationOptions, Consolidator, PatternAnalysis,
};
use crate::memory::consolidation::log::{ConsolidationLog, ConsolidationResult};
use crate::memory::core::config::MemoryConfig;
use crate::memory::core::episode::{Episode, EpisodeDraft};
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{EpisodeId, FactVersionId, SkillId, TripleId};
use crate::memory::core::metadata::MemoryOrigin;
use crate::memory::core::skill::Skill;
use crate::memory::embedding::embedder::{Embedder, build_embedder};
use crate::memory::core::triple::KnowledgeTriple;
use crate::memory::engine::files::{
    FileEntry, FileMeta, MemoryFile, MemoryFiles, NewFileMeta, UpdateMode,
};
use crate::memory::episodic::store::{EpisodicStats, EpisodicStore, RecallQuery};
use crate::memory::graph::knowledge::{GraphStats, KnowledgeGraph, ScoredTriple};
use crate::memory::graph::temporal::{
    FactDraft, FactFilter, FactUpdate, HistoryEntry, TemporalGraph, TemporalStats, TemporalTriple,
};
use crate::memory::procedural::store::{ProceduralStats, ProceduralStore};
use crate::memory::retrieval::hybrid_search::{
    HybridSearchEngine, HybridSearchResult, IndexedDocument, SearchStats,
};
use crate::memory::retrieval::ranking::RankedMemory;

/// Context recorded for episodes stored through [`MemoryEngine::remember`].
pub const DIRECT_MEMORIZATION: &str = "direct memorization";

/// How [`MemoryEngine::remember`] stores content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RememberKind {
    /// A memory file.
    #[default]
    Note,
    /// A knowledge triple when the text reads "X is Y", a note otherwise.
    Fact,
    /// An episode.
    Episode,
}

impl RememberKind {
    /// Lower-case name, as accepted on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Fact => "fact",
            Self::Episode => "episode",
        }
    }
}

impl fmt::Display for RememberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RememberKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "fact" => Ok(Self::Fact),
            "episode" => Ok(Self::Episode),
            other => Err(format!("unknown memory type: {other} (expected note, fact or episode)")),
        }
    }
}

/// Where remembered content ended up.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "stored_as", rename_all = "snake_case")]
pub enum RememberOutcome {
    /// Written as a memory file.
    Note {
        /// Sidecar of the new file.
        file: FileMeta,
    },
    /// Added to the knowledge graph.
    Fact {
        /// Id of the new or reinforced triple.
        triple_id: TripleId,
    },
    /// Recorded as an episode.
    Episode {
        /// Id of the new episode.
        episode_id: EpisodeId,
    },
}

/// Results of a search across the structured stores.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UnifiedResults {
    /// Ranked episodes.
    pub episodic: Vec<RankedMemory<Episode>>,
    /// Ranked skills.
    pub procedural: Vec<RankedMemory<Skill>>,
    /// Triples by vector similarity.
    pub knowledge: Vec<ScoredTriple>,
}

/// Outcome of rebuilding the hybrid index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    /// Documents written to the index.
    pub indexed: usize,
    /// Stale documents dropped.
    pub removed: usize,
}

/// Statistics across every store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStats {
    /// Episodic store.
    pub episodic: EpisodicStats,
    /// Procedural store.
    pub procedural: ProceduralStats,
    /// Knowledge graph.
    pub knowledge: GraphStats,
    /// Temporal graph.
    pub temporal: TemporalStats,
    /// Hybrid search index.
    pub search: SearchStats,
    /// Memory files.
    pub files: usize,
    /// Logged consolidation runs.
    pub consolidation_runs: usize,
}

/// Split "X is Y" (or "X est Y") at the first separator.
fn split_fact(content: &str) -> Option<(&str, &str)> {
    let at = [" is ", " est "]
        .iter()
        .filter_map(|sep| content.find(sep).map(|index| (index, sep.len())))
        .min_by_key(|(index, _)| *index)?;
    let subject = content[..at.0].trim();
    let object = content[at.0 + at.1..].trim();
    (!subject.is_empty() && !object.is_empty()).then_some((subject, object))
}

/// Owns every store and coordinates writes against consolidation.
///
/// Ordinary writes hold the shared side of the maintenance gate; consolidation holds
/// the exclusive side for its whole run.
pub struct MemoryEngine {
    config: MemoryConfig,
    embedder: Arc<dyn Embedder>,
    episodic: Arc<EpisodicStore>,
    procedural: Arc<ProceduralStore>,
    knowledge: Arc<KnowledgeGraph>,
    temporal: Arc<TemporalGraph>,
    search: Arc<HybridSearchEngine>,
    files: MemoryFiles,
    consolidator: Consolidator,
    gate: RwLock<()>,
}

impl MemoryEngine {
    /// Open every store with the embedder named in the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a store cannot be opened.
    pub async fn open(config: MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        let embedder = build_embedder(&config.embedding)?;
        Self::with_embedder(config, embedder).await
    }

    /// Open every store with a caller-supplied embedder.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a store cannot be opened.
    pub async fn with_embedder(
        config: MemoryConfig,
        embedder: Arc<dyn Embedder>,
    ) -> MemoryResult<Self> {
        config.validate()?;
        let storage = &config.storage;
        let episodic = Arc::new(
            EpisodicStore::open(&storage.episodic_dir(), embedder.clone(), config.scoring.clone())
                .await?,
        );
        let procedural = Arc::new(
            ProceduralStore::open(
                &storage.procedural_dir(),
                embedder.clone(),
                config.scoring.clone(),
            )
            .await?,
        );
        let knowledge = Arc::new(
            KnowledgeGraph::open(
                &storage.knowledge_dir(),
                embedder.clone(),
                config.knowledge.clone(),
            )
            .await?,
        );
        let temporal = Arc::new(TemporalGraph::open(&storage.temporal_dir()).await?);
        let search = Arc::new(
            HybridSearchEngine::open(&storage.search_dir(), embedder.clone(), config.search.clone())
                .await?,
        );
        let consolidator = Consolidator::new(
            episodic.clone(),
            procedural.clone(),
            knowledge.clone(),
            config.consolidation.clone(),
            ConsolidationLog::new(storage.consolidation_dir()),
        )?;
        let files = MemoryFiles::new(storage.files_dir());
        info!(home = %storage.home.display(), "Memory engine opened");

        Ok(Self {
            config,
            embedder,
            episodic,
            procedural,
            knowledge,
            temporal,
            search,
            files,
            consolidator,
            gate: RwLock::new(()),
        })
    }

    /// Store `content` the way `kind` asks.
    ///
    /// A fact that does not read "X is Y" is kept as a note.
    ///
    /// # Errors
    /// Returns an error on invalid importance, provider or storage failure.
    pub async fn remember(
        &self,
        content: &str,
        kind: RememberKind,
        importance: f64,
        tags: Vec<String>,
    ) -> MemoryResult<RememberOutcome> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(MemoryError::invalid_input(format!(
                "importance must be in [0, 1], got {importance}"
            )));
        }
        let _shared = self.gate.read().await;

        match kind {
            RememberKind::Episode => {
                let draft = EpisodeDraft::new(DIRECT_MEMORIZATION, "remember", content)
                    .importance(importance)
                    .origin(MemoryOrigin::User)
                    .tags(tags);
                let episode_id = self.episodic.record(draft).await?;
                if let Some(episode) = self.episodic.get(&episode_id).await {
                    self.search.index(Self::episode_document(&episode)).await?;
                }
                return Ok(RememberOutcome::Episode { episode_id });
            }
            RememberKind::Fact => {
                if let Some((subject, object)) = split_fact(content) {
                    let triple_id = self
                        .knowledge
                        .add_triple(
                            subject,
                            "is",
                            object,
                            self.config.knowledge.explicit_confidence,
                            None,
                        )
                        .await?;
                    if let Some(triple) = self.knowledge.get(&triple_id).await {
                        self.search.index(Self::triple_document(&triple)).await?;
                    }
                    return Ok(RememberOutcome::Fact { triple_id });
                }
                debug!("Fact has no subject/object split, storing as note");
            }
            RememberKind::Note => {}
        }

        let name = format!("note_{}.md", Utc::now().format("%Y%m%d_%H%M%S"));
        let extra = NewFileMeta {
            kind: Some(kind.to_string()),
            importance: Some(importance),
            tags,
        };
        let file = self.create_indexed_file(&name, content, extra).await?;
        Ok(RememberOutcome::Note { file })
    }

    async fn create_indexed_file(
        &self,
        name: &str,
        content: &str,
        extra: NewFileMeta,
    ) -> MemoryResult<FileMeta> {
        let file = self.files.create(name, content, extra).await?;
        self.search
            .index(Self::file_document(&file.filename, content.to_string()))
            .await?;
        Ok(file)
    }

    /// Record an episode and add it to the hybrid index.
    ///
    /// # Errors
    /// Returns an error on invalid input, provider or storage failure.
    pub async fn record_episode(&self, draft: EpisodeDraft) -> MemoryResult<EpisodeId> {
        let _shared = self.gate.read().await;
        let id = self.episodic.record(draft).await?;
        if let Some(episode) = self.episodic.get(&id).await {
            self.search.index(Self::episode_document(&episode)).await?;
        }
        Ok(id)
    }

    /// Record one use of a skill. Returns `false` for an unknown skill.
    ///
    /// # Errors
    /// Returns an error if the update cannot be persisted.
    pub async fn record_skill_usage(&self, id: &SkillId, success: bool) -> MemoryResult<bool> {
        let _shared = self.gate.read().await;
        self.procedural.record_usage(id, success).await
    }

    /// Add a knowledge triple and index it.
    ///
    /// # Errors
    /// Returns an error on invalid input, provider or storage failure.
    pub async fn add_triple(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        confidence: f64,
    ) -> MemoryResult<TripleId> {
        let _shared = self.gate.read().await;
        let id = self
            .knowledge
            .add_triple(subject, predicate, object, confidence, None)
            .await?;
        if let Some(triple) = self.knowledge.get(&id).await {
            self.search.index(Self::triple_document(&triple)).await?;
        }
        Ok(id)
    }

    /// Record a temporal fact version.
    ///
    /// # Errors
    /// Returns an error on invalid input or if the log cannot be written.
    pub async fn add_fact(&self, draft: FactDraft) -> MemoryResult<FactVersionId> {
        let _shared = self.gate.read().await;
        self.temporal.add(draft).await
    }

    /// Supersede a temporal fact version. `None` for an unknown id.
    ///
    /// # Errors
    /// Returns an error if the version is closed, on invalid input or log failure.
    pub async fn update_fact(
        &self,
        id: FactVersionId,
        update: FactUpdate,
    ) -> MemoryResult<Option<FactVersionId>> {
        let _shared = self.gate.read().await;
        self.temporal.update(id, update).await
    }

    /// End a temporal fact version without a successor.
    ///
    /// # Errors
    /// Returns an error if the log cannot be written.
    pub async fn invalidate_fact(&self, id: FactVersionId) -> MemoryResult<bool> {
        let _shared = self.gate.read().await;
        self.temporal.invalidate(id).await
    }

    /// Every version of a (subject, predicate) chain, oldest first.
    pub async fn fact_history(&self, subject: &str, predicate: &str) -> Vec<HistoryEntry> {
        self.temporal.history(subject, predicate).await
    }

    /// Create a memory file and index its content.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written or indexed.
    pub async fn create_file(
        &self,
        name: &str,
        content: &str,
        extra: NewFileMeta,
    ) -> MemoryResult<FileMeta> {
        let _shared = self.gate.read().await;
        self.create_indexed_file(name, content, extra).await
    }

    /// Read a memory file.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub async fn read_file(&self, name: &str) -> MemoryResult<Option<MemoryFile>> {
        self.files.read(name).await
    }

    /// Rewrite or extend a memory file and refresh its index entry.
    ///
    /// Returns the new size, or `None` if the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written or indexed.
    pub async fn update_file(
        &self,
        name: &str,
        content: &str,
        mode: UpdateMode,
    ) -> MemoryResult<Option<usize>> {
        let _shared = self.gate.read().await;
        let Some(size) = self.files.update(name, content, mode).await? else {
            return Ok(None);
        };
        if let Some(file) = self.files.read(name).await? {
            self.search
                .index(Self::file_document(&file.filename, file.content))
                .await?;
        }
        Ok(Some(size))
    }

    /// Delete a memory file and drop it from the index.
    ///
    /// # Errors
    /// Returns an error if the file or index entry cannot be removed.
    pub async fn delete_file(&self, name: &str) -> MemoryResult<bool> {
        let _shared = self.gate.read().await;
        if !self.files.delete(name).await? {
            return Ok(false);
        }
        self.search.remove(&format!("file:{name}")).await?;
        Ok(true)
    }

    /// Memory files, newest first.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub async fn list_files(&self) -> MemoryResult<Vec<FileEntry>> {
        self.files.list().await
    }

    /// Search episodes, skills and triples for `query`, up to `k` results each.
    ///
    /// # Errors
    /// Returns an error on provider or storage failure.
    pub async fn search(&self, query: &str, k: usize) -> MemoryResult<UnifiedResults> {
        let _shared = self.gate.read().await;
        let episodic = self.episodic.recall(&RecallQuery::new(query, k)).await?;
        let procedural = self.procedural.find_applicable(query, k, 0.0).await?;
        let knowledge = self.knowledge.query_semantic(query, k).await?;
        debug!(
            query,
            episodic = episodic.len(),
            procedural = procedural.len(),
            knowledge = knowledge.len(),
            "Unified search"
        );
        Ok(UnifiedResults {
            episodic,
            procedural,
            knowledge,
        })
    }

    /// Keyword and vector search over the indexed documents.
    ///
    /// # Errors
    /// Returns an error on provider failure.
    pub async fn hybrid_search(
        &self,
        query: &str,
        k: usize,
    ) -> MemoryResult<Vec<HybridSearchResult>> {
        self.search.search(query, k).await
    }

    fn episode_document(episode: &Episode) -> IndexedDocument {
        IndexedDocument::new(format!("episode:{}", episode.id), episode.embedding_text())
            .with_meta("type", "episode")
            .with_meta("status", episode.status().to_string())
    }

    fn triple_document(triple: &KnowledgeTriple) -> IndexedDocument {
        IndexedDocument::new(format!("triple:{}", triple.id), triple.embedding_text())
            .with_meta("type", "knowledge")
    }

    fn file_document(filename: &str, content: String) -> IndexedDocument {
        IndexedDocument::new(format!("file:{filename}"), content).with_meta("type", "file")
    }

    /// Rebuild the hybrid index from every store and memory file.
    ///
    /// # Errors
    /// Returns an error on provider or storage failure.
    pub async fn reindex(&self) -> MemoryResult<ReindexReport> {
        let _shared = self.gate.read().await;
        let mut documents: Vec<IndexedDocument> = self
            .episodic
            .all()
            .await
            .iter()
            .map(Self::episode_document)
            .collect();
        documents.extend(self.procedural.all().await.into_iter().map(|skill| {
            IndexedDocument::new(format!("skill:{}", skill.id), skill.embedding_text())
                .with_meta("type", "skill")
                .with_meta("name", skill.name)
        }));
        documents.extend(self.knowledge.all().await.iter().map(Self::triple_document));
        for entry in self.files.list().await? {
            if let Some(file) = self.files.read(&entry.filename).await? {
                documents.push(Self::file_document(&file.filename, file.content));
            }
        }

        let indexed = documents.len();
        let removed = self.search.replace_all(documents).await?;
        info!(indexed, removed, "Search index rebuilt");
        Ok(ReindexReport { indexed, removed })
    }

    /// Run a consolidation pass with exclusive access to the stores.
    ///
    /// # Errors
    /// Returns an error if a store write fails.
    pub async fn consolidate(
        &self,
        options: ConsolidationOptions,
    ) -> MemoryResult<ConsolidationResult> {
        let _exclusive = self.gate.write().await;
        self.consolidator.consolidate(options).await
    }

    /// Preview grouping over the `limit` most recent episodes.
    ///
    /// # Errors
    /// Returns an error if grouping fails.
    pub async fn analyze_patterns(&self, limit: usize) -> MemoryResult<PatternAnalysis> {
        self.consolidator.analyze_patterns(limit).await
    }

    /// Past consolidation runs, newest first.
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be read.
    pub async fn consolidation_history(
        &self,
        limit: usize,
    ) -> MemoryResult<Vec<ConsolidationResult>> {
        self.consolidator.history(limit).await
    }

    /// Archive consolidated episodes older than the configured age.
    ///
    /// # Errors
    /// Returns an error if the updates cannot be persisted.
    pub async fn archive_consolidated(&self) -> MemoryResult<usize> {
        let _shared = self.gate.read().await;
        let cutoff = Utc::now() - Duration::days(self.config.consolidation.archive_after_days);
        self.episodic.archive_consolidated_before(cutoff).await
    }

    /// Rewrite the temporal log keeping one record per fact version.
    ///
    /// # Errors
    /// Returns an error if the log cannot be rewritten.
    pub async fn compact_temporal(&self) -> MemoryResult<usize> {
        let _shared = self.gate.read().await;
        self.temporal.compact().await
    }

    /// Current temporal facts scored by freshness with the configured decay rate.
    pub async fn fresh_facts(
        &self,
        filter: &FactFilter,
        min_score: f64,
    ) -> Vec<(TemporalTriple, f64)> {
        self.temporal
            .search_with_decay(filter, self.config.knowledge.decay_rate_per_day, min_score)
            .await
    }

    /// Statistics for every store.
    ///
    /// # Errors
    /// Returns an error if the file or log directories cannot be listed.
    pub async fn stats(&self) -> MemoryResult<EngineStats> {
        Ok(EngineStats {
            episodic: self.episodic.stats().await,
            procedural: self.procedural.stats().await,
            knowledge: self.knowledge.stats().await,
            temporal: self.temporal.stats().await,
            search: self.search.stats().await,
            files: self.files.count().await?,
            consolidation_runs: self.consolidator.run_count().await?,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("home", &self.config.storage.home)
            .field("ndims", &self.embedder.ndims())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::core::metadata::MemoryStatus;
    use crate::memory::core::skill::SkillDraft;
    use crate::memory::embedding::hashing::HashingEmbedder;
    use crate::memory::embedding::testing::FailingEmbedder;
    use std::path::Path;

    async fn engine(home: &Path) -> MemoryEngine {
        MemoryEngine::with_embedder(MemoryConfig::with_home(home), Arc::new(HashingEmbedder::new(128)))
            .await
            .unwrap()
    }

    #[test]
    fn test_split_fact() {
        assert_eq!(split_fact("Rust is a language"), Some(("Rust", "a language")));
        assert_eq!(split_fact("Paris est une ville"), Some(("Paris", "une ville")));
        assert_eq!(split_fact("this is"), None);
        assert_eq!(split_fact("no separator here"), None);
        assert_eq!("Fact".parse::<RememberKind>(), Ok(RememberKind::Fact));
        assert!("preference".parse::<RememberKind>().is_err());
    }

    #[tokio::test]
    async fn test_remember_routes_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;

        let fact = engine
            .remember("Aura is an assistant", RememberKind::Fact, 0.9, Vec::new())
            .await
            .unwrap();
        let RememberOutcome::Fact { triple_id } = fact else {
            panic!("expected a triple, got {fact:?}");
        };
        let triple = engine.knowledge.get(&triple_id).await.unwrap();
        assert_eq!(triple.predicate, "is");
        assert!((triple.confidence - 1.0).abs() < f64::EPSILON);

        let fallback = engine
            .remember("remember the milk", RememberKind::Fact, 0.5, Vec::new())
            .await
            .unwrap();
        let RememberOutcome::Note { file } = fallback else {
            panic!("expected a note, got {fallback:?}");
        };
        assert_eq!(file.kind.as_deref(), Some("fact"));

        let episode = engine
            .remember("deployed the site", RememberKind::Episode, 0.7, vec!["web".to_string()])
            .await
            .unwrap();
        let RememberOutcome::Episode { episode_id } = episode else {
            panic!("expected an episode, got {episode:?}");
        };
        let stored = engine.episodic.get(&episode_id).await.unwrap();
        assert_eq!(stored.context, DIRECT_MEMORIZATION);
        assert_eq!(stored.outcome, "deployed the site");
        assert_eq!(stored.metadata.origin, MemoryOrigin::User);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.episodic.total, 1);
        assert_eq!(stats.knowledge.total_triples, 1);
        assert_eq!(stats.search.documents, 3);
    }

    #[tokio::test]
    async fn test_remember_rejects_out_of_range_importance() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let err = engine
            .remember("x", RememberKind::Note, 1.5, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
        assert_eq!(engine.files.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unified_search_covers_stores() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine
            .episodic
            .record(EpisodeDraft::new("postgres tuning", "raise shared buffers", "faster queries"))
            .await
            .unwrap();
        engine
            .knowledge
            .add_triple("postgres", "uses", "shared buffers", 1.0, None)
            .await
            .unwrap();

        let results = engine.search("postgres shared buffers", 5).await.unwrap();
        assert_eq!(results.episodic.len(), 1);
        assert_eq!(results.knowledge.len(), 1);
        assert!(results.procedural.is_empty());
    }

    #[tokio::test]
    async fn test_reindex_rebuilds_from_stores() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine
            .episodic
            .record(EpisodeDraft::new("ctx", "configure nginx reverse proxy", "ok"))
            .await
            .unwrap();
        engine
            .files
            .create("kubernetes.md", "kubernetes cluster upgrade checklist", NewFileMeta::default())
            .await
            .unwrap();
        engine
            .search
            .index(IndexedDocument::new("stale", "obsolete"))
            .await
            .unwrap();

        let report = engine.reindex().await.unwrap();
        assert_eq!(report, ReindexReport { indexed: 2, removed: 1 });

        let hits = engine.hybrid_search("kubernetes upgrade", 3).await.unwrap();
        assert_eq!(hits[0].id, "file:kubernetes.md");
        assert_eq!(hits[0].metadata["type"], "file");
    }

    #[tokio::test]
    async fn test_consolidate_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        for host in ["a", "b", "c"] {
            engine
                .episodic
                .record(
                    EpisodeDraft::new("new host", format!("install docker compose {host}"), "ok")
                        .valence(0.8),
                )
                .await
                .unwrap();
        }
        let options = ConsolidationOptions {
            min_episodes: Some(3),
            ..ConsolidationOptions::default()
        };
        let result = engine.consolidate(options).await.unwrap();
        assert_eq!(result.skills_created, 1);
        assert_eq!(engine.episodic.stats().await.consolidated, 3);
        assert_eq!(engine.consolidation_history(10).await.unwrap().len(), 1);
        assert_eq!(engine.stats().await.unwrap().consolidation_runs, 1);

        let episodes = engine.episodic.all().await;
        assert!(episodes.iter().all(|e| e.status() == MemoryStatus::Consolidated));
        assert_eq!(engine.archive_consolidated().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fresh_facts_use_configured_decay() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine
            .temporal
            .add(FactDraft::new("Aura", "version", "3.2"))
            .await
            .unwrap();
        let facts = engine.fresh_facts(&FactFilter::default(), 0.5).await;
        assert_eq!(facts.len(), 1);
        assert!(facts[0].1 > 0.99);
    }

    #[tokio::test]
    async fn test_engine_writes_wait_for_consolidation_gate() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let skill_id = engine
            .procedural
            .create_skill(SkillDraft::new("skill_restart_nginx", "restart nginx"))
            .await
            .unwrap();

        let exclusive = engine.gate.write().await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            engine.record_skill_usage(&skill_id, true),
        )
        .await;
        assert!(blocked.is_err());
        drop(exclusive);

        assert!(engine.record_skill_usage(&skill_id, true).await.unwrap());
        assert!(!engine.record_skill_usage(&SkillId::derive("missing", "x"), true).await.unwrap());
        let skill = engine.procedural.get(&skill_id).await.unwrap();
        assert_eq!(skill.usage_count, 1);
    }

    #[tokio::test]
    async fn test_engine_writes_keep_index_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine
            .record_episode(EpisodeDraft::new("ctx", "rotate tls certificates", "ok"))
            .await
            .unwrap();
        engine.add_triple("nginx", "uses", "openssl", 1.0).await.unwrap();
        let file = engine
            .create_file("runbook.md", "postgres failover runbook", NewFileMeta::default())
            .await
            .unwrap();
        assert_eq!(engine.search.stats().await.documents, 3);

        let size = engine
            .update_file("runbook.md", "replica promotion steps", UpdateMode::Append)
            .await
            .unwrap();
        assert!(size.unwrap() > file.size);
        let hits = engine.hybrid_search("replica promotion", 1).await.unwrap();
        assert_eq!(hits[0].id, "file:runbook.md");

        assert!(engine.delete_file("runbook.md").await.unwrap());
        assert!(!engine.delete_file("runbook.md").await.unwrap());
        assert!(engine.read_file("runbook.md").await.unwrap().is_none());
        assert!(engine.list_files().await.unwrap().is_empty());
        assert_eq!(engine.search.stats().await.documents, 2);

        let first = engine.add_fact(FactDraft::new("Aura", "version", "3.1")).await.unwrap();
        let update = FactUpdate {
            object: Some("3.2".to_string()),
            ..FactUpdate::default()
        };
        let second = engine.update_fact(first, update).await.unwrap().unwrap();
        assert!(engine.invalidate_fact(second).await.unwrap());
        assert_eq!(engine.fact_history("Aura", "version").await.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_stores_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::with_embedder(
            MemoryConfig::with_home(dir.path()),
            Arc::new(FailingEmbedder::new(16)),
        )
        .await
        .unwrap();
        let err = engine
            .remember("lost", RememberKind::Episode, 0.5, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert!(engine.episodic.is_empty().await);
    }
}
