//! Episodic memory: recorded interactions with contextual recall.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::memory::core::config::ScoringConfig;
use crate::memory::core::episode::{Episode, EpisodeDraft};
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::ids::{EpisodeId, SkillId};
use crate::memory::core::metadata::MemoryStatus;
use crate::memory::core::score::{MemoryScore, recency_score};
use crate::memory::embedding::embedder::{Embedder, embed_checked};
use crate::memory::retrieval::ranking::{RankedMemory, rank_results};
use crate::memory::storage::record_store::{RecordWrite, SqliteRecordStore, decode_records};
use crate::memory::storage::vector_index::VectorIndex;

const TABLE: &str = "episodes";

/// Parameters for [`EpisodicStore::recall`].
#[derive(Clone, Debug)]
pub struct RecallQuery {
    /// Free-text query.
    pub query: String,
    /// Maximum results.
    pub k: usize,
    /// Episodes below this importance are dropped.
    pub min_importance: f64,
    /// Whether archived episodes may be returned.
    pub include_archived: bool,
}

impl RecallQuery {
    /// Query returning at most `k` episodes.
    #[must_use]
    pub fn new(query: impl Into<String>, k: usize) -> Self {
        Self {
            query: query.into(),
            k,
            min_importance: 0.0,
            include_archived: false,
        }
    }

    /// Drop episodes below this importance.
    #[must_use]
    pub const fn min_importance(mut self, min_importance: f64) -> Self {
        self.min_importance = min_importance;
        self
    }

    /// Also return archived episodes.
    #[must_use]
    pub const fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }
}

/// Episode counts by lifecycle state.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EpisodicStats {
    /// Stored episodes.
    pub total: usize,
    /// Episodes still `ACTIVE`.
    pub active: usize,
    /// Episodes absorbed into a skill.
    pub consolidated: usize,
    /// Archived episodes.
    pub archived: usize,
    /// Mean importance over every episode.
    pub average_importance: f64,
}

#[derive(Default)]
struct EpisodicState {
    episodes: HashMap<String, Episode>,
    vectors: VectorIndex,
}

/// Store of episodes backed by `SQLite` and an in-memory vector index.
pub struct EpisodicStore {
    records: SqliteRecordStore,
    embedder: Arc<dyn Embedder>,
    scoring: ScoringConfig,
    state: RwLock<EpisodicState>,
}

impl EpisodicStore {
    /// Open the store under `dir`, loading every readable episode.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or read.
    pub async fn open(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        scoring: ScoringConfig,
    ) -> MemoryResult<Self> {
        let records = SqliteRecordStore::open(&dir.join("episodes.sqlite"), TABLE).await?;
        let rows = records.load_all().await?;
        let mut state = EpisodicState::default();
        for (episode, vector) in decode_records::<Episode>(rows, embedder.ndims(), TABLE) {
            state.vectors.insert(episode.id.as_str(), vector);
            state.episodes.insert(episode.id.to_string(), episode);
        }
        info!(episodes = state.episodes.len(), "Episodic store loaded");
        Ok(Self {
            records,
            embedder,
            scoring,
            state: RwLock::new(state),
        })
    }

    /// Record a new episode stamped now.
    ///
    /// The embedding is computed before anything is written; a provider failure
    /// leaves the store unchanged.
    ///
    /// # Errors
    /// Returns an error on invalid input, provider failure or storage failure.
    pub async fn record(&self, draft: EpisodeDraft) -> MemoryResult<EpisodeId> {
        let episode = Episode::from_draft(draft, Utc::now())?;
        self.insert(episode).await
    }

    /// Persist a fully built episode. Re-inserting an existing id replaces it.
    ///
    /// # Errors
    /// Returns an error on provider or storage failure.
    pub async fn insert(&self, episode: Episode) -> MemoryResult<EpisodeId> {
        let vector = embed_checked(self.embedder.as_ref(), &episode.embedding_text()).await?;
        let payload = serde_json::to_string(&episode)?;
        let id = episode.id.clone();

        let mut state = self.state.write().await;
        self.records
            .upsert(id.to_string(), payload, vector.clone())
            .await?;
        state.vectors.insert(id.as_str(), vector);
        state.episodes.insert(id.to_string(), episode);
        info!(episode_id = %id, "Recorded episode");
        Ok(id)
    }

    /// Recall the episodes most relevant to `query`.
    ///
    /// Every returned episode has its access count bumped; candidates that were
    /// fetched but cut are left untouched.
    ///
    /// # Errors
    /// Returns an error if the query cannot be embedded or access stats cannot be saved.
    pub async fn recall(&self, query: &RecallQuery) -> MemoryResult<Vec<RankedMemory<Episode>>> {
        if query.k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = embed_checked(self.embedder.as_ref(), &query.query).await?;
        let now = Utc::now();
        let fetch = query.k.saturating_mul(self.scoring.overfetch_factor.max(1));

        let ranked = {
            let state = self.state.read().await;
            let max_access = state
                .episodes
                .values()
                .map(|episode| episode.metadata.access_count)
                .max()
                .unwrap_or(0)
                .max(1);
            let hits = state.vectors.nearest(&query_vector, fetch, |id| {
                state.episodes.get(id).is_some_and(|episode| {
                    query.include_archived || episode.status() != MemoryStatus::Archived
                })
            });
            let candidates: Vec<(Episode, MemoryScore)> = hits
                .into_iter()
                .filter_map(|hit| {
                    let episode = state.episodes.get(&hit.id)?;
                    if episode.importance < query.min_importance {
                        return None;
                    }
                    let score = MemoryScore::new(
                        hit.similarity,
                        episode.importance,
                        recency_score(
                            episode.timestamp,
                            now,
                            self.scoring.recency_half_life_days,
                        ),
                        f64::from(episode.metadata.access_count) / f64::from(max_access),
                        &self.scoring.weights,
                    );
                    Some((episode.clone(), score))
                })
                .collect();
            rank_results(candidates, query.k)
        };

        if ranked.is_empty() {
            return Ok(ranked);
        }
        let ids: Vec<EpisodeId> = ranked.iter().map(|r| r.item.id.clone()).collect();
        let updated = self.touch_accessed(&ids, now).await?;
        debug!(query = %query.query, results = ranked.len(), "Recalled episodes");

        Ok(ranked
            .into_iter()
            .map(|mut ranked| {
                if let Some(episode) = updated.get(ranked.item.id.as_str()) {
                    ranked.item = episode.clone();
                }
                ranked
            })
            .collect())
    }

    async fn touch_accessed(
        &self,
        ids: &[EpisodeId],
        now: DateTime<Utc>,
    ) -> MemoryResult<HashMap<String, Episode>> {
        let mut state = self.state.write().await;
        let mut touched = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(episode) = state.episodes.get(id.as_str()) {
                let mut episode = episode.clone();
                episode.metadata.record_access(now);
                touched.insert(id.to_string(), episode);
            }
        }
        self.persist(&mut state, touched.values().cloned().collect())
            .await?;
        Ok(touched)
    }

    /// Write payload-only updates and mirror them into memory once committed.
    async fn persist(&self, state: &mut EpisodicState, episodes: Vec<Episode>) -> MemoryResult<()> {
        if episodes.is_empty() {
            return Ok(());
        }
        let mut writes = Vec::with_capacity(episodes.len());
        for episode in &episodes {
            writes.push(RecordWrite::payload(
                episode.id.to_string(),
                serde_json::to_string(episode)?,
            ));
        }
        self.records.write_batch(writes).await?;
        for episode in episodes {
            state.episodes.insert(episode.id.to_string(), episode);
        }
        Ok(())
    }

    /// Fetch an episode by id.
    pub async fn get(&self, id: &EpisodeId) -> Option<Episode> {
        self.state.read().await.episodes.get(id.as_str()).cloned()
    }

    /// Most recent episodes first.
    pub async fn recent(&self, limit: usize) -> Vec<Episode> {
        let mut episodes = self.all().await;
        episodes.reverse();
        episodes.truncate(limit);
        episodes
    }

    /// Every episode, oldest first.
    pub async fn all(&self) -> Vec<Episode> {
        let state = self.state.read().await;
        let mut episodes: Vec<Episode> = state.episodes.values().cloned().collect();
        episodes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        episodes
    }

    /// Number of stored episodes.
    pub async fn len(&self) -> usize {
        self.state.read().await.episodes.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Active episodes with `valence >= min_valence`, highest valence first.
    pub async fn successful_episodes(&self, min_valence: f64, limit: usize) -> Vec<Episode> {
        let state = self.state.read().await;
        let mut episodes: Vec<Episode> = state
            .episodes
            .values()
            .filter(|e| e.status() == MemoryStatus::Active && e.valence >= min_valence)
            .cloned()
            .collect();
        episodes.sort_by(|a, b| {
            b.valence
                .total_cmp(&a.valence)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        episodes.truncate(limit);
        episodes
    }

    /// Move an episode to `ARCHIVED`. Returns `false` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the update cannot be persisted.
    pub async fn archive(&self, id: &EpisodeId) -> MemoryResult<bool> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let Some(mut episode) = state.episodes.get(id.as_str()).cloned() else {
            return Ok(false);
        };
        if let Err(err) = episode.metadata.transition(MemoryStatus::Archived, now) {
            warn!(episode_id = %id, error = %err, "Archive rejected");
            return Ok(false);
        }
        self.persist(&mut state, vec![episode]).await?;
        info!(episode_id = %id, "Archived episode");
        Ok(true)
    }

    /// Mark episodes as absorbed into `skill_id`. Returns how many were updated.
    ///
    /// Archived episodes cannot become consolidated and are skipped.
    ///
    /// # Errors
    /// Returns an error if the updates cannot be persisted.
    pub async fn mark_consolidated(
        &self,
        ids: &[EpisodeId],
        skill_id: &SkillId,
    ) -> MemoryResult<usize> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(mut episode) = state.episodes.get(id.as_str()).cloned() else {
                continue;
            };
            if let Err(err) = episode.metadata.transition(MemoryStatus::Consolidated, now) {
                warn!(episode_id = %id, error = %err, "Consolidation mark skipped");
                continue;
            }
            if !episode.consolidated_into.contains(skill_id) {
                episode.consolidated_into.push(skill_id.clone());
            }
            updated.push(episode);
        }
        let count = updated.len();
        self.persist(&mut state, updated).await?;
        debug!(skill_id = %skill_id, count, "Marked episodes consolidated");
        Ok(count)
    }

    /// Archive consolidated episodes whose timestamp is before `cutoff`.
    ///
    /// # Errors
    /// Returns an error if the updates cannot be persisted.
    pub async fn archive_consolidated_before(&self, cutoff: DateTime<Utc>) -> MemoryResult<usize> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut archived = Vec::new();
        for episode in state.episodes.values() {
            if episode.status() == MemoryStatus::Consolidated && episode.timestamp < cutoff {
                let mut episode = episode.clone();
                if episode.metadata.transition(MemoryStatus::Archived, now).is_ok() {
                    archived.push(episode);
                }
            }
        }
        let count = archived.len();
        self.persist(&mut state, archived).await?;
        if count > 0 {
            info!(count, cutoff = %cutoff, "Archived consolidated episodes");
        }
        Ok(count)
    }

    /// Physically remove an episode. Returns `false` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete(&self, id: &EpisodeId) -> MemoryResult<bool> {
        let mut state = self.state.write().await;
        if !state.episodes.contains_key(id.as_str()) {
            return Ok(false);
        }
        self.records.delete(id.as_str()).await?;
        state.episodes.remove(id.as_str());
        state.vectors.remove(id.as_str());
        info!(episode_id = %id, "Deleted episode");
        Ok(true)
    }

    /// Lifecycle counts and mean importance.
    pub async fn stats(&self) -> EpisodicStats {
        let state = self.state.read().await;
        let mut stats = EpisodicStats {
            total: state.episodes.len(),
            ..EpisodicStats::default()
        };
        let mut importance_sum = 0.0;
        for episode in state.episodes.values() {
            match episode.status() {
                MemoryStatus::Active => stats.active += 1,
                MemoryStatus::Consolidated => stats.consolidated += 1,
                MemoryStatus::Archived => stats.archived += 1,
            }
            importance_sum += episode.importance;
        }
        if stats.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            let total = stats.total as f64;
            stats.average_importance = importance_sum / total;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embedding::hashing::HashingEmbedder;
    use crate::memory::embedding::testing::FailingEmbedder;
    use crate::memory::core::errors::MemoryError;
    use chrono::Duration;

    async fn store(dir: &Path) -> EpisodicStore {
        EpisodicStore::open(dir, Arc::new(HashingEmbedder::new(256)), ScoringConfig::default())
            .await
            .unwrap()
    }

    fn draft(context: &str, action: &str, valence: f64) -> EpisodeDraft {
        EpisodeDraft::new(context, action, "done")
            .valence(valence)
            .importance(0.5)
    }

    #[tokio::test]
    async fn test_record_and_recall() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let docker = store
            .record(draft("deploy stack", "run docker compose up", 0.5))
            .await
            .unwrap();
        store
            .record(draft("write report", "edit quarterly spreadsheet", 0.5))
            .await
            .unwrap();

        let results = store
            .recall(&RecallQuery::new("docker compose", 1))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id, docker);
        let score = results[0].score;
        assert!((0.0..=1.0).contains(&score.combined));
        assert_eq!(results[0].item.metadata.access_count, 1);
    }

    #[tokio::test]
    async fn test_recall_only_touches_returned_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let first = store
            .record(draft("deploy", "docker compose up", 0.5))
            .await
            .unwrap();
        let second = store
            .record(draft("cleanup", "docker system prune", 0.5))
            .await
            .unwrap();

        let results = store
            .recall(&RecallQuery::new("docker compose up", 1))
            .await
            .unwrap();
        assert_eq!(results[0].item.id, first);
        assert_eq!(store.get(&first).await.unwrap().metadata.access_count, 1);
        let untouched = store.get(&second).await.unwrap();
        assert_eq!(untouched.metadata.access_count, 0);
        assert!(untouched.metadata.last_accessed.is_none());
    }

    #[tokio::test]
    async fn test_recall_filters_importance_and_archived() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let low = store
            .record(draft("a", "docker build", 0.0).importance(0.1))
            .await
            .unwrap();
        let archived = store.record(draft("b", "docker push", 0.0)).await.unwrap();
        assert!(store.archive(&archived).await.unwrap());

        let results = store
            .recall(&RecallQuery::new("docker", 5).min_importance(0.3))
            .await
            .unwrap();
        assert!(results.is_empty());

        let with_archived = store
            .recall(&RecallQuery::new("docker", 5).include_archived(true))
            .await
            .unwrap();
        let ids: Vec<&EpisodeId> = with_archived.iter().map(|r| &r.item.id).collect();
        assert!(ids.contains(&&archived));
        assert!(ids.contains(&&low));
    }

    #[tokio::test]
    async fn test_provider_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodicStore::open(
            dir.path(),
            Arc::new(FailingEmbedder::new(64)),
            ScoringConfig::default(),
        )
        .await
        .unwrap();
        let err = store.record(draft("c", "a", 0.1)).await.unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert!(store.is_empty().await);
        assert_eq!(store.records.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_successful_episodes_and_consolidation_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let best = store.record(draft("x", "one", 0.9)).await.unwrap();
        let good = store.record(draft("x", "two", 0.4)).await.unwrap();
        store.record(draft("x", "three", 0.1)).await.unwrap();

        let successful = store.successful_episodes(0.3, 10).await;
        let ids: Vec<EpisodeId> = successful.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![best.clone(), good.clone()]);

        let skill = SkillId::derive("skill_x", "one");
        assert_eq!(store.mark_consolidated(&[best.clone(), good.clone()], &skill).await.unwrap(), 2);
        let consolidated = store.get(&best).await.unwrap();
        assert_eq!(consolidated.status(), MemoryStatus::Consolidated);
        assert_eq!(consolidated.consolidated_into, vec![skill]);
        assert!(store.successful_episodes(0.3, 10).await.is_empty());

        let archived = store
            .archive_consolidated_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(archived, 2);
        let stats = store.stats().await;
        assert_eq!((stats.active, stats.consolidated, stats.archived), (1, 0, 2));
    }

    #[tokio::test]
    async fn test_reopen_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = store(dir.path()).await;
            store.record(draft("ctx", "persist me", 0.2)).await.unwrap()
        };
        let store = store(dir.path()).await;
        assert_eq!(store.get(&id).await.unwrap().action, "persist me");
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.is_none());
        assert_eq!(store.recent(5).await.len(), 0);
    }
}
