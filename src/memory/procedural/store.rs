//! Procedural memory: learned skills with usage tracking.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::memory::core::config::ScoringConfig;
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{EpisodeId, SkillId};
use crate::memory::core::metadata::MemoryStatus;
use crate::memory::core::score::{MemoryScore, frequency_ratio, recency_score};
use crate::memory::core::skill::{Skill, SkillDraft, SkillUpdate};
use crate::memory::embedding::embedder::{Embedder, embed_checked};
use crate::memory::retrieval::ranking::{RankedMemory, rank_results};
use crate::memory::storage::record_store::{RecordWrite, SqliteRecordStore, decode_records};
use crate::memory::storage::vector_index::VectorIndex;

const TABLE: &str = "skills";

/// Ordering for [`ProceduralStore::top_skills`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SkillRanking {
    /// Highest success rate first.
    #[default]
    SuccessRate,
    /// Most used first.
    UsageCount,
}

/// Aggregate skill statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProceduralStats {
    /// Stored skills.
    pub total: usize,
    /// Sum of usage counters.
    pub total_usage: u64,
    /// Mean success rate.
    pub average_success_rate: f64,
}

#[derive(Default)]
struct ProceduralState {
    skills: HashMap<String, Skill>,
    by_name: HashMap<String, SkillId>,
    vectors: VectorIndex,
}

impl ProceduralState {
    fn put(&mut self, skill: Skill) {
        self.by_name.insert(skill.name.clone(), skill.id.clone());
        self.skills.insert(skill.id.to_string(), skill);
    }
}

/// Store of skills backed by `SQLite` and an in-memory vector index.
pub struct ProceduralStore {
    records: SqliteRecordStore,
    embedder: Arc<dyn Embedder>,
    scoring: ScoringConfig,
    state: RwLock<ProceduralState>,
}

impl ProceduralStore {
    /// Open the store under `dir`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or read.
    pub async fn open(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        scoring: ScoringConfig,
    ) -> MemoryResult<Self> {
        let records = SqliteRecordStore::open(&dir.join("skills.sqlite"), TABLE).await?;
        let rows = records.load_all().await?;
        let mut state = ProceduralState::default();
        for (skill, vector) in decode_records::<Skill>(rows, embedder.ndims(), TABLE) {
            state.vectors.insert(skill.id.as_str(), vector);
            state.put(skill);
        }
        info!(skills = state.skills.len(), "Procedural store loaded");
        Ok(Self {
            records,
            embedder,
            scoring,
            state: RwLock::new(state),
        })
    }

    /// Create a skill. If a skill with the same name exists its id is returned unchanged.
    ///
    /// # Errors
    /// Returns an error if the name is empty, or on provider or storage failure.
    pub async fn create_skill(&self, draft: SkillDraft) -> MemoryResult<SkillId> {
        if draft.name.trim().is_empty() {
            return Err(MemoryError::invalid_input("skill name must not be empty"));
        }
        if let Some(existing) = self.state.read().await.by_name.get(&draft.name) {
            debug!(skill_id = %existing, "Skill already exists");
            return Ok(existing.clone());
        }

        let skill = Skill::from_draft(draft, Utc::now());
        let vector = embed_checked(self.embedder.as_ref(), &skill.embedding_text()).await?;
        let payload = serde_json::to_string(&skill)?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.by_name.get(&skill.name) {
            return Ok(existing.clone());
        }
        self.records
            .upsert(skill.id.to_string(), payload, vector.clone())
            .await?;
        let id = skill.id.clone();
        state.vectors.insert(id.as_str(), vector);
        info!(skill_id = %id, name = %skill.name, "Created skill");
        state.put(skill);
        Ok(id)
    }

    /// Skills applicable to `context`, ranked with the success rate standing in for importance.
    ///
    /// # Errors
    /// Returns an error if the context cannot be embedded.
    pub async fn find_applicable(
        &self,
        context: &str,
        k: usize,
        min_success_rate: f64,
    ) -> MemoryResult<Vec<RankedMemory<Skill>>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = embed_checked(self.embedder.as_ref(), context).await?;
        let now = Utc::now();
        let fetch = k.saturating_mul(self.scoring.overfetch_factor.max(1));

        let state = self.state.read().await;
        let hits = state.vectors.nearest(&query_vector, fetch, |id| {
            state.skills.get(id).is_some_and(|skill| {
                skill.metadata.status != MemoryStatus::Archived
                    && skill.success_rate.value() >= min_success_rate
            })
        });
        let candidates: Vec<(Skill, MemoryScore)> = hits
            .into_iter()
            .filter_map(|hit| {
                let skill = state.skills.get(&hit.id)?;
                let score = MemoryScore::new(
                    hit.similarity,
                    skill.success_rate.value(),
                    recency_score(
                        skill.metadata.created_at,
                        now,
                        self.scoring.recency_half_life_days,
                    ),
                    frequency_ratio(skill.usage_count, self.scoring.skill_usage_ceiling),
                    &self.scoring.weights,
                );
                Some((skill.clone(), score))
            })
            .collect();
        let ranked = rank_results(candidates, k);
        debug!(results = ranked.len(), "Found applicable skills");
        Ok(ranked)
    }

    /// Fetch a skill by id.
    pub async fn get(&self, id: &SkillId) -> Option<Skill> {
        self.state.read().await.skills.get(id.as_str()).cloned()
    }

    /// Fetch a skill by its unique name.
    pub async fn get_by_name(&self, name: &str) -> Option<Skill> {
        let state = self.state.read().await;
        let id = state.by_name.get(name)?;
        state.skills.get(id.as_str()).cloned()
    }

    /// Record one use. Returns `false` if the skill does not exist.
    ///
    /// # Errors
    /// Returns an error if the update cannot be persisted.
    pub async fn record_usage(&self, id: &SkillId, success: bool) -> MemoryResult<bool> {
        let mut state = self.state.write().await;
        let Some(mut skill) = state.skills.get(id.as_str()).cloned() else {
            return Ok(false);
        };
        skill.record_usage(success, Utc::now());
        self.persist(&mut state, skill, None).await?;
        Ok(true)
    }

    /// Update pattern, triggers or template in place and re-embed. The id stays stable.
    ///
    /// Returns `false` if the skill does not exist.
    ///
    /// # Errors
    /// Returns an error on provider or storage failure; the stored skill is unchanged then.
    pub async fn update_skill(&self, id: &SkillId, update: SkillUpdate) -> MemoryResult<bool> {
        let Some(mut skill) = self.get(id).await else {
            return Ok(false);
        };
        skill.apply_update(update, Utc::now());
        let vector = embed_checked(self.embedder.as_ref(), &skill.embedding_text()).await?;

        let mut state = self.state.write().await;
        let Some(current) = state.skills.get(id.as_str()) else {
            return Ok(false);
        };
        // Usage recorded while embedding must not be lost.
        skill.usage_count = current.usage_count;
        skill.success_rate = current.success_rate;
        skill.metadata.access_count = current.metadata.access_count;
        skill.metadata.last_accessed = current.metadata.last_accessed;
        self.persist(&mut state, skill, Some(vector)).await?;
        info!(skill_id = %id, "Updated skill");
        Ok(true)
    }

    /// Append source episodes. Returns `false` if the skill does not exist.
    ///
    /// # Errors
    /// Returns an error if the update cannot be persisted.
    pub async fn add_source_episodes(
        &self,
        id: &SkillId,
        episodes: &[EpisodeId],
    ) -> MemoryResult<bool> {
        let mut state = self.state.write().await;
        let Some(mut skill) = state.skills.get(id.as_str()).cloned() else {
            return Ok(false);
        };
        if skill.add_source_episodes(episodes, Utc::now()) > 0 {
            self.persist(&mut state, skill, None).await?;
        }
        Ok(true)
    }

    async fn persist(
        &self,
        state: &mut ProceduralState,
        skill: Skill,
        vector: Option<Vec<f32>>,
    ) -> MemoryResult<()> {
        let payload = serde_json::to_string(&skill)?;
        let write = match vector.clone() {
            Some(vector) => RecordWrite::with_embedding(skill.id.to_string(), payload, vector),
            None => RecordWrite::payload(skill.id.to_string(), payload),
        };
        self.records.write_batch(vec![write]).await?;
        if let Some(vector) = vector {
            state.vectors.insert(skill.id.as_str(), vector);
        }
        state.put(skill);
        Ok(())
    }

    /// Remove a skill. Returns `false` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete(&self, id: &SkillId) -> MemoryResult<bool> {
        let mut state = self.state.write().await;
        let Some(skill) = state.skills.get(id.as_str()) else {
            return Ok(false);
        };
        let name = skill.name.clone();
        self.records.delete(id.as_str()).await?;
        state.skills.remove(id.as_str());
        state.by_name.remove(&name);
        state.vectors.remove(id.as_str());
        info!(skill_id = %id, "Deleted skill");
        Ok(true)
    }

    /// Every skill, sorted by name.
    pub async fn all(&self) -> Vec<Skill> {
        let state = self.state.read().await;
        let mut skills: Vec<Skill> = state.skills.values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    /// Best skills by the chosen ranking.
    pub async fn top_skills(&self, limit: usize, ranking: SkillRanking) -> Vec<Skill> {
        let mut skills = self.all().await;
        match ranking {
            SkillRanking::SuccessRate => skills.sort_by(|a, b| {
                b.success_rate
                    .value()
                    .total_cmp(&a.success_rate.value())
                    .then_with(|| b.usage_count.cmp(&a.usage_count))
            }),
            SkillRanking::UsageCount => skills.sort_by(|a, b| {
                b.usage_count.cmp(&a.usage_count).then_with(|| {
                    b.success_rate.value().total_cmp(&a.success_rate.value())
                })
            }),
        }
        skills.truncate(limit);
        skills
    }

    /// Number of skills.
    pub async fn len(&self) -> usize {
        self.state.read().await.skills.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Totals over every skill.
    pub async fn stats(&self) -> ProceduralStats {
        let state = self.state.read().await;
        let total = state.skills.len();
        let total_usage = state.skills.values().map(|s| s.usage_count).sum();
        let rate_sum: f64 = state.skills.values().map(|s| s.success_rate.value()).sum();
        #[allow(clippy::cast_precision_loss)]
        let average_success_rate = if total == 0 { 0.0 } else { rate_sum / total as f64 };
        ProceduralStats {
            total,
            total_usage,
            average_success_rate,
        }
    }
}
