//! Batch consolidation of successful episodes into skills and graph facts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::memory::consolidation::log::{ConsolidationLog, ConsolidationResult};
use crate::memory::consolidation::patterns::{
    ActionGeneralizer, LeadingTokensGrouper, PatternGrouper, common_pattern, trigger_keywords,
};
use crate::memory::core::config::ConsolidationConfig;
use crate::memory::core::episode::Episode;
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::ids::{EpisodeId, SkillId};
use crate::memory::core::metadata::{MemoryOrigin, MemoryStatus};
use crate::memory::core::skill::{SkillDraft, SkillUpdate};
use crate::memory::episodic::store::EpisodicStore;
use crate::memory::graph::knowledge::KnowledgeGraph;
use crate::memory::procedural::store::ProceduralStore;

/// Per-run overrides; unset values come from [`ConsolidationConfig`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsolidationOptions {
    /// Minimum successful episodes needed to run.
    pub min_episodes: Option<usize>,
    /// Minimum valence for an episode to count as successful.
    pub min_valence: Option<f64>,
    /// Analyze and count without writing anything.
    pub dry_run: bool,
}

/// Summary of one pattern group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupSummary {
    /// Episodes in the group.
    pub count: usize,
    /// Mean valence of the group.
    pub average_valence: f64,
    /// Action of the first episode, truncated.
    pub sample_action: String,
}

/// A group large enough to become a skill.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PotentialSkill {
    /// Name the skill would get.
    pub name: String,
    /// Episodes backing it.
    pub episodes: usize,
    /// Mean valence, used as the initial success rate.
    pub confidence: f64,
}

/// Preview of what consolidation would group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PatternAnalysis {
    /// Recent episodes that are not archived.
    pub total_episodes: usize,
    /// Active episodes above the valence threshold.
    pub successful_episodes: usize,
    /// Groups keyed by pattern key.
    pub groups: BTreeMap<String, GroupSummary>,
    /// Groups that reach the skill threshold.
    pub potential_skills: Vec<PotentialSkill>,
}

/// What happened to one group.
enum SkillOutcome {
    Created(SkillId),
    Updated(SkillId),
}

/// Skill derived from a group of similar episodes.
struct SkillCandidate {
    name: String,
    description: String,
    pattern: String,
    triggers: Vec<String>,
    action_template: String,
    success_rate: f64,
    sources: Vec<EpisodeId>,
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let len = values.len();
    if len == 0 {
        return 0.0;
    }
    values.sum::<f64>() / len as f64
}

/// Turns successful episodes into skills and knowledge triples.
pub struct Consolidator {
    episodic: Arc<EpisodicStore>,
    procedural: Arc<ProceduralStore>,
    knowledge: Arc<KnowledgeGraph>,
    config: ConsolidationConfig,
    grouper: Arc<dyn PatternGrouper>,
    generalizer: ActionGeneralizer,
    log: ConsolidationLog,
}

impl Consolidator {
    /// Create a consolidator using the leading-tokens grouping strategy.
    ///
    /// # Errors
    /// Returns an error if the template patterns fail to compile.
    pub fn new(
        episodic: Arc<EpisodicStore>,
        procedural: Arc<ProceduralStore>,
        knowledge: Arc<KnowledgeGraph>,
        config: ConsolidationConfig,
        log: ConsolidationLog,
    ) -> MemoryResult<Self> {
        let grouper = Arc::new(LeadingTokensGrouper::new(config.pattern_key_tokens));
        Ok(Self {
            episodic,
            procedural,
            knowledge,
            config,
            grouper,
            generalizer: ActionGeneralizer::new()?,
            log,
        })
    }

    /// Replace the grouping strategy.
    #[must_use]
    pub fn with_grouper(mut self, grouper: Arc<dyn PatternGrouper>) -> Self {
        self.grouper = grouper;
        self
    }

    /// Run one consolidation pass.
    ///
    /// Fewer than `min_episodes` successful episodes aborts with a zero result and
    /// no writes. A dry run stops after analysis. Otherwise the run is recorded in
    /// the consolidation log.
    ///
    /// # Errors
    /// Returns an error if a store write fails; writes made before the failure stay.
    pub async fn consolidate(
        &self,
        options: ConsolidationOptions,
    ) -> MemoryResult<ConsolidationResult> {
        let min_episodes = options.min_episodes.unwrap_or(self.config.min_episodes);
        let min_valence = options.min_valence.unwrap_or(self.config.min_valence);
        let mut result = ConsolidationResult::empty(Utc::now(), options.dry_run);

        let successful = self
            .episodic
            .successful_episodes(min_valence, self.config.batch_limit)
            .await;
        if successful.len() < min_episodes {
            result.detail(
                "message",
                format!(
                    "not enough successful episodes ({} < {min_episodes})",
                    successful.len()
                ),
            );
            info!(found = successful.len(), min_episodes, "Consolidation skipped");
            return Ok(result);
        }
        result.episodes_processed = successful.len();

        let groups = self.grouper.group(&successful).await?;
        result.detail("pattern_groups", groups.len());
        result.detail("grouper", self.grouper.name());

        let mut skill_ids = Vec::new();
        for (key, episodes) in &groups {
            if episodes.len() < self.config.min_skill_occurrences {
                continue;
            }
            let candidate = self.candidate(key, episodes);
            if options.dry_run {
                if self.procedural.get_by_name(&candidate.name).await.is_some() {
                    result.skills_updated += 1;
                } else {
                    result.skills_created += 1;
                }
                continue;
            }
            let outcome = self.apply_candidate(candidate).await?;
            let skill_id = match outcome {
                SkillOutcome::Created(id) => {
                    result.skills_created += 1;
                    id
                }
                SkillOutcome::Updated(id) => {
                    result.skills_updated += 1;
                    id
                }
            };
            let ids: Vec<EpisodeId> = episodes.iter().map(|e| e.id.clone()).collect();
            self.episodic.mark_consolidated(&ids, &skill_id).await?;
            skill_ids.push(skill_id.to_string());
        }

        if options.dry_run {
            info!(
                groups = groups.len(),
                would_create = result.skills_created,
                would_update = result.skills_updated,
                "Consolidation dry run"
            );
            return Ok(result);
        }
        result.detail("skills", skill_ids);

        for episode in &successful {
            result.triples_extracted += self.extract_knowledge(episode).await?;
        }

        let cutoff = Utc::now() - Duration::days(self.config.archive_after_days);
        result.episodes_archived = self.episodic.archive_consolidated_before(cutoff).await?;

        let path = self.log.append(&result).await?;
        info!(
            processed = result.episodes_processed,
            created = result.skills_created,
            updated = result.skills_updated,
            triples = result.triples_extracted,
            archived = result.episodes_archived,
            log = %path.display(),
            "Consolidation finished"
        );
        Ok(result)
    }

    fn candidate(&self, key: &str, episodes: &[Episode]) -> SkillCandidate {
        let actions: Vec<&str> = episodes.iter().map(|e| e.action.as_str()).collect();
        let contexts: Vec<&str> = episodes.iter().map(|e| e.context.as_str()).collect();
        let pattern = common_pattern(&actions);
        SkillCandidate {
            name: format!("skill_{key}"),
            description: format!("Learned from {} successful episodes", episodes.len()),
            triggers: trigger_keywords(&contexts, self.config.max_triggers),
            action_template: self.generalizer.generalize(&pattern),
            pattern,
            success_rate: mean(episodes.iter().map(|e| e.valence)),
            sources: episodes.iter().map(|e| e.id.clone()).collect(),
        }
    }

    async fn apply_candidate(&self, candidate: SkillCandidate) -> MemoryResult<SkillOutcome> {
        if let Some(existing) = self.procedural.get_by_name(&candidate.name).await {
            let update = SkillUpdate {
                pattern: Some(candidate.pattern),
                triggers: Some(candidate.triggers),
                action_template: Some(candidate.action_template),
            };
            self.procedural.update_skill(&existing.id, update).await?;
            self.procedural
                .add_source_episodes(&existing.id, &candidate.sources)
                .await?;
            debug!(skill_id = %existing.id, "Updated skill from episodes");
            return Ok(SkillOutcome::Updated(existing.id));
        }
        let draft = SkillDraft::new(candidate.name, candidate.pattern)
            .description(candidate.description)
            .triggers(candidate.triggers)
            .action_template(candidate.action_template)
            .success_rate(candidate.success_rate)
            .source_episodes(candidate.sources)
            .origin(MemoryOrigin::Consolidation);
        Ok(SkillOutcome::Created(self.procedural.create_skill(draft).await?))
    }

    async fn extract_knowledge(&self, episode: &Episode) -> MemoryResult<usize> {
        let mut count = self
            .knowledge
            .extract_from_text(&episode.narrative(), Some(&episode.id))
            .await?
            .len();
        for entity in &episode.entities {
            self.knowledge
                .add_triple(
                    entity,
                    "mentioned_in",
                    episode.id.as_str(),
                    self.config.mention_confidence,
                    Some(episode.id.clone()),
                )
                .await?;
            count += 1;
        }
        Ok(count)
    }

    /// Group the episodes the next run would pick up, without consolidating them.
    ///
    /// `total_episodes` counts recent non-archived episodes; only active ones
    /// above the valence threshold are grouped.
    ///
    /// # Errors
    /// Returns an error if the grouping strategy fails.
    pub async fn analyze_patterns(&self, limit: usize) -> MemoryResult<PatternAnalysis> {
        let total = self
            .episodic
            .recent(limit)
            .await
            .iter()
            .filter(|e| e.status() != MemoryStatus::Archived)
            .count();
        let successful = self
            .episodic
            .successful_episodes(self.config.min_valence, limit)
            .await;
        let groups = self.grouper.group(&successful).await?;

        let mut analysis = PatternAnalysis {
            total_episodes: total,
            successful_episodes: successful.len(),
            groups: BTreeMap::new(),
            potential_skills: Vec::new(),
        };
        for (key, episodes) in groups {
            let summary = GroupSummary {
                count: episodes.len(),
                average_valence: mean(episodes.iter().map(|e| e.valence)),
                sample_action: episodes
                    .first()
                    .map(|e| e.action.chars().take(100).collect())
                    .unwrap_or_default(),
            };
            if summary.count >= self.config.min_skill_occurrences {
                analysis.potential_skills.push(PotentialSkill {
                    name: format!("skill_{key}"),
                    episodes: summary.count,
                    confidence: summary.average_valence,
                });
            }
            analysis.groups.insert(key, summary);
        }
        Ok(analysis)
    }

    /// Past runs, newest first.
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be read.
    pub async fn history(&self, limit: usize) -> MemoryResult<Vec<ConsolidationResult>> {
        self.log.history(limit).await
    }

    /// Number of recorded runs.
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be read.
    pub async fn run_count(&self) -> MemoryResult<usize> {
        self.log.count().await
    }
}

impl std::fmt::Debug for Consolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consolidator")
            .field("grouper", &self.grouper.name())
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::core::config::{KnowledgeConfig, ScoringConfig};
    use crate::memory::core::episode::EpisodeDraft;
    use crate::memory::embedding::hashing::HashingEmbedder;
    use std::path::Path;

    struct Fixture {
        episodic: Arc<EpisodicStore>,
        procedural: Arc<ProceduralStore>,
        knowledge: Arc<KnowledgeGraph>,
        consolidator: Consolidator,
    }

    async fn fixture(dir: &Path) -> Fixture {
        let embedder = Arc::new(HashingEmbedder::new(128));
        let episodic = Arc::new(
            EpisodicStore::open(&dir.join("episodic"), embedder.clone(), ScoringConfig::default())
                .await
                .unwrap(),
        );
        let procedural = Arc::new(
            ProceduralStore::open(&dir.join("procedural"), embedder.clone(), ScoringConfig::default())
                .await
                .unwrap(),
        );
        let knowledge = Arc::new(
            KnowledgeGraph::open(&dir.join("knowledge"), embedder, KnowledgeConfig::default())
                .await
                .unwrap(),
        );
        let consolidator = Consolidator::new(
            episodic.clone(),
            procedural.clone(),
            knowledge.clone(),
            ConsolidationConfig::default(),
            ConsolidationLog::new(dir.join("consolidation")),
        )
        .unwrap();
        Fixture {
            episodic,
            procedural,
            knowledge,
            consolidator,
        }
    }

    async fn record_docker_episodes(episodic: &EpisodicStore) -> Vec<EpisodeId> {
        let mut ids = Vec::new();
        for host in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            let draft = EpisodeDraft::new(
                format!("provisioning server {host}"),
                format!("install docker compose on {host}"),
                "containers running",
            )
            .valence(0.6)
            .entities(["docker"]);
            ids.push(episodic.record(draft).await.unwrap());
        }
        ids
    }

    fn options(min_episodes: usize, dry_run: bool) -> ConsolidationOptions {
        ConsolidationOptions {
            min_episodes: Some(min_episodes),
            min_valence: None,
            dry_run,
        }
    }

    #[tokio::test]
    async fn test_docker_compose_episodes_become_one_skill() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path()).await;
        let ids = record_docker_episodes(&fx.episodic).await;

        let result = fx.consolidator.consolidate(options(3, false)).await.unwrap();
        assert_eq!(result.episodes_processed, 5);
        assert_eq!(result.skills_created, 1);
        assert_eq!(result.skills_updated, 0);
        assert_eq!(result.episodes_archived, 0);
        assert!(result.triples_extracted >= 5);

        let skills = fx.procedural.all().await;
        assert_eq!(skills.len(), 1);
        let skill = &skills[0];
        assert_eq!(skill.name, "skill_install_docker_compose");
        assert_eq!(skill.source_episodes.len(), 5);
        assert_eq!(skill.pattern, "install docker compose on");
        assert!(skill.triggers.contains(&"provisioning".to_string()));
        assert!(skill.triggers.contains(&"server".to_string()));
        assert!((skill.success_rate.value() - 0.6).abs() < 1e-9);
        assert_eq!(skill.metadata.origin, MemoryOrigin::Consolidation);

        for id in &ids {
            let episode = fx.episodic.get(id).await.unwrap();
            assert_eq!(episode.status(), MemoryStatus::Consolidated);
            assert_eq!(episode.consolidated_into, vec![skill.id.clone()]);
        }
        let mentions = fx.knowledge.by_predicate("mentioned_in").await;
        assert_eq!(mentions.len(), 5);

        let history = fx.consolidator.history(5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], result);
    }

    #[tokio::test]
    async fn test_below_threshold_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path()).await;
        record_docker_episodes(&fx.episodic).await;

        let result = fx.consolidator.consolidate(options(10, false)).await.unwrap();
        assert_eq!(result.episodes_processed, 0);
        assert_eq!(result.skills_created, 0);
        assert_eq!(result.skills_updated, 0);
        assert_eq!(result.triples_extracted, 0);
        assert_eq!(result.episodes_archived, 0);
        assert!(result.details.contains_key("message"));
        assert!(fx.procedural.is_empty().await);
        assert!(fx.knowledge.is_empty().await);
        assert_eq!(fx.episodic.stats().await.active, 5);
        assert!(fx.consolidator.history(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path()).await;
        record_docker_episodes(&fx.episodic).await;

        let result = fx.consolidator.consolidate(options(3, true)).await.unwrap();
        assert!(result.dry_run);
        assert_eq!(result.skills_created, 1);
        assert!(fx.procedural.is_empty().await);
        assert!(fx.knowledge.is_empty().await);
        assert_eq!(fx.episodic.stats().await.active, 5);
        assert!(fx.consolidator.history(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_updates_existing_skill() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path()).await;
        record_docker_episodes(&fx.episodic).await;
        fx.consolidator.consolidate(options(3, false)).await.unwrap();
        record_docker_episodes(&fx.episodic).await;

        let result = fx.consolidator.consolidate(options(3, false)).await.unwrap();
        assert_eq!(result.skills_created, 0);
        assert_eq!(result.skills_updated, 1);
        let skill = fx
            .procedural
            .get_by_name("skill_install_docker_compose")
            .await
            .unwrap();
        assert_eq!(skill.source_episodes.len(), 10);
    }

    #[tokio::test]
    async fn test_analyze_patterns_previews_groups() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path()).await;
        record_docker_episodes(&fx.episodic).await;
        fx.episodic
            .record(EpisodeDraft::new("ctx", "restart nginx", "failed").valence(-0.5))
            .await
            .unwrap();

        let analysis = fx.consolidator.analyze_patterns(50).await.unwrap();
        assert_eq!(analysis.total_episodes, 6);
        assert_eq!(analysis.successful_episodes, 5);
        assert_eq!(analysis.groups["install_docker_compose"].count, 5);
        assert_eq!(analysis.potential_skills.len(), 1);
        assert!(fx.procedural.is_empty().await);
    }

    #[tokio::test]
    async fn test_analyze_patterns_skips_consolidated_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path()).await;
        record_docker_episodes(&fx.episodic).await;
        let result = fx.consolidator.consolidate(options(3, false)).await.unwrap();
        assert_eq!(result.skills_created, 1);

        let analysis = fx.consolidator.analyze_patterns(50).await.unwrap();
        assert_eq!(analysis.total_episodes, 5);
        assert_eq!(analysis.successful_episodes, 0);
        assert!(analysis.groups.is_empty());
        assert!(analysis.potential_skills.is_empty());

        let preview = fx.consolidator.consolidate(options(0, true)).await.unwrap();
        assert_eq!(preview.episodes_processed, 0);
        assert_eq!(preview.skills_created, 0);
    }
}
