//! Skill: a generalized action pattern learned from episodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::core::ids::{EpisodeId, SkillId};
use crate::memory::core::metadata::{MemoryMetadata, MemoryOrigin};

/// Success rate that can only hold a value in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct SuccessRate(f64);

impl SuccessRate {
    /// Clamp `value` into `[0, 1]`; NaN becomes 0.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(crate::memory::core::score::unit(value))
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Fold one observation into the running average.
    ///
    /// `uses` is the usage count *including* this observation; the new rate is
    /// `old * (1 - 1/n) + outcome / n`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn observe(self, success: bool, uses: u64) -> Self {
        let n = uses.max(1) as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        Self::new(self.0.mul_add(1.0 - 1.0 / n, outcome / n))
    }
}

impl From<f64> for SuccessRate {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<SuccessRate> for f64 {
    fn from(value: SuccessRate) -> Self {
        value.0
    }
}

/// Input for creating a skill.
#[derive(Clone, Debug, PartialEq)]
pub struct SkillDraft {
    /// Unique skill name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Generalized pattern text.
    pub pattern: String,
    /// Trigger keywords.
    pub triggers: Vec<String>,
    /// Action template with `{{PLACEHOLDER}}` slots.
    pub action_template: String,
    /// Initial success rate.
    pub success_rate: f64,
    /// Episodes the skill was learned from.
    pub source_episodes: Vec<EpisodeId>,
    /// Who produced the skill.
    pub origin: MemoryOrigin,
}

impl SkillDraft {
    /// Start a draft with a 0.5 success rate.
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pattern: pattern.into(),
            triggers: Vec::new(),
            action_template: String::new(),
            success_rate: 0.5,
            source_episodes: Vec::new(),
            origin: MemoryOrigin::User,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the trigger keywords.
    #[must_use]
    pub fn triggers(mut self, triggers: Vec<String>) -> Self {
        self.triggers = triggers;
        self
    }

    /// Set the action template.
    #[must_use]
    pub fn action_template(mut self, template: impl Into<String>) -> Self {
        self.action_template = template.into();
        self
    }

    /// Set the initial success rate.
    #[must_use]
    pub const fn success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate;
        self
    }

    /// Set the source episodes.
    #[must_use]
    pub fn source_episodes(mut self, episodes: Vec<EpisodeId>) -> Self {
        self.source_episodes = episodes;
        self
    }

    /// Set the origin.
    #[must_use]
    pub const fn origin(mut self, origin: MemoryOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Partial update applied by [`Skill::apply_update`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkillUpdate {
    /// New pattern text.
    pub pattern: Option<String>,
    /// New trigger keywords.
    pub triggers: Option<Vec<String>>,
    /// New action template.
    pub action_template: Option<String>,
}

impl SkillUpdate {
    /// Whether the update changes anything that feeds the embedding.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pattern.is_none() && self.triggers.is_none() && self.action_template.is_none()
    }
}

/// A reusable action pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Identifier derived from the name and the initial pattern.
    pub id: SkillId,
    /// Unique skill name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Generalized pattern text.
    pub pattern: String,
    /// Trigger keywords.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Action template with placeholders.
    #[serde(default)]
    pub action_template: String,
    /// Usage-weighted success rate.
    pub success_rate: SuccessRate,
    /// Number of recorded uses.
    #[serde(default)]
    pub usage_count: u64,
    /// Episodes the skill was learned from.
    #[serde(default)]
    pub source_episodes: Vec<EpisodeId>,
    /// Common metadata.
    pub metadata: MemoryMetadata,
}

impl Skill {
    /// Build a skill from a draft, stamped at `now`.
    #[must_use]
    pub fn from_draft(draft: SkillDraft, now: DateTime<Utc>) -> Self {
        let mut sources: Vec<EpisodeId> = Vec::with_capacity(draft.source_episodes.len());
        for id in draft.source_episodes {
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
        Self {
            id: SkillId::derive(&draft.name, &draft.pattern),
            name: draft.name,
            description: draft.description,
            pattern: draft.pattern,
            triggers: draft.triggers,
            action_template: draft.action_template,
            success_rate: SuccessRate::new(draft.success_rate),
            usage_count: 0,
            source_episodes: sources,
            metadata: MemoryMetadata::new(draft.origin, now),
        }
    }

    /// Text fed to the embedding provider.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!(
            "Skill: {}\nDescription: {}\nPattern: {}\nTriggers: {}\nAction: {}",
            self.name,
            self.description,
            self.pattern,
            self.triggers.join(", "),
            self.action_template
        )
    }

    /// Record one use of the skill.
    pub fn record_usage(&mut self, success: bool, now: DateTime<Utc>) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.success_rate = self.success_rate.observe(success, self.usage_count);
        self.metadata.record_access(now);
        self.metadata.touch(now);
    }

    /// Apply a partial update.
    pub fn apply_update(&mut self, update: SkillUpdate, now: DateTime<Utc>) {
        if let Some(pattern) = update.pattern {
            self.pattern = pattern;
        }
        if let Some(triggers) = update.triggers {
            self.triggers = triggers;
        }
        if let Some(template) = update.action_template {
            self.action_template = template;
        }
        self.metadata.touch(now);
    }

    /// Append source episodes not already referenced. Returns how many were added.
    pub fn add_source_episodes(&mut self, episodes: &[EpisodeId], now: DateTime<Utc>) -> usize {
        let before = self.source_episodes.len();
        for id in episodes {
            if !self.source_episodes.contains(id) {
                self.source_episodes.push(id.clone());
            }
        }
        let added = self.source_episodes.len() - before;
        if added > 0 {
            self.metadata.touch(now);
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill() -> Skill {
        Skill::from_draft(
            SkillDraft::new("skill_deploy", "deploy the app").success_rate(0.0),
            Utc::now(),
        )
    }

    #[test]
    fn test_success_rate_converges_to_one() {
        let mut skill = skill();
        let now = Utc::now();
        for _ in 0..50 {
            skill.record_usage(true, now);
        }
        assert_eq!(skill.usage_count, 50);
        assert!((skill.success_rate.value() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_never_drives_rate_negative() {
        let mut skill = skill();
        let now = Utc::now();
        for i in 0..40 {
            skill.record_usage(i != 20, now);
            let rate = skill.success_rate.value();
            assert!((0.0..=1.0).contains(&rate));
        }
        assert!(skill.success_rate.value() > 0.9);
    }

    #[test]
    fn test_first_observation_replaces_initial_rate() {
        let rate = SuccessRate::new(0.6).observe(false, 1);
        assert!(rate.value().abs() < 1e-12);
    }

    #[test]
    fn test_success_rate_deserializes_clamped() {
        let rate: SuccessRate = serde_json::from_str("1.7").unwrap();
        assert!((rate.value() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_add_source_episodes_dedupes() {
        let mut skill = skill();
        let ts = Utc::now();
        let a = crate::memory::core::ids::EpisodeId::derive(ts, "c", "a");
        let b = crate::memory::core::ids::EpisodeId::derive(ts, "c", "b");
        assert_eq!(skill.add_source_episodes(&[a.clone(), b.clone()], ts), 2);
        assert_eq!(skill.add_source_episodes(&[a, b], ts), 0);
        assert_eq!(skill.source_episodes.len(), 2);
    }

    #[test]
    fn test_apply_update_keeps_id() {
        let mut skill = skill();
        let id = skill.id.clone();
        skill.apply_update(
            SkillUpdate {
                pattern: Some("deploy the service".to_string()),
                ..SkillUpdate::default()
            },
            Utc::now(),
        );
        assert_eq!(skill.id, id);
        assert_eq!(skill.pattern, "deploy the service");
    }
}
