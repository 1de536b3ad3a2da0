//! Episode: one recorded interaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{EpisodeId, SkillId};
use crate::memory::core::metadata::{MemoryMetadata, MemoryOrigin, MemoryStatus};

/// Input for recording a new episode.
#[derive(Clone, Debug, PartialEq)]
pub struct EpisodeDraft {
    /// Situation the agent was in.
    pub context: String,
    /// What the agent did.
    pub action: String,
    /// What happened.
    pub outcome: String,
    /// Optional rationale.
    pub reasoning: String,
    /// Named entities involved.
    pub entities: Vec<String>,
    /// Importance in `[0, 1]`.
    pub importance: f64,
    /// Emotional valence in `[-1, 1]`.
    pub valence: f64,
    /// Who produced the episode.
    pub origin: MemoryOrigin,
    /// Free-form tags.
    pub tags: Vec<String>,
}

impl EpisodeDraft {
    /// Start a draft with neutral valence and 0.5 importance.
    #[must_use]
    pub fn new(
        context: impl Into<String>,
        action: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            context: context.into(),
            action: action.into(),
            outcome: outcome.into(),
            reasoning: String::new(),
            entities: Vec::new(),
            importance: 0.5,
            valence: 0.0,
            origin: MemoryOrigin::Agent,
            tags: Vec::new(),
        }
    }

    /// Set the reasoning text.
    #[must_use]
    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Set the named entities.
    #[must_use]
    pub fn entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the importance.
    #[must_use]
    pub const fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Set the valence.
    #[must_use]
    pub const fn valence(mut self, valence: f64) -> Self {
        self.valence = valence;
        self
    }

    /// Set the origin.
    #[must_use]
    pub const fn origin(mut self, origin: MemoryOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A recorded past interaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Content-derived identifier.
    pub id: EpisodeId,
    /// When the interaction happened.
    pub timestamp: DateTime<Utc>,
    /// Situation the agent was in.
    pub context: String,
    /// What the agent did.
    pub action: String,
    /// What happened.
    pub outcome: String,
    /// Optional rationale.
    #[serde(default)]
    pub reasoning: String,
    /// Named entities, deduplicated in first-seen order.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Emotional valence in `[-1, 1]`.
    pub valence: f64,
    /// Importance in `[0, 1]`.
    pub importance: f64,
    /// Skills this episode was consolidated into.
    #[serde(default)]
    pub consolidated_into: Vec<SkillId>,
    /// Common metadata.
    pub metadata: MemoryMetadata,
}

impl Episode {
    /// Build an episode from a draft, stamped at `now`.
    ///
    /// # Errors
    /// Returns [`MemoryError::InvalidInput`] if importance or valence are out of range
    /// or the action is empty.
    pub fn from_draft(draft: EpisodeDraft, now: DateTime<Utc>) -> MemoryResult<Self> {
        if !(0.0..=1.0).contains(&draft.importance) {
            return Err(MemoryError::invalid_input(format!(
                "importance must be within [0, 1], got {}",
                draft.importance
            )));
        }
        if !(-1.0..=1.0).contains(&draft.valence) {
            return Err(MemoryError::invalid_input(format!(
                "valence must be within [-1, 1], got {}",
                draft.valence
            )));
        }
        if draft.action.trim().is_empty() {
            return Err(MemoryError::invalid_input("episode action must not be empty"));
        }

        let mut entities: Vec<String> = Vec::with_capacity(draft.entities.len());
        for entity in draft.entities {
            let entity = entity.trim().to_string();
            if !entity.is_empty() && !entities.contains(&entity) {
                entities.push(entity);
            }
        }

        Ok(Self {
            id: EpisodeId::derive(now, &draft.context, &draft.action),
            timestamp: now,
            context: draft.context,
            action: draft.action,
            outcome: draft.outcome,
            reasoning: draft.reasoning,
            entities,
            valence: draft.valence,
            importance: draft.importance,
            consolidated_into: Vec::new(),
            metadata: MemoryMetadata::new(draft.origin, now).with_tags(draft.tags),
        })
    }

    /// Text fed to the embedding provider.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let mut text = format!(
            "Context: {}\nAction: {}\nOutcome: {}",
            self.context, self.action, self.outcome
        );
        if !self.reasoning.is_empty() {
            text.push_str("\nReasoning: ");
            text.push_str(&self.reasoning);
        }
        if !self.entities.is_empty() {
            text.push_str("\nEntities: ");
            text.push_str(&self.entities.join(", "));
        }
        text
    }

    /// Context, action and outcome joined as one sentence sequence.
    #[must_use]
    pub fn narrative(&self) -> String {
        format!("{}. {}. {}", self.context, self.action, self.outcome)
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn status(&self) -> MemoryStatus {
        self.metadata.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_draft_dedupes_entities() {
        let draft = EpisodeDraft::new("deploy", "run compose up", "ok")
            .entities(["docker", " docker ", "compose", ""])
            .importance(0.8)
            .valence(0.5);
        let episode = Episode::from_draft(draft, Utc::now()).unwrap();
        assert_eq!(episode.entities, vec!["docker", "compose"]);
        assert_eq!(episode.status(), MemoryStatus::Active);
        assert!(episode.id.as_str().starts_with("ep_"));
    }

    #[test]
    fn test_from_draft_rejects_out_of_range() {
        let now = Utc::now();
        let draft = EpisodeDraft::new("c", "a", "o").importance(1.5);
        assert!(Episode::from_draft(draft, now).is_err());
        let draft = EpisodeDraft::new("c", "a", "o").valence(-2.0);
        assert!(Episode::from_draft(draft, now).is_err());
        let draft = EpisodeDraft::new("c", "  ", "o");
        assert!(Episode::from_draft(draft, now).is_err());
        let draft = EpisodeDraft::new("c", "a", "o").importance(f64::NAN);
        assert!(Episode::from_draft(draft, now).is_err());
    }

    #[test]
    fn test_embedding_text_sections() {
        let draft = EpisodeDraft::new("ctx", "act", "out")
            .reasoning("because")
            .entities(["rust"]);
        let episode = Episode::from_draft(draft, Utc::now()).unwrap();
        let text = episode.embedding_text();
        assert!(text.contains("Context: ctx"));
        assert!(text.contains("Reasoning: because"));
        assert!(text.ends_with("Entities: rust"));
        assert_eq!(episode.narrative(), "ctx. act. out");
    }
}
