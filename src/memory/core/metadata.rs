//! Metadata shared by every stored memory entity.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who or what produced a memory entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOrigin {
    /// Entered directly by the user.
    User,
    /// Recorded by the agent while acting.
    #[default]
    Agent,
    /// Produced by the system itself (maintenance, imports).
    System,
    /// Derived by consolidation.
    Consolidation,
    /// Mined from free text by lexical extraction.
    Extraction,
}

impl MemoryOrigin {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
            Self::Consolidation => "consolidation",
            Self::Extraction => "extraction",
        }
    }
}

impl fmt::Display for MemoryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            "consolidation" => Ok(Self::Consolidation),
            "extraction" => Ok(Self::Extraction),
            other => Err(format!("unknown memory origin: {other}")),
        }
    }
}

/// Lifecycle state of a memory entity.
///
/// ```text
/// ACTIVE ──► CONSOLIDATED ──► ARCHIVED
///    └───────────────────────────▲
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryStatus {
    /// Live and eligible for consolidation.
    #[default]
    Active,
    /// Absorbed into a skill.
    Consolidated,
    /// Retired from default recall.
    Archived,
}

impl MemoryStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Re-entering the current state is accepted so repeated maintenance is idempotent.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, _)
                | (Self::Consolidated, Self::Consolidated | Self::Archived)
                | (Self::Archived, Self::Archived)
        )
    }

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Consolidated => "CONSOLIDATED",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusTransitionError {
    /// State the entity was in.
    pub from: MemoryStatus,
    /// State that was requested.
    pub to: MemoryStatus,
}

impl fmt::Display for StatusTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for StatusTransitionError {}

/// Metadata for a memory entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Number of times this entity was returned by a query.
    #[serde(default)]
    pub access_count: u32,
    /// Timestamp of the last access.
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    /// Origin of the entity.
    #[serde(default)]
    pub origin: MemoryOrigin,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: MemoryStatus,
}

impl MemoryMetadata {
    /// Create metadata stamped at `now`.
    #[must_use]
    pub const fn new(origin: MemoryOrigin, now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            access_count: 0,
            last_accessed: None,
            origin,
            tags: Vec::new(),
            status: MemoryStatus::Active,
        }
    }

    /// Attach tags to the metadata.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Record that this entity was returned to a caller.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = Some(now);
    }

    /// Bump the update timestamp.
    pub const fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Move to a new lifecycle state.
    ///
    /// # Errors
    /// Returns [`StatusTransitionError`] if the transition is not allowed.
    pub fn transition(
        &mut self,
        next: MemoryStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusTransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }
}
