//! Bi-temporal fact graph.
//!
//! Every fact version carries a validity interval (`valid_from`..`valid_to`) and
//! the time it was recorded. Versions are never edited in place: an update
//! closes the current version and appends a successor. State persists as an
//! append-only JSON Lines log where the last record for an id wins.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::FactVersionId;
use crate::memory::core::triple::validate_confidence;
use crate::memory::storage::atomic::write_atomic;

const LOG_FILE: &str = "triples.jsonl";

/// One version of a temporal fact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemporalTriple {
    /// Unique per version.
    pub id: FactVersionId,
    /// Entity the fact is about.
    pub subject: String,
    /// Relation name.
    pub predicate: String,
    /// Value of the relation.
    pub object: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// When the fact became true.
    pub valid_from: DateTime<Utc>,
    /// When it stopped being true; `None` while it still holds.
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    /// When this version was recorded.
    pub transaction_time: DateTime<Utc>,
    /// Where the fact came from.
    #[serde(default)]
    pub source: String,
    /// 1 for the first version of a chain.
    pub version: u32,
    /// Version this one replaced.
    #[serde(default)]
    pub supersedes: Option<FactVersionId>,
}

impl TemporalTriple {
    /// Whether the fact holds at `instant`. Both interval ends are inclusive.
    #[must_use]
    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.valid_from && self.valid_to.is_none_or(|end| instant <= end)
    }

    /// Whether the version is still open-ended.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Days since the version was recorded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let seconds = now
            .signed_duration_since(self.transaction_time)
            .num_seconds()
            .max(0);
        seconds as f64 / 86_400.0
    }

    /// Confidence decayed hyperbolically with age: `confidence / (1 + rate * age_days)`.
    #[must_use]
    pub fn decay_score(&self, rate_per_day: f64, now: DateTime<Utc>) -> f64 {
        self.confidence / rate_per_day.max(0.0).mul_add(self.age_days(now), 1.0)
    }
}

/// Input for [`TemporalGraph::add`].
#[derive(Clone, Debug)]
pub struct FactDraft {
    subject: String,
    predicate: String,
    object: String,
    confidence: f64,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    source: String,
}

impl FactDraft {
    /// Open fact valid from now, with confidence 1.0.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: 1.0,
            valid_from: None,
            valid_to: None,
            source: String::new(),
        }
    }

    /// Confidence in `[0, 1]`.
    #[must_use]
    pub const fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Defaults to the time of insertion.
    #[must_use]
    pub const fn valid_from(mut self, at: DateTime<Utc>) -> Self {
        self.valid_from = Some(at);
        self
    }

    /// End of validity; leave unset for a fact that still holds.
    #[must_use]
    pub const fn valid_to(mut self, at: DateTime<Utc>) -> Self {
        self.valid_to = Some(at);
        self
    }

    /// Provenance label.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Changes applied by [`TemporalGraph::update`]. Unset fields carry over.
#[derive(Clone, Debug, Default)]
pub struct FactUpdate {
    /// Replacement value.
    pub object: Option<String>,
    /// Replacement confidence.
    pub confidence: Option<f64>,
    /// End of validity for the new version.
    pub valid_to: Option<DateTime<Utc>>,
}

/// Optional subject/predicate/object filter. Matching ignores case.
#[derive(Clone, Debug, Default)]
pub struct FactFilter {
    /// Exact subject.
    pub subject: Option<String>,
    /// Exact predicate.
    pub predicate: Option<String>,
    /// Exact object.
    pub object: Option<String>,
}

impl FactFilter {
    /// Match this subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Match this predicate.
    #[must_use]
    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Match this object.
    #[must_use]
    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }
}

/// Role of a version in its chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    /// Not ended, or ending in the future.
    Current,
    /// Closed and replaced by a later version.
    Superseded,
    /// Closed without a successor.
    Invalidated,
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Current => "CURRENT",
            Self::Superseded => "SUPERSEDED",
            Self::Invalidated => "INVALIDATED",
        })
    }
}

/// A version annotated with its state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// The stored version.
    pub triple: TemporalTriple,
    /// Its role in the chain.
    pub state: VersionState,
}

/// Which boundary an event marks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    /// Start of validity.
    FactAdded,
    /// End of validity.
    FactEnded,
}

/// Position of the entity in the triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    /// The entity is the subject.
    Subject,
    /// The entity is the object.
    Object,
}

/// A validity boundary of a fact involving an entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineEvent {
    /// Boundary instant.
    pub time: DateTime<Utc>,
    /// Start or end.
    pub kind: TimelineEventKind,
    /// Where the entity appears.
    pub role: EntityRole,
    /// The version the boundary belongs to.
    pub triple: TemporalTriple,
}

/// Counts over the temporal graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TemporalStats {
    /// Every stored version.
    pub total_versions: usize,
    /// Versions valid now.
    pub current_versions: usize,
    /// Distinct subjects.
    pub unique_subjects: usize,
    /// Distinct predicates.
    pub unique_predicates: usize,
    /// Distinct objects.
    pub unique_objects: usize,
    /// Mean confidence of current versions.
    pub average_confidence: f64,
    /// Records in the log, including overwritten ones.
    pub log_records: usize,
}

#[derive(Default)]
struct TemporalState {
    versions: HashMap<FactVersionId, TemporalTriple>,
    by_subject: HashMap<String, Vec<FactVersionId>>,
    by_predicate: HashMap<String, Vec<FactVersionId>>,
    by_object: HashMap<String, Vec<FactVersionId>>,
    log_records: usize,
}

impl TemporalState {
    fn put(&mut self, triple: TemporalTriple) {
        if !self.versions.contains_key(&triple.id) {
            for (index, key) in [
                (&mut self.by_subject, &triple.subject),
                (&mut self.by_predicate, &triple.predicate),
                (&mut self.by_object, &triple.object),
            ] {
                index.entry(key.to_lowercase()).or_default().push(triple.id);
            }
        }
        self.versions.insert(triple.id, triple);
    }

    fn candidates(&self, filter: &FactFilter) -> Vec<&TemporalTriple> {
        let lookups = [
            (&self.by_subject, &filter.subject),
            (&self.by_predicate, &filter.predicate),
            (&self.by_object, &filter.object),
        ];
        let mut selected: Option<HashSet<FactVersionId>> = None;
        for (index, wanted) in lookups {
            let Some(wanted) = wanted else { continue };
            let ids: HashSet<FactVersionId> = index
                .get(&wanted.to_lowercase())
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            selected = Some(match selected {
                Some(current) => current.intersection(&ids).copied().collect(),
                None => ids,
            });
        }
        let mut triples: Vec<&TemporalTriple> = match selected {
            Some(ids) => ids.iter().filter_map(|id| self.versions.get(id)).collect(),
            None => self.versions.values().collect(),
        };
        triples.sort_by(|a, b| {
            a.valid_from
                .cmp(&b.valid_from)
                .then_with(|| a.version.cmp(&b.version))
        });
        triples
    }

    fn open_version(&self, subject: &str, predicate: &str) -> Option<&TemporalTriple> {
        let predicate = predicate.to_lowercase();
        self.by_subject
            .get(&subject.to_lowercase())?
            .iter()
            .filter_map(|id| self.versions.get(id))
            .find(|t| t.is_open() && t.predicate.to_lowercase() == predicate)
    }

    fn superseded_ids(&self) -> HashSet<FactVersionId> {
        self.versions.values().filter_map(|t| t.supersedes).collect()
    }
}

/// Versioned fact store with point-in-time queries.
pub struct TemporalGraph {
    log_path: PathBuf,
    state: RwLock<TemporalState>,
}

impl TemporalGraph {
    /// Open the graph under `dir`, replaying the log. Unreadable lines are skipped.
    ///
    /// # Errors
    /// Returns an error if the directory or log cannot be read.
    pub async fn open(dir: &Path) -> MemoryResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let log_path = dir.join(LOG_FILE);
        let raw = match tokio::fs::read_to_string(&log_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let mut state = TemporalState::default();
        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            state.log_records += 1;
            match serde_json::from_str::<TemporalTriple>(line) {
                Ok(triple) => state.put(triple),
                Err(err) => warn!(line = line_no + 1, error = %err, "Skipping corrupt temporal record"),
            }
        }
        info!(versions = state.versions.len(), "Temporal graph loaded");
        Ok(Self {
            log_path,
            state: RwLock::new(state),
        })
    }

    async fn append(&self, state: &mut TemporalState, triples: &[TemporalTriple]) -> MemoryResult<()> {
        let mut buffer = String::new();
        for triple in triples {
            buffer.push_str(&serde_json::to_string(triple)?);
            buffer.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.sync_data().await?;
        state.log_records += triples.len();
        for triple in triples {
            state.put(triple.clone());
        }
        Ok(())
    }

    /// Record a new fact version.
    ///
    /// When the new version is open-ended and its (subject, predicate) already has
    /// an open version, that version is closed and the new one supersedes it. An
    /// open-ended version starting before the current one is rejected.
    ///
    /// # Errors
    /// Returns an error on invalid input or if the log cannot be written.
    pub async fn add(&self, draft: FactDraft) -> MemoryResult<FactVersionId> {
        let (subject, predicate, object) = (
            draft.subject.trim().to_string(),
            draft.predicate.trim().to_string(),
            draft.object.trim().to_string(),
        );
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return Err(MemoryError::invalid_input(
                "fact subject, predicate and object must not be empty",
            ));
        }
        validate_confidence(draft.confidence)?;
        let now = Utc::now();
        let valid_from = draft.valid_from.unwrap_or(now);
        if draft.valid_to.is_some_and(|end| end < valid_from) {
            return Err(MemoryError::invalid_input("valid_to precedes valid_from"));
        }

        let mut state = self.state.write().await;
        let mut triple = TemporalTriple {
            id: FactVersionId::new(),
            subject,
            predicate,
            object,
            confidence: draft.confidence,
            valid_from,
            valid_to: draft.valid_to,
            transaction_time: now,
            source: draft.source,
            version: 1,
            supersedes: None,
        };
        let mut writes = Vec::with_capacity(2);
        if triple.is_open() {
            if let Some(previous) = state.open_version(&triple.subject, &triple.predicate) {
                if valid_from < previous.valid_from {
                    return Err(MemoryError::invalid_input(
                        "open fact starts before the current version; give it a valid_to",
                    ));
                }
                let mut closed = previous.clone();
                closed.valid_to = Some(valid_from.max(closed.valid_from));
                triple.version = closed.version + 1;
                triple.supersedes = Some(closed.id);
                writes.push(closed);
            }
        }
        let id = triple.id;
        writes.push(triple);
        self.append(&mut state, &writes).await?;
        debug!(fact_id = %id, "Added temporal fact");
        Ok(id)
    }

    /// Close an open version and append its successor, valid from now.
    ///
    /// A version that only starts in the future is closed at its own start, and
    /// the successor takes over from there. Returns `None` for an unknown id.
    ///
    /// # Errors
    /// Returns [`MemoryError::StaleVersion`] if the version is already closed, or an
    /// error on invalid input or log failure.
    pub async fn update(
        &self,
        id: FactVersionId,
        update: FactUpdate,
    ) -> MemoryResult<Option<FactVersionId>> {
        if let Some(confidence) = update.confidence {
            validate_confidence(confidence)?;
        }
        let now = Utc::now();
        let mut state = self.state.write().await;
        let Some(previous) = state.versions.get(&id) else {
            return Ok(None);
        };
        if !previous.is_open() {
            return Err(MemoryError::StaleVersion(id.to_string()));
        }
        let cutover = now.max(previous.valid_from);
        if update.valid_to.is_some_and(|end| end < cutover) {
            return Err(MemoryError::invalid_input("valid_to precedes the update time"));
        }
        let object = match update.object {
            Some(object) if object.trim().is_empty() => {
                return Err(MemoryError::invalid_input("fact object must not be empty"));
            }
            Some(object) => object.trim().to_string(),
            None => previous.object.clone(),
        };

        let mut closed = previous.clone();
        closed.valid_to = Some(cutover);
        let successor = TemporalTriple {
            id: FactVersionId::new(),
            subject: previous.subject.clone(),
            predicate: previous.predicate.clone(),
            object,
            confidence: update.confidence.unwrap_or(previous.confidence),
            valid_from: cutover,
            valid_to: update.valid_to,
            transaction_time: now,
            source: previous.source.clone(),
            version: previous.version + 1,
            supersedes: Some(id),
        };
        let new_id = successor.id;
        self.append(&mut state, &[closed, successor]).await?;
        info!(fact_id = %id, successor = %new_id, "Superseded temporal fact");
        Ok(Some(new_id))
    }

    /// End a version now without a successor. Returns `false` if unknown or already closed.
    ///
    /// # Errors
    /// Returns an error if the log cannot be written.
    pub async fn invalidate(&self, id: FactVersionId) -> MemoryResult<bool> {
        let mut state = self.state.write().await;
        let Some(version) = state.versions.get(&id) else {
            return Ok(false);
        };
        if !version.is_open() {
            return Ok(false);
        }
        let mut closed = version.clone();
        closed.valid_to = Some(Utc::now().max(closed.valid_from));
        self.append(&mut state, &[closed]).await?;
        info!(fact_id = %id, "Invalidated temporal fact");
        Ok(true)
    }

    /// Fetch a version by id.
    pub async fn get(&self, id: FactVersionId) -> Option<TemporalTriple> {
        self.state.read().await.versions.get(&id).cloned()
    }

    /// Versions matching `filter` that hold at `instant`, ordered by `valid_from`.
    pub async fn query_at_time(
        &self,
        instant: DateTime<Utc>,
        filter: &FactFilter,
    ) -> Vec<TemporalTriple> {
        let state = self.state.read().await;
        state
            .candidates(filter)
            .into_iter()
            .filter(|t| t.is_valid_at(instant))
            .cloned()
            .collect()
    }

    /// Versions matching `filter` that hold now.
    pub async fn query_current(&self, filter: &FactFilter) -> Vec<TemporalTriple> {
        self.query_at_time(Utc::now(), filter).await
    }

    /// Every version of a (subject, predicate) chain, oldest first.
    pub async fn history(&self, subject: &str, predicate: &str) -> Vec<HistoryEntry> {
        let now = Utc::now();
        let state = self.state.read().await;
        let superseded = state.superseded_ids();
        let filter = FactFilter::default().subject(subject).predicate(predicate);
        state
            .candidates(&filter)
            .into_iter()
            .map(|triple| {
                let version_state = if superseded.contains(&triple.id) {
                    VersionState::Superseded
                } else if triple.valid_to.is_some_and(|end| end <= now) {
                    VersionState::Invalidated
                } else {
                    VersionState::Current
                };
                HistoryEntry {
                    triple: triple.clone(),
                    state: version_state,
                }
            })
            .collect()
    }

    /// Start and end events of every fact naming `entity`, in time order.
    pub async fn entity_timeline(&self, entity: &str) -> Vec<TimelineEvent> {
        let key = entity.to_lowercase();
        let state = self.state.read().await;
        let mut events = Vec::new();
        for (index, role) in [
            (&state.by_subject, EntityRole::Subject),
            (&state.by_object, EntityRole::Object),
        ] {
            let versions = index
                .get(&key)
                .into_iter()
                .flatten()
                .filter_map(|id| state.versions.get(id));
            for triple in versions {
                events.push(TimelineEvent {
                    time: triple.valid_from,
                    kind: TimelineEventKind::FactAdded,
                    role,
                    triple: triple.clone(),
                });
                if let Some(end) = triple.valid_to {
                    events.push(TimelineEvent {
                        time: end,
                        kind: TimelineEventKind::FactEnded,
                        role,
                        triple: triple.clone(),
                    });
                }
            }
        }
        events.sort_by(|a, b| a.time.cmp(&b.time));
        events
    }

    /// Current versions scored by [`TemporalTriple::decay_score`], best first.
    pub async fn search_with_decay(
        &self,
        filter: &FactFilter,
        rate_per_day: f64,
        min_score: f64,
    ) -> Vec<(TemporalTriple, f64)> {
        let now = Utc::now();
        let mut scored: Vec<(TemporalTriple, f64)> = self
            .query_at_time(now, filter)
            .await
            .into_iter()
            .map(|triple| {
                let score = triple.decay_score(rate_per_day, now);
                (triple, score)
            })
            .filter(|(_, score)| *score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
    }

    /// Rewrite the log with one record per version. Returns the number of records dropped.
    ///
    /// # Errors
    /// Returns an error if the new log cannot be written.
    pub async fn compact(&self) -> MemoryResult<usize> {
        let mut state = self.state.write().await;
        let mut versions: Vec<&TemporalTriple> = state.versions.values().collect();
        versions.sort_by(|a, b| {
            a.transaction_time
                .cmp(&b.transaction_time)
                .then_with(|| a.version.cmp(&b.version))
        });
        let mut buffer = String::new();
        for triple in versions {
            buffer.push_str(&serde_json::to_string(triple)?);
            buffer.push('\n');
        }
        write_atomic(&self.log_path, buffer.as_bytes()).await?;
        let dropped = state.log_records.saturating_sub(state.versions.len());
        state.log_records = state.versions.len();
        info!(dropped, "Compacted temporal log");
        Ok(dropped)
    }

    /// Counts over every version.
    pub async fn stats(&self) -> TemporalStats {
        let now = Utc::now();
        let state = self.state.read().await;
        let current: Vec<&TemporalTriple> = state
            .versions
            .values()
            .filter(|t| t.is_valid_at(now))
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average_confidence = if current.is_empty() {
            0.0
        } else {
            current.iter().map(|t| t.confidence).sum::<f64>() / current.len() as f64
        };
        TemporalStats {
            total_versions: state.versions.len(),
            current_versions: current.len(),
            unique_subjects: state.by_subject.len(),
            unique_predicates: state.by_predicate.len(),
            unique_objects: state.by_object.len(),
            average_confidence,
            log_records: state.log_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_update_builds_history() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        let first = graph.add(FactDraft::new("Aura", "version", "3.1")).await.unwrap();
        let update = FactUpdate {
            object: Some("3.2".to_string()),
            ..FactUpdate::default()
        };
        let second = graph.update(first, update).await.unwrap().unwrap();

        let history = graph.history("Aura", "version").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].triple.id, first);
        assert_eq!(history[0].state, VersionState::Superseded);
        assert_eq!(history[1].triple.id, second);
        assert_eq!(history[1].state, VersionState::Current);
        assert_eq!(history[1].triple.version, 2);
        assert_eq!(history[1].triple.supersedes, Some(first));
        assert_eq!(history[0].triple.valid_to, Some(history[1].triple.valid_from));
    }

    #[tokio::test]
    async fn test_update_of_future_version_keeps_interval_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        let start = Utc::now() + Duration::days(7);
        let first = graph
            .add(FactDraft::new("Aura", "version", "4.0").valid_from(start))
            .await
            .unwrap();
        let update = FactUpdate {
            object: Some("4.1".to_string()),
            ..FactUpdate::default()
        };
        let second = graph.update(first, update).await.unwrap().unwrap();

        let closed = graph.get(first).await.unwrap();
        let successor = graph.get(second).await.unwrap();
        assert_eq!(closed.valid_to, Some(start));
        assert!(closed.valid_to.unwrap() >= closed.valid_from);
        assert_eq!(successor.valid_from, start);

        let too_early = FactUpdate {
            valid_to: Some(start - Duration::days(1)),
            ..FactUpdate::default()
        };
        let err = graph.update(second, too_early).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_backdated_open_fact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        let now = Utc::now();
        let current = graph
            .add(FactDraft::new("Aura", "host", "server").valid_from(now - Duration::days(1)))
            .await
            .unwrap();

        let err = graph
            .add(FactDraft::new("Aura", "host", "laptop").valid_from(now - Duration::days(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
        assert!(graph.get(current).await.unwrap().is_open());

        graph
            .add(
                FactDraft::new("Aura", "host", "laptop")
                    .valid_from(now - Duration::days(5))
                    .valid_to(now - Duration::days(1)),
            )
            .await
            .unwrap();
        let history = graph.history("Aura", "host").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].triple.object, "laptop");
        assert_eq!(history[1].state, VersionState::Current);
    }

    #[tokio::test]
    async fn test_update_of_closed_version_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        let first = graph.add(FactDraft::new("a", "p", "x")).await.unwrap();
        graph.update(first, FactUpdate::default()).await.unwrap();
        let err = graph.update(first, FactUpdate::default()).await.unwrap_err();
        assert!(matches!(err, MemoryError::StaleVersion(_)));
        assert!(graph.update(FactVersionId::new(), FactUpdate::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_point_in_time_queries() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        let start = Utc::now() - Duration::days(10);
        let middle = start + Duration::days(5);
        graph
            .add(FactDraft::new("Aura", "runs_on", "laptop").valid_from(start))
            .await
            .unwrap();
        graph
            .add(FactDraft::new("Aura", "runs_on", "server").valid_from(middle))
            .await
            .unwrap();

        let filter = FactFilter::default().subject("aura").predicate("RUNS_ON");
        let early = graph.query_at_time(start + Duration::days(1), &filter).await;
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].object, "laptop");
        let now = graph.query_current(&filter).await;
        assert_eq!(now.len(), 1);
        assert_eq!(now[0].object, "server");
        assert!(graph.query_at_time(start - Duration::days(1), &filter).await.is_empty());
        let open: Vec<_> = graph
            .query_at_time(Utc::now(), &FactFilter::default())
            .await
            .into_iter()
            .filter(TemporalTriple::is_open)
            .collect();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        let id = graph
            .add(FactDraft::new("dev", "uses", "vim").valid_from(Utc::now() - Duration::hours(1)))
            .await
            .unwrap();
        assert!(graph.invalidate(id).await.unwrap());
        assert!(!graph.invalidate(id).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        assert!(graph.query_current(&FactFilter::default().subject("dev")).await.is_empty());

        let history = graph.history("dev", "uses").await;
        assert_eq!(history[0].state, VersionState::Invalidated);

        let timeline = graph.entity_timeline("vim").await;
        let kinds: Vec<TimelineEventKind> = timeline.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TimelineEventKind::FactAdded, TimelineEventKind::FactEnded]);
        assert!(timeline.iter().all(|e| e.role == EntityRole::Object));
    }

    #[tokio::test]
    async fn test_log_replay_skips_corrupt_lines_and_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let graph = TemporalGraph::open(dir.path()).await.unwrap();
            let first = graph.add(FactDraft::new("a", "p", "1")).await.unwrap();
            graph
                .update(first, FactUpdate { object: Some("2".into()), ..FactUpdate::default() })
                .await
                .unwrap();
            first
        };
        let log = dir.path().join(LOG_FILE);
        let mut raw = std::fs::read_to_string(&log).unwrap();
        raw.push_str("{not json}\n");
        std::fs::write(&log, raw).unwrap();

        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        assert!(graph.get(first).await.unwrap().valid_to.is_some());
        assert_eq!(graph.stats().await.log_records, 4);
        assert_eq!(graph.compact().await.unwrap(), 2);

        let reopened = TemporalGraph::open(dir.path()).await.unwrap();
        let stats = reopened.stats().await;
        assert_eq!(stats.total_versions, 2);
        assert_eq!(stats.log_records, 2);
        assert_eq!(stats.current_versions, 1);
    }

    #[test]
    fn test_decay_score() {
        let now = Utc::now();
        let triple = TemporalTriple {
            id: FactVersionId::new(),
            subject: "s".into(),
            predicate: "p".into(),
            object: "o".into(),
            confidence: 0.8,
            valid_from: now,
            valid_to: None,
            transaction_time: now - Duration::days(10),
            source: String::new(),
            version: 1,
            supersedes: None,
        };
        assert!((triple.decay_score(0.1, now) - 0.4).abs() < 1e-9);
        assert!((triple.decay_score(0.0, now) - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_with_decay_orders_by_score() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TemporalGraph::open(dir.path()).await.unwrap();
        graph.add(FactDraft::new("x", "a", "1").confidence(0.3)).await.unwrap();
        graph.add(FactDraft::new("x", "b", "2").confidence(0.9)).await.unwrap();
        let scored = graph
            .search_with_decay(&FactFilter::default().subject("x"), 0.1, 0.5)
            .await;
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].0.object, "2");
    }
}
