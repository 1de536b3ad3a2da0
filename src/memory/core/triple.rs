//! Knowledge triple: a subject-predicate-object fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{EpisodeId, TripleId};
use crate::memory::core::metadata::{MemoryMetadata, MemoryOrigin};

/// A relational fact with a confidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeTriple {
    /// Structural identifier.
    pub id: TripleId,
    /// Subject entity.
    pub subject: String,
    /// Relation name.
    pub predicate: String,
    /// Object entity.
    pub object: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Episode the fact came from, if any.
    #[serde(default)]
    pub source_episode: Option<EpisodeId>,
    /// Common metadata.
    pub metadata: MemoryMetadata,
}

impl KnowledgeTriple {
    /// Build a triple, trimming every field.
    ///
    /// # Errors
    /// Returns [`MemoryError::InvalidInput`] if a field is empty or the confidence
    /// is outside `[0, 1]`.
    pub fn new(
        subject: &str,
        predicate: &str,
        object: &str,
        confidence: f64,
        source_episode: Option<EpisodeId>,
        now: DateTime<Utc>,
    ) -> MemoryResult<Self> {
        let (subject, predicate, object) = (subject.trim(), predicate.trim(), object.trim());
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return Err(MemoryError::invalid_input(
                "triple subject, predicate and object must not be empty",
            ));
        }
        validate_confidence(confidence)?;
        let origin = if source_episode.is_some() {
            MemoryOrigin::Extraction
        } else {
            MemoryOrigin::User
        };
        Ok(Self {
            id: TripleId::derive(subject, predicate, object),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            confidence,
            source_episode,
            metadata: MemoryMetadata::new(origin, now),
        })
    }

    /// Text fed to the embedding provider.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Reject confidences outside `[0, 1]`.
///
/// # Errors
/// Returns [`MemoryError::InvalidInput`] for NaN or out-of-range values.
pub fn validate_confidence(confidence: f64) -> MemoryResult<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(MemoryError::invalid_input(format!(
            "confidence must be within [0, 1], got {confidence}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_fields() {
        let triple = KnowledgeTriple::new(" Rust ", "is_a", " language", 1.0, None, Utc::now())
            .unwrap();
        assert_eq!(triple.subject, "Rust");
        assert_eq!(triple.embedding_text(), "Rust is_a language");
        assert_eq!(triple.metadata.origin, MemoryOrigin::User);
    }

    #[test]
    fn test_new_rejects_invalid() {
        let now = Utc::now();
        assert!(KnowledgeTriple::new("", "p", "o", 1.0, None, now).is_err());
        assert!(KnowledgeTriple::new("s", "p", "o", 1.1, None, now).is_err());
        assert!(KnowledgeTriple::new("s", "p", "o", f64::NAN, None, now).is_err());
    }
}
