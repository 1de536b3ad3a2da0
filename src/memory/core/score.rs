//! Multi-signal relevance score used by episodic and procedural recall.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::core::errors::{MemoryError, MemoryResult};

/// Weights applied to the four score signals.
///
/// Weights must be non-negative and sum to 1 so the combined score stays in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Vector similarity weight.
    pub similarity: f64,
    /// Importance (or success rate) weight.
    pub importance: f64,
    /// Recency weight.
    pub recency: f64,
    /// Access frequency weight.
    pub access_frequency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.4,
            importance: 0.3,
            recency: 0.2,
            access_frequency: 0.1,
        }
    }
}

impl ScoreWeights {
    /// Validate the weights.
    ///
    /// # Errors
    /// Returns an error if a weight is negative or not finite, or if they do not sum to 1.
    pub fn validate(&self) -> MemoryResult<()> {
        let weights = [
            self.similarity,
            self.importance,
            self.recency,
            self.access_frequency,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(MemoryError::InvalidConfig(
                "score weights must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(MemoryError::InvalidConfig(format!(
                "score weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Score breakdown for one recalled entity. Derived at query time, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryScore {
    /// Cosine similarity to the query, in `[0, 1]`.
    pub similarity: f64,
    /// Importance or success rate, in `[0, 1]`.
    pub importance: f64,
    /// Age decay, in `[0, 1]`.
    pub recency: f64,
    /// Normalized usage, in `[0, 1]`.
    pub access_frequency: f64,
    /// Weighted combination of the four signals.
    pub combined: f64,
}

impl MemoryScore {
    /// Build a score, clamping every signal into `[0, 1]`.
    #[must_use]
    pub fn new(
        similarity: f64,
        importance: f64,
        recency: f64,
        access_frequency: f64,
        weights: &ScoreWeights,
    ) -> Self {
        let similarity = unit(similarity);
        let importance = unit(importance);
        let recency = unit(recency);
        let access_frequency = unit(access_frequency);
        let combined = weights.access_frequency.mul_add(
            access_frequency,
            weights.recency.mul_add(
                recency,
                weights
                    .importance
                    .mul_add(importance, weights.similarity * similarity),
            ),
        );
        Self {
            similarity,
            importance,
            recency,
            access_frequency,
            combined: unit(combined),
        }
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0.
#[must_use]
pub fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Exponential age decay: 1.0 when fresh, 0.5 after one half-life.
///
/// Timestamps in the future count as age zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn recency_score(timestamp: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_seconds = now.signed_duration_since(timestamp).num_seconds().max(0) as f64;
    let age_days = age_seconds / 86_400.0;
    let half_life = half_life_days.max(f64::EPSILON);
    unit((-std::f64::consts::LN_2 * age_days / half_life).exp())
}

/// Ratio of `count` to `ceiling`, capped at 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn frequency_ratio(count: u64, ceiling: u64) -> f64 {
    if ceiling == 0 {
        return 0.0;
    }
    unit(count as f64 / ceiling as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_weights_are_valid() {
        ScoreWeights::default().validate().unwrap();
        let bad = ScoreWeights {
            similarity: 0.9,
            ..ScoreWeights::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_combined_formula() {
        let score = MemoryScore::new(1.0, 0.5, 0.25, 0.0, &ScoreWeights::default());
        let expected = 0.4 + 0.3 * 0.5 + 0.2 * 0.25;
        assert!((score.combined - expected).abs() < 1e-9);
    }

    #[test]
    fn test_score_bounded_for_any_input() {
        let weights = ScoreWeights::default();
        let samples = [-5.0, -0.1, 0.0, 0.3, 1.0, 1.7, f64::NAN, f64::INFINITY];
        for a in samples {
            for b in samples {
                let score = MemoryScore::new(a, b, b, a, &weights);
                for signal in [
                    score.similarity,
                    score.importance,
                    score.recency,
                    score.access_frequency,
                    score.combined,
                ] {
                    assert!((0.0..=1.0).contains(&signal), "{signal} out of range");
                }
            }
        }
    }

    #[test]
    fn test_recency_half_life() {
        let now = Utc::now();
        assert!((recency_score(now, now, 30.0) - 1.0).abs() < 1e-9);
        let month_old = now - Duration::days(30);
        assert!((recency_score(month_old, now, 30.0) - 0.5).abs() < 1e-6);
        let future = now + Duration::days(3);
        assert!((recency_score(future, now, 30.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_ratio() {
        assert!((frequency_ratio(50, 100) - 0.5).abs() < 1e-9);
        assert!((frequency_ratio(500, 100) - 1.0).abs() < 1e-9);
        assert!(frequency_ratio(3, 0).abs() < 1e-9);
    }
}
