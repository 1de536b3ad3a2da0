//! Ranking utilities for recalled memories.

use std::collections::HashMap;

use serde::Serialize;

use crate::memory::core::score::MemoryScore;

/// A recalled entity with its score breakdown.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedMemory<T> {
    /// The recalled entity.
    pub item: T,
    /// Score breakdown.
    pub score: MemoryScore,
}

/// Sort candidates by combined score (best first) and keep the top `k`.
///
/// The sort is stable, so equal scores keep candidate order.
#[must_use]
pub fn rank_results<T>(candidates: Vec<(T, MemoryScore)>, k: usize) -> Vec<RankedMemory<T>> {
    let mut ranked: Vec<RankedMemory<T>> = candidates
        .into_iter()
        .map(|(item, score)| RankedMemory { item, score })
        .collect();
    ranked.sort_by(|a, b| b.score.combined.total_cmp(&a.score.combined));
    ranked.truncate(k);
    ranked
}

/// Min-max normalize scores into `[0, 1]`.
///
/// When every score is equal (including a single entry) each maps to 1.0.
#[must_use]
pub fn normalize_min_max(scores: &[(String, f64)]) -> HashMap<String, f64> {
    let Some(min) = scores.iter().map(|(_, s)| *s).reduce(f64::min) else {
        return HashMap::new();
    };
    let max = scores.iter().map(|(_, s)| *s).fold(min, f64::max);
    let range = max - min;
    scores
        .iter()
        .map(|(id, score)| {
            let normalized = if range > 0.0 {
                (score - min) / range
            } else {
                1.0
            };
            (id.clone(), normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::core::score::ScoreWeights;

    #[test]
    fn test_rank_results_sorts_and_truncates() {
        let weights = ScoreWeights::default();
        let candidates = vec![
            ("low", MemoryScore::new(0.1, 0.1, 0.1, 0.1, &weights)),
            ("high", MemoryScore::new(0.9, 0.9, 0.9, 0.9, &weights)),
            ("mid", MemoryScore::new(0.5, 0.5, 0.5, 0.5, &weights)),
        ];
        let ranked = rank_results(candidates, 2);
        let items: Vec<&str> = ranked.iter().map(|r| r.item).collect();
        assert_eq!(items, vec!["high", "mid"]);
    }

    #[test]
    fn test_normalize_min_max() {
        let scores = vec![
            ("a".to_string(), 2.0),
            ("b".to_string(), 4.0),
            ("c".to_string(), 3.0),
        ];
        let normalized = normalize_min_max(&scores);
        assert!((normalized["a"] - 0.0).abs() < 1e-12);
        assert!((normalized["b"] - 1.0).abs() < 1e-12);
        assert!((normalized["c"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_all_equal_maps_to_one() {
        let normalized = normalize_min_max(&[("x".to_string(), 0.3), ("y".to_string(), 0.3)]);
        assert!(normalized.values().all(|v| (*v - 1.0).abs() < 1e-12));
        assert!(normalize_min_max(&[]).is_empty());
    }
}
