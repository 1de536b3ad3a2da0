//! In-memory brute-force cosine index.

use std::collections::HashMap;

/// A nearest-neighbor hit.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorHit {
    /// Entity identifier.
    pub id: String,
    /// Cosine similarity clamped to `[0, 1]`.
    pub similarity: f64,
}

/// Exact cosine-similarity index over all stored vectors.
#[derive(Clone, Debug, Default)]
pub struct VectorIndex {
    vectors: HashMap<String, Vec<f32>>,
}

impl VectorIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a vector.
    pub fn insert(&mut self, id: impl Into<String>, vector: Vec<f32>) {
        self.vectors.insert(id.into(), vector);
    }

    /// Remove a vector. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    /// Whether `id` is indexed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Up to `k` most similar entries accepted by `filter`, best first.
    ///
    /// Ties are broken by identifier so results are deterministic.
    #[must_use]
    pub fn nearest<F>(&self, query: &[f32], k: usize, filter: F) -> Vec<VectorHit>
    where
        F: Fn(&str) -> bool,
    {
        if k == 0 {
            return Vec::new();
        }
        let mut hits: Vec<VectorHit> = self
            .vectors
            .iter()
            .filter(|(id, _)| filter(id.as_str()))
            .map(|(id, vector)| VectorHit {
                id: id.clone(),
                similarity: cosine_similarity(query, vector).clamp(0.0, 1.0),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }
}

/// Cosine similarity in `[-1, 1]`; 0 for mismatched lengths or zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot = x.mul_add(y, dot);
        norm_a = x.mul_add(x, norm_a);
        norm_b = y.mul_add(y, norm_b);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < 1e-9);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_orders_filters_and_clamps() {
        let mut index = VectorIndex::new();
        index.insert("a", vec![1.0, 0.0]);
        index.insert("b", vec![0.7, 0.7]);
        index.insert("c", vec![-1.0, 0.0]);
        index.insert("d", vec![0.9, 0.1]);

        let hits = index.nearest(&[1.0, 0.0], 3, |_| true);
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d", "b"]);

        let hits = index.nearest(&[1.0, 0.0], 10, |id| id != "a");
        assert_eq!(hits[0].id, "d");
        let opposite = hits.iter().find(|h| h.id == "c").unwrap();
        assert!(opposite.similarity.abs() < 1e-12);
    }

    #[test]
    fn test_insert_remove() {
        let mut index = VectorIndex::new();
        index.insert("a", vec![1.0]);
        assert!(index.contains("a"));
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.is_empty());
    }
}
