//! Okapi BM25 lexical ranking.
//!
//! The model is rebuilt from the whole corpus by [`Bm25Index::fit`]; there is no
//! incremental update.

use std::collections::HashMap;

/// Split text into lowercase runs of letters and digits (Unicode-aware).
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// BM25 index over a fixed corpus.
#[derive(Clone, Debug)]
pub struct Bm25Index {
    k1: f64,
    b: f64,
    doc_ids: Vec<String>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<usize>,
    avgdl: f64,
    doc_freqs: HashMap<String, usize>,
    idf: HashMap<String, f64>,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(1.5, 0.75)
    }
}

impl Bm25Index {
    /// Create an empty index with the given parameters.
    #[must_use]
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            doc_ids: Vec::new(),
            term_freqs: Vec::new(),
            doc_lengths: Vec::new(),
            avgdl: 0.0,
            doc_freqs: HashMap::new(),
            idf: HashMap::new(),
        }
    }

    /// Rebuild term statistics from `documents` (id, content).
    #[allow(clippy::cast_precision_loss)]
    pub fn fit<'a, I>(&mut self, documents: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.doc_ids.clear();
        self.term_freqs.clear();
        self.doc_lengths.clear();
        self.doc_freqs.clear();
        self.idf.clear();

        for (id, content) in documents {
            let tokens = tokenize(content);
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *self.doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            self.doc_ids.push(id.to_string());
            self.doc_lengths.push(tokens.len());
            self.term_freqs.push(freqs);
        }

        let n = self.doc_ids.len() as f64;
        self.avgdl = if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.doc_lengths.iter().sum::<usize>() as f64 / n
        };
        for (term, df) in &self.doc_freqs {
            let df = *df as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            self.idf.insert(term.clone(), idf);
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Number of distinct terms.
    #[must_use]
    pub fn vocabulary_size(&self) -> usize {
        self.doc_freqs.len()
    }

    /// Average document length in tokens.
    #[must_use]
    pub const fn average_length(&self) -> f64 {
        self.avgdl
    }

    /// Inverse document frequency of `term`; 0 for unknown terms.
    #[must_use]
    pub fn idf(&self, term: &str) -> f64 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn score_at(&self, query_tokens: &[String], index: usize) -> f64 {
        let freqs = &self.term_freqs[index];
        let length = self.doc_lengths[index] as f64;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };
        query_tokens
            .iter()
            .filter_map(|term| freqs.get(term).map(|tf| (term, f64::from(*tf))))
            .map(|(term, tf)| {
                let norm = self.k1 * (1.0 - self.b + self.b * length / avgdl);
                self.idf(term) * (tf * (self.k1 + 1.0)) / (tf + norm)
            })
            .sum()
    }

    /// Score of document `id` for `query`; `None` if the document is unknown.
    #[must_use]
    pub fn score(&self, query: &str, id: &str) -> Option<f64> {
        let index = self.doc_ids.iter().position(|doc| doc == id)?;
        Some(self.score_at(&tokenize(query), index))
    }

    /// Top `k` documents with a positive score, best first.
    #[must_use]
    pub fn search(&self, query: &str, k: usize) -> Vec<(String, f64)> {
        let tokens = tokenize(query);
        if tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(String, f64)> = (0..self.doc_ids.len())
            .map(|index| (self.doc_ids[index].clone(), self.score_at(&tokens, index)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}
