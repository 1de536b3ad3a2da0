//! Ranking and keyword/vector search.

pub mod bm25;
pub mod hybrid_search;
pub mod ranking;

pub use bm25::{Bm25Index, tokenize};
pub use hybrid_search::{HybridSearchEngine, HybridSearchResult, IndexedDocument, SearchStats};
pub use ranking::{RankedMemory, normalize_min_max, rank_results};
