//! Knowledge graph, lexical extraction and the bi-temporal fact graph.

pub mod extraction;
pub mod knowledge;
pub mod temporal;

pub use extraction::{ExtractedTriple, TripleExtractor};
pub use knowledge::{Direction, GraphStats, KnowledgeGraph, ScoredTriple};
pub use temporal::{
    EntityRole, FactDraft, FactFilter, FactUpdate, HistoryEntry, TemporalGraph, TemporalStats,
    TemporalTriple, TimelineEvent, TimelineEventKind, VersionState,
};
