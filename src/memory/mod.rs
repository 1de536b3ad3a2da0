//! Long-term memory for an agent.
//!
//! The subsystem is organized into:
//! - `core`: configuration, errors, identifiers, entities and scoring
//! - `embedding`: embedding provider abstraction (Ollama via Rig, local hashing)
//! - `storage`: `SQLite` record store, in-memory vector index, atomic file writes
//! - `retrieval`: BM25, hybrid keyword/vector search and ranking
//! - `episodic`: recorded interactions
//! - `procedural`: learned skills
//! - `graph`: knowledge triples and the bi-temporal fact graph
//! - `consolidation`: turning episodes into skills and facts
//! - `engine`: the unified memory API and memory files
//! - `maintenance`: the interval scheduler

pub mod consolidation;
pub mod core;
pub mod embedding;
pub mod engine;
pub mod episodic;
pub mod graph;
pub mod maintenance;
pub mod procedural;
pub mod retrieval;
pub mod storage;

pub use consolidation::{ConsolidationOptions, ConsolidationResult, Consolidator, PatternGrouper};
pub use core::{
    ConsolidationConfig, EmbeddingConfig, EmbeddingProvider, Episode, EpisodeDraft, EpisodeId,
    FactVersionId, KnowledgeConfig, KnowledgeTriple, MemoryConfig, MemoryError, MemoryMetadata,
    MemoryOrigin, MemoryResult, MemoryScore, MemoryStatus, SchedulerConfig, ScoringConfig,
    SearchConfig, Skill, SkillDraft, SkillId, SkillUpdate, StorageConfig, SuccessRate, TripleId,
};
pub use embedding::{EmbedFuture, Embedder, HashingEmbedder, OllamaEmbedder, build_embedder};
pub use engine::{MemoryEngine, MemoryFiles, RememberKind, RememberOutcome, UnifiedResults};
pub use episodic::{EpisodicStore, RecallQuery};
pub use graph::{FactDraft, FactFilter, FactUpdate, KnowledgeGraph, TemporalGraph, TemporalTriple};
pub use maintenance::{MaintenanceJob, Scheduler, TaskOutcome};
pub use procedural::ProceduralStore;
pub use retrieval::{HybridSearchEngine, HybridSearchResult, IndexedDocument, RankedMemory};
