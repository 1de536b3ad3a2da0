//! Core memory types and identifiers.

pub mod config;
pub mod episode;
pub mod errors;
pub mod ids;
pub mod metadata;
pub mod score;
pub mod skill;
pub mod triple;

pub use config::{
    ConsolidationConfig, EmbeddingConfig, EmbeddingProvider, KnowledgeConfig, MemoryConfig,
    SchedulerConfig, ScoringConfig, SearchConfig, StorageConfig,
};
pub use episode::{Episode, EpisodeDraft};
pub use errors::{MemoryError, MemoryResult};
pub use ids::{EpisodeId, FactVersionId, IdParseError, SkillId, TripleId};
pub use metadata::{MemoryMetadata, MemoryOrigin, MemoryStatus, StatusTransitionError};
pub use score::{MemoryScore, ScoreWeights};
pub use skill::{Skill, SkillDraft, SkillUpdate, SuccessRate};
pub use triple::KnowledgeTriple;
