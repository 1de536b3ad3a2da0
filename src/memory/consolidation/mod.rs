//! Turning repeated successful episodes into skills and graph facts.

pub mod consolidator;
pub mod log;
pub mod patterns;

pub use consolidator::{
    ConsolidationOptions, Consolidator, GroupSummary, PatternAnalysis, PotentialSkill,
};
pub use log::{ConsolidationLog, ConsolidationResult};
pub use patterns::{
    ActionGeneralizer, GroupFuture, LeadingTokensGrouper, PatternGrouper, PatternGroups,
    common_pattern, pattern_key, trigger_keywords,
};
