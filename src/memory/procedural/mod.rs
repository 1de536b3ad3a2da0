//! Procedural memory store.

pub mod store;

pub use store::{ProceduralStats, ProceduralStore, SkillRanking};
