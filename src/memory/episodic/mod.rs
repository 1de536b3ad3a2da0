//! Episodic memory store.

pub mod store;

pub use store::{EpisodicStats, EpisodicStore, RecallQuery};
