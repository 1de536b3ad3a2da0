//! Memory engine orchestration and memory files.

pub mod core;
pub mod files;

pub use core::{
    DIRECT_MEMORIZATION, EngineStats, MemoryEngine, ReindexReport, RememberKind, RememberOutcome,
    UnifiedResults,
};
pub use files::{FileEntry, FileMeta, MemoryFile, MemoryFiles, NewFileMeta, UpdateMode, sanitize_filename};
