//! Embedders used by unit tests.

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::embedding::embedder::{EmbedFuture, Embedder};

/// Provider that is always unavailable.
pub struct FailingEmbedder {
    ndims: usize,
}

impl FailingEmbedder {
    /// Embedder reporting `ndims` that fails every call.
    pub const fn new(ndims: usize) -> Self {
        Self { ndims }
    }

    fn error() -> MemoryError {
        MemoryError::Embedding(rig::embeddings::EmbeddingError::ProviderError(
            "provider offline".to_string(),
        ))
    }
}

impl Embedder for FailingEmbedder {
    fn embed_text(&self, _text: &str) -> EmbedFuture<'_, MemoryResult<Vec<f32>>> {
        Box::pin(async { Err(Self::error()) })
    }

    fn embed_texts(&self, _texts: Vec<String>) -> EmbedFuture<'_, MemoryResult<Vec<Vec<f32>>>> {
        Box::pin(async { Err(Self::error()) })
    }

    fn ndims(&self) -> usize {
        self.ndims
    }
}
