//! Deterministic feature-hashing embedder.
//!
//! Each lowercase word token is hashed with SHA-256 into a signed bucket; the
//! accumulated vector is L2-normalized. Texts that share vocabulary end up with
//! high cosine similarity, which is enough for offline operation and tests.

use sha2::{Digest, Sha256};

use crate::memory::core::errors::MemoryResult;
use crate::memory::embedding::embedder::{EmbedFuture, Embedder};
use crate::memory::retrieval::bm25::tokenize;

/// Offline embedder based on the hashing trick.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    ndims: usize,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of `ndims` components (at least 1).
    #[must_use]
    pub fn new(ndims: usize) -> Self {
        Self {
            ndims: ndims.max(1),
        }
    }

    /// Embed synchronously.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.ndims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = u64::from_le_bytes(bucket_bytes);
            let ndims = self.ndims as u64;
            #[allow(clippy::cast_possible_truncation)]
            let index = (bucket % ndims) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, MemoryResult<Vec<f32>>> {
        let vector = self.embed_sync(text);
        Box::pin(async move { Ok(vector) })
    }

    fn embed_texts(&self, texts: Vec<String>) -> EmbedFuture<'_, MemoryResult<Vec<Vec<f32>>>> {
        let vectors = texts.iter().map(|text| self.embed_sync(text)).collect();
        Box::pin(async move { Ok(vectors) })
    }

    fn ndims(&self) -> usize {
        self.ndims
    }
}
