//! Embedding model wrapper for Rig + Ollama.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client as ReqwestClient;
use rig::client::{EmbeddingsClient, Nothing};
use rig::embeddings::{Embedding, EmbeddingModel};
use rig::providers::ollama;

use crate::memory::core::config::{EmbeddingConfig, EmbeddingProvider};
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::embedding::hashing::HashingEmbedder;

/// Boxed future type for embedder operations.
pub type EmbedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait abstraction over embedding models.
///
/// Implementations must be deterministic for identical input within one model version.
pub trait Embedder: Send + Sync {
    /// Embed a single text string.
    ///
    /// # Errors
    /// Returns an error if the embedding request fails.
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, MemoryResult<Vec<f32>>>;
    /// Embed multiple texts.
    ///
    /// # Errors
    /// Returns an error if the embedding request fails.
    fn embed_texts(&self, texts: Vec<String>) -> EmbedFuture<'_, MemoryResult<Vec<Vec<f32>>>>;
    /// Return embedding dimensionality.
    fn ndims(&self) -> usize;
}

/// Build the embedder selected by `config`.
///
/// # Errors
/// Returns an error if the provider client cannot be built.
pub fn build_embedder(config: &EmbeddingConfig) -> MemoryResult<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.ndims))),
    }
}

/// Embed `text` and check the vector length against the embedder's dimensionality.
///
/// # Errors
/// Returns the provider error, or [`MemoryError::EmbeddingDimension`] on a length mismatch.
pub async fn embed_checked(embedder: &dyn Embedder, text: &str) -> MemoryResult<Vec<f32>> {
    let vector = embedder.embed_text(text).await?;
    check_dims(embedder.ndims(), &vector)?;
    Ok(vector)
}

/// Fail with [`MemoryError::EmbeddingDimension`] when `vector` has the wrong length.
///
/// # Errors
/// Returns an error when the lengths differ.
pub const fn check_dims(expected: usize, vector: &[f32]) -> MemoryResult<()> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(MemoryError::EmbeddingDimension {
            expected,
            actual: vector.len(),
        })
    }
}

type OllamaEmbeddingModel = ollama::EmbeddingModel<ReqwestClient>;

/// Ollama embedder using Rig provider.
#[derive(Clone)]
pub struct OllamaEmbedder {
    model: OllamaEmbeddingModel,
    ndims: usize,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder from config.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> MemoryResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(MemoryError::from)?;
        let model = client.embedding_model_with_ndims(config.model.clone(), config.ndims);
        Ok(Self {
            model,
            ndims: config.ndims,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(embedding: Embedding) -> Vec<f32> {
    embedding.vec.into_iter().map(|v| v as f32).collect()
}

impl Embedder for OllamaEmbedder {
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, MemoryResult<Vec<f32>>> {
        let text = text.to_string();
        Box::pin(async move {
            self.model
                .embed_text(&text)
                .await
                .map(to_f32)
                .map_err(MemoryError::Embedding)
        })
    }

    fn embed_texts(&self, texts: Vec<String>) -> EmbedFuture<'_, MemoryResult<Vec<Vec<f32>>>> {
        Box::pin(async move {
            self.model
                .embed_texts(texts)
                .await
                .map(|embeddings| embeddings.into_iter().map(to_f32).collect())
                .map_err(MemoryError::Embedding)
        })
    }

    fn ndims(&self) -> usize {
        self.ndims
    }
}
