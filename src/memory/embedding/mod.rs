//! Embedding abstractions and providers.

pub mod embedder;
pub mod hashing;
#[cfg(test)]
pub(crate) mod testing;

pub use embedder::{
    EmbedFuture, Embedder, OllamaEmbedder, build_embedder, check_dims, embed_checked,
};
pub use hashing::HashingEmbedder;
