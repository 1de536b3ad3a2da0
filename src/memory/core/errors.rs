//! Error types for the memory subsystem.

use thiserror::Error;

/// Memory subsystem error type.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Input rejected by a validated constructor (out-of-range score, empty field, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(#[from] rig::embeddings::EmbeddingError),
    /// Embedding provider returned a vector of the wrong length.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimension {
        /// Configured dimensionality.
        expected: usize,
        /// Length actually returned.
        actual: usize,
    },
    /// HTTP client error from Rig.
    #[error("http client error: {0}")]
    HttpClient(#[from] rig::http_client::Error),
    /// A temporal fact version that is already closed cannot be superseded.
    #[error("temporal fact {0} is no longer current")]
    StaleVersion(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Configuration file parse error.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid built-in pattern.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

impl MemoryError {
    /// Build an [`MemoryError::InvalidInput`] from anything displayable.
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
