//! # Error taxonomy
//!
//! Every fallible operation in the crate returns [`Result<T>`]. The variants
//! fall into two groups:
//!
//! - **Configuration-level** failures (`EmbeddingUnavailable`,
//!   `DimensionMismatch`, `IndexUnavailable`, `IndexOutOfSync`,
//!   `EmbeddingSpaceMismatch`) surface immediately: they mean the provider,
//!   the index and the catalog do not agree with each other.
//! - **Per-item** failures (`ProductNotFound`, `CompositionFailure`) are
//!   absorbed by the pipeline. A missing product is skipped during id
//!   mapping and a failed composition is replaced by the local fallback.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The selected embedding backend could not produce vectors
    /// (network down, model files missing, bad credentials, malformed reply).
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Query vector and index disagree on dimensionality.
    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No usable vector index could be loaded.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// The index was built against a different catalog than the one loaded.
    #[error("vector index out of sync with catalog: {0}")]
    IndexOutOfSync(String),

    /// The index was built with a different embedding provider or model.
    #[error("index embedding space {index} does not match provider {provider}")]
    EmbeddingSpaceMismatch { index: String, provider: String },

    #[error("product {0} not found")]
    ProductNotFound(u32),

    /// The generative step failed or returned something unparseable.
    #[error("lookbook composition failed: {0}")]
    CompositionFailure(String),

    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] diesel::result::Error),

    #[error(transparent)]
    Connection(#[from] diesel::ConnectionError),

    #[error("index encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("index decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl Error {
    /// Whether the caller may reasonably retry the same request.
    ///
    /// Only provider unavailability qualifies; everything else is either a
    /// misconfiguration or bad data and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::EmbeddingUnavailable(_))
    }
}
