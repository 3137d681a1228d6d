//! Error types for the metadata store

use thiserror::Error;

/// Result type for metadata operations
pub type MetaResult<T> = Result<T, MetaError>;

/// Failures surfaced by the metadata store or its schema layer.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The backing key-value engine failed (I/O, lock, commit).
    #[error("metadata backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// A stored descriptor could not be decoded.
    #[error("failed to decode descriptor")]
    Decode(#[from] prost::DecodeError),

    /// A stored entry has an impossible shape for its table.
    #[error("corrupt metadata entry: {0}")]
    Corrupt(String),
}

impl MetaError {
    /// Wrap a backend-specific error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        MetaError::Backend(Box::new(err))
    }
}
