//! Error types for the storage engine

use std::io;

use thiserror::Error;

use crate::codec::VarintError;
use crate::meta::MetaError;

/// Result type for cellar operations
pub type CellarResult<T> = Result<T, CellarError>;

/// Failures surfaced by the writer, reader, or seal pipeline.
///
/// Nothing here is retried internally; every detected inconsistency is
/// returned from the call that found it.
#[derive(Debug, Error)]
pub enum CellarError {
    /// Decoded data that cannot be valid: a varint past the 32-bit limit, a
    /// length above the recorded watermark, a malformed chunk file, or a
    /// decompression that does not reproduce the recorded size.
    #[error("malformed record data: {0}")]
    Format(String),

    /// A read landed in a byte range no chunk covers and the tail has not
    /// reached. Metadata and the requested offset disagree.
    #[error("tail starts at {tail_start} but the read resumes at {offset}")]
    Range { tail_start: u64, offset: u64 },

    /// Filesystem failure.
    #[error("storage i/o failure")]
    Io(#[from] io::Error),

    /// Metadata store failure.
    #[error("metadata store failure")]
    Meta(#[from] MetaError),

    /// A key longer than the 32-bit record framing admits.
    #[error("key length {0} does not fit the record framing")]
    KeyTooLarge(usize),

    /// A value longer than the 32-bit record framing admits.
    #[error("value length {0} does not fit the record framing")]
    ValueTooLarge(usize),
}

impl From<VarintError> for CellarError {
    fn from(err: VarintError) -> Self {
        match err {
            VarintError::Overflow => {
                CellarError::Format("length varint exceeds the 32-bit group limit".to_string())
            }
            VarintError::Io(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
                CellarError::Format("record truncated inside a length field".to_string())
            }
            VarintError::Io(io_err) => CellarError::Io(io_err),
        }
    }
}
