//! Shared low-level codecs for the record framing
//!
//! Two primitives the rest of the engine is built on:
//!
//! - 7-bit-group variable-length integers, used for the key/value length
//!   fields of every record
//! - a length-bounded, forward-only view over a shared seekable stream,
//!   handed to record handlers so a partially consumed value can never
//!   desynchronize the scan

pub mod bounded;
pub mod varint;

pub use bounded::{BoundedReader, ReadSeek};
pub use varint::VarintError;
