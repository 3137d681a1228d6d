//! The cellar storage engine
//!
//! A cellar folder holds three things:
//!
//! - one live buffer file, preallocated to its full capacity and appended
//!   to in place
//! - immutable chunk files, each a former buffer compressed and encrypted
//!   whole when it filled up
//! - the metadata store describing both, plus named checkpoint cursors
//!
//! Every record owns a unique position on a single logical byte line that
//! runs through all chunks and ends in the live tail. Chunk ranges plus the
//! tail partition that line with no gaps and no overlaps; the metadata
//! store, not the filesystem, is the authority on which files belong to it.
//!
//! # Design principles
//!
//! - Single writer, many snapshot readers
//! - Checkpoint is the durability point; appends between checkpoints ride
//!   on the buffer file alone
//! - Seals and checkpoints commit atomically; file cleanup is best-effort
//!   afterwards
//! - Explicit failure over silent recovery

mod buffer;
mod chunk;
mod errors;
mod reader;
mod writer;

pub use chunk::KEY_SIZE;
pub use errors::{CellarError, CellarResult};
pub use reader::CellarReader;
pub use writer::CellarWriter;

use crate::meta::{schema, ReadTxn};

/// Aggregate size of a cellar as recorded in its metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellarSize {
    /// Number of sealed chunks.
    pub chunk_count: u64,
    /// Bytes occupied on disk: compressed chunk files plus the buffer's
    /// preallocated capacity.
    pub disk_size: u64,
    /// Uncompressed bytes of record data across chunks and the tail.
    pub byte_size: u64,
    /// Total record count.
    pub records: u64,
}

/// Sum chunk descriptors and the registered buffer inside one transaction.
///
/// The buffer contribution reflects the last persisted descriptor, so the
/// figure is as of the most recent checkpoint or seal.
pub fn estimate_size(txn: &impl ReadTxn) -> CellarResult<CellarSize> {
    let mut size = CellarSize::default();
    for chunk in schema::list_chunks(txn)? {
        size.chunk_count += 1;
        size.disk_size += chunk.compressed_disk_size;
        size.byte_size += chunk.uncompressed_byte_size;
        size.records += chunk.records;
    }
    if let Some(buffer) = schema::get_buffer(txn)? {
        size.disk_size += buffer.max_bytes;
        size.byte_size += buffer.pos;
        size.records += buffer.records;
    }
    Ok(size)
}
