//! cellar - an append-only, chunked, encrypted and compressed log store
//!
//! A cellar is a folder holding one live preallocated write buffer, a list
//! of immutable sealed chunks (zstd + AES-256-CBC), and a small transactional
//! metadata store tying them together. Records are variable-length key/value
//! pairs addressed by their byte offset in a single logical stream that spans
//! every chunk plus the live tail.

pub mod codec;
pub mod meta;
pub mod store;

pub use codec::bounded::{BoundedReader, ReadSeek};
pub use meta::schema::{BufferMeta, CellarMeta, ChunkMeta};
pub use meta::{MetaError, MetaResult, MetaStore, ReadTxn, RedbMetaStore, Table, WriteTxn};
pub use store::{CellarError, CellarReader, CellarResult, CellarSize, CellarWriter, KEY_SIZE};
