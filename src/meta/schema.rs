//! Descriptor messages and typed table accessors
//!
//! Descriptors are serialized as field-number-tagged protobuf messages so
//! stores written by older builds keep decoding after fields are added.
//! Tags are frozen; new fields take new numbers.

use prost::Message;

use super::{MetaError, MetaResult, ReadTxn, Table, WriteTxn};

/// Singleton row key for the `Buffer` and `Cellar` tables.
const SINGLETON: &[u8] = &[0];

/// An immutable sealed chunk: where its uncompressed bytes sit in the global
/// offset space and what its file on disk looks like.
#[derive(Clone, PartialEq, Message)]
pub struct ChunkMeta {
    #[prost(uint64, tag = "1")]
    pub uncompressed_byte_size: u64,
    #[prost(uint64, tag = "2")]
    pub compressed_disk_size: u64,
    #[prost(uint64, tag = "3")]
    pub records: u64,
    #[prost(string, tag = "4")]
    pub file_name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "5")]
    pub start_pos: u64,
}

impl ChunkMeta {
    /// One past the last global offset this chunk covers.
    pub fn end_pos(&self) -> u64 {
        self.start_pos + self.uncompressed_byte_size
    }
}

/// The live write buffer as of the last checkpoint or seal.
#[derive(Clone, PartialEq, Message)]
pub struct BufferMeta {
    #[prost(uint64, tag = "1")]
    pub start_pos: u64,
    #[prost(uint64, tag = "2")]
    pub max_bytes: u64,
    #[prost(uint64, tag = "3")]
    pub records: u64,
    #[prost(uint64, tag = "4")]
    pub pos: u64,
    #[prost(string, tag = "5")]
    pub file_name: ::prost::alloc::string::String,
}

/// Cellar-wide key/value length watermarks. Readers size their scratch
/// buffers from these and treat any larger decoded length as corruption.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct CellarMeta {
    #[prost(uint32, tag = "1")]
    pub max_key_size: u32,
    #[prost(uint32, tag = "2")]
    pub max_val_size: u32,
}

/// Register a chunk under its start position.
pub fn add_chunk(txn: &mut impl WriteTxn, chunk: &ChunkMeta) -> MetaResult<()> {
    txn.put(
        Table::Chunk,
        &chunk.start_pos.to_be_bytes(),
        &chunk.encode_to_vec(),
    )
}

/// All chunks in ascending `start_pos` order.
pub fn list_chunks(txn: &impl ReadTxn) -> MetaResult<Vec<ChunkMeta>> {
    txn.scan(Table::Chunk)?
        .into_iter()
        .map(|(_, value)| ChunkMeta::decode(value.as_slice()).map_err(MetaError::from))
        .collect()
}

pub fn get_buffer(txn: &impl ReadTxn) -> MetaResult<Option<BufferMeta>> {
    match txn.get(Table::Buffer, SINGLETON)? {
        Some(value) => Ok(Some(BufferMeta::decode(value.as_slice())?)),
        None => Ok(None),
    }
}

pub fn set_buffer(txn: &mut impl WriteTxn, buffer: &BufferMeta) -> MetaResult<()> {
    txn.put(Table::Buffer, SINGLETON, &buffer.encode_to_vec())
}

pub fn get_cellar_meta(txn: &impl ReadTxn) -> MetaResult<Option<CellarMeta>> {
    match txn.get(Table::Cellar, SINGLETON)? {
        Some(value) => Ok(Some(CellarMeta::decode(value.as_slice())?)),
        None => Ok(None),
    }
}

pub fn set_cellar_meta(txn: &mut impl WriteTxn, meta: &CellarMeta) -> MetaResult<()> {
    txn.put(Table::Cellar, SINGLETON, &meta.encode_to_vec())
}

/// Persist a named cursor position.
pub fn set_checkpoint(txn: &mut impl WriteTxn, name: &str, position: i64) -> MetaResult<()> {
    txn.put(Table::Checkpoint, name.as_bytes(), &position.to_be_bytes())
}

/// Look up a named cursor position, falling back to `default`.
pub fn get_checkpoint(txn: &impl ReadTxn, name: &str, default: i64) -> MetaResult<i64> {
    match txn.get(Table::Checkpoint, name.as_bytes())? {
        Some(value) => {
            let bytes: [u8; 8] = value.as_slice().try_into().map_err(|_| {
                MetaError::Corrupt(format!(
                    "checkpoint '{}' holds {} bytes, expected 8",
                    name,
                    value.len()
                ))
            })?;
            Ok(i64::from_be_bytes(bytes))
        }
        None => Ok(default),
    }
}
