//! The single-writer entry point
//!
//! One `CellarWriter` owns a cellar at a time. Appends frame records into
//! the live buffer; when the next record's worst case would not fit, the
//! buffer is sealed into a chunk and a fresh buffer starts where the old
//! one's logical data ended, all inside one metadata transaction. Only
//! `checkpoint` makes the buffer's position and record count durable across
//! a restart, so callers checkpoint at whatever cadence their ingestion
//! source can resume from.
//!
//! Append and checkpoint are not internally synchronized; the `&mut self`
//! receivers leave serialization to the caller, and dropping the writer is
//! the close.

use std::fs;
use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::buffer::{self, Buffer};
use super::chunk::KEY_SIZE;
use super::errors::{CellarError, CellarResult};
use super::{estimate_size, CellarSize};
use crate::meta::schema::{self, CellarMeta};
use crate::meta::{MetaStore, RedbMetaStore, WriteTxn};

/// File name of the metadata store inside a cellar folder.
pub(crate) const META_FILE_NAME: &str = "meta.redb";

/// Worst-case length field size used by the pre-write capacity check. One
/// byte of slack on top of the 5-byte varint maximum; the check stays
/// pessimistic on purpose.
const LEN_HEADROOM: u64 = 6;

/// Fixed transfer buffer size for streamed values.
const TRANSFER_BUF_SIZE: usize = 64 * 1024;

/// Append-only writer over a cellar folder.
pub struct CellarWriter<S: MetaStore = RedbMetaStore> {
    folder: PathBuf,
    max_buffer_bytes: u64,
    key: [u8; KEY_SIZE],
    store: S,
    buffer: Buffer,
    max_key_size: u32,
    max_val_size: u32,
    transfer: Box<[u8]>,
}

impl CellarWriter<RedbMetaStore> {
    /// Open the cellar at `folder` for writing, creating the folder and its
    /// metadata store when absent.
    pub fn create(
        folder: impl AsRef<Path>,
        max_buffer_bytes: u64,
        key: [u8; KEY_SIZE],
    ) -> CellarResult<Self> {
        let folder = folder.as_ref();
        fs::create_dir_all(folder)?;
        let store = RedbMetaStore::open(folder.join(META_FILE_NAME))?;
        Self::with_store(store, folder, max_buffer_bytes, key)
    }
}

impl<S: MetaStore> CellarWriter<S> {
    /// Open the cellar over an injected metadata store.
    pub fn with_store(
        store: S,
        folder: impl AsRef<Path>,
        max_buffer_bytes: u64,
        key: [u8; KEY_SIZE],
    ) -> CellarResult<Self> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder)?;

        let mut txn = store.begin_write()?;
        let buffer = match schema::get_buffer(&txn)? {
            Some(meta) => Buffer::open(&meta, &folder)?,
            None => {
                let meta = buffer::fresh_meta(0, max_buffer_bytes);
                schema::set_buffer(&mut txn, &meta)?;
                Buffer::open(&meta, &folder)?
            }
        };
        let cellar = schema::get_cellar_meta(&txn)?.unwrap_or_default();
        txn.commit()?;

        info!(
            folder = %folder.display(),
            start_pos = buffer.start_pos(),
            pos = buffer.pos(),
            "cellar writer open"
        );

        Ok(Self {
            folder,
            max_buffer_bytes,
            key,
            store,
            buffer,
            max_key_size: cellar.max_key_size,
            max_val_size: cellar.max_val_size,
            transfer: vec![0u8; TRANSFER_BUF_SIZE].into_boxed_slice(),
        })
    }

    /// Append one record. Returns the record's absolute position in the
    /// cellar's byte-offset space.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> CellarResult<u64> {
        let key_len =
            u32::try_from(key.len()).map_err(|_| CellarError::KeyTooLarge(key.len()))?;
        let value_len =
            u32::try_from(value.len()).map_err(|_| CellarError::ValueTooLarge(value.len()))?;

        self.make_room(precheck_size(key.len(), value.len()))?;

        let position = self.buffer.start_pos() + self.buffer.pos();
        self.buffer.write_varint(key_len)?;
        self.buffer.write(key)?;
        self.buffer.write_varint(value_len)?;
        self.buffer.write(value)?;
        self.buffer.end_record();

        self.note_sizes(key_len, value_len);
        Ok(position)
    }

    /// Append one record whose value arrives as a stream of a declared
    /// length, copied through a fixed reusable transfer buffer. A source
    /// that ends before `value_len` bytes is an error.
    pub fn append_stream(
        &mut self,
        key: &[u8],
        value: &mut impl Read,
        value_len: u32,
    ) -> CellarResult<u64> {
        let key_len =
            u32::try_from(key.len()).map_err(|_| CellarError::KeyTooLarge(key.len()))?;

        self.make_room(precheck_size(key.len(), value_len as usize))?;

        let position = self.buffer.start_pos() + self.buffer.pos();
        self.buffer.write_varint(key_len)?;
        self.buffer.write(key)?;
        self.buffer.write_varint(value_len)?;

        let mut remaining = value_len as usize;
        while remaining > 0 {
            let want = remaining.min(self.transfer.len());
            let read = value.read(&mut self.transfer[..want])?;
            if read == 0 {
                return Err(CellarError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("value source ended {remaining} bytes short of its declared length"),
                )));
            }
            self.buffer.write(&self.transfer[..read])?;
            remaining -= read;
        }
        self.buffer.end_record();

        self.note_sizes(key_len, value_len);
        Ok(position)
    }

    /// Persist buffer state, size watermarks, and the named cursor position
    /// in one transaction. This is the durability point: appends survive a
    /// restart only up to the last checkpoint or seal.
    pub fn checkpoint(&mut self, name: &str, position: i64) -> CellarResult<()> {
        self.buffer.flush()?;

        let mut txn = self.store.begin_write()?;
        schema::set_buffer(&mut txn, &self.buffer.state())?;
        schema::set_checkpoint(&mut txn, name, position)?;
        schema::set_cellar_meta(
            &mut txn,
            &CellarMeta {
                max_key_size: self.max_key_size,
                max_val_size: self.max_val_size,
            },
        )?;
        txn.commit()?;

        debug!(
            name,
            position,
            buffer_pos = self.buffer.pos(),
            records = self.buffer.records(),
            "checkpoint"
        );
        Ok(())
    }

    /// Read back a named cursor position, or `default` if it was never set.
    pub fn get_checkpoint(&self, name: &str, default: i64) -> CellarResult<i64> {
        let txn = self.store.begin_read()?;
        Ok(schema::get_checkpoint(&txn, name, default)?)
    }

    /// Aggregate registered chunk and buffer sizes. Reflects state as of
    /// the last checkpoint or seal.
    pub fn estimate_size(&self) -> CellarResult<CellarSize> {
        let txn = self.store.begin_read()?;
        estimate_size(&txn)
    }

    /// Clone of the metadata store handle, for opening snapshot readers
    /// while this writer is live.
    pub fn meta_store(&self) -> S
    where
        S: Clone,
    {
        self.store.clone()
    }

    /// Seal when the worst-case framed size would overflow the buffer.
    /// Sealing an empty buffer gains nothing, so an oversized record is
    /// written straight into the fresh buffer and the file grows past its
    /// preallocation.
    fn make_room(&mut self, worst_case: u64) -> CellarResult<()> {
        if self.buffer.fits(worst_case) || self.buffer.pos() == 0 {
            return Ok(());
        }
        self.seal_the_buffer()
    }

    fn seal_the_buffer(&mut self) -> CellarResult<()> {
        let mut txn = self.store.begin_write()?;

        let chunk_meta = self.buffer.seal(&self.folder, &self.key)?;
        schema::add_chunk(&mut txn, &chunk_meta)?;

        let next_start = chunk_meta.start_pos + chunk_meta.uncompressed_byte_size;
        let fresh_meta = buffer::fresh_meta(next_start, self.max_buffer_bytes);
        schema::set_buffer(&mut txn, &fresh_meta)?;

        // a snapshot taken right after this commit sees the chunk, so the
        // watermarks its records were written under must land with it
        schema::set_cellar_meta(
            &mut txn,
            &CellarMeta {
                max_key_size: self.max_key_size,
                max_val_size: self.max_val_size,
            },
        )?;
        let fresh = Buffer::open(&fresh_meta, &self.folder)?;

        txn.commit()?;

        // the chunk is committed; the old file is merely reclaimable space
        let old = mem::replace(&mut self.buffer, fresh);
        let old_path = old.path().to_path_buf();
        drop(old);
        if let Err(err) = fs::remove_file(&old_path) {
            warn!(path = %old_path.display(), %err, "sealed buffer file left behind");
        }

        info!(
            start_pos = chunk_meta.start_pos,
            byte_size = chunk_meta.uncompressed_byte_size,
            disk_size = chunk_meta.compressed_disk_size,
            records = chunk_meta.records,
            "buffer sealed into chunk"
        );
        Ok(())
    }

    fn note_sizes(&mut self, key_len: u32, value_len: u32) {
        if key_len > self.max_key_size {
            self.max_key_size = key_len;
        }
        if value_len > self.max_val_size {
            self.max_val_size = value_len;
        }
    }
}

/// Worst-case framed size of a record, length headroom included.
fn precheck_size(key_len: usize, value_len: usize) -> u64 {
    LEN_HEADROOM + key_len as u64 + LEN_HEADROOM + value_len as u64
}
