//! The live write buffer
//!
//! One preallocated append-only segment file, exclusively owned by the
//! writer. The file is extended to its full capacity up front so repeated
//! small appends do not fragment it; only the first `pos` bytes are
//! logically valid. Reopening seeks back to `pos`, which is how a partially
//! written buffer resumes after a restart.

use std::fs::OpenOptions;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::chunk::{self, KEY_SIZE};
use super::errors::CellarResult;
use crate::codec::varint;
use crate::meta::schema::{BufferMeta, ChunkMeta};

/// File name of the buffer starting at `start_pos`.
pub(crate) fn buffer_file_name(start_pos: u64) -> String {
    format!("{start_pos:010}.blob")
}

/// Descriptor for a fresh, empty buffer at `start_pos`.
pub(crate) fn fresh_meta(start_pos: u64, max_bytes: u64) -> BufferMeta {
    BufferMeta {
        start_pos,
        max_bytes,
        records: 0,
        pos: 0,
        file_name: buffer_file_name(start_pos),
    }
}

pub(crate) struct Buffer {
    writer: BufWriter<std::fs::File>,
    path: PathBuf,
    file_name: String,
    start_pos: u64,
    max_bytes: u64,
    pos: u64,
    records: u64,
}

impl Buffer {
    /// Open (creating if absent) the backing file described by `meta`,
    /// preallocate it to `max_bytes`, and seek to the write position.
    ///
    /// A pre-existing file already longer than `max_bytes` is left at its
    /// size; it is merely capacity.
    pub(crate) fn open(meta: &BufferMeta, folder: &Path) -> CellarResult<Self> {
        let path = folder.join(&meta.file_name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len < meta.max_bytes {
            file.set_len(meta.max_bytes)?;
        }
        file.seek(SeekFrom::Start(meta.pos))?;

        debug!(
            path = %path.display(),
            start_pos = meta.start_pos,
            pos = meta.pos,
            records = meta.records,
            "buffer open"
        );

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            file_name: meta.file_name.clone(),
            start_pos: meta.start_pos,
            max_bytes: meta.max_bytes,
            pos: meta.pos,
            records: meta.records,
        })
    }

    /// True iff `count` more bytes stay within the preallocated capacity.
    pub(crate) fn fits(&self, count: u64) -> bool {
        self.pos + count <= self.max_bytes
    }

    pub(crate) fn write_varint(&mut self, value: u32) -> CellarResult<()> {
        let written = varint::write_u32(&mut self.writer, value)?;
        self.pos += written as u64;
        Ok(())
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> CellarResult<()> {
        self.writer.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn end_record(&mut self) {
        self.records += 1;
    }

    /// Push buffered writes through to durable storage.
    pub(crate) fn flush(&mut self) -> CellarResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Seal the live prefix of this buffer into an adjacent chunk file and
    /// return the chunk's descriptor. The preallocated padding past `pos`
    /// is never persisted.
    pub(crate) fn seal(&mut self, folder: &Path, key: &[u8; KEY_SIZE]) -> CellarResult<ChunkMeta> {
        self.flush()?;

        let chunk_file_name = format!("{}.zst", self.file_name);
        let chunk_path = folder.join(&chunk_file_name);

        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(0))?;
        let live = file.take(self.pos);
        let compressed_disk_size = chunk::write_chunk(live, &chunk_path, key)?;

        Ok(ChunkMeta {
            uncompressed_byte_size: self.pos,
            compressed_disk_size,
            records: self.records,
            file_name: chunk_file_name,
            start_pos: self.start_pos,
        })
    }

    /// Snapshot of the mutable state, for persisting to the metadata store.
    pub(crate) fn state(&self) -> BufferMeta {
        BufferMeta {
            start_pos: self.start_pos,
            max_bytes: self.max_bytes,
            records: self.records,
            pos: self.pos,
            file_name: self.file_name.clone(),
        }
    }

    pub(crate) fn start_pos(&self) -> u64 {
        self.start_pos
    }

    pub(crate) fn pos(&self) -> u64 {
        self.pos
    }

    pub(crate) fn records(&self) -> u64 {
        self.records
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
