//! Offset-addressable record scans
//!
//! A reader opens an immutable snapshot of the metadata (chunk list, buffer
//! descriptor, watermarks) and reconstructs the logical byte stream from an
//! arbitrary offset: sealed chunks first, each decrypted and decompressed
//! whole into one reusable allocation, then the live tail read straight off
//! the buffer file up to its recorded position. Chunk files never change
//! once registered, so the snapshot stays valid for the reader's lifetime;
//! a reader opened before a seal simply treats the old buffer range as
//! tail.
//!
//! Handlers see each record as `(position, key, bounded value reader)`. The
//! value view is released after every call, skipping whatever the handler
//! left unread, so the scan never loses framing. A handler cannot abort the
//! scan; early exit is the record-count limit's job.

use std::fs::File;
use std::io::{BufReader, Cursor, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::chunk::{self, KEY_SIZE};
use super::errors::{CellarError, CellarResult};
use super::estimate_size;
use super::writer::META_FILE_NAME;
use crate::codec::bounded::{BoundedReader, ReadSeek};
use crate::codec::varint;
use crate::meta::schema::{self, BufferMeta, ChunkMeta};
use crate::meta::{MetaStore, RedbMetaStore};

/// Snapshot reader over a cellar folder.
pub struct CellarReader<S: MetaStore = RedbMetaStore> {
    folder: PathBuf,
    key: [u8; KEY_SIZE],
    store: Option<S>,
    chunks: Vec<ChunkMeta>,
    buffer: Option<BufferMeta>,
    max_key_size: u32,
    max_val_size: u32,
    byte_size: u64,
}

impl CellarReader<RedbMetaStore> {
    /// Open a snapshot of the cellar at `folder`. A folder (or metadata
    /// store) that does not exist reads as an empty cellar: zero size, no
    /// chunks, every checkpoint at its default.
    pub fn open(folder: impl AsRef<Path>, key: [u8; KEY_SIZE]) -> CellarResult<Self> {
        let folder = folder.as_ref().to_path_buf();
        let meta_path = folder.join(META_FILE_NAME);
        if !meta_path.exists() {
            debug!(folder = %folder.display(), "no metadata store, reading as empty cellar");
            return Ok(Self::empty(folder, key));
        }
        let store = RedbMetaStore::open_existing(&meta_path)?;
        Self::with_store(store, folder, key)
    }
}

impl<S: MetaStore> CellarReader<S> {
    /// Open a snapshot over a shared metadata store handle. This is how a
    /// reader coexists with a live writer on the same folder.
    pub fn with_store(
        store: S,
        folder: impl AsRef<Path>,
        key: [u8; KEY_SIZE],
    ) -> CellarResult<Self> {
        let folder = folder.as_ref().to_path_buf();

        let txn = store.begin_read()?;
        let chunks = schema::list_chunks(&txn)?;
        let buffer = schema::get_buffer(&txn)?;
        let cellar = schema::get_cellar_meta(&txn)?.unwrap_or_default();
        let byte_size = estimate_size(&txn)?.byte_size;
        drop(txn);

        debug!(
            folder = %folder.display(),
            chunks = chunks.len(),
            byte_size,
            "cellar reader open"
        );

        Ok(Self {
            folder,
            key,
            store: Some(store),
            chunks,
            buffer,
            max_key_size: cellar.max_key_size,
            max_val_size: cellar.max_val_size,
            byte_size,
        })
    }

    fn empty(folder: PathBuf, key: [u8; KEY_SIZE]) -> Self {
        Self {
            folder,
            key,
            store: None,
            chunks: Vec::new(),
            buffer: None,
            max_key_size: 0,
            max_val_size: 0,
            byte_size: 0,
        }
    }

    /// Total uncompressed bytes in the snapshot.
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Scan every record from the start of the cellar.
    pub fn read_all<F>(&mut self, handler: F) -> CellarResult<()>
    where
        F: FnMut(u64, &[u8], &mut BoundedReader<'_>),
    {
        self.read_from(0, u64::MAX, handler)
    }

    /// Scan up to `record_count` records whose positions are at or after
    /// `offset`, invoking `handler(position, key, value)` for each.
    ///
    /// `offset` must be a record boundary previously observed from a scan
    /// (or zero); the addressing scheme is record starts, not arbitrary
    /// bytes.
    pub fn read_from<F>(
        &mut self,
        offset: u64,
        record_count: u64,
        mut handler: F,
    ) -> CellarResult<()>
    where
        F: FnMut(u64, &[u8], &mut BoundedReader<'_>),
    {
        if self.byte_size == 0 || record_count == 0 {
            return Ok(());
        }

        let mut remaining = record_count;
        let mut key_buf = vec![0u8; self.max_key_size as usize];

        // chunks whose range ends after the offset, in start order
        let selected: Vec<&ChunkMeta> = self
            .chunks
            .iter()
            .filter(|c| offset < c.end_pos())
            .collect();

        if !selected.is_empty() {
            // one allocation serves every selected chunk
            let largest = selected
                .iter()
                .map(|c| c.uncompressed_byte_size)
                .max()
                .unwrap_or(0) as usize;
            let mut chunk_buf = vec![0u8; largest];

            for chunk_meta in selected {
                let out = &mut chunk_buf[..chunk_meta.uncompressed_byte_size as usize];
                chunk::read_chunk(&self.folder.join(&chunk_meta.file_name), &self.key, out)?;

                let mut cursor = Cursor::new(&out[..]);
                let mut local = 0u64;
                if offset > chunk_meta.start_pos {
                    local = offset - chunk_meta.start_pos;
                    cursor.seek(SeekFrom::Start(local))?;
                }

                scan_records(
                    &mut cursor,
                    chunk_meta.start_pos,
                    local,
                    chunk_meta.uncompressed_byte_size,
                    self.max_key_size,
                    self.max_val_size,
                    &mut key_buf,
                    &mut remaining,
                    &mut handler,
                )?;
                if remaining == 0 {
                    return Ok(());
                }
            }
        }

        let Some(buffer) = &self.buffer else {
            return Ok(());
        };

        // by the time the tail starts, either the offset itself or the
        // sealed chunks must have carried the scan to the buffer's start
        let covered_to = self.chunks.last().map(ChunkMeta::end_pos).unwrap_or(0);
        let resume = offset.max(covered_to);
        if resume < buffer.start_pos {
            return Err(CellarError::Range {
                tail_start: buffer.start_pos,
                offset: resume,
            });
        }

        let file = File::open(self.folder.join(&buffer.file_name))?;
        let mut tail = BufReader::new(file);
        let mut local = 0u64;
        if offset > buffer.start_pos {
            local = offset - buffer.start_pos;
            tail.seek(SeekFrom::Start(local))?;
        }

        scan_records(
            &mut tail,
            buffer.start_pos,
            local,
            buffer.pos,
            self.max_key_size,
            self.max_val_size,
            &mut key_buf,
            &mut remaining,
            &mut handler,
        )
    }

    /// Look up a named cursor position in its own short-lived transaction.
    pub fn get_checkpoint(&self, name: &str, default: i64) -> CellarResult<i64> {
        match &self.store {
            Some(store) => {
                let txn = store.begin_read()?;
                Ok(schema::get_checkpoint(&txn, name, default)?)
            }
            None => Ok(default),
        }
    }
}

/// Parse records sequentially out of `src` from `local` up to `end`,
/// handing each to the handler. `base` is the global offset of `src`'s
/// first byte; `remaining` is the record budget shared across chunks and
/// tail.
#[allow(clippy::too_many_arguments)]
fn scan_records<R, F>(
    src: &mut R,
    base: u64,
    mut local: u64,
    end: u64,
    max_key_size: u32,
    max_val_size: u32,
    key_buf: &mut [u8],
    remaining: &mut u64,
    handler: &mut F,
) -> CellarResult<()>
where
    R: ReadSeek,
    F: FnMut(u64, &[u8], &mut BoundedReader<'_>),
{
    use std::io::Read;

    while local < end && *remaining > 0 {
        let position = base + local;

        let (key_size, consumed) = varint::read_u32(&mut *src)?;
        local += consumed as u64;
        if key_size > max_key_size {
            return Err(CellarError::Format(format!(
                "key length {key_size} at position {position} exceeds recorded maximum {max_key_size}"
            )));
        }
        let key = &mut key_buf[..key_size as usize];
        src.read_exact(key)?;
        local += u64::from(key_size);

        let (value_size, consumed) = varint::read_u32(&mut *src)?;
        local += consumed as u64;
        if value_size > max_val_size {
            return Err(CellarError::Format(format!(
                "value length {value_size} at position {position} exceeds recorded maximum {max_val_size}"
            )));
        }

        let mut value = BoundedReader::new(&mut *src, u64::from(value_size));
        handler(position, key, &mut value);
        value.release()?;
        local += u64::from(value_size);

        *remaining -= 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::WriteTxn;
    use crate::store::CellarWriter;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn key() -> [u8; KEY_SIZE] {
        [13u8; KEY_SIZE]
    }

    #[test]
    fn missing_folder_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let mut reader = CellarReader::open(dir.path().join("absent"), key()).unwrap();

        assert_eq!(reader.byte_size(), 0);
        assert_eq!(reader.get_checkpoint("ingest", -5).unwrap(), -5);

        let mut seen = 0;
        reader.read_all(|_, _, _| seen += 1).unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn tail_records_come_back_in_order() {
        let dir = TempDir::new().unwrap();

        {
            let mut writer = CellarWriter::create(dir.path(), 1 << 16, key()).unwrap();
            writer.append(b"alpha", b"one").unwrap();
            writer.append(b"beta", b"two").unwrap();
            writer.append(b"", b"").unwrap();
            writer.checkpoint("s", 0).unwrap();
        }

        let mut reader = CellarReader::open(dir.path(), key()).unwrap();
        let mut seen: Vec<(u64, Vec<u8>, Vec<u8>)> = Vec::new();
        reader
            .read_all(|pos, k, v| {
                let mut value = Vec::new();
                use std::io::Read;
                v.read_to_end(&mut value).unwrap();
                seen.push((pos, k.to_vec(), value));
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                (0, b"alpha".to_vec(), b"one".to_vec()),
                (10, b"beta".to_vec(), b"two".to_vec()),
                (19, Vec::new(), Vec::new()),
            ]
        );
    }

    #[test]
    fn unread_values_do_not_desynchronize_the_scan() {
        let dir = TempDir::new().unwrap();

        {
            let mut writer = CellarWriter::create(dir.path(), 1 << 16, key()).unwrap();
            for i in 0u8..10 {
                writer.append(&[i], &vec![i; 100]).unwrap();
            }
            writer.checkpoint("s", 0).unwrap();
        }

        let mut reader = CellarReader::open(dir.path(), key()).unwrap();
        let mut keys = Vec::new();
        reader
            .read_all(|_, k, v| {
                // read every third value, skim the rest
                if k[0] % 3 == 0 {
                    use std::io::Read;
                    let mut value = Vec::new();
                    v.read_to_end(&mut value).unwrap();
                    assert_eq!(value, vec![k[0]; 100]);
                }
                keys.push(k[0]);
            })
            .unwrap();

        assert_eq!(keys, (0u8..10).collect::<Vec<u8>>());
    }

    #[test]
    fn record_count_stops_the_scan_early() {
        let dir = TempDir::new().unwrap();

        {
            let mut writer = CellarWriter::create(dir.path(), 1 << 16, key()).unwrap();
            for i in 0u8..8 {
                writer.append(&[i], b"value").unwrap();
            }
            writer.checkpoint("s", 0).unwrap();
        }

        let mut reader = CellarReader::open(dir.path(), key()).unwrap();
        let mut seen = 0u32;
        reader.read_from(0, 3, |_, _, _| seen += 1).unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn corrupt_length_field_is_a_format_error() {
        let dir = TempDir::new().unwrap();

        {
            let mut writer = CellarWriter::create(dir.path(), 1 << 16, key()).unwrap();
            writer.append(b"k", b"v").unwrap();
            writer.checkpoint("s", 0).unwrap();
        }

        // overwrite the tail's first length byte with a value no watermark
        // admits
        let buffer_path = dir.path().join("0000000000.blob");
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = OpenOptions::new().write(true).open(&buffer_path).unwrap();
            f.seek(SeekFrom::Start(0)).unwrap();
            f.write_all(&[0x7f]).unwrap();
        }

        let mut reader = CellarReader::open(dir.path(), key()).unwrap();
        let err = reader.read_all(|_, _, _| {}).unwrap_err();
        assert!(matches!(err, CellarError::Format(_)));
    }

    #[test]
    fn gap_before_the_tail_is_a_range_error() {
        let dir = TempDir::new().unwrap();
        let store = RedbMetaStore::open(dir.path().join(META_FILE_NAME)).unwrap();

        // metadata claims the tail starts at 100 with no chunk covering
        // the bytes before it
        let mut txn = store.begin_write().unwrap();
        schema::set_buffer(
            &mut txn,
            &BufferMeta {
                start_pos: 100,
                max_bytes: 1000,
                records: 1,
                pos: 10,
                file_name: "0000000100.blob".to_string(),
            },
        )
        .unwrap();
        schema::set_cellar_meta(
            &mut txn,
            &crate::meta::schema::CellarMeta {
                max_key_size: 8,
                max_val_size: 8,
            },
        )
        .unwrap();
        txn.commit().unwrap();
        std::fs::write(dir.path().join("0000000100.blob"), [0u8; 10]).unwrap();

        let mut reader = CellarReader::with_store(store, dir.path(), key()).unwrap();
        let err = reader.read_all(|_, _, _| {}).unwrap_err();
        assert!(matches!(
            err,
            CellarError::Range {
                tail_start: 100,
                offset: 0
            }
        ));
    }

    #[test]
    fn snapshot_reflects_the_last_checkpoint_only() {
        let dir = TempDir::new().unwrap();
        let mut writer = CellarWriter::create(dir.path(), 1 << 16, key()).unwrap();

        writer.append(b"persisted", b"yes").unwrap();
        writer.checkpoint("s", 0).unwrap();
        writer.append(b"not-yet", b"no").unwrap();

        let mut reader =
            CellarReader::with_store(writer.meta_store(), dir.path(), key()).unwrap();
        let mut keys = Vec::new();
        reader
            .read_all(|_, k, _| keys.push(k.to_vec()))
            .unwrap();
        assert_eq!(keys, vec![b"persisted".to_vec()]);

        // the append becomes visible to a fresh snapshot after checkpoint
        writer.checkpoint("s", 0).unwrap();
        let mut reader =
            CellarReader::with_store(writer.meta_store(), dir.path(), key()).unwrap();
        let mut count = 0;
        reader.read_all(|_, _, _| count += 1).unwrap();
        assert_eq!(count, 2);
    }
}
