//! Length-bounded view over a shared seekable stream
//!
//! Record handlers receive each value as a [`BoundedReader`]: reads are
//! clamped to the value's declared length and the view cannot seek or write.
//! When the scan loop releases the view it skips the underlying stream
//! forward over whatever the handler left unread, so the next record is
//! parsed from the right byte no matter how much of the value was consumed.

use std::io::{self, Read, Seek, SeekFrom};

/// Seam for anything the scan can read records out of: an in-memory chunk
/// or the live buffer file. The `Seek` bound is what lets an unread value
/// remainder be skipped.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Forward-only, length-capped reader over a borrowed stream.
pub struct BoundedReader<'a> {
    source: &'a mut dyn ReadSeek,
    length: u64,
    position: u64,
}

impl<'a> BoundedReader<'a> {
    /// Bound `source` to the next `length` bytes from its current position.
    pub fn new(source: &'a mut dyn ReadSeek, length: u64) -> Self {
        Self {
            source,
            length,
            position: 0,
        }
    }

    /// Declared length of the window.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// True if the window is zero bytes long.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left in the window.
    pub fn remaining(&self) -> u64 {
        self.length - self.position
    }

    /// Advance the underlying stream to the end of the window, regardless
    /// of how much was read. The scan loop calls this after every handler
    /// invocation; record parsing depends on it.
    pub fn release(self) -> io::Result<()> {
        let unread = self.length - self.position;
        if unread > 0 {
            self.source.seek(SeekFrom::Current(unread as i64))?;
        }
        Ok(())
    }
}

impl Read for BoundedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.length - self.position;
        if available == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(available as usize);
        let read = self.source.read(&mut buf[..want])?;
        self.position += read as u64;
        Ok(read)
    }
}
