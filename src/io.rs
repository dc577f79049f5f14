//! Unified random-access read surface over a file, a memory map, or an in-memory slice.
//!
//! Every higher-level component (the record codec, the summary builder, the message
//! iterator) reads through a [`ByteSource`] rather than assuming a particular backing
//! store, so the same code walks a mapped file, a `Vec<u8>` in a test, or a buffered
//! `File` for platforms where mmap isn't available or desired.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{McapError, McapResult};

/// Recommended default buffer size for [`FileSource`]'s internal read buffer, sized for
/// sequential chunk scans. Callers with a different access pattern can build their own
/// `BufReader` around a smaller or larger capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// A unified, random-access, borrow-returning read surface.
///
/// Implementations don't need to be `Send`/`Sync`; a `ByteSource` is owned by exactly
/// one reader, per the crate's concurrency model.
pub trait ByteSource {
    /// Reads up to `n` bytes starting at the current position and advances past them.
    /// Returns fewer bytes only at end-of-file.
    fn read(&mut self, n: usize) -> McapResult<&[u8]>;

    /// Like [`read`](ByteSource::read), but does not advance the position.
    fn peek(&mut self, n: usize) -> McapResult<&[u8]>;

    /// Seeks to an absolute offset from the start of the source.
    fn seek_from_start(&mut self, offset: u64) -> McapResult<()>;

    /// Seeks to `back` bytes before the end of the source.
    fn seek_from_end(&mut self, back: u64) -> McapResult<()>;

    /// Seeks forward (or backward, if `delta` is negative) from the current position.
    fn seek_from_current(&mut self, delta: i64) -> McapResult<()>;

    /// Returns the current absolute position.
    fn tell(&self) -> u64;

    /// Returns the total size of the underlying source, in bytes.
    fn size(&self) -> u64;
}

/// A [`ByteSource`] over an in-memory byte slice (or a completed [`memmap2::Mmap`], which
/// derefs to `&[u8]` and behaves identically for our purposes).
pub struct SliceSource<'a> {
    buf: &'a [u8],
    pos: u64,
}

impl<'a> SliceSource<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> ByteSource for SliceSource<'a> {
    fn read(&mut self, n: usize) -> McapResult<&[u8]> {
        let start = self.pos as usize;
        let end = start.saturating_add(n).min(self.buf.len());
        let slice = &self.buf[start..end];
        self.pos += slice.len() as u64;
        Ok(slice)
    }

    fn peek(&mut self, n: usize) -> McapResult<&[u8]> {
        let start = self.pos as usize;
        let end = start.saturating_add(n).min(self.buf.len());
        Ok(&self.buf[start..end])
    }

    fn seek_from_start(&mut self, offset: u64) -> McapResult<()> {
        if offset > self.buf.len() as u64 {
            return Err(McapError::UnexpectedEof);
        }
        self.pos = offset;
        Ok(())
    }

    fn seek_from_end(&mut self, back: u64) -> McapResult<()> {
        let len = self.buf.len() as u64;
        if back > len {
            return Err(McapError::UnexpectedEof);
        }
        self.pos = len - back;
        Ok(())
    }

    fn seek_from_current(&mut self, delta: i64) -> McapResult<()> {
        let new_pos = (self.pos as i64)
            .checked_add(delta)
            .ok_or(McapError::UnexpectedEof)?;
        if new_pos < 0 || new_pos as u64 > self.buf.len() as u64 {
            return Err(McapError::UnexpectedEof);
        }
        self.pos = new_pos as u64;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.buf.len() as u64
    }
}

/// A [`ByteSource`] over a memory-mapped file.
///
/// Kept as a thin wrapper rather than a bare alias for [`SliceSource`] so callers can
/// hold onto the owning [`memmap2::Mmap`] alongside the source.
pub struct MmapSource {
    mmap: memmap2::Mmap,
    pos: u64,
}

impl MmapSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self { mmap, pos: 0 })
    }

    pub fn from_mmap(mmap: memmap2::Mmap) -> Self {
        Self { mmap, pos: 0 }
    }
}

impl ByteSource for MmapSource {
    fn read(&mut self, n: usize) -> McapResult<&[u8]> {
        let start = self.pos as usize;
        let end = start.saturating_add(n).min(self.mmap.len());
        let slice = &self.mmap[start..end];
        self.pos += slice.len() as u64;
        Ok(slice)
    }

    fn peek(&mut self, n: usize) -> McapResult<&[u8]> {
        let start = self.pos as usize;
        let end = start.saturating_add(n).min(self.mmap.len());
        Ok(&self.mmap[start..end])
    }

    fn seek_from_start(&mut self, offset: u64) -> McapResult<()> {
        if offset > self.mmap.len() as u64 {
            return Err(McapError::UnexpectedEof);
        }
        self.pos = offset;
        Ok(())
    }

    fn seek_from_end(&mut self, back: u64) -> McapResult<()> {
        let len = self.mmap.len() as u64;
        if back > len {
            return Err(McapError::UnexpectedEof);
        }
        self.pos = len - back;
        Ok(())
    }

    fn seek_from_current(&mut self, delta: i64) -> McapResult<()> {
        let new_pos = (self.pos as i64)
            .checked_add(delta)
            .ok_or(McapError::UnexpectedEof)?;
        if new_pos < 0 || new_pos as u64 > self.mmap.len() as u64 {
            return Err(McapError::UnexpectedEof);
        }
        self.pos = new_pos as u64;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }
}

/// A [`ByteSource`] over a buffered, seekable file.
///
/// Unlike [`SliceSource`]/[`MmapSource`], a plain `Read + Seek` can't hand back borrowed
/// slices of the underlying storage, so `read`/`peek` copy into an internal buffer and
/// return a reference into it, valid until the next call.
pub struct FileSource {
    inner: BufReader<File>,
    size: u64,
    pos: u64,
    scratch: Vec<u8>,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::with_capacity(path, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity<P: AsRef<Path>>(path: P, capacity: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            inner: BufReader::with_capacity(capacity, file),
            size,
            pos: 0,
            scratch: Vec::new(),
        })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, n: usize) -> McapResult<&[u8]> {
        self.scratch.resize(n, 0);
        let mut filled = 0;
        while filled < n {
            let read = self.inner.read(&mut self.scratch[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        self.scratch.truncate(filled);
        self.pos += filled as u64;
        Ok(&self.scratch[..])
    }

    fn peek(&mut self, n: usize) -> McapResult<&[u8]> {
        let start = self.pos;
        let _ = self.read(n)?;
        self.inner.seek(SeekFrom::Start(start))?;
        self.pos = start;
        Ok(&self.scratch[..])
    }

    fn seek_from_start(&mut self, offset: u64) -> McapResult<()> {
        self.pos = self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn seek_from_end(&mut self, back: u64) -> McapResult<()> {
        self.pos = self
            .inner
            .seek(SeekFrom::End(-(back.min(self.size) as i64)))?;
        Ok(())
    }

    fn seek_from_current(&mut self, delta: i64) -> McapResult<()> {
        self.pos = self.inner.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// A bounded-scope cursor over an already-read record body, so record parsers cannot
/// over-read: every buffer handed to `binrw` in [`crate::linear`] is already sliced to
/// exactly the record's declared length before parsing starts.
pub type BoundedReader<'a> = std::io::Cursor<&'a [u8]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_source_read_and_seek() {
        let data = b"0123456789";
        let mut src = SliceSource::new(data);
        assert_eq!(src.read(3).unwrap(), b"012");
        assert_eq!(src.tell(), 3);
        assert_eq!(src.peek(2).unwrap(), b"34");
        assert_eq!(src.tell(), 3);
        src.seek_from_start(8).unwrap();
        assert_eq!(src.read(5).unwrap(), b"89");
        src.seek_from_end(2).unwrap();
        assert_eq!(src.read(2).unwrap(), b"89");
        src.seek_from_start(0).unwrap();
        src.seek_from_current(4).unwrap();
        assert_eq!(src.tell(), 4);
    }

    #[test]
    fn slice_source_seek_out_of_range() {
        let data = b"abc";
        let mut src = SliceSource::new(data);
        assert!(src.seek_from_start(10).is_err());
        assert!(src.seek_from_end(10).is_err());
    }
}
