//! Random Access File
//!
//! Positioned reads and writes on a single OS file. There is no caching
//! layer here; the object layer above keeps its own caches.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TroveError};

/// Upper bound on the buffer used by chunked operations
pub const CHUNK_SIZE: u64 = 64 * 1024;

/// Byte-addressable view of one file
///
/// Every operation touches the OS file directly. After [`close`] the next
/// operation transparently reopens the file.
///
/// [`close`]: RandomAccessFile::close
pub struct RandomAccessFile {
    /// Location of the backing file
    path: PathBuf,

    /// Open handle, `None` after `close`
    file: Option<File>,
}

impl RandomAccessFile {
    /// Open or create the file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = Self::open_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    fn open_file(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    /// The open handle, reopening after `close`
    fn handle(&mut self) -> Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                tracing::debug!("Reopening {}", self.path.display());
                Self::open_file(&self.path)?
            }
        };
        Ok(self.file.insert(file))
    }

    // =========================================================================
    // Reads and Writes
    // =========================================================================

    /// Write `data` at `addr`, extending the file if needed
    pub fn put(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let file = self.handle()?;
        file.seek(SeekFrom::Start(addr))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Write exactly `size` bytes pulled from `reader` at `addr`
    pub fn put_streamed<R: Read>(&mut self, addr: u64, reader: &mut R, size: u64) -> Result<()> {
        let file = self.handle()?;
        file.seek(SeekFrom::Start(addr))?;
        let copied = io::copy(&mut reader.take(size), file)?;
        if copied < size {
            return Err(TroveError::ShortRead {
                addr,
                expected: size,
                actual: copied,
            });
        }
        Ok(())
    }

    /// Read exactly `size` bytes at `addr`
    pub fn get(&mut self, addr: u64, size: u64) -> Result<Vec<u8>> {
        let file = self.handle()?;
        let available = file.metadata()?.len().saturating_sub(addr);
        file.seek(SeekFrom::Start(addr))?;

        // Never reserve more than the file can supply
        let mut buf = Vec::with_capacity(size.min(available) as usize);
        Read::by_ref(file).take(size).read_to_end(&mut buf)?;

        if (buf.len() as u64) < size {
            return Err(TroveError::ShortRead {
                addr,
                expected: size,
                actual: buf.len() as u64,
            });
        }
        Ok(buf)
    }

    /// Write `data` at the current end of file, returning its address
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        let file = self.handle()?;
        let addr = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        Ok(addr)
    }

    /// Write `repeats` copies of `pattern` starting at `addr`
    ///
    /// The repeated buffer is never built whole; at most about
    /// `CHUNK_SIZE` bytes are held at a time.
    pub fn fill(&mut self, addr: u64, repeats: u64, pattern: &[u8]) -> Result<()> {
        if repeats == 0 || pattern.is_empty() {
            return Ok(());
        }

        let per_chunk = (CHUNK_SIZE / pattern.len() as u64).max(1);
        let chunk = pattern.repeat(per_chunk.min(repeats) as usize);

        let file = self.handle()?;
        file.seek(SeekFrom::Start(addr))?;

        let mut remaining = repeats;
        while remaining > 0 {
            let n = per_chunk.min(remaining);
            file.write_all(&chunk[..n as usize * pattern.len()])?;
            remaining -= n;
        }
        Ok(())
    }

    /// Copy `size` bytes from `src` to `dst`; overlapping ranges are fine
    pub fn copy(&mut self, src: u64, dst: u64, size: u64) -> Result<()> {
        if src == dst || size == 0 {
            return Ok(());
        }

        // dst inside the source range: walk backwards so unread source
        // bytes are never overwritten
        let backwards = dst > src && dst < src.saturating_add(size);

        let mut done = 0;
        while done < size {
            let n = CHUNK_SIZE.min(size - done);
            let offset = if backwards { size - done - n } else { done };
            let chunk = self.get(src + offset, n)?;
            self.put(dst + offset, &chunk)?;
            done += n;
        }
        Ok(())
    }

    /// Exchange the contents of two non-overlapping ranges
    pub fn swap(&mut self, a: u64, b: u64, size: u64) -> Result<()> {
        if a == b || size == 0 {
            return Ok(());
        }
        if a < b.saturating_add(size) && b < a.saturating_add(size) {
            return Err(TroveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("swap ranges at {} and {} of size {} overlap", a, b, size),
            )));
        }

        let mut done = 0;
        while done < size {
            let n = CHUNK_SIZE.min(size - done);
            let left = self.get(a + done, n)?;
            let right = self.get(b + done, n)?;
            self.put(a + done, &right)?;
            self.put(b + done, &left)?;
            done += n;
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Current file length in bytes
    pub fn len(&mut self) -> Result<u64> {
        Ok(self.handle()?.metadata()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Push written data to stable storage
    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// Flush and release the OS handle
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        if self.file.take().is_some() {
            tracing::debug!("Closed {}", self.path.display());
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
