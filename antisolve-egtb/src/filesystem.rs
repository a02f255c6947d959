//! Traits to provide a custom filesystem implementation.

use std::{
    fmt, fs,
    io::{self, Read as _, Seek as _, SeekFrom},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// An abstract filesystem.
pub trait Filesystem: Send + Sync {
    /// Determines the size in bytes of the given file.
    ///
    /// Follows symbolic links.
    ///
    /// # Errors
    ///
    /// See [`std::fs::metadata()`]. Additionally errors if `path` does not
    /// ultimately point to a regular file.
    fn regular_file_size(&self, path: &Path) -> io::Result<u64>;

    /// Returns a list of files in the given directory.
    ///
    /// # Errors
    ///
    /// See [`std::fs::read_dir()`].
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Opens the given file, returning a handle for random read requests.
    ///
    /// # Errors
    ///
    /// See [`std::fs::File::open()`].
    fn open(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>>;
}

/// The purpose of a read. Advisory only.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReadHint {
    /// Reading the table header.
    Header,
    /// Reading the chunk offset index of a compressed store.
    ChunkIndex,
    /// Reading a compressed chunk.
    Chunk,
    /// Reading uncompressed value cells.
    Cells,
}

/// An abstract randomly readable file.
pub trait RandomAccessFile: Send + Sync {
    /// Reads some bytes starting from a given offset.
    ///
    /// See [`std::os::unix::fs::FileExt::read_at()`] for precise semantics.
    fn read_at(&self, hint: ReadHint, pos: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads the exact number of bytes required to fill `buf` from the given
    /// offset.
    fn read_exact_at(&self, hint: ReadHint, mut pos: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(hint, pos, buf) {
                Ok(0) => break,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    pos += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ));
        }
        Ok(())
    }

    /// Reads the single byte at a given offset.
    fn read_u8_at(&self, hint: ReadHint, pos: u64) -> io::Result<u8> {
        let mut buf = [0];
        self.read_exact_at(hint, pos, &mut buf[..])?;
        Ok(buf[0])
    }

    /// Reads eight bytes at a given offset, returning an integer in little
    /// endian.
    fn read_u64_le_at(&self, hint: ReadHint, pos: u64) -> io::Result<u64> {
        let mut buf = [0; 8];
        self.read_exact_at(hint, pos, &mut buf[..])?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<T: RandomAccessFile + ?Sized> RandomAccessFile for Box<T> {
    fn read_at(&self, hint: ReadHint, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(hint, pos, buf)
    }
}

/// Files on disk.
#[derive(Debug)]
pub(crate) struct DefaultFilesystem;

impl Filesystem for DefaultFilesystem {
    fn regular_file_size(&self, path: &Path) -> io::Result<u64> {
        let meta = path.metadata()?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a regular file",
            ));
        }
        Ok(meta.len())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?
            .map(|maybe_entry| maybe_entry.map(|entry| entry.path()))
            .collect()
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>> {
        Ok(Box::new(DefaultRandomAccessFile {
            inner: Mutex::new(fs::File::open(path)?),
        }))
    }
}

/// A file handle shared by all readers of one table. The cursor is part of
/// the handle, so every read holds the lock across seek and read.
pub(crate) struct DefaultRandomAccessFile {
    inner: Mutex<fs::File>,
}

impl fmt::Debug for DefaultRandomAccessFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultRandomAccessFile").finish_non_exhaustive()
    }
}

impl RandomAccessFile for DefaultRandomAccessFile {
    fn read_at(&self, _hint: ReadHint, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "poisoned file lock"))?;
        file.seek(SeekFrom::Start(pos))?;
        file.read(buf)
    }
}

/// A file held in memory.
impl RandomAccessFile for Vec<u8> {
    fn read_at(&self, _hint: ReadHint, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = usize::try_from(pos).unwrap_or(usize::MAX).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}
