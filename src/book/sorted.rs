use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use crate::{book::StoreError, entry::Entry};

/// A read-only, memory-mapped canonical book file.
///
/// Records are sorted by key, and for equal keys by descending priority,
/// so the first record for a key is the one that counts.
#[derive(Debug)]
pub struct SortedBook {
    path: PathBuf,
    mmap: Option<Mmap>,
}

impl SortedBook {
    /// Map the file at `path`. A missing or empty file is an empty book.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SortedBook, StoreError> {
        let path = path.as_ref().to_owned();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(SortedBook::empty(path));
            }
            Err(error) => return Err(StoreError::Io { path, error }),
        };
        let len = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(error) => return Err(StoreError::Io { path, error }),
        };
        if len % Entry::SIZE as u64 != 0 {
            return Err(StoreError::Length { path, len });
        }
        if len == 0 {
            return Ok(SortedBook::empty(path));
        }

        // Safety: Book files are only ever replaced by renaming a new file
        // over them, never modified in place.
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(StoreError::Io { path, error }),
        };

        Ok(SortedBook {
            path,
            mmap: Some(mmap),
        })
    }

    pub(crate) fn empty(path: PathBuf) -> SortedBook {
        SortedBook { path, mmap: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.bytes().len() / Entry::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Entry> {
        let start = index.checked_mul(Entry::SIZE)?;
        let record = self.bytes().get(start..start + Entry::SIZE)?;
        let mut buf = [0; Entry::SIZE];
        buf.copy_from_slice(record);
        Some(Entry::from_bytes(&buf))
    }

    fn key_at(&self, index: usize) -> u64 {
        let start = index * Entry::SIZE;
        let mut buf = [0; 8];
        buf.copy_from_slice(&self.bytes()[start..start + 8]);
        u64::from_be_bytes(buf)
    }

    /// The first record for `key`.
    pub fn lookup(&self, key: u64) -> Option<Entry> {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.get(lo).filter(|e| e.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}
