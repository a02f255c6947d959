// This file is part of the antisolve library.
// Copyright (C) 2026 The antisolve developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

//! Durable position stores.
//!
//! Each store is a canonical sorted file plus an append-only delta file in
//! the same record format. The delta is replayed into an in-memory overlay
//! when the store is opened, and folded into the canonical file by
//! [`PositionStore::merge()`].

mod merge;
mod sorted;

use std::{
    error::Error,
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Read as _, Write as _},
    path::{Path, PathBuf},
};

use rustc_hash::FxHashMap;
use tracing::{info, warn};

pub use self::{
    merge::{MergeOptions, MergeStats},
    sorted::SortedBook,
};
use crate::entry::Entry;

/// Error when reading or writing a book.
#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, error: io::Error },
    /// File length is not a multiple of the record size.
    Length { path: PathBuf, len: u64 },
    /// The merged file does not have the expected length.
    Merge {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |error| StoreError::Io {
            path: path.to_owned(),
            error,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, error } => write!(f, "{}: {error}", path.display()),
            StoreError::Length { path, len } => write!(
                f,
                "{}: length {len} is not a multiple of {}",
                path.display(),
                Entry::SIZE
            ),
            StoreError::Merge {
                path,
                expected,
                found,
            } => write!(
                f,
                "{}: merged file has {found} bytes, expected {expected}",
                path.display()
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Io { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A canonical book with its write-ahead delta.
#[derive(Debug)]
pub struct PositionStore {
    canonical: SortedBook,
    delta_path: PathBuf,
    delta: BufWriter<File>,
    overlay: FxHashMap<u64, Entry>,
}

impl PositionStore {
    /// Open the canonical file and replay the delta.
    ///
    /// A partial record at the end of the delta is the trace of an
    /// interrupted write and is cut off.
    pub fn open<P, Q>(canonical: P, delta: Q) -> Result<PositionStore, StoreError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let canonical = SortedBook::open(canonical)?;
        let delta_path = delta.as_ref().to_owned();

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&delta_path)
            .map_err(StoreError::io(&delta_path))?;

        let mut bytes = Vec::new();
        (&file)
            .read_to_end(&mut bytes)
            .map_err(StoreError::io(&delta_path))?;

        let complete = bytes.len() - bytes.len() % Entry::SIZE;
        if complete != bytes.len() {
            warn!(
                path = %delta_path.display(),
                trailing = bytes.len() - complete,
                "cutting off partial delta record"
            );
            file.set_len(complete as u64)
                .map_err(StoreError::io(&delta_path))?;
        }

        let mut overlay = FxHashMap::default();
        for chunk in bytes[..complete].chunks_exact(Entry::SIZE) {
            let mut buf = [0; Entry::SIZE];
            buf.copy_from_slice(chunk);
            let entry = Entry::from_bytes(&buf);
            overlay.insert(entry.key, entry);
        }
        if complete > 0 {
            info!(
                path = %delta_path.display(),
                records = complete / Entry::SIZE,
                "recovered unmerged records"
            );
        }

        Ok(PositionStore {
            canonical,
            delta_path,
            delta: BufWriter::new(file),
            overlay,
        })
    }

    /// Pending records first, then the canonical file.
    pub fn lookup(&self, key: u64) -> Option<Entry> {
        self.overlay
            .get(&key)
            .copied()
            .or_else(|| self.canonical.lookup(key))
    }

    /// Write a record ahead to the delta.
    pub fn append(&mut self, entry: Entry) -> Result<(), StoreError> {
        self.delta
            .write_all(&entry.to_bytes())
            .map_err(StoreError::io(&self.delta_path))?;
        self.overlay.insert(entry.key, entry);
        Ok(())
    }

    /// Make appended records durable.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.delta
            .flush()
            .map_err(StoreError::io(&self.delta_path))?;
        self.delta
            .get_ref()
            .sync_data()
            .map_err(StoreError::io(&self.delta_path))
    }

    pub fn canonical(&self) -> &SortedBook {
        &self.canonical
    }

    /// Number of distinct keys waiting to be merged.
    pub fn pending(&self) -> usize {
        self.overlay.len()
    }

    pub fn delta_path(&self) -> &Path {
        &self.delta_path
    }
}

/// The stores that belong to one named book.
#[derive(Debug)]
pub struct BookSet {
    /// Proofs and evaluator choices.
    pub main: PositionStore,
    /// Moves forced by hand.
    pub overrides: PositionStore,
    /// Rejected alternatives from arbitration.
    pub alternates: PositionStore,
}

impl BookSet {
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<BookSet, StoreError> {
        let dir = dir.as_ref();
        let store = |book: &str, delta: &str| {
            PositionStore::open(
                dir.join(format!("{name}.{book}")),
                dir.join(format!("{name}.{delta}")),
            )
        };
        Ok(BookSet {
            main: store("book", "new.delta")?,
            overrides: store("override.book", "override.delta")?,
            alternates: store("alt.book", "alt.delta")?,
        })
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.main.flush()?;
        self.overrides.flush()?;
        self.alternates.flush()
    }
}
