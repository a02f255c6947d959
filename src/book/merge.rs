use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File},
    io::{self, BufWriter, Write as _},
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    book::{PositionStore, SortedBook, StoreError},
    entry::Entry,
};

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Drop transient records.
    pub compact: bool,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MergeStats {
    /// Records in the new canonical file.
    pub records: usize,
    /// Records taken from the delta or passed in.
    pub merged: usize,
    /// Transient records dropped by compaction.
    pub dropped: usize,
}

impl PositionStore {
    /// Fold the delta into the canonical file.
    pub fn merge(&mut self, options: &MergeOptions) -> Result<MergeStats, StoreError> {
        self.merge_with(&[], options)
    }

    /// Fold the delta and then `records` into the canonical file.
    ///
    /// Later records win for equal keys. The new file is written next to
    /// the canonical one and renamed over it, so the canonical file is
    /// either the old or the complete new one. The delta is emptied
    /// afterwards.
    pub fn merge_with(
        &mut self,
        records: &[Entry],
        options: &MergeOptions,
    ) -> Result<MergeStats, StoreError> {
        self.flush()?;

        let mut merged = BTreeMap::new();
        for entry in self.canonical.iter() {
            merged.entry(entry.key).or_insert(entry);
        }
        let mut stats = MergeStats {
            merged: self.overlay.len() + records.len(),
            ..MergeStats::default()
        };
        merged.extend(self.overlay.iter().map(|(&key, &entry)| (key, entry)));
        merged.extend(records.iter().map(|&entry| (entry.key, entry)));

        let mut out = Vec::with_capacity(merged.len());
        for entry in merged.into_values() {
            if options.compact && entry.is_transient() {
                stats.dropped += 1;
            } else {
                out.push(entry);
            }
        }
        stats.records = out.len();

        let path = self.canonical.path().to_owned();
        let tmp = tmp_path(&path);
        write_records(&tmp, &out)?;

        let expected = (out.len() * Entry::SIZE) as u64;
        let found = fs::metadata(&tmp).map_err(StoreError::io(&tmp))?.len();
        if found != expected {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Merge {
                path,
                expected,
                found,
            });
        }

        if let Err(err) = self.replace_canonical(&path, || fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        self.delta
            .get_ref()
            .set_len(0)
            .map_err(StoreError::io(&self.delta_path))?;
        self.overlay.clear();

        info!(
            path = %path.display(),
            records = stats.records,
            merged = stats.merged,
            dropped = stats.dropped,
            "merged book"
        );
        Ok(stats)
    }
}

impl PositionStore {
    /// Run `replace` with the canonical file unmapped, then map whatever
    /// is at `path` again, whether or not `replace` succeeded.
    fn replace_canonical(
        &mut self,
        path: &Path,
        replace: impl FnOnce() -> io::Result<()>,
    ) -> Result<(), StoreError> {
        self.canonical = SortedBook::empty(path.to_owned());
        let replaced = replace();
        self.canonical = SortedBook::open(path)?;
        replaced.map_err(StoreError::io(path))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Write records, which must already be in book order, and sync them.
pub(crate) fn write_records(path: &Path, records: &[Entry]) -> Result<(), StoreError> {
    let file = File::create(path).map_err(StoreError::io(path))?;
    let mut out = BufWriter::new(file);
    for entry in records {
        out.write_all(&entry.to_bytes())
            .map_err(StoreError::io(path))?;
    }
    let file = out
        .into_inner()
        .map_err(|err| StoreError::Io {
            path: path.to_owned(),
            error: err.into_error(),
        })?;
    file.sync_all().map_err(StoreError::io(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entry::{is_book_sorted, Meta},
        packed::PackedMove,
        score::Score,
    };

    fn entry(key: u64, score: Score, mv: PackedMove) -> Entry {
        Entry {
            key,
            mv,
            score,
            meta: Meta::NodeCount(3),
        }
    }

    fn e2e3() -> PackedMove {
        "e2e3".parse().unwrap()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("t.book");
        let delta = dir.path().join("t.new.delta");

        let mut store = PositionStore::open(&canonical, &delta).unwrap();
        for key in [9, 2, 5, 2] {
            store
                .append(entry(key, Score::mate_in(key as u16), e2e3()))
                .unwrap();
        }
        let stats = store.merge(&MergeOptions::default()).unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(store.pending(), 0);
        assert_eq!(fs::metadata(&delta).unwrap().len(), 0);
        let first = fs::read(&canonical).unwrap();
        assert_eq!(first.len(), 48);

        let stats = store.merge(&MergeOptions::default()).unwrap();
        assert_eq!(stats.merged, 0);
        assert_eq!(fs::read(&canonical).unwrap(), first);

        let records: Vec<Entry> = store.canonical().iter().collect();
        assert!(is_book_sorted(&records));
        assert_eq!(records.iter().map(|e| e.key).collect::<Vec<_>>(), [2, 5, 9]);
    }

    #[test]
    fn test_failed_replace_keeps_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("t.book");
        let mut store = PositionStore::open(&canonical, dir.path().join("t.delta")).unwrap();
        store.append(entry(7, Score::mate_in(2), e2e3())).unwrap();
        store.merge(&MergeOptions::default()).unwrap();

        let err = store
            .replace_canonical(&canonical, || {
                Err(io::Error::new(io::ErrorKind::Other, "rename failed"))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }), "{err}");
        assert_eq!(store.canonical().len(), 1);
        assert_eq!(store.lookup(7).unwrap().score, Score::mate_in(2));
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            PositionStore::open(dir.path().join("t.book"), dir.path().join("t.delta")).unwrap();
        store.append(entry(1, Score::mate_in(1), e2e3())).unwrap();
        store.merge(&MergeOptions::default()).unwrap();

        store.append(entry(1, Score::mate_in(2), e2e3())).unwrap();
        let extra = [entry(1, Score::mate_in(3), e2e3()), entry(4, Score::MATE, e2e3())];
        store.merge_with(&extra, &MergeOptions::default()).unwrap();
        assert_eq!(store.lookup(1).unwrap().score, Score::mate_in(3));
        assert_eq!(store.lookup(4).unwrap().score, Score::MATE);
    }

    #[test]
    fn test_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            PositionStore::open(dir.path().join("t.book"), dir.path().join("t.delta")).unwrap();
        store
            .append(entry(1, Score::won_estimate(2), PackedMove::NULL))
            .unwrap();
        store.append(entry(2, Score::MATE, PackedMove::NULL)).unwrap();
        store.append(entry(3, Score::won_estimate(2), e2e3())).unwrap();

        let stats = store.merge(&MergeOptions::default()).unwrap();
        assert_eq!(stats.records, 3);

        let stats = store.merge(&MergeOptions { compact: true }).unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.records, 2);
        assert_eq!(store.lookup(1), None);
        assert!(store.lookup(2).is_some());
        assert!(store.lookup(3).is_some());
    }
}
