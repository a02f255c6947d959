// This file is part of the antisolve-egtb library.
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

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use shakmaty::{variant::Antichess, Move, Position};
use tracing::{debug, trace};

use crate::{
    errors::{ProbeResultExt as _, TablebaseError, TablebaseResult},
    filesystem::{DefaultFilesystem, Filesystem, RandomAccessFile},
    material::Material,
    table::{Table, TableOptions, TABLE_SUFFIX},
    types::{Probe, MAX_PIECES},
};

type LazyTable = (PathBuf, OnceCell<Table<Box<dyn RandomAccessFile>>>);

/// A collection of tables.
pub struct Tablebase {
    filesystem: Arc<dyn Filesystem>,
    options: TableOptions,
    tables: FxHashMap<Material, LazyTable>,
    max_pieces: usize,
}

impl fmt::Debug for Tablebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tablebase")
            .field("tables", &self.tables.len())
            .field("max_pieces", &self.max_pieces)
            .finish_non_exhaustive()
    }
}

impl Default for Tablebase {
    fn default() -> Tablebase {
        Tablebase::new()
    }
}

/// The side to move has won: it has no pieces left or no legal moves.
pub(crate) fn terminal_value(pos: &Antichess) -> Option<Probe> {
    if pos.board().by_color(pos.turn()).is_empty() || pos.legal_moves().is_empty() {
        Some(Probe::win(0))
    } else {
        None
    }
}

impl Tablebase {
    /// Create an empty collection of tables.
    pub fn new() -> Tablebase {
        Tablebase::with_filesystem(Arc::new(DefaultFilesystem))
    }

    /// Create an empty collection of tables, reading files from a custom
    /// filesystem.
    pub fn with_filesystem(filesystem: Arc<dyn Filesystem>) -> Tablebase {
        Tablebase {
            filesystem,
            options: TableOptions::default(),
            tables: FxHashMap::default(),
            max_pieces: 0,
        }
    }

    /// Set what tables opened from now on are required to provide.
    pub fn set_options(&mut self, options: TableOptions) {
        self.options = options;
    }

    /// Add all relevant tables from a directory.
    ///
    /// Tables are selected by filename, e.g. `KRvK.atbw`. The files are not
    /// actually opened. This happens lazily when probing.
    ///
    /// Returns the number of added tables.
    ///
    /// # Errors
    ///
    /// Returns an error result when:
    ///
    /// * The `path` does not exist.
    /// * `path` is not a directory.
    /// * The process lacks permissions to list the directory.
    pub fn add_directory<P: AsRef<Path>>(&mut self, path: P) -> std::io::Result<usize> {
        let mut num = 0;

        for path in self.filesystem.read_dir(path.as_ref())? {
            if self.add_file(&path).is_ok() {
                num += 1;
            }
        }

        Ok(num)
    }

    /// Add a single table file.
    ///
    /// # Errors
    ///
    /// Errors if the file name is not a normalized material signature with
    /// the table extension, or if it is not a regular file.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> std::io::Result<()> {
        let path = path.as_ref();
        let invalid = || std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a table file");

        let (stem, ext) = match (path.file_stem().and_then(|s| s.to_str()), path.extension()) {
            (Some(stem), Some(ext)) => (stem, ext),
            _ => return Err(invalid()),
        };
        if ext != TABLE_SUFFIX {
            return Err(invalid());
        }
        let material: Material = stem.parse().map_err(|_| invalid())?;
        if !material.is_normalized()
            || material.count() > MAX_PIECES
            || material.white.count() < 1
            || material.black.count() < 1
        {
            return Err(invalid());
        }

        self.filesystem.regular_file_size(path)?;

        self.max_pieces = self.max_pieces.max(material.count());
        self.tables
            .insert(material, (path.to_path_buf(), OnceCell::new()));
        Ok(())
    }

    /// The maximum number of pieces over all added tables.
    pub fn max_pieces(&self) -> usize {
        self.max_pieces
    }

    /// Whether a table for the (not necessarily normalized) material is
    /// available.
    pub fn has_table(&self, material: &Material) -> bool {
        self.tables.contains_key(&material.clone().into_normalized())
    }

    /// Probe the exact value of a position for the side to move.
    ///
    /// # Errors
    ///
    /// See [`TablebaseError`] for possible error conditions. A
    /// [`TablebaseError::MissingTable`] only means that the answer is not
    /// available.
    pub fn probe(&self, pos: &Antichess) -> TablebaseResult<Probe> {
        self.probe_inner(pos, false)
    }

    /// Every legal move with its value for the side to move.
    pub fn move_probes(&self, pos: &Antichess) -> TablebaseResult<Vec<(Move, Probe)>> {
        pos.legal_moves()
            .into_iter()
            .map(|m| {
                let mut after = pos.clone();
                after.play_unchecked(&m);
                Ok((m, self.probe(&after)?.before_move()))
            })
            .collect()
    }

    fn probe_inner(&self, pos: &Antichess, lookahead: bool) -> TablebaseResult<Probe> {
        if let Some(value) = terminal_value(pos) {
            return Ok(value);
        }

        if pos.board().occupied().count() > MAX_PIECES {
            return Err(TablebaseError::TooManyPieces);
        }

        if pos.castles().any() {
            return Err(TablebaseError::Castling);
        }

        // Positions with a legal en passant capture are not indexed. All of
        // their moves are captures, so a chain of such positions means the
        // input is broken.
        let moves = pos.legal_moves();
        if moves.iter().any(|m| m.is_en_passant()) {
            if lookahead {
                return Err(TablebaseError::EnPassantChain);
            }

            let mut best = None;
            for m in &moves {
                let mut after = pos.clone();
                after.play_unchecked(m);
                let v = self.probe_inner(&after, true)?.before_move();
                trace!(%v, "en passant lookahead");
                best = best.max(Some(v));
            }
            return best.ok_or(TablebaseError::EnPassantChain);
        }

        self.probe_table(pos)
    }

    pub(crate) fn probe_table(&self, pos: &Antichess) -> TablebaseResult<Probe> {
        let material = Material::from_board(pos.board()).into_normalized();
        let (path, table) = self
            .tables
            .get(&material)
            .ok_or_else(|| TablebaseError::MissingTable {
                material: material.clone(),
            })?;

        let table = table
            .get_or_try_init(|| {
                debug!(path = %path.display(), "opening table");
                let raf = self.filesystem.open(path)?;
                Table::open(raf, &material, &self.options)
            })
            .ctx(&material)?;

        table.probe(pos.board(), pos.turn()).ctx(&material)
    }
}
