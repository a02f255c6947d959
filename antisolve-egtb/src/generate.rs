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

//! Building tables by retrograde analysis.
//!
//! Every index of the table gets a representative position. Its moves lead
//! either back into the same table or into a smaller (or promoted) one,
//! which must already be available. Values are then assigned one distance
//! at a time: a position is lost in `d` when every move leads to a win in
//! at most `d` with one in exactly `d`, and won in `d + 1` when some move
//! leads to a loss in `d`. What remains is drawn.

use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};

use arrayvec::ArrayVec;
use shakmaty::{
    variant::Antichess, Board, CastlingMode, Color, FromSetup, Position, Role, Setup, Square,
};
use tracing::{debug, info};

use crate::{
    encoding::{canonical_pieces, symmetry_class, Encoder},
    errors::{ProbeError, TablebaseError},
    material::Material,
    table::{TableWriter, TABLE_SUFFIX},
    tablebase::{terminal_value, Tablebase},
    types::{Pieces, Probe, Wdl, MAX_PIECES},
};

/// Error when generating a table.
#[derive(Debug)]
pub enum GenerateError {
    /// Material that can not be generated, e.g. with en passant captures.
    Unsupported {
        #[allow(missing_docs)]
        material: Material,
    },
    /// A position leads into a table that could not be probed.
    Dependency(TablebaseError),
    /// The indexing scheme or table writer failed.
    Table(ProbeError),
    /// A move leads to an index that no enumerated position maps to.
    Unreachable {
        #[allow(missing_docs)]
        material: Material,
        #[allow(missing_docs)]
        index: u64,
    },
    /// Positions that are not images of each other share an index.
    Collision {
        #[allow(missing_docs)]
        material: Material,
        #[allow(missing_docs)]
        index: u64,
    },
    /// I/O error while writing tables.
    Io(io::Error),
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::Unsupported { material } => {
                write!(f, "can not generate {material}")
            }
            GenerateError::Dependency(err) => write!(f, "dependency: {err}"),
            GenerateError::Table(err) => err.fmt(f),
            GenerateError::Unreachable { material, index } => {
                write!(f, "{material}: index {index} has no representative")
            }
            GenerateError::Collision { material, index } => {
                write!(f, "{material}: index {index} holds unrelated positions")
            }
            GenerateError::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl Error for GenerateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GenerateError::Dependency(err) => Some(err),
            GenerateError::Table(err) => Some(err),
            GenerateError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TablebaseError> for GenerateError {
    fn from(err: TablebaseError) -> GenerateError {
        GenerateError::Dependency(err)
    }
}

impl From<ProbeError> for GenerateError {
    fn from(err: ProbeError) -> GenerateError {
        GenerateError::Table(err)
    }
}

impl From<io::Error> for GenerateError {
    fn from(err: io::Error) -> GenerateError {
        GenerateError::Io(err)
    }
}

#[derive(Debug, Copy, Clone)]
enum Successor {
    /// Index into the table being generated.
    Local(u64),
    /// Value already known.
    Fixed(Probe),
}

/// Marks an index without a representative yet.
const UNSEEN: u64 = u64::MAX;

/// Records the symmetry class of the first legal position at `index`.
/// Returns whether the position is new, and fails if a position of another
/// class got there first.
fn claim(
    classes: &mut [u64],
    material: &Material,
    index: u64,
    class: u64,
    legal: impl FnOnce() -> bool,
) -> Result<bool, GenerateError> {
    let slot = &mut classes[index as usize];
    if *slot == class || !legal() {
        Ok(false)
    } else if *slot == UNSEEN {
        *slot = class;
        Ok(true)
    } else {
        Err(GenerateError::Collision {
            material: material.clone(),
            index,
        })
    }
}

#[derive(Debug)]
struct Node {
    index: u64,
    start: usize,
    end: usize,
}

/// Compute the value of every index of the table for `material`.
///
/// Positions reached by captures and promotions are probed in
/// `tablebase`, so those tables must be added first. Indexes that no legal
/// position maps to are filled with draws.
///
/// # Errors
///
/// Fails when both sides have pawns, or when a dependency is missing.
pub fn generate(material: &Material, tablebase: &Tablebase) -> Result<Vec<Probe>, GenerateError> {
    let material = material.clone().into_normalized();
    if material.has_opposing_pawns() || material.count() > MAX_PIECES {
        return Err(GenerateError::Unsupported { material });
    }

    let encoder = Encoder::new(&material)?;
    let size = usize::try_from(encoder.size())
        .map_err(|_| GenerateError::Unsupported {
            material: material.clone(),
        })?;
    info!(%material, cells = size, "generating table");

    let mut values: Vec<Option<Probe>> = vec![None; size];
    let mut classes = vec![UNSEEN; size];
    let mut successors = Vec::new();
    let mut pending = Vec::new();
    let mut max_fixed = 0;

    visit_positions(&material, |board, turn| {
        let index = encoder.index(board, turn)?;
        let slot = index as usize;
        let mut pos = None;
        let class = symmetry_class(board, turn);
        if !claim(&mut classes, &material, index, class, || {
            pos = into_position(board, turn);
            pos.is_some()
        })? {
            return Ok(());
        }
        let Some(pos) = pos else {
            return Ok(());
        };

        if let Some(value) = terminal_value(&pos) {
            values[slot] = Some(value);
            return Ok(());
        }

        let start = successors.len();
        for m in pos.legal_moves() {
            let mut after = pos.clone();
            after.play_unchecked(&m);
            let successor = if let Some(value) = terminal_value(&after) {
                Successor::Fixed(value)
            } else if Material::from_board(after.board()).into_normalized() == material {
                Successor::Local(encoder.index(after.board(), after.turn())?)
            } else {
                let value = tablebase.probe(&after)?;
                max_fixed = max_fixed.max(value.distance);
                Successor::Fixed(value)
            };
            successors.push(successor);
        }
        pending.push(Node {
            index,
            start,
            end: successors.len(),
        });
        Ok(())
    })?;

    for successor in &successors {
        if let Successor::Local(index) = *successor {
            if classes[index as usize] == UNSEEN {
                return Err(GenerateError::Unreachable { material, index });
            }
        }
    }

    let value_of = |values: &[Option<Probe>], successor: Successor| match successor {
        Successor::Local(index) => values[index as usize],
        Successor::Fixed(value) => Some(value),
    };

    let mut distance: u16 = 0;
    loop {
        let mut assigned = Vec::new();

        // Lost in `distance`.
        pending.retain(|node| {
            let mut longest = 0;
            for successor in &successors[node.start..node.end] {
                match value_of(&values, *successor) {
                    Some(Probe {
                        wdl: Wdl::Win,
                        distance: d,
                    }) => longest = longest.max(d),
                    _ => return true,
                }
            }
            if longest == distance {
                assigned.push((node.index, Probe::loss(distance)));
                false
            } else {
                true
            }
        });
        let losses = assigned.len();
        for (index, value) in assigned.drain(..) {
            values[index as usize] = Some(value);
        }

        // Won in `distance + 1`.
        pending.retain(|node| {
            let wins = successors[node.start..node.end]
                .iter()
                .any(|s| value_of(&values, *s) == Some(Probe::loss(distance)));
            if wins {
                assigned.push((node.index, Probe::win(distance + 1)));
            }
            !wins
        });
        let wins = assigned.len();
        for (index, value) in assigned.drain(..) {
            values[index as usize] = Some(value);
        }

        debug!(%material, distance, losses, wins, "assigned");

        if pending.is_empty() || (losses == 0 && wins == 0 && distance >= max_fixed) {
            break;
        }
        distance += 1;
    }

    info!(%material, draws = pending.len(), longest = distance, "generated table");

    Ok(values
        .into_iter()
        .map(|v| v.unwrap_or(Probe::DRAW))
        .collect())
}

/// Generate the table for `material` and every table it depends on, in
/// `dir`. Tables already present in `dir` are reused.
///
/// Returns a tablebase with all of them added.
///
/// # Errors
///
/// See [`generate`].
pub fn generate_with_dependencies(
    material: &Material,
    dir: &Path,
    writer: &TableWriter,
) -> Result<Tablebase, GenerateError> {
    let mut order = Vec::new();
    collect_dependencies(material.clone().into_normalized(), &mut order);
    order.sort_by_key(|m| (m.count(), pawns(m)));

    let mut tablebase = Tablebase::new();
    for material in &order {
        let path: PathBuf = dir.join(format!("{material}.{TABLE_SUFFIX}"));
        if path.is_file() {
            debug!(%material, "reusing table");
        } else {
            let values = generate(material, &tablebase)?;
            writer.write_file(material, &values, dir)?;
        }
        tablebase.add_file(&path)?;
    }
    Ok(tablebase)
}

fn pawns(material: &Material) -> usize {
    material.pieces().filter(|p| p.role == Role::Pawn).count()
}

fn collect_dependencies(material: Material, out: &mut Vec<Material>) {
    if out.contains(&material) {
        return;
    }

    let pieces: Pieces = material.pieces().collect();
    let mut children = Vec::new();
    for (i, piece) in pieces.iter().enumerate() {
        // Captured.
        let rest = Material::from_iter(
            pieces
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| *p),
        );
        if rest.white.count() > 0 && rest.black.count() > 0 {
            children.push(rest.into_normalized());
        }

        // Promoted.
        if piece.role == Role::Pawn {
            for role in [Role::Knight, Role::Bishop, Role::Rook, Role::Queen, Role::King] {
                let promoted = Material::from_iter(pieces.iter().enumerate().map(|(j, p)| {
                    if j == i {
                        role.of(p.color)
                    } else {
                        *p
                    }
                }));
                children.push(promoted.into_normalized());
            }
        }
    }

    out.push(material);
    for child in children {
        collect_dependencies(child, out);
    }
}

fn into_position(board: &Board, turn: Color) -> Option<Antichess> {
    let mut setup = Setup::empty();
    setup.board = board.clone();
    setup.turn = turn;
    Antichess::from_setup(setup, CastlingMode::Standard).ok()
}

/// Call `f` with every placement of the pieces of `material`, for each
/// side to move. Identical pieces are placed in ascending square order.
///
/// Symmetric material only needs white to move, because the indexing
/// scheme maps black to move onto the same cells.
fn visit_positions<F>(material: &Material, mut f: F) -> Result<(), GenerateError>
where
    F: FnMut(&Board, Color) -> Result<(), GenerateError>,
{
    let pieces = canonical_pieces(material);
    let turns: &[Color] = if material.is_symmetric() {
        &[Color::White]
    } else {
        &[Color::White, Color::Black]
    };

    let mut squares = ArrayVec::<u8, MAX_PIECES>::new();
    place(&pieces, &mut squares, &mut |squares| {
        let mut board = Board::empty();
        for (piece, sq) in pieces.iter().zip(squares) {
            board.set_piece_at(Square::new(u32::from(*sq)), *piece);
        }
        for turn in turns {
            f(&board, *turn)?;
        }
        Ok(())
    })
}

fn place(
    pieces: &Pieces,
    squares: &mut ArrayVec<u8, MAX_PIECES>,
    visit: &mut dyn FnMut(&[u8]) -> Result<(), GenerateError>,
) -> Result<(), GenerateError> {
    let k = squares.len();
    let Some(piece) = pieces.get(k) else {
        return visit(squares);
    };

    let range = if piece.role == Role::Pawn { 8..56 } else { 0..64 };
    let min = match k.checked_sub(1) {
        Some(prev) if pieces[prev] == *piece => squares[prev] + 1,
        _ => 0,
    };
    for sq in range {
        if sq < min || squares.contains(&sq) {
            continue;
        }
        squares.push(sq);
        place(pieces, squares, visit)?;
        squares.pop();
    }
    Ok(())
}

/// Every legal position of `material` paired with its index, one per
/// index. Only suitable for small material.
pub fn representatives(material: &Material) -> Result<Vec<(u64, Antichess)>, GenerateError> {
    let material = material.clone().into_normalized();
    let encoder = Encoder::new(&material)?;
    let mut classes = vec![UNSEEN; usize::try_from(encoder.size()).unwrap_or(usize::MAX)];
    let mut out = Vec::new();
    visit_positions(&material, |board, turn| {
        let index = encoder.index(board, turn)?;
        let mut pos = None;
        let class = symmetry_class(board, turn);
        if claim(&mut classes, &material, index, class, || {
            pos = into_position(board, turn);
            pos.is_some()
        })? {
            if let Some(pos) = pos {
                out.push((index, pos));
            }
        }
        Ok(())
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies() {
        let mut order = Vec::new();
        collect_dependencies("KPvK".parse().unwrap(), &mut order);
        let names: Vec<String> = order.iter().map(|m| m.to_string()).collect();
        for name in ["KPvK", "KvK", "KvP", "KNvK", "KQvK", "KKvK"] {
            assert!(names.contains(&name.to_owned()), "{name} in {names:?}");
        }
        assert!(!names.iter().any(|n| n.starts_with('v') || n.ends_with('v')));
    }

    #[test]
    fn test_index_is_unique_up_to_symmetry() {
        for name in ["KvK", "RNvK", "RRvK", "KNvK", "KPvK", "PPvK"] {
            let material: Material = name.parse().unwrap();
            let encoder = Encoder::new(&material).unwrap();
            let mut classes = rustc_hash::FxHashMap::default();
            let mut positions = 0;
            visit_positions(&material, |board, turn| {
                if into_position(board, turn).is_none() {
                    return Ok(());
                }
                positions += 1;
                let index = encoder.index(board, turn).unwrap();
                let class = symmetry_class(board, turn);
                let first = *classes.entry(index).or_insert(class);
                assert_eq!(first, class, "{name}: {board} {turn:?} at {index}");
                Ok(())
            })
            .unwrap();
            assert!(classes.len() < positions, "{name}");
            assert_eq!(representatives(&material).unwrap().len(), classes.len(), "{name}");
        }
    }

    #[test]
    fn test_opposing_pawns_unsupported() {
        let tb = Tablebase::new();
        assert!(matches!(
            generate(&"PvP".parse().unwrap(), &tb),
            Err(GenerateError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_two_kings() {
        let tb = Tablebase::new();
        let material: Material = "KvK".parse().unwrap();
        let values = generate(&material, &tb).unwrap();
        let encoder = Encoder::new(&material).unwrap();

        for (index, pos) in representatives(&material).unwrap() {
            let value = values[index as usize];
            let white = pos.board().king_of(Color::White).unwrap();
            let black = pos.board().king_of(Color::Black).unwrap();
            match white.distance(black) {
                // Forced to capture, after which the opponent has no pieces
                // left.
                1 => assert_eq!(value, Probe::loss(0), "{index}"),
                // Step next to the other king, which then has to capture.
                2 => assert_eq!(value, Probe::win(1), "{index}"),
                _ => assert_ne!(value, Probe::loss(0), "{index}"),
            }
            assert_eq!(encoder.index(pos.board(), pos.turn()).unwrap(), index);
        }
    }
}
