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

use std::{cmp::Ordering, fmt, ops::Neg};

use arrayvec::ArrayVec;
use shakmaty::{Color, Piece, Role};

/// Maximum number of pieces a table can index.
pub const MAX_PIECES: usize = 6;

/// List of up to `MAX_PIECES` pieces.
pub type Pieces = ArrayVec<Piece, MAX_PIECES>;

/// Win/draw/loss from the point of view of the side to move.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(i8)]
pub enum Wdl {
    Loss = -1,
    Draw = 0,
    Win = 1,
}

impl Neg for Wdl {
    type Output = Wdl;

    fn neg(self) -> Wdl {
        match self {
            Wdl::Loss => Wdl::Win,
            Wdl::Draw => Wdl::Draw,
            Wdl::Win => Wdl::Loss,
        }
    }
}

impl From<Wdl> for i8 {
    #[inline]
    fn from(wdl: Wdl) -> i8 {
        wdl as i8
    }
}

/// Exact value of a position for the side to move.
///
/// `distance` counts the moves the winning side still has to make before
/// the game is over. It is `0` for draws and for tables that only store
/// win/draw/loss.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Probe {
    pub wdl: Wdl,
    pub distance: u16,
}

impl Probe {
    pub const DRAW: Probe = Probe {
        wdl: Wdl::Draw,
        distance: 0,
    };

    pub const fn win(distance: u16) -> Probe {
        Probe {
            wdl: Wdl::Win,
            distance,
        }
    }

    pub const fn loss(distance: u16) -> Probe {
        Probe {
            wdl: Wdl::Loss,
            distance,
        }
    }

    /// The value for the side that played the move leading to this
    /// position.
    #[must_use]
    pub fn before_move(self) -> Probe {
        match self.wdl {
            Wdl::Loss => Probe::win(self.distance.saturating_add(1)),
            Wdl::Draw => Probe::DRAW,
            Wdl::Win => Probe::loss(self.distance),
        }
    }

    pub fn is_win(self) -> bool {
        self.wdl == Wdl::Win
    }

    fn rank(self) -> i32 {
        match self.wdl {
            Wdl::Win => 0x1_0000 - i32::from(self.distance),
            Wdl::Draw => 0,
            Wdl::Loss => -0x1_0000 + i32::from(self.distance),
        }
    }

    /// Encode as a table cell.
    pub(crate) fn to_cell(self, dtz: bool) -> u16 {
        match (self.wdl, dtz) {
            (Wdl::Draw, _) => 0,
            (Wdl::Win, false) => 1,
            (Wdl::Loss, false) => 2,
            (Wdl::Win, true) => 1 + 2 * self.distance,
            (Wdl::Loss, true) => 2 + 2 * self.distance,
        }
    }

    /// Decode a table cell.
    pub(crate) fn from_cell(cell: u16, dtz: bool) -> Option<Probe> {
        Some(match cell {
            0 => Probe::DRAW,
            _ if dtz && cell % 2 == 1 => Probe::win((cell - 1) / 2),
            _ if dtz => Probe::loss((cell - 2) / 2),
            1 => Probe::win(0),
            2 => Probe::loss(0),
            _ => return None,
        })
    }
}

/// Better values for the side to move compare greater: shorter wins, then
/// longer wins, draws, longer losses, shorter losses.
impl Ord for Probe {
    fn cmp(&self, other: &Probe) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Probe {
    fn partial_cmp(&self, other: &Probe) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wdl {
            Wdl::Win => write!(f, "win in {}", self.distance),
            Wdl::Draw => f.write_str("draw"),
            Wdl::Loss => write!(f, "loss in {}", self.distance),
        }
    }
}

/// Piece to header byte: role code in the low bits, bit 3 set for black.
pub(crate) fn piece_to_byte(piece: Piece) -> u8 {
    let role = match piece.role {
        Role::Pawn => 1,
        Role::Knight => 2,
        Role::Bishop => 3,
        Role::Rook => 4,
        Role::Queen => 5,
        Role::King => 6,
    };
    match piece.color {
        Color::White => role,
        Color::Black => role | 8,
    }
}

/// Header byte to piece.
pub(crate) fn byte_to_piece(p: u8) -> Option<Piece> {
    let color = if p & 8 == 0 { Color::White } else { Color::Black };
    let role = match p & !8 {
        1 => Role::Pawn,
        2 => Role::Knight,
        3 => Role::Bishop,
        4 => Role::Rook,
        5 => Role::Queen,
        6 => Role::King,
        _ => return None,
    };
    Some(Piece { color, role })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells() {
        for probe in [Probe::DRAW, Probe::win(0), Probe::win(7), Probe::loss(0), Probe::loss(12)] {
            assert_eq!(Probe::from_cell(probe.to_cell(true), true), Some(probe));
        }
        assert_eq!(Probe::from_cell(Probe::win(9).to_cell(false), false), Some(Probe::win(0)));
        assert_eq!(Probe::from_cell(3, false), None);
    }

    #[test]
    fn test_ordering() {
        assert!(Probe::win(1) > Probe::win(4));
        assert!(Probe::win(40) > Probe::DRAW);
        assert!(Probe::DRAW > Probe::loss(40));
        assert!(Probe::loss(40) > Probe::loss(2));
    }

    #[test]
    fn test_before_move() {
        assert_eq!(Probe::loss(0).before_move(), Probe::win(1));
        assert_eq!(Probe::win(3).before_move(), Probe::loss(3));
        assert_eq!(Probe::DRAW.before_move(), Probe::DRAW);
    }

    #[test]
    fn test_piece_bytes() {
        for byte in [1, 2, 3, 4, 5, 6, 9, 10, 11, 12, 13, 14] {
            assert_eq!(byte_to_piece(byte).map(piece_to_byte), Some(byte));
        }
        assert_eq!(byte_to_piece(0), None);
        assert_eq!(byte_to_piece(7), None);
    }
}
