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

use shakmaty::{
    fen::{Fen, ParseFenError},
    variant::Antichess,
    zobrist::{Zobrist64, ZobristHash as _},
    CastlingMode, EnPassantMode, Move, MoveList, Position, PositionError,
};

use crate::packed::PackedMove;

/// How a game ended, from the point of view of the side to move.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Terminal {
    /// The side to move has no pieces or no legal moves.
    Won,
    /// Neither side can ever force the other to give away everything.
    Drawn,
}

/// Error when setting up a line from a FEN.
#[derive(Debug)]
pub enum LineError {
    Fen(ParseFenError),
    Position(Box<PositionError<Antichess>>),
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::Fen(err) => write!(f, "invalid fen: {err}"),
            LineError::Position(err) => write!(f, "illegal position: {err}"),
        }
    }
}

impl std::error::Error for LineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LineError::Fen(err) => Some(err),
            LineError::Position(err) => Some(err.as_ref()),
        }
    }
}

/// A stack of positions with the moves played between them.
///
/// The first position is the root and is never popped.
#[derive(Debug, Clone)]
pub struct Line {
    positions: Vec<Antichess>,
    moves: Vec<Move>,
}

impl Default for Line {
    fn default() -> Line {
        Line::new(Antichess::default())
    }
}

impl Line {
    pub fn new(root: Antichess) -> Line {
        Line {
            positions: vec![root],
            moves: Vec::new(),
        }
    }

    pub fn from_fen(fen: &str) -> Result<Line, LineError> {
        let pos = fen
            .parse::<Fen>()
            .map_err(LineError::Fen)?
            .into_position(CastlingMode::Standard)
            .map_err(|err| LineError::Position(Box::new(err)))?;
        Ok(Line::new(pos))
    }

    /// The current position.
    pub fn pos(&self) -> &Antichess {
        // Never empty.
        &self.positions[self.positions.len() - 1]
    }

    pub fn root(&self) -> &Antichess {
        &self.positions[0]
    }

    /// Play a move that must be legal in the current position.
    pub fn push(&mut self, m: Move) {
        let mut pos = self.pos().clone();
        pos.play_unchecked(&m);
        self.positions.push(pos);
        self.moves.push(m);
    }

    /// Take back the last move.
    pub fn pop(&mut self) -> Option<Move> {
        let m = self.moves.pop()?;
        self.positions.pop();
        Some(m)
    }

    /// Number of moves played since the root.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Take back moves until `len` are left.
    pub fn truncate(&mut self, len: usize) {
        self.moves.truncate(len);
        self.positions.truncate(len + 1);
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn packed_moves(&self) -> Vec<PackedMove> {
        self.moves.iter().map(PackedMove::from).collect()
    }

    pub fn legal_moves(&self) -> MoveList {
        self.pos().legal_moves()
    }

    pub fn find_move(&self, m: PackedMove) -> Option<Move> {
        m.to_move(self.pos())
    }

    pub fn piece_count(&self) -> usize {
        self.pos().board().occupied().count()
    }

    pub fn key(&self) -> u64 {
        position_key(self.pos())
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.pos().clone(), EnPassantMode::Legal).to_string()
    }

    pub fn result(&self) -> Option<Terminal> {
        terminal(self.pos())
    }
}

/// 64 bit Zobrist key, counting en passant squares only when a capture is
/// legal.
pub fn position_key(pos: &Antichess) -> u64 {
    pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
}

/// Game result under antichess rules.
pub fn terminal(pos: &Antichess) -> Option<Terminal> {
    if pos.us().is_empty() || pos.legal_moves().is_empty() {
        Some(Terminal::Won)
    } else if pos.is_insufficient_material() {
        Some(Terminal::Drawn)
    } else {
        None
    }
}
