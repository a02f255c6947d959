use std::{error::Error, fmt, str::FromStr};

use shakmaty::{Move, Position, Role, Square};

/// A move in 16 bits: destination in bits 0 to 5, origin in bits 6 to 11
/// and the promotion role (1 = pawn to 6 = king) in bits 12 to 14.
///
/// `0` is the null move. Moves are written in UCI notation.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PackedMove(u16);

impl PackedMove {
    pub const NULL: PackedMove = PackedMove(0);

    pub fn new(from: Square, to: Square, promotion: Option<Role>) -> PackedMove {
        let promotion = promotion.map_or(0, |role| role as u16);
        PackedMove(to as u16 | (from as u16) << 6 | promotion << 12)
    }

    pub const fn from_u16(raw: u16) -> PackedMove {
        PackedMove(raw)
    }

    pub const fn to_u16(self) -> u16 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn from_square(self) -> Square {
        Square::new(u32::from(self.0 >> 6 & 63))
    }

    pub fn to_square(self) -> Square {
        Square::new(u32::from(self.0 & 63))
    }

    pub fn promotion(self) -> Option<Role> {
        Some(match self.0 >> 12 & 7 {
            1 => Role::Pawn,
            2 => Role::Knight,
            3 => Role::Bishop,
            4 => Role::Rook,
            5 => Role::Queen,
            6 => Role::King,
            _ => return None,
        })
    }

    /// The legal move this stands for in `pos`.
    pub fn to_move<P: Position>(self, pos: &P) -> Option<Move> {
        if self.is_null() {
            return None;
        }
        pos.legal_moves()
            .into_iter()
            .find(|m| PackedMove::from(m) == self)
    }
}

impl From<&Move> for PackedMove {
    fn from(m: &Move) -> PackedMove {
        let to = m.to();
        PackedMove::new(m.from().unwrap_or(to), to, m.promotion())
    }
}

impl fmt::Display for PackedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("0000");
        }
        write!(f, "{}{}", self.from_square(), self.to_square())?;
        if let Some(role) = self.promotion() {
            write!(f, "{}", role.char())?;
        }
        Ok(())
    }
}

impl fmt::Debug for PackedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackedMove({self})")
    }
}

/// Error when parsing an invalid move.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsePackedMoveError;

impl fmt::Display for ParsePackedMoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid uci move")
    }
}

impl Error for ParsePackedMoveError {}

impl FromStr for PackedMove {
    type Err = ParsePackedMoveError;

    fn from_str(s: &str) -> Result<PackedMove, ParsePackedMoveError> {
        let bytes = s.as_bytes();
        if bytes == b"0000" {
            return Ok(PackedMove::NULL);
        }
        if bytes.len() != 4 && bytes.len() != 5 {
            return Err(ParsePackedMoveError);
        }
        let from = Square::from_ascii(&bytes[0..2]).map_err(|_| ParsePackedMoveError)?;
        let to = Square::from_ascii(&bytes[2..4]).map_err(|_| ParsePackedMoveError)?;
        let promotion = match bytes.get(4) {
            Some(&ch) => Some(Role::from_char(char::from(ch)).ok_or(ParsePackedMoveError)?),
            None => None,
        };
        if from == to {
            return Err(ParsePackedMoveError);
        }
        Ok(PackedMove::new(from, to, promotion))
    }
}
