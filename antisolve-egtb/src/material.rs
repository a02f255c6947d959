use std::{cmp::Ordering, error::Error, fmt, str::FromStr};

use shakmaty::{Board, Color, Piece, Role};

/// Roles in the order they are written in a signature.
pub(crate) const DISPLAY_ROLES: [Role; 6] = [
    Role::King,
    Role::Queen,
    Role::Rook,
    Role::Bishop,
    Role::Knight,
    Role::Pawn,
];

fn role_idx(role: Role) -> usize {
    match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        Role::Queen => 4,
        Role::King => 5,
    }
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub(crate) struct MaterialSide {
    by_role: [u8; 6],
}

impl MaterialSide {
    fn empty() -> MaterialSide {
        MaterialSide { by_role: [0; 6] }
    }

    fn from_str_part(s: &str) -> Result<MaterialSide, ParseMaterialError> {
        let mut side = MaterialSide::empty();
        for ch in s.chars() {
            let role = Role::from_char(ch).ok_or(ParseMaterialError)?;
            side.by_role[role_idx(role)] += 1;
        }
        Ok(side)
    }

    pub(crate) fn get(&self, role: Role) -> u8 {
        self.by_role[role_idx(role)]
    }

    pub(crate) fn count(&self) -> usize {
        self.by_role.iter().copied().map(usize::from).sum()
    }

    pub(crate) fn has_pawns(&self) -> bool {
        self.get(Role::Pawn) > 0
    }

    fn unique_roles(&self) -> usize {
        self.by_role.iter().filter(|c| **c == 1).count()
    }
}

impl Ord for MaterialSide {
    fn cmp(&self, other: &MaterialSide) -> Ordering {
        DISPLAY_ROLES.iter().fold(
            self.count().cmp(&other.count()),
            |acc, role| acc.then_with(|| self.get(*role).cmp(&other.get(*role))),
        )
    }
}

impl PartialOrd for MaterialSide {
    fn partial_cmp(&self, other: &MaterialSide) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MaterialSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for role in DISPLAY_ROLES {
            for _ in 0..self.get(role) {
                write!(f, "{}", role.upper_char())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MaterialSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count() > 0 {
            <Self as fmt::Display>::fmt(self, f)
        } else {
            f.write_str("-")
        }
    }
}

/// A material signature, such as `KRvK`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Material {
    pub(crate) white: MaterialSide,
    pub(crate) black: MaterialSide,
}

impl Material {
    fn empty() -> Material {
        Material {
            white: MaterialSide::empty(),
            black: MaterialSide::empty(),
        }
    }

    /// Get the material configuration for a [`Board`].
    pub fn from_board(board: &Board) -> Material {
        let mut material = Material::empty();
        for color in [Color::White, Color::Black] {
            for role in DISPLAY_ROLES {
                let count = board.by_piece(Piece { color, role }).count();
                material.side_mut(color).by_role[role_idx(role)] = count as u8;
            }
        }
        material
    }

    pub(crate) fn from_iter<I>(iter: I) -> Material
    where
        I: IntoIterator<Item = Piece>,
    {
        let mut material = Material::empty();
        for piece in iter {
            material.side_mut(piece.color).by_role[role_idx(piece.role)] += 1;
        }
        material
    }

    pub(crate) fn side(&self, color: Color) -> &MaterialSide {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn side_mut(&mut self, color: Color) -> &mut MaterialSide {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// Every piece of the signature, white first.
    pub(crate) fn pieces(&self) -> impl Iterator<Item = Piece> + '_ {
        [Color::White, Color::Black].into_iter().flat_map(move |color| {
            DISPLAY_ROLES.into_iter().flat_map(move |role| {
                std::iter::repeat(Piece { color, role })
                    .take(usize::from(self.side(color).get(role)))
            })
        })
    }

    /// Total number of pieces.
    pub fn count(&self) -> usize {
        self.white.count() + self.black.count()
    }

    pub fn is_symmetric(&self) -> bool {
        self.white == self.black
    }

    pub fn has_pawns(&self) -> bool {
        self.white.has_pawns() || self.black.has_pawns()
    }

    /// Both sides have pawns, so en passant captures are possible.
    pub(crate) fn has_opposing_pawns(&self) -> bool {
        self.white.has_pawns() && self.black.has_pawns()
    }

    pub(crate) fn unique_pieces(&self) -> usize {
        self.white.unique_roles() + self.black.unique_roles()
    }

    pub(crate) fn min_like_man(&self) -> usize {
        usize::from(
            self.white
                .by_role
                .iter()
                .chain(self.black.by_role.iter())
                .copied()
                .filter(|c| 2 <= *c)
                .min()
                .unwrap_or(0),
        )
    }

    /// Swap the colors.
    #[must_use]
    pub fn into_swapped(self) -> Material {
        Material {
            white: self.black,
            black: self.white,
        }
    }

    /// Put the stronger side first, which is how tables are named.
    #[must_use]
    pub fn into_normalized(self) -> Material {
        if self.white < self.black {
            self.into_swapped()
        } else {
            self
        }
    }

    pub fn is_normalized(&self) -> bool {
        self.white >= self.black
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.white, self.black)
    }
}

/// Error when parsing an invalid material signature.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseMaterialError;

impl fmt::Display for ParseMaterialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid material signature")
    }
}

impl Error for ParseMaterialError {}

impl FromStr for Material {
    type Err = ParseMaterialError;

    fn from_str(s: &str) -> Result<Material, ParseMaterialError> {
        if s.len() > 64 + 1 {
            return Err(ParseMaterialError);
        }

        let (white, black) = s.split_once('v').ok_or(ParseMaterialError)?;
        Ok(Material {
            white: MaterialSide::from_str_part(white)?,
            black: MaterialSide::from_str_part(black)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let material: Material = "KRvKN".parse().unwrap();
        assert_eq!(material.to_string(), "KRvKN");
        assert_eq!(material.count(), 4);
        assert!(!material.is_symmetric());
        assert_eq!("KvX".parse::<Material>(), Err(ParseMaterialError));
        assert_eq!("KK".parse::<Material>(), Err(ParseMaterialError));
    }

    #[test]
    fn test_normalize() {
        let material: Material = "KvRN".parse().unwrap();
        assert!(!material.is_normalized());
        assert_eq!(material.into_normalized().to_string(), "RNvK");

        let material: Material = "NvK".parse().unwrap();
        assert_eq!(material.into_normalized().to_string(), "KvN");

        let material: Material = "KPvKP".parse().unwrap();
        assert!(material.is_symmetric());
        assert!(material.is_normalized());
    }

    #[test]
    fn test_grouping_stats() {
        let material: Material = "RRvK".parse().unwrap();
        assert_eq!(material.unique_pieces(), 1);
        assert_eq!(material.min_like_man(), 2);

        let material: Material = "RNvK".parse().unwrap();
        assert_eq!(material.unique_pieces(), 3);
        assert_eq!(material.min_like_man(), 0);
    }
}
