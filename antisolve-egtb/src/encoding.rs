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

//! Mapping positions to table indexes.
//!
//! The pieces of a material signature are placed in a canonical order and
//! split into groups. The leading group is reduced by board symmetry (the
//! eight-fold group for pawnless material, the left/right mirror plus one
//! subtable per file of the leading pawn otherwise). Remaining groups are
//! indexed with the combinatorial number system, skipping squares that are
//! already occupied.

use arrayvec::ArrayVec;
use shakmaty::{Board, Color, Piece, Role};

use crate::{
    errors::ProbeResult,
    material::Material,
    types::{Pieces, MAX_PIECES},
};

const fn binomial(mut n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    if k > n - k {
        return binomial(n, n - k);
    }
    let mut r = 1;
    let mut d = 1;
    while d <= k {
        r = r * n / d;
        n -= 1;
        d += 1;
    }
    r
}

/// Maps squares into the a1-d1-d4 triangle.
#[rustfmt::skip]
const TRIANGLE: [u64; 64] = [
    6, 0, 1, 2, 2, 1, 0, 6,
    0, 7, 3, 4, 4, 3, 7, 0,
    1, 3, 8, 5, 5, 8, 3, 1,
    2, 4, 5, 9, 9, 5, 4, 2,
    2, 4, 5, 9, 9, 5, 4, 2,
    1, 3, 8, 5, 5, 8, 3, 1,
    0, 7, 3, 4, 4, 3, 7, 0,
    6, 0, 1, 2, 2, 1, 0, 6,
];

/// Inverse of `TRIANGLE`.
const INV_TRIANGLE: [usize; 10] = [1, 2, 3, 10, 11, 19, 0, 9, 18, 27];

/// Maps the b1-h1-h7 triangle to `0..=27`.
#[rustfmt::skip]
const LOWER: [u64; 64] = [
    28,  0,  1,  2,  3,  4,  5,  6,
     0, 29,  7,  8,  9, 10, 11, 12,
     1,  7, 30, 13, 14, 15, 16, 17,
     2,  8, 13, 31, 18, 19, 20, 21,
     3,  9, 14, 18, 32, 22, 23, 24,
     4, 10, 15, 19, 22, 33, 25, 26,
     5, 11, 16, 20, 23, 25, 34, 27,
     6, 12, 17, 21, 24, 26, 27, 35,
];

/// Used to initialize `Consts::mult_idx` and `Consts::mult_factor`.
#[rustfmt::skip]
const MULT_TWIST: [u64; 64] = [
    15, 63, 55, 47, 40, 48, 56, 12,
    62, 11, 39, 31, 24, 32,  8, 57,
    54, 38,  7, 23, 16,  4, 33, 49,
    46, 30, 22,  3,  0, 17, 25, 41,
    45, 29, 21,  2,  1, 18, 26, 42,
    53, 37,  6, 20, 19,  5, 34, 50,
    61, 10, 36, 28, 27, 35,  9, 58,
    14, 60, 52, 44, 43, 51, 59, 13,
];

/// Unused entry.
const Z0: u64 = u64::MAX;

/// Encoding of a pair of identical pieces.
#[rustfmt::skip]
const PP_IDX: [[u64; 64]; 10] = [[
      0,  Z0,   1,   2,   3,   4,   5,   6,
      7,   8,   9,  10,  11,  12,  13,  14,
     15,  16,  17,  18,  19,  20,  21,  22,
     23,  24,  25,  26,  27,  28,  29,  30,
     31,  32,  33,  34,  35,  36,  37,  38,
     39,  40,  41,  42,  43,  44,  45,  46,
     Z0,  47,  48,  49,  50,  51,  52,  53,
     54,  55,  56,  57,  58,  59,  60,  61,
], [
     62,  Z0,  Z0,  63,  64,  65,  Z0,  66,
     Z0,  67,  68,  69,  70,  71,  72,  Z0,
     73,  74,  75,  76,  77,  78,  79,  80,
     81,  82,  83,  84,  85,  86,  87,  88,
     89,  90,  91,  92,  93,  94,  95,  96,
     Z0,  97,  98,  99, 100, 101, 102, 103,
     Z0, 104, 105, 106, 107, 108, 109,  Z0,
    110,  Z0, 111, 112, 113, 114,  Z0, 115,
], [
    116,  Z0,  Z0,  Z0, 117,  Z0,  Z0, 118,
     Z0, 119, 120, 121, 122, 123, 124,  Z0,
     Z0, 125, 126, 127, 128, 129, 130,  Z0,
    131, 132, 133, 134, 135, 136, 137, 138,
     Z0, 139, 140, 141, 142, 143, 144, 145,
     Z0, 146, 147, 148, 149, 150, 151,  Z0,
     Z0, 152, 153, 154, 155, 156, 157,  Z0,
    158,  Z0,  Z0, 159, 160,  Z0,  Z0, 161,
], [
    162,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 163,
     Z0, 164,  Z0, 165, 166, 167, 168,  Z0,
     Z0, 169, 170, 171, 172, 173, 174,  Z0,
     Z0, 175, 176, 177, 178, 179, 180,  Z0,
     Z0, 181, 182, 183, 184, 185, 186,  Z0,
     Z0,  Z0, 187, 188, 189, 190, 191,  Z0,
     Z0, 192, 193, 194, 195, 196, 197,  Z0,
    198,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 199,
], [
    200,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 201,
     Z0, 202,  Z0,  Z0, 203,  Z0, 204,  Z0,
     Z0,  Z0, 205, 206, 207, 208,  Z0,  Z0,
     Z0, 209, 210, 211, 212, 213, 214,  Z0,
     Z0,  Z0, 215, 216, 217, 218, 219,  Z0,
     Z0,  Z0, 220, 221, 222, 223,  Z0,  Z0,
     Z0, 224,  Z0, 225, 226,  Z0, 227,  Z0,
    228,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 229,
], [
    230,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 231,
     Z0, 232,  Z0,  Z0,  Z0,  Z0, 233,  Z0,
     Z0,  Z0, 234,  Z0, 235, 236,  Z0,  Z0,
     Z0,  Z0, 237, 238, 239, 240,  Z0,  Z0,
     Z0,  Z0,  Z0, 241, 242, 243,  Z0,  Z0,
     Z0,  Z0, 244, 245, 246, 247,  Z0,  Z0,
     Z0, 248,  Z0,  Z0,  Z0,  Z0, 249,  Z0,
    250,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 251,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 259,
     Z0, 252,  Z0,  Z0,  Z0,  Z0, 260,  Z0,
     Z0,  Z0, 253,  Z0,  Z0, 261,  Z0,  Z0,
     Z0,  Z0,  Z0, 254, 262,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 255,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 256,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 257,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 258,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 268,  Z0,
     Z0,  Z0, 263,  Z0,  Z0, 269,  Z0,  Z0,
     Z0,  Z0,  Z0, 264, 270,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 265,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 266,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 267,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 274,  Z0,  Z0,
     Z0,  Z0,  Z0, 271, 275,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 272,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 273,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 277,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 276,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0
]];

/// The a7-a5-c5 triangle.
const TEST45: u64 = 0x1_0307_0000_0000;

const CONSTS: Consts = Consts::new();

struct Consts {
    mult_idx: [[u64; 10]; 5],
    mult_factor: [u64; 5],

    map_pawns: [u64; 64],
    lead_pawn_idx: [[u64; 64]; 6],
    lead_pawns_size: [[u64; 4]; 6],
}

impl Consts {
    const fn new() -> Consts {
        let mut mult_idx = [[0; 10]; 5];
        let mut mult_factor = [0; 5];

        let mut i = 0;
        while i < 5 {
            let mut s = 0;
            let mut j = 0;
            while j < 10 {
                mult_idx[i][j] = s;
                s += if i == 0 {
                    1
                } else {
                    binomial(MULT_TWIST[INV_TRIANGLE[j]], i as u64)
                };
                j += 1;
            }
            mult_factor[i] = s;
            i += 1;
        }

        let mut available_squares = 48;

        let mut map_pawns = [0; 64];
        let mut lead_pawn_idx = [[0; 64]; 6];
        let mut lead_pawns_size = [[0; 4]; 6];

        let mut lead_pawns_cnt = 1;
        while lead_pawns_cnt <= 5 {
            let mut file = 0;
            while file < 4 {
                let mut idx = 0;
                let mut rank = 1;
                while rank < 7 {
                    let sq = file + 8 * rank;
                    if lead_pawns_cnt == 1 {
                        available_squares -= 1;
                        map_pawns[sq] = available_squares;
                        available_squares -= 1;
                        map_pawns[sq ^ 0x7] = available_squares;
                    }
                    lead_pawn_idx[lead_pawns_cnt][sq] = idx;
                    idx += binomial(map_pawns[sq], lead_pawns_cnt as u64 - 1);
                    rank += 1;
                }
                lead_pawns_size[lead_pawns_cnt][file] = idx;
                file += 1;
            }
            lead_pawns_cnt += 1;
        }

        Consts {
            mult_idx,
            mult_factor,
            map_pawns,
            lead_pawn_idx,
            lead_pawns_size,
        }
    }
}

fn file_of(sq: u8) -> u8 {
    sq & 7
}

fn rank_of(sq: u8) -> u8 {
    sq >> 3
}

fn flip_horizontal(sq: u8) -> u8 {
    sq ^ 0x7
}

fn flip_vertical(sq: u8) -> u8 {
    sq ^ 0x38
}

fn flip_diagonal(sq: u8) -> u8 {
    ((sq >> 3) | (sq << 3)) & 63
}

/// Checks if a square is off the a1-h8 diagonal.
fn offdiag(sq: u8) -> bool {
    file_of(sq) != rank_of(sq)
}

/// Roles of the non-pawn pieces in canonical order.
const PIECE_ROLES: [Role; 5] = [Role::King, Role::Queen, Role::Rook, Role::Bishop, Role::Knight];

/// The order in which the pieces of a normalized signature are indexed.
///
/// Pawnful material starts with the leading pawns (white if white has
/// pawns), followed by the opposing pawns. Pawnless material starts with
/// the leading group: three or two unique pieces, or else the smallest
/// group of identical pieces. Identical pieces are always adjacent.
pub(crate) fn canonical_pieces(material: &Material) -> Pieces {
    let mut all = Pieces::new();
    let push_role = |pieces: &mut Pieces, color: Color, role: Role| {
        for _ in 0..material.side(color).get(role) {
            pieces.push(Piece { color, role });
        }
    };

    if material.has_pawns() {
        let lead = if material.white.has_pawns() {
            Color::White
        } else {
            Color::Black
        };
        push_role(&mut all, lead, Role::Pawn);
        push_role(&mut all, !lead, Role::Pawn);
        for color in [Color::White, Color::Black] {
            for role in PIECE_ROLES {
                push_role(&mut all, color, role);
            }
        }
        return all;
    }

    let mut rest = Pieces::new();
    for color in [Color::White, Color::Black] {
        for role in PIECE_ROLES {
            push_role(&mut rest, color, role);
        }
    }

    let count = |piece: &Piece| usize::from(material.side(piece.color).get(piece.role));
    let unique = material.unique_pieces();
    let lead: Pieces = if unique >= 2 {
        rest.iter()
            .copied()
            .filter(|p| count(p) == 1)
            .take(if unique >= 3 { 3 } else { 2 })
            .collect()
    } else {
        let min_like_man = material.min_like_man();
        rest.iter()
            .copied()
            .find(|p| count(p) == min_like_man)
            .map(|p| (0..min_like_man).map(|_| p).collect())
            .unwrap_or_default()
    };

    all.extend(lead.iter().copied());
    let mut skipped = lead.len();
    for piece in rest {
        if skipped > 0 && lead.contains(&piece) {
            skipped -= 1;
            continue;
        }
        all.push(piece);
    }
    all
}

/// Group pieces that will be encoded together.
fn group_pieces(pieces: &Pieces) -> ArrayVec<usize, MAX_PIECES> {
    let mut result = ArrayVec::new();
    let material = Material::from_iter(pieces.clone());

    // For pawnless positions: If there are at least 3 unique pieces then 3
    // unique pieces form the leading group. Otherwise 2 unique pieces or
    // the smallest group of identical pieces lead.
    let first_len = if material.has_pawns() {
        0
    } else if material.unique_pieces() >= 3 {
        3
    } else if material.unique_pieces() == 2 {
        2
    } else {
        material.min_like_man()
    };

    if first_len > 0 {
        result.push(first_len);
    }

    // The remaining identical pieces are grouped together.
    result.extend(pieces[first_len..].chunk_by(|a, b| a == b).map(|g| g.len()));

    result
}

/// Description of the encoding used for one subtable.
#[derive(Debug, Clone)]
struct GroupData {
    lens: ArrayVec<usize, MAX_PIECES>,
    factors: ArrayVec<u64, { MAX_PIECES + 1 }>,
}

impl GroupData {
    fn new(pieces: &Pieces, file: usize) -> ProbeResult<GroupData> {
        ensure!(pieces.len() >= 2);

        let material = Material::from_iter(pieces.clone());
        let pp = material.has_opposing_pawns();
        let order: [usize; 2] = [0, if pp { 1 } else { 0xf }];

        // Compute group lengths.
        let lens = group_pieces(pieces);
        ensure!(!lens.is_empty() && lens[0] <= 5);

        // Compute a factor for each group.
        let mut factors = ArrayVec::from([0; MAX_PIECES + 1]);
        factors.truncate(lens.len() + 1);
        let mut free_squares = 64 - lens[0] - if pp { lens[1] } else { 0 };
        let mut next = if pp { 2 } else { 1 };
        let mut idx = 1;
        let mut k = 0;

        while next < lens.len() || k == order[0] || k == order[1] {
            if k == order[0] {
                // Leading pawns or pieces.
                factors[0] = idx;

                if material.has_pawns() {
                    idx *= CONSTS.lead_pawns_size[lens[0]][file];
                } else if material.unique_pieces() >= 3 {
                    idx *= 31_332;
                } else if material.unique_pieces() == 2 {
                    idx *= 518;
                } else if material.min_like_man() == 2 {
                    idx *= 278;
                } else {
                    idx *= CONSTS.mult_factor[material.min_like_man() - 1];
                }
            } else if k == order[1] {
                // Remaining pawns.
                factors[1] = idx;
                idx *= binomial(48 - lens[0] as u64, lens[1] as u64);
            } else {
                // Remaining pieces.
                factors[next] = idx;
                idx *= binomial(free_squares as u64, lens[next] as u64);
                free_squares -= lens[next];
                next += 1;
            }
            k += 1;
        }

        factors[lens.len()] = idx;

        Ok(GroupData { lens, factors })
    }

    fn size(&self) -> u64 {
        self.factors[self.lens.len()]
    }
}

/// Position indexing for one normalized material signature.
#[derive(Debug, Clone)]
pub(crate) struct Encoder {
    material: Material,
    pieces: Pieces,
    files: ArrayVec<GroupData, 4>,
    file_offsets: [u64; 4],
    side_size: u64,
    sides: u64,
}

impl Encoder {
    pub fn new(material: &Material) -> ProbeResult<Encoder> {
        ensure!(material.is_normalized());
        ensure!(material.count() <= MAX_PIECES);
        ensure!(material.white.count() >= 1 && material.black.count() >= 1);

        let pieces = canonical_pieces(material);
        let mut files = ArrayVec::new();
        let mut file_offsets = [0; 4];
        let mut side_size = 0;
        let num_files = if material.has_pawns() { 4 } else { 1 };
        for file in 0..num_files {
            let groups = GroupData::new(&pieces, file)?;
            file_offsets[file] = side_size;
            side_size += groups.size();
            files.push(groups);
        }

        Ok(Encoder {
            material: material.clone(),
            pieces,
            files,
            file_offsets,
            side_size,
            sides: if material.is_symmetric() { 1 } else { 2 },
        })
    }

    pub fn pieces(&self) -> &Pieces {
        &self.pieces
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Whether the table stores separate halves for each side to move.
    pub fn is_split(&self) -> bool {
        self.sides == 2
    }

    /// Number of cells in the table.
    pub fn size(&self) -> u64 {
        self.sides * self.side_size
    }

    /// Given a position, determine the unique (modulo symmetries) index into
    /// the table.
    pub fn index(&self, board: &Board, turn: Color) -> ProbeResult<u64> {
        let key = Material::from_board(board);
        let material = &self.material;
        ensure!(key == *material || key == material.clone().into_swapped());

        let symmetric_btm = material.is_symmetric() && turn == Color::Black;
        let black_stronger = key != *material;
        let flip = symmetric_btm || black_stronger;
        let bside = (turn == Color::Black) ^ flip;
        let table_color = |color: Color| if flip { !color } else { color };
        let bits = |piece: Piece| {
            board
                .by_piece(Piece {
                    color: table_color(piece.color),
                    role: piece.role,
                })
                .0
        };

        let mut squares: ArrayVec<u8, MAX_PIECES> = ArrayVec::new();
        let mut used = 0u64;

        // For pawns there are subtables for each file (a, b, c, d) the
        // leading pawn can be placed on.
        let file = if material.has_pawns() {
            let reference_pawn = self.pieces[0];
            ensure!(reference_pawn.role == Role::Pawn);

            let lead_pawns = bits(reference_pawn);
            used |= lead_pawns;
            for sq in squares_of(lead_pawns) {
                squares.push(if flip { flip_vertical(sq) } else { sq });
            }
            ensure!(!squares.is_empty());

            // Ensure squares[0] is the maximum with regard to map_pawns.
            for i in 1..squares.len() {
                if CONSTS.map_pawns[usize::from(squares[0])]
                    < CONSTS.map_pawns[usize::from(squares[i])]
                {
                    squares.swap(0, i);
                }
            }
            if file_of(squares[0]) >= 4 {
                usize::from(file_of(flip_horizontal(squares[0])))
            } else {
                usize::from(file_of(squares[0]))
            }
        } else {
            0
        };
        let groups = &self.files[file];

        // So far squares has been initialized with the leading pawns.
        // Also add the other pieces.
        let lead_pawns_count = squares.len();

        for piece in self.pieces.iter().skip(lead_pawns_count) {
            let square = u!(squares_of(bits(*piece) & !used).next());
            squares.push(if flip { flip_vertical(square) } else { square });
            used |= 1 << square;
        }

        ensure!(squares.len() == self.pieces.len());

        // Now we can compute the index according to the piece positions.
        if file_of(squares[0]) >= 4 {
            for square in &mut squares {
                *square = flip_horizontal(*square);
            }
        }

        let mut idx = if material.has_pawns() {
            let mut idx = CONSTS.lead_pawn_idx[lead_pawns_count][usize::from(squares[0])];

            squares[1..lead_pawns_count]
                .sort_unstable_by_key(|sq| CONSTS.map_pawns[usize::from(*sq)]);

            for (i, &square) in squares.iter().enumerate().take(lead_pawns_count).skip(1) {
                idx += binomial(CONSTS.map_pawns[usize::from(square)], i as u64);
            }

            idx
        } else {
            if rank_of(squares[0]) >= 4 {
                for square in &mut squares {
                    *square = flip_vertical(*square);
                }
            }

            for i in 0..groups.lens[0] {
                if !offdiag(squares[i]) {
                    continue;
                }

                if rank_of(squares[i]) > file_of(squares[i]) {
                    for square in &mut squares[i..] {
                        *square = flip_diagonal(*square);
                    }
                }

                break;
            }

            self.leading_pieces_index(&mut squares, groups)?
        };

        idx *= groups.factors[0];

        // Encode remaining pieces.
        let mut remaining_pawns = material.has_opposing_pawns();
        let mut next = 1;
        let mut group_sq = groups.lens[0];
        for lens in groups.lens.iter().copied().skip(1) {
            let (prev_squares, group_squares) = squares.split_at_mut(group_sq);
            let group_squares = &mut group_squares[..lens];
            group_squares.sort_unstable();

            let mut n = 0;

            for (i, &group_square) in group_squares.iter().enumerate() {
                let adjust = prev_squares
                    .iter()
                    .filter(|sq| group_square > **sq)
                    .count() as u64;
                let shift = if remaining_pawns { 8 } else { 0 };
                n += binomial(
                    u!((u64::from(group_square) - adjust).checked_sub(shift)),
                    i as u64 + 1,
                );
            }

            remaining_pawns = false;
            idx += n * groups.factors[next];
            group_sq += groups.lens[next];
            next += 1;
        }

        ensure!(idx < groups.size());

        let side = if bside && self.sides == 2 { self.side_size } else { 0 };
        Ok(side + self.file_offsets[file] + idx)
    }

    /// Index of the leading group of pawnless material.
    fn leading_pieces_index(
        &self,
        squares: &mut ArrayVec<u8, MAX_PIECES>,
        groups: &GroupData,
    ) -> ProbeResult<u64> {
        let unique_pieces = self.material.unique_pieces();
        let sq = |s: u8| u64::from(s);

        Ok(if unique_pieces > 2 {
            let adjust1 = u64::from(squares[1] > squares[0]);
            let adjust2 = u64::from(squares[2] > squares[0]) + u64::from(squares[2] > squares[1]);

            if offdiag(squares[0]) {
                TRIANGLE[usize::from(squares[0])] * 63 * 62
                    + (sq(squares[1]) - adjust1) * 62
                    + (sq(squares[2]) - adjust2)
            } else if offdiag(squares[1]) {
                6 * 63 * 62
                    + u64::from(rank_of(squares[0])) * 28 * 62
                    + LOWER[usize::from(squares[1])] * 62
                    + sq(squares[2])
                    - adjust2
            } else if offdiag(squares[2]) {
                6 * 63 * 62
                    + 4 * 28 * 62
                    + u64::from(rank_of(squares[0])) * 7 * 28
                    + (u64::from(rank_of(squares[1])) - adjust1) * 28
                    + LOWER[usize::from(squares[2])]
            } else {
                6 * 63 * 62
                    + 4 * 28 * 62
                    + 4 * 7 * 28
                    + u64::from(rank_of(squares[0])) * 7 * 6
                    + (u64::from(rank_of(squares[1])) - adjust1) * 6
                    + (u64::from(rank_of(squares[2])) - adjust2)
            }
        } else if unique_pieces == 2 {
            // Two unique pieces may stand next to each other, kings being
            // ordinary pieces in antichess.
            let adjust = u64::from(squares[1] > squares[0]);

            if offdiag(squares[0]) {
                TRIANGLE[usize::from(squares[0])] * 63 + (sq(squares[1]) - adjust)
            } else if offdiag(squares[1]) {
                6 * 63 + u64::from(rank_of(squares[0])) * 28 + LOWER[usize::from(squares[1])]
            } else {
                6 * 63
                    + 4 * 28
                    + u64::from(rank_of(squares[0])) * 7
                    + (u64::from(rank_of(squares[1])) - adjust)
            }
        } else if self.material.min_like_man() == 2 {
            if TRIANGLE[usize::from(squares[0])] > TRIANGLE[usize::from(squares[1])] {
                squares.swap(0, 1);
            }

            if file_of(squares[0]) >= 4 {
                for square in squares.iter_mut() {
                    *square = flip_horizontal(*square);
                }
            }

            if rank_of(squares[0]) >= 4 {
                for square in squares.iter_mut() {
                    *square = flip_vertical(*square);
                }
            }

            if rank_of(squares[0]) > file_of(squares[0])
                || (!offdiag(squares[0]) && rank_of(squares[1]) > file_of(squares[1]))
            {
                for square in squares.iter_mut() {
                    *square = flip_diagonal(*square);
                }
            }

            if TEST45 & (1 << squares[1]) != 0
                && TRIANGLE[usize::from(squares[0])] == TRIANGLE[usize::from(squares[1])]
            {
                squares.swap(0, 1);

                for square in squares.iter_mut() {
                    *square = flip_diagonal(flip_vertical(*square));
                }
            }

            let idx = PP_IDX[TRIANGLE[usize::from(squares[0])] as usize][usize::from(squares[1])];
            ensure!(idx != Z0);
            idx
        } else {
            let lead = groups.lens[0];
            for i in 1..lead {
                if TRIANGLE[usize::from(squares[0])] > TRIANGLE[usize::from(squares[i])] {
                    squares.swap(0, i);
                }
            }

            if file_of(squares[0]) >= 4 {
                for square in squares.iter_mut() {
                    *square = flip_horizontal(*square);
                }
            }

            if rank_of(squares[0]) >= 4 {
                for square in squares.iter_mut() {
                    *square = flip_vertical(*square);
                }
            }

            if rank_of(squares[0]) > file_of(squares[0]) {
                for square in squares.iter_mut() {
                    *square = flip_diagonal(*square);
                }
            }

            for i in 1..lead {
                for j in (i + 1)..lead {
                    if MULT_TWIST[usize::from(squares[i])] > MULT_TWIST[usize::from(squares[j])] {
                        squares.swap(i, j);
                    }
                }
            }

            let mut idx = CONSTS.mult_idx[lead - 1][TRIANGLE[usize::from(squares[0])] as usize];
            for i in 1..lead {
                idx += binomial(MULT_TWIST[usize::from(squares[i])], i as u64);
            }

            idx
        })
    }
}

/// Smallest packing of the position over the board symmetries that the
/// indexing scheme folds together (only the horizontal mirror once there
/// are pawns). Positions sharing an index must share a class.
pub(crate) fn symmetry_class(board: &Board, turn: Color) -> u64 {
    let mirrors = if board.pawns().0 != 0 { 2 } else { 8 };
    let mut class = u64::MAX;
    for mirror in 0u8..mirrors {
        let mut keys: ArrayVec<u64, 64> = ArrayVec::new();
        for sq in squares_of(board.occupied().0) {
            let Some(piece) = board.piece_at(shakmaty::Square::new(u32::from(sq))) else {
                continue;
            };
            let mut sq = sq;
            if mirror & 1 != 0 {
                sq = flip_horizontal(sq);
            }
            if mirror & 2 != 0 {
                sq = flip_vertical(sq);
            }
            if mirror & 4 != 0 {
                sq = flip_diagonal(sq);
            }
            let code = (piece.role as u64 - 1) * 2 + u64::from(piece.color == Color::Black);
            keys.push((code << 6) | u64::from(sq));
        }
        keys.sort_unstable();
        let packed = keys.iter().fold(0, |acc, key| (acc << 10) | key);
        class = class.min(packed | (u64::from(turn == Color::Black) << 60));
    }
    class
}

/// Squares of a bitboard in ascending order.
fn squares_of(mut bb: u64) -> impl Iterator<Item = u8> {
    std::iter::from_fn(move || {
        if bb == 0 {
            None
        } else {
            let sq = bb.trailing_zeros() as u8;
            bb &= bb - 1;
            Some(sq)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(s: &str) -> Encoder {
        Encoder::new(&s.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_sizes() {
        assert_eq!(encoder("RvK").size(), 2 * 518);
        assert_eq!(encoder("RvR").size(), 518);
        assert_eq!(encoder("RNvK").size(), 2 * 31_332);
        assert_eq!(encoder("RRvK").size(), 2 * 278 * 62);
        assert_eq!(encoder("NNNvK").size(), 2 * CONSTS.mult_factor[2] * 61);
        assert_eq!(encoder("KPvK").size(), 2 * 24 * 63 * 62);
    }

    #[test]
    fn test_canonical_order() {
        let letters = |s: &str| {
            encoder(s)
                .pieces()
                .iter()
                .map(|p| p.char())
                .collect::<String>()
        };
        assert_eq!(letters("RNvK"), "RNk");
        assert_eq!(letters("RRvK"), "RRk");
        assert_eq!(letters("KRRvKK"), "RRKkk");
        assert_eq!(letters("KPvKP"), "PpKk");
        assert_eq!(letters("KvP"), "pK");
    }

    #[test]
    fn test_unnormalized_rejected() {
        assert!(Encoder::new(&"KvRN".parse().unwrap()).is_err());
        assert!(Encoder::new(&"KRv".parse().unwrap()).is_err());
    }

    #[test]
    fn test_symmetry_class() {
        let board = |fen: &str| fen.parse::<Board>().unwrap();
        let rnk = board("8/8/8/3k4/8/8/8/RN6");
        let mirrored = board("8/8/8/4k3/8/8/8/6NR");
        let turned = board("6NR/8/8/8/4k3/8/8/8");
        let other = board("8/8/8/3k4/8/8/8/NR6");
        let class = symmetry_class(&rnk, Color::White);
        assert_eq!(symmetry_class(&mirrored, Color::White), class);
        assert_eq!(symmetry_class(&turned, Color::White), class);
        assert_ne!(symmetry_class(&other, Color::White), class);
        assert_ne!(symmetry_class(&rnk, Color::Black), class);

        // Pawns only allow the horizontal mirror.
        let pawn = board("8/8/8/3k4/8/8/1P6/K7");
        assert_eq!(
            symmetry_class(&board("8/8/8/4k3/8/8/6P1/7K"), Color::White),
            symmetry_class(&pawn, Color::White)
        );
        assert_ne!(
            symmetry_class(&board("K7/1P6/8/8/3k4/8/8/8"), Color::White),
            symmetry_class(&pawn, Color::White)
        );
    }

    #[test]
    fn test_squares_of() {
        assert_eq!(squares_of(0b1010_0001).collect::<Vec<_>>(), vec![0, 5, 7]);
    }
}
