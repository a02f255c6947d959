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

//! Opening files.
//!
//! ```toml
//! name = "e3"
//! moves = ["e2e3"]
//! tree = "e3.tree"
//!
//! [[exclude]]
//! moves = ["b7b5", "f1b5"]
//!
//! [solver]
//! egtb_pieces = 4
//! ```

use std::{
    error::Error,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use nohash_hasher::IntMap;
use serde::Deserialize;
use shakmaty::{Color, Position as _};

use crate::{
    config::{ConfigError, SolverConfig},
    line::{Line, LineError},
    packed::PackedMove,
    score::Score,
};

/// Error in an opening file.
#[derive(Debug)]
pub enum SpecError {
    Io(io::Error),
    Toml(toml::de::Error),
    Fen(LineError),
    /// Not a move in UCI notation. `exclusion` is `None` for the opening
    /// moves.
    Move {
        exclusion: Option<usize>,
        index: usize,
        uci: String,
    },
    IllegalMove {
        exclusion: Option<usize>,
        index: usize,
        uci: String,
    },
    DuplicateExclusion { exclusion: usize },
    TerminalExclusion { exclusion: usize },
    EmptyExclusion { exclusion: usize },
    Config(ConfigError),
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |exclusion: &Option<usize>| match exclusion {
            Some(i) => format!("exclusion {i}"),
            None => "opening".to_owned(),
        };
        match self {
            SpecError::Io(err) => write!(f, "{err}"),
            SpecError::Toml(err) => write!(f, "{err}"),
            SpecError::Fen(err) => write!(f, "{err}"),
            SpecError::Move {
                exclusion,
                index,
                uci,
            } => write!(f, "{}: invalid move {index}: {uci}", list(exclusion)),
            SpecError::IllegalMove {
                exclusion,
                index,
                uci,
            } => write!(f, "{}: illegal move {index}: {uci}", list(exclusion)),
            SpecError::DuplicateExclusion { exclusion } => {
                write!(f, "exclusion {exclusion}: position already excluded")
            }
            SpecError::TerminalExclusion { exclusion } => {
                write!(f, "exclusion {exclusion}: ends in a finished game")
            }
            SpecError::EmptyExclusion { exclusion } => {
                write!(f, "exclusion {exclusion}: no moves")
            }
            SpecError::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SpecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SpecError::Io(err) => Some(err),
            SpecError::Toml(err) => Some(err),
            SpecError::Fen(err) => Some(err),
            SpecError::Config(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Side {
    White,
    Black,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExclusion {
    moves: Vec<String>,
    score: Option<i16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSpec {
    name: String,
    fen: Option<String>,
    #[serde(default)]
    moves: Vec<String>,
    #[serde(default = "default_version")]
    version: u8,
    imported_from: Option<String>,
    tree: Option<PathBuf>,
    winner: Option<Side>,
    #[serde(default)]
    exclude: Vec<RawExclusion>,
    #[serde(default)]
    solver: SolverConfig,
}

fn default_version() -> u8 {
    1
}

/// A branch left out of the proof, scored by hand.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Exclusion {
    /// From the opening root.
    pub moves: Vec<PackedMove>,
    pub key: u64,
    pub score: Score,
}

/// A validated opening file.
#[derive(Debug, Clone)]
pub struct OpeningSpec {
    pub name: String,
    pub fen: Option<String>,
    pub moves: Vec<PackedMove>,
    pub version: u8,
    pub imported_from: Option<String>,
    /// Resolved against the directory of the opening file.
    pub tree: Option<PathBuf>,
    pub winner: Color,
    pub exclusions: Vec<Exclusion>,
    pub solver: SolverConfig,
}

impl OpeningSpec {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<OpeningSpec, SpecError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(SpecError::Io)?;
        let mut spec = OpeningSpec::from_toml_str(&text)?;
        if let (Some(tree), Some(dir)) = (spec.tree.as_mut(), path.parent()) {
            if tree.is_relative() {
                *tree = dir.join(&*tree);
            }
        }
        Ok(spec)
    }

    pub fn from_toml_str(text: &str) -> Result<OpeningSpec, SpecError> {
        let raw: RawSpec = toml::from_str(text).map_err(SpecError::Toml)?;
        raw.solver.validate().map_err(SpecError::Config)?;

        let mut line = start(raw.fen.as_deref())?;
        let moves = play(&mut line, &raw.moves, None)?;
        let base = line.len();

        let winner = match raw.winner {
            Some(Side::White) => Color::White,
            Some(Side::Black) => Color::Black,
            None if moves.is_empty() => line.pos().turn(),
            None => !line.pos().turn(),
        };

        let mut exclusions: Vec<Exclusion> = Vec::with_capacity(raw.exclude.len());
        for (i, exclusion) in raw.exclude.iter().enumerate() {
            if exclusion.moves.is_empty() {
                return Err(SpecError::EmptyExclusion { exclusion: i });
            }
            let moves = play(&mut line, &exclusion.moves, Some(i))?;
            if line.result().is_some() {
                return Err(SpecError::TerminalExclusion { exclusion: i });
            }
            let key = line.key();
            if exclusions.iter().any(|e| e.key == key) {
                return Err(SpecError::DuplicateExclusion { exclusion: i });
            }
            exclusions.push(Exclusion {
                moves,
                key,
                score: exclusion.score.map_or(Score::WON, Score),
            });
            line.truncate(base);
        }

        Ok(OpeningSpec {
            name: raw.name,
            fen: raw.fen,
            moves,
            version: raw.version,
            imported_from: raw.imported_from,
            tree: raw.tree,
            winner,
            exclusions,
            solver: raw.solver,
        })
    }

    /// The start position with the opening moves played.
    pub fn root_line(&self) -> Result<Line, SpecError> {
        let mut line = start(self.fen.as_deref())?;
        for (index, &m) in self.moves.iter().enumerate() {
            let legal = line.find_move(m).ok_or_else(|| SpecError::IllegalMove {
                exclusion: None,
                index,
                uci: m.to_string(),
            })?;
            line.push(legal);
        }
        Ok(line)
    }

    /// Scores of excluded positions by key.
    pub fn skips(&self) -> IntMap<u64, Score> {
        self.exclusions.iter().map(|e| (e.key, e.score)).collect()
    }
}

fn start(fen: Option<&str>) -> Result<Line, SpecError> {
    match fen {
        Some(fen) => Line::from_fen(fen).map_err(SpecError::Fen),
        None => Ok(Line::default()),
    }
}

fn play(line: &mut Line, moves: &[String], exclusion: Option<usize>) -> Result<Vec<PackedMove>, SpecError> {
    let mut packed = Vec::with_capacity(moves.len());
    for (index, uci) in moves.iter().enumerate() {
        let m: PackedMove = uci.parse().map_err(|_| SpecError::Move {
            exclusion,
            index,
            uci: uci.clone(),
        })?;
        let legal = line.find_move(m).ok_or_else(|| SpecError::IllegalMove {
            exclusion,
            index,
            uci: uci.clone(),
        })?;
        line.push(legal);
        packed.push(m);
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e3.toml");
        fs::write(
            &path,
            r#"
            name = "e3"
            moves = ["e2e3"]
            imported_from = "hand"
            tree = "e3.tree"

            [[exclude]]
            moves = ["b7b5", "f1b5"]

            [[exclude]]
            moves = ["g7g5"]
            score = 31990

            [solver]
            egtb_pieces = 3
            "#,
        )
        .unwrap();

        let spec = OpeningSpec::load(&path).unwrap();
        assert_eq!(spec.name, "e3");
        assert_eq!(spec.version, 1);
        assert_eq!(spec.winner, Color::White);
        assert_eq!(spec.tree.as_deref(), Some(dir.path().join("e3.tree").as_path()));
        assert_eq!(spec.solver.egtb_pieces, 3);
        assert_eq!(spec.exclusions.len(), 2);
        assert_eq!(spec.exclusions[0].score, Score::WON);
        assert_eq!(spec.exclusions[1].score, Score(31990));

        let line = spec.root_line().unwrap();
        assert_eq!(line.len(), 1);
        let skips = spec.skips();
        assert!(!skips.contains_key(&line.key()));
        assert_eq!(skips.len(), 2);
    }

    #[test]
    fn test_winner() {
        let spec = OpeningSpec::from_toml_str("name = \"start\"").unwrap();
        assert_eq!(spec.winner, Color::White);
        let spec = OpeningSpec::from_toml_str("name = \"b\"\nmoves = [\"e2e3\", \"b7b5\"]").unwrap();
        assert_eq!(spec.winner, Color::Black);
        let spec = OpeningSpec::from_toml_str("name = \"w\"\nwinner = \"white\"\nmoves = [\"e2e3\", \"b7b5\"]").unwrap();
        assert_eq!(spec.winner, Color::White);
    }

    #[test]
    fn test_rejected() {
        assert!(matches!(
            OpeningSpec::from_toml_str("name = \"x\"\nfen = \"8/8/8\""),
            Err(SpecError::Fen(_))
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str("name = \"x\"\nmoves = [\"e2e3\", \"e7\"]"),
            Err(SpecError::Move { exclusion: None, index: 1, .. })
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str("name = \"x\"\nmoves = [\"e2e5\"]"),
            Err(SpecError::IllegalMove { exclusion: None, index: 0, .. })
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str(
                "name = \"x\"\nmoves = [\"e2e3\"]\n[[exclude]]\nmoves = [\"b7b5\", \"f1f5\"]"
            ),
            Err(SpecError::IllegalMove { exclusion: Some(0), index: 1, .. })
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str(
                "name = \"x\"\n[[exclude]]\nmoves = [\"e2e3\"]\n[[exclude]]\nmoves = [\"e2e3\"]"
            ),
            Err(SpecError::DuplicateExclusion { exclusion: 1 })
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str("name = \"x\"\n[[exclude]]\nmoves = []"),
            Err(SpecError::EmptyExclusion { exclusion: 0 })
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str(
                "name = \"x\"\nfen = \"8/8/8/8/8/8/1p6/R7 b - - 0 1\"\n[[exclude]]\nmoves = [\"b2a1q\"]"
            ),
            Err(SpecError::TerminalExclusion { exclusion: 0 })
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str("name = \"x\"\n[solver]\nmultipv = 0"),
            Err(SpecError::Config(_))
        ));
        assert!(matches!(
            OpeningSpec::from_toml_str("name = \"x\"\nunknown = 1"),
            Err(SpecError::Toml(_))
        ));
    }
}
