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

//! Certify antichess wins and keep the proofs in a book.
//!
//! A proof is a tree in which the winning side makes exactly one move at
//! each of its turns, the opponent tries every reply, and every branch ends
//! in a won position. Proofs are stored per position in a
//! [book](book::PositionStore), so that later sessions can reuse them
//! across transpositions.
//!
//! # Examples
//!
//! Read a book record:
//!
//! ```
//! use antisolve::{Entry, Meta, PackedMove, Score};
//!
//! let entry = Entry {
//!     key: 0x1234,
//!     mv: "e2e3".parse::<PackedMove>()?,
//!     score: Score::mate_in(12),
//!     meta: Meta::NodeCount(400),
//! };
//! assert_eq!(Entry::from_bytes(&entry.to_bytes()), entry);
//! assert!(entry.meta.is_proof());
//! # Ok::<_, antisolve::ParsePackedMoveError>(())
//! ```
//!
//! Certify a position:
//!
//! ```no_run
//! use antisolve::{BookSet, Line, Solver, SolverConfig, UciEvaluator};
//! use shakmaty::Color;
//!
//! let mut books = BookSet::open("books", "e3")?;
//! let mut evaluator = UciEvaluator::spawn("stockfish", Vec::<String>::new(), &[])?;
//! let mut line = Line::default();
//! let e3 = "e2e3".parse::<antisolve::PackedMove>()?;
//! let e3 = line.find_move(e3).ok_or("illegal")?;
//! line.push(e3);
//!
//! let mut solver = Solver::new(SolverConfig::default(), &mut books, &mut evaluator, Color::White);
//! let report = solver.solve(&mut line)?;
//! println!("{}", report.score);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

#![cfg_attr(docs_rs, feature(doc_auto_cfg))]
#![allow(clippy::too_many_arguments)]

pub mod book;
pub mod config;
pub mod engine;
pub mod entry;
pub mod evaluator;
pub mod line;
pub mod opening;
pub mod packed;
pub mod score;
pub mod tree;

pub use crate::{
    book::{BookSet, PositionStore, StoreError},
    config::{SolverConfig, StopPolicy},
    engine::{SessionReport, SolveAbort, SolveError, Solver, StopHandle},
    entry::{Entry, Meta},
    evaluator::{Evaluator, UciEvaluator},
    line::{Line, Terminal},
    opening::{OpeningSpec, SpecError},
    packed::{PackedMove, ParsePackedMoveError},
    score::Score,
    tree::{SolutionTree, TreeError, TreeWriter},
};
