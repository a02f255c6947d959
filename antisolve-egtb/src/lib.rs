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

//! Exact endgame tables for antichess.
//!
//! A table stores, for every position of one material signature, whether
//! the side to move wins, draws or loses, and how many of its own moves the
//! winning side still needs.
//!
//! # Example
//!
//! ```no_run
//! use antisolve_egtb::{Probe, Tablebase};
//! use shakmaty::{fen::Fen, variant::Antichess, CastlingMode};
//!
//! let mut tables = Tablebase::new();
//! tables.add_directory("tables")?;
//!
//! let pos: Antichess = "8/8/8/8/8/8/8/RN5k w - - 0 1"
//!     .parse::<Fen>()?
//!     .into_position(CastlingMode::Standard)?;
//!
//! let probe: Probe = tables.probe(&pos)?;
//! println!("{probe}");
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! Tables are built with [`generate()`] and written with [`TableWriter`].

#![cfg_attr(docs_rs, feature(doc_auto_cfg))]

#[macro_use]
mod errors;
mod encoding;
pub mod filesystem;
mod generate;
mod material;
pub mod store;
mod table;
mod tablebase;
mod types;

pub use crate::{
    errors::{ProbeError, ProbeResult, TablebaseError, TablebaseResult},
    generate::{generate, generate_with_dependencies, representatives, GenerateError},
    material::{Material, ParseMaterialError},
    table::{TableFlags, TableOptions, TableWriter, TABLE_MAGIC, TABLE_SUFFIX},
    tablebase::Tablebase,
    types::{Probe, Wdl, MAX_PIECES},
};
