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

//! Table files.
//!
//! ```text
//! magic "ACTB" | version u8 | flags u8 | piece count u8 | pieces [u8]
//! padding to a multiple of 8
//! cell count u64
//! payload: raw cells, or a compressed store image holding the raw cells
//! ```
//!
//! Cells are 8 bit, 12 bit packed (two cells in three bytes) or 16 bit
//! little endian, depending on the flags.

use std::{
    fmt, fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt as _};
use shakmaty::{Board, Color};
use tracing::debug;

use crate::{
    encoding::Encoder,
    errors::{ProbeError, ProbeResult},
    filesystem::{RandomAccessFile, ReadHint},
    material::Material,
    store::{StoreReader, StoreWriter, DEFAULT_CACHE_CHUNKS},
    types::{byte_to_piece, piece_to_byte, Probe, MAX_PIECES},
};

pub const TABLE_MAGIC: [u8; 4] = *b"ACTB";

/// File extension of table files.
pub const TABLE_SUFFIX: &str = "atbw";

const TABLE_VERSION: u8 = 1;

bitflags! {
    /// Table header flags.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct TableFlags: u8 {
        /// Payload is a compressed store image.
        const COMPRESSED = 1;
        /// Cells carry distances, not only win/draw/loss.
        const DTZ = 2;
        /// 16 bit cells.
        const WIDE = 4;
        /// 12 bit cells, two per three bytes.
        const PACKED12 = 8;
        /// Separate halves for each side to move.
        const SPLIT = 16;
    }
}

/// What a reader requires from the tables it opens.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Reject tables without distances.
    pub require_dtz: bool,
    /// Decompressed chunks kept per table.
    pub cache_chunks: usize,
}

impl Default for TableOptions {
    fn default() -> TableOptions {
        TableOptions {
            require_dtz: true,
            cache_chunks: DEFAULT_CACHE_CHUNKS,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CellWidth {
    Narrow,
    Packed12,
    Wide,
}

impl CellWidth {
    fn from_flags(flags: TableFlags) -> Option<CellWidth> {
        match (flags.contains(TableFlags::WIDE), flags.contains(TableFlags::PACKED12)) {
            (false, false) => Some(CellWidth::Narrow),
            (false, true) => Some(CellWidth::Packed12),
            (true, false) => Some(CellWidth::Wide),
            (true, true) => None,
        }
    }

    fn for_max_cell(max: u16) -> CellWidth {
        if max <= 0xff {
            CellWidth::Narrow
        } else if max <= 0xfff {
            CellWidth::Packed12
        } else {
            CellWidth::Wide
        }
    }

    fn flags(self) -> TableFlags {
        match self {
            CellWidth::Narrow => TableFlags::empty(),
            CellWidth::Packed12 => TableFlags::PACKED12,
            CellWidth::Wide => TableFlags::WIDE,
        }
    }

    fn payload_len(self, cells: u64) -> u64 {
        match self {
            CellWidth::Narrow => cells,
            CellWidth::Packed12 => cells.div_ceil(2) * 3,
            CellWidth::Wide => cells * 2,
        }
    }
}

fn header_len(pieces: usize) -> u64 {
    (7 + pieces as u64).next_multiple_of(8)
}

enum Payload<F> {
    Raw { raf: F, offset: u64 },
    Compressed(StoreReader<F>),
}

impl<F: RandomAccessFile> Payload<F> {
    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> ProbeResult<()> {
        match self {
            Payload::Raw { raf, offset } => {
                Ok(raf.read_exact_at(ReadHint::Cells, offset + pos, buf)?)
            }
            Payload::Compressed(store) => store.read_exact_at(pos, buf),
        }
    }
}

/// An opened table for one material signature.
pub(crate) struct Table<F> {
    encoder: Encoder,
    flags: TableFlags,
    width: CellWidth,
    payload: Payload<F>,
}

impl<F> fmt::Debug for Table<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("material", self.encoder.material())
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl<F: RandomAccessFile> Table<F> {
    pub fn open(raf: F, material: &Material, options: &TableOptions) -> ProbeResult<Table<F>> {
        let encoder = Encoder::new(material)?;

        let mut magic = [0; 4];
        if let Err(error) = raf.read_exact_at(ReadHint::Header, 0, &mut magic) {
            return Err(match error.kind() {
                io::ErrorKind::UnexpectedEof => ProbeError::Magic { magic },
                _ => ProbeError::Read { error },
            });
        }
        if magic != TABLE_MAGIC {
            return Err(ProbeError::Magic { magic });
        }

        ensure!(raf.read_u8_at(ReadHint::Header, 4)? == TABLE_VERSION);
        let found = raf.read_u8_at(ReadHint::Header, 5)?;
        let flags = u!(TableFlags::from_bits(found));
        let width = u!(CellWidth::from_flags(flags));

        let mut expected = TableFlags::empty();
        expected.set(TableFlags::DTZ, options.require_dtz);
        expected.set(TableFlags::SPLIT, encoder.is_split());
        let checked = if options.require_dtz {
            TableFlags::DTZ | TableFlags::SPLIT
        } else {
            TableFlags::SPLIT
        };
        if flags & checked != expected {
            return Err(ProbeError::Flags {
                expected: expected.bits(),
                found,
            });
        }

        let count = usize::from(raf.read_u8_at(ReadHint::Header, 6)?);
        ensure!(count == encoder.pieces().len() && count <= MAX_PIECES);
        let mut pieces = [0; MAX_PIECES];
        raf.read_exact_at(ReadHint::Header, 7, &mut pieces[..count])?;
        for (byte, expected) in pieces[..count].iter().zip(encoder.pieces()) {
            ensure!(byte_to_piece(*byte) == Some(*expected));
        }

        let header_len = header_len(count);
        let cells = raf.read_u64_le_at(ReadHint::Header, header_len)?;
        ensure!(cells == encoder.size());

        let offset = header_len + 8;
        let payload = if flags.contains(TableFlags::COMPRESSED) {
            let store = StoreReader::open(raf, offset, options.cache_chunks)?;
            ensure!(store.len() == width.payload_len(cells));
            Payload::Compressed(store)
        } else {
            Payload::Raw { raf, offset }
        };

        debug!(%material, ?flags, cells, "opened table");

        Ok(Table {
            encoder,
            flags,
            width,
            payload,
        })
    }

    fn read_cell(&self, idx: u64) -> ProbeResult<u16> {
        Ok(match self.width {
            CellWidth::Narrow => {
                let mut buf = [0; 1];
                self.payload.read_exact_at(idx, &mut buf)?;
                u16::from(buf[0])
            }
            CellWidth::Wide => {
                let mut buf = [0; 2];
                self.payload.read_exact_at(idx * 2, &mut buf)?;
                u16::from_le_bytes(buf)
            }
            CellWidth::Packed12 => {
                let mut buf = [0; 3];
                self.payload.read_exact_at(idx / 2 * 3, &mut buf)?;
                if idx % 2 == 0 {
                    (u16::from(buf[1] & 0xf) << 8) | u16::from(buf[0])
                } else {
                    (u16::from(buf[2]) << 4) | (u16::from(buf[1]) >> 4)
                }
            }
        })
    }

    /// Value of the position, which must not have a legal en passant
    /// capture.
    pub fn probe(&self, board: &Board, turn: Color) -> ProbeResult<Probe> {
        let idx = self.encoder.index(board, turn)?;
        let cell = self.read_cell(idx)?;
        Ok(u!(Probe::from_cell(cell, self.flags.contains(TableFlags::DTZ))))
    }
}

/// Serializes complete tables.
#[derive(Debug, Clone)]
pub struct TableWriter {
    dtz: bool,
    compression: Option<StoreWriter>,
}

impl Default for TableWriter {
    fn default() -> TableWriter {
        TableWriter::new()
    }
}

impl TableWriter {
    /// Writer for compressed tables with distances.
    pub fn new() -> TableWriter {
        TableWriter {
            dtz: true,
            compression: Some(StoreWriter::default()),
        }
    }

    /// Whether to store distances, or only win/draw/loss.
    #[must_use]
    pub fn dtz(mut self, dtz: bool) -> TableWriter {
        self.dtz = dtz;
        self
    }

    /// Store cells raw (`None`) or in a compressed store.
    #[must_use]
    pub fn compression(mut self, compression: Option<StoreWriter>) -> TableWriter {
        self.compression = compression;
        self
    }

    /// Write a table. `values` are indexed like the table cells.
    pub fn write<W: Write>(&self, material: &Material, values: &[Probe], mut out: W) -> ProbeResult<()> {
        let encoder = Encoder::new(material)?;
        ensure!(values.len() as u64 == encoder.size());

        let cells: Vec<u16> = values.iter().map(|v| v.to_cell(self.dtz)).collect();
        let width = CellWidth::for_max_cell(cells.iter().copied().max().unwrap_or(0));

        let mut payload = Vec::with_capacity(width.payload_len(cells.len() as u64) as usize);
        match width {
            CellWidth::Narrow => payload.extend(cells.iter().map(|c| *c as u8)),
            CellWidth::Wide => {
                for cell in &cells {
                    payload.write_u16::<LittleEndian>(*cell)?;
                }
            }
            CellWidth::Packed12 => {
                for pair in cells.chunks(2) {
                    let lo = pair[0];
                    let hi = pair.get(1).copied().unwrap_or(0);
                    payload.push(lo as u8);
                    payload.push(((lo >> 8) as u8 & 0xf) | ((hi as u8 & 0xf) << 4));
                    payload.push((hi >> 4) as u8);
                }
            }
        }

        let mut flags = width.flags();
        flags.set(TableFlags::DTZ, self.dtz);
        flags.set(TableFlags::SPLIT, encoder.is_split());
        flags.set(TableFlags::COMPRESSED, self.compression.is_some());

        let pieces = encoder.pieces();
        out.write_all(&TABLE_MAGIC)?;
        out.write_u8(TABLE_VERSION)?;
        out.write_u8(flags.bits())?;
        out.write_u8(pieces.len() as u8)?;
        for piece in pieces {
            out.write_u8(piece_to_byte(*piece))?;
        }
        for _ in (7 + pieces.len() as u64)..header_len(pieces.len()) {
            out.write_u8(0)?;
        }
        out.write_u64::<LittleEndian>(cells.len() as u64)?;

        match &self.compression {
            Some(store) => {
                store.write(&payload, &mut out)?;
            }
            None => out.write_all(&payload)?,
        }
        out.flush()?;
        Ok(())
    }

    /// Write `<dir>/<material>.atbw`, replacing an existing file
    /// atomically.
    pub fn write_file(&self, material: &Material, values: &[Probe], dir: &Path) -> ProbeResult<PathBuf> {
        let path = dir.join(format!("{material}.{TABLE_SUFFIX}"));
        let tmp = path.with_extension(format!("{TABLE_SUFFIX}.tmp"));
        {
            let file = fs::File::create(&tmp)?;
            let mut out = BufWriter::new(file);
            self.write(material, values, &mut out)?;
            out.into_inner().map_err(|err| err.into_error())?.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(material: &Material, f: impl Fn(u64) -> Probe) -> Vec<Probe> {
        (0..Encoder::new(material).unwrap().size()).map(f).collect()
    }

    fn pattern(i: u64) -> Probe {
        match i % 3 {
            0 => Probe::DRAW,
            1 => Probe::win((i % 5000) as u16),
            _ => Probe::loss((i % 37) as u16),
        }
    }

    fn roundtrip(writer: TableWriter, material: &Material, values: &[Probe], require_dtz: bool) {
        let mut bytes = Vec::new();
        writer.write(material, values, &mut bytes).unwrap();
        let options = TableOptions {
            require_dtz,
            cache_chunks: 2,
        };
        let table = Table::open(bytes, material, &options).unwrap();
        for (idx, value) in values.iter().enumerate().step_by(7) {
            let cell = table.read_cell(idx as u64).unwrap();
            let dtz = table.flags.contains(TableFlags::DTZ);
            let expected = if dtz { *value } else { Probe { distance: 0, ..*value } };
            assert_eq!(Probe::from_cell(cell, dtz), Some(expected));
        }
    }

    #[test]
    fn test_cell_widths() {
        let material: Material = "RvK".parse().unwrap();
        let narrow = values(&material, |i| pattern(i % 120));
        let packed = values(&material, |i| pattern(i * 3 % 1900));
        let wide = values(&material, |i| pattern(i + 4000));

        for compression in [None, Some(StoreWriter::default())] {
            let writer = TableWriter::new().compression(compression);
            roundtrip(writer.clone(), &material, &narrow, true);
            roundtrip(writer.clone(), &material, &packed, true);
            roundtrip(writer.clone(), &material, &wide, true);
            roundtrip(writer.dtz(false), &material, &wide, false);
        }
    }

    #[test]
    fn test_flag_mismatch() {
        let material: Material = "RvK".parse().unwrap();
        let mut bytes = Vec::new();
        TableWriter::new()
            .dtz(false)
            .write(&material, &values(&material, |_| Probe::DRAW), &mut bytes)
            .unwrap();
        assert!(matches!(
            Table::open(bytes, &material, &TableOptions::default()),
            Err(ProbeError::Flags { .. })
        ));
    }

    #[test]
    fn test_wrong_material() {
        let material: Material = "RvK".parse().unwrap();
        let mut bytes = Vec::new();
        TableWriter::new()
            .write(&material, &values(&material, |_| Probe::DRAW), &mut bytes)
            .unwrap();
        let other: Material = "QvK".parse().unwrap();
        assert!(matches!(
            Table::open(bytes, &other, &TableOptions::default()),
            Err(ProbeError::CorruptedTable { .. })
        ));
    }

    #[test]
    fn test_wrong_length() {
        let material: Material = "RvK".parse().unwrap();
        assert!(TableWriter::new()
            .write(&material, &[Probe::DRAW; 3], &mut Vec::new())
            .is_err());
    }
}
