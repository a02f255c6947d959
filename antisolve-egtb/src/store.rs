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

//! Chunk-compressed byte storage with random access.
//!
//! An image consists of a fixed header, an index of `count + 1` chunk
//! offsets and the chunk data:
//!
//! ```text
//! magic "CRAS" | version u8 | codec u8 | reserved u16
//! chunk size u32 | total length u64 | chunk count u32
//! offsets [u64; count + 1]  (relative to the first chunk)
//! chunks
//! ```
//!
//! All integers are little endian. Every chunk except the last one holds
//! exactly `chunk size` uncompressed bytes.

use std::{
    fmt,
    io::{self, Read as _, Write},
    sync::{Arc, Mutex},
};

use byteorder::{ByteOrder as _, LittleEndian, WriteBytesExt as _};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};

use crate::{
    errors::{ProbeError, ProbeResult},
    filesystem::{RandomAccessFile, ReadHint},
};

pub const STORE_MAGIC: [u8; 4] = *b"CRAS";

const STORE_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 24;

/// Upper bound for the chunk size, to keep a corrupted header from
/// triggering huge allocations.
const MAX_CHUNK_SIZE: u32 = 1 << 24;

/// Number of decompressed chunks kept by default.
pub const DEFAULT_CACHE_CHUNKS: usize = 16;

/// How chunks are stored.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Codec {
    Stored,
    Deflate,
}

impl Codec {
    fn to_byte(self) -> u8 {
        match self {
            Codec::Stored => 0,
            Codec::Deflate => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Codec> {
        match byte {
            0 => Some(Codec::Stored),
            1 => Some(Codec::Deflate),
            _ => None,
        }
    }
}

/// Decompressed chunks, most recently used first.
#[derive(Debug)]
struct ChunkCache {
    capacity: usize,
    chunks: Vec<(u32, Arc<[u8]>)>,
}

impl ChunkCache {
    fn get(&mut self, chunk: u32) -> Option<Arc<[u8]>> {
        let pos = self.chunks.iter().position(|(c, _)| *c == chunk)?;
        let entry = self.chunks.remove(pos);
        let data = Arc::clone(&entry.1);
        self.chunks.insert(0, entry);
        Some(data)
    }

    fn insert(&mut self, chunk: u32, data: Arc<[u8]>) {
        if self.capacity == 0 {
            return;
        }
        self.chunks.truncate(self.capacity - 1);
        self.chunks.insert(0, (chunk, data));
    }
}

/// Random access reader for a store image embedded at some offset in a
/// file.
pub struct StoreReader<F> {
    raf: F,
    codec: Codec,
    chunk_size: u32,
    len: u64,
    data_start: u64,
    offsets: Vec<u64>,
    cache: Mutex<ChunkCache>,
}

impl<F> fmt::Debug for StoreReader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreReader")
            .field("codec", &self.codec)
            .field("chunk_size", &self.chunk_size)
            .field("len", &self.len)
            .field("chunks", &(self.offsets.len().saturating_sub(1)))
            .finish_non_exhaustive()
    }
}

impl<F: RandomAccessFile> StoreReader<F> {
    /// Open the image starting at `base`, keeping up to `cache_chunks`
    /// decompressed chunks.
    pub fn open(raf: F, base: u64, cache_chunks: usize) -> ProbeResult<StoreReader<F>> {
        let mut header = [0; HEADER_SIZE as usize];
        raf.read_exact_at(ReadHint::Header, base, &mut header)?;

        let mut magic = [0; 4];
        magic.copy_from_slice(&header[..4]);
        if magic != STORE_MAGIC {
            return Err(ProbeError::Magic { magic });
        }
        ensure!(header[4] == STORE_VERSION);
        let codec = u!(Codec::from_byte(header[5]));
        let chunk_size = LittleEndian::read_u32(&header[8..12]);
        let len = LittleEndian::read_u64(&header[12..20]);
        let count = LittleEndian::read_u32(&header[20..24]);

        ensure!(chunk_size.is_power_of_two() && chunk_size <= MAX_CHUNK_SIZE);
        ensure!(u64::from(count) == len.div_ceil(u64::from(chunk_size)));

        let mut raw = vec![0; (count as usize + 1) * 8];
        raf.read_exact_at(ReadHint::ChunkIndex, base + HEADER_SIZE, &mut raw)?;
        let offsets: Vec<u64> = raw.chunks_exact(8).map(LittleEndian::read_u64).collect();
        ensure!(offsets[0] == 0);
        ensure!(offsets.windows(2).all(|w| w[0] <= w[1]));

        Ok(StoreReader {
            raf,
            codec,
            chunk_size,
            len,
            data_start: base + HEADER_SIZE + raw.len() as u64,
            offsets,
            cache: Mutex::new(ChunkCache {
                capacity: cache_chunks,
                chunks: Vec::new(),
            }),
        })
    }

    /// Total uncompressed length.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the image on disk, header and index included.
    pub fn image_len(&self) -> u64 {
        self.data_start + self.offsets.last().copied().unwrap_or(0)
    }

    /// Fill `buf` with the uncompressed bytes starting at `pos`.
    pub fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> ProbeResult<()> {
        let end = u!(pos.checked_add(buf.len() as u64));
        ensure!(end <= self.len);

        let chunk_size = u64::from(self.chunk_size);
        let mut done = 0;
        while done < buf.len() {
            let abs = pos + done as u64;
            let chunk = self.chunk((abs / chunk_size) as u32)?;
            let within = (abs % chunk_size) as usize;
            ensure!(within < chunk.len());
            let n = (chunk.len() - within).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&chunk[within..within + n]);
            done += n;
        }
        Ok(())
    }

    fn chunk(&self, chunk: u32) -> ProbeResult<Arc<[u8]>> {
        // The lock is held across the file read, so a single handle is
        // never used reentrantly.
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(data) = cache.get(chunk) {
            return Ok(data);
        }

        let i = chunk as usize;
        ensure!(i + 1 < self.offsets.len());
        let (start, end) = (self.offsets[i], self.offsets[i + 1]);
        let mut compressed = vec![0; usize::try_from(end - start).map_err(|_| corrupted())?];
        self.raf
            .read_exact_at(ReadHint::Chunk, self.data_start + start, &mut compressed)?;

        let expected = (self.len - u64::from(chunk) * u64::from(self.chunk_size))
            .min(u64::from(self.chunk_size)) as usize;
        let data = match self.codec {
            Codec::Stored => compressed,
            Codec::Deflate => {
                let mut data = Vec::with_capacity(expected);
                DeflateDecoder::new(&compressed[..])
                    .take(expected as u64 + 1)
                    .read_to_end(&mut data)
                    .map_err(|_| corrupted())?;
                data
            }
        };
        ensure!(data.len() == expected);

        let data: Arc<[u8]> = data.into();
        cache.insert(chunk, Arc::clone(&data));
        Ok(data)
    }
}

fn corrupted() -> ProbeError {
    ProbeError::CorruptedTable {
        backtrace: std::backtrace::Backtrace::capture(),
    }
}

/// Serializes byte buffers as store images.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    codec: Codec,
    chunk_size: u32,
}

impl Default for StoreWriter {
    fn default() -> StoreWriter {
        StoreWriter::new(Codec::Deflate, 1 << 14)
    }
}

impl StoreWriter {
    /// # Panics
    ///
    /// Panics if `chunk_size` is not a power of two.
    pub fn new(codec: Codec, chunk_size: u32) -> StoreWriter {
        assert!(chunk_size.is_power_of_two() && chunk_size <= MAX_CHUNK_SIZE);
        StoreWriter { codec, chunk_size }
    }

    /// Write `data` as a complete image. Returns the number of bytes
    /// written.
    pub fn write<W: Write>(&self, data: &[u8], mut out: W) -> io::Result<u64> {
        let mut chunks = Vec::new();
        for chunk in data.chunks(self.chunk_size as usize) {
            chunks.push(match self.codec {
                Codec::Stored => chunk.to_vec(),
                Codec::Deflate => {
                    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(chunk)?;
                    encoder.finish()?
                }
            });
        }

        out.write_all(&STORE_MAGIC)?;
        out.write_u8(STORE_VERSION)?;
        out.write_u8(self.codec.to_byte())?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(self.chunk_size)?;
        out.write_u64::<LittleEndian>(data.len() as u64)?;
        out.write_u32::<LittleEndian>(chunks.len() as u32)?;

        let mut offset = 0;
        out.write_u64::<LittleEndian>(offset)?;
        for chunk in &chunks {
            offset += chunk.len() as u64;
            out.write_u64::<LittleEndian>(offset)?;
        }
        for chunk in &chunks {
            out.write_all(chunk)?;
        }

        Ok(HEADER_SIZE + (chunks.len() as u64 + 1) * 8 + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn image(codec: Codec, chunk_size: u32, data: &[u8], prefix: usize) -> Vec<u8> {
        let mut out = vec![0xaa; prefix];
        let written = StoreWriter::new(codec, chunk_size).write(data, &mut out).unwrap();
        assert_eq!(written as usize, out.len() - prefix);
        out
    }

    #[test]
    fn test_read_across_chunks() {
        let data = sample(1000);
        for codec in [Codec::Stored, Codec::Deflate] {
            let reader = StoreReader::open(image(codec, 64, &data, 5), 5, 2).unwrap();
            assert_eq!(reader.len(), 1000);

            let mut buf = [0; 150];
            reader.read_exact_at(60, &mut buf).unwrap();
            assert_eq!(&buf[..], &data[60..210]);

            let mut tail = [0; 8];
            reader.read_exact_at(992, &mut tail).unwrap();
            assert_eq!(&tail[..], &data[992..]);
        }
    }

    #[test]
    fn test_out_of_bounds() {
        let data = sample(100);
        let reader = StoreReader::open(image(Codec::Deflate, 32, &data, 0), 0, 4).unwrap();
        let mut buf = [0; 2];
        assert!(matches!(
            reader.read_exact_at(99, &mut buf),
            Err(ProbeError::CorruptedTable { .. })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = image(Codec::Stored, 32, &sample(10), 0);
        bytes[0] = b'X';
        assert!(matches!(
            StoreReader::open(bytes, 0, 1),
            Err(ProbeError::Magic { .. })
        ));
    }

    #[test]
    fn test_corrupted_chunk() {
        let data = sample(256);
        let mut bytes = image(Codec::Deflate, 64, &data, 0);
        let last = bytes.len() - 1;
        bytes.truncate(last);
        let reader = StoreReader::open(bytes, 0, 1).unwrap();
        let mut buf = [0; 16];
        assert!(reader.read_exact_at(0, &mut buf).is_ok());
        assert!(reader.read_exact_at(240, &mut buf).is_err());
    }

    #[test]
    fn test_cache_eviction() {
        let mut cache = ChunkCache {
            capacity: 2,
            chunks: Vec::new(),
        };
        cache.insert(1, Arc::from(vec![1]));
        cache.insert(2, Arc::from(vec![2]));
        assert!(cache.get(1).is_some());
        cache.insert(3, Arc::from(vec![3]));
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }
}
