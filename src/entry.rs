//! Book records.
//!
//! A record is 16 bytes, big endian:
//!
//! ```text
//! key: u64 | move: u16 | score: i16 | meta: u32
//! ```

use std::cmp::{Ordering, Reverse};

use byteorder::{BigEndian, ByteOrder as _};

use crate::{packed::PackedMove, score::Score};

/// What produced a record, packed into its last 32 bits.
///
/// The top bit separates evaluator results from proof results. The two
/// sentinels sit at the top of the node count range, so that sorting by
/// the two leading bytes in descending order ranks overrides, solved
/// markers and node counts before evaluator results.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Meta {
    /// Chosen by the evaluator at `depth` (at most 127) after `time`
    /// seconds, with evaluator settings `version`.
    Engine { depth: u8, version: u8, time: u16 },
    /// Proven, with the number of positions in the proof below.
    NodeCount(u32),
    /// Rejected alternative.
    Solved,
    /// Human override.
    Overridden,
}

impl Meta {
    pub const MAX_DEPTH: u8 = 127;
    pub const MAX_NODE_COUNT: u32 = 0x7fff_fffd;

    const NODE_COUNT_BIT: u32 = 0x8000_0000;
    const SOLVED: u32 = 0xffff_fffe;
    const OVERRIDDEN: u32 = 0xffff_ffff;
    const SENTINEL_PRIORITY: u16 = 0xffff;

    /// Evaluator result, clamping each field to its range.
    pub fn engine(depth: u32, version: u8, time_secs: u64) -> Meta {
        Meta::Engine {
            depth: depth.min(u32::from(Meta::MAX_DEPTH)) as u8,
            version,
            time: time_secs.min(u64::from(u16::MAX)) as u16,
        }
    }

    /// Saturating node count.
    pub fn node_count(count: u64) -> Meta {
        Meta::NodeCount(count.min(u64::from(Meta::MAX_NODE_COUNT)) as u32)
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Meta::Engine {
                depth,
                version,
                time,
            } => {
                u32::from(depth.min(Meta::MAX_DEPTH)) << 24
                    | u32::from(version) << 16
                    | u32::from(time)
            }
            Meta::NodeCount(count) => Meta::NODE_COUNT_BIT | count.min(Meta::MAX_NODE_COUNT),
            Meta::Solved => Meta::SOLVED,
            Meta::Overridden => Meta::OVERRIDDEN,
        }
    }

    pub fn from_u32(raw: u32) -> Meta {
        match raw {
            Meta::OVERRIDDEN => Meta::Overridden,
            Meta::SOLVED => Meta::Solved,
            _ if raw & Meta::NODE_COUNT_BIT != 0 => Meta::NodeCount(raw & !Meta::NODE_COUNT_BIT),
            _ => Meta::Engine {
                depth: (raw >> 24) as u8,
                version: (raw >> 16) as u8,
                time: raw as u16,
            },
        }
    }

    /// Produced by a proof rather than a search.
    pub fn is_proof(self) -> bool {
        !matches!(self, Meta::Engine { .. })
    }

    /// Sort priority: the two leading bytes. Node counts are capped one
    /// below the sentinels.
    pub fn priority(self) -> u16 {
        let leading = (self.to_u32() >> 16) as u16;
        match self {
            Meta::NodeCount(_) => leading.min(Meta::SENTINEL_PRIORITY - 1),
            _ => leading,
        }
    }
}

/// A book record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Entry {
    pub key: u64,
    pub mv: PackedMove,
    pub score: Score,
    pub meta: Meta,
}

impl Entry {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Entry::SIZE] {
        let mut buf = [0; Entry::SIZE];
        BigEndian::write_u64(&mut buf[0..8], self.key);
        BigEndian::write_u16(&mut buf[8..10], self.mv.to_u16());
        BigEndian::write_i16(&mut buf[10..12], self.score.0);
        BigEndian::write_u32(&mut buf[12..16], self.meta.to_u32());
        buf
    }

    pub fn from_bytes(buf: &[u8; Entry::SIZE]) -> Entry {
        Entry {
            key: BigEndian::read_u64(&buf[0..8]),
            mv: PackedMove::from_u16(BigEndian::read_u16(&buf[8..10])),
            score: Score(BigEndian::read_i16(&buf[10..12])),
            meta: Meta::from_u32(BigEndian::read_u32(&buf[12..16])),
        }
    }

    /// Placeholders that compaction drops: a null move without a proven
    /// score, or an override marker whose score was never filled in.
    pub fn is_transient(&self) -> bool {
        (self.mv.is_null() && !self.score.is_proven())
            || (self.meta == Meta::Overridden && self.score == Score::UNKNOWN)
    }

    /// Book order: key ascending, then priority descending.
    pub fn book_order(&self, other: &Entry) -> Ordering {
        (self.key, Reverse(self.meta.priority())).cmp(&(other.key, Reverse(other.meta.priority())))
    }
}

/// Check that `records` are in book order.
pub fn is_book_sorted(records: &[Entry]) -> bool {
    records
        .windows(2)
        .all(|w| w[0].book_order(&w[1]) != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(meta: Meta) -> Entry {
        Entry {
            key: 0x0123_4567_89ab_cdef,
            mv: "e2e4".parse().unwrap(),
            score: Score::mate_in(17),
            meta,
        }
    }

    #[test]
    fn test_meta_variants() {
        for meta in [
            Meta::Engine {
                depth: 0,
                version: 0,
                time: 0,
            },
            Meta::Engine {
                depth: 127,
                version: 255,
                time: u16::MAX,
            },
            Meta::NodeCount(0),
            Meta::NodeCount(1),
            Meta::NodeCount(Meta::MAX_NODE_COUNT),
            Meta::Solved,
            Meta::Overridden,
        ] {
            assert_eq!(Meta::from_u32(meta.to_u32()), meta);
            let e = entry(meta);
            assert_eq!(Entry::from_bytes(&e.to_bytes()), e);
        }
    }

    #[test]
    fn test_layout() {
        let e = entry(Meta::engine(200, 3, 100_000));
        assert_eq!(e.meta, Meta::Engine { depth: 127, version: 3, time: u16::MAX });
        let bytes = e.to_bytes();
        assert_eq!(&bytes[0..8], &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        assert_eq!(Score(i16::from_be_bytes([bytes[10], bytes[11]])), Score::mate_in(17));
        assert_eq!(&bytes[12..16], &[0x7f, 0x03, 0xff, 0xff]);

        assert_eq!(Meta::node_count(u64::MAX), Meta::NodeCount(Meta::MAX_NODE_COUNT));
        assert_eq!(Meta::node_count(u64::MAX).to_u32(), 0xffff_fffd);
    }

    #[test]
    fn test_priority() {
        let mut records = vec![
            entry(Meta::engine(30, 1, 5)),
            entry(Meta::NodeCount(12)),
            entry(Meta::Overridden),
            entry(Meta::Solved),
            Entry {
                key: 1,
                ..entry(Meta::engine(1, 1, 1))
            },
        ];
        records.sort_by(Entry::book_order);
        assert!(is_book_sorted(&records));
        assert_eq!(records[0].key, 1);
        assert_eq!(records[1].meta, Meta::Overridden);
        assert_eq!(records[2].meta, Meta::Solved);
        assert_eq!(records[3].meta, Meta::NodeCount(12));
        assert!(!records[4].meta.is_proof());
    }

    #[test]
    fn test_large_node_count_below_sentinels() {
        let huge = Meta::node_count(u64::MAX);
        assert_eq!(huge.priority(), 0xfffe);
        assert!(Meta::NodeCount(0x7fff_0000).priority() < Meta::Solved.priority());

        let mut records = vec![entry(huge), entry(Meta::Solved)];
        records.sort_by(Entry::book_order);
        assert_eq!(records[0].meta, Meta::Solved);
        assert_eq!(records[1].meta, huge);
    }

    #[test]
    fn test_transient() {
        let null = Entry {
            mv: PackedMove::NULL,
            score: Score::won_estimate(4),
            ..entry(Meta::NodeCount(1))
        };
        assert!(null.is_transient());
        assert!(!Entry {
            score: Score::MATE,
            ..null
        }
        .is_transient());
        assert!(Entry {
            score: Score::UNKNOWN,
            ..entry(Meta::Overridden)
        }
        .is_transient());
        assert!(!entry(Meta::Overridden).is_transient());
    }
}
