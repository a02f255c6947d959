use std::{backtrace::Backtrace, error::Error, fmt, io};

use crate::material::Material;

pub type TablebaseResult<T> = Result<T, TablebaseError>;

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Error when probing the tablebase.
#[derive(Debug)]
pub enum TablebaseError {
    /// Position has more pieces than the tablebase is configured for.
    TooManyPieces,
    /// Position with castling rights. Antichess tables never contain them.
    Castling,
    /// Missing table. Callers are expected to fall back to search.
    MissingTable {
        #[allow(missing_docs)]
        material: Material,
    },
    /// An en passant lookahead reached another position with a legal en
    /// passant capture.
    EnPassantChain,
    /// Probe failed.
    ProbeFailed {
        #[allow(missing_docs)]
        material: Material,
        #[allow(missing_docs)]
        error: Box<ProbeError>,
    },
}

impl TablebaseError {
    /// Whether the error only means that the answer is not available, as
    /// opposed to a broken table.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            TablebaseError::MissingTable { .. } | TablebaseError::TooManyPieces
        )
    }
}

impl fmt::Display for TablebaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TablebaseError::TooManyPieces => write!(f, "too many pieces"),
            TablebaseError::Castling => write!(f, "tables do not contain positions with castling rights"),
            TablebaseError::MissingTable { material } => {
                write!(f, "required table not found: {material}")
            }
            TablebaseError::EnPassantChain => {
                write!(f, "refusing re-entrant en passant lookahead")
            }
            TablebaseError::ProbeFailed { material, error } => {
                write!(f, "failed to probe table {material}: {error}")
            }
        }
    }
}

impl Error for TablebaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TablebaseError::ProbeFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Error when reading or writing a single table.
#[derive(Debug)]
pub enum ProbeError {
    /// I/O error.
    Read {
        #[allow(missing_docs)]
        error: io::Error,
    },
    /// File has unexpected magic header bytes.
    Magic {
        #[allow(missing_docs)]
        magic: [u8; 4],
    },
    /// The header flags differ from the flags the reader was configured to
    /// expect.
    Flags {
        #[allow(missing_docs)]
        expected: u8,
        #[allow(missing_docs)]
        found: u8,
    },
    /// Corrupted table.
    CorruptedTable {
        #[allow(missing_docs)]
        backtrace: Backtrace,
    },
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Read { error } => write!(f, "i/o error reading table file: {error}"),
            ProbeError::Magic { magic } => write!(f, "invalid magic header bytes: {magic:x?}"),
            ProbeError::Flags { expected, found } => write!(
                f,
                "unexpected table flags: expected {expected:#04x}, found {found:#04x}"
            ),
            ProbeError::CorruptedTable { backtrace } => write!(f, "corrupted table: {backtrace}"),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Read { error } => Some(error),
            _ => None,
        }
    }
}

pub trait ProbeResultExt<T> {
    fn ctx(self, material: &Material) -> TablebaseResult<T>;
}

impl<T> ProbeResultExt<T> for ProbeResult<T> {
    fn ctx(self, material: &Material) -> TablebaseResult<T> {
        self.map_err(|error| TablebaseError::ProbeFailed {
            material: material.clone(),
            error: Box::new(error),
        })
    }
}

impl From<io::Error> for ProbeError {
    fn from(error: io::Error) -> ProbeError {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => ProbeError::CorruptedTable {
                backtrace: Backtrace::capture(),
            },
            _ => ProbeError::Read { error },
        }
    }
}

/// Return a `CorruptedTable` error.
macro_rules! throw {
    () => {
        return Err(crate::errors::ProbeError::CorruptedTable {
            backtrace: ::std::backtrace::Backtrace::capture(),
        })
    };
}

/// Unwrap an `Option` or return a `CorruptedTable` error.
macro_rules! u {
    ($e:expr) => {
        match $e {
            Some(ok) => ok,
            None => throw!(),
        }
    };
}

/// Ensure that a condition holds. Otherwise return a `CorruptedTable` error.
macro_rules! ensure {
    ($cond:expr) => {
        if !$cond {
            throw!();
        }
    };
}
