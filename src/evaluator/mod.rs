//! Move evaluators.
//!
//! An evaluator searches one position at a time and reports progress over
//! a channel, so that the solver can wait for results and for a stop
//! request at the same time.

mod uci;

use std::{error::Error, fmt, io};

use crossbeam_channel::Sender;

pub use self::uci::{parse_info, UciEvaluator};
use crate::{packed::PackedMove, score::Score};

/// Limits for one search.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SearchRequest {
    /// Number of principal variations.
    pub multipv: u32,
    pub nodes: Option<u64>,
    /// Search for a mate in at most this many moves.
    pub mate: Option<u32>,
}

impl Default for SearchRequest {
    fn default() -> SearchRequest {
        SearchRequest {
            multipv: 1,
            nodes: None,
            mate: None,
        }
    }
}

/// Progress of a search, for one principal variation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SearchInfo {
    pub depth: u32,
    /// 1 for the best line.
    pub multipv: u32,
    /// From the point of view of the side to move.
    pub score: Score,
    pub pv: Vec<PackedMove>,
    pub nodes: u64,
    pub tb_hits: u64,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EvalEvent {
    Info(SearchInfo),
    /// The search is over.
    BestMove(PackedMove),
    /// The search is over without a result.
    Failed(String),
}

/// Error talking to an evaluator.
#[derive(Debug)]
pub enum EvalError {
    Io(io::Error),
    /// Unexpected or missing output.
    Protocol(String),
    /// The evaluator went away.
    Closed,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Io(err) => write!(f, "evaluator i/o error: {err}"),
            EvalError::Protocol(msg) => write!(f, "evaluator protocol error: {msg}"),
            EvalError::Closed => f.write_str("evaluator closed"),
        }
    }
}

impl Error for EvalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EvalError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for EvalError {
    fn from(error: io::Error) -> EvalError {
        EvalError::Io(error)
    }
}

/// A move search.
pub trait Evaluator {
    /// Set the position for the following searches.
    fn set_position(&mut self, fen: &str) -> Result<(), EvalError>;

    /// Start searching. Progress and the final result are sent to
    /// `events`, ending with [`EvalEvent::BestMove`] or
    /// [`EvalEvent::Failed`].
    fn request_search(
        &mut self,
        request: &SearchRequest,
        events: Sender<EvalEvent>,
    ) -> Result<(), EvalError>;

    /// Abandon the current search. No more events are sent for it.
    fn stop(&mut self) -> Result<(), EvalError>;
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn set_position(&mut self, fen: &str) -> Result<(), EvalError> {
        (**self).set_position(fen)
    }

    fn request_search(
        &mut self,
        request: &SearchRequest,
        events: Sender<EvalEvent>,
    ) -> Result<(), EvalError> {
        (**self).request_search(request, events)
    }

    fn stop(&mut self) -> Result<(), EvalError> {
        (**self).stop()
    }
}
