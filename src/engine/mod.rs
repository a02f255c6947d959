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

//! Certification of won positions.
//!
//! The solver walks the game tree from a root position. Where the certified
//! side is to move, exactly one move is chosen and followed. Where the
//! opponent is to move, every reply is followed. Every branch must end in a
//! won terminal position, a proof from the book or an excluded branch.

mod assembly;
mod select;
mod session;

use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use antisolve_egtb::{Material, TablebaseError, Tablebase};
use crossbeam_channel::{Receiver, Sender};
use nohash_hasher::IntMap;
use shakmaty::{Color, Position as _};
use tracing::{debug, info, warn};

pub use self::{
    assembly::assemble,
    session::{NodeId, NodeKind, NodeState, Origin, SessionNode, SessionTree},
};
use crate::{
    book::{BookSet, MergeOptions, MergeStats, StoreError},
    config::{SolverConfig, StopPolicy},
    entry::{Entry, Meta},
    evaluator::{EvalError, Evaluator},
    line::{Line, Terminal},
    packed::PackedMove,
    score::Score,
    tree::{SolutionTree, TreeError, WeightCache},
};

/// A reason the position could not be certified.
#[derive(Debug)]
pub enum SolveError {
    /// An oracle or a stored record proposed a move that is not legal.
    IllegalMove { fen: String, mv: PackedMove },
    /// The certified side does not win.
    NotWinning { fen: String },
    /// The opponent has a reply that wins or draws.
    BranchLost { fen: String },
    /// Position repeated on the current branch.
    Repetition { fen: String },
    DepthLimit { fen: String, depth: usize },
    Tablebase(TablebaseError),
    Evaluator(EvalError),
    Store(StoreError),
    Tree(TreeError),
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::IllegalMove { fen, mv } => write!(f, "illegal move {mv} in {fen}"),
            SolveError::NotWinning { fen } => write!(f, "not winning: {fen}"),
            SolveError::BranchLost { fen } => write!(f, "branch lost: {fen}"),
            SolveError::Repetition { fen } => write!(f, "repetition: {fen}"),
            SolveError::DepthLimit { fen, depth } => {
                write!(f, "depth limit {depth} reached: {fen}")
            }
            SolveError::Tablebase(err) => write!(f, "{err}"),
            SolveError::Evaluator(err) => write!(f, "{err}"),
            SolveError::Store(err) => write!(f, "{err}"),
            SolveError::Tree(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SolveError::Tablebase(err) => Some(err),
            SolveError::Evaluator(err) => Some(err),
            SolveError::Store(err) => Some(err),
            SolveError::Tree(err) => Some(err),
            _ => None,
        }
    }
}

/// Why a certification run ended early.
#[derive(Debug)]
pub enum SolveAbort {
    Stopped,
    Fatal(SolveError),
}

impl fmt::Display for SolveAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveAbort::Stopped => f.write_str("stopped"),
            SolveAbort::Fatal(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SolveAbort {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SolveAbort::Stopped => None,
            SolveAbort::Fatal(err) => Some(err),
        }
    }
}

impl From<SolveError> for SolveAbort {
    fn from(err: SolveError) -> SolveAbort {
        SolveAbort::Fatal(err)
    }
}

impl From<StoreError> for SolveAbort {
    fn from(err: StoreError) -> SolveAbort {
        SolveAbort::Fatal(SolveError::Store(err))
    }
}

impl From<EvalError> for SolveAbort {
    fn from(err: EvalError) -> SolveAbort {
        SolveAbort::Fatal(SolveError::Evaluator(err))
    }
}

impl From<TreeError> for SolveAbort {
    fn from(err: TreeError) -> SolveAbort {
        SolveAbort::Fatal(SolveError::Tree(err))
    }
}

/// Cancels a running session from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for StopHandle {
    fn default() -> StopHandle {
        StopHandle::new()
    }
}

impl StopHandle {
    pub fn new() -> StopHandle {
        let (tx, rx) = crossbeam_channel::bounded(1);
        StopHandle {
            flag: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        }
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(());
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Becomes ready when stopped.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Limits for one certification run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Budget {
    /// Arbitration levels still allowed.
    pub alt_steps: u32,
    /// Frames below the root.
    pub depth_limit: usize,
}

/// Result of a completed session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub score: Score,
    /// Positions in the session.
    pub positions: usize,
    /// Records written by assembly.
    pub records: usize,
    pub merge: MergeStats,
}

enum Step {
    Leaf(NodeId),
    Expand(NodeId, Vec<PackedMove>),
}

struct Frame {
    node: NodeId,
    moves: Vec<PackedMove>,
    next: usize,
}

/// What to do at one of our nodes.
pub(crate) enum Decision {
    Leaf(Score, Origin),
    Play(PackedMove, Origin),
}

/// Coordinates the book, the tables, the hint tree and the evaluator.
pub struct Solver<'a, E> {
    config: SolverConfig,
    books: &'a mut BookSet,
    tablebase: Option<&'a Tablebase>,
    special: Vec<Material>,
    tree: Option<&'a SolutionTree>,
    weights: WeightCache,
    evaluator: &'a mut E,
    skips: IntMap<u64, Score>,
    stop: StopHandle,
    winner: Color,
    /// Nesting of throwaway arbitration sessions. Nothing is written to
    /// the books while positive.
    scratch: u32,
}

impl<E> fmt::Debug for Solver<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("config", &self.config)
            .field("winner", &self.winner)
            .field("skips", &self.skips.len())
            .finish_non_exhaustive()
    }
}

impl<'a, E: Evaluator> Solver<'a, E> {
    /// The config must have been validated.
    pub fn new(
        config: SolverConfig,
        books: &'a mut BookSet,
        evaluator: &'a mut E,
        winner: Color,
    ) -> Solver<'a, E> {
        let special = config.special_materials().unwrap_or_default();
        let weights = WeightCache::new(config.weight_cache_bits);
        Solver {
            config,
            books,
            tablebase: None,
            special,
            tree: None,
            weights,
            evaluator,
            skips: IntMap::default(),
            stop: StopHandle::new(),
            winner,
            scratch: 0,
        }
    }

    #[must_use]
    pub fn with_tablebase(mut self, tablebase: &'a Tablebase) -> Solver<'a, E> {
        self.tablebase = Some(tablebase);
        self
    }

    /// Use hints from `tree`. Its opening moves must be a prefix of the
    /// lines passed to the solver.
    #[must_use]
    pub fn with_tree(mut self, tree: &'a SolutionTree) -> Solver<'a, E> {
        self.weights.seed(tree);
        self.tree = Some(tree);
        self
    }

    #[must_use]
    pub fn with_skips(mut self, skips: IntMap<u64, Score>) -> Solver<'a, E> {
        self.skips = skips;
        self
    }

    #[must_use]
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Solver<'a, E> {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Certify the current position of `line` and fold the proof into
    /// the main book.
    ///
    /// On failure the write-ahead records are flushed, so that the next
    /// session can pick up where this one ended.
    pub fn solve(&mut self, line: &mut Line) -> Result<SessionReport, SolveAbort> {
        info!(fen = %line.fen(), winner = ?self.winner, "starting session");
        let mut session = SessionTree::new();
        let budget = Budget {
            alt_steps: self.config.alt_steps,
            depth_limit: self.config.max_depth,
        };
        let score = match self.certify(&mut session, line, budget) {
            Ok(score) => score,
            Err(abort) => {
                if let Err(err) = self.books.flush() {
                    warn!(%err, "flushing books after aborted session");
                }
                info!(positions = session.len(), %abort, "session ended early");
                return Err(abort);
            }
        };

        let records = assemble(&session, self.config.forced_move_tolerance);
        self.books.flush()?;
        let merge = self
            .books
            .main
            .merge_with(&records, &MergeOptions { compact: true })?;
        self.books.alternates.merge(&MergeOptions::default())?;

        info!(%score, positions = session.len(), records = records.len(), "session complete");
        Ok(SessionReport {
            score,
            positions: session.len(),
            records: records.len(),
            merge,
        })
    }

    /// Certify the current position of `line` into `session`.
    ///
    /// Returns the score of the position for the certified side. The line
    /// is restored before returning, also on errors.
    pub fn certify(
        &mut self,
        session: &mut SessionTree,
        line: &mut Line,
        budget: Budget,
    ) -> Result<Score, SolveAbort> {
        let base = line.len();
        let result = self.certify_inner(session, line, budget);
        line.truncate(base);
        result
    }

    fn certify_inner(
        &mut self,
        session: &mut SessionTree,
        line: &mut Line,
        budget: Budget,
    ) -> Result<Score, SolveAbort> {
        let mut stack = match self.enter(session, line, budget)? {
            Step::Leaf(id) => return Ok(session.get(id).score),
            Step::Expand(node, moves) => vec![Frame {
                node,
                moves,
                next: 0,
            }],
        };

        let mut returned: Option<NodeId> = None;
        let mut score = Score::UNKNOWN;
        while let Some(frame) = stack.last_mut() {
            if self.stop.is_stopped() {
                return Err(SolveAbort::Stopped);
            }

            if let Some(child) = returned.take() {
                let m = frame.moves[frame.next - 1];
                session.get_mut(frame.node).children.push((m, child));
                line.pop();
            }

            if frame.next < frame.moves.len() {
                let m = frame.moves[frame.next];
                frame.next += 1;
                let legal = line.find_move(m).ok_or_else(|| SolveError::IllegalMove {
                    fen: line.fen(),
                    mv: m,
                })?;
                line.push(legal);
                if stack.len() > budget.depth_limit {
                    return Err(SolveError::DepthLimit {
                        fen: line.fen(),
                        depth: budget.depth_limit,
                    }
                    .into());
                }
                match self.enter(session, line, budget)? {
                    Step::Leaf(id) => returned = Some(id),
                    Step::Expand(node, moves) => stack.push(Frame {
                        node,
                        moves,
                        next: 0,
                    }),
                }
            } else {
                let node = frame.node;
                stack.pop();
                score = self.finish(session, node);
                returned = Some(node);
            }
        }
        Ok(score)
    }

    fn kind(&self, line: &Line) -> NodeKind {
        if line.pos().turn() == self.winner {
            NodeKind::Ours
        } else {
            NodeKind::Theirs
        }
    }

    fn leaf(session: &mut SessionTree, id: NodeId, score: Score, origin: Origin) -> Step {
        let node = session.get_mut(id);
        node.score = score;
        node.origin = origin;
        node.state = NodeState::Done;
        Step::Leaf(id)
    }

    fn enter(
        &mut self,
        session: &mut SessionTree,
        line: &mut Line,
        budget: Budget,
    ) -> Result<Step, SolveAbort> {
        let key = line.key();
        if let Some(id) = session.find(key) {
            return match session.get(id).state {
                NodeState::Done => {
                    session.mark_transposition(key);
                    Ok(Step::Leaf(id))
                }
                NodeState::Open => Err(SolveError::Repetition { fen: line.fen() }.into()),
            };
        }

        let kind = self.kind(line);
        let stored = self.books.main.lookup(key);
        let id = session.insert(key, kind, stored);
        if session.len() % 10_000 == 0 {
            info!(positions = session.len(), depth = line.len(), "progress");
        }

        if let Some(&score) = self.skips.get(&key) {
            debug!(%score, "excluded branch");
            return Ok(Self::leaf(session, id, score, Origin::Skip));
        }

        match kind {
            NodeKind::Theirs => {
                if line.result().is_some() {
                    return Err(SolveError::BranchLost { fen: line.fen() }.into());
                }
                let moves = line.legal_moves().iter().map(PackedMove::from).collect();
                Ok(Step::Expand(id, moves))
            }
            NodeKind::Ours => {
                match line.result() {
                    Some(Terminal::Won) => {
                        return Ok(Self::leaf(session, id, Score::MATE, Origin::Terminal));
                    }
                    Some(Terminal::Drawn) => {
                        return Err(SolveError::NotWinning { fen: line.fen() }.into());
                    }
                    None => (),
                }
                match self.decide(&*session, line, stored, budget)? {
                    Decision::Leaf(score, origin) => Ok(Self::leaf(session, id, score, origin)),
                    Decision::Play(m, origin) => {
                        session.get_mut(id).origin = origin;
                        Ok(Step::Expand(id, vec![m]))
                    }
                }
            }
        }
    }

    /// Choose the move, or a value, for one of our nodes.
    fn decide(
        &mut self,
        session: &SessionTree,
        line: &mut Line,
        stored: Option<Entry>,
        budget: Budget,
    ) -> Result<Decision, SolveAbort> {
        if let Some(forced) = self.books.overrides.lookup(line.key()) {
            if !forced.mv.is_null() {
                debug!(mv = %forced.mv, "override");
                self.check_legal(line, forced.mv)?;
                return Ok(Decision::Play(forced.mv, Origin::Override));
            }
        }

        if let Some(entry) = stored {
            if entry.meta.is_proof() && entry.score.is_proven() {
                return Ok(Decision::Leaf(entry.score, Origin::Cached(entry)));
            }
            if let (Meta::Engine { depth, version, .. }, Some(stop)) = (entry.meta, self.config.stop.as_ref()) {
                if stop.accepts(entry.score, u32::from(depth), line.piece_count()) && version == self.config.evaluator_version {
                    return Ok(Decision::Leaf(StopPolicy::placeholder(entry.score), Origin::Placeholder(entry.mv)));
                }
            }
            if !entry.mv.is_null() {
                if let Meta::Engine { version, .. } = entry.meta {
                    if version != self.config.evaluator_version {
                        warn!(fen = %line.fen(), version, "replaying move from another evaluator version");
                    }
                }
                self.check_legal(line, entry.mv)?;
                return Ok(Decision::Play(entry.mv, Origin::Replayed(entry)));
            }
        }

        self.find_solution(session, line, budget)
    }

    fn check_legal(&self, line: &Line, m: PackedMove) -> Result<(), SolveError> {
        match line.find_move(m) {
            Some(_) => Ok(()),
            None => Err(SolveError::IllegalMove { fen: line.fen(), mv: m }),
        }
    }

    fn finish(&self, session: &mut SessionTree, id: NodeId) -> Score {
        let node = session.get(id);
        let score = match node.kind {
            NodeKind::Ours => node
                .children
                .first()
                .map_or(Score::UNKNOWN, |&(_, child)| session.get(child).score.parent()),
            NodeKind::Theirs => node
                .children
                .iter()
                .map(|&(_, child)| session.get(child).score)
                .min()
                .unwrap_or(Score::UNKNOWN),
        };

        if node.kind == NodeKind::Theirs {
            if let Some(stored) = node.stored {
                if stored.score.is_proven()
                    && i32::from(stored.score.0) > i32::from(score.0) + i32::from(self.config.forced_move_tolerance)
                {
                    warn!(key = node.key, stored = %stored.score, computed = %score, "stored score better than worst reply");
                }
            }
        }

        let node = session.get_mut(id);
        node.score = score;
        node.state = NodeState::Done;
        score
    }
}
