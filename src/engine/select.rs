use antisolve_egtb::Material;
use crossbeam_channel::select;
use shakmaty::Position as _;
use tracing::{debug, warn};

use crate::{
    config::StopPolicy,
    engine::{Budget, Decision, Origin, SessionTree, SolveAbort, SolveError, Solver},
    entry::{Entry, Meta},
    evaluator::{EvalError, EvalEvent, Evaluator, SearchInfo},
    line::{position_key, Line},
    packed::PackedMove,
    score::Score,
};

/// Final state of one evaluator search.
struct Search {
    best: PackedMove,
    /// Last update per principal variation, best first.
    lines: Vec<SearchInfo>,
}

impl Search {
    fn score_of(&self, m: PackedMove) -> Option<Score> {
        self.lines
            .iter()
            .find(|info| info.pv.first() == Some(&m))
            .map(|info| info.score)
    }

    fn main_line(&self) -> Option<&SearchInfo> {
        self.lines
            .iter()
            .find(|info| info.pv.first() == Some(&self.best))
            .or_else(|| self.lines.first())
    }
}

impl<E: Evaluator> Solver<'_, E> {
    fn use_tablebase(&self, line: &Line) -> bool {
        line.piece_count() <= self.config.egtb_pieces
            || (!self.special.is_empty()
                && self
                    .special
                    .contains(&Material::from_board(line.pos().board()).into_normalized()))
    }

    pub(crate) fn find_solution(
        &mut self,
        session: &SessionTree,
        line: &mut Line,
        budget: Budget,
    ) -> Result<Decision, SolveAbort> {
        if let Some(tablebase) = self.tablebase.filter(|_| self.use_tablebase(line)) {
            match tablebase.move_probes(line.pos()) {
                Ok(probes) => {
                    let best = probes.iter().map(|&(_, probe)| probe).max();
                    let Some(best) = best.filter(|probe| probe.is_win()) else {
                        return Err(SolveError::NotWinning { fen: line.fen() }.into());
                    };
                    let m = probes
                        .iter()
                        .filter(|&&(_, probe)| probe == best)
                        .map(|(m, _)| (self.uncached_replies(session, line, m), PackedMove::from(m)))
                        .min_by_key(|&(uncached, _)| uncached)
                        .map(|(_, m)| m);
                    if let Some(m) = m {
                        debug!(%m, probe = %best, "tablebase move");
                        return Ok(Decision::Play(m, Origin::Tablebase));
                    }
                }
                Err(err) if err.is_missing() => {
                    warn!(fen = %line.fen(), %err, "falling back to evaluator");
                }
                Err(err) => return Err(SolveError::Tablebase(err).into()),
            }
        }

        let hint = self.hint(line)?;
        let search = self.search(line)?;
        let e = search.best;
        if line.find_move(e).is_none() {
            return Err(SolveError::IllegalMove { fen: line.fen(), mv: e }.into());
        }
        let info = search.main_line();
        let s = info.map_or(Score::UNKNOWN, |info| info.score);
        let depth = info.map_or(0, |info| info.depth);
        let time = info.map_or(0, |info| info.time_ms / 1000);

        if let Some(stop) = self.config.stop.as_ref() {
            if stop.accepts(s, depth, line.piece_count()) {
                debug!(%e, %s, depth, "accepting evaluator score");
                self.write_ahead(line, e, s, depth, time)?;
                return Ok(Decision::Leaf(StopPolicy::placeholder(s), Origin::Placeholder(e)));
            }
        }

        let chosen = match hint {
            Some(h) if h != e && line.find_move(h).is_some() => {
                let h_score = search.score_of(h);
                if s.0 < self.config.trust_threshold {
                    debug!(%h, %e, %s, "evaluator not confident, following hint");
                    h
                } else if h_score.is_some_and(|score| score.0 >= self.config.trust_threshold)
                    && budget.alt_steps > 0
                {
                    self.arbitrate(line, h, e, budget)?
                } else {
                    debug!(%h, %e, %s, "overruling hint");
                    e
                }
            }
            _ => e,
        };

        let score = search.score_of(chosen).unwrap_or(s);
        self.write_ahead(line, chosen, score, depth, time)?;
        Ok(Decision::Play(chosen, Origin::Evaluator))
    }

    fn write_ahead(
        &mut self,
        line: &Line,
        mv: PackedMove,
        score: Score,
        depth: u32,
        time: u64,
    ) -> Result<(), SolveAbort> {
        if self.scratch > 0 {
            return Ok(());
        }
        self.books.main.append(Entry {
            key: line.key(),
            mv,
            score,
            meta: Meta::engine(depth, self.config.evaluator_version, time),
        })?;
        Ok(())
    }

    /// Replies to `m` that lead to positions neither in the session nor in
    /// the book.
    fn uncached_replies(&self, session: &SessionTree, line: &Line, m: &shakmaty::Move) -> usize {
        let mut after = line.pos().clone();
        after.play_unchecked(m);
        after
            .legal_moves()
            .iter()
            .filter(|reply| {
                let mut pos = after.clone();
                pos.play_unchecked(reply);
                let key = position_key(&pos);
                !session.contains(key) && self.books.main.lookup(key).is_none()
            })
            .count()
    }

    /// The tree move with the largest subtree.
    fn hint(&mut self, line: &Line) -> Result<Option<PackedMove>, SolveAbort> {
        let Some(tree) = self.tree else {
            return Ok(None);
        };
        let moves = line.packed_moves();
        let Some(rest) = moves.strip_prefix(tree.opening_moves()) else {
            return Ok(None);
        };
        let hints = tree.query(rest, &mut self.weights)?;
        let mut best: Option<(PackedMove, u32)> = None;
        for (m, weight) in hints {
            if best.map_or(true, |(_, w)| weight > w) {
                best = Some((m, weight));
            }
        }
        Ok(best.map(|(m, _)| m))
    }

    fn search(&mut self, line: &Line) -> Result<Search, SolveAbort> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.evaluator.set_position(&line.fen())?;
        self.evaluator
            .request_search(&self.config.search_request(), tx)?;

        let mut lines: Vec<SearchInfo> = Vec::new();
        let stop = self.stop.receiver().clone();
        loop {
            select! {
                recv(rx) -> event => match event {
                    Ok(EvalEvent::Info(info)) => {
                        let slot = lines.iter_mut().find(|other| other.multipv == info.multipv);
                        match slot {
                            Some(slot) => *slot = info,
                            None => lines.push(info),
                        }
                    }
                    Ok(EvalEvent::BestMove(best)) => {
                        lines.sort_by_key(|info| info.multipv);
                        debug!(%best, lines = lines.len(), "evaluator done");
                        return Ok(Search { best, lines });
                    }
                    Ok(EvalEvent::Failed(msg)) => {
                        return Err(EvalError::Protocol(msg).into());
                    }
                    Err(_) => return Err(EvalError::Closed.into()),
                },
                recv(stop) -> _ => {
                    self.evaluator.stop()?;
                    return Err(SolveAbort::Stopped);
                }
            }
        }
    }

    /// Certify both candidates in throwaway sessions and keep the better.
    fn arbitrate(
        &mut self,
        line: &mut Line,
        h: PackedMove,
        e: PackedMove,
        budget: Budget,
    ) -> Result<PackedMove, SolveAbort> {
        let key = line.key();
        if let Some(rejected) = self.books.alternates.lookup(key) {
            if rejected.mv == e {
                debug!(%h, %e, "evaluator move rejected before");
                return Ok(h);
            } else if rejected.mv == h {
                debug!(%h, %e, "hint rejected before");
                return Ok(e);
            }
        }

        let inner = Budget {
            alt_steps: (budget.alt_steps - 1).min(self.config.max_alt_steps),
            depth_limit: self.config.alt_depth,
        };
        let h_score = self.try_move(line, h, inner)?;
        let e_score = self.try_move(line, e, inner)?;

        let tolerance = i32::from(self.config.alt_tolerance);
        let (chosen, loser, loser_score) = match (h_score, e_score) {
            (Some(hs), Some(es)) if i32::from(es.0) > i32::from(hs.0) + tolerance => (e, h, hs),
            (None, Some(_)) => (e, h, Score::UNKNOWN),
            (_, es) => (h, e, es.unwrap_or(Score::UNKNOWN)),
        };
        debug!(%h, %e, ?h_score, ?e_score, %chosen, "arbitrated");

        if self.scratch == 0 {
            self.books.alternates.append(Entry {
                key,
                mv: loser,
                score: loser_score,
                meta: Meta::Solved,
            })?;
        }
        Ok(chosen)
    }

    /// Score of playing `m`, if it can be certified within `budget`.
    fn try_move(&mut self, line: &mut Line, m: PackedMove, budget: Budget) -> Result<Option<Score>, SolveAbort> {
        let Some(legal) = line.find_move(m) else {
            return Ok(None);
        };
        line.push(legal);
        let mut scratch = SessionTree::new();
        self.scratch += 1;
        let result = self.certify(&mut scratch, line, budget);
        self.scratch -= 1;
        line.pop();
        match result {
            Ok(score) => Ok(Some(score.parent())),
            Err(SolveAbort::Stopped) => Err(SolveAbort::Stopped),
            Err(SolveAbort::Fatal(err)) => {
                debug!(%m, %err, "candidate not certified");
                Ok(None)
            }
        }
    }
}
