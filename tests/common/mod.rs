#![allow(dead_code)]

use std::collections::BTreeMap;

use antisolve::{
    evaluator::{EvalError, EvalEvent, Evaluator, SearchInfo, SearchRequest},
    line::position_key,
    PackedMove, Score, StopHandle,
};
use antisolve_egtb::{
    generate_with_dependencies, representatives, Material, Probe, TableWriter, Tablebase,
};
use crossbeam_channel::Sender;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use shakmaty::{fen::Fen, variant::Antichess, CastlingMode};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub tablebase: Tablebase,
}

pub static RNVK: Lazy<Fixture> = Lazy::new(|| fixture("RNvK"));

pub static KPVK: Lazy<Fixture> = Lazy::new(|| fixture("KPvK"));

fn fixture(material: &str) -> Fixture {
    let dir = tempfile::tempdir().expect("temporary directory");
    let tablebase = generate_with_dependencies(
        &material.parse::<Material>().expect("valid material"),
        dir.path(),
        &TableWriter::new(),
    )
    .expect("generated tables");
    Fixture { dir, tablebase }
}

pub fn pos(fen: &str) -> Antichess {
    fen.parse::<Fen>()
        .expect("valid fen")
        .into_position(CastlingMode::Standard)
        .expect("legal position")
}

/// Picks a won RNvK position that passes `filter`, with a win distance
/// as close to `distance` as the table allows, but not above it.
///
/// Returns the position and its distance.
pub fn win_near(distance: u16, filter: impl Fn(&Antichess) -> bool) -> (Antichess, u16) {
    let tablebase = &RNVK.tablebase;
    let material: Material = "RNvK".parse().expect("valid material");
    let mut wins: BTreeMap<u16, Antichess> = BTreeMap::new();
    for (_, pos) in representatives(&material).expect("representatives") {
        let probe = tablebase.probe(&pos).expect("probe");
        if probe.is_win()
            && probe.distance > 0
            && probe.distance <= distance
            && !wins.contains_key(&probe.distance)
            && filter(&pos)
        {
            wins.insert(probe.distance, pos);
        }
    }
    let (&found, pos) = wins.iter().next_back().expect("won positions");
    assert!(found >= 2, "only trivial wins");
    (pos.clone(), found)
}

/// First position of `material` won in exactly `distance` for the side
/// to move.
pub fn win_in(fixture: &Fixture, material: &str, distance: u16) -> Antichess {
    let material: Material = material.parse().expect("valid material");
    representatives(&material)
        .expect("representatives")
        .into_iter()
        .map(|(_, pos)| pos)
        .find(|pos| fixture.tablebase.probe(pos).expect("probe") == Probe::win(distance))
        .expect("position with the requested distance")
}

/// First RNvK position lost for the side to move.
pub fn lost() -> Antichess {
    let tablebase = &RNVK.tablebase;
    let material: Material = "RNvK".parse().expect("valid material");
    representatives(&material)
        .expect("representatives")
        .into_iter()
        .map(|(_, pos)| pos)
        .find(|pos| tablebase.probe(pos).expect("probe").wdl == antisolve_egtb::Wdl::Loss)
        .expect("lost position")
}

/// Moves with their exact scores, best first. Equal moves keep the order
/// of move generation.
pub fn ranked_moves(tablebase: &Tablebase, pos: &Antichess) -> Vec<(PackedMove, Score)> {
    let mut probes = tablebase.move_probes(pos).expect("move probes");
    probes.sort_by(|a, b| b.1.cmp(&a.1));
    probes
        .iter()
        .map(|(m, probe)| (PackedMove::from(m), Score::from_probe(*probe)))
        .collect()
}

/// An evaluator that answers from endgame tables, so that it always plays
/// a fastest win.
pub struct TablebaseEvaluator {
    tablebase: &'static Tablebase,
    pos: Option<Antichess>,
    scripts: FxHashMap<u64, Vec<(PackedMove, Score)>>,
    stop_after: Option<(usize, StopHandle)>,
    pending: Option<Sender<EvalEvent>>,
    pub searches: usize,
}

impl TablebaseEvaluator {
    pub fn new(tablebase: &'static Tablebase) -> TablebaseEvaluator {
        TablebaseEvaluator {
            tablebase,
            pos: None,
            scripts: FxHashMap::default(),
            stop_after: None,
            pending: None,
            searches: 0,
        }
    }

    /// Report `lines` instead of the table values at `pos`. The first line
    /// is the best move.
    #[must_use]
    pub fn script(mut self, pos: &Antichess, lines: Vec<(PackedMove, Score)>) -> TablebaseEvaluator {
        self.scripts.insert(position_key(pos), lines);
        self
    }

    /// Complete `searches` searches, then request a stop and leave the
    /// next search hanging.
    #[must_use]
    pub fn stop_after(mut self, searches: usize, stop: StopHandle) -> TablebaseEvaluator {
        self.stop_after = Some((searches, stop));
        self
    }
}

impl Evaluator for TablebaseEvaluator {
    fn set_position(&mut self, fen: &str) -> Result<(), EvalError> {
        let fen: Fen = fen
            .parse()
            .map_err(|err| EvalError::Protocol(format!("{err}")))?;
        let pos = fen
            .into_position(CastlingMode::Standard)
            .map_err(|err| EvalError::Protocol(format!("{err}")))?;
        self.pos = Some(pos);
        Ok(())
    }

    fn request_search(
        &mut self,
        request: &SearchRequest,
        events: Sender<EvalEvent>,
    ) -> Result<(), EvalError> {
        if let Some((searches, ref stop)) = self.stop_after {
            if self.searches >= searches {
                stop.stop();
                self.pending = Some(events);
                return Ok(());
            }
        }
        self.searches += 1;

        let pos = self
            .pos
            .as_ref()
            .ok_or_else(|| EvalError::Protocol("no position".to_owned()))?;
        let lines = match self.scripts.get(&position_key(pos)) {
            Some(lines) => lines.clone(),
            None => ranked_moves(self.tablebase, pos),
        };
        for (i, &(m, score)) in lines.iter().take(request.multipv as usize).enumerate() {
            events
                .send(EvalEvent::Info(SearchInfo {
                    depth: 20,
                    multipv: i as u32 + 1,
                    score,
                    pv: vec![m],
                    nodes: 1000,
                    tb_hits: 1000,
                    time_ms: 3,
                }))
                .map_err(|_| EvalError::Closed)?;
        }
        let best = lines.first().map_or(PackedMove::NULL, |&(m, _)| m);
        events
            .send(EvalEvent::BestMove(best))
            .map_err(|_| EvalError::Closed)
    }

    fn stop(&mut self) -> Result<(), EvalError> {
        self.pending = None;
        Ok(())
    }
}
