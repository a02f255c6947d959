use std::{
    ffi::OsStr,
    io::{BufRead as _, BufReader, BufWriter, Write as _},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::{
    evaluator::{EvalError, EvalEvent, Evaluator, SearchInfo, SearchRequest},
    packed::PackedMove,
    score::Score,
};

#[derive(Debug, Default)]
struct Shared {
    events: Option<Sender<EvalEvent>>,
    searching: bool,
    /// Best moves of stopped searches still to come.
    discard: u32,
}

/// An external engine speaking UCI, set up for antichess.
#[derive(Debug)]
pub struct UciEvaluator {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    shared: Arc<Mutex<Shared>>,
    control: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    multipv: u32,
}

impl UciEvaluator {
    /// Start `program` and wait until it is ready.
    pub fn spawn<S, I, A>(program: S, args: I, options: &[(String, String)]) -> Result<UciEvaluator, EvalError>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EvalError::Protocol("no stdin".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EvalError::Protocol("no stdout".to_owned()))?;

        let shared = Arc::new(Mutex::new(Shared::default()));
        let (control_tx, control) = crossbeam_channel::unbounded();
        let reader = spawn_reader(stdout, Arc::clone(&shared), control_tx);

        let mut evaluator = UciEvaluator {
            child,
            stdin: BufWriter::new(stdin),
            shared,
            control,
            reader: Some(reader),
            multipv: 1,
        };

        evaluator.send("uci")?;
        evaluator.wait_for("uciok")?;
        evaluator.send("setoption name UCI_Variant value antichess")?;
        for (name, value) in options {
            evaluator.send(&format!("setoption name {name} value {value}"))?;
        }
        evaluator.send("isready")?;
        evaluator.wait_for("readyok")?;
        Ok(evaluator)
    }

    fn send(&mut self, command: &str) -> Result<(), EvalError> {
        trace!(command, "to evaluator");
        writeln!(self.stdin, "{command}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn wait_for(&self, token: &str) -> Result<(), EvalError> {
        loop {
            let line = self.control.recv().map_err(|_| EvalError::Closed)?;
            if line == token {
                return Ok(());
            }
        }
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Evaluator for UciEvaluator {
    fn set_position(&mut self, fen: &str) -> Result<(), EvalError> {
        self.send(&format!("position fen {fen}"))
    }

    fn request_search(
        &mut self,
        request: &SearchRequest,
        events: Sender<EvalEvent>,
    ) -> Result<(), EvalError> {
        if request.multipv != self.multipv {
            self.send(&format!("setoption name MultiPV value {}", request.multipv))?;
            self.multipv = request.multipv;
        }
        {
            let mut shared = self.shared();
            shared.events = Some(events);
            shared.searching = true;
        }
        let go = match (request.mate, request.nodes) {
            (Some(mate), _) => format!("go mate {mate}"),
            (None, Some(nodes)) => format!("go nodes {nodes}"),
            (None, None) => "go infinite".to_owned(),
        };
        self.send(&go)
    }

    fn stop(&mut self) -> Result<(), EvalError> {
        {
            let mut shared = self.shared();
            shared.events = None;
            if shared.searching {
                shared.searching = false;
                shared.discard += 1;
            }
        }
        self.send("stop")
    }
}

impl Drop for UciEvaluator {
    fn drop(&mut self) {
        let _ = self.send("quit");
        if self.child.wait().is_err() {
            let _ = self.child.kill();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn spawn_reader(stdout: ChildStdout, shared: Arc<Mutex<Shared>>, control: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "reading evaluator output");
                    break;
                }
            };
            let line = line.trim();
            trace!(line, "from evaluator");

            let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if line.starts_with("info") {
                if let (Some(info), Some(events)) = (parse_info(line), &shared.events) {
                    let _ = events.send(EvalEvent::Info(info));
                }
            } else if let Some(rest) = line.strip_prefix("bestmove") {
                if shared.discard > 0 {
                    shared.discard -= 1;
                    continue;
                }
                shared.searching = false;
                let event = match rest.split_whitespace().next().map(str::parse::<PackedMove>) {
                    Some(Ok(m)) => EvalEvent::BestMove(m),
                    _ => EvalEvent::Failed(format!("unexpected best move: {line}")),
                };
                if let Some(events) = shared.events.take() {
                    let _ = events.send(event);
                }
            } else if line == "uciok" || line == "readyok" {
                let _ = control.send(line.to_owned());
            }
        }

        debug!("evaluator output closed");
        let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(events) = shared.events.take() {
            let _ = events.send(EvalEvent::Failed("evaluator exited".to_owned()));
        }
    })
}

/// Parse an `info` line with a score. Bounds and other output are
/// skipped.
///
/// ```
/// use antisolve::{evaluator::parse_info, score::Score};
///
/// let info = parse_info("info depth 24 multipv 1 score mate 3 nodes 1000 pv e2e3 b7b5").unwrap();
/// assert_eq!(info.score, Score::mate_in(3));
/// assert_eq!(info.pv.len(), 2);
/// ```
pub fn parse_info(line: &str) -> Option<SearchInfo> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }

    let mut info = SearchInfo {
        depth: 0,
        multipv: 1,
        score: Score::UNKNOWN,
        pv: Vec::new(),
        nodes: 0,
        tb_hits: 0,
        time_ms: 0,
    };
    let mut scored = false;
    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = btoi::btou(tokens.next()?.as_bytes()).ok()?,
            "multipv" => info.multipv = btoi::btou(tokens.next()?.as_bytes()).ok()?,
            "nodes" => info.nodes = btoi::btou(tokens.next()?.as_bytes()).ok()?,
            "tbhits" => info.tb_hits = btoi::btou(tokens.next()?.as_bytes()).ok()?,
            "time" => info.time_ms = btoi::btou(tokens.next()?.as_bytes()).ok()?,
            "score" => {
                let kind = tokens.next()?;
                let value: i32 = btoi::btoi(tokens.next()?.as_bytes()).ok()?;
                info.score = match kind {
                    "cp" => Score::heuristic(value),
                    "mate" if value > 0 => Score::mate_in(u16::try_from(value).unwrap_or(u16::MAX)),
                    "mate" => Score::mated_in(u16::try_from(-value).unwrap_or(u16::MAX)),
                    _ => return None,
                };
                scored = true;
            }
            "lowerbound" | "upperbound" | "string" => return None,
            "pv" => {
                for m in tokens.by_ref() {
                    info.pv.push(m.parse().ok()?);
                }
            }
            _ => (),
        }
    }
    scored.then_some(info)
}
