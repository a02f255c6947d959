mod common;

use std::{fs, io::Write as _, path::Path};

use antisolve::{
    book::SortedBook,
    entry::is_book_sorted,
    line::{position_key, terminal},
    BookSet, Entry, Line, Meta, PackedMove, Score, SessionReport, SolutionTree, SolveAbort,
    SolveError, Solver, SolverConfig, StopHandle, TreeWriter,
};
use antisolve_egtb::Probe;
use common::{ranked_moves, win_in, win_near, Fixture, TablebaseEvaluator, KPVK, RNVK};
use shakmaty::{variant::Antichess, Color, Position};

fn config(egtb_pieces: usize) -> SolverConfig {
    SolverConfig {
        egtb_pieces,
        ..SolverConfig::default()
    }
}

/// The two best moves are equally fast wins.
fn tied_win() -> (Antichess, u16, PackedMove, PackedMove) {
    let (root, distance) = win_near(5, |pos| {
        let ranked = ranked_moves(&RNVK.tablebase, pos);
        ranked.len() >= 2 && ranked[0].1 == ranked[1].1
    });
    let ranked = ranked_moves(&RNVK.tablebase, &root);
    (root, distance, ranked[0].0, ranked[1].0)
}

/// Walks the certified tree through the book and checks that every score
/// follows from the scores below it.
fn assert_consistent(book: &SortedBook, root: &Antichess, winner: Color) {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![root.clone()];
    while let Some(pos) = stack.pop() {
        let key = position_key(&pos);
        if !seen.insert(key) {
            continue;
        }
        let entry = book.lookup(key).expect("record for certified position");
        if terminal(&pos).is_some() {
            assert_eq!(pos.turn(), winner);
            assert_eq!(entry.score, Score::MATE);
            continue;
        }

        if pos.turn() == winner {
            let m = entry.mv.to_move(&pos).expect("legal book move");
            let mut child = pos.clone();
            child.play_unchecked(&m);
            let reply = book.lookup(position_key(&child)).expect("record for reply node");
            assert_eq!(entry.score, reply.score.parent());
            stack.push(child);
        } else {
            let mut worst = None;
            for m in &pos.legal_moves() {
                let mut child = pos.clone();
                child.play_unchecked(m);
                let score = book.lookup(position_key(&child)).expect("record for every reply").score;
                worst = Some(worst.map_or(score, |w: Score| w.min(score)));
                stack.push(child);
            }
            assert_eq!(Some(entry.score), worst);
        }
    }
}

fn certify_from_tables(fixture: &'static Fixture, root: Antichess, distance: u16) {
    let tablebase = &fixture.tablebase;
    assert_eq!(tablebase.probe(&root).expect("probe"), Probe::win(distance));

    let dir = tempfile::tempdir().expect("temporary directory");
    let mut books = BookSet::open(dir.path(), "tables").expect("books");
    let mut evaluator = TablebaseEvaluator::new(tablebase);
    let mut line = Line::new(root.clone());
    let report = Solver::new(config(3), &mut books, &mut evaluator, root.turn())
        .with_tablebase(tablebase)
        .solve(&mut line)
        .expect("certified");

    assert_eq!(report.score, Score::mate_in(distance));
    assert_eq!(evaluator.searches, 0);
    assert!(line.is_empty());

    let canonical = books.main.canonical();
    assert_eq!(canonical.len(), report.records);
    assert!(is_book_sorted(&canonical.iter().collect::<Vec<_>>()));
    assert_consistent(canonical, &root, root.turn());
}

#[test]
fn test_certify_pawn_ending_from_tables() {
    let root = win_in(&KPVK, "KPvK", 5);
    certify_from_tables(&KPVK, root, 5);
}

#[test]
fn test_certify_from_tables() {
    let (root, distance) = win_near(5, |_| true);
    certify_from_tables(&RNVK, root, distance);
}

#[test]
fn test_certify_reply_node() {
    let tablebase = &RNVK.tablebase;
    let root = common::lost();
    let probe = tablebase.probe(&root).expect("probe");

    let dir = tempfile::tempdir().expect("temporary directory");
    let mut books = BookSet::open(dir.path(), "rnvk").expect("books");
    let mut evaluator = TablebaseEvaluator::new(tablebase);
    let mut line = Line::new(root.clone());
    let report = Solver::new(config(3), &mut books, &mut evaluator, !root.turn())
        .with_tablebase(tablebase)
        .solve(&mut line)
        .expect("certified");

    assert_eq!(report.score, Score::mate_in(probe.distance));
    assert_consistent(books.main.canonical(), &root, !root.turn());
}

#[test]
fn test_not_winning() {
    let tablebase = &RNVK.tablebase;
    let root = common::lost();

    let dir = tempfile::tempdir().expect("temporary directory");
    let mut books = BookSet::open(dir.path(), "rnvk").expect("books");
    let mut evaluator = TablebaseEvaluator::new(tablebase);
    let mut line = Line::new(root.clone());
    let result = Solver::new(config(3), &mut books, &mut evaluator, root.turn())
        .with_tablebase(tablebase)
        .solve(&mut line);

    assert!(matches!(result, Err(SolveAbort::Fatal(SolveError::NotWinning { .. }))));
    assert!(books.main.canonical().is_empty());
}

#[test]
fn test_depth_limit() {
    let tablebase = &RNVK.tablebase;
    let (root, _) = win_near(5, |_| true);

    let dir = tempfile::tempdir().expect("temporary directory");
    let mut books = BookSet::open(dir.path(), "rnvk").expect("books");
    let mut evaluator = TablebaseEvaluator::new(tablebase);
    let mut line = Line::new(root.clone());
    let result = Solver::new(
        SolverConfig {
            max_depth: 2,
            ..config(3)
        },
        &mut books,
        &mut evaluator,
        root.turn(),
    )
    .with_tablebase(tablebase)
    .solve(&mut line);

    assert!(matches!(
        result,
        Err(SolveAbort::Fatal(SolveError::DepthLimit { depth: 2, .. }))
    ));
    assert!(line.is_empty());
}

fn solve_with_hint(
    root: &Antichess,
    hint: PackedMove,
    evaluator: &mut TablebaseEvaluator,
    config: SolverConfig,
    dir: &Path,
) -> (BookSet, SessionReport) {
    let mut writer = TreeWriter::new(Vec::new());
    writer.insert(&[hint]);
    let tree = SolutionTree::from_bytes(writer.to_bytes().expect("tree bytes")).expect("tree");

    let mut books = BookSet::open(dir, "rnvk").expect("books");
    let mut line = Line::new(root.clone());
    let report = Solver::new(config, &mut books, evaluator, root.turn())
        .with_tree(&tree)
        .solve(&mut line)
        .expect("certified");
    (books, report)
}

#[test]
fn test_confident_evaluator_overrules_weak_hint() {
    let (root, distance, e, h) = tied_win();
    let evaluator = TablebaseEvaluator::new(&RNVK.tablebase);
    let mut evaluator = evaluator.script(&root, vec![(e, Score::mate_in(distance)), (h, Score(500))]);

    let dir = tempfile::tempdir().expect("temporary directory");
    let config = SolverConfig {
        alt_steps: 1,
        ..config(0)
    };
    let (books, report) = solve_with_hint(&root, h, &mut evaluator, config, dir.path());

    assert_eq!(report.score, Score::mate_in(distance));
    let record = books.main.canonical().lookup(position_key(&root)).expect("root record");
    assert_eq!(record.mv, e);
    assert!(books.alternates.canonical().is_empty());
}

#[test]
fn test_unsure_evaluator_follows_hint() {
    let (root, distance, e, h) = tied_win();
    let evaluator = TablebaseEvaluator::new(&RNVK.tablebase);
    let mut evaluator = evaluator.script(&root, vec![(e, Score(500)), (h, Score(400))]);

    let dir = tempfile::tempdir().expect("temporary directory");
    let (books, report) = solve_with_hint(&root, h, &mut evaluator, config(0), dir.path());

    assert_eq!(report.score, Score::mate_in(distance));
    let record = books.main.canonical().lookup(position_key(&root)).expect("root record");
    assert_eq!(record.mv, h);
}

#[test]
fn test_arbitration_keeps_equal_hint() {
    let (root, distance, e, h) = tied_win();
    let evaluator = TablebaseEvaluator::new(&RNVK.tablebase);
    let mut evaluator = evaluator.script(
        &root,
        vec![(e, Score::mate_in(distance)), (h, Score::mate_in(distance))],
    );

    let dir = tempfile::tempdir().expect("temporary directory");
    let config = SolverConfig {
        alt_steps: 1,
        alt_depth: 400,
        ..config(0)
    };
    let (books, report) = solve_with_hint(&root, h, &mut evaluator, config, dir.path());

    assert_eq!(report.score, Score::mate_in(distance));
    // Nothing from the throwaway sessions reaches the book.
    assert_eq!(books.main.canonical().len(), report.records);
    let key = position_key(&root);
    assert_eq!(books.main.canonical().lookup(key).expect("root record").mv, h);
    assert_eq!(
        books.alternates.canonical().lookup(key),
        Some(Entry {
            key,
            mv: e,
            score: Score::mate_in(distance),
            meta: Meta::Solved,
        })
    );
}

#[test]
fn test_override() {
    let (root, distance, e, h) = tied_win();
    let dir = tempfile::tempdir().expect("temporary directory");
    let key = position_key(&root);
    {
        let mut books = BookSet::open(dir.path(), "rnvk").expect("books");
        books
            .overrides
            .append(Entry {
                key,
                mv: h,
                score: Score::UNKNOWN,
                meta: Meta::Overridden,
            })
            .expect("append");
        books.flush().expect("flush");
    }

    let mut books = BookSet::open(dir.path(), "rnvk").expect("books");
    let mut evaluator = TablebaseEvaluator::new(&RNVK.tablebase);
    let mut line = Line::new(root.clone());
    let report = Solver::new(config(0), &mut books, &mut evaluator, root.turn())
        .solve(&mut line)
        .expect("certified");

    assert_eq!(report.score, Score::mate_in(distance));
    let record = books.main.canonical().lookup(key).expect("root record");
    assert_eq!(record.mv, h);
    assert_ne!(record.mv, e);
}

fn run_session(
    dir: &Path,
    root: &Antichess,
    evaluator: &mut TablebaseEvaluator,
    stop: Option<StopHandle>,
) -> Result<SessionReport, SolveAbort> {
    let mut books = BookSet::open(dir, "rnvk").expect("books");
    let mut line = Line::new(root.clone());
    let mut solver = Solver::new(config(0), &mut books, evaluator, root.turn());
    if let Some(stop) = stop {
        solver = solver.with_stop_handle(stop);
    }
    let result = solver.solve(&mut line);
    assert!(line.is_empty());
    result
}

#[test]
fn test_resume_after_interrupt() {
    let tablebase = &RNVK.tablebase;
    let (root, distance) = win_near(5, |_| true);

    let reference = tempfile::tempdir().expect("temporary directory");
    let mut evaluator = TablebaseEvaluator::new(tablebase);
    let report = run_session(reference.path(), &root, &mut evaluator, None).expect("certified");
    assert_eq!(report.score, Score::mate_in(distance));
    assert!(evaluator.searches > 2);

    let resumed = tempfile::tempdir().expect("temporary directory");
    let stop = StopHandle::new();
    let mut evaluator = TablebaseEvaluator::new(tablebase).stop_after(2, stop.clone());
    match run_session(resumed.path(), &root, &mut evaluator, Some(stop)) {
        Err(SolveAbort::Stopped) => (),
        other => panic!("expected stop, got {other:?}"),
    }

    // Two evaluator choices were written ahead, then a record was torn.
    let delta = resumed.path().join("rnvk.new.delta");
    assert_eq!(fs::metadata(&delta).expect("delta").len(), 2 * Entry::SIZE as u64);
    assert_eq!(
        fs::metadata(resumed.path().join("rnvk.book")).map_or(0, |m| m.len()),
        0
    );
    fs::OpenOptions::new()
        .append(true)
        .open(&delta)
        .expect("open delta")
        .write_all(&[0xab; 7])
        .expect("torn record");

    let mut evaluator = TablebaseEvaluator::new(tablebase);
    let report = run_session(resumed.path(), &root, &mut evaluator, None).expect("certified");
    assert_eq!(report.score, Score::mate_in(distance));

    let expected = fs::read(reference.path().join("rnvk.book")).expect("reference book");
    let actual = fs::read(resumed.path().join("rnvk.book")).expect("resumed book");
    assert!(!expected.is_empty());
    assert_eq!(actual, expected);
}
