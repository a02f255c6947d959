use std::hint::black_box;

use antisolve_egtb::{generate_with_dependencies, TableWriter, Tablebase};
use criterion::{criterion_group, criterion_main, Criterion};
use shakmaty::{fen::Fen, variant::Antichess, CastlingMode};

fn tables() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("temporary directory");
    generate_with_dependencies(
        &"RNvK".parse().expect("valid material"),
        dir.path(),
        &TableWriter::new(),
    )
    .expect("generated tables");
    dir
}

fn bench_add_directory(c: &mut Criterion) {
    let dir = tables();
    c.bench_function("add_directory", |b| {
        b.iter(|| {
            let mut tablebase = Tablebase::new();
            tablebase
                .add_directory(black_box(dir.path()))
                .expect("readable directory");
            tablebase
        })
    });
}

fn bench_probe(c: &mut Criterion) {
    let dir = tables();
    let mut tb = Tablebase::new();
    tb.add_directory(dir.path()).expect("readable directory");

    let pos: Antichess = "8/8/8/3k4/8/8/8/RN6 w - - 0 1"
        .parse::<Fen>()
        .expect("valid fen")
        .into_position(CastlingMode::Standard)
        .expect("legal position");

    c.bench_function("probe", |b| {
        b.iter(|| tb.probe(black_box(&pos)).expect("probe"))
    });
    c.bench_function("move_probes", |b| {
        b.iter(|| tb.move_probes(black_box(&pos)).expect("probe"))
    });
}

criterion_group!(benches, bench_add_directory, bench_probe);
criterion_main!(benches);
