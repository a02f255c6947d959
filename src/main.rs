use std::{error::Error, path::PathBuf, process::ExitCode};

use antisolve::{
    book::{MergeOptions, SortedBook},
    tree::{NodeRef, WeightCache},
    BookSet, Line, OpeningSpec, SolutionTree, SolveAbort, Solver, StopHandle, UciEvaluator,
};
use antisolve_egtb::{generate_with_dependencies, Material, TableOptions, TableWriter, Tablebase};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Certify antichess wins and maintain the proof books.
#[derive(Parser)]
#[command(name = "antisolve", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Certify the position of an opening file.
    Solve {
        /// Opening file (TOML).
        opening: PathBuf,
        /// Directory holding the books.
        #[arg(long, default_value = ".")]
        books: PathBuf,
        /// Book name. Defaults to the opening name.
        #[arg(long)]
        name: Option<String>,
        /// Directory with endgame tables.
        #[arg(long)]
        tables: Option<PathBuf>,
        /// UCI evaluator executable.
        #[arg(long)]
        engine: PathBuf,
        /// Arguments passed to the evaluator.
        #[arg(long = "engine-arg", allow_hyphen_values = true)]
        engine_args: Vec<String>,
        /// UCI option as `name=value`, may be repeated.
        #[arg(long = "option")]
        options: Vec<String>,
        /// Hint tree, overriding the one named in the opening file.
        #[arg(long)]
        tree: Option<PathBuf>,
    },
    /// Fold the delta files of a book into its canonical files.
    Merge {
        #[arg(long, default_value = ".")]
        books: PathBuf,
        name: String,
        /// Drop records that are not proofs.
        #[arg(long)]
        compact: bool,
    },
    /// Probe the endgame tables.
    Probe {
        #[arg(long)]
        tables: PathBuf,
        fen: String,
    },
    /// Generate an endgame table and the tables it depends on.
    Generate {
        /// Material signature, such as `RNvK`.
        material: String,
        #[arg(long)]
        tables: PathBuf,
        /// Store win/draw/loss only.
        #[arg(long)]
        wdl_only: bool,
    },
    /// Show the hints of a solution tree.
    Tree {
        file: PathBuf,
        /// Moves after the opening of the tree, in UCI.
        moves: Vec<String>,
        /// Print the whole tree.
        #[arg(long)]
        dump: bool,
    },
    /// List the records of a canonical book file.
    Dump {
        file: PathBuf,
        /// Only the record for this position.
        #[arg(long)]
        fen: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Solve {
            opening,
            books,
            name,
            tables,
            engine,
            engine_args,
            options,
            tree,
        } => {
            let spec = OpeningSpec::load(&opening)?;
            let name = name.unwrap_or_else(|| spec.name.clone());
            let mut books = BookSet::open(&books, &name)?;

            let mut tablebase = Tablebase::new();
            tablebase.set_options(TableOptions {
                cache_chunks: spec.solver.cache_chunks,
                ..TableOptions::default()
            });
            if let Some(dir) = tables {
                let added = tablebase.add_directory(&dir)?;
                info!(added, max_pieces = tablebase.max_pieces(), "tables");
            }

            let tree = match tree.or_else(|| spec.tree.clone()) {
                Some(path) => Some(SolutionTree::open(path)?),
                None => None,
            };

            let options = options
                .iter()
                .map(|option| match option.split_once('=') {
                    Some((name, value)) => Ok((name.to_owned(), value.to_owned())),
                    None => Err(format!("expected name=value, got {option:?}")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut evaluator = UciEvaluator::spawn(&engine, &engine_args, &options)?;

            let stop = StopHandle::new();
            let handler = stop.clone();
            ctrlc::set_handler(move || {
                warn!("interrupted, stopping session");
                handler.stop();
            })?;

            let delta = books.main.delta_path().to_owned();
            let mut line = spec.root_line()?;
            let mut solver = Solver::new(spec.solver.clone(), &mut books, &mut evaluator, spec.winner)
                .with_skips(spec.skips())
                .with_stop_handle(stop);
            if tablebase.max_pieces() > 0 {
                solver = solver.with_tablebase(&tablebase);
            }
            if let Some(tree) = tree.as_ref() {
                solver = solver.with_tree(tree);
            }

            match solver.solve(&mut line) {
                Ok(report) => {
                    println!(
                        "{}: {} ({} positions, {} records)",
                        spec.name, report.score, report.positions, report.records
                    );
                    Ok(())
                }
                Err(SolveAbort::Stopped) => {
                    println!("{}: stopped, progress kept in {}", spec.name, delta.display());
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
        Command::Merge { books, name, compact } => {
            let mut books = BookSet::open(&books, &name)?;
            let options = MergeOptions { compact };
            for (label, store) in [
                ("main", &mut books.main),
                ("override", &mut books.overrides),
                ("alternate", &mut books.alternates),
            ] {
                let stats = store.merge(&options)?;
                println!(
                    "{label}: {} records ({} merged, {} dropped)",
                    stats.records, stats.merged, stats.dropped
                );
            }
            Ok(())
        }
        Command::Probe { tables, fen } => {
            let mut tablebase = Tablebase::new();
            tablebase.add_directory(&tables)?;
            let line = Line::from_fen(&fen)?;
            println!("{}", tablebase.probe(line.pos())?);
            let mut probes = tablebase.move_probes(line.pos())?;
            probes.sort_by(|a, b| b.1.cmp(&a.1));
            for (m, probe) in probes {
                println!("{} {}", antisolve::PackedMove::from(&m), probe);
            }
            Ok(())
        }
        Command::Generate {
            material,
            tables,
            wdl_only,
        } => {
            let material: Material = material.parse()?;
            std::fs::create_dir_all(&tables)?;
            let writer = TableWriter::new().dtz(!wdl_only);
            let tablebase = generate_with_dependencies(&material, &tables, &writer)?;
            println!("{} ({} pieces)", material.into_normalized(), tablebase.max_pieces());
            Ok(())
        }
        Command::Tree { file, moves, dump } => {
            let tree = SolutionTree::open(&file)?;
            let mut cache = WeightCache::default();
            cache.seed(&tree);
            if dump {
                return dump_tree(&tree, &mut cache);
            }
            let moves = moves
                .iter()
                .map(|m| m.parse())
                .collect::<Result<Vec<antisolve::PackedMove>, _>>()?;
            let mut hints = tree.query(&moves, &mut cache)?;
            hints.sort_by(|a, b| b.1.cmp(&a.1));
            for (m, weight) in hints {
                println!("{m} {weight}");
            }
            Ok(())
        }
        Command::Dump { file, fen } => {
            let book = SortedBook::open(&file)?;
            match fen {
                Some(fen) => {
                    let key = Line::from_fen(&fen)?.key();
                    match book.lookup(key) {
                        Some(entry) => println!("{key:016x} {} {} {:?}", entry.mv, entry.score, entry.meta),
                        None => println!("{key:016x} not found"),
                    }
                }
                None => {
                    for entry in book.iter() {
                        println!("{:016x} {} {} {:?}", entry.key, entry.mv, entry.score, entry.meta);
                    }
                }
            }
            Ok(())
        }
    }
}

fn dump_tree(tree: &SolutionTree, cache: &mut WeightCache) -> Result<(), Box<dyn Error>> {
    let opening: Vec<String> = tree.opening_moves().iter().map(|m| m.to_string()).collect();
    println!("opening: {} ({} nodes)", opening.join(" "), tree.node_count());

    let mut stack: Vec<(NodeRef, usize)> = tree.roots().map(|node| (node, 0)).collect();
    stack.reverse();
    while let Some((node, depth)) = stack.pop() {
        let weight = tree.weight(node, cache)?;
        match tree.transposition(node) {
            Some(target) => println!("{:indent$}{} {weight} -> {}", "", tree.mv(node), target.0, indent = depth * 2),
            None => println!("{:indent$}{} {weight}", "", tree.mv(node), indent = depth * 2),
        }
        if tree.transposition(node).is_none() {
            let mut children: Vec<_> = tree.children(node).map(|child| (child, depth + 1)).collect();
            children.reverse();
            stack.extend(children);
        }
    }
    Ok(())
}
