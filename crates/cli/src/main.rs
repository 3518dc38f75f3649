//! Annotates the games of a PGN file with a UCI engine.
//! The annotated games go to stdout, diagnostics to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pgn_annotator_core::{
    annotate_games, parse_pgn_file, write_game, AnnotatorConfig, EngineConfig, EngineSession,
    FailurePolicy, GameBudget, OpeningBook, RunSettings,
};

#[derive(Parser, Debug)]
#[command(name = "annotator", version, about = "Annotate PGN games with a UCI chess engine")]
struct Args {
    /// Input PGN file (never modified)
    #[arg(short, long)]
    file: PathBuf,

    /// Engine command line
    #[arg(short, long, default_value = "stockfish")]
    engine: String,

    /// Time budget per game in minutes
    #[arg(short, long, default_value_t = 1.0)]
    gametime: f64,

    /// Search to a fixed depth instead of splitting the time budget
    #[arg(short, long)]
    depth: Option<u32>,

    /// Search threads per engine (defaults to the CPU count divided by jobs)
    #[arg(short, long)]
    threads: Option<u32>,

    /// Games annotated in parallel, one engine each
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// JSON file with thresholds and policies
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ECO opening book in JSON
    #[arg(long)]
    eco: Option<PathBuf>,

    /// Share of the game time kept for re-checking notable moves
    #[arg(long)]
    verify_share: Option<f64>,

    /// Stop the whole run at the first failed game
    #[arg(long)]
    abort_on_error: bool,

    /// More output on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run finished without being aborted.
fn run(args: &Args) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => AnnotatorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AnnotatorConfig::default(),
    };
    if args.abort_on_error {
        config.failure_policy = FailurePolicy::AbortRun;
    }
    if let Some(share) = args.verify_share {
        config.verify_share = share;
        config.validate()?;
    }

    let book = match &args.eco {
        Some(path) => Some(
            OpeningBook::load(path)
                .with_context(|| format!("failed to load opening book {}", path.display()))?,
        ),
        None => None,
    };

    let budget = GameBudget::from_minutes(args.gametime)?.with_depth(args.depth);
    let jobs = args.jobs.max(1);
    let threads = args
        .threads
        .unwrap_or_else(|| (num_cpus::get() / jobs).max(1) as u32);
    let engine = EngineConfig::from_command_line(&args.engine)?.with_threads(threads);

    let parsed = parse_pgn_file(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let mut games = Vec::with_capacity(parsed.len());
    for (i, game) in parsed.into_iter().enumerate() {
        match game {
            Ok(game) => games.push(game),
            Err(e) => error!(game = i + 1, error = %e, "skipping game"),
        }
    }
    if games.is_empty() {
        warn!("no games to annotate");
        return Ok(true);
    }
    info!(games = games.len(), jobs, threads, engine = %engine.command_line(), "read input");

    let settings = RunSettings {
        config: &config,
        budget,
        book: book.as_ref(),
        engine_label: engine.command_line(),
    };
    let report = annotate_games(games, jobs, || EngineSession::start(&engine), &settings)?;

    for outcome in &report.outcomes {
        println!("{}", write_game(&outcome.game));
    }

    let failed = report.outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        warn!(failed, "some games were not fully annotated");
    }
    Ok(!report.aborted)
}
