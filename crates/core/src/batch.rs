//! Annotating many games with a pool of engine sessions

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::annotate::{annotate, AnnotateOptions, AnnotationSummary};
use crate::config::{AnnotatorConfig, FailurePolicy, GameBudget};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::opening::OpeningBook;
use crate::pgn::Game;

/// Settings shared by every game of a run
#[derive(Debug, Clone)]
pub struct RunSettings<'a> {
    pub config: &'a AnnotatorConfig,
    pub budget: GameBudget,
    pub book: Option<&'a OpeningBook>,
    /// Used for the `Annotator` header when an engine has no name
    pub engine_label: String,
}

/// One game after its pass, annotated as far as the pass got
#[derive(Debug)]
pub struct GameOutcome {
    pub index: usize,
    pub game: Game,
    pub result: Result<AnnotationSummary>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Processed games in input order
    pub outcomes: Vec<GameOutcome>,
    /// Games never started because the run was aborted
    pub unprocessed: usize,
    pub aborted: bool,
}

/// Annotates `games` on `jobs` worker threads, one engine per worker.
///
/// All engines are started before the first game; if any fails to start the
/// run ends with that error. A worker whose engine crashed or hung replaces
/// it before taking its next game. Under `FailurePolicy::AbortRun` the first
/// failed game stops the hand-out of further games.
pub fn annotate_games<E, F>(
    games: Vec<Game>,
    jobs: usize,
    start_engine: F,
    settings: &RunSettings<'_>,
) -> Result<RunReport>
where
    E: Engine + Send,
    F: Fn() -> Result<E> + Sync,
{
    let total = games.len();
    let jobs = jobs.clamp(1, total.max(1));
    let engines = (0..jobs).map(|_| start_engine()).collect::<Result<Vec<E>>>()?;
    info!(games = total, jobs, "starting annotation run");

    let queue = Mutex::new(games.into_iter().enumerate().collect::<VecDeque<_>>());
    let abort = AtomicBool::new(false);
    let finished = Mutex::new(Vec::with_capacity(total));

    thread::scope(|scope| {
        for engine in engines {
            let queue = &queue;
            let abort = &abort;
            let finished = &finished;
            let start_engine = &start_engine;
            scope.spawn(move || worker(engine, queue, abort, finished, start_engine, settings));
        }
    });

    let mut outcomes = finished.into_inner().unwrap_or_else(|e| e.into_inner());
    outcomes.sort_by_key(|o: &GameOutcome| o.index);
    let unprocessed = total - outcomes.len();
    let aborted = abort.into_inner();
    if aborted {
        warn!(unprocessed, "annotation run aborted");
    }

    Ok(RunReport {
        outcomes,
        unprocessed,
        aborted,
    })
}

fn worker<E, F>(
    mut engine: E,
    queue: &Mutex<VecDeque<(usize, Game)>>,
    abort: &AtomicBool,
    finished: &Mutex<Vec<GameOutcome>>,
    start_engine: &F,
    settings: &RunSettings<'_>,
) where
    E: Engine,
    F: Fn() -> Result<E>,
{
    loop {
        if abort.load(Ordering::SeqCst) {
            return;
        }
        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some((index, mut game)) = next else {
            return;
        };

        let result = annotate_one(&mut game, &mut engine, settings);
        let failed = result.is_err();
        let engine_broken = matches!(
            result,
            Err(Error::EngineCrashed(_)) | Err(Error::EngineTimeout { .. })
        );

        if let Err(e) = &result {
            error!(game = index + 1, error = %e, "game failed");
        }
        finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(GameOutcome {
                index,
                game,
                result,
            });

        if failed && settings.config.failure_policy == FailurePolicy::AbortRun {
            abort.store(true, Ordering::SeqCst);
            return;
        }

        if engine_broken {
            match start_engine() {
                Ok(fresh) => {
                    info!("replaced engine after failure");
                    engine = fresh;
                }
                Err(e) => {
                    error!(error = %e, "could not replace engine, stopping the run");
                    abort.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }
    }
}

fn annotate_one<E: Engine + ?Sized>(
    game: &mut Game,
    engine: &mut E,
    settings: &RunSettings<'_>,
) -> Result<AnnotationSummary> {
    let started = Instant::now();

    let mut skip_plies = 0;
    if let Some(book) = settings.book {
        if let Some(node) = book.classify(game) {
            if settings.config.skip_book_moves {
                skip_plies = game.tree.path(node).len() - 1;
            }
        }
    }

    let plies = game.ply_count().saturating_sub(skip_plies);
    let plan = settings.budget.plan(plies, settings.config.verify_share);
    let mut options = AnnotateOptions::new(plan.search);
    options.verify_pool = plan.verify_pool;
    options.skip_plies = skip_plies;
    options.engine_label = settings.engine_label.clone();
    if settings.budget.depth.is_none() {
        options.deadline = Some(started + settings.budget.game_time);
    }

    annotate(game, engine, settings.config, &options)
}
