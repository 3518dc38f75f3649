//! Whole-game traversal and accuracy headers

use std::time::{Duration, Instant};

use shakmaty::{Color, Position};
use tracing::{debug, error, info, warn};

use super::evaluator::{evaluate_move_from, MoveJudgment};
use super::merger::merge;
use crate::config::AnnotatorConfig;
use crate::engine::{Engine, Evaluation, SearchBudget};
use crate::error::Result;
use crate::pgn::{Game, MoveTree, NodeId};

/// Running centipawn loss of one side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatedLoss {
    pub total: i64,
    pub moves: u32,
}

impl AccumulatedLoss {
    pub fn add(&mut self, cp_loss: i32) {
        self.total += i64::from(cp_loss.max(0));
        self.moves += 1;
    }

    /// Average loss per move, `0` for a side that made no moves
    pub fn average(&self) -> f64 {
        if self.moves == 0 {
            return 0.0;
        }
        self.total as f64 / f64::from(self.moves)
    }
}

/// What a pass over one game produced
#[derive(Debug, Clone, Default)]
pub struct AnnotationSummary {
    pub plies: usize,
    pub notable: usize,
    /// Moves flagged on the first look that a deeper search cleared
    pub cleared: usize,
    pub white: AccumulatedLoss,
    pub black: AccumulatedLoss,
    /// False when the deadline stopped the pass early
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    pub budget: SearchBudget,
    /// Time for searching notable moves again before they are annotated
    pub verify_pool: Option<Duration>,
    /// Checked between plies, never during a search
    pub deadline: Option<Instant>,
    /// Mainline plies left unanalyzed at the start, such as book moves
    pub skip_plies: usize,
    /// Written to the `Annotator` header when the engine reports no name
    pub engine_label: String,
}

impl AnnotateOptions {
    pub fn new(budget: SearchBudget) -> Self {
        AnnotateOptions {
            budget,
            verify_pool: None,
            deadline: None,
            skip_plies: 0,
            engine_label: String::new(),
        }
    }
}

/// Annotates the mainline of `game` in place.
///
/// A move found notable is searched again with a share of the verification
/// pool and annotated only if the deeper search still finds it notable.
/// A timed-out move is retried once. A second failure, or a crash, stops
/// the pass: moves merged so far keep their annotations, the accuracy
/// headers are not written and the error is returned. Running out of time
/// stops cleanly at a ply boundary and still writes the headers.
pub fn annotate<E: Engine + ?Sized>(
    game: &mut Game,
    engine: &mut E,
    config: &AnnotatorConfig,
    options: &AnnotateOptions,
) -> Result<AnnotationSummary> {
    let mainline = game.tree.mainline();
    let plies: Vec<NodeId> = mainline.into_iter().skip(options.skip_plies).collect();
    let total = plies.len();
    info!(game = %game.summary(), plies = total, "annotating game");

    engine.new_game();
    let mut summary = AnnotationSummary {
        complete: true,
        ..Default::default()
    };
    let mut verify_pool = options.verify_pool;
    // Evaluation of the position after the previous move, if one was searched
    let mut carried: Option<Evaluation> = None;

    for (i, node) in plies.into_iter().enumerate() {
        if options.deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(
                analyzed = summary.plies,
                "game time budget exhausted, keeping partial results"
            );
            summary.complete = false;
            break;
        }

        let mut pass = Pass {
            engine: &mut *engine,
            tree: &game.tree,
            config,
            options,
        };
        let judged = pass.judge(node, carried.as_ref()).and_then(|first| {
            pass.recheck(node, first, &mut verify_pool, total - i)
        });
        let judgment = match judged {
            Ok((j, cleared)) => {
                if cleared {
                    summary.cleared += 1;
                }
                j
            }
            Err(e) => {
                error!(
                    game = %game.summary(),
                    ply = summary.plies + options.skip_plies + 1,
                    error = %e,
                    "annotation aborted"
                );
                return Err(e);
            }
        };

        merge(&mut game.tree, node, &judgment, config)?;
        carried = judgment
            .played
            .clone()
            .filter(|after| after.best_move.is_some());

        let loss = judgment.cp_loss.min(config.thresholds.max_cpl);
        match mover(&game.tree, node) {
            Color::White => summary.white.add(loss),
            Color::Black => summary.black.add(loss),
        }
        summary.plies += 1;
        if judgment.notable {
            summary.notable += 1;
        }
    }

    write_headers(game, engine.identity(), options, &summary);
    info!(
        game = %game.summary(),
        white_acpl = summary.white.average(),
        black_acpl = summary.black.average(),
        complete = summary.complete,
        "annotation finished"
    );
    Ok(summary)
}

/// Engine access for one ply
struct Pass<'a, E: ?Sized> {
    engine: &'a mut E,
    tree: &'a MoveTree,
    config: &'a AnnotatorConfig,
    options: &'a AnnotateOptions,
}

impl<E: Engine + ?Sized> Pass<'_, E> {
    fn judge(&mut self, node: NodeId, before: Option<&Evaluation>) -> Result<MoveJudgment> {
        self.judge_with(node, before, self.options.budget)
    }

    fn judge_with(
        &mut self,
        node: NodeId,
        before: Option<&Evaluation>,
        budget: SearchBudget,
    ) -> Result<MoveJudgment> {
        let thresholds = &self.config.thresholds;
        let tree = self.tree;
        match evaluate_move_from(&mut *self.engine, tree, node, before, budget, thresholds) {
            Err(e) if e.is_transient() => {
                warn!(error = %e, "retrying move once");
                evaluate_move_from(&mut *self.engine, tree, node, before, budget, thresholds)
            }
            other => other,
        }
    }

    /// Searches a notable move again, from scratch and deeper. Returns the
    /// judgment to merge and whether the first verdict was overturned.
    fn recheck(
        &mut self,
        node: NodeId,
        first: MoveJudgment,
        pool: &mut Option<Duration>,
        plies_left: usize,
    ) -> Result<(MoveJudgment, bool)> {
        if !first.notable {
            return Ok((first, false));
        }
        let first_budget = self.options.budget;
        let Some(time) = (*pool).and_then(|p| recheck_time(p, plies_left, first_budget)) else {
            return Ok((first, false));
        };
        *pool = (*pool).map(|p| p.saturating_sub(time * 2));

        let deeper = self.judge_with(node, None, SearchBudget::MoveTime(time))?;
        let cleared = !deeper.notable;
        if cleared {
            debug!(
                first_loss = first.cp_loss,
                deeper_loss = deeper.cp_loss,
                "deeper search cleared the move"
            );
        }
        Ok((deeper, cleared))
    }
}

/// Search time for a re-check: the unspent pool shared by the plies still to
/// come, two searches each. `None` when that would not search deeper than
/// the first look.
fn recheck_time(pool: Duration, plies_left: usize, first: SearchBudget) -> Option<Duration> {
    let SearchBudget::MoveTime(first_time) = first else {
        return None;
    };
    let time = pool / (plies_left.max(1) * 2) as u32;
    (time > first_time).then_some(time)
}

fn mover(tree: &MoveTree, node: NodeId) -> Color {
    match tree.node(node).parent() {
        Some(parent) => tree.node(parent).position().turn(),
        None => tree.node(node).position().turn().other(),
    }
}

fn write_headers(
    game: &mut Game,
    identity: &str,
    options: &AnnotateOptions,
    summary: &AnnotationSummary,
) {
    let name = if identity.is_empty() {
        options.engine_label.as_str()
    } else {
        identity
    };
    game.headers
        .set("WhiteACPL", (summary.white.average().round() as i64).to_string());
    game.headers
        .set("BlackACPL", (summary.black.average().round() as i64).to_string());
    if !name.is_empty() {
        game.headers.set("Annotator", name);
        game.tree.node_mut(game.tree.root()).comments.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Score;
    use crate::error::Error;
    use crate::pgn::{parse_pgn_string, write_game};
    use crate::testing::{eval, Fault, ScriptedEngine, BUDGET};

    fn game_of(pgn: &str) -> Game {
        parse_pgn_string(pgn).unwrap().remove(0).unwrap()
    }

    /// White finds the engine move, Black blunders.
    fn two_ply_engine() -> ScriptedEngine {
        ScriptedEngine::new()
            .reply("", eval(Score::Cp(30), 18, "e2e4 e7e5 g1f3"))
            .reply("e2e4", eval(Score::Cp(-30), 18, "e7e5 g1f3 b8c6"))
            .reply("e2e4 f7f6", eval(Score::Cp(400), 18, "d2d4 e7e6"))
    }

    #[test]
    fn test_accumulated_loss_average() {
        let mut loss = AccumulatedLoss::default();
        assert_eq!(loss.average(), 0.0);
        loss.add(30);
        loss.add(0);
        loss.add(-5);
        assert_eq!(loss.moves, 3);
        assert_eq!(loss.average(), 10.0);
    }

    #[test]
    fn test_two_ply_blunder_end_to_end() {
        let mut game = game_of("[White \"A\"]\n[Black \"B\"]\n[Result \"*\"]\n\n1. e4 f6 *\n");
        let mut engine = two_ply_engine();
        let summary = annotate(
            &mut game,
            &mut engine,
            &AnnotatorConfig::default(),
            &AnnotateOptions::new(BUDGET),
        )
        .unwrap();

        assert!(summary.complete);
        assert_eq!(summary.plies, 2);
        assert_eq!(summary.notable, 1);
        assert_eq!(engine.calls.len(), 3);

        let mainline = game.tree.mainline();
        let e4 = game.tree.node(mainline[0]);
        assert!(e4.comments.is_empty());
        assert!(e4.nags.is_empty());
        assert_eq!(e4.variations().len(), 2);
        assert_eq!(game.tree.node(game.tree.root()).variations().len(), 1);

        let f6 = game.tree.node(mainline[1]);
        assert_eq!(f6.nags, vec![4]);

        assert_eq!(game.headers.get("WhiteACPL"), Some("0"));
        assert_eq!(game.headers.get("BlackACPL"), Some("370"));
        assert_eq!(game.headers.get("Annotator"), Some("ScriptedFish"));
        assert_eq!(game.tree.node(game.tree.root()).comments, vec!["ScriptedFish"]);

        let pgn = write_game(&game);
        assert!(
            pgn.contains("{ ScriptedFish } 1. e4 f6 $4 { +4.00 } (1... e5 2. Nf3 Nc6 { +0.30/18 }) *"),
            "{}",
            pgn
        );
    }

    const RECHECK: SearchBudget = SearchBudget::MoveTime(Duration::from_millis(200));

    fn with_recheck_pool() -> AnnotateOptions {
        let mut options = AnnotateOptions::new(BUDGET);
        // f6 is the last ply: it may use half the pool per search
        options.verify_pool = Some(Duration::from_millis(400));
        options
    }

    #[test]
    fn test_deeper_search_clears_flagged_move() {
        let mut game = game_of("\n1. e4 f6 *\n");
        let mut engine = two_ply_engine().reply_with_budget(
            RECHECK,
            "e2e4 f7f6",
            eval(Score::Cp(40), 24, "d2d4"),
        );

        let summary =
            annotate(&mut game, &mut engine, &AnnotatorConfig::default(), &with_recheck_pool())
                .unwrap();

        assert_eq!(summary.notable, 0);
        assert_eq!(summary.cleared, 1);
        assert_eq!(engine.calls.len(), 5);
        assert_eq!(&engine.budgets[3..], &[RECHECK, RECHECK]);

        let mainline = game.tree.mainline();
        let f6 = game.tree.node(mainline[1]);
        assert!(f6.nags.is_empty());
        assert_eq!(f6.comments, vec!["+0.40"]);
        assert_eq!(game.tree.node(mainline[0]).variations().len(), 1);
        assert_eq!(game.headers.get("BlackACPL"), Some("10"));
    }

    #[test]
    fn test_deeper_search_confirms_flagged_move() {
        let mut game = game_of("\n1. e4 f6 *\n");
        let mut engine = two_ply_engine();

        let summary =
            annotate(&mut game, &mut engine, &AnnotatorConfig::default(), &with_recheck_pool())
                .unwrap();

        assert_eq!(summary.notable, 1);
        assert_eq!(summary.cleared, 0);
        assert_eq!(engine.calls.len(), 5);
        let mainline = game.tree.mainline();
        assert_eq!(game.tree.node(mainline[1]).nags, vec![4]);
        assert_eq!(game.tree.node(mainline[0]).variations().len(), 2);
    }

    #[test]
    fn test_small_pool_skips_recheck() {
        let mut game = game_of("\n1. e4 f6 *\n");
        let mut engine = two_ply_engine();
        let mut options = AnnotateOptions::new(BUDGET);
        options.verify_pool = Some(Duration::from_millis(10));

        let summary =
            annotate(&mut game, &mut engine, &AnnotatorConfig::default(), &options).unwrap();
        assert_eq!(summary.notable, 1);
        assert_eq!(engine.calls.len(), 3);
    }

    #[test]
    fn test_position_after_deviation_is_searched_once() {
        let mut game = game_of("\n1. a3 e5 *\n");
        let mut engine = ScriptedEngine::new()
            .reply("", eval(Score::Cp(30), 18, "e2e4"))
            .reply("a2a3", eval(Score::Cp(-10), 18, "e7e5 e2e4"));

        annotate(
            &mut game,
            &mut engine,
            &AnnotatorConfig::default(),
            &AnnotateOptions::new(BUDGET),
        )
        .unwrap();

        assert_eq!(
            engine.calls,
            vec!["position startpos", "position startpos moves a2a3"]
        );
        assert_eq!(game.headers.get("WhiteACPL"), Some("20"));
        assert_eq!(game.headers.get("BlackACPL"), Some("0"));
    }

    #[test]
    fn test_crash_keeps_earlier_annotations() {
        let mut game = game_of("\n1. e4 e5 2. Nf3 Nc6 *\n");
        let mut engine = ScriptedEngine::new()
            .reply("", eval(Score::Cp(30), 18, "e2e4"))
            .reply("e2e4", eval(Score::Cp(-20), 18, "c7c5"))
            .reply("e2e4 e7e5", eval(Score::Cp(40), 18, "g1f3"))
            .fail_at(3, Fault::Crash);

        let err = annotate(
            &mut game,
            &mut engine,
            &AnnotatorConfig::default(),
            &AnnotateOptions::new(BUDGET),
        )
        .unwrap_err();

        assert!(matches!(err, Error::EngineCrashed(_)));
        assert_eq!(game.ply_count(), 4);
        let e5 = game.tree.node(game.tree.mainline()[1]);
        assert_eq!(e5.comments, vec!["+0.40"]);
        assert_eq!(game.headers.get("WhiteACPL"), None);
        assert_eq!(game.headers.get("BlackACPL"), None);
        assert_eq!(game.headers.get("Annotator"), None);
        assert!(game.tree.node(game.tree.root()).comments.is_empty());
    }

    #[test]
    fn test_timeout_is_retried_once() {
        let mut game = game_of("\n1. e4 *\n");
        let mut engine = ScriptedEngine::new()
            .reply("", eval(Score::Cp(30), 18, "e2e4"))
            .fail_at(0, Fault::Timeout);

        let summary = annotate(
            &mut game,
            &mut engine,
            &AnnotatorConfig::default(),
            &AnnotateOptions::new(BUDGET),
        )
        .unwrap();
        assert!(summary.complete);
        assert_eq!(engine.calls.len(), 2);
        assert_eq!(game.headers.get("WhiteACPL"), Some("0"));
    }

    #[test]
    fn test_second_timeout_aborts() {
        let mut game = game_of("\n1. e4 *\n");
        let mut engine = ScriptedEngine::new()
            .fail_at(0, Fault::Timeout)
            .fail_at(1, Fault::Timeout);

        let err = annotate(
            &mut game,
            &mut engine,
            &AnnotatorConfig::default(),
            &AnnotateOptions::new(BUDGET),
        )
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(game.headers.get("WhiteACPL"), None);
    }

    #[test]
    fn test_expired_deadline_keeps_partial_result() {
        let mut game = game_of("\n1. e4 e5 *\n");
        let mut engine = two_ply_engine();
        let mut options = AnnotateOptions::new(BUDGET);
        options.deadline = Some(Instant::now());
        options.engine_label = "stockfish".to_string();
        engine.name.clear();

        let summary =
            annotate(&mut game, &mut engine, &AnnotatorConfig::default(), &options).unwrap();
        assert!(!summary.complete);
        assert_eq!(summary.plies, 0);
        assert!(engine.calls.is_empty());
        assert_eq!(game.headers.get("WhiteACPL"), Some("0"));
        assert_eq!(game.headers.get("Annotator"), Some("stockfish"));
    }

    #[test]
    fn test_skipped_plies_are_not_analyzed() {
        let mut game = game_of("\n1. e4 f6 *\n");
        let mut engine = two_ply_engine();
        let mut options = AnnotateOptions::new(BUDGET);
        options.skip_plies = 1;

        let summary =
            annotate(&mut game, &mut engine, &AnnotatorConfig::default(), &options).unwrap();
        assert_eq!(summary.plies, 1);
        assert_eq!(summary.white.moves, 0);
        assert_eq!(summary.black.moves, 1);
        assert!(!engine.searched().contains("position startpos"));
    }

    #[test]
    fn test_loss_is_capped_for_average() {
        let mut game = game_of("\n1. f3 e5 2. g4 Nc6 *\n");
        let mut engine = ScriptedEngine::new()
            .reply("", eval(Score::Cp(20), 10, "f2f3"))
            .reply("f2f3", eval(Score::Cp(50), 10, "e7e5"))
            .reply("f2f3 e7e5", eval(Score::Cp(-60), 10, "b1c3"))
            .reply("f2f3 e7e5 g2g4", eval(Score::Mate(1), 30, "d8h4"))
            .reply("f2f3 e7e5 g2g4 b8c6", eval(Score::Cp(-200), 10, "g1h3"));

        annotate(
            &mut game,
            &mut engine,
            &AnnotatorConfig::default(),
            &AnnotateOptions::new(BUDGET),
        )
        .unwrap();
        // g4 allows mate and Nc6 misses it: both losses are capped at 2000
        assert_eq!(game.headers.get("WhiteACPL"), Some("1000"));
        assert_eq!(game.headers.get("BlackACPL"), Some("1000"));
    }
}
