//! Per-move evaluation: how much did the played move cost?

use shakmaty::{KnownOutcome, Outcome, Position};
use tracing::debug;

use super::classify::{is_notable, Glyph};
use crate::config::Thresholds;
use crate::engine::{Engine, Evaluation, Score, SearchBudget};
use crate::error::{Error, Result};
use crate::pgn::{MoveTree, NodeId};

/// The verdict on one played move
#[derive(Debug, Clone)]
pub struct MoveJudgment {
    /// Engine's evaluation of the position before the move
    pub best: Evaluation,
    /// Evaluation of the position after the played move, `None` when the
    /// played move was the engine's choice and no second search was needed
    pub played: Option<Evaluation>,
    /// Value of the best move for the mover
    pub best_value: i32,
    /// Value of the played move for the mover
    pub played_value: i32,
    /// `best_value - played_value`, never negative
    pub cp_loss: i32,
    pub notable: bool,
    pub glyph: Option<Glyph>,
}

impl MoveJudgment {
    pub fn matched_best(&self) -> bool {
        self.played.is_none()
    }
}

/// Evaluates the mainline or variation move leading to `node`.
///
/// Searches the position before the move; only when the played move differs
/// from the engine's choice is the position after it searched as well.
/// Positions that are already decided after the move are scored without the
/// engine.
pub fn evaluate_move<E: Engine + ?Sized>(
    engine: &mut E,
    tree: &MoveTree,
    node: NodeId,
    budget: SearchBudget,
    thresholds: &Thresholds,
) -> Result<MoveJudgment> {
    evaluate_move_from(engine, tree, node, None, budget, thresholds)
}

/// Like [`evaluate_move`], but takes `before`, an evaluation of the position
/// before the move that is already at hand, instead of searching it again.
pub fn evaluate_move_from<E: Engine + ?Sized>(
    engine: &mut E,
    tree: &MoveTree,
    node: NodeId,
    before: Option<&Evaluation>,
    budget: SearchBudget,
    thresholds: &Thresholds,
) -> Result<MoveJudgment> {
    let move_node = tree.node(node);
    let (parent, mv) = match (move_node.parent(), move_node.mv()) {
        (Some(parent), Some(mv)) => (parent, mv),
        _ => return Err(Error::MalformedInput("cannot judge the root position".into())),
    };

    let best = match before {
        Some(known) => known.clone(),
        None => engine.evaluate(&tree.engine_position(parent), budget)?,
    };
    let best_value = best.score.value();
    let played_uci = tree.to_uci(mv);

    let (played, played_value) = if best.best_move.as_ref() == Some(&played_uci) {
        (None, best_value)
    } else {
        let after = match terminal_score(move_node.position()) {
            Some(score) => Evaluation::terminal(score),
            None => engine.evaluate(&tree.engine_position(node), budget)?,
        };
        let value = after.score.for_previous_mover();
        (Some(after), value)
    };

    let cp_loss = (best_value - played_value).max(0);
    let notable = is_notable(best_value, played_value, thresholds);
    let glyph = if notable {
        Glyph::from_cp_loss(cp_loss, thresholds)
    } else {
        None
    };

    debug!(
        san = move_node.san().unwrap_or("--"),
        best = %best.best_move.as_ref().map(|m| m.to_string()).unwrap_or_default(),
        best_value,
        played_value,
        cp_loss,
        notable,
        "judged move"
    );

    Ok(MoveJudgment {
        best,
        played,
        best_value,
        played_value,
        cp_loss,
        notable,
        glyph,
    })
}

/// Score of a finished game, from the side to move. A variant win for the
/// side to move has no such score and is left to the engine.
fn terminal_score<P: Position>(position: &P) -> Option<Score> {
    match position.outcome() {
        Outcome::Known(KnownOutcome::Draw) => Some(Score::Cp(0)),
        Outcome::Known(KnownOutcome::Decisive { winner }) if winner != position.turn() => {
            Some(Score::Mate(0))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MATE_VALUE;
    use crate::pgn::parse_pgn_string;
    use crate::testing::{eval, Fault, ScriptedEngine, BUDGET};

    fn tree_of(movetext: &str) -> MoveTree {
        let mut games = parse_pgn_string(&format!("\n{} *\n", movetext)).unwrap();
        games.remove(0).unwrap().tree
    }

    #[test]
    fn test_best_move_needs_one_search() {
        let tree = tree_of("1. e4");
        let mut engine =
            ScriptedEngine::new().reply("", eval(Score::Cp(30), 20, "e2e4 e7e5"));

        let node = tree.mainline()[0];
        let judgment =
            evaluate_move(&mut engine, &tree, node, BUDGET, &Thresholds::default()).unwrap();

        assert!(judgment.matched_best());
        assert_eq!(judgment.cp_loss, 0);
        assert!(!judgment.notable);
        assert_eq!(judgment.glyph, None);
        assert_eq!(engine.calls.len(), 1);
    }

    #[test]
    fn test_deviation_compares_from_mover_view() {
        let tree = tree_of("1. e4 f6");
        let mut engine = ScriptedEngine::new()
            .reply("e2e4", eval(Score::Cp(-30), 18, "e7e5 g1f3"))
            .reply("e2e4 f7f6", eval(Score::Cp(400), 18, "d2d4"));

        let node = tree.mainline()[1];
        let judgment =
            evaluate_move(&mut engine, &tree, node, BUDGET, &Thresholds::default()).unwrap();

        assert_eq!(judgment.best_value, -30);
        assert_eq!(judgment.played_value, -400);
        assert_eq!(judgment.cp_loss, 370);
        assert!(judgment.notable);
        assert_eq!(judgment.glyph, Some(Glyph::Blunder));
        assert_eq!(engine.calls.len(), 2);
    }

    #[test]
    fn test_better_than_engine_is_no_loss() {
        let tree = tree_of("1. d4");
        let mut engine = ScriptedEngine::new()
            .reply("", eval(Score::Cp(20), 10, "e2e4"))
            .reply("d2d4", eval(Score::Cp(-35), 10, "d7d5"));

        let node = tree.mainline()[0];
        let judgment =
            evaluate_move(&mut engine, &tree, node, BUDGET, &Thresholds::default()).unwrap();
        assert_eq!(judgment.played_value, 35);
        assert_eq!(judgment.cp_loss, 0);
    }

    #[test]
    fn test_mating_move_scored_without_engine() {
        let tree = tree_of("1. f3 e5 2. g4 Qh4#");
        let mut engine = ScriptedEngine::new()
            .reply("f2f3 e7e5 g2g4", eval(Score::Mate(5), 30, "b8c6"));

        let node = tree.mainline()[3];
        let judgment =
            evaluate_move(&mut engine, &tree, node, BUDGET, &Thresholds::default()).unwrap();

        assert_eq!(engine.calls.len(), 1);
        assert_eq!(judgment.played.as_ref().map(|e| e.score), Some(Score::Mate(0)));
        assert_eq!(judgment.played_value, MATE_VALUE);
        assert_eq!(judgment.cp_loss, 0);
    }

    #[test]
    fn test_missing_a_mate_is_a_blunder() {
        let tree = tree_of("1. f3 e5 2. g4 Nc6");
        let mut engine = ScriptedEngine::new()
            .reply("f2f3 e7e5 g2g4", eval(Score::Mate(1), 30, "d8h4"))
            .reply("f2f3 e7e5 g2g4 b8c6", eval(Score::Cp(-250), 20, "g1h3"));

        let node = tree.mainline()[3];
        let judgment =
            evaluate_move(&mut engine, &tree, node, BUDGET, &Thresholds::default()).unwrap();
        assert!(judgment.notable);
        assert_eq!(judgment.glyph, Some(Glyph::Blunder));
    }

    #[test]
    fn test_known_evaluation_is_not_searched_again() {
        let tree = tree_of("1. e4 f6");
        let before = eval(Score::Cp(-30), 18, "e7e5 g1f3");
        let mut engine =
            ScriptedEngine::new().reply("e2e4 f7f6", eval(Score::Cp(400), 18, "d2d4"));

        let node = tree.mainline()[1];
        let judgment = evaluate_move_from(
            &mut engine,
            &tree,
            node,
            Some(&before),
            BUDGET,
            &Thresholds::default(),
        )
        .unwrap();

        assert_eq!(engine.calls, vec!["position startpos moves e2e4 f7f6"]);
        assert_eq!(judgment.cp_loss, 370);
        assert_eq!(judgment.best.depth, 18);
    }

    #[test]
    fn test_drawn_position_scored_without_engine() {
        let mut games = parse_pgn_string(
            "[FEN \"8/8/8/4k3/8/8/3n4/4K3 w - - 0 1\"]\n\n1. Kxd2 *\n",
        )
        .unwrap();
        let tree = games.remove(0).unwrap().tree;
        let mut engine = ScriptedEngine::new();
        let node = tree.mainline()[0];
        let judgment =
            evaluate_move(&mut engine, &tree, node, BUDGET, &Thresholds::default()).unwrap();
        // the unscripted search before the move names no best move
        assert_eq!(engine.calls.len(), 1);
        assert_eq!(judgment.played.as_ref().map(|e| e.score), Some(Score::Cp(0)));
    }

    #[test]
    fn test_engine_errors_propagate() {
        let tree = tree_of("1. e4");
        let mut engine = ScriptedEngine::new().fail_at(0, Fault::Timeout);
        let node = tree.mainline()[0];
        let err = evaluate_move(&mut engine, &tree, node, BUDGET, &Thresholds::default())
            .unwrap_err();
        assert!(err.is_transient());
    }
}
