//! Splices engine verdicts into the move tree
//!
//! Merging only ever appends: comments go after existing comments, glyphs
//! are added when missing, and engine lines become the last successor of the
//! pre-move node. Nothing already in the tree is removed or reordered.
//! Merging the same judgment twice duplicates the annotations, so a game
//! must be annotated at most once.

use shakmaty::fen::Fen;
use shakmaty::{EnPassantMode, Move, Position};
use tracing::{debug, warn};

use super::evaluator::MoveJudgment;
use crate::config::AnnotatorConfig;
use crate::error::Result;
use crate::pgn::{MoveTree, NodeId};

/// Attaches `judgment` to the move at `node`. Returns the last node of the
/// inserted engine line, if one was inserted.
pub fn merge(
    tree: &mut MoveTree,
    node: NodeId,
    judgment: &MoveJudgment,
    config: &AnnotatorConfig,
) -> Result<Option<NodeId>> {
    if let Some(played) = &judgment.played {
        let after = tree.node(node).position().turn();
        let comment = played.score.white_view(after).to_string();
        tree.node_mut(node).comments.push(comment);
    }

    if !judgment.notable {
        return Ok(None);
    }

    if let Some(glyph) = judgment.glyph {
        let nags = &mut tree.node_mut(node).nags;
        if !nags.contains(&glyph.nag()) {
            nags.push(glyph.nag());
        }
    }

    let Some(parent) = tree.node(node).parent() else {
        return Ok(None);
    };
    let line = engine_line(tree, parent, judgment, config.short_pv_len);
    if line.moves.is_empty() {
        return Ok(None);
    }

    let end = tree.add_line(parent, line.moves)?;
    let before = tree.node(parent).position().turn();
    let score = judgment.best.score.white_view(before);
    let comment = match line.end_state {
        Some(state) => state.to_string(),
        None => format!("{}/{}", score, judgment.best.depth),
    };
    if !comment.is_empty() {
        tree.node_mut(end).comments.push(comment);
    }

    Ok(Some(end))
}

/// The engine line ready to insert, with the state of its final position
struct EngineLine {
    moves: Vec<Move>,
    end_state: Option<&'static str>,
}

/// Replays the principal variation from `parent`. A line that ends the game
/// is kept whole; anything else is cut to `max_len` plies.
fn engine_line(
    tree: &MoveTree,
    parent: NodeId,
    judgment: &MoveJudgment,
    max_len: usize,
) -> EngineLine {
    let max_len = max_len.max(1);
    let mut seen: Vec<String> = tree
        .path(parent)
        .into_iter()
        .map(|n| repetition_key(tree.node(n).position()))
        .collect();
    let history = seen.len();

    let mut position = tree.node(parent).position().clone();
    let mut moves = Vec::with_capacity(judgment.best.pv.len());
    let mut positions = Vec::with_capacity(judgment.best.pv.len());
    for uci in &judgment.best.pv {
        let next = uci
            .to_move(&position)
            .ok()
            .and_then(|mv| position.clone().play(mv.clone()).ok().map(|p| (mv, p)));
        let Some((mv, after)) = next else {
            warn!(mv = %uci, "engine line contains an illegal move, cutting it");
            break;
        };
        seen.push(repetition_key(&after));
        moves.push(mv);
        positions.push(after.clone());
        position = after;
    }

    let Some(last) = positions.last() else {
        return EngineLine { moves, end_state: None };
    };
    let end_state = game_over_state(last, &seen);
    if end_state.is_some() || moves.len() <= max_len {
        return EngineLine { moves, end_state };
    }

    debug!(plies = moves.len(), max_len, "shortening engine line");
    moves.truncate(max_len);
    let end_state = game_over_state(&positions[max_len - 1], &seen[..history + max_len]);
    EngineLine { moves, end_state }
}

/// Describes a finished game. Checkmate needs no words and yields `""`.
fn game_over_state<P: Position>(position: &P, seen: &[String]) -> Option<&'static str> {
    if position.is_checkmate() {
        Some("")
    } else if position.is_variant_end() {
        Some("Variant end")
    } else if position.is_stalemate() {
        Some("Stalemate")
    } else if position.is_insufficient_material() {
        Some("Insufficient material to mate")
    } else if position.halfmoves() >= 100 {
        Some("Fifty move rule")
    } else if is_threefold(seen) {
        Some("Three-fold repetition")
    } else {
        None
    }
}

fn is_threefold(seen: &[String]) -> bool {
    match seen.last() {
        Some(last) => seen.iter().filter(|key| *key == last).count() >= 3,
        None => false,
    }
}

/// Board, side to move, castling rights and en passant square
fn repetition_key<P: Position>(position: &P) -> String {
    let fen = Fen::from_position(position, EnPassantMode::Legal).to_string();
    fen.split(' ').take(4).collect::<Vec<_>>().join(" ")
}
