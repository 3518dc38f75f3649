//! PGN export of an annotated game

use shakmaty::{Color, Position};

use super::game::Game;
use super::tree::{MoveTree, NodeId};

const MAX_LINE: usize = 80;

/// Serializes a game: tag pairs, a blank line, then wrapped movetext.
pub fn write_game(game: &Game) -> String {
    let mut out = String::new();
    for (name, value) in game.headers.iter() {
        out.push_str(&format!("[{} \"{}\"]\n", name, escape_tag(value)));
    }
    out.push('\n');

    let tree = &game.tree;
    let mut tokens = Vec::new();
    for comment in &tree.node(tree.root()).comments {
        tokens.push(comment_token(comment));
    }
    // The first move is always numbered, even when black starts.
    write_line(tree, tree.root(), true, &mut tokens);
    tokens.push(game.result().to_string());

    out.push_str(&wrap(&tokens));
    out.push('\n');
    out
}

/// Writes the line continuing from `start`, with its side variations.
fn write_line(tree: &MoveTree, start: NodeId, mut force_number: bool, tokens: &mut Vec<String>) {
    let mut node = start;
    loop {
        let children = tree.node(node).variations();
        let Some((&main, sides)) = children.split_first() else {
            break;
        };

        write_move(tree, main, force_number, tokens);

        for &side in sides {
            tokens.push("(".to_string());
            write_move(tree, side, true, tokens);
            write_line(tree, side, tree.node(side).has_comments(), tokens);
            tokens.push(")".to_string());
        }

        force_number = !sides.is_empty() || tree.node(main).has_comments();
        node = main;
    }
}

fn write_move(tree: &MoveTree, id: NodeId, force_number: bool, tokens: &mut Vec<String>) {
    let node = tree.node(id);
    let Some(parent) = node.parent() else {
        return;
    };
    let before = tree.node(parent).position();

    for comment in &node.starting_comments {
        tokens.push(comment_token(comment));
    }

    let number = before.fullmoves();
    match before.turn() {
        Color::White => tokens.push(format!("{}.", number)),
        Color::Black if force_number || !node.starting_comments.is_empty() => {
            tokens.push(format!("{}...", number))
        }
        Color::Black => {}
    }

    tokens.push(node.san().unwrap_or("--").to_string());
    for nag in &node.nags {
        tokens.push(format!("${}", nag));
    }
    for comment in &node.comments {
        tokens.push(comment_token(comment));
    }
}

fn comment_token(comment: &str) -> String {
    format!("{{ {} }}", comment.replace('}', ")"))
}

fn escape_tag(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Joins tokens into lines of at most `MAX_LINE` columns where possible.
/// Parentheses hug their contents.
fn wrap(tokens: &[String]) -> String {
    let mut lines = Vec::new();
    let mut line = String::new();

    for token in tokens {
        let glued = line.is_empty() || line.ends_with('(') || token == ")";
        let needed = token.len() + usize::from(!glued);

        if !glued && line.len() + needed > MAX_LINE {
            lines.push(std::mem::take(&mut line));
        } else if !glued {
            line.push(' ');
        }
        line.push_str(token);
    }
    if !line.is_empty() {
        lines.push(line);
    }

    lines.join("\n")
}
