//! ECO opening classification

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::{EnPassantMode, Position};
use tracing::{debug, info};

use crate::error::Result;
use crate::pgn::{Game, NodeId};

/// One named opening position. Accepts the compact keys of the common
/// `eco.json` files as well as the long ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opening {
    #[serde(alias = "c")]
    pub eco: String,
    #[serde(alias = "n")]
    pub name: String,
    /// Board, side to move and castling rights; extra fields are ignored
    #[serde(alias = "f")]
    pub fen: String,
    /// Main line leading to the position
    #[serde(alias = "m", default)]
    pub moves: String,
}

#[derive(Debug, Clone, Default)]
pub struct OpeningBook {
    by_position: HashMap<String, Opening>,
}

impl OpeningBook {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let openings: Vec<Opening> = serde_json::from_str(json)?;
        Ok(Self::from_openings(openings))
    }

    /// Later entries for the same position replace earlier ones.
    pub fn from_openings(openings: impl IntoIterator<Item = Opening>) -> Self {
        let by_position = openings
            .into_iter()
            .map(|opening| (book_key(&opening.fen), opening))
            .collect();
        OpeningBook { by_position }
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    pub fn lookup<P: Position>(&self, position: &P) -> Option<&Opening> {
        let fen = Fen::from_position(position, EnPassantMode::Legal).to_string();
        self.by_position.get(&book_key(&fen))
    }

    /// Finds the deepest mainline position in the book, records the opening
    /// in the `ECO` and `Opening` headers and as a comment on that move.
    /// Returns the classified node.
    pub fn classify(&self, game: &mut Game) -> Option<NodeId> {
        if !game.tree.is_standard() {
            info!(
                variant = %game.tree.variant(),
                chess960 = game.tree.is_chess960(),
                "skipping opening classification for a variant game"
            );
            return None;
        }

        let mainline = game.tree.mainline();
        let (node, opening) = mainline
            .iter()
            .rev()
            .find_map(|&id| self.lookup(game.tree.node(id).position()).map(|o| (id, o)))?;

        debug!(eco = %opening.eco, name = %opening.name, "classified opening");
        game.headers.set("ECO", opening.eco.clone());
        game.headers.set("Opening", opening.name.clone());
        game.tree
            .node_mut(node)
            .comments
            .push(format!("{} {}", opening.eco, opening.name));
        Some(node)
    }
}

/// First three FEN fields: board, side to move, castling rights
fn book_key(fen: &str) -> String {
    fen.split_whitespace().take(3).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgn::parse_pgn_string;

    const BOOK: &str = r#"[
        {"c": "C20", "n": "King's Pawn Game", "f": "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq", "m": "1.e4"},
        {"c": "C40", "n": "King's Knight Opening", "f": "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq", "m": "1.e4 e5 2.Nf3"},
        {"eco": "A00", "name": "Polish Opening", "fen": "rnbqkbnr/pppppppp/8/8/1P6/8/P1PPPPPP/RNBQKBNR b KQkq - 0 1"}
    ]"#;

    fn game_of(movetext: &str) -> Game {
        parse_pgn_string(&format!("[Event \"?\"]\n\n{} *\n", movetext))
            .unwrap()
            .remove(0)
            .unwrap()
    }

    #[test]
    fn test_both_key_styles_load() {
        let book = OpeningBook::from_json(BOOK).unwrap();
        assert_eq!(book.len(), 3);
        let mut game = game_of("1. b4");
        assert!(book.classify(&mut game).is_some());
        assert_eq!(game.headers.get("ECO"), Some("A00"));
    }

    #[test]
    fn test_deepest_match_wins() {
        let book = OpeningBook::from_json(BOOK).unwrap();
        let mut game = game_of("1. e4 e5 2. Nf3 Nc6 3. Bb5");

        let node = book.classify(&mut game).unwrap();
        assert_eq!(node, game.tree.mainline()[2]);
        assert_eq!(game.headers.get("ECO"), Some("C40"));
        assert_eq!(game.headers.get("Opening"), Some("King's Knight Opening"));
        assert_eq!(game.tree.node(node).comments, vec!["C40 King's Knight Opening"]);
    }

    #[test]
    fn test_unknown_opening() {
        let book = OpeningBook::from_json(BOOK).unwrap();
        let mut game = game_of("1. d4 d5");
        assert_eq!(book.classify(&mut game), None);
        assert_eq!(game.headers.get("ECO"), None);
    }

    #[test]
    fn test_variant_games_are_not_classified() {
        let book = OpeningBook::from_json(BOOK).unwrap();
        let mut game = parse_pgn_string("[Variant \"Atomic\"]\n\n1. e4 *\n")
            .unwrap()
            .remove(0)
            .unwrap();
        assert_eq!(book.classify(&mut game), None);
        assert_eq!(game.headers.get("ECO"), None);
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(OpeningBook::from_json("{not json").is_err());
    }
}
