//! PGN reading into the arena move tree

use pgn_reader::{Nag, Outcome, RawComment, RawTag, SanPlus, Skip, Visitor};
use shakmaty::fen::Fen;
use shakmaty::variant::{Variant, VariantPosition};
use shakmaty::CastlingMode;
use std::fs;
use std::io::Cursor;
use std::ops::ControlFlow;
use std::path::Path;

use super::game::{Game, Headers};
use super::tree::{MoveTree, NodeId};
use crate::error::{Error, Result};

/// Holds state while parsing the movetext section
struct GameMoves {
    game: Game,
    current: NodeId,
    /// Nodes to return to when a variation ends. `None` marks a variation
    /// that is being ignored.
    stack: Vec<Option<NodeId>>,
    /// Comments seen at the start of a variation, before its first move
    pending_comments: Vec<String>,
    at_variation_start: bool,
    error: Option<String>,
}

impl GameMoves {
    fn ignoring(&self) -> bool {
        self.error.is_some() || matches!(self.stack.last(), Some(None))
    }
}

/// Visitor implementation building a `Game`
struct GameBuilder;

impl Visitor for GameBuilder {
    type Tags = Headers;
    type Movetext = GameMoves;
    type Output = Result<Game>;

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        ControlFlow::Continue(Headers::default())
    }

    fn tag(
        &mut self,
        tags: &mut Self::Tags,
        name: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        let name_str = String::from_utf8_lossy(name);
        tags.set(&name_str, value.decode_utf8_lossy().to_string());
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        let (tree, error) = match build_tree(&tags) {
            Ok(tree) => (tree, None),
            Err(reason) => (MoveTree::default(), Some(reason)),
        };
        let game = Game::new(tags, tree);
        let current = game.tree.root();

        ControlFlow::Continue(GameMoves {
            game,
            current,
            stack: Vec::new(),
            pending_comments: Vec::new(),
            at_variation_start: false,
            error,
        })
    }

    fn san(&mut self, movetext: &mut Self::Movetext, san: SanPlus) -> ControlFlow<Self::Output> {
        if movetext.ignoring() {
            return ControlFlow::Continue(());
        }

        let tree = &mut movetext.game.tree;
        let mv = match san.san.to_move(tree.node(movetext.current).position()) {
            Ok(mv) => mv,
            Err(e) => {
                movetext.error = Some(format!("illegal move {}: {}", san, e));
                return ControlFlow::Continue(());
            }
        };

        match tree.add_variation(movetext.current, mv) {
            Ok(node) => {
                let pending = std::mem::take(&mut movetext.pending_comments);
                tree.node_mut(node).starting_comments = pending;
                movetext.current = node;
                movetext.at_variation_start = false;
            }
            Err(e) => movetext.error = Some(e.to_string()),
        }

        ControlFlow::Continue(())
    }

    fn nag(&mut self, movetext: &mut Self::Movetext, nag: Nag) -> ControlFlow<Self::Output> {
        if !movetext.ignoring() {
            let current = movetext.current;
            movetext.game.tree.node_mut(current).nags.push(nag.0);
        }
        ControlFlow::Continue(())
    }

    fn comment(
        &mut self,
        movetext: &mut Self::Movetext,
        comment: RawComment<'_>,
    ) -> ControlFlow<Self::Output> {
        if movetext.ignoring() {
            return ControlFlow::Continue(());
        }

        let text = String::from_utf8_lossy(comment.as_bytes()).trim().to_string();
        if text.is_empty() {
            return ControlFlow::Continue(());
        }

        if movetext.at_variation_start {
            movetext.pending_comments.push(text);
        } else {
            let current = movetext.current;
            movetext.game.tree.node_mut(current).comments.push(text);
        }
        ControlFlow::Continue(())
    }

    fn begin_variation(
        &mut self,
        movetext: &mut Self::Movetext,
    ) -> ControlFlow<Self::Output, Skip> {
        let parent = movetext.game.tree.node(movetext.current).parent();
        match parent {
            Some(parent) if !movetext.ignoring() => {
                movetext.stack.push(Some(movetext.current));
                movetext.current = parent;
                movetext.at_variation_start = true;
            }
            // A variation before the first move has nothing to branch from.
            _ => movetext.stack.push(None),
        }
        ControlFlow::Continue(Skip(false))
    }

    fn end_variation(&mut self, movetext: &mut Self::Movetext) -> ControlFlow<Self::Output> {
        if let Some(Some(resume)) = movetext.stack.pop() {
            // Comments in an empty variation stay with the branch point.
            let leftover = std::mem::take(&mut movetext.pending_comments);
            let current = movetext.current;
            movetext.game.tree.node_mut(current).comments.extend(leftover);
            movetext.current = resume;
            movetext.at_variation_start = false;
        }
        ControlFlow::Continue(())
    }

    /// A result written only in the movetext fills in a missing or unknown
    /// `Result` tag.
    fn outcome(
        &mut self,
        movetext: &mut Self::Movetext,
        outcome: Outcome,
    ) -> ControlFlow<Self::Output> {
        if let Outcome::Known(known) = outcome {
            let headers = &mut movetext.game.headers;
            if matches!(headers.get("Result"), None | Some("*")) {
                headers.set("Result", known.as_str());
            }
        }
        ControlFlow::Continue(())
    }

    fn end_game(&mut self, movetext: Self::Movetext) -> Self::Output {
        match movetext.error {
            None => Ok(movetext.game),
            Some(reason) => Err(Error::MalformedInput(format!(
                "{}: {}",
                movetext.game.summary(),
                reason
            ))),
        }
    }
}

/// Reads the `Variant` tag. Lichess names, the `UCI_Variant` names and
/// their spelled-out forms are all accepted.
fn parse_variant(tag: Option<&str>) -> std::result::Result<(Variant, CastlingMode), String> {
    let Some(raw) = tag.map(str::trim) else {
        return Ok((Variant::Chess, CastlingMode::Standard));
    };
    let name: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    if name.contains("960") || name.contains("fischerandom") {
        return Ok((Variant::Chess, CastlingMode::Chess960));
    }
    let variant = match name.as_str() {
        "" | "standard" | "fromposition" => Ok(Variant::Chess),
        "threecheck" => Ok(Variant::ThreeCheck),
        _ => Variant::from_ascii(raw.as_bytes()).or_else(|_| Variant::from_uci(&name)),
    };
    variant
        .map(|v| (v, CastlingMode::Standard))
        .map_err(|_| format!("unsupported variant '{}'", raw))
}

/// Creates the tree root from the `FEN` and `Variant` tags
fn build_tree(tags: &Headers) -> std::result::Result<MoveTree, String> {
    let (variant, castling_mode) = parse_variant(tags.get("Variant"))?;

    match tags.get("FEN") {
        None if castling_mode == CastlingMode::Standard => {
            Ok(MoveTree::new(VariantPosition::new(variant)))
        }
        None => Err("Chess960 game without a FEN tag".to_string()),
        Some(fen_str) => {
            let fen: Fen = fen_str
                .parse()
                .map_err(|e| format!("invalid FEN '{}': {}", fen_str, e))?;
            let position = VariantPosition::from_setup(variant, fen.into_setup(), castling_mode)
                .map_err(|e| format!("illegal FEN '{}': {}", fen_str, e))?;
            Ok(MoveTree::from_setup(position, fen_str.to_string(), castling_mode))
        }
    }
}

/// Parses a PGN file. The outer error covers reading the file; each game
/// carries its own result so one bad game does not hide the others.
pub fn parse_pgn_file<P: AsRef<Path>>(path: P) -> Result<Vec<Result<Game>>> {
    let contents = fs::read_to_string(path)?;
    parse_pgn_string(&contents)
}

/// Parses PGN from a string
pub fn parse_pgn_string(pgn: &str) -> Result<Vec<Result<Game>>> {
    let mut builder = GameBuilder;
    let mut games = Vec::new();

    let cursor = Cursor::new(pgn.as_bytes());
    let mut reader = pgn_reader::Reader::new(cursor);

    while let Some(game) = reader.read_game(&mut builder)? {
        games.push(game);
    }

    Ok(games)
}
