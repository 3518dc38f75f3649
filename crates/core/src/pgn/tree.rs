//! Arena-backed move tree
//!
//! Nodes live in one vector and refer to each other by index. The first
//! child of a node is its mainline continuation, later children are
//! variations. Nodes are only ever appended, so a `NodeId` stays valid for
//! the lifetime of the tree.

use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::variant::{Variant, VariantPosition};
use shakmaty::{CastlingMode, Move, Position};

use crate::engine::EnginePosition;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct MoveNode {
    parent: Option<NodeId>,
    variations: Vec<NodeId>,
    mv: Option<Move>,
    san: Option<String>,
    position: VariantPosition,
    /// Comments written before the move (first move of a variation)
    pub starting_comments: Vec<String>,
    /// Comments written after the move
    pub comments: Vec<String>,
    /// Numeric annotation glyphs
    pub nags: Vec<u8>,
}

impl MoveNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Successors, mainline first
    pub fn variations(&self) -> &[NodeId] {
        &self.variations
    }

    /// The move leading to this node, `None` at the root
    pub fn mv(&self) -> Option<&Move> {
        self.mv.as_ref()
    }

    /// SAN of the move including `+`/`#`
    pub fn san(&self) -> Option<&str> {
        self.san.as_deref()
    }

    /// Position after the move
    pub fn position(&self) -> &VariantPosition {
        &self.position
    }

    pub fn has_comments(&self) -> bool {
        !self.comments.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MoveTree {
    nodes: Vec<MoveNode>,
    start_fen: Option<String>,
    castling_mode: CastlingMode,
}

impl Default for MoveTree {
    fn default() -> Self {
        MoveTree::new(VariantPosition::new(Variant::Chess))
    }
}

impl MoveTree {
    /// Tree rooted at the starting position of `root`'s variant
    pub fn new(root: VariantPosition) -> Self {
        MoveTree {
            nodes: vec![MoveNode {
                parent: None,
                variations: Vec::new(),
                mv: None,
                san: None,
                position: root,
                starting_comments: Vec::new(),
                comments: Vec::new(),
                nags: Vec::new(),
            }],
            start_fen: None,
            castling_mode: CastlingMode::Standard,
        }
    }

    /// Tree rooted at a custom position given by `fen`
    pub fn from_setup(root: VariantPosition, fen: String, castling_mode: CastlingMode) -> Self {
        let mut tree = MoveTree::new(root);
        tree.start_fen = Some(fen);
        tree.castling_mode = castling_mode;
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &MoveNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut MoveNode {
        &mut self.nodes[id.0]
    }

    /// Number of nodes including the root
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn castling_mode(&self) -> CastlingMode {
        self.castling_mode
    }

    pub fn is_chess960(&self) -> bool {
        self.castling_mode == CastlingMode::Chess960
    }

    pub fn variant(&self) -> Variant {
        self.node(self.root()).position.variant()
    }

    /// Standard rules from the standard starting position
    pub fn is_standard(&self) -> bool {
        self.variant() == Variant::Chess && !self.is_chess960()
    }

    /// Plays `mv` from `parent` and appends the result as the last successor
    /// of `parent`. Existing successors keep their order.
    pub fn add_variation(&mut self, parent: NodeId, mv: Move) -> Result<NodeId> {
        let before = self.node(parent).position();
        let san = san_of(before, &mv);
        let position = before
            .clone()
            .play(mv.clone())
            .map_err(|_| Error::MalformedInput(format!("illegal move {}", san)))?;

        let suffix = if position.is_checkmate() {
            "#"
        } else if position.is_check() {
            "+"
        } else {
            ""
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(MoveNode {
            parent: Some(parent),
            variations: Vec::new(),
            mv: Some(mv),
            san: Some(format!("{}{}", san, suffix)),
            position,
            starting_comments: Vec::new(),
            comments: Vec::new(),
            nags: Vec::new(),
        });
        self.nodes[parent.0].variations.push(id);
        Ok(id)
    }

    /// Adds a line of moves as a new variation of `parent`. Returns the last
    /// node of the line, or `parent` when `moves` is empty.
    pub fn add_line<I>(&mut self, parent: NodeId, moves: I) -> Result<NodeId>
    where
        I: IntoIterator<Item = Move>,
    {
        let mut node = parent;
        for mv in moves {
            node = self.add_variation(node, mv)?;
        }
        Ok(node)
    }

    pub fn main_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).variations.first().copied()
    }

    /// Mainline nodes in move order, excluding the root
    pub fn mainline(&self) -> Vec<NodeId> {
        let mut line = Vec::new();
        let mut node = self.root();
        while let Some(next) = self.main_child(node) {
            line.push(next);
            node = next;
        }
        line
    }

    /// Last node of the mainline
    pub fn end(&self) -> NodeId {
        self.mainline().last().copied().unwrap_or_else(|| self.root())
    }

    /// Whether `id` sits on the mainline
    pub fn is_mainline(&self, id: NodeId) -> bool {
        let mut node = id;
        while let Some(parent) = self.node(node).parent {
            if self.main_child(parent) != Some(node) {
                return false;
            }
            node = parent;
        }
        true
    }

    /// Nodes from the root down to `id`, both included
    pub fn path(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut node = id;
        while let Some(parent) = self.node(node).parent {
            path.push(parent);
            node = parent;
        }
        path.reverse();
        path
    }

    pub fn to_uci(&self, mv: &Move) -> UciMove {
        mv.clone().to_uci(self.castling_mode)
    }

    /// The position at `id` in the form the engine expects
    pub fn engine_position(&self, id: NodeId) -> EnginePosition {
        let moves = self
            .path(id)
            .into_iter()
            .filter_map(|n| self.node(n).mv())
            .map(|mv| self.to_uci(mv))
            .collect();

        EnginePosition {
            start_fen: self.start_fen.clone(),
            moves,
            chess960: self.is_chess960(),
            variant: self.variant(),
        }
    }
}

/// SAN of `mv` in `position`, without check suffix
pub fn san_of<P: Position>(position: &P, mv: &Move) -> String {
    San::from_move(position, mv.clone()).to_string()
}
