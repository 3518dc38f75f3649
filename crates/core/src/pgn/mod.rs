//! PGN games: the move tree and its reader and writer

pub mod game;
pub mod reader;
pub mod tree;
pub mod writer;

pub use game::{Game, Headers};
pub use reader::{parse_pgn_file, parse_pgn_string};
pub use tree::{san_of, MoveNode, MoveTree, NodeId};
pub use writer::write_game;
