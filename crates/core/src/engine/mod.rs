//! Chess engine integration
//!
//! Provides the interface to UCI-compatible engines like Stockfish.

pub mod analysis;
pub mod session;
pub mod uci;

// Re-export main types for convenience
pub use analysis::{EnginePosition, Evaluation, Score, SearchBudget, MATE_VALUE};
pub use session::{EngineSession, SessionState};

use crate::error::Result;

/// Something that can evaluate positions. One instance serves one game at a
/// time; it is never shared between threads while a search runs.
pub trait Engine {
    /// Identity string reported by the engine during the handshake
    fn identity(&self) -> &str;

    /// Called before the first position of a new game.
    fn new_game(&mut self) {}

    /// Searches `position` within `budget` and blocks until the engine
    /// reports its best line.
    fn evaluate(&mut self, position: &EnginePosition, budget: SearchBudget) -> Result<Evaluation>;
}
