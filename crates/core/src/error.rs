//! Error types for pgn-annotator-core

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The engine could not be launched or did not finish the handshake.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// No best move arrived within the search budget plus the grace margin.
    #[error("Engine timed out after {budget:?}")]
    EngineTimeout { budget: Duration },

    /// The engine process exited or broke the protocol. The session is dead.
    #[error("Engine crashed: {0}")]
    EngineCrashed(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors worth a single retry with the same budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::EngineTimeout { .. })
    }

    /// Errors that end the whole run, not just the current game.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Error::EngineUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
