//! PGN Annotator Core Library
//!
//! Drives a UCI engine over the mainline of PGN games and writes its verdicts
//! back as comments, glyphs, engine lines and accuracy headers.

pub mod annotate;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod opening;
pub mod pgn;

#[cfg(test)]
mod testing;

pub use annotate::{annotate, AnnotateOptions, AnnotationSummary, Glyph, MoveJudgment};
pub use batch::{annotate_games, GameOutcome, RunReport, RunSettings};
pub use config::{
    AnnotatorConfig, EngineConfig, FailurePolicy, GameBudget, SearchPlan, Thresholds,
};
pub use engine::{Engine, EngineSession, Evaluation, Score, SearchBudget};
pub use error::{Error, Result};
pub use opening::OpeningBook;
pub use pgn::{parse_pgn_file, parse_pgn_string, write_game, Game};
