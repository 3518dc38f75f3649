//! The annotation pipeline
//!
//! The aggregator walks a game's mainline, the evaluator asks the engine
//! what each move cost and the merger writes the verdict back into the tree.

pub mod aggregator;
pub mod classify;
pub mod evaluator;
pub mod merger;

pub use aggregator::{annotate, AccumulatedLoss, AnnotateOptions, AnnotationSummary};
pub use classify::{is_notable, winning_chances, Glyph};
pub use evaluator::{evaluate_move, evaluate_move_from, MoveJudgment};
pub use merger::merge;
