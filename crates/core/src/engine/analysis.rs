//! Types for representing engine analysis results

use std::fmt;
use std::time::Duration;

use shakmaty::uci::UciMove;
use shakmaty::variant::Variant;
use shakmaty::Color;

/// Magnitude of a mate score on the common value scale.
pub const MATE_VALUE: i32 = 100_000;

/// Centipawn scores are clamped below this so that a mate always dominates.
const MAX_CP_VALUE: i32 = MATE_VALUE - 1_000;

/// An engine score, always relative to the side to move in the evaluated
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Centipawns (positive = side to move is better)
    Cp(i32),
    /// Forced mate in N moves (positive = side to move mates, negative = side
    /// to move gets mated, zero = side to move is already checkmated)
    Mate(i32),
}

impl Score {
    /// Maps the score onto a single ordered scale. Mate distances are compared
    /// first: a shorter mate is better for the mating side, a longer one is
    /// better for the defending side.
    pub fn value(self) -> i32 {
        match self {
            Score::Cp(cp) => cp.clamp(-MAX_CP_VALUE, MAX_CP_VALUE),
            Score::Mate(n) if n > 0 => MATE_VALUE - n,
            Score::Mate(n) => -MATE_VALUE - n,
        }
    }

    /// Converts a score reported after a move into the value of that move
    /// for the player who made it.
    ///
    /// The engine always scores from the side to move, so the position after
    /// a move is scored from the opponent's point of view. This is the only
    /// place where that sign flip happens.
    pub fn for_previous_mover(self) -> i32 {
        -self.value()
    }

    pub fn is_mate(self) -> bool {
        matches!(self, Score::Mate(_))
    }

    /// Re-expresses the score from white's point of view.
    pub fn white_view(self, side_to_move: Color) -> Score {
        match side_to_move {
            Color::White => self,
            Color::Black => match self {
                Score::Cp(cp) => Score::Cp(-cp),
                Score::Mate(n) => Score::Mate(-n),
            },
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Cp(cp) => {
                let pawns = *cp as f32 / 100.0;
                if pawns >= 0.0 {
                    write!(f, "+{:.2}", pawns)
                } else {
                    write!(f, "{:.2}", pawns)
                }
            }
            Score::Mate(0) => write!(f, "Checkmate"),
            Score::Mate(n) => write!(f, "Mate in {}", n.abs()),
        }
    }
}

/// How long a single search may run. Time and depth are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBudget {
    MoveTime(Duration),
    Depth(u32),
}

impl SearchBudget {
    pub fn go_command(&self) -> String {
        match self {
            SearchBudget::MoveTime(d) => format!("go movetime {}", d.as_millis().max(1)),
            SearchBudget::Depth(depth) => format!("go depth {}", depth),
        }
    }
}

/// A position as the engine sees it: a root plus the moves played from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePosition {
    /// FEN of the root, or `None` for the standard starting position
    pub start_fen: Option<String>,
    /// Moves from the root in UCI notation
    pub moves: Vec<UciMove>,
    pub chess960: bool,
    /// Rules the engine must play by, selected through `UCI_Variant`
    pub variant: Variant,
}

impl EnginePosition {
    pub fn startpos() -> Self {
        EnginePosition {
            start_fen: None,
            moves: Vec::new(),
            chess960: false,
            variant: Variant::Chess,
        }
    }

    /// Returns the position reached after one more move.
    pub fn child(&self, mv: UciMove) -> Self {
        let mut moves = self.moves.clone();
        moves.push(mv);
        EnginePosition {
            start_fen: self.start_fen.clone(),
            moves,
            chess960: self.chess960,
            variant: self.variant,
        }
    }

    pub fn same_root(&self, other: &EnginePosition) -> bool {
        self.start_fen == other.start_fen
            && self.chess960 == other.chess960
            && self.variant == other.variant
    }

    pub fn position_command(&self) -> String {
        let mut cmd = match &self.start_fen {
            Some(fen) => format!("position fen {}", fen),
            None => "position startpos".to_string(),
        };
        if !self.moves.is_empty() {
            cmd.push_str(" moves");
            for mv in &self.moves {
                cmd.push(' ');
                cmd.push_str(&mv.to_string());
            }
        }
        cmd
    }
}

/// The engine's verdict on one position
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Best move, absent when the position has no legal moves
    pub best_move: Option<UciMove>,
    /// Score relative to the side to move
    pub score: Score,
    /// Principal variation (best line of play), starting with the best move
    pub pv: Vec<UciMove>,
    /// Depth reached
    pub depth: u32,
    /// Nodes searched
    pub nodes: u64,
    /// Time spent searching
    pub time: Duration,
}

impl Evaluation {
    /// Evaluation for a position that needs no search, such as checkmate.
    pub fn terminal(score: Score) -> Self {
        Evaluation {
            best_move: None,
            score,
            pv: Vec::new(),
            depth: 0,
            nodes: 0,
            time: Duration::ZERO,
        }
    }

    /// Returns a brief summary of the analysis
    pub fn summary(&self) -> String {
        let best = self
            .best_move
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "(none)".to_string());
        let pv: Vec<String> = self.pv.iter().take(5).map(|m| m.to_string()).collect();
        format!(
            "Eval: {} | Best: {} | Depth: {} | PV: {}",
            self.score,
            best,
            self.depth,
            pv.join(" ")
        )
    }
}
