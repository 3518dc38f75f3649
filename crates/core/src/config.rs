//! Annotator and engine configuration

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::SearchBudget;
use crate::error::{Error, Result};

/// Shortest search the time budget is ever split into.
const MIN_MOVE_TIME: Duration = Duration::from_millis(10);

/// Loss thresholds. Only their ordering matters for correctness; the values
/// are tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Winning-chance drop (percentage points) that makes a move notable
    pub notable: f64,
    /// Centipawn loss for `?!`
    pub dubious: i32,
    /// Centipawn loss for `?`
    pub mistake: i32,
    /// Centipawn loss for `??`
    pub blunder: i32,
    /// Per-move loss cap used for the averages
    pub max_cpl: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            notable: 7.5,
            dubious: 75,
            mistake: 150,
            blunder: 300,
            max_cpl: 2000,
        }
    }
}

/// What the runner does when a game fails mid-traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and continue with the next game
    #[default]
    SkipGame,
    /// Stop handing out games after the first failure
    AbortRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub thresholds: Thresholds,
    /// Inserted variations longer than this are cut, unless they end the game
    pub short_pv_len: usize,
    pub failure_policy: FailurePolicy,
    /// Start analysis after the last position found in the opening book
    pub skip_book_moves: bool,
    /// Share of the game time held back to search notable moves again,
    /// deeper, before they are annotated. `0` disables the re-check.
    pub verify_share: f64,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        AnnotatorConfig {
            thresholds: Thresholds::default(),
            short_pv_len: 10,
            failure_policy: FailurePolicy::default(),
            skip_book_moves: false,
            verify_share: 0.9,
        }
    }
}

impl AnnotatorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: AnnotatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if !(0 < t.dubious && t.dubious < t.mistake && t.mistake < t.blunder) {
            return Err(Error::Config(format!(
                "glyph thresholds must satisfy 0 < dubious < mistake < blunder (got {}, {}, {})",
                t.dubious, t.mistake, t.blunder
            )));
        }
        if t.max_cpl <= 0 {
            return Err(Error::Config("max_cpl must be positive".into()));
        }
        if !(t.notable >= 0.0) {
            return Err(Error::Config("notable threshold must be non-negative".into()));
        }
        if !(0.0..1.0).contains(&self.verify_share) {
            return Err(Error::Config(format!(
                "verify_share must be in [0, 1), got {}",
                self.verify_share
            )));
        }
        if self.short_pv_len == 0 {
            return Err(Error::Config("short_pv_len must be at least 1".into()));
        }
        Ok(())
    }
}

/// How to launch and drive one engine process
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Search threads inside the engine
    pub threads: u32,
    /// Hash table size in MB, engine default when `None`
    pub hash_mb: Option<u32>,
    /// Bound on each handshake wait (`uciok`, `readyok`)
    pub handshake_timeout: Duration,
    /// Extra time granted on top of the search budget before timing out
    pub timeout_grace: Duration,
    /// How long `quit` may take before the process is killed
    pub shutdown_grace: Duration,
    /// Wall-clock bound for depth-limited searches
    pub depth_timeout: Duration,
}

impl EngineConfig {
    /// Builds a config from a command line such as `"stockfish"` or
    /// `"/opt/lc0 --weights=net.pb"`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace().map(String::from);
        let program = words
            .next()
            .ok_or_else(|| Error::Config("engine command is empty".into()))?;

        Ok(EngineConfig {
            program,
            args: words.collect(),
            threads: 1,
            hash_mb: None,
            handshake_timeout: Duration::from_secs(10),
            timeout_grace: Duration::from_secs(2),
            shutdown_grace: Duration::from_millis(500),
            depth_timeout: Duration::from_secs(120),
        })
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// The command as it was given, for diagnostics and headers
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Time allotted to one game, turned into per-search budgets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameBudget {
    pub game_time: Duration,
    /// Fixed search depth; replaces the time split when set
    pub depth: Option<u32>,
}

/// How one game's time is spent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchPlan {
    /// Budget of every search on the first look at a move
    pub search: SearchBudget,
    /// Time for searching notable moves again, `None` when there is none
    pub verify_pool: Option<Duration>,
}

impl GameBudget {
    pub fn from_minutes(minutes: f64) -> Result<Self> {
        if !(minutes > 0.0) {
            return Err(Error::Config(format!("game time must be positive, got {minutes}")));
        }
        let game_time = Duration::try_from_secs_f64(minutes * 60.0)
            .map_err(|e| Error::Config(format!("game time of {minutes} minutes: {e}")))?;
        Ok(GameBudget {
            game_time,
            depth: None,
        })
    }

    pub fn with_depth(mut self, depth: Option<u32>) -> Self {
        self.depth = depth;
        self
    }

    /// Splits the game time for `plies` analyzed moves. `verify_share` of it
    /// is held back for re-checks; the rest is shared by the first searches,
    /// two per ply at most. A fixed depth disables re-checks.
    pub fn plan(&self, plies: usize, verify_share: f64) -> SearchPlan {
        if let Some(depth) = self.depth {
            return SearchPlan {
                search: SearchBudget::Depth(depth),
                verify_pool: None,
            };
        }
        let pool = self.game_time.mul_f64(verify_share.clamp(0.0, 1.0));
        let first = self.game_time.saturating_sub(pool);
        let searches = (plies.max(1) * 2) as u32;
        SearchPlan {
            search: SearchBudget::MoveTime((first / searches).max(MIN_MOVE_TIME)),
            verify_pool: (!pool.is_zero()).then_some(pool),
        }
    }
}
