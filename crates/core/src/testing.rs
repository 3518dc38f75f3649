//! In-process engine double for pipeline tests

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use shakmaty::uci::UciMove;

use crate::engine::{Engine, EnginePosition, Evaluation, Score, SearchBudget};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Timeout,
    Crash,
}

/// Answers searches from a table keyed by the `position` command. Unknown
/// positions get a level score with no best move.
pub struct ScriptedEngine {
    pub name: String,
    replies: HashMap<String, Evaluation>,
    /// Replies that only apply to searches with the given budget
    budget_replies: Vec<(SearchBudget, String, Evaluation)>,
    faults: HashMap<usize, Fault>,
    crashed: bool,
    /// Position commands in the order they were searched
    pub calls: Vec<String>,
    /// Budget of each search, parallel to `calls`
    pub budgets: Vec<SearchBudget>,
    pub new_games: usize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        ScriptedEngine {
            name: "ScriptedFish".to_string(),
            replies: HashMap::new(),
            budget_replies: Vec::new(),
            faults: HashMap::new(),
            crashed: false,
            calls: Vec::new(),
            budgets: Vec::new(),
            new_games: 0,
        }
    }

    /// Scripts the reply for the position reached by `moves` from the start.
    pub fn reply(mut self, moves: &str, evaluation: Evaluation) -> Self {
        self.replies.insert(command_of(moves), evaluation);
        self
    }

    /// Scripts a reply that overrides `reply` for searches run with `budget`.
    pub fn reply_with_budget(
        mut self,
        budget: SearchBudget,
        moves: &str,
        evaluation: Evaluation,
    ) -> Self {
        self.budget_replies.push((budget, command_of(moves), evaluation));
        self
    }

    /// Makes the `call`-th search (counting from zero) fail. A crash is
    /// permanent.
    pub fn fail_at(mut self, call: usize, fault: Fault) -> Self {
        self.faults.insert(call, fault);
        self
    }

    /// Distinct positions searched
    pub fn searched(&self) -> HashSet<&str> {
        self.calls.iter().map(String::as_str).collect()
    }
}

impl Engine for ScriptedEngine {
    fn identity(&self) -> &str {
        &self.name
    }

    fn new_game(&mut self) {
        self.new_games += 1;
    }

    fn evaluate(&mut self, position: &EnginePosition, budget: SearchBudget) -> Result<Evaluation> {
        let call = self.calls.len();
        let command = position.position_command();
        self.calls.push(command.clone());
        self.budgets.push(budget);

        if self.crashed {
            return Err(Error::EngineCrashed("engine is gone".into()));
        }
        match self.faults.get(&call) {
            Some(Fault::Timeout) => {
                let budget = match budget {
                    SearchBudget::MoveTime(d) => d,
                    SearchBudget::Depth(_) => Duration::ZERO,
                };
                return Err(Error::EngineTimeout { budget });
            }
            Some(Fault::Crash) => {
                self.crashed = true;
                return Err(Error::EngineCrashed("engine exited".into()));
            }
            None => {}
        }

        let scripted = self
            .budget_replies
            .iter()
            .find(|(b, c, _)| *b == budget && *c == command)
            .map(|(_, _, evaluation)| evaluation)
            .or_else(|| self.replies.get(&command));
        Ok(scripted
            .cloned()
            .unwrap_or_else(|| Evaluation::terminal(Score::Cp(0))))
    }
}

fn command_of(moves: &str) -> String {
    moves
        .split_whitespace()
        .fold(EnginePosition::startpos(), |pos, mv| pos.child(uci(mv)))
        .position_command()
}

pub fn uci(s: &str) -> UciMove {
    s.parse().unwrap()
}

/// Builds an evaluation whose best move is the head of `pv`.
pub fn eval(score: Score, depth: u32, pv: &str) -> Evaluation {
    let pv: Vec<UciMove> = pv.split_whitespace().map(uci).collect();
    Evaluation {
        best_move: pv.first().cloned(),
        score,
        pv,
        depth,
        nodes: 1000,
        time: Duration::from_millis(10),
    }
}

pub const BUDGET: SearchBudget = SearchBudget::MoveTime(Duration::from_millis(10));
