//! Engine session over the UCI protocol
//!
//! Spawns the engine as a subprocess, performs the handshake and drives
//! repeated position/search round trips until the session is stopped.

use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use shakmaty::uci::UciMove;
use shakmaty::variant::Variant;
use tracing::{debug, trace, warn};

use super::analysis::{EnginePosition, Evaluation, SearchBudget};
use super::uci::{self, BestMove, InfoLine};
use super::Engine;
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Ready,
    Evaluating,
    Stopped,
}

/// Why a wait for engine output ended without the expected line
#[derive(Debug)]
enum WaitError {
    Timeout,
    Closed,
}

/// One running engine process. Owns the process handle exclusively; the
/// process is shut down when the session is stopped or dropped.
pub struct EngineSession {
    process: Child,
    stdin: BufWriter<ChildStdin>,
    /// Lines from the engine's stdout, fed by a reader thread
    lines: Receiver<String>,
    state: SessionState,
    identity: String,
    /// Option names advertised during the handshake
    options: HashSet<String>,
    /// Values offered by the `UCI_Variant` option
    variants: HashSet<String>,
    /// Last position sent, used to extend instead of resetting
    last_position: Option<EnginePosition>,
    chess960: bool,
    variant: Variant,
    config: EngineConfig,
}

impl EngineSession {
    /// Launches the engine and performs the handshake.
    ///
    /// Fails with `EngineUnavailable` if the program cannot be spawned or
    /// does not complete the handshake within `config.handshake_timeout`.
    pub fn start(config: &EngineConfig) -> Result<Self> {
        let command_line = config.command_line();
        let mut process = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::EngineUnavailable(format!("failed to launch '{}': {}", command_line, e))
            })?;

        let (stdin, stdout) = match (process.stdin.take(), process.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(Error::EngineUnavailable(format!(
                    "failed to open pipes to '{}'",
                    command_line
                )));
            }
        };

        let (tx, rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut session = EngineSession {
            process,
            stdin: BufWriter::new(stdin),
            lines: rx,
            state: SessionState::NotStarted,
            identity: String::new(),
            options: HashSet::new(),
            variants: HashSet::new(),
            last_position: None,
            chess960: false,
            variant: Variant::Chess,
            config: config.clone(),
        };

        if let Err(reason) = session.handshake() {
            session.kill();
            return Err(Error::EngineUnavailable(format!("'{}': {}", command_line, reason)));
        }

        session.state = SessionState::Ready;
        debug!(engine = %session.identity, threads = config.threads, "engine ready");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Option names the engine advertised
    pub fn options(&self) -> &HashSet<String> {
        &self.options
    }

    fn handshake(&mut self) -> std::result::Result<(), String> {
        let timeout = self.config.handshake_timeout;

        self.send("uci").map_err(|e| format!("failed to write to engine: {}", e))?;
        let lines = self
            .wait_for("uciok", timeout)
            .map_err(|e| describe_handshake_failure("uciok", e))?;

        for line in &lines {
            if let Some(name) = uci::parse_id_name(line) {
                self.identity = name;
            } else if let Some(option) = uci::parse_option_name(line) {
                if option == "UCI_Variant" {
                    self.variants.extend(uci::parse_option_vars(line));
                }
                self.options.insert(option);
            }
        }

        let threads = self.config.threads.to_string();
        self.set_option_if_available("Threads", &threads)
            .map_err(|e| format!("failed to configure threads: {}", e))?;
        if let Some(hash) = self.config.hash_mb {
            self.set_option_if_available("Hash", &hash.to_string())
                .map_err(|e| format!("failed to configure hash: {}", e))?;
        }

        self.sync_ready(timeout)
            .map_err(|e| describe_handshake_failure("readyok", e))
    }

    /// Sends a command to the engine
    fn send(&mut self, cmd: &str) -> io::Result<()> {
        trace!(cmd, "uci <");
        self.stdin.write_all(cmd.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }

    /// Reads lines until one equals `expected`, returning everything read
    fn wait_for(
        &mut self,
        expected: &str,
        timeout: Duration,
    ) -> std::result::Result<Vec<String>, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    trace!(line = line.as_str(), "uci >");
                    let done = line.trim() == expected;
                    lines.push(line);
                    if done {
                        return Ok(lines);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Err(WaitError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(WaitError::Closed),
            }
        }
    }

    fn sync_ready(&mut self, timeout: Duration) -> std::result::Result<(), WaitError> {
        self.send("isready").map_err(|_| WaitError::Closed)?;
        self.wait_for("readyok", timeout).map(|_| ())
    }

    fn set_option_if_available(&mut self, name: &str, value: &str) -> io::Result<()> {
        if self.options.is_empty() || self.options.contains(name) {
            self.send(&format!("setoption name {} value {}", name, value))?;
        }
        Ok(())
    }

    /// Whether the engine can play `variant`. An engine that advertised no
    /// options at all is given the benefit of the doubt.
    pub fn supports_variant(&self, variant: Variant) -> bool {
        if variant == Variant::Chess || self.options.is_empty() {
            return true;
        }
        self.options.contains("UCI_Variant")
            && (self.variants.is_empty() || self.variants.contains(variant.uci()))
    }

    /// Forgets the previous position so the next search starts a new game.
    fn reset(&mut self) {
        self.last_position = None;
    }

    fn prepare_position(&mut self, position: &EnginePosition) -> Result<()> {
        if position.chess960 != self.chess960 {
            let value = if position.chess960 { "true" } else { "false" };
            self.send(&format!("setoption name UCI_Chess960 value {}", value))
                .map_err(write_failed)?;
            self.chess960 = position.chess960;
        }
        if position.variant != self.variant {
            self.send(&format!(
                "setoption name UCI_Variant value {}",
                position.variant.uci()
            ))
            .map_err(write_failed)?;
            self.variant = position.variant;
        }

        let extends = self
            .last_position
            .as_ref()
            .is_some_and(|last| last.same_root(position));

        if extends {
            trace!(plies = position.moves.len(), "extending previous position");
        } else {
            self.send("ucinewgame").map_err(write_failed)?;
            let timeout = self.config.handshake_timeout;
            self.sync_ready(timeout).map_err(|e| match e {
                WaitError::Timeout => {
                    Error::EngineCrashed("engine did not answer isready".into())
                }
                WaitError::Closed => Error::EngineCrashed("engine closed its output".into()),
            })?;
        }

        let cmd = position.position_command();
        self.send(&cmd).map_err(write_failed)?;
        self.last_position = Some(position.clone());
        Ok(())
    }

    fn search(&mut self, position: &EnginePosition, budget: SearchBudget) -> Result<Evaluation> {
        self.prepare_position(position)?;
        self.send(&budget.go_command()).map_err(write_failed)?;

        let limit = match budget {
            SearchBudget::MoveTime(d) => d,
            SearchBudget::Depth(_) => self.config.depth_timeout,
        } + self.config.timeout_grace;

        let started = Instant::now();
        let mut principal: Option<InfoLine> = None;

        loop {
            let remaining = limit.saturating_sub(started.elapsed());
            let line = match self.lines.recv_timeout(remaining) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => return Err(self.abandon_search(limit)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::EngineCrashed(
                        "engine closed its output during search".into(),
                    ))
                }
            };
            trace!(line = line.as_str(), "uci >");

            if let Some(info) = uci::parse_info(&line) {
                if info.is_principal() {
                    principal = Some(info);
                }
            } else if let Some(best) = uci::parse_bestmove(&line) {
                return build_evaluation(best, principal, started.elapsed());
            }
        }
    }

    /// Stops a search that ran past its limit. The session survives only if
    /// the engine still delivers its `bestmove` within the grace period.
    fn abandon_search(&mut self, limit: Duration) -> Error {
        warn!(?limit, "search exceeded its limit, sending stop");
        let drained = self.send("stop").is_ok() && self.drain_bestmove(self.config.timeout_grace);

        if drained {
            self.state = SessionState::Ready;
        } else {
            warn!("engine ignored stop, terminating it");
            self.kill();
        }
        Error::EngineTimeout { budget: limit }
    }

    fn drain_bestmove(&mut self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    trace!(line = line.as_str(), "uci >");
                    if line.starts_with("bestmove") {
                        return true;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    /// Requests a graceful shutdown and kills the process if it lingers.
    /// Calling it again is a no-op.
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }

        let _ = self.send("quit");
        let deadline = Instant::now() + self.config.shutdown_grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.process.try_wait() {
                self.state = SessionState::Stopped;
                debug!(engine = %self.identity, "engine exited");
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.kill();
    }

    fn kill(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
        self.state = SessionState::Stopped;
    }
}

impl Engine for EngineSession {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn new_game(&mut self) {
        self.reset();
    }

    fn evaluate(&mut self, position: &EnginePosition, budget: SearchBudget) -> Result<Evaluation> {
        if self.state != SessionState::Ready {
            return Err(Error::EngineCrashed(format!(
                "session is not ready (state {:?})",
                self.state
            )));
        }
        if position.chess960
            && !self.options.is_empty()
            && !self.options.contains("UCI_Chess960")
        {
            return Err(Error::Config("engine does not support Chess960".into()));
        }
        if !self.supports_variant(position.variant) {
            return Err(Error::Config(format!(
                "engine does not support the {} variant",
                position.variant
            )));
        }

        self.state = SessionState::Evaluating;
        let result = self.search(position, budget);
        match &result {
            Ok(_) => self.state = SessionState::Ready,
            // abandon_search already decided whether the session survives
            Err(Error::EngineTimeout { .. }) => {}
            Err(e) => {
                warn!(error = %e, "engine session failed, stopping it");
                self.kill();
            }
        }
        result
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_failed(e: io::Error) -> Error {
    Error::EngineCrashed(format!("failed to write to engine: {}", e))
}

fn describe_handshake_failure(expected: &str, e: WaitError) -> String {
    match e {
        WaitError::Timeout => format!("no '{}' within the handshake window", expected),
        WaitError::Closed => format!("engine exited before sending '{}'", expected),
    }
}

fn build_evaluation(
    best: std::result::Result<BestMove, String>,
    principal: Option<InfoLine>,
    elapsed: Duration,
) -> Result<Evaluation> {
    let best_move = match best {
        Ok(BestMove::Move(mv)) => Some(mv),
        Ok(BestMove::None) => None,
        Err(token) => {
            return Err(Error::EngineCrashed(format!("unparsable best move '{}'", token)))
        }
    };

    let info = principal
        .ok_or_else(|| Error::EngineCrashed("bestmove arrived without a score".into()))?;
    let score = info
        .score
        .ok_or_else(|| Error::EngineCrashed("bestmove arrived without a score".into()))?;

    let mut pv = Vec::with_capacity(info.pv.len());
    for token in &info.pv {
        let mv: UciMove = token
            .parse()
            .map_err(|_| Error::EngineCrashed(format!("unparsable pv move '{}'", token)))?;
        pv.push(mv);
    }

    if let Some(best) = &best_move {
        if pv.first() != Some(best) {
            debug!(best = %best, "pv does not start with best move, using best move alone");
            pv = vec![best.clone()];
        }
    }

    Ok(Evaluation {
        best_move,
        score,
        pv,
        depth: info.depth.unwrap_or(0),
        nodes: info.nodes.unwrap_or(0),
        time: info.time_ms.map(Duration::from_millis).unwrap_or(elapsed),
    })
}
