//! Parsing of engine output lines (UCI protocol)

use shakmaty::uci::UciMove;

use super::analysis::Score;

/// One `info` line, reduced to the fields the annotator cares about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    /// `lowerbound`/`upperbound` scores are not exact and get skipped
    pub bound: bool,
    pub nodes: Option<u64>,
    pub time_ms: Option<u64>,
    pub pv: Vec<String>,
}

impl InfoLine {
    /// A line that can replace the current best evaluation.
    pub fn is_principal(&self) -> bool {
        self.score.is_some() && !self.bound && self.multipv.unwrap_or(1) == 1
    }
}

/// Parses an `info ...` line. Returns `None` for anything else, including
/// `info string` chatter.
pub fn parse_info(line: &str) -> Option<InfoLine> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "info" {
        return None;
    }

    let parts: Vec<&str> = parts.collect();
    if parts.first() == Some(&"string") {
        return None;
    }

    let mut info = InfoLine::default();
    let mut i = 0;
    while i < parts.len() {
        match parts[i] {
            "depth" => {
                info.depth = parts.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "multipv" => {
                info.multipv = parts.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "score" => {
                let value = parts.get(i + 2).and_then(|v| v.parse::<i32>().ok());
                info.score = match (parts.get(i + 1), value) {
                    (Some(&"cp"), Some(cp)) => Some(Score::Cp(cp)),
                    (Some(&"mate"), Some(n)) => Some(Score::Mate(n)),
                    _ => None,
                };
                i += 3;
            }
            "lowerbound" | "upperbound" => {
                info.bound = true;
                i += 1;
            }
            "nodes" => {
                info.nodes = parts.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "time" => {
                info.time_ms = parts.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "pv" => {
                // Everything after "pv" is the principal variation
                info.pv = parts[i + 1..]
                    .iter()
                    .take_while(|m| !matches!(**m, "string" | "bmc"))
                    .map(|m| m.to_string())
                    .collect();
                break;
            }
            _ => i += 1,
        }
    }

    Some(info)
}

/// Result of parsing a `bestmove` line
#[derive(Debug, Clone, PartialEq)]
pub enum BestMove {
    Move(UciMove),
    /// `bestmove (none)` or `bestmove 0000`: no legal moves
    None,
}

/// Parses `bestmove e2e4 [ponder e7e5]`. `Some(Err(token))` means the line
/// was a `bestmove` line but the move did not parse.
pub fn parse_bestmove(line: &str) -> Option<Result<BestMove, String>> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "bestmove" {
        return None;
    }

    Some(match parts.next() {
        None | Some("(none)") | Some("0000") => Ok(BestMove::None),
        Some(token) => token
            .parse::<UciMove>()
            .map(BestMove::Move)
            .map_err(|_| token.to_string()),
    })
}

/// Parses `id name <identity>`.
pub fn parse_id_name(line: &str) -> Option<String> {
    line.strip_prefix("id name ").map(|name| name.trim().to_string())
}

/// Parses the option name out of `option name <Name> type ...`.
pub fn parse_option_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix("option name ")?;
    let name = match rest.find(" type ") {
        Some(end) => &rest[..end],
        None => rest,
    };
    Some(name.trim().to_string())
}

/// Values of a `combo` option, one per `var` token.
pub fn parse_option_vars(line: &str) -> Vec<String> {
    let mut parts = line.split_whitespace();
    let mut vars = Vec::new();
    while let Some(part) = parts.next() {
        if part == "var" {
            if let Some(value) = parts.next() {
                vars.push(value.to_string());
            }
        }
    }
    vars
}
