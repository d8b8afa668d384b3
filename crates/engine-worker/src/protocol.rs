//! UCI line codec: outgoing commands and incoming response classification.

use std::time::Duration;

use chess_core::Position;
use serde::Serialize;

/// One outgoing instruction. Each encodes to exactly one newline-terminated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Uci,
    IsReady,
    SetOption { name: &'a str, value: &'a str },
    Position(&'a Position),
    Go(GoLimits),
    Quit,
}

impl Command<'_> {
    pub fn encode(&self) -> String {
        let mut line = match self {
            Command::Uci => "uci".to_string(),
            Command::IsReady => "isready".to_string(),
            Command::SetOption { name, value } => format!("setoption name {name} value {value}"),
            Command::Position(position) => format!("position fen {position}"),
            Command::Go(limits) => limits.encode(),
            Command::Quit => "quit".to_string(),
        };
        line.push('\n');
        line
    }
}

/// Search constraints for a `go` command. Either, both or neither may be set;
/// the engine stops at whichever triggers first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoLimits {
    pub depth: Option<u32>,
    pub movetime: Option<Duration>,
}

impl GoLimits {
    fn encode(&self) -> String {
        let mut cmd = String::from("go");
        if let Some(depth) = self.depth {
            cmd.push_str(&format!(" depth {depth}"));
        }
        if let Some(movetime) = self.movetime {
            cmd.push_str(&format!(" movetime {}", movetime.as_millis()));
        }
        cmd
    }
}

/// Engine evaluation, from the side to move's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    /// Centipawns
    Cp(i32),
    /// Mate in N moves (negative = side to move gets mated)
    Mate(i32),
}

/// Terminal line of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestMove {
    Move { uci: String, ponder: Option<String> },
    /// `bestmove (none)`: the side to move has no legal move
    NoMove,
}

/// Classification of one incoming line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `id name ...`
    Id { name: String },
    /// `uciok`
    UciOk,
    /// `readyok`
    ReadyOk,
    /// `info ...`, with its score if it carries one
    Info { score: Option<Score> },
    BestMove(BestMove),
    /// An explicit error reported by the engine
    Error(String),
    Unrecognized,
}

/// Classify one line of engine output.
pub fn decode(line: &str) -> Response {
    let trimmed = line.trim();
    let mut tokens = trimmed.split_whitespace();
    match tokens.next() {
        Some("uciok") => Response::UciOk,
        Some("readyok") => Response::ReadyOk,
        Some("id") => match tokens.next() {
            Some("name") => Response::Id {
                name: tokens.collect::<Vec<_>>().join(" "),
            },
            _ => Response::Unrecognized,
        },
        Some("bestmove") => decode_bestmove(tokens),
        Some("info") => {
            if is_error_string(trimmed) {
                Response::Error(trimmed.to_string())
            } else {
                Response::Info {
                    score: parse_score(trimmed),
                }
            }
        }
        Some(first) if is_error_marker(first, trimmed) => Response::Error(trimmed.to_string()),
        _ => Response::Unrecognized,
    }
}

fn decode_bestmove<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Response {
    match tokens.next() {
        None => Response::Error("bestmove line without a move".to_string()),
        Some("(none)") | Some("0000") => Response::BestMove(BestMove::NoMove),
        Some(uci) => {
            let ponder = match (tokens.next(), tokens.next()) {
                (Some("ponder"), Some(p)) => Some(p.to_string()),
                _ => None,
            };
            Response::BestMove(BestMove::Move {
                uci: uci.to_string(),
                ponder,
            })
        }
    }
}

fn is_error_marker(first: &str, line: &str) -> bool {
    first.eq_ignore_ascii_case("error")
        || first.eq_ignore_ascii_case("error:")
        || line.starts_with("Unknown command")
}

/// Stockfish reports fatal problems (e.g. a missing network file) as
/// `info string ERROR: ...`.
fn is_error_string(line: &str) -> bool {
    line.split_whitespace()
        .skip_while(|t| *t != "string")
        .nth(1)
        .is_some_and(|t| t.starts_with("ERROR"))
}

/// Parse the score of an info line. `cp` and `mate` are mutually exclusive;
/// the first one after `score` wins.
fn parse_score(line: &str) -> Option<Score> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let idx = parts.iter().position(|p| *p == "score")?;
    let kind = *parts.get(idx + 1)?;
    let value: i32 = parts.get(idx + 2)?.parse().ok()?;
    match kind {
        "cp" => Some(Score::Cp(value)),
        "mate" => Some(Score::Mate(value)),
        _ => None,
    }
}

/// Folds the response stream of one search into its result.
///
/// Only the most recent scored info line is kept, so the score reported is the
/// one immediately preceding `bestmove`.
#[derive(Debug, Default)]
pub struct SearchCollector {
    last_score: Option<Score>,
}

/// What a search ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEnd {
    Move {
        uci: String,
        ponder: Option<String>,
        score: Option<Score>,
    },
    NoMove,
    Error(String),
}

impl SearchCollector {
    /// Feed one decoded line; returns `Some` once the search is finished.
    pub fn feed(&mut self, response: Response) -> Option<SearchEnd> {
        match response {
            Response::Info { score: Some(score) } => {
                self.last_score = Some(score);
                None
            }
            Response::BestMove(BestMove::Move { uci, ponder }) => Some(SearchEnd::Move {
                uci,
                ponder,
                score: self.last_score,
            }),
            Response::BestMove(BestMove::NoMove) => Some(SearchEnd::NoMove),
            Response::Error(msg) => Some(SearchEnd::Error(msg)),
            _ => None,
        }
    }
}
