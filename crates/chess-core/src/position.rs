//! Structural validation of FEN position strings.
//!
//! This is a shape check, not a rules check: it guarantees the placement field
//! describes an 8x8 board with one king per side before the string is handed to
//! an external engine. Legality (check, castling rights, en passant) is left to
//! the engine.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Number of ranks and files on the board.
const BOARD_SIZE: u32 = 8;

/// Minimum whitespace-separated fields: placement, side, castling, en passant.
const MIN_FIELDS: usize = 4;

const PIECE_LETTERS: &str = "pnbrqkPNBRQK";

/// Side of the board, identified by the case of its piece letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => f.write_str("white"),
            Side::Black => f.write_str("black"),
        }
    }
}

/// Why a position string was rejected.
///
/// Ranks are reported by their chess number: the first group of the placement
/// field is rank 8, the last is rank 1.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("position is empty")]
    Empty,

    #[error("position has {found} field(s), expected at least 4")]
    TooFewFields { found: usize },

    #[error("placement has {found} rank(s), expected 8")]
    RankCount { found: usize },

    #[error("rank {rank} contains invalid character {ch:?}")]
    InvalidCharacter { rank: u32, ch: char },

    #[error("rank {rank} describes {width} square(s), expected 8")]
    RankWidth { rank: u32, width: u32 },

    #[error("found {found} {side} king(s), expected exactly 1")]
    KingCount { side: Side, found: usize },
}

/// A position string that passed [`validate`].
///
/// Immutable: the only way to obtain one is through validation, so holding a
/// `Position` means the placement field is a well-formed 8x8 board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Position {
    fen: String,
}

impl Position {
    /// The starting position.
    pub fn startpos() -> Self {
        Self {
            fen: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".to_string(),
        }
    }

    /// The full position string, whitespace-normalised.
    pub fn as_str(&self) -> &str {
        &self.fen
    }

    /// Side to move, when the second field is a recognised `w` or `b`.
    pub fn side_to_move(&self) -> Option<Side> {
        match self.fen.split(' ').nth(1) {
            Some("w") => Some(Side::White),
            Some("b") => Some(Side::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen)
    }
}

impl FromStr for Position {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)
    }
}

/// Validate a position string, short-circuiting on the first violated rule.
///
/// Rules, in order:
/// 1. non-empty with at least four whitespace-separated fields
/// 2. the placement field splits on `/` into exactly eight ranks
/// 3. every rank's digits plus piece letters add up to eight squares
/// 4. exactly one `K` and exactly one `k`
///
/// Fields after the placement are kept but not interpreted.
pub fn validate(fen: &str) -> Result<Position, PositionError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.is_empty() {
        return Err(PositionError::Empty);
    }
    if fields.len() < MIN_FIELDS {
        return Err(PositionError::TooFewFields {
            found: fields.len(),
        });
    }

    let placement = fields[0];
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != BOARD_SIZE as usize {
        return Err(PositionError::RankCount { found: ranks.len() });
    }

    for (i, group) in ranks.iter().enumerate() {
        let rank = BOARD_SIZE - i as u32;
        let width = rank_width(group, rank)?;
        if width != BOARD_SIZE {
            return Err(PositionError::RankWidth { rank, width });
        }
    }

    for (side, king) in [(Side::White, 'K'), (Side::Black, 'k')] {
        let found = placement.chars().filter(|&c| c == king).count();
        if found != 1 {
            return Err(PositionError::KingCount { side, found });
        }
    }

    Ok(Position {
        fen: fields.join(" "),
    })
}

/// Squares described by one rank group.
fn rank_width(group: &str, rank: u32) -> Result<u32, PositionError> {
    let mut width = 0;
    for ch in group.chars() {
        match ch {
            '1'..='8' => width += ch.to_digit(10).unwrap_or(0),
            _ if PIECE_LETTERS.contains(ch) => width += 1,
            _ => return Err(PositionError::InvalidCharacter { rank, ch }),
        }
    }
    Ok(width)
}
