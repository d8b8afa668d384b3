//! SAN rendering for engine moves.

use shakmaty::{fen::Fen, san::San, uci::UciMove, CastlingMode, Chess};

use crate::position::Position;

/// Convert a UCI move token to SAN at the given position.
///
/// Returns `None` when the position is not legal chess or the move is not legal
/// in it; the engine's UCI token stays authoritative either way.
pub fn san_for_uci(position: &Position, uci_str: &str) -> Option<String> {
    let fen: Fen = position.as_str().parse().ok()?;
    let pos: Chess = fen.into_position(CastlingMode::Standard).ok()?;
    let uci_move: UciMove = uci_str.parse().ok()?;
    let legal_move = uci_move.to_move(&pos).ok()?;
    Some(San::from_move(&pos, legal_move).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::validate;

    #[test]
    fn test_san_for_start_moves() {
        let pos = Position::startpos();
        assert_eq!(san_for_uci(&pos, "e2e4").as_deref(), Some("e4"));
        assert_eq!(san_for_uci(&pos, "g1f3").as_deref(), Some("Nf3"));
    }

    #[test]
    fn test_san_for_capture() {
        let pos = validate("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        assert_eq!(san_for_uci(&pos, "e4d5").as_deref(), Some("exd5"));
    }

    #[test]
    fn test_illegal_move_has_no_san() {
        let pos = Position::startpos();
        assert_eq!(san_for_uci(&pos, "e2e5"), None);
        assert_eq!(san_for_uci(&pos, "garbage"), None);
    }
}
