use crate::board::board::Board;
use crate::types::pieces::PieceName;

/// Win-rate model fitted on engine self-play the Stockfish way: `a` is the
/// centipawn value of a 50% win chance at the current material level, `b`
/// the spread of the logistic.
fn win_rate_params(board: &Board) -> (f64, f64) {
    let material = board.piece(PieceName::Pawn).count_bits() as i32
        + 3 * board.piece(PieceName::Knight).count_bits() as i32
        + 3 * board.piece(PieceName::Bishop).count_bits() as i32
        + 5 * board.piece(PieceName::Rook).count_bits() as i32
        + 9 * board.piece(PieceName::Queen).count_bits() as i32;
    // The fitted model only covers material counts in [17, 78], anchored at 58
    let m = f64::from(material.clamp(17, 78)) / 58.0;

    const AS: [f64; 4] = [-20.635_988_75, 6.253_408_32, -96.789_225_61, 352.884_513_44];
    const BS: [f64; 4] = [-45.216_187_63, 105.197_259_01, -36.495_092_68, 73.625_370_26];

    let a = ((AS[0] * m + AS[1]) * m + AS[2]) * m + AS[3];
    let b = ((BS[0] * m + BS[1]) * m + BS[2]) * m + BS[3];
    (a, b)
}

/// Win probability in permille for the side the score favors
fn win_rate(score: i32, board: &Board) -> i32 {
    let (a, b) = win_rate_params(board);
    (0.5 + 1000.0 / (1.0 + ((a - f64::from(score)) / b).exp())) as i32
}

/// Rescales an internal score so that 100 means a 50% chance of winning
pub fn normalize_eval(score: i32, board: &Board) -> i32 {
    let (a, _) = win_rate_params(board);
    (100.0 * f64::from(score) / a).round() as i32
}

pub fn compute_wdl(score: i32, board: &Board) -> (i32, i32, i32) {
    let w = win_rate(score, board);
    let l = win_rate(-score, board);
    (w, 1000 - w - l, l)
}

#[cfg(test)]
mod wdl_tests {
    use crate::board::fen::{build_board, STARTING_FEN};

    use super::*;

    #[test]
    fn level_scores_split_evenly() {
        let board = build_board(STARTING_FEN);
        let (w, d, l) = compute_wdl(0, &board);
        assert_eq!(w, l);
        assert_eq!(w + d + l, 1000);
        assert_eq!(normalize_eval(0, &board), 0);
    }

    #[test]
    fn winning_scores_tilt_the_distribution() {
        let board = build_board(STARTING_FEN);
        let (w_up, _, l_up) = compute_wdl(300, &board);
        assert!(w_up > l_up);
        let (w_down, _, l_down) = compute_wdl(-300, &board);
        assert!(l_down > w_down);
        assert!(normalize_eval(300, &board) > 0);
    }
}
