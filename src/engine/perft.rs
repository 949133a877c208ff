use std::time::Instant;

use crate::board::board::Board;
use crate::moves::movegenerator::MGT;

/// Counts leaf nodes of the legal move tree, the standard movegen shakedown
pub fn perft(board: &Board, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let mut count = 0;
    for entry in board.generate_moves(MGT::All).iter() {
        let mut next = *board;
        if !next.make_move(entry.m) {
            continue;
        }
        count += perft(&next, depth - 1);
    }
    count
}

/// Prints per-root-move totals the way GUIs expect from `go perft`
pub fn divide(board: &Board, depth: u32) -> u64 {
    let start = Instant::now();
    let mut total = 0;
    for entry in board.generate_moves(MGT::All).iter() {
        let mut next = *board;
        if !next.make_move(entry.m) {
            continue;
        }
        let count = if depth > 0 { perft(&next, depth - 1) } else { 1 };
        println!("{}: {count}", entry.m);
        total += count;
    }
    let elapsed = start.elapsed().as_secs_f64();
    println!("{total} nodes in {elapsed:.3}s ({:.0} nps)", total as f64 / elapsed.max(1e-9));
    total
}

#[cfg(test)]
mod perft_tests {
    use crate::board::fen::{build_board, STARTING_FEN};

    use super::*;

    #[test]
    fn startpos() {
        let board = build_board(STARTING_FEN);
        assert_eq!(perft(&board, 1), 20);
        assert_eq!(perft(&board, 2), 400);
        assert_eq!(perft(&board, 3), 8_902);
        assert_eq!(perft(&board, 4), 197_281);
    }

    #[test]
    fn kiwipete() {
        let board = build_board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        assert_eq!(perft(&board, 1), 48);
        assert_eq!(perft(&board, 2), 2_039);
        assert_eq!(perft(&board, 3), 97_862);
    }

    #[test]
    fn tricky_pins_and_ep() {
        let board = build_board("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1");
        assert_eq!(perft(&board, 1), 14);
        assert_eq!(perft(&board, 2), 191);
        assert_eq!(perft(&board, 3), 2_812);
        assert_eq!(perft(&board, 4), 43_238);
    }

    #[test]
    fn promotion_heavy() {
        let board = build_board("n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1");
        assert_eq!(perft(&board, 1), 24);
        assert_eq!(perft(&board, 2), 496);
        assert_eq!(perft(&board, 3), 9_483);
    }

    #[test]
    fn position_four() {
        let board = build_board("r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1");
        assert_eq!(perft(&board, 1), 6);
        assert_eq!(perft(&board, 2), 264);
        assert_eq!(perft(&board, 3), 9_467);
    }

    #[test]
    fn position_five() {
        let board = build_board("rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8");
        assert_eq!(perft(&board, 1), 44);
        assert_eq!(perft(&board, 2), 1_486);
        assert_eq!(perft(&board, 3), 62_379);
    }
}
