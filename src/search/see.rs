use crate::board::board::Board;
use crate::moves::attack_boards::BETWEEN;
use crate::moves::magics::{bishop_attacks, rook_attacks};
use crate::moves::moves::{Move, MoveFlag};
use crate::types::bitboard::Bitboard;
use crate::types::pieces::{Color, PieceName};

/// Sliders that would attack the king if the pieces between them moved, per
/// side, plus the pieces doing the blocking
struct Pins {
    pinners: [Bitboard; 2],
    king_blockers: [Bitboard; 2],
}

fn pins(board: &Board) -> Pins {
    let mut result = Pins { pinners: [Bitboard::EMPTY; 2], king_blockers: [Bitboard::EMPTY; 2] };
    for color in [Color::White, Color::Black] {
        let king = board.king_square(color);
        let snipers = (rook_attacks(king, Bitboard::EMPTY) & board.orthos(!color)
            | bishop_attacks(king, Bitboard::EMPTY) & board.diags(!color))
            & board.color(!color);
        let occ = board.occupancies() ^ snipers;
        for sniper in snipers {
            let blockers = BETWEEN[king][sniper.idx()] & occ;
            if !blockers.is_empty() && !blockers.more_than_one() {
                result.king_blockers[color] |= blockers;
                if !(blockers & board.color(color)).is_empty() {
                    result.pinners[!color] |= sniper.bitboard();
                }
            }
        }
    }
    result
}

/// Whether the capture sequence starting with `m` nets at least `margin`
/// for the side making it. Classical iterative swap-off with x-ray
/// extension; pinned pieces sit the exchange out while their pinner is
/// still on the board. Non-normal moves are treated as neutral.
pub fn see(board: &Board, m: Move, margin: i32) -> bool {
    if m.flag() != MoveFlag::Normal {
        return margin <= 0;
    }

    let from = m.from();
    let to = m.to();
    let state = pins(board);

    let victim = board.piece_at(to);
    let mut swap = if victim == crate::types::pieces::Piece::None { 0 } else { victim.value() } - margin;
    if swap < 0 {
        return false;
    }
    swap = board.piece_at(from).value() - swap;
    if swap <= 0 {
        return true;
    }

    let mut occupied = board.occupancies() ^ from.bitboard() ^ to.bitboard();
    let mut stm = board.stm;
    let mut attackers = board.attackers(to, occupied);
    let diags = board.piece(PieceName::Bishop) | board.piece(PieceName::Queen);
    let orthos = board.piece(PieceName::Rook) | board.piece(PieceName::Queen);

    let mut res = true;
    loop {
        stm = !stm;
        attackers &= occupied;

        let mut my_attackers = attackers & board.color(stm);
        if my_attackers.is_empty() {
            break;
        }
        // Pinned defenders cannot legally join in while the pinner stands
        if !(state.pinners[!stm] & occupied).is_empty() {
            my_attackers &= !state.king_blockers[stm];
            if my_attackers.is_empty() {
                break;
            }
        }
        res = !res;

        // Take with the least valuable attacker and open any x-ray behind it
        let mut next_attacker = None;
        for pt in [
            PieceName::Pawn,
            PieceName::Knight,
            PieceName::Bishop,
            PieceName::Rook,
            PieceName::Queen,
            PieceName::King,
        ] {
            let candidates = my_attackers & board.piece(pt);
            if !candidates.is_empty() {
                next_attacker = Some((pt, candidates.lsb()));
                break;
            }
        }
        let (pt, sq) = next_attacker.unwrap();

        if pt == PieceName::King {
            // The king can only take when the opponent has no reply
            if !(attackers & board.color(!stm) & occupied).is_empty() {
                res = !res;
            }
            break;
        }

        swap = pt.value() - swap;
        if swap < i32::from(res) {
            break;
        }

        occupied ^= sq.bitboard();
        if matches!(pt, PieceName::Pawn | PieceName::Bishop) {
            attackers |= bishop_attacks(to, occupied) & diags;
        } else if pt == PieceName::Rook {
            attackers |= rook_attacks(to, occupied) & orthos;
        } else if pt == PieceName::Queen {
            attackers |= bishop_attacks(to, occupied) & diags | rook_attacks(to, occupied) & orthos;
        }
    }

    res
}

#[cfg(test)]
mod see_tests {
    use crate::board::fen::build_board;
    use crate::moves::moves::from_uci;
    use crate::spsa::{PAWN_VALUE, ROOK_VALUE};

    use super::*;

    fn see_uci(fen: &str, uci: &str, margin: i32) -> bool {
        let board = build_board(fen);
        let m = from_uci(uci, &board).unwrap();
        see(&board, m, margin)
    }

    #[test]
    fn winning_pawn_capture() {
        // Rook takes an undefended pawn
        assert!(see_uci("1k1r4/1pp4p/p7/4p3/8/P5P1/1PP4P/2K1R3 w - - 0 1", "e1e5", 0));
        assert!(see_uci("1k1r4/1pp4p/p7/4p3/8/P5P1/1PP4P/2K1R3 w - - 0 1", "e1e5", PAWN_VALUE.val()));
        assert!(!see_uci("1k1r4/1pp4p/p7/4p3/8/P5P1/1PP4P/2K1R3 w - - 0 1", "e1e5", PAWN_VALUE.val() + 1));
    }

    #[test]
    fn defended_pawn_loses_the_rook() {
        // The pawn is defended by the rook behind it, so RxP drops the exchange
        assert!(!see_uci("1k2r3/1pp4p/p7/4p3/8/P5P1/1PP4P/2K1R3 w - - 0 1", "e1e5", 0));
        assert!(see_uci("1k2r3/1pp4p/p7/4p3/8/P5P1/1PP4P/2K1R3 w - - 0 1", "e1e5", PAWN_VALUE.val() - ROOK_VALUE.val()));
    }

    #[test]
    fn equal_trade_passes_zero() {
        // NxN recaptured by a pawn: net zero
        assert!(see_uci("4k3/8/3p4/4n3/8/3N4/8/4K3 w - - 0 1", "d3e5", 0));
        assert!(!see_uci("4k3/8/3p4/4n3/8/3N4/8/4K3 w - - 0 1", "d3e5", 1));
    }

    #[test]
    fn xray_support_counts() {
        // Doubled rooks win the pawn exchange on d5
        assert!(see_uci("1k1r3r/8/8/3p4/8/8/3R4/1K1R4 w - - 0 1", "d2d5", 0));
    }

    #[test]
    fn monotone_in_threshold() {
        let board = build_board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        for entry in board.generate_moves(crate::moves::movegenerator::MGT::CapturesOnly).iter() {
            for t in [-300, -100, 0, 100, 300] {
                // Passing a higher threshold implies passing every lower one
                if see(&board, entry.m, t) {
                    assert!(see(&board, entry.m, t - 50), "{} at {}", entry.m, t);
                }
            }
        }
    }

    #[test]
    fn non_normal_moves_are_neutral() {
        let board = build_board("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        let ep = from_uci("e5f6", &board).unwrap();
        assert!(ep.is_en_passant());
        assert!(see(&board, ep, 0));
        assert!(!see(&board, ep, 1));
    }
}
