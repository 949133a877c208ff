use lazy_static::lazy_static;

use crate::board::board::Board;
use crate::board::zobrist::ZOBRIST;
use crate::moves::attack_boards::{king_attacks, knight_attacks, BETWEEN};
use crate::moves::magics::{bishop_attacks, queen_attacks, rook_attacks};
use crate::moves::moves::{Move, MoveFlag};
use crate::types::bitboard::Bitboard;
use crate::types::pieces::{Color, Piece, PieceName};
use crate::types::square::Square;

const TABLE_SIZE: usize = 8192;

/// Two-hash cuckoo table of every reversible single-piece move, keyed by the
/// XOR of its zobrist terms. A position pair whose hashes differ by exactly
/// one table key is one reversible move away from repeating.
pub struct Cuckoo {
    keys: [u64; TABLE_SIZE],
    moves: [Move; TABLE_SIZE],
    pub entries: u32,
}

lazy_static! {
    pub static ref CUCKOO: Cuckoo = Cuckoo::build();
}

const fn h1(key: u64) -> usize {
    (key % TABLE_SIZE as u64) as usize
}

const fn h2(key: u64) -> usize {
    ((key >> 16) % TABLE_SIZE as u64) as usize
}

impl Cuckoo {
    fn build() -> Self {
        let mut keys = [0u64; TABLE_SIZE];
        let mut moves = [Move::NONE; TABLE_SIZE];
        let mut entries = 0u32;

        for pt in [PieceName::Knight, PieceName::Bishop, PieceName::Rook, PieceName::Queen, PieceName::King] {
            for color in [Color::White, Color::Black] {
                for from in 0..63u8 {
                    for to in from + 1..64 {
                        let (from, to) = (Square(from), Square(to));
                        let attacks = match pt {
                            PieceName::Knight => knight_attacks(from),
                            PieceName::Bishop => bishop_attacks(from, Bitboard::EMPTY),
                            PieceName::Rook => rook_attacks(from, Bitboard::EMPTY),
                            PieceName::Queen => queen_attacks(from, Bitboard::EMPTY),
                            PieceName::King => king_attacks(from),
                            PieceName::Pawn => unreachable!(),
                        };
                        if !attacks.occupied(to) {
                            continue;
                        }

                        let mut key = ZOBRIST.piece_square[color][pt][from]
                            ^ ZOBRIST.piece_square[color][pt][to]
                            ^ ZOBRIST.turn;
                        let mut m = Move::new(from, to, MoveFlag::Normal);

                        // Cuckoo insertion: evict and rehome until a slot
                        // frees up. Table load is under half, so this
                        // terminates.
                        let mut slot = h1(key);
                        loop {
                            std::mem::swap(&mut keys[slot], &mut key);
                            std::mem::swap(&mut moves[slot], &mut m);
                            if m == Move::NONE {
                                break;
                            }
                            slot = if slot == h1(key) { h2(key) } else { h1(key) };
                        }
                        entries += 1;
                    }
                }
            }
        }

        Self { keys, moves, entries }
    }

    fn probe(&self, diff: u64) -> Option<Move> {
        let slot = h1(diff);
        if self.keys[slot] == diff {
            return Some(self.moves[slot]);
        }
        let slot = h2(diff);
        if self.keys[slot] == diff {
            return Some(self.moves[slot]);
        }
        None
    }
}

/// Whether the side to move has a reversible move that repeats a position
/// from the game or search line. `history` holds every position hash up to
/// and including the current one.
pub fn upcoming_repetition(board: &Board, history: &[u64]) -> bool {
    let n = history.len();
    if n < 4 {
        return false;
    }
    let reach = (board.half_moves as usize).min(n - 1);
    let current = board.zobrist_hash;

    // Only positions where the opponent was on move can be repeated by a
    // single move of ours, so only odd distances back matter
    let mut dist = 3;
    while dist <= reach {
        let diff = current ^ history[n - 1 - dist];
        if let Some(m) = CUCKOO.probe(diff) {
            // The move has to be playable over the current occupancy
            if (BETWEEN[m.from()][m.to().idx()] & board.occupancies()).is_empty() {
                let mover = board.piece_at(m.from());
                let mover = if mover == Piece::None { board.piece_at(m.to()) } else { mover };
                if mover != Piece::None && mover.color() == board.stm {
                    return true;
                }
            }
        }
        dist += 2;
    }
    false
}

#[cfg(test)]
mod cuckoo_tests {
    use crate::board::fen::build_board;
    use crate::moves::moves::from_uci;

    use super::*;

    #[test]
    fn construction_terminates_with_all_entries() {
        // 3668 reversible (piece, from < to) pairs exist on an empty board
        assert_eq!(CUCKOO.entries, 3668);
        let filled = CUCKOO.keys.iter().filter(|&&k| k != 0).count();
        assert_eq!(filled as u32, CUCKOO.entries);
    }

    #[test]
    fn probe_finds_reversible_moves() {
        let key = ZOBRIST.piece_square[Color::White][PieceName::Knight][Square(1)]
            ^ ZOBRIST.piece_square[Color::White][PieceName::Knight][Square(18)]
            ^ ZOBRIST.turn;
        let m = CUCKOO.probe(key).expect("knight b1-c3 is reversible");
        assert_eq!((m.from(), m.to()), (Square(1), Square(18)));
        // Pawn moves are not reversible and never inserted
        let pawn_key = ZOBRIST.piece_square[Color::White][PieceName::Pawn][Square(12)]
            ^ ZOBRIST.piece_square[Color::White][PieceName::Pawn][Square(20)]
            ^ ZOBRIST.turn;
        assert!(CUCKOO.probe(pawn_key).is_none());
    }

    #[test]
    fn detects_an_upcoming_repetition() {
        // Shuffle knights out and back: after Ng1-f3 Ng8-f6 Nf3-g1, black's
        // Nf6-g8 would complete the repetition
        let start = build_board(crate::board::fen::STARTING_FEN);
        let mut history = vec![start.zobrist_hash];
        let mut board = start;
        for uci in ["g1f3", "g8f6", "f3g1"] {
            let m = from_uci(uci, &board).unwrap();
            assert!(board.make_move(m));
            history.push(board.zobrist_hash);
        }
        assert!(upcoming_repetition(&board, &history));
        assert!(!upcoming_repetition(&start, &[start.zobrist_hash]));
    }
}
