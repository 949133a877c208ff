use lazy_static::lazy_static;
use strum::IntoEnumIterator;

use crate::moves::magics::Rng;
use crate::moves::moves::Move;
use crate::types::pieces::{Color, Piece, PieceName};
use crate::types::square::Square;

use super::board::Board;

pub struct Zobrist {
    pub piece_square: [[[u64; 64]; 6]; 2],
    pub turn: u64,
    pub castling: [u64; 16],
    pub en_passant: [u64; 64],
}

lazy_static! {
    pub static ref ZOBRIST: Zobrist = Zobrist::default();
}

impl Default for Zobrist {
    fn default() -> Self {
        let mut rng = Rng::default();
        let mut piece_square = [[[0; 64]; 6]; 2];
        piece_square.iter_mut().flatten().flatten().for_each(|x| *x = rng.next_u64());
        let turn = rng.next_u64();
        let mut castling = [0; 16];
        castling.iter_mut().for_each(|x| *x = rng.next_u64());
        let mut en_passant = [0; 64];
        en_passant.iter_mut().for_each(|x| *x = rng.next_u64());
        Self { piece_square, turn, castling, en_passant }
    }
}

fn piece_hash(piece: Piece, sq: Square) -> u64 {
    ZOBRIST.piece_square[piece.color()][piece.name()][sq]
}

/// The four incrementally maintained sub-keys that feed correction history.
/// Major counts R/Q/K, minor N/B/K, non-pawn everything but pawns split by
/// owner color.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubKeys {
    pub pawn: u64,
    pub major: u64,
    pub minor: u64,
    pub non_pawn: [u64; 2],
}

impl SubKeys {
    pub fn from_board(board: &Board) -> Self {
        Self {
            pawn: board.pawn_key(),
            major: board.major_key(),
            minor: board.minor_key(),
            non_pawn: [board.non_pawn_key(Color::White), board.non_pawn_key(Color::Black)],
        }
    }

    /// Propagates the sub-keys across a move by XOR-ing only the affected
    /// piece-square terms. `board` is the position the move is played from.
    pub fn advance(&self, board: &Board, m: Move) -> Self {
        let mut keys = *self;
        if m == Move::NULL_MOVE {
            return keys;
        }

        let stm = board.stm;
        let from = m.from();
        let to = m.to();
        let piece = board.piece_at(from);
        debug_assert!(piece != Piece::None);

        if m.is_castle() {
            let castle = m.castle_kind();
            let king = Piece::new(PieceName::King, stm);
            let rook = Piece::new(PieceName::Rook, stm);
            let king_terms = piece_hash(king, from) ^ piece_hash(king, to);
            let rook_terms = piece_hash(rook, castle.rook_from()) ^ piece_hash(rook, castle.rook_to());
            keys.major ^= king_terms ^ rook_terms;
            keys.minor ^= king_terms;
            keys.non_pawn[stm] ^= king_terms ^ rook_terms;
            return keys;
        }

        let captured = board.capture(m);
        if captured != Piece::None {
            let term = if m.is_en_passant() {
                let victim = match stm {
                    Color::White => Square(to.0 - 8),
                    Color::Black => Square(to.0 + 8),
                };
                piece_hash(captured, victim)
            } else {
                piece_hash(captured, to)
            };
            if captured.name() == PieceName::Pawn {
                keys.pawn ^= term;
            } else {
                keys.non_pawn[captured.color()] ^= term;
                if captured.name().is_major() {
                    keys.major ^= term;
                }
                if captured.name().is_minor() {
                    keys.minor ^= term;
                }
            }
        }

        if piece.name() == PieceName::Pawn {
            keys.pawn ^= piece_hash(piece, from);
            if let Some(promo) = m.promotion() {
                let promoted = Piece::new(promo, stm);
                let term = piece_hash(promoted, to);
                keys.non_pawn[stm] ^= term;
                if promo.is_major() {
                    keys.major ^= term;
                }
                if promo.is_minor() {
                    keys.minor ^= term;
                }
            } else {
                keys.pawn ^= piece_hash(piece, to);
            }
        } else {
            let terms = piece_hash(piece, from) ^ piece_hash(piece, to);
            keys.non_pawn[stm] ^= terms;
            if piece.name().is_major() {
                keys.major ^= terms;
            }
            if piece.name().is_minor() {
                keys.minor ^= terms;
            }
        }

        keys
    }
}

impl Board {
    /// Full hash recomputed from scratch, for validation and FEN setup
    pub fn generate_hash(&self) -> u64 {
        let mut hash = 0;
        for color in Color::iter() {
            for piece in PieceName::iter() {
                for sq in self.bitboard(color, piece) {
                    hash ^= ZOBRIST.piece_square[color][piece][sq];
                }
            }
        }
        if let Some(sq) = self.en_passant_square {
            hash ^= ZOBRIST.en_passant[sq];
        }
        hash ^= ZOBRIST.castling[self.castling_rights as usize];
        if self.stm == Color::Black {
            hash ^= ZOBRIST.turn;
        }
        hash
    }

    pub fn pawn_key(&self) -> u64 {
        self.key_over(self.piece(PieceName::Pawn))
    }

    pub fn major_key(&self) -> u64 {
        self.key_over(self.piece(PieceName::Rook) | self.piece(PieceName::Queen) | self.piece(PieceName::King))
    }

    pub fn minor_key(&self) -> u64 {
        self.key_over(self.piece(PieceName::Knight) | self.piece(PieceName::Bishop) | self.piece(PieceName::King))
    }

    pub fn non_pawn_key(&self, color: Color) -> u64 {
        self.key_over(self.color(color) ^ self.bitboard(color, PieceName::Pawn))
    }

    fn key_over(&self, pieces: crate::types::bitboard::Bitboard) -> u64 {
        let mut key = 0;
        for sq in pieces {
            key ^= piece_hash(self.piece_at(sq), sq);
        }
        key
    }
}

#[cfg(test)]
mod zobrist_tests {
    use crate::board::fen::{build_board, STARTING_FEN};
    use crate::moves::movegenerator::MGT;

    use super::*;

    #[test]
    fn incremental_hash_matches_recompute() {
        let board = build_board(STARTING_FEN);
        assert_eq!(board.zobrist_hash, board.generate_hash());

        // Walk a few plies of every generated move and compare the
        // incrementally maintained hash against a from-scratch recompute
        fn walk(board: &Board, depth: u32) {
            if depth == 0 {
                return;
            }
            for entry in board.generate_moves(MGT::All).iter() {
                let mut next = *board;
                if !next.make_move(entry.m) {
                    continue;
                }
                assert_eq!(next.zobrist_hash, next.generate_hash(), "after {}", entry.m);
                walk(&next, depth - 1);
            }
        }
        walk(&board, 3);
        walk(&build_board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1"), 2);
        walk(&build_board("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1"), 2);
    }

    #[test]
    fn sub_keys_advance_matches_recompute() {
        fn walk(board: &Board, keys: SubKeys, depth: u32) {
            assert_eq!(keys, SubKeys::from_board(board));
            if depth == 0 {
                return;
            }
            for entry in board.generate_moves(MGT::All).iter() {
                let next_keys = keys.advance(board, entry.m);
                let mut next = *board;
                if !next.make_move(entry.m) {
                    continue;
                }
                walk(&next, next_keys, depth - 1);
            }
        }
        for fen in [
            STARTING_FEN,
            // Castling, promotions and en passant all reachable
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1",
            "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
        ] {
            let board = build_board(fen);
            walk(&board, SubKeys::from_board(&board), 2);
        }
    }

    #[test]
    fn transposition_equivalence() {
        // Different move orders reaching the same position hash identically
        let a = build_board("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1");
        let b = build_board("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 5 20");
        assert_eq!(a.generate_hash(), b.generate_hash());
        assert_ne!(a.generate_hash(), build_board(STARTING_FEN).generate_hash());
    }
}
