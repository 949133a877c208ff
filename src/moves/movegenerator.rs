use crate::types::pieces::{Color, PieceName};
use crate::types::square::Square;

use crate::board::board::Board;

use super::attack_boards::{king_attacks, knight_attacks, RANKS};
use super::magics::{bishop_attacks, queen_attacks, rook_attacks};
use super::movelist::MoveList;
use super::moves::{Castle, Direction, Move, MoveFlag};

#[allow(clippy::upper_case_acronyms)]
pub type MGT = MoveGenerationType;

/// Noisy moves are captures, en passant and capture promotions; everything
/// else, push promotions included, counts as quiet. The picker relies on the
/// two sets being disjoint.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum MoveGenerationType {
    CapturesOnly,
    QuietsOnly,
    All,
}

impl Board {
    /// Generates pseudo-legal moves; `make_move` filters out the ones that
    /// leave the king hanging
    pub fn generate_moves(&self, gen_type: MGT) -> MoveList {
        let mut moves = MoveList::default();
        self.gen_piece_moves(PieceName::Knight, gen_type, &mut moves);
        self.gen_piece_moves(PieceName::Bishop, gen_type, &mut moves);
        self.gen_piece_moves(PieceName::Rook, gen_type, &mut moves);
        self.gen_piece_moves(PieceName::Queen, gen_type, &mut moves);
        self.gen_piece_moves(PieceName::King, gen_type, &mut moves);
        self.gen_pawn_moves(gen_type, &mut moves);
        if gen_type != MGT::CapturesOnly {
            self.gen_castling_moves(&mut moves);
        }
        moves
    }

    fn gen_piece_moves(&self, name: PieceName, gen_type: MGT, moves: &mut MoveList) {
        let occupied = self.occupancies();
        for from in self.bitboard(self.stm, name) {
            let attacks = match name {
                PieceName::Knight => knight_attacks(from),
                PieceName::Bishop => bishop_attacks(from, occupied),
                PieceName::Rook => rook_attacks(from, occupied),
                PieceName::Queen => queen_attacks(from, occupied),
                PieceName::King => king_attacks(from),
                PieceName::Pawn => unreachable!(),
            };
            let targets = match gen_type {
                MGT::CapturesOnly => attacks & self.color(!self.stm),
                MGT::QuietsOnly => attacks & !occupied,
                MGT::All => attacks & !self.color(self.stm),
            };
            for to in targets {
                moves.push(Move::new(from, to, MoveFlag::Normal));
            }
        }
    }

    fn gen_castling_moves(&self, moves: &mut MoveList) {
        let castles = match self.stm {
            Color::White => [Castle::WhiteKing, Castle::WhiteQueen],
            Color::Black => [Castle::BlackKing, Castle::BlackQueen],
        };
        for castle in castles {
            if !self.can_castle(castle) {
                continue;
            }
            if !(self.occupancies() & castle.empty_squares()).is_empty() {
                continue;
            }
            if !(self.threats() & castle.check_squares()).is_empty() {
                continue;
            }
            let king = self.king_square(self.stm);
            let to = match castle {
                Castle::WhiteKing => Square(6),
                Castle::WhiteQueen => Square(2),
                Castle::BlackKing => Square(62),
                Castle::BlackQueen => Square(58),
            };
            moves.push(Move::new(king, to, MoveFlag::Castle));
        }
    }

    fn gen_pawn_moves(&self, gen_type: MGT, moves: &mut MoveList) {
        let pawns = self.bitboard(self.stm, PieceName::Pawn);
        let vacant = !self.occupancies();
        let enemies = self.color(!self.stm);

        let (up, promo_rank, third_rank) = match self.stm {
            Color::White => (Direction::North, RANKS[6], RANKS[2]),
            Color::Black => (Direction::South, RANKS[1], RANKS[5]),
        };
        let (up_west, up_east) = match self.stm {
            Color::White => (Direction::NorthWest, Direction::NorthEast),
            Color::Black => (Direction::SouthWest, Direction::SouthEast),
        };

        let promoting = pawns & promo_rank;
        let not_promoting = pawns & !promo_rank;

        if gen_type != MGT::CapturesOnly {
            // Single and double pushes
            let push_one = not_promoting.shift(up) & vacant;
            let push_two = (push_one & third_rank).shift(up) & vacant;
            for to in push_one {
                moves.push(Move::new(to.shift(up.opp()), to, MoveFlag::Normal));
            }
            for to in push_two {
                moves.push(Move::new(to.shift(up.opp()).shift(up.opp()), to, MoveFlag::Normal));
            }
            // Push promotions are quiet moves for picker purposes
            for to in promoting.shift(up) & vacant {
                push_promotions(to.shift(up.opp()), to, moves);
            }
        }

        if gen_type != MGT::QuietsOnly {
            for (dir, captures) in [
                (up_west, not_promoting.shift(up_west) & enemies),
                (up_east, not_promoting.shift(up_east) & enemies),
            ] {
                for to in captures {
                    moves.push(Move::new(to.shift(dir.opp()), to, MoveFlag::Normal));
                }
            }
            for (dir, captures) in [
                (up_west, promoting.shift(up_west) & enemies),
                (up_east, promoting.shift(up_east) & enemies),
            ] {
                for to in captures {
                    push_promotions(to.shift(dir.opp()), to, moves);
                }
            }
            if let Some(ep) = self.en_passant_square {
                let attackers = super::attack_boards::pawn_attacks(ep, !self.stm) & pawns;
                for from in attackers {
                    moves.push(Move::new(from, ep, MoveFlag::EnPassant));
                }
            }
        }
    }
}

fn push_promotions(from: Square, to: Square, moves: &mut MoveList) {
    for promo in [PieceName::Queen, PieceName::Rook, PieceName::Bishop, PieceName::Knight] {
        moves.push(Move::new_promotion(from, to, promo));
    }
}

/// Pawn double pushes carry no flag of their own, the distance tells
pub fn is_double_push(board: &Board, m: Move) -> bool {
    board.piece_at(m.from()) != crate::types::pieces::Piece::None
        && board.piece_at(m.from()).name() == PieceName::Pawn
        && m.from().dist(m.to()) == 2
        && m.from().file() == m.to().file()
}

pub fn legal_move_count(board: &Board) -> usize {
    board
        .generate_moves(MGT::All)
        .iter()
        .filter(|entry| {
            let mut copy = *board;
            copy.make_move(entry.m)
        })
        .count()
}

#[cfg(test)]
mod movegen_tests {
    use crate::board::fen::{build_board, STARTING_FEN};

    use super::*;

    #[test]
    fn startpos_move_counts() {
        let board = build_board(STARTING_FEN);
        assert_eq!(board.generate_moves(MGT::All).len(), 20);
        assert_eq!(board.generate_moves(MGT::CapturesOnly).len(), 0);
        assert_eq!(board.generate_moves(MGT::QuietsOnly).len(), 20);
    }

    #[test]
    fn quiet_and_noisy_partition_all() {
        let board = build_board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        let all = board.generate_moves(MGT::All).len();
        let noisy = board.generate_moves(MGT::CapturesOnly).len();
        let quiet = board.generate_moves(MGT::QuietsOnly).len();
        assert_eq!(all, noisy + quiet);
    }

    #[test]
    fn en_passant_generated() {
        let board = build_board("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        let captures = board.generate_moves(MGT::CapturesOnly);
        assert!(captures.iter().any(|e| e.m.is_en_passant()));
    }
}
