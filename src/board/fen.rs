use crate::moves::moves::Castle;
use crate::types::pieces::{Color, Piece};
use crate::types::square::Square;

use super::board::Board;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Builds a board from a FEN string. Malformed input panics; the UCI layer
/// guards what reaches this point.
pub fn build_board(fen: &str) -> Board {
    let mut board = Board::empty();
    let mut fields = fen.split_whitespace();

    let placement = fields.next().expect("empty fen");
    let mut rank = 7u8;
    let mut file = 0u8;
    for c in placement.chars() {
        match c {
            '/' => {
                rank -= 1;
                file = 0;
            }
            '1'..='8' => file += c.to_digit(10).unwrap() as u8,
            _ => {
                let sq = Square(rank * 8 + file);
                let piece = match c {
                    'P' => Piece::WhitePawn,
                    'N' => Piece::WhiteKnight,
                    'B' => Piece::WhiteBishop,
                    'R' => Piece::WhiteRook,
                    'Q' => Piece::WhiteQueen,
                    'K' => Piece::WhiteKing,
                    'p' => Piece::BlackPawn,
                    'n' => Piece::BlackKnight,
                    'b' => Piece::BlackBishop,
                    'r' => Piece::BlackRook,
                    'q' => Piece::BlackQueen,
                    'k' => Piece::BlackKing,
                    _ => panic!("unrecognized fen piece {c}"),
                };
                board.place_piece(piece, sq);
                file += 1;
            }
        }
    }

    board.stm = match fields.next().unwrap_or("w") {
        "b" => Color::Black,
        _ => Color::White,
    };

    board.castling_rights = fields.next().map_or(0, parse_castling);

    if let Some(ep) = fields.next() {
        let bytes = ep.as_bytes();
        if bytes.len() == 2 && bytes[0] != b'-' {
            board.en_passant_square = Some(Square((bytes[1] - b'1') * 8 + bytes[0] - b'a'));
        }
    }

    board.half_moves = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    board.full_moves = fields.next().and_then(|s| s.parse().ok()).unwrap_or(1);

    board.zobrist_hash = board.generate_hash();
    board.refresh_attack_info();
    board
}

fn parse_castling(field: &str) -> u8 {
    field.chars().fold(0, |rights, c| {
        rights
            | match c {
                'K' => Castle::WhiteKing as u8,
                'Q' => Castle::WhiteQueen as u8,
                'k' => Castle::BlackKing as u8,
                'q' => Castle::BlackQueen as u8,
                _ => 0,
            }
    })
}

impl Board {
    pub fn from_fen(fen: &str) -> Self {
        build_board(fen)
    }

    pub fn to_fen(&self) -> String {
        let mut fen = String::new();
        for rank in (0..8u8).rev() {
            let mut empty = 0;
            for file in 0..8u8 {
                let piece = self.piece_at(Square(rank * 8 + file));
                if piece == Piece::None {
                    empty += 1;
                    continue;
                }
                if empty > 0 {
                    fen.push(char::from_digit(empty, 10).unwrap());
                    empty = 0;
                }
                fen.push(piece.char());
            }
            if empty > 0 {
                fen.push(char::from_digit(empty, 10).unwrap());
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(match self.stm {
            Color::White => 'w',
            Color::Black => 'b',
        });

        fen.push(' ');
        if self.castling_rights == 0 {
            fen.push('-');
        } else {
            for (castle, c) in [
                (Castle::WhiteKing, 'K'),
                (Castle::WhiteQueen, 'Q'),
                (Castle::BlackKing, 'k'),
                (Castle::BlackQueen, 'q'),
            ] {
                if self.can_castle(castle) {
                    fen.push(c);
                }
            }
        }

        match self.en_passant_square {
            Some(sq) => fen.push_str(&format!(" {sq}")),
            None => fen.push_str(" -"),
        }
        fen.push_str(&format!(" {} {}", self.half_moves, self.full_moves));
        fen
    }
}

/// Reassembles the fen portion of a `position fen ...` command
pub fn parse_fen_from_buffer(tokens: &[&str]) -> String {
    tokens.iter().skip(2).take_while(|t| **t != "moves").copied().collect::<Vec<_>>().join(" ")
}
