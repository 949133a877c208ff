use crate::board::board::Board;
use crate::moves::attack_boards::{knight_attacks, pawn_set_attacks};
use crate::moves::magics::{bishop_attacks, rook_attacks};
use crate::search::see::see;
use crate::search::thread::ThreadData;
use crate::types::bitboard::Bitboard;
use crate::types::pieces::PieceName;

use super::movegenerator::MGT;
use super::movelist::{MoveList, MoveListEntry};
use super::moves::Move;

/// Most-valuable-victim bonus by captured piece type
const MVV: [i32; 6] = [800, 2400, 2400, 4800, 7200, 0];

#[derive(Clone, Copy, Eq, PartialEq)]
enum Stage {
    TTMove,
    GenNoisy,
    GoodNoisy,
    Killer,
    GenQuiet,
    Quiet,
    BadNoisy,
    Finished,
}

/// Staged move generation: the TT move first, then winning captures, the
/// killer, quiets by history and finally the captures SEE condemned. Each
/// stage is generated only when the previous one runs dry, so a fail-high
/// on the TT move never pays for move generation at all.
pub struct MovePicker {
    stage: Stage,
    moves: MoveList,
    bad_noisy: MoveList,
    current: usize,
    bad_current: usize,
    tt_move: Move,
    killer: Move,
    in_qsearch: bool,
    gen_quiets: bool,
    ply: i32,
}

impl MovePicker {
    pub fn new(tt_move: Move, killer: Move, ply: i32) -> Self {
        Self {
            stage: Stage::TTMove,
            moves: MoveList::default(),
            bad_noisy: MoveList::default(),
            current: 0,
            bad_current: 0,
            tt_move,
            killer,
            in_qsearch: false,
            gen_quiets: true,
            ply,
        }
    }

    /// Captures only, unless in check where evasions need the quiet moves too
    pub fn qsearch(tt_move: Move, in_check: bool, ply: i32) -> Self {
        Self {
            stage: Stage::TTMove,
            moves: MoveList::default(),
            bad_noisy: MoveList::default(),
            current: 0,
            bad_current: 0,
            tt_move,
            killer: Move::NONE,
            in_qsearch: true,
            gen_quiets: in_check,
            ply,
        }
    }

    pub fn next(&mut self, board: &Board, td: &ThreadData) -> Option<MoveListEntry> {
        loop {
            match self.stage {
                Stage::TTMove => {
                    self.stage = Stage::GenNoisy;
                    if board.is_pseudo_legal(self.tt_move)
                        && (!self.in_qsearch || board.is_capture(self.tt_move) || board.in_check())
                    {
                        return Some(MoveListEntry { m: self.tt_move, score: 0 });
                    }
                }
                Stage::GenNoisy => {
                    self.moves = board.generate_moves(MGT::CapturesOnly);
                    score_noisy(td, board, &mut self.moves);
                    self.stage = Stage::GoodNoisy;
                }
                Stage::GoodNoisy => {
                    if self.current >= self.moves.len() {
                        self.stage = Stage::Killer;
                        continue;
                    }
                    let entry = self.moves.pick(self.current);
                    self.current += 1;
                    if entry.m == self.tt_move {
                        continue;
                    }
                    if !see(board, entry.m, -entry.score / 4 + 15) {
                        self.bad_noisy.push(entry.m);
                        self.bad_noisy.arr.last_mut().unwrap().score = entry.score;
                        continue;
                    }
                    return Some(entry);
                }
                Stage::Killer => {
                    self.stage = Stage::GenQuiet;
                    if !self.in_qsearch
                        && self.killer != self.tt_move
                        && board.is_pseudo_legal(self.killer)
                        && !board.is_capture(self.killer)
                    {
                        return Some(MoveListEntry { m: self.killer, score: 0 });
                    }
                }
                Stage::GenQuiet => {
                    self.current = 0;
                    self.moves = MoveList::default();
                    if self.gen_quiets {
                        self.moves = board.generate_moves(MGT::QuietsOnly);
                        score_quiets(td, board, &mut self.moves, self.ply);
                    }
                    self.stage = Stage::Quiet;
                }
                Stage::Quiet => {
                    if self.current >= self.moves.len() {
                        self.current = 0;
                        self.stage = Stage::BadNoisy;
                        continue;
                    }
                    let entry = self.moves.pick(self.current);
                    self.current += 1;
                    if entry.m == self.tt_move || entry.m == self.killer {
                        continue;
                    }
                    return Some(entry);
                }
                Stage::BadNoisy => {
                    if self.bad_current >= self.bad_noisy.len() {
                        self.stage = Stage::Finished;
                        continue;
                    }
                    let entry = self.bad_noisy.pick(self.bad_current);
                    self.bad_current += 1;
                    if entry.m == self.tt_move {
                        continue;
                    }
                    return Some(entry);
                }
                Stage::Finished => return None,
            }
        }
    }
}

fn score_noisy(td: &ThreadData, board: &Board, moves: &mut MoveList) {
    for MoveListEntry { m, score } in moves.arr.iter_mut() {
        let victim = if m.is_en_passant() { PieceName::Pawn } else { board.piece_at(m.to()).name() };
        *score = td.history.capthist(board, *m) + MVV[victim];
    }
}

fn score_quiets(td: &ThreadData, board: &Board, moves: &mut MoveList, ply: i32) {
    let them = !board.stm;
    let occ = board.occupancies();
    let pawn_threats = pawn_set_attacks(board.bitboard(them, PieceName::Pawn), them);
    let mut minor_threats = pawn_threats;
    for sq in board.bitboard(them, PieceName::Knight) {
        minor_threats |= knight_attacks(sq);
    }
    for sq in board.bitboard(them, PieceName::Bishop) {
        minor_threats |= bishop_attacks(sq, occ);
    }
    let mut rook_threats = minor_threats;
    for sq in board.bitboard(them, PieceName::Rook) {
        rook_threats |= rook_attacks(sq, occ);
    }

    for MoveListEntry { m, score } in moves.arr.iter_mut() {
        if let Some(promo) = m.promotion() {
            *score = 20_000 + promo.idx() as i32;
            continue;
        }
        *score = td.history.quiet_history(board, *m, &td.stack, ply);
        let from = m.from().bitboard();
        let to = m.to().bitboard();
        // Fleeing a cheaper attacker scores up, stepping into one scores
        // down, scaled by how much the piece is worth
        let (threats, escape, walk_in) = match board.piece_at(m.from()).name() {
            PieceName::Queen => (rook_threats, 12_228, 11_264),
            PieceName::Rook => (minor_threats, 10_240, 9_216),
            PieceName::Bishop | PieceName::Knight => (pawn_threats, 8_192, 7_168),
            _ => (Bitboard::EMPTY, 0, 0),
        };
        if !(threats & from).is_empty() {
            *score += escape;
        }
        if !(threats & to).is_empty() {
            *score -= walk_in;
        }
    }
}

#[cfg(test)]
mod picker_tests {
    use crate::board::fen::{build_board, STARTING_FEN};
    use crate::search::thread::ThreadData;

    use super::*;

    fn drain(board: &Board, td: &ThreadData, mut picker: MovePicker) -> Vec<Move> {
        let mut seen = Vec::new();
        while let Some(entry) = picker.next(board, td) {
            seen.push(entry.m);
        }
        seen
    }

    #[test]
    fn yields_every_move_exactly_once() {
        let td = ThreadData::for_tests();
        for fen in [
            STARTING_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1",
        ] {
            let board = build_board(fen);
            let picked = drain(&board, &td, MovePicker::new(Move::NONE, Move::NONE, 0));
            let mut generated: Vec<Move> =
                board.generate_moves(MGT::All).iter().map(|e| e.m).collect();
            let mut picked_sorted = picked.clone();
            picked_sorted.sort_by_key(|m| m.0);
            generated.sort_by_key(|m| m.0);
            assert_eq!(picked_sorted, generated, "{fen}");
        }
    }

    #[test]
    fn tt_move_comes_first_and_never_repeats() {
        let td = ThreadData::for_tests();
        let board = build_board(STARTING_FEN);
        let tt_move = crate::moves::moves::from_uci("e2e4", &board).unwrap();
        let picked = drain(&board, &td, MovePicker::new(tt_move, Move::NONE, 0));
        assert_eq!(picked[0], tt_move);
        assert_eq!(picked.iter().filter(|&&m| m == tt_move).count(), 1);
        assert_eq!(picked.len(), 20);
    }

    #[test]
    fn killer_precedes_other_quiets() {
        let td = ThreadData::for_tests();
        let board = build_board(STARTING_FEN);
        let killer = crate::moves::moves::from_uci("b1c3", &board).unwrap();
        let picked = drain(&board, &td, MovePicker::new(Move::NONE, killer, 0));
        assert_eq!(picked[0], killer);
        assert_eq!(picked.iter().filter(|&&m| m == killer).count(), 1);
    }

    #[test]
    fn qsearch_only_yields_captures_when_not_in_check() {
        let td = ThreadData::for_tests();
        let board = build_board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        let picked = drain(&board, &td, MovePicker::qsearch(Move::NONE, false, 0));
        assert!(!picked.is_empty());
        assert!(picked.iter().all(|&m| board.is_capture(m)));
    }

    #[test]
    fn losing_captures_come_last() {
        // QxP defended: the queen capture must trail the winning one
        let td = ThreadData::for_tests();
        let board = build_board("4k3/1p6/2p5/p7/8/2Q5/8/4K3 w - - 0 1");
        let picked = drain(&board, &td, MovePicker::qsearch(Move::NONE, false, 0));
        let qxc6 = crate::moves::moves::from_uci("c3c6", &board).unwrap();
        assert_eq!(*picked.last().unwrap(), qxc6);
    }
}
