use crate::board::board::Board;
use crate::moves::moves::Move;
use crate::spsa::{
    HIST_BONUS_LINEAR, HIST_BONUS_OFFSET, HIST_BONUS_QUADRATIC, HIST_MALUS_LINEAR, HIST_MALUS_OFFSET,
    HIST_MALUS_QUADRATIC, MAJOR_CORR_WEIGHT, MINOR_CORR_WEIGHT, NON_PAWN_NSTM_CORR_WEIGHT,
    NON_PAWN_STM_CORR_WEIGHT, PAWN_CORR_WEIGHT,
};
use crate::types::pieces::{Color, PieceName};

use super::search::INFINITY;
use super::{ConthistIndex, SearchStack};

pub const MAX_HISTORY: i32 = 16_383;
pub const CORR_HIST_ENTRIES: usize = 16_384;
pub const MAX_CORR_HIST: i32 = 1_024;

type Butterfly = [[[i16; 64]; 64]; 2];
/// [prev stm][prev piece][prev to][stm][piece][to]
type Conthist = [[[[[[i16; 64]; 6]; 2]; 64]; 6]; 2];
/// [stm][moving piece][captured piece][to]
type Capthist = [[[[i16; 64]; 6]; 6]; 2];
type CorrHist = [[i16; CORR_HIST_ENTRIES]; 2];

pub fn history_bonus(depth: i32) -> i32 {
    (HIST_BONUS_QUADRATIC.val() * depth * depth + HIST_BONUS_LINEAR.val() * depth - HIST_BONUS_OFFSET.val())
        .min(2048)
}

pub fn history_malus(depth: i32) -> i32 {
    -(HIST_MALUS_QUADRATIC.val() * depth * depth + HIST_MALUS_LINEAR.val() * depth + HIST_MALUS_OFFSET.val())
        .min(1024)
}

/// History gravity: the entry drifts toward the bonus and its magnitude can
/// never leave [-max, max]
fn gravity(entry: &mut i16, bonus: i32, max: i32) {
    let clamped = bonus.clamp(-max, max);
    let v = i32::from(*entry);
    *entry = (v + clamped - v * clamped.abs() / max) as i16;
}

/// Per-worker move ordering and eval correction state. Everything here is
/// owned by one thread and reset between games, not between searches.
pub struct History {
    butterfly: Box<Butterfly>,
    conthist: Box<Conthist>,
    capthist: Box<Capthist>,
    pawn_corr: Box<CorrHist>,
    major_corr: Box<CorrHist>,
    minor_corr: Box<CorrHist>,
    non_pawn_corr: [Box<CorrHist>; 2],
}

impl Default for History {
    fn default() -> Self {
        Self {
            butterfly: bytemuck::zeroed_box(),
            conthist: bytemuck::zeroed_box(),
            capthist: bytemuck::zeroed_box(),
            pawn_corr: bytemuck::zeroed_box(),
            major_corr: bytemuck::zeroed_box(),
            minor_corr: bytemuck::zeroed_box(),
            non_pawn_corr: [bytemuck::zeroed_box(), bytemuck::zeroed_box()],
        }
    }
}

/// What a capture captured, for capthist purposes. Promotions and en passant
/// index as pawns, which can never legally appear on the indexing square
/// otherwise.
pub fn capthist_capture(board: &Board, m: Move) -> PieceName {
    if m.is_en_passant() || m.promotion().is_some() {
        PieceName::Pawn
    } else {
        board.piece_at(m.to()).name()
    }
}

impl History {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn butterfly(&self, stm: Color, m: Move) -> i32 {
        i32::from(self.butterfly[stm][m.from()][m.to()])
    }

    fn update_butterfly(&mut self, stm: Color, m: Move, bonus: i32) {
        gravity(&mut self.butterfly[stm][m.from()][m.to()], bonus, MAX_HISTORY);
    }

    pub fn capthist(&self, board: &Board, m: Move) -> i32 {
        let moving = board.piece_at(m.from()).name();
        i32::from(self.capthist[board.stm][moving][capthist_capture(board, m)][m.to()])
    }

    fn update_capthist(&mut self, board: &Board, m: Move, bonus: i32) {
        let moving = board.piece_at(m.from()).name();
        gravity(
            &mut self.capthist[board.stm][moving][capthist_capture(board, m)][m.to()],
            bonus,
            MAX_HISTORY,
        );
    }

    /// Where this move's continuation segment lives, recorded on the stack
    /// for the plies below to index into
    pub fn conthist_index(board: &Board, m: Move) -> ConthistIndex {
        ConthistIndex { stm: board.stm, piece: board.piece_at(m.from()).name(), to: m.to() }
    }

    fn conthist_entry(&mut self, prev: ConthistIndex, board: &Board, m: Move) -> &mut i16 {
        let piece = board.piece_at(m.from()).name();
        &mut self.conthist[prev.stm][prev.piece][prev.to][board.stm][piece][m.to()]
    }

    fn conthist(&self, prev: ConthistIndex, board: &Board, m: Move) -> i32 {
        let piece = board.piece_at(m.from()).name();
        i32::from(self.conthist[prev.stm][prev.piece][prev.to][board.stm][piece][m.to()])
    }

    /// Butterfly plus the continuation scores one and two plies back
    pub fn quiet_history(&self, board: &Board, m: Move, stack: &SearchStack, ply: i32) -> i32 {
        let mut hist = self.butterfly(board.stm, m);
        if let Some(prev) = stack.conthist_at(ply - 1) {
            hist += self.conthist(prev, board, m);
        }
        if let Some(prev) = stack.conthist_at(ply - 2) {
            hist += self.conthist(prev, board, m);
        }
        hist
    }

    fn update_conthist(&mut self, board: &Board, m: Move, stack: &SearchStack, ply: i32, bonus: i32) {
        if let Some(prev) = stack.conthist_at(ply - 1) {
            gravity(self.conthist_entry(prev, board, m), bonus, MAX_HISTORY);
        }
        if let Some(prev) = stack.conthist_at(ply - 2) {
            gravity(self.conthist_entry(prev, board, m), bonus, MAX_HISTORY);
        }
    }

    /// Rewards the cutoff move and penalises everything tried before it.
    /// Quiet cutoffs touch quiet tables; captures always take their malus.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        board: &Board,
        best_move: Move,
        quiets_tried: &[Move],
        captures_tried: &[Move],
        depth: i32,
        stack: &SearchStack,
        ply: i32,
    ) {
        let bonus = history_bonus(depth);
        let malus = history_malus(depth);
        if board.is_capture(best_move) {
            self.update_capthist(board, best_move, bonus);
        } else {
            self.update_butterfly(board.stm, best_move, bonus);
            self.update_conthist(board, best_move, stack, ply, bonus);
            for &m in quiets_tried {
                if m == best_move {
                    continue;
                }
                self.update_butterfly(board.stm, m, malus);
                self.update_conthist(board, m, stack, ply, malus);
            }
        }
        for &m in captures_tried {
            if m == best_move {
                continue;
            }
            self.update_capthist(board, m, malus);
        }
    }

    /// Static eval plus the weighted correction terms, clamped inside the
    /// mate score range
    pub fn correct_static_eval(&self, board: &Board, keys: &crate::board::zobrist::SubKeys, eval: i32) -> i32 {
        let stm = board.stm;
        let mut correction = 0;
        correction += PAWN_CORR_WEIGHT.val() * i32::from(self.pawn_corr[stm][keys.pawn as usize % CORR_HIST_ENTRIES]);
        correction +=
            MAJOR_CORR_WEIGHT.val() * i32::from(self.major_corr[stm][keys.major as usize % CORR_HIST_ENTRIES]);
        correction +=
            MINOR_CORR_WEIGHT.val() * i32::from(self.minor_corr[stm][keys.minor as usize % CORR_HIST_ENTRIES]);
        correction += NON_PAWN_STM_CORR_WEIGHT.val()
            * i32::from(self.non_pawn_corr[0][stm][keys.non_pawn[0] as usize % CORR_HIST_ENTRIES]);
        correction += NON_PAWN_NSTM_CORR_WEIGHT.val()
            * i32::from(self.non_pawn_corr[1][stm][keys.non_pawn[1] as usize % CORR_HIST_ENTRIES]);
        (eval + correction / 2048).clamp(-INFINITY + 1, INFINITY - 1)
    }

    pub fn update_corrhist(&mut self, board: &Board, keys: &crate::board::zobrist::SubKeys, bonus: i32) {
        let stm = board.stm;
        let bonus = bonus.clamp(-MAX_CORR_HIST / 4, MAX_CORR_HIST / 4);
        gravity(&mut self.pawn_corr[stm][keys.pawn as usize % CORR_HIST_ENTRIES], bonus, MAX_CORR_HIST);
        gravity(&mut self.major_corr[stm][keys.major as usize % CORR_HIST_ENTRIES], bonus, MAX_CORR_HIST);
        gravity(&mut self.minor_corr[stm][keys.minor as usize % CORR_HIST_ENTRIES], bonus, MAX_CORR_HIST);
        gravity(
            &mut self.non_pawn_corr[0][stm][keys.non_pawn[0] as usize % CORR_HIST_ENTRIES],
            bonus,
            MAX_CORR_HIST,
        );
        gravity(
            &mut self.non_pawn_corr[1][stm][keys.non_pawn[1] as usize % CORR_HIST_ENTRIES],
            bonus,
            MAX_CORR_HIST,
        );
    }
}

#[cfg(test)]
mod history_tests {
    use super::*;

    #[test]
    fn gravity_never_escapes_bounds() {
        let mut entry = 0i16;
        for _ in 0..1000 {
            gravity(&mut entry, 2048, MAX_HISTORY);
            assert!(i32::from(entry).abs() <= MAX_HISTORY);
        }
        for _ in 0..1000 {
            gravity(&mut entry, -2048, MAX_HISTORY);
            assert!(i32::from(entry).abs() <= MAX_HISTORY);
        }
        let mut corr = 0i16;
        for _ in 0..1000 {
            gravity(&mut corr, MAX_CORR_HIST / 4, MAX_CORR_HIST);
            assert!(i32::from(corr).abs() <= MAX_CORR_HIST);
        }
    }

    #[test]
    fn bonus_and_malus_are_capped() {
        assert!(history_bonus(30) <= 2048);
        assert!(history_malus(30) >= -1024);
        assert!(history_bonus(1) > 0);
        assert!(history_malus(1) < 0);
    }

    #[test]
    fn butterfly_updates_move_score() {
        use crate::board::fen::{build_board, STARTING_FEN};
        use crate::moves::moves::{Move, MoveFlag};
        use crate::types::square::Square;

        let board = build_board(STARTING_FEN);
        let mut history = History::default();
        let stack = SearchStack::default();
        let m = Move::new(Square(12), Square(28), MoveFlag::Normal);
        assert_eq!(history.quiet_history(&board, m, &stack, 0), 0);
        history.update(&board, m, &[], &[], 6, &stack, 0);
        assert!(history.quiet_history(&board, m, &stack, 0) > 0);
        // The same move tried-but-not-best takes a penalty back down
        let other = Move::new(Square(11), Square(27), MoveFlag::Normal);
        history.update(&board, other, &[m, other], &[], 6, &stack, 0);
        let after = history.quiet_history(&board, m, &stack, 0);
        assert!(after < history.quiet_history(&board, other, &stack, 0));
    }
}
