use arrayvec::ArrayVec;
use strum::IntoEnumIterator;

use crate::board::board::Board;
use crate::moves::moves::Move;
use crate::search::MAX_PLY;
use crate::types::bitboard::Bitboard;
use crate::types::pieces::{Color, Piece, PieceName};

use super::network::{crosses_refresh_boundary, feature, king_bucket, Network};
use super::simd::{add_row, add_rows4, sub_row, sub_rows4};
use super::{Align64, Block, HIDDEN_SIZE, INPUT_BUCKETS};

/// Pending change to one perspective: at most two features appear and two
/// disappear per move (castling moves two pieces, a capture removes one)
#[derive(Clone, Default)]
pub struct FeatureDelta {
    pub adds: ArrayVec<u16, 2>,
    pub subs: ArrayVec<u16, 2>,
}

/// One ply's worth of feature-transformer state. Values are only meaningful
/// for a perspective once `computed` is set; until then the recorded delta
/// chains back to the nearest computed ancestor.
#[derive(Clone)]
pub struct Accumulator {
    pub values: [Align64<Block>; 2],
    pub computed: [bool; 2],
    pub needs_refresh: [bool; 2],
    pub delta: [FeatureDelta; 2],
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            values: [Align64([0; HIDDEN_SIZE]); 2],
            computed: [false; 2],
            needs_refresh: [false; 2],
            delta: [FeatureDelta::default(), FeatureDelta::default()],
        }
    }
}

/// Saved (features, piece bitboards) per perspective, mirror half and king
/// bucket, so a refresh after a king move only has to apply the difference
/// against the last position seen with that king placement
pub struct BucketCacheEntry {
    features: Align64<Block>,
    /// Six piece-type boards followed by the two color boards
    pieces: [Bitboard; 8],
    init: bool,
}

unsafe impl bytemuck::Zeroable for BucketCacheEntry {}

pub struct InputBucketCache {
    entries: Box<[[[BucketCacheEntry; INPUT_BUCKETS]; 2]; 2]>,
}

impl Default for InputBucketCache {
    fn default() -> Self {
        Self { entries: bytemuck::zeroed_box() }
    }
}

impl InputBucketCache {
    pub fn clear(&mut self) {
        self.entries = bytemuck::zeroed_box();
    }
}

/// Stack of accumulators parallel to the search stack. Frames are pushed on
/// make and popped on unmake; values resolve lazily at evaluation time.
pub struct AccumulatorStack {
    stack: Vec<Accumulator>,
    top: usize,
}

impl AccumulatorStack {
    pub fn new() -> Self {
        Self { stack: vec![Accumulator::default(); MAX_PLY as usize + 8], top: 0 }
    }

    pub fn top(&self) -> &Accumulator {
        &self.stack[self.top]
    }

    /// Re-anchors the stack on a fresh root position
    pub fn reset(&mut self, net: &Network, board: &Board, cache: &mut InputBucketCache) {
        self.top = 0;
        let frame = &mut self.stack[0];
        frame.delta = [FeatureDelta::default(), FeatureDelta::default()];
        frame.needs_refresh = [false; 2];
        for persp in [Color::White, Color::Black] {
            refresh_cached(frame, net, board, persp, cache);
        }
    }

    /// Records the accumulator change for a move that was just played.
    /// `old` is the position the move came from, `new` the result.
    pub fn push_move(&mut self, net: &Network, old: &Board, new: &Board, m: Move, cache: &mut InputBucketCache) {
        self.top += 1;
        let frame = &mut self.stack[self.top];
        frame.computed = [false; 2];
        frame.needs_refresh = [false; 2];
        frame.delta[0].adds.clear();
        frame.delta[0].subs.clear();
        frame.delta[1].adds.clear();
        frame.delta[1].subs.clear();

        if m == Move::NULL_MOVE {
            return;
        }

        // Promotions and en passant reshape the pawn structure; recompute
        // both perspectives outright
        if m.promotion().is_some() || m.is_en_passant() {
            for persp in [Color::White, Color::Black] {
                refresh_plain(frame, net, new, persp);
            }
            return;
        }

        let stm = old.stm;
        let piece = old.piece_at(m.from());
        let captured = old.capture(m);

        for persp in [Color::White, Color::Black] {
            if piece.name() == PieceName::King
                && piece.color() == persp
                && crosses_refresh_boundary(m.from(), m.to(), persp)
            {
                frame.needs_refresh[persp] = true;
                refresh_cached(frame, net, new, persp, cache);
                continue;
            }

            let king = new.king_square(persp);
            let delta = &mut frame.delta[persp];
            if m.is_castle() {
                let castle = m.castle_kind();
                delta.adds.push(feature(persp, stm, PieceName::King, m.to(), king) as u16);
                delta.adds.push(feature(persp, stm, PieceName::Rook, castle.rook_to(), king) as u16);
                delta.subs.push(feature(persp, stm, PieceName::King, m.from(), king) as u16);
                delta.subs.push(feature(persp, stm, PieceName::Rook, castle.rook_from(), king) as u16);
            } else {
                delta.adds.push(feature(persp, stm, piece.name(), m.to(), king) as u16);
                delta.subs.push(feature(persp, stm, piece.name(), m.from(), king) as u16);
                if captured != Piece::None {
                    delta.subs.push(feature(persp, captured.color(), captured.name(), m.to(), king) as u16);
                }
            }
        }
    }

    pub fn pop(&mut self) {
        debug_assert!(self.top > 0);
        self.top -= 1;
    }

    /// Resolves both perspectives of the current frame and runs the forward
    /// pass
    pub fn evaluate(&mut self, net: &Network, board: &Board) -> i32 {
        self.resolve(net, Color::White);
        self.resolve(net, Color::Black);
        net.inference(board, &self.stack[self.top])
    }

    fn resolve(&mut self, net: &Network, persp: Color) {
        if self.stack[self.top].computed[persp] {
            return;
        }
        let mut idx = self.top;
        while !self.stack[idx].computed[persp] {
            debug_assert!(idx > 0, "root frame must be refreshed before searching");
            idx -= 1;
        }
        while idx < self.top {
            idx += 1;
            let (below, above) = self.stack.split_at_mut(idx);
            let prev = &below[idx - 1];
            let frame = &mut above[0];
            let adds = frame.delta[persp].adds.clone();
            let subs = frame.delta[persp].subs.clone();
            frame.values[persp] = prev.values[persp];
            let values = &mut frame.values[persp].0;
            for f in adds {
                add_row(values, &net.h1[f as usize]);
            }
            for f in subs {
                sub_row(values, &net.h1[f as usize]);
            }
            frame.computed[persp] = true;
        }
    }
}

/// From-scratch accumulation: bias plus every piece's feature row
fn refresh_plain(frame: &mut Accumulator, net: &Network, board: &Board, persp: Color) {
    let king = board.king_square(persp);
    frame.values[persp] = net.h1_bias;
    let values = &mut frame.values[persp].0;
    for sq in board.occupancies() {
        let piece = board.piece_at(sq);
        add_row(values, &net.h1[feature(persp, piece.color(), piece.name(), sq, king)]);
    }
    frame.computed[persp] = true;
    frame.needs_refresh[persp] = false;
}

/// Difference-only refresh against the cached position with the same king
/// placement, applied in batches of four rows
fn refresh_cached(
    frame: &mut Accumulator,
    net: &Network,
    board: &Board,
    persp: Color,
    cache: &mut InputBucketCache,
) {
    let king = board.king_square(persp);
    let mirror = usize::from(king.file() >= 4);
    let bucket = king_bucket(king, persp);
    let entry = &mut cache.entries[persp.idx()][mirror][bucket];

    if !entry.init {
        entry.features = net.h1_bias;
        entry.pieces = [Bitboard::EMPTY; 8];
        entry.init = true;
    }

    let mut adds = ArrayVec::<u16, 32>::new();
    let mut subs = ArrayVec::<u16, 32>::new();
    for color in [Color::White, Color::Black] {
        for pt in PieceName::iter() {
            let cached = entry.pieces[pt.idx()] & entry.pieces[6 + color.idx()];
            let current = board.bitboard(color, pt);
            for sq in current & !cached {
                adds.push(feature(persp, color, pt, sq, king) as u16);
            }
            for sq in cached & !current {
                subs.push(feature(persp, color, pt, sq, king) as u16);
            }
        }
    }

    let values = &mut entry.features.0;
    let mut i = 0;
    while i + 4 <= adds.len() {
        add_rows4(values, [
            &net.h1[adds[i] as usize].0,
            &net.h1[adds[i + 1] as usize].0,
            &net.h1[adds[i + 2] as usize].0,
            &net.h1[adds[i + 3] as usize].0,
        ]);
        i += 4;
    }
    for &f in &adds[i..] {
        add_row(values, &net.h1[f as usize]);
    }
    let mut i = 0;
    while i + 4 <= subs.len() {
        sub_rows4(values, [
            &net.h1[subs[i] as usize].0,
            &net.h1[subs[i + 1] as usize].0,
            &net.h1[subs[i + 2] as usize].0,
            &net.h1[subs[i + 3] as usize].0,
        ]);
        i += 4;
    }
    for &f in &subs[i..] {
        sub_row(values, &net.h1[f as usize]);
    }

    for pt in PieceName::iter() {
        entry.pieces[pt.idx()] = board.piece(pt);
    }
    entry.pieces[6] = board.color(Color::White);
    entry.pieces[7] = board.color(Color::Black);

    frame.values[persp] = entry.features;
    frame.computed[persp] = true;
    frame.needs_refresh[persp] = false;
}

#[cfg(test)]
mod accumulator_tests {
    use crate::board::fen::{build_board, STARTING_FEN};
    use crate::moves::movegenerator::MGT;

    use super::*;

    fn fresh(net: &Network, board: &Board) -> Accumulator {
        let mut acc = Accumulator::default();
        refresh_plain(&mut acc, net, board, Color::White);
        refresh_plain(&mut acc, net, board, Color::Black);
        acc
    }

    fn assert_matches_refresh(stack: &mut AccumulatorStack, net: &Network, board: &Board) {
        stack.resolve(net, Color::White);
        stack.resolve(net, Color::Black);
        let expect = fresh(net, board);
        let got = stack.top();
        assert_eq!(got.values[0].0[..], expect.values[0].0[..], "white perspective diverged");
        assert_eq!(got.values[1].0[..], expect.values[1].0[..], "black perspective diverged");
    }

    /// Plays every move at a handful of positions and checks the incremental
    /// accumulator against a full refresh, then recurses a ply deeper along
    /// the first legal move
    #[test]
    fn incremental_matches_full_refresh() {
        let net = Network::seeded(0x5EED);
        let fens = [
            STARTING_FEN,
            // Castling both ways, captures, checks
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            // Promotions and underpromotions with captures
            "n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1",
            // En passant available
            "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
            // King walks that cross the mirror boundary and change buckets
            "8/8/3k4/8/8/4K3/8/8 w - - 0 1",
        ];
        for fen in fens {
            let board = build_board(fen);
            let mut stack = AccumulatorStack::new();
            let mut cache = InputBucketCache::default();
            stack.reset(&net, &board, &mut cache);
            for entry in board.generate_moves(MGT::All).iter() {
                let mut next = board;
                if !next.make_move(entry.m) {
                    continue;
                }
                stack.push_move(&net, &board, &next, entry.m, &mut cache);
                assert_matches_refresh(&mut stack, &net, &next);

                for deeper in next.generate_moves(MGT::All).iter() {
                    let mut leaf = next;
                    if !leaf.make_move(deeper.m) {
                        continue;
                    }
                    stack.push_move(&net, &next, &leaf, deeper.m, &mut cache);
                    assert_matches_refresh(&mut stack, &net, &leaf);
                    stack.pop();
                }
                stack.pop();
            }
        }
    }

    /// Deltas are allowed to pile up across plies before anything evaluates
    #[test]
    fn lazy_chain_resolves_across_plies() {
        let net = Network::seeded(0xACC);
        let board = build_board(STARTING_FEN);
        let mut stack = AccumulatorStack::new();
        let mut cache = InputBucketCache::default();
        stack.reset(&net, &board, &mut cache);

        let mut current = board;
        for uci in ["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"] {
            let m = crate::moves::moves::from_uci(uci, &current).unwrap();
            let mut next = current;
            assert!(next.make_move(m));
            stack.push_move(&net, &current, &next, m, &mut cache);
            current = next;
        }
        // Nothing resolved yet, all six frames chain to the root
        assert!(!stack.top().computed[0]);
        assert_matches_refresh(&mut stack, &net, &current);
    }

    #[test]
    fn null_move_keeps_values() {
        let net = Network::seeded(7);
        let board = build_board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        let mut stack = AccumulatorStack::new();
        let mut cache = InputBucketCache::default();
        stack.reset(&net, &board, &mut cache);
        let before = stack.top().values[0].0;

        let mut nulled = board;
        nulled.make_null_move();
        stack.push_move(&net, &board, &nulled, Move::NULL_MOVE, &mut cache);
        stack.resolve(&net, Color::White);
        assert_eq!(stack.top().values[0].0[..], before[..]);
    }

    #[test]
    fn bucket_cache_refresh_matches_plain() {
        let net = Network::seeded(0xCACE);
        let mut cache = InputBucketCache::default();
        // Visit positions that revisit the same king bucket so the second
        // refresh takes the difference-only path
        for fen in [
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
            "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        ] {
            let board = build_board(fen);
            let mut frame = Accumulator::default();
            for persp in [Color::White, Color::Black] {
                refresh_cached(&mut frame, &net, &board, persp, &mut cache);
            }
            let expect = fresh(&net, &board);
            assert_eq!(frame.values[0].0[..], expect.values[0].0[..]);
            assert_eq!(frame.values[1].0[..], expect.values[1].0[..]);
        }
    }
}
