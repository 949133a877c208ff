use std::env;
use std::fs;
use std::path::Path;

use anyhow::{ensure, Context};

use crate::board::board::Board;
use crate::types::pieces::{Color, PieceName};
use crate::types::square::Square;

use super::accumulator::Accumulator;
use super::simd::flatten;
use super::{Align64, Block, BUCKET_LAYOUT, HIDDEN_SIZE, INPUT_BUCKETS, OUTPUT_BUCKETS, QA, QB, SCALE};

pub const INPUT_SIZE: usize = 768;
const FILE_VALUES: usize = INPUT_BUCKETS * INPUT_SIZE * HIDDEN_SIZE
    + HIDDEN_SIZE
    + OUTPUT_BUCKETS * 2 * HIDDEN_SIZE
    + OUTPUT_BUCKETS;

/// Feature transformer plus the bucketed output head. Loaded once, shared
/// read-only between workers.
#[repr(C, align(64))]
pub struct Network {
    /// One weight row per input feature
    pub h1: [Align64<Block>; INPUT_BUCKETS * INPUT_SIZE],
    pub h1_bias: Align64<Block>,
    /// stm half in [0, HL), nstm half in [HL, 2*HL)
    pub ow: [Align64<[i16; 2 * HIDDEN_SIZE]>; OUTPUT_BUCKETS],
    pub output_bias: [i16; OUTPUT_BUCKETS],
}

unsafe impl bytemuck::Zeroable for Network {}

pub fn king_bucket(king: Square, persp: Color) -> usize {
    BUCKET_LAYOUT[king.idx() ^ (persp.idx() * 56)]
}

/// Index of one (piece, square) input feature as seen from `persp`, with the
/// square rotated to the perspective's orientation and mirrored onto the
/// queenside when that perspective's king lives on files e-h
pub fn feature(persp: Color, color: Color, pt: PieceName, sq: Square, king: Square) -> usize {
    let ci = usize::from(persp != color);
    let mut sq = if persp == Color::Black { sq.flip_vertical() } else { sq };
    if king.file() >= 4 {
        sq = sq.flip_horizontal();
    }
    king_bucket(king, persp) * INPUT_SIZE + ci * 384 + pt.idx() * 64 + sq.idx()
}

/// True when this king move invalidates every feature of its own perspective
pub fn crosses_refresh_boundary(from: Square, to: Square, persp: Color) -> bool {
    (from.file() >= 4) != (to.file() >= 4) || king_bucket(from, persp) != king_bucket(to, persp)
}

impl Network {
    pub fn inference(&self, board: &Board, acc: &Accumulator) -> i32 {
        let stm = board.stm;
        let bucket = output_bucket(board);
        let weights = &self.ow[bucket];
        let mut eval = i64::from(flatten(&acc.values[stm], &weights[..HIDDEN_SIZE]))
            + i64::from(flatten(&acc.values[!stm], &weights[HIDDEN_SIZE..]));
        eval /= i64::from(QA);
        eval += i64::from(self.output_bias[bucket]);
        (eval * i64::from(SCALE) / i64::from(QA * QB)) as i32
    }

    /// Loads the bit-exact little-endian int16 stream: H1 weights, H1 bias,
    /// output weights per bucket, output biases. No header, no padding.
    pub fn load(path: &Path) -> anyhow::Result<Box<Network>> {
        let bytes = fs::read(path).with_context(|| format!("reading network file {}", path.display()))?;
        ensure!(
            bytes.len() == FILE_VALUES * 2,
            "network file {} is {} bytes, expected {}",
            path.display(),
            bytes.len(),
            FILE_VALUES * 2
        );
        let mut net = bytemuck::zeroed_box::<Network>();
        let mut values = bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]));
        let mut next = || values.next().unwrap();
        for row in net.h1.iter_mut() {
            row.0.iter_mut().for_each(|w| *w = next());
        }
        net.h1_bias.0.iter_mut().for_each(|w| *w = next());
        for bucket in net.ow.iter_mut() {
            bucket.0.iter_mut().for_each(|w| *w = next());
        }
        net.output_bias.iter_mut().for_each(|w| *w = next());
        Ok(net)
    }

    /// Reads `EVALFILE` from the environment. A file that fails to load
    /// aborts startup; no file at all falls back to an all-zero network,
    /// which evaluates every position as level.
    pub fn startup() -> Box<Network> {
        match env::var("EVALFILE") {
            Ok(path) => match Self::load(Path::new(&path)) {
                Ok(net) => net,
                Err(err) => {
                    eprintln!("fatal: {err:#}");
                    std::process::exit(1);
                }
            },
            Err(_) => {
                log::info!("EVALFILE not set, running with a zero network");
                bytemuck::zeroed_box::<Network>()
            }
        }
    }

    /// Deterministic pseudo-random weights, small enough that the quantised
    /// arithmetic never saturates. Lets tests exercise the real update paths
    /// without a network file.
    #[cfg(test)]
    pub fn seeded(seed: u64) -> Box<Network> {
        let mut state = seed | 1;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 64) as i16 - 32
        };
        let mut net = bytemuck::zeroed_box::<Network>();
        for row in net.h1.iter_mut() {
            row.0.iter_mut().for_each(|w| *w = next());
        }
        net.h1_bias.0.iter_mut().for_each(|w| *w = next());
        for bucket in net.ow.iter_mut() {
            bucket.0.iter_mut().for_each(|w| *w = next());
        }
        net.output_bias.iter_mut().for_each(|w| *w = next());
        net
    }
}

pub fn output_bucket(board: &Board) -> usize {
    (board.occupancies().count_bits() as usize - 2) / (32 / OUTPUT_BUCKETS)
}

#[cfg(test)]
mod network_tests {
    use crate::board::fen::{build_board, STARTING_FEN};
    use crate::eval::accumulator::AccumulatorStack;

    use super::*;

    #[test]
    fn feature_indices_stay_in_range() {
        for persp in [Color::White, Color::Black] {
            for color in [Color::White, Color::Black] {
                for king in [Square(4), Square(6), Square(33), Square(60), Square(63)] {
                    for sq in Square::iter() {
                        let f = feature(persp, color, PieceName::Queen, sq, king);
                        assert!(f < INPUT_BUCKETS * INPUT_SIZE);
                    }
                }
            }
        }
    }

    #[test]
    fn mirrored_kings_share_features() {
        // A king on e1 indexes like its mirror on d1 with mirrored squares
        let left = feature(Color::White, Color::White, PieceName::Knight, Square(18), Square(3));
        let right = feature(Color::White, Color::White, PieceName::Knight, Square(21), Square(4));
        assert_eq!(left, right);
    }

    #[test]
    fn perspectives_are_color_symmetric() {
        // A black-perspective view of the vertically flipped position is the
        // same feature as the white-perspective view of the original
        for (sq, king) in [(Square(18), Square(4)), (Square(45), Square(6)), (Square(9), Square(33))] {
            let white = feature(Color::White, Color::White, PieceName::Rook, sq, king);
            let black = feature(
                Color::Black,
                Color::Black,
                PieceName::Rook,
                sq.flip_vertical(),
                king.flip_vertical(),
            );
            assert_eq!(white, black);
        }
    }

    #[test]
    fn zero_network_scores_zero() {
        let net = bytemuck::zeroed_box::<Network>();
        let board = build_board(STARTING_FEN);
        let mut stack = AccumulatorStack::new();
        let mut cache = crate::eval::accumulator::InputBucketCache::default();
        stack.reset(&net, &board, &mut cache);
        assert_eq!(net.inference(&board, stack.top()), 0);
    }

    #[test]
    fn output_buckets_follow_piece_count() {
        assert_eq!(output_bucket(&build_board(STARTING_FEN)), 7);
        assert_eq!(output_bucket(&build_board("8/8/4k3/8/8/3K4/8/8 w - - 0 1")), 0);
    }
}
