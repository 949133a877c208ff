use std::ops::{Deref, DerefMut};

pub mod accumulator;
pub mod network;
pub mod simd;

/// Hidden layer width. Must stay divisible by the SIMD block width.
pub const HIDDEN_SIZE: usize = 512;
pub const INPUT_BUCKETS: usize = 8;
pub const OUTPUT_BUCKETS: usize = 8;

pub const QA: i32 = 255;
pub const QB: i32 = 64;
pub const SCALE: i32 = 400;

pub type Block = [i16; HIDDEN_SIZE];

/// King-square partition of the input features, seen from the perspective
/// side's own back rank. Horizontally symmetric because squares are mirrored
/// onto the a–d files before indexing.
#[rustfmt::skip]
pub const BUCKET_LAYOUT: [usize; 64] = [
    0, 1, 2, 3, 3, 2, 1, 0,
    4, 4, 5, 5, 5, 5, 4, 4,
    6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6, 6, 6, 6, 6,
    7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct Align64<T>(pub T);

unsafe impl<T: bytemuck::Zeroable> bytemuck::Zeroable for Align64<T> {}

impl<T> Deref for Align64<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Align64<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
