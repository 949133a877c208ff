//! Vectorised kernels for the feature transformer and output head. The
//! `simd` feature routes through `wide`'s portable vectors; the scalar
//! versions stay compiled so the two can be checked against each other.

use super::{Block, HIDDEN_SIZE, QA};

#[cfg(feature = "simd")]
pub const LANES: usize = 16;

/// Sum of SCReLU(acc) * weight over one perspective half of the output head
pub fn flatten(acc: &Block, weights: &[i16]) -> i32 {
    #[cfg(feature = "simd")]
    {
        flatten_simd(acc, weights)
    }
    #[cfg(not(feature = "simd"))]
    {
        flatten_scalar(acc, weights)
    }
}

pub fn flatten_scalar(acc: &Block, weights: &[i16]) -> i32 {
    debug_assert_eq!(acc.len(), weights.len());
    let mut sum: i64 = 0;
    for (&v, &w) in acc.iter().zip(weights) {
        let clamped = i64::from(v.clamp(0, QA as i16));
        sum += clamped * clamped * i64::from(w);
    }
    sum as i32
}

#[cfg(feature = "simd")]
fn flatten_simd(acc: &Block, weights: &[i16]) -> i32 {
    use wide::{i16x16, i32x8};

    let zero = i16x16::ZERO;
    let max = i16x16::splat(QA as i16);
    let mut sum = i32x8::ZERO;
    for (a, w) in acc.chunks_exact(LANES).zip(weights.chunks_exact(LANES)) {
        let v = i16x16::new(a.try_into().unwrap());
        let w = i16x16::new(w.try_into().unwrap());
        let clamped = v.max(zero).min(max);
        // madd(c, c * w) computes c * c * w pairwise into i32 lanes. The
        // inner 16-bit product c * w needs |w| <= 128 to stay exact, which
        // the QB = 64 output quantisation guarantees.
        sum += clamped.dot(clamped * w);
    }
    sum.to_array().iter().sum()
}

/// acc += row
pub fn add_row(acc: &mut Block, row: &Block) {
    #[cfg(feature = "simd")]
    {
        use wide::i16x16;
        for (a, r) in acc.chunks_exact_mut(LANES).zip(row.chunks_exact(LANES)) {
            let sum = i16x16::new(a.try_into().unwrap()) + i16x16::new(r.try_into().unwrap());
            a.copy_from_slice(&sum.to_array());
        }
    }
    #[cfg(not(feature = "simd"))]
    for (a, &r) in acc.iter_mut().zip(row) {
        *a += r;
    }
}

/// acc -= row
pub fn sub_row(acc: &mut Block, row: &Block) {
    #[cfg(feature = "simd")]
    {
        use wide::i16x16;
        for (a, r) in acc.chunks_exact_mut(LANES).zip(row.chunks_exact(LANES)) {
            let diff = i16x16::new(a.try_into().unwrap()) - i16x16::new(r.try_into().unwrap());
            a.copy_from_slice(&diff.to_array());
        }
    }
    #[cfg(not(feature = "simd"))]
    for (a, &r) in acc.iter_mut().zip(row) {
        *a -= r;
    }
}

/// acc += add0 + add1 + add2 + add3, one pass for cache friendliness
pub fn add_rows4(acc: &mut Block, rows: [&Block; 4]) {
    #[cfg(feature = "simd")]
    {
        use wide::i16x16;
        for i in (0..HIDDEN_SIZE).step_by(LANES) {
            let mut sum = i16x16::new(acc[i..i + LANES].try_into().unwrap());
            for row in rows {
                sum += i16x16::new(row[i..i + LANES].try_into().unwrap());
            }
            acc[i..i + LANES].copy_from_slice(&sum.to_array());
        }
    }
    #[cfg(not(feature = "simd"))]
    for i in 0..HIDDEN_SIZE {
        acc[i] += rows[0][i] + rows[1][i] + rows[2][i] + rows[3][i];
    }
}

/// acc -= sub0 + sub1 + sub2 + sub3
pub fn sub_rows4(acc: &mut Block, rows: [&Block; 4]) {
    #[cfg(feature = "simd")]
    {
        use wide::i16x16;
        for i in (0..HIDDEN_SIZE).step_by(LANES) {
            let mut sum = i16x16::new(acc[i..i + LANES].try_into().unwrap());
            for row in rows {
                sum -= i16x16::new(row[i..i + LANES].try_into().unwrap());
            }
            acc[i..i + LANES].copy_from_slice(&sum.to_array());
        }
    }
    #[cfg(not(feature = "simd"))]
    for i in 0..HIDDEN_SIZE {
        acc[i] -= rows[0][i] + rows[1][i] + rows[2][i] + rows[3][i];
    }
}

#[cfg(all(test, feature = "simd"))]
mod simd_tests {
    use super::*;

    #[test]
    fn hidden_size_divides_into_lanes() {
        assert_eq!(HIDDEN_SIZE % LANES, 0);
    }

    #[test]
    fn flatten_matches_scalar() {
        let mut acc = [0i16; HIDDEN_SIZE];
        let mut weights = [0i16; HIDDEN_SIZE];
        let mut state = 0x1234_5678_u32;
        let mut next = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            state
        };
        for i in 0..HIDDEN_SIZE {
            // Values straddle the clamp range on both sides
            acc[i] = (next() % 700) as i16 - 200;
            weights[i] = (next() % 128) as i16 - 64;
        }
        assert_eq!(flatten(&acc, &weights), flatten_scalar(&acc, &weights));
    }
}
