//! Scalar (non-SIMD) kernel implementations.
//!
//! These work on all platforms and define the reference results that the
//! vector paths must reproduce bit for bit.

/// Rounding average of two pixels, `(a + b + 1) >> 1`.
#[inline(always)]
pub fn rounding_average(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16 + 1) >> 1) as u8
}

/// Scalar SAD of `src` against the rounding average of `ref1` and `ref2`
/// over a `width` x `height` window.
pub fn averaged_sad_scalar(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    width: usize,
    height: usize,
) -> u32 {
    let mut sum = 0u32;
    for y in 0..height {
        let s = &src[y * src_stride..y * src_stride + width];
        let r1 = &ref1[y * ref1_stride..y * ref1_stride + width];
        let r2 = &ref2[y * ref2_stride..y * ref2_stride + width];
        for x in 0..width {
            let avg = rounding_average(r1[x], r2[x]);
            sum += s[x].abs_diff(avg) as u32;
        }
    }
    sum
}

/// Scalar 8x8 pixel sum, scaled by 4.
pub fn block_mean_8x8_scalar(src: &[u8], stride: usize) -> u64 {
    let mut sum = 0u64;
    for y in 0..8 {
        sum += src[y * stride..y * stride + 8]
            .iter()
            .map(|&p| p as u64)
            .sum::<u64>();
    }
    sum << 2
}

/// Scalar statistics for four side-by-side 8-wide blocks.
///
/// Rows 0, 2, 4 and 6 are sampled. Per block, the sample sum is scaled by
/// 8 and the sum of squares by 2048.
pub fn four_block_mean_and_mean_square_scalar(
    src: &[u8],
    stride: usize,
) -> ([u64; 4], [u64; 4]) {
    let mut means = [0u64; 4];
    let mut squares = [0u64; 4];
    for row in [0usize, 2, 4, 6] {
        let line = &src[row * stride..row * stride + 32];
        for (block, pixels) in line.chunks_exact(8).enumerate() {
            for &p in pixels {
                means[block] += p as u64;
                squares[block] += (p as u64) * (p as u64);
            }
        }
    }
    for block in 0..4 {
        means[block] <<= 3;
        squares[block] <<= 11;
    }
    (means, squares)
}
