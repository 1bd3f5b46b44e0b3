//! AArch64 kernel implementations using NEON.
//!
//! NEON is mandatory on AArch64, so these functions are always safe to execute
//! on that architecture. They are still marked unsafe because they read through
//! raw pointers derived from the input slices.
//!
//! `vrhadd` rounds halves up, matching the scalar rounding average.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

/// NEON averaged SAD for blocks `W` pixels wide (`W` a multiple of 8).
///
/// # Safety
///
/// Each buffer must hold `(height - 1) * stride + W` bytes.
#[cfg(target_arch = "aarch64")]
pub unsafe fn averaged_sad_neon<const W: usize>(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    let mut acc = vdupq_n_u32(0);
    let mut tail = vdup_n_u32(0);

    for y in 0..height {
        let s = src.as_ptr().add(y * src_stride);
        let r1 = ref1.as_ptr().add(y * ref1_stride);
        let r2 = ref2.as_ptr().add(y * ref2_stride);

        let mut x = 0;
        while x + 16 <= W {
            let avg = vrhaddq_u8(vld1q_u8(r1.add(x)), vld1q_u8(r2.add(x)));
            let diff = vabdq_u8(vld1q_u8(s.add(x)), avg);
            acc = vaddq_u32(acc, vpaddlq_u16(vpaddlq_u8(diff)));
            x += 16;
        }
        if x < W {
            let avg = vrhadd_u8(vld1_u8(r1.add(x)), vld1_u8(r2.add(x)));
            let diff = vabd_u8(vld1_u8(s.add(x)), avg);
            tail = vadd_u32(tail, vpaddl_u16(vpaddl_u8(diff)));
        }
    }

    vaddvq_u32(acc) + vaddv_u32(tail)
}

/// NEON 8x8 pixel sum, scaled by 4.
///
/// # Safety
///
/// `src` must hold `7 * stride + 8` bytes.
#[cfg(target_arch = "aarch64")]
pub unsafe fn block_mean_8x8_neon(src: &[u8], stride: usize) -> u64 {
    let mut acc = vdupq_n_u16(0);
    for y in 0..8 {
        acc = vaddw_u8(acc, vld1_u8(src.as_ptr().add(y * stride)));
    }
    (vaddlvq_u16(acc) as u64) << 2
}

/// NEON statistics for four side-by-side 8-wide blocks (rows 0, 2, 4, 6).
///
/// # Safety
///
/// `src` must hold `6 * stride + 32` bytes.
#[cfg(target_arch = "aarch64")]
pub unsafe fn four_block_mean_and_mean_square_neon(src: &[u8], stride: usize) -> ([u64; 4], [u64; 4]) {
    let mut sums = [vdupq_n_u16(0); 4];
    let mut sq = [vdupq_n_u32(0); 4];

    for row in [0usize, 2, 4, 6] {
        let p = src.as_ptr().add(row * stride);
        let left = vld1q_u8(p);
        let right = vld1q_u8(p.add(16));
        let blocks = [
            vget_low_u8(left),
            vget_high_u8(left),
            vget_low_u8(right),
            vget_high_u8(right),
        ];
        for (block, px) in blocks.into_iter().enumerate() {
            sums[block] = vaddw_u8(sums[block], px);
            sq[block] = vpadalq_u16(sq[block], vmull_u8(px, px));
        }
    }

    let mut means = [0u64; 4];
    let mut squares = [0u64; 4];
    for block in 0..4 {
        means[block] = (vaddlvq_u16(sums[block]) as u64) << 3;
        squares[block] = (vaddvq_u32(sq[block]) as u64) << 11;
    }
    (means, squares)
}
