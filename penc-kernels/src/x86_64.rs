//! x86_64 kernel implementations using AVX2.
//!
//! All functions in this module are unsafe because they require the CPU to support
//! AVX2 instructions. Calling these functions on a CPU without AVX2 support will
//! result in an illegal instruction fault.
//!
//! `_mm256_avg_epu8` computes `(a + b + 1) >> 1`, which is exactly the rounding
//! average of the scalar reference, and `_mm256_sad_epu8` leaves one 64-bit
//! partial sum per 8-byte group, so no lane can overflow for any block size
//! used here.
//!
//! Loads never reach past `width` bytes of a row: the 24-wide kernel uses a
//! 16-byte and an 8-byte load instead of a 32-byte one.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn load_8x2(ptr: *const u8, stride: usize) -> __m128i {
    _mm_unpacklo_epi64(
        _mm_loadl_epi64(ptr as *const __m128i),
        _mm_loadl_epi64(ptr.add(stride) as *const __m128i),
    )
}

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn load_8x4(ptr: *const u8, stride: usize) -> __m256i {
    let lo = load_8x2(ptr, stride);
    let hi = load_8x2(ptr.add(2 * stride), stride);
    _mm256_inserti128_si256(_mm256_castsi128_si256(lo), hi, 1)
}

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn load_16x2(ptr: *const u8, stride: usize) -> __m256i {
    let lo = _mm_loadu_si128(ptr as *const __m128i);
    let hi = _mm_loadu_si128(ptr.add(stride) as *const __m128i);
    _mm256_inserti128_si256(_mm256_castsi128_si256(lo), hi, 1)
}

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn load_32(ptr: *const u8) -> __m256i {
    _mm256_loadu_si256(ptr as *const __m256i)
}

/// Accumulate `|s - avg(r1, r2)|` into the four 64-bit lanes of `sum`.
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn accumulate(sum: __m256i, s: __m256i, r1: __m256i, r2: __m256i) -> __m256i {
    _mm256_add_epi64(sum, _mm256_sad_epu8(s, _mm256_avg_epu8(r1, r2)))
}

#[target_feature(enable = "avx2")]
#[inline]
unsafe fn horizontal_sum(sum: __m256i) -> u32 {
    let s = _mm_add_epi64(_mm256_castsi256_si128(sum), _mm256_extracti128_si256(sum, 1));
    let s = _mm_add_epi64(s, _mm_srli_si128(s, 8));
    _mm_cvtsi128_si32(s) as u32
}

/// AVX2 averaged SAD for 8-wide blocks, four rows per step.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * `height` must be a multiple of 4.
/// * Each buffer must hold `(height - 1) * stride + 8` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn averaged_sad_8xm_avx2(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    let mut sum = _mm256_setzero_si256();
    for y in (0..height).step_by(4) {
        sum = accumulate(
            sum,
            load_8x4(src.as_ptr().add(y * src_stride), src_stride),
            load_8x4(ref1.as_ptr().add(y * ref1_stride), ref1_stride),
            load_8x4(ref2.as_ptr().add(y * ref2_stride), ref2_stride),
        );
    }
    horizontal_sum(sum)
}

/// AVX2 averaged SAD for 16-wide blocks, two rows per step.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * `height` must be a multiple of 2.
/// * Each buffer must hold `(height - 1) * stride + 16` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn averaged_sad_16xm_avx2(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    let mut sum = _mm256_setzero_si256();
    for y in (0..height).step_by(2) {
        sum = accumulate(
            sum,
            load_16x2(src.as_ptr().add(y * src_stride), src_stride),
            load_16x2(ref1.as_ptr().add(y * ref1_stride), ref1_stride),
            load_16x2(ref2.as_ptr().add(y * ref2_stride), ref2_stride),
        );
    }
    horizontal_sum(sum)
}

/// AVX2 averaged SAD for 24-wide blocks, two rows per step.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * `height` must be a multiple of 2.
/// * Each buffer must hold `(height - 1) * stride + 24` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn averaged_sad_24xm_avx2(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    let mut sum = _mm256_setzero_si256();
    let mut tail = _mm_setzero_si128();
    for y in (0..height).step_by(2) {
        let s = src.as_ptr().add(y * src_stride);
        let r1 = ref1.as_ptr().add(y * ref1_stride);
        let r2 = ref2.as_ptr().add(y * ref2_stride);

        sum = accumulate(
            sum,
            load_16x2(s, src_stride),
            load_16x2(r1, ref1_stride),
            load_16x2(r2, ref2_stride),
        );

        // Columns 16..24 of both rows.
        let avg = _mm_avg_epu8(load_8x2(r1.add(16), ref1_stride), load_8x2(r2.add(16), ref2_stride));
        tail = _mm_add_epi64(tail, _mm_sad_epu8(load_8x2(s.add(16), src_stride), avg));
    }
    let tail = _mm_add_epi64(tail, _mm_srli_si128(tail, 8));
    horizontal_sum(sum) + _mm_cvtsi128_si32(tail) as u32
}

/// AVX2 averaged SAD for 32-wide blocks, two rows per step.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * `height` must be a multiple of 2.
/// * Each buffer must hold `(height - 1) * stride + 32` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn averaged_sad_32xm_avx2(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    let mut sum = _mm256_setzero_si256();
    for y in (0..height).step_by(2) {
        for row in y..y + 2 {
            sum = accumulate(
                sum,
                load_32(src.as_ptr().add(row * src_stride)),
                load_32(ref1.as_ptr().add(row * ref1_stride)),
                load_32(ref2.as_ptr().add(row * ref2_stride)),
            );
        }
    }
    horizontal_sum(sum)
}

/// AVX2 averaged SAD for 48-wide blocks, two rows per step.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * `height` must be a multiple of 2.
/// * Each buffer must hold `(height - 1) * stride + 48` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn averaged_sad_48xm_avx2(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    let mut sum = _mm256_setzero_si256();
    for y in (0..height).step_by(2) {
        for row in y..y + 2 {
            sum = accumulate(
                sum,
                load_32(src.as_ptr().add(row * src_stride)),
                load_32(ref1.as_ptr().add(row * ref1_stride)),
                load_32(ref2.as_ptr().add(row * ref2_stride)),
            );
        }
        sum = accumulate(
            sum,
            load_16x2(src.as_ptr().add(y * src_stride + 32), src_stride),
            load_16x2(ref1.as_ptr().add(y * ref1_stride + 32), ref1_stride),
            load_16x2(ref2.as_ptr().add(y * ref2_stride + 32), ref2_stride),
        );
    }
    horizontal_sum(sum)
}

/// AVX2 averaged SAD for 64-wide blocks, one row per step.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * Each buffer must hold `(height - 1) * stride + 64` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn averaged_sad_64xm_avx2(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    let mut sum = _mm256_setzero_si256();
    for y in 0..height {
        let s = src.as_ptr().add(y * src_stride);
        let r1 = ref1.as_ptr().add(y * ref1_stride);
        let r2 = ref2.as_ptr().add(y * ref2_stride);
        sum = accumulate(sum, load_32(s), load_32(r1), load_32(r2));
        sum = accumulate(sum, load_32(s.add(32)), load_32(r1.add(32)), load_32(r2.add(32)));
    }
    horizontal_sum(sum)
}

/// AVX2 8x8 pixel sum, scaled by 4.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * `src` must hold `7 * stride + 8` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn block_mean_8x8_avx2(src: &[u8], stride: usize) -> u64 {
    let zero = _mm256_setzero_si256();
    let top = _mm256_sad_epu8(load_8x4(src.as_ptr(), stride), zero);
    let bottom = _mm256_sad_epu8(load_8x4(src.as_ptr().add(4 * stride), stride), zero);
    (horizontal_sum(_mm256_add_epi64(top, bottom)) as u64) << 2
}

/// AVX2 statistics for four side-by-side 8-wide blocks (rows 0, 2, 4, 6).
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * `src` must hold `6 * stride + 32` bytes.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn four_block_mean_and_mean_square_avx2(src: &[u8], stride: usize) -> ([u64; 4], [u64; 4]) {
    let zero = _mm256_setzero_si256();
    let mut sums = zero;
    // unpacklo holds blocks 0 and 2, unpackhi blocks 1 and 3 (one per 128-bit lane).
    let mut squares_lo = zero;
    let mut squares_hi = zero;

    for row in [0usize, 2, 4, 6] {
        let px = load_32(src.as_ptr().add(row * stride));
        sums = _mm256_add_epi64(sums, _mm256_sad_epu8(px, zero));

        let lo = _mm256_unpacklo_epi8(px, zero);
        let hi = _mm256_unpackhi_epi8(px, zero);
        squares_lo = _mm256_add_epi32(squares_lo, _mm256_madd_epi16(lo, lo));
        squares_hi = _mm256_add_epi32(squares_hi, _mm256_madd_epi16(hi, hi));
    }

    let mut means = [0u64; 4];
    _mm256_storeu_si256(means.as_mut_ptr() as *mut __m256i, _mm256_slli_epi64(sums, 3));

    let mut lo = [0u32; 8];
    let mut hi = [0u32; 8];
    _mm256_storeu_si256(lo.as_mut_ptr() as *mut __m256i, squares_lo);
    _mm256_storeu_si256(hi.as_mut_ptr() as *mut __m256i, squares_hi);

    let lane = |v: &[u32]| v.iter().map(|&x| x as u64).sum::<u64>() << 11;
    let squares = [lane(&lo[..4]), lane(&hi[..4]), lane(&lo[4..]), lane(&hi[4..])];

    (means, squares)
}
