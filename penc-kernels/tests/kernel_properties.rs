//! Property tests for the distortion kernels.
//!
//! The detected (possibly vectorized) kernels must agree with the portable
//! kernels on every input, and with straightforward per-pixel definitions.

use penc_kernels::{block_variance, rounding_average, BlockWidth, DistortionKernels};
use proptest::prelude::*;

/// Strategy for block widths.
fn block_width() -> impl Strategy<Value = BlockWidth> {
    prop::sample::select(BlockWidth::ALL.to_vec())
}

/// Strategy for a window: width, height (multiple of the row step), strides
/// with up to 16 bytes of padding each.
fn window() -> impl Strategy<Value = (BlockWidth, usize, [usize; 3])> {
    block_width().prop_flat_map(|width| {
        let step = width.row_step();
        let w = width.pixels();
        (
            Just(width),
            (1..=64 / step).prop_map(move |n| n * step),
            [w..w + 16, w..w + 16, w..w + 16],
        )
    })
}

fn buffer(stride: usize, height: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..stride * height)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

fn reference_sad(
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
        for x in 0..width {
            let avg = rounding_average(ref1[y * ref1_stride + x], ref2[y * ref2_stride + x]);
            sum += (src[y * src_stride + x] as i32 - avg as i32).unsigned_abs();
        }
    }
    sum
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the detected averaged SAD equals the per-pixel definition.
    #[test]
    fn prop_averaged_sad_matches_definition(
        (width, height, [s, a, b]) in window(),
        seeds in any::<[u64; 3]>(),
    ) {
        let src = buffer(s, height, seeds[0]);
        let ref1 = buffer(a, height, seeds[1]);
        let ref2 = buffer(b, height, seeds[2]);

        let expected = reference_sad(&src, s, &ref1, a, &ref2, b, width.pixels(), height);
        let detected = DistortionKernels::new();
        let portable = DistortionKernels::scalar();

        prop_assert_eq!(detected.averaged_sad(&src, s, &ref1, a, &ref2, b, width, height), expected);
        prop_assert_eq!(portable.averaged_sad(&src, s, &ref1, a, &ref2, b, width, height), expected);
    }

    /// Property: using one reference twice gives the plain SAD.
    #[test]
    fn prop_same_reference_is_plain_sad(
        (width, height, [s, a, _]) in window(),
        seeds in any::<[u64; 2]>(),
    ) {
        let src = buffer(s, height, seeds[0]);
        let reference = buffer(a, height, seeds[1]);

        let mut plain = 0u32;
        for y in 0..height {
            for x in 0..width.pixels() {
                plain += src[y * s + x].abs_diff(reference[y * a + x]) as u32;
            }
        }

        let kernels = DistortionKernels::new();
        prop_assert_eq!(
            kernels.averaged_sad(&src, s, &reference, a, &reference, a, width, height),
            plain
        );
    }

    /// Property: the averaged SAD is symmetric in its references.
    #[test]
    fn prop_averaged_sad_reference_order(
        (width, height, [s, a, b]) in window(),
        seeds in any::<[u64; 3]>(),
    ) {
        let src = buffer(s, height, seeds[0]);
        let ref1 = buffer(a, height, seeds[1]);
        let ref2 = buffer(b, height, seeds[2]);

        let kernels = DistortionKernels::new();
        prop_assert_eq!(
            kernels.averaged_sad(&src, s, &ref1, a, &ref2, b, width, height),
            kernels.averaged_sad(&src, s, &ref2, b, &ref1, a, width, height)
        );
    }

    /// Property: the block mean is four times the plain 8x8 sum.
    #[test]
    fn prop_block_mean_matches_definition(stride in 8usize..40, seed in any::<u64>()) {
        let src = buffer(stride, 8, seed);
        let sum: u64 = (0..8)
            .flat_map(|y| src[y * stride..y * stride + 8].iter().copied())
            .map(u64::from)
            .sum();

        prop_assert_eq!(DistortionKernels::new().block_mean_8x8(&src, stride), sum * 4);
        prop_assert_eq!(DistortionKernels::scalar().block_mean_8x8(&src, stride), sum * 4);
    }

    /// Property: detected and portable four-block statistics agree, and the
    /// derived variance never exceeds the 8-bit maximum.
    #[test]
    fn prop_four_block_detected_matches_portable(stride in 32usize..80, seed in any::<u64>()) {
        let src = buffer(stride, 7, seed);
        let detected = DistortionKernels::new().four_block_mean_and_mean_square_8x8(&src, stride);
        let portable = DistortionKernels::scalar().four_block_mean_and_mean_square_8x8(&src, stride);
        prop_assert_eq!(detected, portable);

        let (means, squares) = detected;
        for block in 0..4 {
            prop_assert!(block_variance(means[block], squares[block]) <= 128 * 128);
        }
    }
}
