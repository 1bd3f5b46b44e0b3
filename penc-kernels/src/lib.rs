//! Distortion kernels for motion estimation and picture analysis.
//!
//! This crate provides the pixel-level hot paths of the encoder with runtime
//! CPU feature detection:
//!
//! | Operation | AVX2 (x86_64) | NEON (aarch64) | Notes |
//! |-----------|---------------|----------------|-------|
//! | `averaged_sad` | ✅ Full | ✅ Full | SAD against the rounding average of two references |
//! | `block_mean_8x8` | ✅ Full | ✅ Full | 8x8 pixel sum, scaled by 4 |
//! | `four_block_mean_and_mean_square_8x8` | ✅ Full | ✅ Full | Subsampled mean and mean-square of four 8-wide blocks |
//!
//! Every vector path returns exactly the same integers as the scalar path.
//! Buffer lengths are checked once per call before any vector code runs, so
//! the safe entry points never read outside the slices they are given.
//!
//! # Example
//!
//! ```
//! use penc_kernels::{BlockWidth, DistortionKernels};
//!
//! let kernels = DistortionKernels::new();
//! let src = [10u8; 8 * 4];
//! let refs = [8u8; 8 * 4];
//! let sad = kernels.averaged_sad(&src, 8, &refs, 8, &refs, 8, BlockWidth::W8, 4);
//! assert_eq!(sad, 64);
//! ```

#![allow(clippy::too_many_arguments, clippy::needless_range_loop)]

mod detect;
mod scalar;

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
mod aarch64;

pub use detect::{SimdCapabilities, detect_simd};
pub use scalar::rounding_average;

use tracing::debug;

/// Block widths supported by [`DistortionKernels::averaged_sad`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockWidth {
    W8,
    W16,
    W24,
    W32,
    W48,
    W64,
}

impl BlockWidth {
    /// All widths, in table order.
    pub const ALL: [BlockWidth; 6] = [
        BlockWidth::W8,
        BlockWidth::W16,
        BlockWidth::W24,
        BlockWidth::W32,
        BlockWidth::W48,
        BlockWidth::W64,
    ];

    /// Width in pixels.
    pub fn pixels(self) -> usize {
        match self {
            BlockWidth::W8 => 8,
            BlockWidth::W16 => 16,
            BlockWidth::W24 => 24,
            BlockWidth::W32 => 32,
            BlockWidth::W48 => 48,
            BlockWidth::W64 => 64,
        }
    }

    /// Number of rows consumed per kernel step. Heights must be a multiple
    /// of this value.
    pub fn row_step(self) -> usize {
        match self {
            BlockWidth::W8 => 4,
            BlockWidth::W64 => 1,
            _ => 2,
        }
    }

    /// Look up a width by its pixel count.
    pub fn from_pixels(pixels: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.pixels() == pixels)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for BlockWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pixels())
    }
}

/// Averaged SAD kernel for one fixed width:
/// `(src, src_stride, ref1, ref1_stride, ref2, ref2_stride, height)`.
pub type AveragedSadFn = fn(&[u8], usize, &[u8], usize, &[u8], usize, usize) -> u32;

fn averaged_sad_scalar_w<const W: usize>(
    src: &[u8],
    src_stride: usize,
    ref1: &[u8],
    ref1_stride: usize,
    ref2: &[u8],
    ref2_stride: usize,
    height: usize,
) -> u32 {
    scalar::averaged_sad_scalar(src, src_stride, ref1, ref1_stride, ref2, ref2_stride, W, height)
}

const SCALAR_AVERAGED_SAD: [AveragedSadFn; 6] = [
    averaged_sad_scalar_w::<8>,
    averaged_sad_scalar_w::<16>,
    averaged_sad_scalar_w::<24>,
    averaged_sad_scalar_w::<32>,
    averaged_sad_scalar_w::<48>,
    averaged_sad_scalar_w::<64>,
];

// Only installed once AVX2 has been detected, and only reached through
// `DistortionKernels::averaged_sad`, which checks buffer lengths first.
#[cfg(target_arch = "x86_64")]
const AVX2_AVERAGED_SAD: [AveragedSadFn; 6] = [
    |s, ss, a, sa, b, sb, h| unsafe { x86_64::averaged_sad_8xm_avx2(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { x86_64::averaged_sad_16xm_avx2(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { x86_64::averaged_sad_24xm_avx2(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { x86_64::averaged_sad_32xm_avx2(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { x86_64::averaged_sad_48xm_avx2(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { x86_64::averaged_sad_64xm_avx2(s, ss, a, sa, b, sb, h) },
];

#[cfg(target_arch = "aarch64")]
const NEON_AVERAGED_SAD: [AveragedSadFn; 6] = [
    |s, ss, a, sa, b, sb, h| unsafe { aarch64::averaged_sad_neon::<8>(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { aarch64::averaged_sad_neon::<16>(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { aarch64::averaged_sad_neon::<24>(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { aarch64::averaged_sad_neon::<32>(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { aarch64::averaged_sad_neon::<48>(s, ss, a, sa, b, sb, h) },
    |s, ss, a, sa, b, sb, h| unsafe { aarch64::averaged_sad_neon::<64>(s, ss, a, sa, b, sb, h) },
];

/// Bytes a `width` x `height` window with the given stride spans.
#[inline]
fn required_len(stride: usize, width: usize, height: usize) -> usize {
    if height == 0 {
        0
    } else {
        (height - 1) * stride + width
    }
}

/// Variance of a block from the scaled outputs of the mean kernels.
///
/// `mean` is 256 times the pixel mean and `mean_square` is 65536 times the
/// mean of squared pixels, as produced by [`DistortionKernels::block_mean_8x8`]
/// and [`DistortionKernels::four_block_mean_and_mean_square_8x8`]. The result
/// is in plain pixel units, rounded down.
pub fn block_variance(mean: u64, mean_square: u64) -> u64 {
    mean_square.saturating_sub(mean.saturating_mul(mean)) >> 16
}

/// Dispatching interface over the distortion kernels.
///
/// Selection happens once at construction; afterwards the instance is
/// immutable and can be shared across worker threads.
#[derive(Clone)]
pub struct DistortionKernels {
    caps: SimdCapabilities,
    averaged_sad: [AveragedSadFn; 6],
}

impl DistortionKernels {
    /// Create a kernel set for the current CPU.
    pub fn new() -> Self {
        Self::with_capabilities(detect_simd())
    }

    /// Create a kernel set that always runs the portable code.
    pub fn scalar() -> Self {
        Self::with_capabilities(SimdCapabilities::none())
    }

    /// Create a kernel set limited to `caps`.
    ///
    /// Features the CPU does not actually have are ignored.
    pub fn with_capabilities(caps: SimdCapabilities) -> Self {
        let detected = detect_simd();
        let caps = SimdCapabilities {
            avx2: caps.avx2 && detected.avx2,
            neon: caps.neon && detected.neon,
        };

        #[allow(unused_mut)]
        let mut averaged_sad = SCALAR_AVERAGED_SAD;

        #[cfg(target_arch = "x86_64")]
        if caps.avx2 {
            averaged_sad = AVX2_AVERAGED_SAD;
        }

        #[cfg(target_arch = "aarch64")]
        if caps.neon {
            averaged_sad = NEON_AVERAGED_SAD;
        }

        debug!(level = caps.best_level(), "distortion kernels selected");
        Self { caps, averaged_sad }
    }

    /// Get the capabilities the kernels were selected with.
    pub fn capabilities(&self) -> &SimdCapabilities {
        &self.caps
    }

    /// SAD between `src` and the rounding average of `ref1` and `ref2` over a
    /// `width` x `height` window.
    ///
    /// Passing the same buffer as both references gives the plain SAD
    /// against that buffer.
    ///
    /// # Panics
    ///
    /// Panics if a buffer is shorter than its window or `height` is not a
    /// multiple of [`BlockWidth::row_step`].
    #[inline]
    pub fn averaged_sad(
        &self,
        src: &[u8],
        src_stride: usize,
        ref1: &[u8],
        ref1_stride: usize,
        ref2: &[u8],
        ref2_stride: usize,
        width: BlockWidth,
        height: usize,
    ) -> u32 {
        let w = width.pixels();
        assert!(
            height % width.row_step() == 0,
            "height {height} is not a multiple of {} for width {w}",
            width.row_step()
        );
        assert!(src.len() >= required_len(src_stride, w, height), "source block out of bounds");
        assert!(ref1.len() >= required_len(ref1_stride, w, height), "first reference out of bounds");
        assert!(ref2.len() >= required_len(ref2_stride, w, height), "second reference out of bounds");
        if height == 0 {
            return 0;
        }

        (self.averaged_sad[width.index()])(src, src_stride, ref1, ref1_stride, ref2, ref2_stride, height)
    }

    /// Sum of an 8x8 block, scaled by 4 (256 times the block mean).
    ///
    /// # Panics
    ///
    /// Panics if `src` is shorter than `7 * stride + 8` bytes.
    #[inline]
    pub fn block_mean_8x8(&self, src: &[u8], stride: usize) -> u64 {
        assert!(src.len() >= required_len(stride, 8, 8), "8x8 block out of bounds");

        #[cfg(target_arch = "x86_64")]
        if self.caps.avx2 {
            unsafe {
                return x86_64::block_mean_8x8_avx2(src, stride);
            }
        }

        #[cfg(target_arch = "aarch64")]
        if self.caps.neon {
            unsafe {
                return aarch64::block_mean_8x8_neon(src, stride);
            }
        }

        scalar::block_mean_8x8_scalar(src, stride)
    }

    /// Subsampled mean and mean-square of four horizontally adjacent 8-wide
    /// blocks.
    ///
    /// Rows 0, 2, 4 and 6 (in units of `stride`) are sampled over 32 columns.
    /// For block `i`, `means[i]` is 256 times the sample mean and
    /// `mean_squares[i]` is 65536 times the mean of squared samples.
    ///
    /// # Panics
    ///
    /// Panics if `src` is shorter than `6 * stride + 32` bytes.
    #[inline]
    pub fn four_block_mean_and_mean_square_8x8(&self, src: &[u8], stride: usize) -> ([u64; 4], [u64; 4]) {
        assert!(src.len() >= required_len(stride, 32, 7), "four-block region out of bounds");

        #[cfg(target_arch = "x86_64")]
        if self.caps.avx2 {
            unsafe {
                return x86_64::four_block_mean_and_mean_square_avx2(src, stride);
            }
        }

        #[cfg(target_arch = "aarch64")]
        if self.caps.neon {
            unsafe {
                return aarch64::four_block_mean_and_mean_square_neon(src, stride);
            }
        }

        scalar::four_block_mean_and_mean_square_scalar(src, stride)
    }
}

impl Default for DistortionKernels {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DistortionKernels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistortionKernels")
            .field("level", &self.caps.best_level())
            .finish()
    }
}
