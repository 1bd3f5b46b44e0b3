//! Picture analysis: per-block luma statistics.

use super::{luma, take_picture, Forward};
use crate::picture::{AnalysisStats, PictureTask};
use penc_core::Resource;
use penc_kernels::{block_variance, DistortionKernels};
use penc_pipeline::{Processor, Result};
use rayon::prelude::*;
use tracing::trace;

/// Statistics of one 8-row band of 8x8 blocks.
#[derive(Debug, Default, Clone, Copy)]
struct BandStats {
    mean_sum: u64,
    mean_blocks: u64,
    variance_sum: u64,
    flat: u32,
    textured: u32,
}

impl BandStats {
    fn merge(self, other: BandStats) -> BandStats {
        BandStats {
            mean_sum: self.mean_sum + other.mean_sum,
            mean_blocks: self.mean_blocks + other.mean_blocks,
            variance_sum: self.variance_sum + other.variance_sum,
            flat: self.flat + other.flat,
            textured: self.textured + other.textured,
        }
    }
}

/// Measures the mean luma of every 8x8 block and the variance of every block
/// covered by a 32-column group. Bands of 8 rows are processed on the rayon
/// pool.
pub(crate) struct PictureAnalysis {
    kernels: DistortionKernels,
    flat_threshold: u64,
    out: Forward,
}

impl PictureAnalysis {
    pub(crate) fn new(kernels: DistortionKernels, flat_threshold: u64, out: Forward) -> Self {
        Self {
            kernels,
            flat_threshold,
            out,
        }
    }

    fn band(&self, band: &[u8], stride: usize, width: usize) -> BandStats {
        let mut stats = BandStats::default();

        for x in (0..width / 8).map(|b| b * 8) {
            stats.mean_sum += self.kernels.block_mean_8x8(&band[x..], stride);
            stats.mean_blocks += 1;
        }

        for x in (0..width / 32).map(|g| g * 32) {
            let (means, mean_squares) = self.kernels.four_block_mean_and_mean_square_8x8(&band[x..], stride);
            for (mean, mean_square) in means.into_iter().zip(mean_squares) {
                let variance = block_variance(mean, mean_square);
                stats.variance_sum += variance;
                if variance < self.flat_threshold {
                    stats.flat += 1;
                } else {
                    stats.textured += 1;
                }
            }
        }
        stats
    }

    pub(crate) fn analyse(&self, plane: &[u8], stride: usize, width: usize, height: usize) -> AnalysisStats {
        let band_len = 8 * stride;
        let bands = height / 8;
        if bands == 0 || width < 8 {
            return AnalysisStats::default();
        }

        let total = plane[..bands * band_len]
            .par_chunks(band_len)
            .map(|band| self.band(band, stride, width))
            .reduce(BandStats::default, BandStats::merge);

        let measured = (total.flat + total.textured) as u64;
        AnalysisStats {
            mean_luma: (total.mean_sum / (total.mean_blocks * 256)) as u32,
            average_variance: if measured == 0 { 0 } else { total.variance_sum / measured },
            flat_blocks: total.flat,
            textured_blocks: total.textured,
        }
    }
}

impl Processor<PictureTask> for PictureAnalysis {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let mut pcs = take_picture(super::stage::PICTURE_ANALYSIS, task)?;
        if !pcs.end_of_stream {
            let (plane, stride) = luma(&pcs.source)?;
            let (width, height) = (pcs.source.width() as usize, pcs.source.height() as usize);
            let analysis = self.analyse(plane, stride, width, height);
            trace!(
                picture = pcs.picture_number,
                mean = analysis.mean_luma,
                variance = analysis.average_variance,
                "analysed"
            );
            pcs.analysis = analysis;
        }
        self.out.send(pcs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use std::sync::Arc;

    fn stage(tasks: &penc_core::ResourcePool<PictureTask>) -> PictureAnalysis {
        PictureAnalysis::new(DistortionKernels::new(), 16, Forward::new(tasks))
    }

    #[test]
    fn test_uniform_picture_is_flat() {
        let frame = pattern_frame(64, 32, |_, _| 100);
        let tasks = task_pool(1);
        let stats = stage(&tasks).analyse(frame.plane(0).unwrap(), frame.stride(0), 64, 32);

        assert_eq!(stats.mean_luma, 100);
        assert_eq!(stats.average_variance, 0);
        assert_eq!(stats.flat_blocks, 32);
        assert_eq!(stats.textured_blocks, 0);
    }

    #[test]
    fn test_column_stripes_are_textured() {
        // Alternating 0 / 200 columns: mean 100, variance 10000.
        let frame = pattern_frame(32, 8, |x, _| if x % 2 == 0 { 0 } else { 200 });
        let tasks = task_pool(1);
        let stats = stage(&tasks).analyse(frame.plane(0).unwrap(), frame.stride(0), 32, 8);

        assert_eq!(stats.mean_luma, 100);
        assert_eq!(stats.average_variance, 10000);
        assert_eq!(stats.textured_blocks, 4);
        assert_eq!(stats.flat_percent(), 0);
    }

    #[test]
    fn test_tiny_picture_has_no_blocks() {
        let frame = pattern_frame(4, 4, |_, _| 1);
        let tasks = task_pool(1);
        let stats = stage(&tasks).analyse(frame.plane(0).unwrap(), frame.stride(0), 4, 4);
        assert_eq!(stats, AnalysisStats::default());
    }

    #[test]
    fn test_process_fills_picture() {
        let pictures = picture_pool(1, 32, 16);
        let tasks = task_pool(2);
        let mut pcs = pictures.acquire().unwrap();
        pcs.source = Arc::new(pattern_frame(32, 16, |_, _| 50));

        let mut stage = stage(&tasks);
        stage.process(task(&tasks, pcs)).unwrap();

        let out = tasks.dequeue(0).unwrap();
        let analysis = &out.picture.as_ref().unwrap().analysis;
        assert_eq!(analysis.mean_luma, 50);
        assert_eq!(analysis.flat_blocks, 8);
    }
}
