//! Motion estimation: zero-vector distortion against the reference list.

use super::{luma, stage, take_picture, Forward};
use crate::picture::{MotionStats, PictureTask, SliceType};
use penc_core::{Frame, Resource};
use penc_kernels::{BlockWidth, DistortionKernels};
use penc_pipeline::{PipelineError, Processor, Result};
use tracing::trace;

const BLOCK: usize = 16;

/// For each 16x16 block of a P picture, measures the SAD against the newest
/// reference and against the rounding average of the two newest references,
/// keeping the smaller.
pub(crate) struct MotionEstimation {
    kernels: DistortionKernels,
    out: Forward,
}

impl MotionEstimation {
    pub(crate) fn new(kernels: DistortionKernels, out: Forward) -> Self {
        Self { kernels, out }
    }

    pub(crate) fn estimate(&self, source: &Frame, references: &[std::sync::Arc<Frame>]) -> Result<MotionStats> {
        let mut stats = MotionStats::default();
        let Some(first) = references.first() else {
            return Ok(stats);
        };
        if !references.iter().all(|r| r.same_geometry(source)) {
            return Err(PipelineError::Aborted("reference geometry differs from source".to_string()));
        }

        let (src, stride) = luma(source)?;
        let (ref0, _) = luma(first)?;
        let ref1 = references.get(1).map(|r| luma(r)).transpose()?.map(|(plane, _)| plane);

        let (cols, rows) = (source.width() as usize / BLOCK, source.height() as usize / BLOCK);
        for y in 0..rows {
            for x in 0..cols {
                let offset = y * BLOCK * stride + x * BLOCK;
                let (s, r0) = (&src[offset..], &ref0[offset..]);
                let uni = self.kernels.averaged_sad(s, stride, r0, stride, r0, stride, BlockWidth::W16, BLOCK);
                let best = match ref1 {
                    Some(ref1) => {
                        let bi = self.kernels.averaged_sad(
                            s,
                            stride,
                            r0,
                            stride,
                            &ref1[offset..],
                            stride,
                            BlockWidth::W16,
                            BLOCK,
                        );
                        if bi < uni {
                            stats.bi_pred_blocks += 1;
                        }
                        bi.min(uni)
                    }
                    None => uni,
                };
                stats.blocks += 1;
                stats.distortion += best as u64;
            }
        }
        Ok(stats)
    }
}

impl Processor<PictureTask> for MotionEstimation {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let mut pcs = take_picture(stage::MOTION_ESTIMATION, task)?;
        if !pcs.end_of_stream && pcs.slice_type == SliceType::P {
            let motion = self.estimate(&pcs.source, &pcs.references)?;
            trace!(
                picture = pcs.picture_number,
                distortion = motion.distortion,
                bi = motion.bi_pred_blocks,
                "motion estimated"
            );
            pcs.motion = motion;
        }
        self.out.send(pcs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use std::sync::Arc;

    fn stage() -> MotionEstimation {
        MotionEstimation::new(DistortionKernels::new(), Forward::new(&task_pool(1)))
    }

    #[test]
    fn test_no_references() {
        let source = pattern_frame(32, 32, |_, _| 10);
        assert_eq!(stage().estimate(&source, &[]).unwrap(), MotionStats::default());
    }

    #[test]
    fn test_single_reference_sad() {
        let source = pattern_frame(32, 16, |_, _| 10);
        let reference = Arc::new(pattern_frame(32, 16, |_, _| 7));
        let stats = stage().estimate(&source, &[reference]).unwrap();

        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.distortion, 2 * 256 * 3);
        assert_eq!(stats.distortion_per_block(), 768);
        assert_eq!(stats.bi_pred_blocks, 0);
    }

    #[test]
    fn test_average_of_references_wins() {
        // Source sits halfway between the two references.
        let source = pattern_frame(16, 16, |_, _| 20);
        let newer = Arc::new(pattern_frame(16, 16, |_, _| 10));
        let older = Arc::new(pattern_frame(16, 16, |_, _| 30));
        let stats = stage().estimate(&source, &[newer, older]).unwrap();

        assert_eq!(stats.distortion, 0);
        assert_eq!(stats.bi_pred_blocks, 1);
    }

    #[test]
    fn test_geometry_mismatch_fails() {
        let source = pattern_frame(32, 32, |_, _| 0);
        let reference = Arc::new(pattern_frame(16, 16, |_, _| 0));
        assert!(stage().estimate(&source, &[reference]).is_err());
    }
}
