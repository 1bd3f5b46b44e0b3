//! Mode decision configuration and EncDec.

use super::{luma, stage, take_picture, Forward};
use crate::picture::{PictureControlSet, PictureTask, SliceType};
use penc_core::Resource;
use penc_kernels::DistortionKernels;
use penc_pipeline::{Processor, Result};
use tracing::trace;

/// Rate-distortion multiplier for `qp`, fixed point with 8 fractional bits.
pub(crate) fn lambda(qp: u8) -> u32 {
    let lambda = 0.57 * 2f64.powf((qp as f64 - 12.0) / 3.0);
    (lambda * 256.0).round() as u32
}

pub(crate) struct ModeDecisionConfiguration {
    out: Forward,
}

impl ModeDecisionConfiguration {
    pub(crate) fn new(out: Forward) -> Self {
        Self { out }
    }
}

impl Processor<PictureTask> for ModeDecisionConfiguration {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let mut pcs = take_picture(stage::MODE_DECISION_CONFIGURATION, task)?;
        if !pcs.end_of_stream {
            pcs.lambda = lambda(pcs.qp);
        }
        self.out.send(pcs)
    }
}

/// Produces one level per 8x8 luma block: the block mean for intra
/// pictures, the absolute difference of block means against the newest
/// reference for P pictures. Values are quantized by a shift of `qp / 6`;
/// P residuals inside the lambda dead zone become zero.
pub(crate) struct EncDec {
    kernels: DistortionKernels,
    out: Forward,
}

impl EncDec {
    pub(crate) fn new(kernels: DistortionKernels, out: Forward) -> Self {
        Self { kernels, out }
    }

    pub(crate) fn encode(&self, pcs: &mut PictureControlSet) -> Result<()> {
        let (src, stride) = luma(&pcs.source)?;
        let reference = match (pcs.slice_type, pcs.references.first()) {
            (SliceType::P, Some(reference)) => Some(luma(reference)?.0),
            _ => None,
        };

        let shift = pcs.qp / 6;
        let dead_zone = pcs.lambda >> 12;
        let (cols, rows) = (pcs.source.width() as usize / 8, pcs.source.height() as usize / 8);

        pcs.levels.clear();
        for y in 0..rows {
            for x in 0..cols {
                let offset = y * 8 * stride + x * 8;
                let mean = (self.kernels.block_mean_8x8(&src[offset..], stride) >> 8) as u32;
                let value = match reference {
                    Some(reference) => {
                        let predicted = (self.kernels.block_mean_8x8(&reference[offset..], stride) >> 8) as u32;
                        let residual = mean.abs_diff(predicted);
                        if residual < dead_zone {
                            0
                        } else {
                            residual
                        }
                    }
                    None => mean,
                };
                pcs.levels.push((value >> shift) as u8);
            }
        }
        Ok(())
    }
}

impl Processor<PictureTask> for EncDec {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let mut pcs = take_picture(stage::ENC_DEC, task)?;
        if !pcs.end_of_stream {
            self.encode(&mut pcs)?;
            trace!(picture = pcs.picture_number, blocks = pcs.levels.len(), "coded");
        }
        self.out.send(pcs)
    }
}
