//! Initial rate control and rate control.

use super::{stage, take_picture, Forward};
use crate::config::MAX_QP;
use crate::picture::{PictureControlSet, PictureTask, SliceType};
use penc_core::Resource;
use penc_pipeline::{Processor, ReorderBuffer, Result};
use tracing::{debug, trace};

/// Quantizer reduction of intra pictures.
const INTRA_QP_DELTA: i32 = 4;

/// Complexity estimate of a picture: the mean block variance for intra
/// pictures, the per-pixel zero-motion SAD scaled by 16 for P pictures.
pub(crate) fn complexity(pcs: &PictureControlSet) -> u64 {
    match pcs.slice_type {
        SliceType::I => pcs.analysis.average_variance,
        SliceType::P => pcs.motion.distortion_per_block() >> 4,
    }
}

/// Restores picture order after motion estimation and assigns each picture
/// its complexity.
pub(crate) struct InitialRateControl {
    pending: ReorderBuffer<Resource<PictureControlSet>>,
    out: Forward,
}

impl InitialRateControl {
    pub(crate) fn new(out: Forward) -> Self {
        Self {
            pending: ReorderBuffer::new(0),
            out,
        }
    }
}

impl Processor<PictureTask> for InitialRateControl {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let pcs = take_picture(stage::INITIAL_RATE_CONTROL, task)?;
        let number = pcs.picture_number;
        self.pending.push(number, pcs)?;

        while let Some(mut pcs) = self.pending.pop() {
            if !pcs.end_of_stream {
                pcs.complexity = complexity(&pcs);
                trace!(picture = pcs.picture_number, complexity = pcs.complexity, "complexity");
            }
            self.out.send(pcs)?;
        }
        Ok(())
    }
}

/// Picks the final quantizer: the base quantizer, lowered for intra
/// pictures, shifted by the source based offset and raised by one for
/// pictures more than twice as complex as the running average.
pub(crate) struct RateControl {
    base_qp: u8,
    average_complexity: Option<u64>,
    out: Forward,
}

impl RateControl {
    pub(crate) fn new(base_qp: u8, out: Forward) -> Self {
        Self {
            base_qp,
            average_complexity: None,
            out,
        }
    }

    pub(crate) fn assign_qp(&mut self, pcs: &PictureControlSet) -> u8 {
        let mut qp = self.base_qp as i32 + pcs.qp_offset as i32;
        if pcs.slice_type == SliceType::I {
            qp -= INTRA_QP_DELTA;
        }

        if let Some(average) = self.average_complexity {
            if pcs.complexity > 2 * average.max(1) {
                qp += 1;
            }
        }
        self.average_complexity = Some(match self.average_complexity {
            Some(average) => (3 * average + pcs.complexity) / 4,
            None => pcs.complexity,
        });

        qp.clamp(0, MAX_QP as i32) as u8
    }
}

impl Processor<PictureTask> for RateControl {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let mut pcs = take_picture(stage::RATE_CONTROL, task)?;
        if pcs.end_of_stream {
            debug!(stage = stage::RATE_CONTROL, "end of stream");
        } else {
            pcs.qp = self.assign_qp(&pcs);
            trace!(picture = pcs.picture_number, qp = pcs.qp, "qp assigned");
        }
        self.out.send(pcs)
    }
}
