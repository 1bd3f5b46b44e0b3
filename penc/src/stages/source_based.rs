//! Source based operations and the picture manager.

use super::{stage, take_picture, Forward};
use crate::picture::{AnalysisStats, PictureControlSet, PictureTask};
use penc_core::Resource;
use penc_pipeline::{Processor, ReorderBuffer, Result};
use tracing::{debug, trace};

/// Quantizer offset from the share of flat blocks: mostly flat pictures get
/// a finer quantizer, pictures with almost no flat area a coarser one.
pub(crate) fn qp_offset(analysis: &AnalysisStats) -> i8 {
    if analysis.flat_blocks + analysis.textured_blocks == 0 {
        return 0;
    }
    match analysis.flat_percent() {
        75.. => -3,
        50..=74 => -1,
        10..=49 => 0,
        _ => 2,
    }
}

pub(crate) struct SourceBasedOperations {
    out: Forward,
}

impl SourceBasedOperations {
    pub(crate) fn new(out: Forward) -> Self {
        Self { out }
    }
}

impl Processor<PictureTask> for SourceBasedOperations {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let mut pcs = take_picture(stage::SOURCE_BASED_OPERATIONS, task)?;
        if !pcs.end_of_stream {
            pcs.qp_offset = qp_offset(&pcs.analysis);
            trace!(picture = pcs.picture_number, offset = pcs.qp_offset, "qp offset");
        }
        self.out.send(pcs)
    }
}

/// Restores picture order after the parallel source based stage and hands
/// pictures to rate control, which keeps a running complexity average.
pub(crate) struct PictureManager {
    pending: ReorderBuffer<Resource<PictureControlSet>>,
    out: Forward,
}

impl PictureManager {
    pub(crate) fn new(out: Forward) -> Self {
        Self {
            pending: ReorderBuffer::new(0),
            out,
        }
    }
}

impl Processor<PictureTask> for PictureManager {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let pcs = take_picture(stage::PICTURE_MANAGER, task)?;
        let number = pcs.picture_number;
        self.pending.push(number, pcs)?;

        while let Some(pcs) = self.pending.pop() {
            if pcs.end_of_stream {
                debug!(stage = stage::PICTURE_MANAGER, pictures = pcs.picture_number, "end of stream");
            }
            self.out.send(pcs)?;
        }
        Ok(())
    }
}
