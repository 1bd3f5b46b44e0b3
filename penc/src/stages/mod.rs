//! The default stage collaborators of the encoder.
//!
//! Every inter-stage edge carries [`PictureTask`]s. A stage takes the
//! picture out of its input task, releases the task at once (so the
//! upstream stage can reuse the slot), works on the picture and hands it to
//! the next edge with [`Forward::send`]. Stages that must see pictures in
//! order park them in a [`penc_pipeline::ReorderBuffer`].
//!
//! The end-of-stream picture travels the whole pipeline like any other
//! picture; every stage skips its computation for it.

mod analysis;
mod coordination;
mod decision;
mod entropy;
mod mode_decision;
mod motion;
mod rate_control;
mod source_based;

pub(crate) use analysis::PictureAnalysis;
pub(crate) use coordination::ResourceCoordination;
pub(crate) use decision::PictureDecision;
pub(crate) use entropy::{EntropyCoding, Packetization};
pub(crate) use mode_decision::{EncDec, ModeDecisionConfiguration};
pub(crate) use motion::MotionEstimation;
pub(crate) use rate_control::{InitialRateControl, RateControl};
pub(crate) use source_based::{PictureManager, SourceBasedOperations};

use crate::picture::{PictureControlSet, PictureTask};
use penc_core::{Frame, Resource, ResourcePool};
use penc_pipeline::{PipelineError, Result};

/// Stage names, also used as worker thread name prefixes.
pub mod stage {
    pub const RESOURCE_COORDINATION: &str = "resource_coordination";
    pub const PICTURE_ANALYSIS: &str = "picture_analysis";
    pub const PICTURE_DECISION: &str = "picture_decision";
    pub const MOTION_ESTIMATION: &str = "motion_estimation";
    pub const INITIAL_RATE_CONTROL: &str = "initial_rate_control";
    pub const SOURCE_BASED_OPERATIONS: &str = "source_based_operations";
    pub const PICTURE_MANAGER: &str = "picture_manager";
    pub const RATE_CONTROL: &str = "rate_control";
    pub const MODE_DECISION_CONFIGURATION: &str = "mode_decision_configuration";
    pub const ENC_DEC: &str = "enc_dec";
    pub const ENTROPY_CODING: &str = "entropy_coding";
    pub const PACKETIZATION: &str = "packetization";
}

/// Pool (edge) names. They match the fields of [`crate::PoolConfig`].
pub mod edge {
    pub const INPUT: &str = "input";
    pub const PICTURE_CONTROL_SET: &str = "picture_control_set";
    pub const RESOURCE_COORDINATION_RESULTS: &str = "resource_coordination_results";
    pub const PICTURE_ANALYSIS_RESULTS: &str = "picture_analysis_results";
    pub const PICTURE_DECISION_RESULTS: &str = "picture_decision_results";
    pub const MOTION_ESTIMATION_RESULTS: &str = "motion_estimation_results";
    pub const INITIAL_RATE_CONTROL_RESULTS: &str = "initial_rate_control_results";
    pub const PICTURE_DEMUX_RESULTS: &str = "picture_demux_results";
    pub const RATE_CONTROL_TASKS: &str = "rate_control_tasks";
    pub const RATE_CONTROL_RESULTS: &str = "rate_control_results";
    pub const ENC_DEC_TASKS: &str = "enc_dec_tasks";
    pub const ENC_DEC_RESULTS: &str = "enc_dec_results";
    pub const ENTROPY_CODING_RESULTS: &str = "entropy_coding_results";
    pub const OUTPUT: &str = "output";
}

/// Output side of a stage: the task pool of the next edge.
#[derive(Clone)]
pub(crate) struct Forward {
    pool: ResourcePool<PictureTask>,
}

impl Forward {
    pub(crate) fn new(pool: &ResourcePool<PictureTask>) -> Self {
        Self { pool: pool.clone() }
    }

    /// Wrap `picture` in a task of the next edge, blocking while the edge
    /// is full.
    pub(crate) fn send(&self, picture: Resource<PictureControlSet>) -> Result<()> {
        let mut task = self.pool.acquire()?;
        task.picture = Some(picture);
        self.pool.post(task)?;
        Ok(())
    }
}

/// Detach the picture from its task and release the task.
pub(crate) fn take_picture(
    stage: &str,
    mut task: Resource<PictureTask>,
) -> Result<Resource<PictureControlSet>> {
    let picture = task.picture.take().ok_or_else(|| {
        PipelineError::Aborted(format!("{stage} received a task without a picture"))
    })?;
    task.release();
    Ok(picture)
}

/// Luma plane of `frame` with its stride.
pub(crate) fn luma(frame: &Frame) -> Result<(&[u8], usize)> {
    let plane = frame
        .plane(0)
        .ok_or_else(|| PipelineError::Aborted("frame has no luma plane".to_string()))?;
    Ok((plane, frame.stride(0)))
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use penc_core::PixelFormat;

    /// A standalone picture pool for driving one stage by hand.
    pub fn picture_pool(count: usize, width: u32, height: u32) -> ResourcePool<PictureControlSet> {
        ResourcePool::with_recycle(
            "pictures",
            count,
            1,
            |_| PictureControlSet::new(width, height, PixelFormat::Gray8),
            PictureControlSet::recycle,
        )
        .unwrap()
    }

    /// A task pool standing in for an edge.
    pub fn task_pool(count: usize) -> ResourcePool<PictureTask> {
        ResourcePool::with_recycle("tasks", count, 1, |_| PictureTask::default(), PictureTask::recycle).unwrap()
    }

    /// Wrap a picture in a task of `pool`.
    pub fn task(
        pool: &ResourcePool<PictureTask>,
        picture: Resource<PictureControlSet>,
    ) -> Resource<PictureTask> {
        let mut task = pool.acquire().unwrap();
        task.picture = Some(picture);
        task
    }

    /// Luma frame whose samples follow `f(x, y)`.
    pub fn pattern_frame(width: u32, height: u32, f: impl Fn(usize, usize) -> u8) -> Frame {
        let mut frame = Frame::new(width, height, PixelFormat::Gray8);
        let stride = frame.stride(0);
        let plane = frame.plane_mut(0).unwrap();
        for y in 0..height as usize {
            for x in 0..width as usize {
                plane[y * stride + x] = f(x, y);
            }
        }
        frame
    }
}
