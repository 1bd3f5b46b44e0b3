//! Resource coordination: the entry of the pipeline.

use super::{stage, Forward};
use crate::picture::{InputBuffer, PictureControlSet};
use penc_core::{Resource, ResourcePool};
use penc_pipeline::{Processor, Result};
use std::sync::Arc;
use tracing::{debug, trace};

/// Copies each input buffer into a fresh picture control set, numbers it in
/// arrival order and releases the input buffer back to the application.
pub(crate) struct ResourceCoordination {
    pictures: ResourcePool<PictureControlSet>,
    out: Forward,
    next_picture: u64,
}

impl ResourceCoordination {
    pub(crate) fn new(pictures: &ResourcePool<PictureControlSet>, out: Forward) -> Self {
        Self {
            pictures: pictures.clone(),
            out,
            next_picture: 0,
        }
    }
}

impl Processor<InputBuffer> for ResourceCoordination {
    fn process(&mut self, input: Resource<InputBuffer>) -> Result<()> {
        let mut pcs = self.pictures.acquire()?;
        pcs.picture_number = self.next_picture;
        self.next_picture += 1;

        if input.end_of_stream {
            pcs.end_of_stream = true;
            debug!(stage = stage::RESOURCE_COORDINATION, pictures = pcs.picture_number, "end of stream");
        } else {
            pcs.pts = input.frame.pts;
            // A source still used as a reference by a later picture is
            // detached here rather than overwritten.
            Arc::make_mut(&mut pcs.source).copy_from(&input.frame)?;
            trace!(picture = pcs.picture_number, pts = pcs.pts, "picture admitted");
        }
        input.release();

        self.out.send(pcs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use penc_core::PixelFormat;

    #[test]
    fn test_numbers_and_copies_input() {
        let inputs = ResourcePool::new("input", 1, 1, |_| InputBuffer::new(16, 16, PixelFormat::Gray8)).unwrap();
        let pictures = picture_pool(2, 16, 16);
        let tasks = task_pool(2);
        let mut stage = ResourceCoordination::new(&pictures, Forward::new(&tasks));

        for pts in [100, 200] {
            let mut input = inputs.acquire().unwrap();
            input.frame.fill(9);
            input.frame.pts = pts;
            stage.process(input).unwrap();
            assert_eq!(inputs.stats().free, 1);
        }

        for expected in 0..2u64 {
            let task = tasks.dequeue(0).unwrap();
            let pcs = task.picture.as_ref().unwrap();
            assert_eq!(pcs.picture_number, expected);
            assert_eq!(pcs.pts, 100 * (expected as i64 + 1));
            assert!(pcs.source.plane(0).unwrap().iter().all(|&v| v == 9));
        }
    }

    #[test]
    fn test_end_of_stream_picture() {
        let inputs = ResourcePool::new("input", 1, 1, |_| InputBuffer::new(16, 16, PixelFormat::Gray8)).unwrap();
        let pictures = picture_pool(1, 16, 16);
        let tasks = task_pool(1);
        let mut stage = ResourceCoordination::new(&pictures, Forward::new(&tasks));

        let mut input = inputs.acquire().unwrap();
        input.end_of_stream = true;
        stage.process(input).unwrap();

        let task = tasks.dequeue(0).unwrap();
        assert!(task.picture.as_ref().unwrap().end_of_stream);
    }
}
