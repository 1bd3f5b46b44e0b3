//! Picture decision: slice types and reference lists, in picture order.

use super::{stage, take_picture, Forward};
use crate::picture::{PictureControlSet, PictureTask, SliceType};
use penc_core::{Frame, Resource};
use penc_pipeline::{Processor, ReorderBuffer, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Reference pictures kept for P pictures.
pub(crate) const MAX_REFERENCES: usize = 2;

pub(crate) struct PictureDecision {
    intra_period: u32,
    pending: ReorderBuffer<Resource<PictureControlSet>>,
    /// Sources of the most recent pictures, newest first.
    recent: VecDeque<Arc<Frame>>,
    out: Forward,
}

impl PictureDecision {
    pub(crate) fn new(intra_period: u32, out: Forward) -> Self {
        Self {
            intra_period,
            pending: ReorderBuffer::new(0),
            recent: VecDeque::with_capacity(MAX_REFERENCES),
            out,
        }
    }

    fn slice_type(&self, picture_number: u64) -> SliceType {
        let intra = match self.intra_period {
            0 => picture_number == 0,
            period => picture_number % period as u64 == 0,
        };
        if intra {
            SliceType::I
        } else {
            SliceType::P
        }
    }

    fn decide(&mut self, pcs: &mut PictureControlSet) {
        pcs.slice_type = self.slice_type(pcs.picture_number);
        pcs.references.clear();
        if pcs.slice_type == SliceType::I {
            self.recent.clear();
        } else {
            pcs.references.extend(self.recent.iter().cloned());
        }

        self.recent.push_front(Arc::clone(&pcs.source));
        self.recent.truncate(MAX_REFERENCES);
        trace!(
            picture = pcs.picture_number,
            slice = %pcs.slice_type,
            references = pcs.references.len(),
            "decided"
        );
    }
}

impl Processor<PictureTask> for PictureDecision {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let pcs = take_picture(stage::PICTURE_DECISION, task)?;
        let number = pcs.picture_number;
        self.pending.push(number, pcs)?;

        while let Some(mut pcs) = self.pending.pop() {
            if pcs.end_of_stream {
                debug!(stage = stage::PICTURE_DECISION, "end of stream");
                self.recent.clear();
            } else {
                self.decide(&mut pcs);
            }
            self.out.send(pcs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn test_intra_period() {
        let tasks = task_pool(1);
        let stage = PictureDecision::new(3, Forward::new(&tasks));
        let types: Vec<_> = (0..7).map(|n| stage.slice_type(n)).collect();
        assert_eq!(
            types,
            [SliceType::I, SliceType::P, SliceType::P, SliceType::I, SliceType::P, SliceType::P, SliceType::I]
        );

        let only_first = PictureDecision::new(0, Forward::new(&tasks));
        assert_eq!(only_first.slice_type(0), SliceType::I);
        assert_eq!(only_first.slice_type(100), SliceType::P);
    }

    #[test]
    fn test_out_of_order_pictures_are_decided_in_order() {
        let pictures = picture_pool(4, 16, 16);
        let input = task_pool(4);
        let output = task_pool(4);
        let mut stage = PictureDecision::new(8, Forward::new(&output));

        let mut batch = Vec::new();
        for n in 0..4u64 {
            let mut pcs = pictures.acquire().unwrap();
            pcs.picture_number = n;
            batch.push(pcs);
        }
        for pcs in batch.into_iter().rev() {
            stage.process(task(&input, pcs)).unwrap();
        }

        let mut decided = Vec::new();
        for _ in 0..4 {
            let mut task = output.dequeue(0).unwrap();
            let pcs = task.picture.take().unwrap();
            decided.push((pcs.picture_number, pcs.slice_type, pcs.references.len()));
        }
        assert_eq!(
            decided,
            [(0, SliceType::I, 0), (1, SliceType::P, 1), (2, SliceType::P, 2), (3, SliceType::P, 2)]
        );
    }

    #[test]
    fn test_references_are_newest_first() {
        let pictures = picture_pool(3, 16, 16);
        let input = task_pool(3);
        let output = task_pool(3);
        let mut stage = PictureDecision::new(0, Forward::new(&output));

        let mut sources = Vec::new();
        for n in 0..3u64 {
            let mut pcs = pictures.acquire().unwrap();
            pcs.picture_number = n;
            pcs.source = Arc::new(pattern_frame(16, 16, move |_, _| n as u8));
            sources.push(Arc::clone(&pcs.source));
            stage.process(task(&input, pcs)).unwrap();
        }

        let _first = output.dequeue(0).unwrap();
        let _second = output.dequeue(0).unwrap();
        let third = output.dequeue(0).unwrap();
        let references = &third.picture.as_ref().unwrap().references;
        assert!(Arc::ptr_eq(&references[0], &sources[1]));
        assert!(Arc::ptr_eq(&references[1], &sources[0]));
    }
}
