//! Entropy coding and packetization.

use super::{stage, take_picture, Forward};
use crate::bitstream::{write_packet, PacketHeader};
use crate::picture::{OutputPacket, PictureControlSet, PictureTask};
use penc_core::{Resource, ResourcePool};
use penc_pipeline::{Processor, ReorderBuffer, Result};
use tracing::{debug, trace};

fn header(pcs: &PictureControlSet) -> PacketHeader {
    PacketHeader {
        picture_number: pcs.picture_number,
        pts: pcs.pts,
        slice_type: pcs.slice_type,
        qp: pcs.qp,
        end_of_stream: pcs.end_of_stream,
        payload_size: 0,
    }
}

/// Writes each picture's packet into its bitstream buffer.
pub(crate) struct EntropyCoding {
    out: Forward,
}

impl EntropyCoding {
    pub(crate) fn new(out: Forward) -> Self {
        Self { out }
    }
}

impl Processor<PictureTask> for EntropyCoding {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let mut pcs = take_picture(stage::ENTROPY_CODING, task)?;
        let header = header(&pcs);
        let PictureControlSet { levels, bitstream, .. } = &mut *pcs;
        bitstream.clear();
        write_packet(&header, &levels[..], bitstream);
        trace!(picture = pcs.picture_number, bytes = pcs.bitstream.len(), "entropy coded");
        self.out.send(pcs)
    }
}

/// Restores picture order and copies each coded picture into an output
/// packet for the application. The picture control set is released as soon
/// as its packet is posted.
pub(crate) struct Packetization {
    pending: ReorderBuffer<Resource<PictureControlSet>>,
    output: ResourcePool<OutputPacket>,
}

impl Packetization {
    pub(crate) fn new(output: &ResourcePool<OutputPacket>) -> Self {
        Self {
            pending: ReorderBuffer::new(0),
            output: output.clone(),
        }
    }
}

impl Processor<PictureTask> for Packetization {
    fn process(&mut self, task: Resource<PictureTask>) -> Result<()> {
        let pcs = take_picture(stage::PACKETIZATION, task)?;
        let number = pcs.picture_number;
        self.pending.push(number, pcs)?;

        while let Some(pcs) = self.pending.pop() {
            let mut packet = self.output.acquire()?;
            packet.picture_number = pcs.picture_number;
            packet.pts = pcs.pts;
            packet.slice_type = pcs.slice_type;
            packet.qp = pcs.qp;
            packet.end_of_stream = pcs.end_of_stream;
            packet.data.clear();
            packet.data.extend_from_slice(&pcs.bitstream);

            if pcs.end_of_stream {
                debug!(stage = stage::PACKETIZATION, pictures = number, "end of stream packet");
            } else {
                trace!(picture = pcs.picture_number, "packet out");
            }
            pcs.release();
            self.output.post(packet)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use crate::bitstream::read_packet;

    #[test]
    fn test_entropy_coding_writes_packet() {
        let pictures = picture_pool(1, 16, 16);
        let tasks = task_pool(2);
        let mut pcs = pictures.acquire().unwrap();
        pcs.picture_number = 3;
        pcs.qp = 22;
        pcs.levels.extend([4, 4, 0, 0]);

        EntropyCoding::new(Forward::new(&tasks)).process(task(&tasks, pcs)).unwrap();
        let out = tasks.dequeue(0).unwrap();
        let (header, levels) = read_packet(&out.picture.as_ref().unwrap().bitstream).unwrap();
        assert_eq!(header.picture_number, 3);
        assert_eq!(header.qp, 22);
        assert_eq!(levels, [4, 4, 0, 0]);
    }

    #[test]
    fn test_packetization_orders_and_releases() {
        let pictures = picture_pool(3, 16, 16);
        let tasks = task_pool(3);
        let output = ResourcePool::new("output", 3, 1, |_| OutputPacket::default()).unwrap();
        let mut stage = Packetization::new(&output);

        let mut batch = Vec::new();
        for n in 0..3u64 {
            let mut pcs = pictures.acquire().unwrap();
            pcs.picture_number = n;
            pcs.bitstream.push(n as u8);
            pcs.end_of_stream = n == 2;
            batch.push(pcs);
        }
        for n in [1, 2, 0] {
            let pcs = batch.remove(batch.iter().position(|p| p.picture_number == n).unwrap());
            stage.process(task(&tasks, pcs)).unwrap();
        }

        assert_eq!(pictures.stats().free, 3);
        let packets: Vec<_> = (0..3)
            .map(|_| {
                let packet = output.dequeue(0).unwrap();
                (packet.picture_number, packet.data.clone(), packet.end_of_stream)
            })
            .collect();
        assert_eq!(packets, [(0, vec![0], false), (1, vec![1], false), (2, vec![2], true)]);
    }
}
