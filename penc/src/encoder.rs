//! The encoder handle.

use crate::bitstream::{read_packet, PacketHeader};
use crate::config::{EncoderConfig, KernelSelection, WorkerConfig};
use crate::error::{EncodeError, Result};
use crate::picture::{InputBuffer, OutputPacket, PictureControlSet, PictureTask, SliceType};
use crate::stages::{
    edge, stage, EncDec, EntropyCoding, Forward, InitialRateControl, ModeDecisionConfiguration,
    MotionEstimation, Packetization, PictureAnalysis, PictureDecision, PictureManager, RateControl,
    ResourceCoordination, SourceBasedOperations,
};
use penc_core::{Frame, PoolStats, ResourcePool};
use penc_kernels::DistortionKernels;
use penc_pipeline::{PipelineBuilder, PipelineGraph, QueueRef};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, trace};

/// A coded picture returned by [`Encoder::receive_packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Position of the picture in input order.
    pub picture_number: u64,
    /// Presentation timestamp of the source frame.
    pub pts: i64,
    pub slice_type: SliceType,
    pub qp: u8,
    /// Packet bytes, header included.
    pub data: Vec<u8>,
    /// Set on the final packet of the session, which codes no picture.
    pub end_of_stream: bool,
}

impl EncodedPacket {
    /// Parse the packet into its header and block levels.
    pub fn parse(&self) -> Result<(PacketHeader, Vec<u8>)> {
        read_packet(&self.data)
    }
}

/// Encoder statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    /// Frames accepted by [`Encoder::submit_frame`].
    pub frames_submitted: u64,
    /// Picture packets returned by [`Encoder::receive_packet`], the
    /// end-of-stream packet excluded.
    pub packets_received: u64,
    /// Submissions that had to wait for a free input buffer.
    pub input_waits: u64,
    /// Pictures currently inside the pipeline.
    pub pictures_in_flight: usize,
}

/// A running encoder session.
///
/// All methods take `&self`: one thread may submit frames while another
/// receives packets. A caller that only submits will eventually block once
/// the output pool is full, since packets are not dropped.
///
/// # Example
///
/// ```
/// use penc::{Encoder, EncoderConfig, Frame, PixelFormat};
///
/// let config = EncoderConfig::new(64, 64).pixel_format(PixelFormat::Gray8).workers(2);
/// let encoder = Encoder::open(config)?;
///
/// let mut frame = Frame::new(64, 64, PixelFormat::Gray8);
/// frame.fill(128);
/// encoder.submit_frame(&frame)?;
/// encoder.send_eos()?;
///
/// let packet = encoder.receive_packet()?.unwrap();
/// assert_eq!(packet.picture_number, 0);
/// assert!(encoder.receive_packet()?.unwrap().end_of_stream);
/// assert!(encoder.receive_packet()?.is_none());
///
/// encoder.drain_and_close()?;
/// # Ok::<(), penc::EncodeError>(())
/// ```
pub struct Encoder {
    config: EncoderConfig,
    kernels: DistortionKernels,
    graph: PipelineGraph,
    input: ResourcePool<InputBuffer>,
    output: ResourcePool<OutputPacket>,
    pictures: ResourcePool<PictureControlSet>,
    eos_sent: AtomicBool,
    eos_received: AtomicBool,
    frames_submitted: AtomicU64,
    packets_received: AtomicU64,
}

fn task_edge(builder: &mut PipelineBuilder, name: &'static str, count: usize) -> Result<ResourcePool<PictureTask>> {
    Ok(builder.add_recycling_pool(name, count, 1, |_| PictureTask::default(), PictureTask::recycle)?)
}

impl Encoder {
    /// Validate `config`, allocate every pool and start every stage.
    pub fn open(config: EncoderConfig) -> Result<Self> {
        config.validate()?;

        let kernels = match config.kernels {
            KernelSelection::Auto => DistortionKernels::new(),
            KernelSelection::Scalar => DistortionKernels::scalar(),
        };
        info!(
            width = config.width,
            height = config.height,
            format = %config.pixel_format,
            kernels = kernels.capabilities().best_level(),
            "opening encoder"
        );

        let (width, height, format) = (config.width, config.height, config.pixel_format);
        let pools = &config.pools;
        let workers = &config.workers;
        let mut builder = PipelineBuilder::new();

        let input = builder.add_pool(edge::INPUT, pools.input, 1, |_| InputBuffer::new(width, height, format))?;
        let pictures = builder.add_recycling_pool(
            edge::PICTURE_CONTROL_SET,
            pools.picture_control_set,
            1,
            |_| PictureControlSet::new(width, height, format),
            PictureControlSet::recycle,
        )?;
        let coordinated = task_edge(&mut builder, edge::RESOURCE_COORDINATION_RESULTS, pools.resource_coordination_results)?;
        let analysed = task_edge(&mut builder, edge::PICTURE_ANALYSIS_RESULTS, pools.picture_analysis_results)?;
        let decided = task_edge(&mut builder, edge::PICTURE_DECISION_RESULTS, pools.picture_decision_results)?;
        let estimated = task_edge(&mut builder, edge::MOTION_ESTIMATION_RESULTS, pools.motion_estimation_results)?;
        let scored = task_edge(&mut builder, edge::INITIAL_RATE_CONTROL_RESULTS, pools.initial_rate_control_results)?;
        let demuxed = task_edge(&mut builder, edge::PICTURE_DEMUX_RESULTS, pools.picture_demux_results)?;
        let rc_tasks = task_edge(&mut builder, edge::RATE_CONTROL_TASKS, pools.rate_control_tasks)?;
        let rc_results = task_edge(&mut builder, edge::RATE_CONTROL_RESULTS, pools.rate_control_results)?;
        let enc_dec_tasks = task_edge(&mut builder, edge::ENC_DEC_TASKS, pools.enc_dec_tasks)?;
        let enc_dec_results = task_edge(&mut builder, edge::ENC_DEC_RESULTS, pools.enc_dec_results)?;
        let coded = task_edge(&mut builder, edge::ENTROPY_CODING_RESULTS, pools.entropy_coding_results)?;
        let output = builder.add_pool(edge::OUTPUT, pools.output, 1, |_| OutputPacket::default())?;

        builder.add_stage(stage::RESOURCE_COORDINATION, QueueRef::from(&input), 1, |_| {
            ResourceCoordination::new(&pictures, Forward::new(&coordinated))
        })?;
        builder.add_stage(
            stage::PICTURE_ANALYSIS,
            QueueRef::from(&coordinated),
            WorkerConfig::effective(workers.picture_analysis),
            |_| PictureAnalysis::new(kernels.clone(), config.flat_variance_threshold, Forward::new(&analysed)),
        )?;
        builder.add_stage(stage::PICTURE_DECISION, QueueRef::from(&analysed), 1, |_| {
            PictureDecision::new(config.intra_period, Forward::new(&decided))
        })?;
        builder.add_stage(
            stage::MOTION_ESTIMATION,
            QueueRef::from(&decided),
            WorkerConfig::effective(workers.motion_estimation),
            |_| MotionEstimation::new(kernels.clone(), Forward::new(&estimated)),
        )?;
        builder.add_stage(stage::INITIAL_RATE_CONTROL, QueueRef::from(&estimated), 1, |_| {
            InitialRateControl::new(Forward::new(&scored))
        })?;
        builder.add_stage(
            stage::SOURCE_BASED_OPERATIONS,
            QueueRef::from(&scored),
            WorkerConfig::effective(workers.source_based_operations),
            |_| SourceBasedOperations::new(Forward::new(&demuxed)),
        )?;
        builder.add_stage(stage::PICTURE_MANAGER, QueueRef::from(&demuxed), 1, |_| {
            PictureManager::new(Forward::new(&rc_tasks))
        })?;
        builder.add_stage(stage::RATE_CONTROL, QueueRef::from(&rc_tasks), 1, |_| {
            RateControl::new(config.base_qp, Forward::new(&rc_results))
        })?;
        builder.add_stage(
            stage::MODE_DECISION_CONFIGURATION,
            QueueRef::from(&rc_results),
            WorkerConfig::effective(workers.mode_decision_configuration),
            |_| ModeDecisionConfiguration::new(Forward::new(&enc_dec_tasks)),
        )?;
        builder.add_stage(
            stage::ENC_DEC,
            QueueRef::from(&enc_dec_tasks),
            WorkerConfig::effective(workers.enc_dec),
            |_| EncDec::new(kernels.clone(), Forward::new(&enc_dec_results)),
        )?;
        builder.add_stage(
            stage::ENTROPY_CODING,
            QueueRef::from(&enc_dec_results),
            WorkerConfig::effective(workers.entropy_coding),
            |_| EntropyCoding::new(Forward::new(&coded)),
        )?;
        builder.add_stage(stage::PACKETIZATION, QueueRef::from(&coded), 1, |_| Packetization::new(&output))?;

        let graph = builder.start()?;
        debug!(stages = graph.stage_ids().len(), pools = graph.edge_ids().len(), "encoder pipeline running");

        Ok(Self {
            config,
            kernels,
            graph,
            input,
            output,
            pictures,
            eos_sent: AtomicBool::new(false),
            eos_received: AtomicBool::new(false),
            frames_submitted: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
        })
    }

    /// The session configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// The distortion kernels the stages run.
    pub fn kernels(&self) -> &DistortionKernels {
        &self.kernels
    }

    /// The stage failure, if the session failed; otherwise `error`.
    fn session_error(&self, error: penc_core::Error) -> EncodeError {
        match self.graph.check() {
            Err(failure) => failure.into(),
            Ok(()) => error.into(),
        }
    }

    fn check_geometry(&self, frame: &Frame) -> Result<()> {
        let config = &self.config;
        if frame.width() != config.width || frame.height() != config.height || frame.format() != config.pixel_format {
            return Err(EncodeError::FrameGeometry {
                expected: format!("{}x{} {}", config.width, config.height, config.pixel_format),
                actual: format!("{}x{} {}", frame.width(), frame.height(), frame.format()),
            });
        }
        Ok(())
    }

    /// Copy `frame` into a free input buffer and queue it, blocking while
    /// every input buffer is in use.
    pub fn submit_frame(&self, frame: &Frame) -> Result<()> {
        if self.eos_sent.load(Ordering::Acquire) {
            return Err(EncodeError::EndOfStreamSent);
        }
        self.check_geometry(frame)?;
        self.graph.check()?;

        let mut buffer = self.input.acquire().map_err(|e| self.session_error(e))?;
        buffer.end_of_stream = false;
        buffer.frame.copy_from(frame)?;
        self.input.post(buffer).map_err(|e| self.session_error(e))?;

        let submitted = self.frames_submitted.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(frames = submitted, pts = frame.pts, "frame submitted");
        Ok(())
    }

    /// Signal the end of input. The pipeline drains and emits a final
    /// end-of-stream packet after the last picture.
    pub fn send_eos(&self) -> Result<()> {
        if self.eos_sent.swap(true, Ordering::AcqRel) {
            return Err(EncodeError::EndOfStreamSent);
        }
        let mut buffer = self.input.acquire().map_err(|e| self.session_error(e))?;
        buffer.end_of_stream = true;
        self.input.post(buffer).map_err(|e| self.session_error(e))?;
        info!(frames = self.frames_submitted.load(Ordering::Relaxed), "end of stream sent");
        Ok(())
    }

    fn take_packet(&self, packet: penc_core::Resource<OutputPacket>) -> EncodedPacket {
        let encoded = EncodedPacket {
            picture_number: packet.picture_number,
            pts: packet.pts,
            slice_type: packet.slice_type,
            qp: packet.qp,
            data: packet.data.clone(),
            end_of_stream: packet.end_of_stream,
        };
        packet.release();

        if encoded.end_of_stream {
            self.eos_received.store(true, Ordering::Release);
            debug!(packets = self.packets_received.load(Ordering::Relaxed), "end of stream received");
        } else {
            self.packets_received.fetch_add(1, Ordering::Relaxed);
        }
        encoded
    }

    /// Wait for the next packet, in picture order.
    ///
    /// Returns `None` once the end-of-stream packet has been returned.
    pub fn receive_packet(&self) -> Result<Option<EncodedPacket>> {
        if self.eos_received.load(Ordering::Acquire) {
            return Ok(None);
        }
        let packet = self.output.dequeue(0).map_err(|e| self.session_error(e))?;
        Ok(Some(self.take_packet(packet)))
    }

    /// Take the next packet if one is ready.
    pub fn try_receive_packet(&self) -> Result<Option<EncodedPacket>> {
        if self.eos_received.load(Ordering::Acquire) {
            return Ok(None);
        }
        self.graph.check()?;
        let packet = self.output.try_dequeue(0)?;
        Ok(packet.map(|packet| self.take_packet(packet)))
    }

    /// Session counters.
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            input_waits: self.input.stats().waits,
            pictures_in_flight: self.pictures.stats().outstanding,
        }
    }

    /// Usage counters of one pipeline pool, by its edge name.
    pub fn pool_stats(&self, edge: &'static str) -> Result<PoolStats> {
        Ok(self.graph.pool_stats(edge)?)
    }

    /// Worker threads running `stage`.
    pub fn stage_workers(&self, stage: &'static str) -> Result<usize> {
        Ok(self.graph.stage_workers(stage)?)
    }

    /// Stop every stage, join its threads and return all pooled objects.
    ///
    /// Pictures still in flight are discarded. Returns the stage failure if
    /// the session failed.
    pub fn drain_and_close(self) -> Result<()> {
        info!(
            frames = self.frames_submitted.load(Ordering::Relaxed),
            packets = self.packets_received.load(Ordering::Relaxed),
            "closing encoder"
        );
        self.graph.drain_and_close()?;
        Ok(())
    }
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("width", &self.config.width)
            .field("height", &self.config.height)
            .field("graph", &self.graph)
            .field("stats", &self.stats())
            .finish()
    }
}
