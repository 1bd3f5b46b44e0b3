//! Objects carried by the pipeline pools.
//!
//! Every object is allocated once, when its pool is created, and reused for
//! the lifetime of the encoder. [`PictureControlSet`] holds everything the
//! stages learn about one picture; the task objects of the inter-stage
//! edges only carry a handle to it from one stage to the next.

use penc_core::{Frame, PixelFormat, Resource};
use std::fmt;
use std::sync::Arc;

/// Prediction type decided for a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceType {
    /// Intra picture, no references.
    #[default]
    I,
    /// Predicted from earlier pictures.
    P,
}

impl SliceType {
    /// Wire code of the slice type.
    pub fn code(self) -> u8 {
        match self {
            SliceType::I => 0,
            SliceType::P => 1,
        }
    }

    /// Slice type from its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SliceType::I),
            1 => Some(SliceType::P),
            _ => None,
        }
    }
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceType::I => write!(f, "I"),
            SliceType::P => write!(f, "P"),
        }
    }
}

/// An input slot of the encoder.
#[derive(Debug)]
pub struct InputBuffer {
    /// Source samples, sized for the configured geometry.
    pub frame: Frame,
    /// Set on the final, sample-less buffer of a session.
    pub end_of_stream: bool,
}

impl InputBuffer {
    /// Allocate a buffer for `width` x `height` pictures.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            frame: Frame::new(width, height, format),
            end_of_stream: false,
        }
    }
}

/// Luma statistics gathered by picture analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    /// Average luma sample value.
    pub mean_luma: u32,
    /// Mean 8x8 block variance.
    pub average_variance: u64,
    /// Blocks with variance below the flat threshold.
    pub flat_blocks: u32,
    /// Blocks at or above the flat threshold.
    pub textured_blocks: u32,
}

impl AnalysisStats {
    /// Share of flat blocks, in percent.
    pub fn flat_percent(&self) -> u32 {
        let total = self.flat_blocks + self.textured_blocks;
        if total == 0 {
            0
        } else {
            self.flat_blocks * 100 / total
        }
    }
}

/// Zero-motion distortion gathered by motion estimation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotionStats {
    /// 16x16 blocks measured.
    pub blocks: u32,
    /// Sum of the best distortion of every block.
    pub distortion: u64,
    /// Blocks where the two-reference average beat a single reference.
    pub bi_pred_blocks: u32,
}

impl MotionStats {
    /// Mean distortion per block.
    pub fn distortion_per_block(&self) -> u64 {
        if self.blocks == 0 {
            0
        } else {
            self.distortion / self.blocks as u64
        }
    }
}

/// Per-picture state, owned by whichever stage is working on the picture.
#[derive(Debug)]
pub struct PictureControlSet {
    /// Position of the picture in input order, from zero.
    pub picture_number: u64,
    /// Presentation timestamp copied from the input frame.
    pub pts: i64,
    /// Marks the end-of-stream picture, which carries no samples.
    pub end_of_stream: bool,
    /// Source samples. Shared read-only with later pictures that use this
    /// one as a reference.
    pub source: Arc<Frame>,
    /// Prediction type.
    pub slice_type: SliceType,
    /// Reference pictures, most recent first.
    pub references: Vec<Arc<Frame>>,
    /// Picture analysis output.
    pub analysis: AnalysisStats,
    /// Motion estimation output.
    pub motion: MotionStats,
    /// Complexity estimate from initial rate control.
    pub complexity: u64,
    /// Quantizer offset from source based operations.
    pub qp_offset: i8,
    /// Final quantizer from rate control.
    pub qp: u8,
    /// Rate-distortion multiplier, fixed point with 8 fractional bits.
    pub lambda: u32,
    /// Quantized 8x8 block levels from EncDec, in raster order.
    pub levels: Vec<u8>,
    /// Coded picture from entropy coding.
    pub bitstream: Vec<u8>,
}

impl PictureControlSet {
    /// Allocate a picture for `width` x `height` sources.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let blocks = (width as usize / 8) * (height as usize / 8);
        Self {
            picture_number: 0,
            pts: 0,
            end_of_stream: false,
            source: Arc::new(Frame::new(width, height, format)),
            slice_type: SliceType::I,
            references: Vec::with_capacity(2),
            analysis: AnalysisStats::default(),
            motion: MotionStats::default(),
            complexity: 0,
            qp_offset: 0,
            qp: 0,
            lambda: 0,
            levels: Vec::with_capacity(blocks),
            bitstream: Vec::with_capacity(blocks + 64),
        }
    }

    /// Forget the previous picture's results. Buffers keep their capacity.
    pub fn recycle(&mut self) {
        self.end_of_stream = false;
        self.slice_type = SliceType::I;
        self.references.clear();
        self.analysis = AnalysisStats::default();
        self.motion = MotionStats::default();
        self.complexity = 0;
        self.qp_offset = 0;
        self.qp = 0;
        self.lambda = 0;
        self.levels.clear();
        self.bitstream.clear();
    }
}

/// Task object of every inter-stage edge: the picture being handed over.
#[derive(Debug, Default)]
pub struct PictureTask {
    /// The picture, present while the task is queued.
    pub picture: Option<Resource<PictureControlSet>>,
}

impl PictureTask {
    /// Return a picture still attached to a released task.
    pub fn recycle(&mut self) {
        self.picture = None;
    }
}

/// An output slot: one coded picture awaiting the application.
#[derive(Debug, Default)]
pub struct OutputPacket {
    pub picture_number: u64,
    pub pts: i64,
    pub slice_type: SliceType,
    pub qp: u8,
    /// Packet bytes (header and payload).
    pub data: Vec<u8>,
    /// Marks the final, empty packet of a session.
    pub end_of_stream: bool,
}
