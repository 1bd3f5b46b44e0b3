//! # Penc
//!
//! A parallel, multi-stage video encoder pipeline.
//!
//! Each picture travels through twelve stages, connected by fixed-count
//! resource pools:
//!
//! ```text
//! input -> resource coordination -> picture analysis -> picture decision
//!       -> motion estimation -> initial rate control -> source based operations
//!       -> picture manager -> rate control -> mode decision configuration
//!       -> enc/dec -> entropy coding -> packetization -> output
//! ```
//!
//! The analysis, motion estimation, source based, mode decision, enc/dec and
//! entropy coding stages run several workers each; the others run one and
//! see pictures in order. Pools never grow, so a slow consumer stalls its
//! producers instead of buffering without bound.
//!
//! ## Quick Start
//!
//! ```rust
//! use penc::{Encoder, EncoderConfig, Frame, PixelFormat};
//!
//! fn main() -> penc::Result<()> {
//!     let config = EncoderConfig::new(64, 32).pixel_format(PixelFormat::Gray8).workers(2);
//!     let encoder = Encoder::open(config)?;
//!
//!     let packets = std::thread::scope(|scope| -> penc::Result<Vec<penc::EncodedPacket>> {
//!         let receiver = scope.spawn(|| {
//!             let mut packets = Vec::new();
//!             while let Some(packet) = encoder.receive_packet()? {
//!                 packets.push(packet);
//!             }
//!             Ok::<_, penc::EncodeError>(packets)
//!         });
//!
//!         let mut frame = Frame::new(64, 32, PixelFormat::Gray8);
//!         for pts in 0..10 {
//!             frame.fill(pts as u8 * 10);
//!             frame.pts = pts;
//!             encoder.submit_frame(&frame)?;
//!         }
//!         encoder.send_eos()?;
//!         receiver.join().expect("receiver panicked")
//!     })?;
//!
//!     assert_eq!(packets.len(), 11);
//!     encoder.drain_and_close()
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several crates:
//! - `penc-core`: errors, bounded queues, resource pools and source frames
//! - `penc-kernels`: SIMD distortion kernels with scalar fallbacks
//! - `penc-pipeline`: stage workers and the pipeline graph lifecycle
//!
//! This crate wires them into the encoder topology and re-exports the types
//! an application needs.

pub mod bitstream;
mod config;
mod encoder;
mod error;
mod picture;
pub mod prelude;
mod stages;

pub use config::{EncoderConfig, KernelSelection, PoolConfig, WorkerConfig, MAX_QP};
pub use encoder::{EncodedPacket, Encoder, EncoderStats};
pub use error::{EncodeError, Result};
pub use picture::{AnalysisStats, MotionStats, SliceType};
pub use stages::{edge, stage};

pub use penc_core::{Frame, PixelFormat, PoolStats};
pub use penc_kernels::{BlockWidth, DistortionKernels, SimdCapabilities};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string.
pub fn version() -> &'static str {
    VERSION
}

/// Get build information.
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION,
        target: std::env::consts::ARCH,
        os: std::env::consts::OS,
        debug: cfg!(debug_assertions),
        simd: penc_kernels::detect_simd().best_level(),
    }
}

/// Build information.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Library version.
    pub version: &'static str,
    /// Target architecture.
    pub target: &'static str,
    /// Operating system.
    pub os: &'static str,
    /// Debug build.
    pub debug: bool,
    /// Best instruction set the kernels detected at runtime.
    pub simd: &'static str,
}
