//! Encoder configuration.
//!
//! Every field has a default, and the structs derive `serde` traits with
//! `#[serde(default)]`, so a configuration can be loaded from any format
//! that names only the values it changes.

use crate::error::{EncodeError, Result};
use penc_core::PixelFormat;
use serde::{Deserialize, Serialize};

/// Highest quantizer accepted by [`EncoderConfig::base_qp`].
pub const MAX_QP: u8 = 51;

/// Which distortion kernels the stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelSelection {
    /// Detect the best instruction set at open.
    #[default]
    Auto,
    /// Always run the portable kernels.
    Scalar,
}

/// Worker thread counts for the parallel stages (0 = one per CPU core).
///
/// The remaining stages always run a single worker because they depend on
/// seeing pictures in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub picture_analysis: usize,
    pub motion_estimation: usize,
    pub source_based_operations: usize,
    pub mode_decision_configuration: usize,
    pub enc_dec: usize,
    pub entropy_coding: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::uniform(0)
    }
}

impl WorkerConfig {
    /// Use `workers` threads for every parallel stage.
    pub fn uniform(workers: usize) -> Self {
        Self {
            picture_analysis: workers,
            motion_estimation: workers,
            source_based_operations: workers,
            mode_decision_configuration: workers,
            enc_dec: workers,
            entropy_coding: workers,
        }
    }

    /// Resolve a configured count to an actual thread count.
    pub fn effective(workers: usize) -> usize {
        if workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            workers
        }
    }
}

/// Object counts of every pool in the pipeline.
///
/// Each count bounds how many items may be in flight on that edge; a
/// producer blocks once all of them are taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Input frame buffers owned by the application side.
    pub input: usize,
    /// Pictures in flight inside the pipeline.
    pub picture_control_set: usize,
    pub resource_coordination_results: usize,
    pub picture_analysis_results: usize,
    pub picture_decision_results: usize,
    pub motion_estimation_results: usize,
    pub initial_rate_control_results: usize,
    pub picture_demux_results: usize,
    pub rate_control_tasks: usize,
    pub rate_control_results: usize,
    pub enc_dec_tasks: usize,
    pub enc_dec_results: usize,
    pub entropy_coding_results: usize,
    /// Output packet buffers awaiting the application.
    pub output: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            input: 4,
            picture_control_set: 16,
            resource_coordination_results: 8,
            picture_analysis_results: 8,
            picture_decision_results: 8,
            motion_estimation_results: 8,
            initial_rate_control_results: 8,
            picture_demux_results: 8,
            rate_control_tasks: 8,
            rate_control_results: 8,
            enc_dec_tasks: 8,
            enc_dec_results: 8,
            entropy_coding_results: 8,
            output: 8,
        }
    }
}

impl PoolConfig {
    fn entries(&self) -> [(&'static str, usize); 14] {
        [
            ("input", self.input),
            ("picture_control_set", self.picture_control_set),
            ("resource_coordination_results", self.resource_coordination_results),
            ("picture_analysis_results", self.picture_analysis_results),
            ("picture_decision_results", self.picture_decision_results),
            ("motion_estimation_results", self.motion_estimation_results),
            ("initial_rate_control_results", self.initial_rate_control_results),
            ("picture_demux_results", self.picture_demux_results),
            ("rate_control_tasks", self.rate_control_tasks),
            ("rate_control_results", self.rate_control_results),
            ("enc_dec_tasks", self.enc_dec_tasks),
            ("enc_dec_results", self.enc_dec_results),
            ("entropy_coding_results", self.entropy_coding_results),
            ("output", self.output),
        ]
    }
}

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Picture width in pixels.
    pub width: u32,
    /// Picture height in pixels.
    pub height: u32,
    /// Input pixel format.
    pub pixel_format: PixelFormat,
    /// Distance between intra pictures (0 = only the first picture).
    pub intra_period: u32,
    /// Quantizer of inter pictures before adaptive offsets.
    pub base_qp: u8,
    /// 8x8 block variance below which a block counts as flat.
    pub flat_variance_threshold: u64,
    /// Distortion kernel selection.
    pub kernels: KernelSelection,
    /// Worker counts of the parallel stages.
    pub workers: WorkerConfig,
    /// Pool object counts.
    pub pools: PoolConfig,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::Yuv420p,
            intra_period: 32,
            base_qp: 32,
            flat_variance_threshold: 16,
            kernels: KernelSelection::Auto,
            workers: WorkerConfig::default(),
            pools: PoolConfig::default(),
        }
    }
}

impl EncoderConfig {
    /// Create a configuration for `width` x `height` input.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Set the input pixel format.
    #[must_use]
    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set the intra period.
    #[must_use]
    pub fn intra_period(mut self, period: u32) -> Self {
        self.intra_period = period;
        self
    }

    /// Set the base quantizer.
    #[must_use]
    pub fn base_qp(mut self, qp: u8) -> Self {
        self.base_qp = qp;
        self
    }

    /// Set the flat block threshold.
    #[must_use]
    pub fn flat_variance_threshold(mut self, threshold: u64) -> Self {
        self.flat_variance_threshold = threshold;
        self
    }

    /// Set the kernel selection.
    #[must_use]
    pub fn kernels(mut self, kernels: KernelSelection) -> Self {
        self.kernels = kernels;
        self
    }

    /// Use `workers` threads for every parallel stage.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = WorkerConfig::uniform(workers);
        self
    }

    /// Set the worker configuration.
    #[must_use]
    pub fn worker_config(mut self, workers: WorkerConfig) -> Self {
        self.workers = workers;
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, pools: PoolConfig) -> Self {
        self.pools = pools;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncodeError::Config(format!(
                "picture size {}x{} is empty",
                self.width, self.height
            )));
        }
        let (hsub, vsub) = self.pixel_format.chroma_subsampling();
        if self.width % hsub != 0 || self.height % vsub != 0 {
            return Err(EncodeError::Config(format!(
                "picture size {}x{} is not a multiple of the {} subsampling",
                self.width, self.height, self.pixel_format
            )));
        }
        if self.base_qp > MAX_QP {
            return Err(EncodeError::Config(format!(
                "base_qp {} exceeds {MAX_QP}",
                self.base_qp
            )));
        }
        if let Some((name, _)) = self.pools.entries().into_iter().find(|(_, count)| *count == 0) {
            return Err(EncodeError::Config(format!("pool {name} needs at least one object")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        EncoderConfig::default().validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = EncoderConfig::new(64, 32)
            .intra_period(8)
            .base_qp(20)
            .workers(3)
            .kernels(KernelSelection::Scalar);
        assert_eq!(config.width, 64);
        assert_eq!(config.intra_period, 8);
        assert_eq!(config.workers.enc_dec, 3);
        assert_eq!(config.kernels, KernelSelection::Scalar);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_errors() {
        assert!(EncoderConfig::new(0, 32).validate().is_err());
        assert!(EncoderConfig::new(33, 32).validate().is_err());
        assert!(EncoderConfig::new(33, 33).pixel_format(PixelFormat::Gray8).validate().is_ok());
        assert!(EncoderConfig::new(64, 64).base_qp(52).validate().is_err());

        let pools = PoolConfig {
            enc_dec_tasks: 0,
            ..Default::default()
        };
        let err = EncoderConfig::new(64, 64).pool_config(pools).validate().unwrap_err();
        assert!(err.to_string().contains("enc_dec_tasks"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EncoderConfig = serde_json::from_str(
            r#"{"width": 64, "height": 48, "pixel_format": "gray8", "workers": {"enc_dec": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.width, 64);
        assert_eq!(config.pixel_format, PixelFormat::Gray8);
        assert_eq!(config.workers.enc_dec, 2);
        assert_eq!(config.workers.picture_analysis, 0);
        assert_eq!(config.pools, PoolConfig::default());
        assert_eq!(config.base_qp, EncoderConfig::default().base_qp);
    }

    #[test]
    fn test_effective_workers() {
        assert_eq!(WorkerConfig::effective(3), 3);
        assert!(WorkerConfig::effective(0) >= 1);
    }
}
