//! Encoder error types.

use penc_pipeline::PipelineError;
use thiserror::Error;

/// Error returned by the [`crate::Encoder`] API.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Pipeline error, including the failure of a stage.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] penc_core::Error),

    /// Invalid encoder configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A submitted frame does not match the configured geometry.
    #[error("Frame is {actual}, encoder was opened for {expected}")]
    FrameGeometry {
        /// Configured geometry.
        expected: String,
        /// Geometry of the rejected frame.
        actual: String,
    },

    /// Input was submitted after end of stream.
    #[error("End of stream already sent")]
    EndOfStreamSent,

    /// A packet could not be parsed.
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

impl EncodeError {
    /// Check whether this error only reports that the session was shut down.
    pub fn is_shutdown(&self) -> bool {
        match self {
            EncodeError::Pipeline(e) => e.is_shutdown(),
            EncodeError::Core(e) => e.is_shutdown(),
            _ => false,
        }
    }
}

/// Result type for encoder operations.
pub type Result<T> = std::result::Result<T, EncodeError>;
