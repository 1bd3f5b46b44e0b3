//! Pipeline error types.

use penc_core::Error as CoreError;
use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No pool registered under this edge.
    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    /// The pool exists but carries a different payload type.
    #[error("Pool {edge} does not carry {expected}")]
    PoolTypeMismatch {
        /// Edge name.
        edge: String,
        /// Requested payload type.
        expected: &'static str,
    },

    /// Stage not found.
    #[error("Stage not found: {0}")]
    StageNotFound(String),

    /// A stage worker failed and the session was shut down.
    #[error("Stage {stage} failed: {message}")]
    StageFailed {
        /// Failing stage.
        stage: String,
        /// Error reported by the worker.
        message: String,
    },

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker for stage {stage}: {source}")]
    Spawn {
        /// Stage whose worker failed to start.
        stage: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Pipeline aborted.
    #[error("Pipeline aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Check whether this error only signals an orderly shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PipelineError::Core(e) if e.is_shutdown())
    }
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;
