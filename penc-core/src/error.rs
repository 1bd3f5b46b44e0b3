//! Error types shared by every penc crate.
//!
//! Resource exhaustion is not an error in this system: pools block until an
//! object is returned. The only non-fatal outcome a blocking call can report
//! is [`Error::Shutdown`], which tells a worker to leave its loop.

use thiserror::Error;

/// Main error type for the core primitives.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool or queue was shut down while (or before) the caller waited.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Invalid parameter provided: a zero-sized pool, an unknown consumer
    /// queue or mismatched frame geometry.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Returns true if this is the shutdown indication rather than a failure.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Shutdown)
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
