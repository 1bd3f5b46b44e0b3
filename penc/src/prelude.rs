//! Prelude module for convenient imports.
//!
//! ```rust
//! use penc::prelude::*;
//! ```

// Error types
pub use crate::{EncodeError, Result};

// Source pictures
pub use crate::{Frame, PixelFormat};

// Configuration
pub use crate::{EncoderConfig, KernelSelection, PoolConfig, WorkerConfig};

// Session
pub use crate::{EncodedPacket, Encoder, EncoderStats, SliceType};
