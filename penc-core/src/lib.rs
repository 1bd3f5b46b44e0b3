//! # Penc Core
//!
//! Core types shared by every stage of the penc encoder pipeline.
//!
//! This crate provides:
//! - Error handling types
//! - [`BoundedQueue`], the blocking FIFO behind every pipeline edge
//! - [`ResourcePool`] and [`Resource`], fixed-count object pools that are the
//!   pipeline's only source of backpressure
//! - [`Frame`], the source picture handed to the encoder

pub mod error;
pub mod frame;
pub mod pool;
pub mod queue;

pub use error::{Error, Result};
pub use frame::{Frame, PixelFormat};
pub use pool::{PoolStats, Resource, ResourcePool};
pub use queue::BoundedQueue;
