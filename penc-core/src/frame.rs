//! Source picture buffers handed to the encoder.
//!
//! Only 8-bit planar input is accepted; the analysis and motion stages work
//! on the luma plane.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel format of a source picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp (1 Cr & Cb sample per 2x2 Y samples).
    #[default]
    Yuv420p,
    /// Grayscale, 8bpp.
    Gray8,
}

impl PixelFormat {
    /// Get the number of planes for this pixel format.
    pub fn num_planes(&self) -> usize {
        match self {
            Self::Yuv420p => 3,
            Self::Gray8 => 1,
        }
    }

    /// Get chroma subsampling factors (horizontal, vertical).
    pub fn chroma_subsampling(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p => (2, 2),
            Self::Gray8 => (1, 1),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yuv420p => write!(f, "yuv420p"),
            Self::Gray8 => write!(f, "gray8"),
        }
    }
}

#[derive(Clone)]
struct PlaneData {
    data: Vec<u8>,
    stride: usize,
}

/// A source picture.
///
/// Plane strides are aligned to 32 bytes so that every row of a 32-wide
/// kernel window stays inside the plane.
#[derive(Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<PlaneData>,
    /// Presentation timestamp in caller units.
    pub pts: i64,
}

impl Frame {
    /// Create a zero-filled frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let (hsub, vsub) = format.chroma_subsampling();
        let planes = (0..format.num_planes())
            .map(|plane| {
                let (plane_width, plane_height) = if plane == 0 {
                    (width as usize, height as usize)
                } else {
                    (
                        (width as usize).div_ceil(hsub as usize),
                        (height as usize).div_ceil(vsub as usize),
                    )
                };
                let stride = (plane_width + 31) & !31;
                PlaneData {
                    data: vec![0u8; stride * plane_height],
                    stride,
                }
            })
            .collect();

        Self {
            width,
            height,
            format,
            planes,
            pts: 0,
        }
    }

    /// Get the frame width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get the frame height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get the pixel format.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Get the number of planes.
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Get a plane's data.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(|p| p.data.as_slice())
    }

    /// Get a mutable reference to a plane's data.
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.planes.get_mut(index).map(|p| p.data.as_mut_slice())
    }

    /// Get the stride (bytes per row) for a plane.
    pub fn stride(&self, plane: usize) -> usize {
        self.planes.get(plane).map(|p| p.stride).unwrap_or(0)
    }

    /// Fill all planes with a value.
    pub fn fill(&mut self, value: u8) {
        for plane in &mut self.planes {
            plane.data.fill(value);
        }
    }

    /// Check whether `other` has the same dimensions and pixel format.
    pub fn same_geometry(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }

    /// Copy the samples and timestamp of `src` into this frame without
    /// reallocating.
    pub fn copy_from(&mut self, src: &Frame) -> Result<()> {
        if !self.same_geometry(src) {
            return Err(Error::InvalidParameter(format!(
                "cannot copy a {}x{} {} frame into a {}x{} {} frame",
                src.width, src.height, src.format, self.width, self.height, self.format
            )));
        }
        for (dst, src) in self.planes.iter_mut().zip(&src.planes) {
            dst.data.copy_from_slice(&src.data);
        }
        self.pts = src.pts;
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("pts", &self.pts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_planes() {
        let frame = Frame::new(64, 48, PixelFormat::Yuv420p);
        assert_eq!(frame.num_planes(), 3);
        assert!(frame.plane(2).is_some());
        assert!(frame.plane(3).is_none());

        let gray = Frame::new(64, 48, PixelFormat::Gray8);
        assert_eq!(gray.num_planes(), 1);
    }

    #[test]
    fn test_stride_alignment() {
        let frame = Frame::new(100, 100, PixelFormat::Yuv420p);
        assert_eq!(frame.stride(0), 128);
        assert_eq!(frame.stride(1) % 32, 0);
        assert_eq!(frame.plane(0).unwrap().len(), 128 * 100);
    }

    #[test]
    fn test_copy_from() {
        let mut src = Frame::new(48, 32, PixelFormat::Yuv420p);
        src.fill(9);
        src.pts = 1234;

        let mut dst = Frame::new(48, 32, PixelFormat::Yuv420p);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.pts, 1234);
        assert!(dst.plane(1).unwrap().iter().all(|&p| p == 9));

        let other = Frame::new(64, 32, PixelFormat::Yuv420p);
        assert!(dst.copy_from(&other).is_err());
        assert!(!dst.same_geometry(&Frame::new(48, 32, PixelFormat::Gray8)));
    }

    #[test]
    fn test_fill() {
        let mut frame = Frame::new(32, 16, PixelFormat::Gray8);
        frame.fill(7);
        assert!(frame.plane(0).unwrap().iter().all(|&p| p == 7));
    }
}
