//! Captured buffers and decoded frames.
//!
//! - `RawBuffer`: one sample exactly as the capture device produced it.
//! - `Frame`: the decoded RGB24 image handed to the display surface and the detector.
//!
//! A `Frame` is immutable once built. Pixels sit behind an `Arc`, so the display
//! surface and the detector share one decoded copy and neither can observe a
//! partially written image.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::convert::{apply_orientation, normalize_to_rgb, Orientation, PixelFormat};

/// Undecoded capture sample.
#[derive(Clone)]
pub struct RawBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture order, assigned by the device.
    pub sequence: u64,
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("len", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Decoded, displayable RGB24 image.
///
/// Cloning is cheap and shares the pixel data.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from packed RGB24 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has empty dimensions {}x{}", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Decode a capture sample into an oriented RGB24 frame.
    pub fn decode(raw: RawBuffer, orientation: Orientation) -> Result<Self> {
        let rgb = normalize_to_rgb(&raw.data, raw.width, raw.height, raw.format)?;
        let (rgb, width, height) = apply_orientation(rgb, raw.width, raw.height, orientation);
        Self::from_rgb(rgb, width, height, raw.sequence)
    }

    /// Read-only RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    /// SHA-256 of the pixel data.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.pixels).into()
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// True when both frames share the same pixel allocation.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(data: Vec<u8>, width: u32, height: u32) -> RawBuffer {
        RawBuffer {
            data,
            width,
            height,
            format: PixelFormat::Rgb24,
            sequence: 4,
        }
    }

    #[test]
    fn from_rgb_validates_length_and_dimensions() {
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2, 0).is_ok());
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 0).is_err());
        assert!(Frame::from_rgb(Vec::new(), 0, 2, 0).is_err());
    }

    #[test]
    fn decode_applies_portrait_orientation() -> Result<()> {
        let frame = Frame::decode(raw(vec![9u8; 4 * 2 * 3], 4, 2), Orientation::Portrait)?;
        assert_eq!((frame.width, frame.height), (2, 4));
        assert_eq!(frame.sequence, 4);
        assert_eq!(frame.pixel_format(), PixelFormat::Rgb24);
        Ok(())
    }

    #[test]
    fn decode_rejects_truncated_buffers() {
        assert!(Frame::decode(raw(vec![0u8; 5], 2, 1), Orientation::Native).is_err());
    }

    #[test]
    fn clones_share_pixels() -> Result<()> {
        let frame = Frame::from_rgb(vec![1u8; 3], 1, 1, 0)?;
        let copy = frame.clone();
        assert!(frame.shares_pixels_with(&copy));
        assert_eq!(frame.fingerprint(), copy.fingerprint());
        Ok(())
    }

    #[test]
    fn fingerprint_tracks_content() -> Result<()> {
        let a = Frame::from_rgb(vec![1u8; 3], 1, 1, 0)?;
        let b = Frame::from_rgb(vec![2u8; 3], 1, 1, 0)?;
        assert_ne!(a.fingerprint(), b.fingerprint());
        Ok(())
    }
}
