use std::time::{Duration, Instant};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::overlay::OverlayRegion;

/// A captured image that can be drawn on in place.
///
/// Frames are moved from stage to stage; exactly one stage owns a frame at a
/// time, so the buffer is never aliased across threads.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGBA pixel data
    pub image: RgbaImage,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub source_format: Option<PixelFormat>,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
    pub overlays: Vec<OverlayRegion>,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba32,
    Rgb24,
    Yuyv4,
    Mjpeg,
}

impl Frame {
    pub fn new(image: RgbaImage, sequence: u64, timestamp: Instant) -> Self {
        Self {
            image,
            meta: FrameMetadata {
                sequence,
                ..FrameMetadata::default()
            },
            timestamp,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Reject frames an inference pass could not be built for.
    pub fn validate(&self) -> Result<(), InferenceError> {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return Err(InferenceError::MalformedFrame(format!(
                "empty frame {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if self.image.as_raw().len() != expected {
            return Err(InferenceError::MalformedFrame(format!(
                "buffer holds {} bytes, expected {expected}",
                self.image.as_raw().len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_is_malformed() {
        let frame = Frame::new(RgbaImage::new(0, 0), 0, Instant::now());
        assert!(matches!(
            frame.validate(),
            Err(InferenceError::MalformedFrame(_))
        ));
    }

    #[test]
    fn sized_frame_validates() {
        let frame = Frame::new(RgbaImage::new(4, 2), 7, Instant::now());
        assert!(frame.validate().is_ok());
        assert_eq!(frame.meta.sequence, 7);
        assert!(frame.meta.overlays.is_empty());
    }
}
