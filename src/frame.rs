//! Captured video frames.

use std::time::Duration;

use image::RgbaImage;

use crate::resolution::Resolution;

/// Pixel layout of delivered frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum PixelFormat {
    /// 8-bit RGBA, full range.
    #[default]
    Rgba8,
}

/// One captured image buffer and its presentation timestamp.
///
/// A [`Frame`] is owned by the capture thread until it is handed to the frame consumer, which
/// owns it for the duration of one detection call. Frames are never buffered for later.
pub struct Frame {
    image: RgbaImage,
    timestamp: Duration,
    sequence: u64,
}

impl Frame {
    /// Creates a frame from a decoded image.
    ///
    /// `timestamp` is measured from the start of the capture session, `sequence` counts every
    /// frame read from the camera, including dropped ones.
    pub fn new(image: RgbaImage, timestamp: Duration, sequence: u64) -> Self {
        Self {
            image,
            timestamp,
            sequence,
        }
    }

    #[inline]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    #[inline]
    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    /// Presentation timestamp, relative to the start of the capture session.
    #[inline]
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Index of this frame in the camera's output stream.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("resolution", &self.resolution())
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .finish()
    }
}
