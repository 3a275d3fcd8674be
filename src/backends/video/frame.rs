//! Frame data structures moved between pipeline stages
//!
//! A [`Frame`] is produced by extraction and owned by exactly one stage at a
//! time. Processing turns it into a [`ProcessedFrame`] that keeps the same
//! index so reassembly can restore extraction order.

use image::RgbaImage;
use std::time::Duration;

/// Largest edge accepted for a single frame
pub const MAX_FRAME_EDGE: u32 = 8192;

/// A still extracted from the source video
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in extraction order, starting at zero
    pub index: u64,
    /// Frame pixels
    pub image: RgbaImage,
    /// Presentation time at the job's effective frame rate
    pub timestamp: Duration,
}

impl Frame {
    /// Create a frame whose timestamp is `index / fps`
    #[must_use]
    pub fn new(index: u64, image: RgbaImage, fps: f64) -> Self {
        Self {
            index,
            image,
            timestamp: timestamp_for(index, fps),
        }
    }

    /// Get frame dimensions
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Get frame timestamp in seconds
    #[must_use]
    pub fn timestamp_seconds(&self) -> f64 {
        self.timestamp.as_secs_f64()
    }

    /// Check frame data integrity
    pub fn validate(&self) -> Result<(), String> {
        let (width, height) = self.dimensions();
        if width == 0 || height == 0 {
            return Err(format!("Invalid frame dimensions: {}x{}", width, height));
        }

        if width > MAX_FRAME_EDGE || height > MAX_FRAME_EDGE {
            return Err(format!(
                "Frame dimensions too large: {}x{} (max {}x{})",
                width, height, MAX_FRAME_EDGE, MAX_FRAME_EDGE
            ));
        }

        let expected_size = width as usize * height as usize * 4;
        let actual_size = self.image.as_raw().len();
        if actual_size != expected_size {
            return Err(format!(
                "Frame data size mismatch: expected {} bytes, got {} bytes",
                expected_size, actual_size
            ));
        }

        Ok(())
    }
}

/// Outcome of processing a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    Succeeded,
    /// The adapter failed and a placeholder was substituted
    Failed { reason: String },
}

impl FrameStatus {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// A frame after background removal, ready for reassembly
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub index: u64,
    pub timestamp: Duration,
    pub image: RgbaImage,
    pub status: FrameStatus,
}

impl ProcessedFrame {
    #[must_use]
    pub fn succeeded(frame: &Frame, image: RgbaImage) -> Self {
        Self {
            index: frame.index,
            timestamp: frame.timestamp,
            image,
            status: FrameStatus::Succeeded,
        }
    }

    #[must_use]
    pub fn failed(frame: &Frame, placeholder: RgbaImage, reason: String) -> Self {
        Self {
            index: frame.index,
            timestamp: frame.timestamp,
            image: placeholder,
            status: FrameStatus::Failed { reason },
        }
    }
}

/// Timestamp of the frame at `index` for a stream running at `fps`
#[must_use]
pub fn timestamp_for(index: u64, fps: f64) -> Duration {
    if fps > 0.0 && fps.is_finite() {
        Duration::from_secs_f64(index as f64 / fps)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_frame_timestamp_follows_fps() {
        let frame = Frame::new(15, RgbaImage::new(4, 4), 10.0);
        assert_eq!(frame.timestamp, Duration::from_millis(1500));
        assert!((frame.timestamp_seconds() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timestamp_with_invalid_fps() {
        assert_eq!(timestamp_for(10, 0.0), Duration::ZERO);
        assert_eq!(timestamp_for(10, f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_frame_validation() {
        let frame = Frame::new(0, RgbaImage::new(320, 240), 30.0);
        assert!(frame.validate().is_ok());

        let frame = Frame::new(0, RgbaImage::new(0, 240), 30.0);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_processed_frame_keeps_index() {
        let frame = Frame::new(7, RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])), 25.0);
        let ok = ProcessedFrame::succeeded(&frame, frame.image.clone());
        assert_eq!(ok.index, 7);
        assert_eq!(ok.timestamp, frame.timestamp);
        assert!(!ok.status.is_failed());

        let failed = ProcessedFrame::failed(&frame, RgbaImage::new(2, 2), "boom".to_string());
        assert_eq!(failed.index, 7);
        assert!(failed.status.is_failed());
    }
}
