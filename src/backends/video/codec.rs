//! Video codec handling and validation
//!
//! This module provides utilities for working with output codecs,
//! quality settings, and encoding parameters.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Video codec enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 codec (most compatible)
    H264,
    /// H.265/HEVC codec (better compression)
    H265,
    /// VP8 codec (WebM, alpha capable)
    VP8,
    /// VP9 codec (WebM, alpha capable)
    VP9,
    /// AV1 codec (latest standard)
    AV1,
}

impl VideoCodec {
    /// Get FFmpeg encoder name
    #[must_use]
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::VP8 => "libvpx",
            Self::VP9 => "libvpx-vp9",
            Self::AV1 => "libaom-av1",
        }
    }

    /// Get codec description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC - Most compatible, good quality",
            Self::H265 => "H.265/HEVC - Better compression than H.264",
            Self::VP8 => "VP8 - WebM, keeps transparency",
            Self::VP9 => "VP9 - WebM, keeps transparency, better than VP8",
            Self::AV1 => "AV1 - Latest standard, best compression",
        }
    }

    /// Whether the encoder can carry an alpha plane
    #[must_use]
    pub fn supports_alpha(&self) -> bool {
        matches!(self, Self::VP8 | Self::VP9)
    }

    /// Get valid CRF range
    #[must_use]
    pub fn quality_range(&self) -> (u8, u8) {
        match self {
            Self::H264 => (0, 51),
            Self::H265 => (0, 51),
            Self::VP8 => (4, 63),
            Self::VP9 => (0, 63),
            Self::AV1 => (0, 63),
        }
    }

    /// Get default CRF
    #[must_use]
    pub fn default_quality(&self) -> u8 {
        match self {
            Self::H264 => 23,
            Self::H265 => 28,
            Self::VP8 => 10,
            Self::VP9 => 31,
            Self::AV1 => 30,
        }
    }

    /// Get all supported codecs
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::H264, Self::H265, Self::VP8, Self::VP9, Self::AV1]
    }
}

impl FromStr for VideoCodec {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "h264" | "libx264" | "avc" => Ok(Self::H264),
            "h265" | "libx265" | "hevc" => Ok(Self::H265),
            "vp8" | "libvpx" => Ok(Self::VP8),
            "vp9" | "libvpx-vp9" => Ok(Self::VP9),
            "av1" | "libaom-av1" => Ok(Self::AV1),
            _ => Err(PipelineError::invalid_config(format!(
                "Unsupported video codec: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ffmpeg_name())
    }
}

/// Video quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    /// Fastest encoding, largest file size
    Fast,
    /// Balanced encoding speed and quality
    #[default]
    Medium,
    /// Slow encoding, best quality/size ratio
    Slow,
}

impl QualityPreset {
    /// Get FFmpeg preset name
    #[must_use]
    pub fn ffmpeg_preset(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
        }
    }
}

/// Pixel format for video encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUV 4:2:0 (most common)
    Yuv420p,
    /// YUV 4:4:4
    Yuv444p,
    /// YUV 4:2:0 with alpha plane
    Yuva420p,
}

impl PixelFormat {
    /// Get FFmpeg pixel format name
    #[must_use]
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv444p => "yuv444p",
            Self::Yuva420p => "yuva420p",
        }
    }

    /// Check if format supports transparency
    #[must_use]
    pub fn supports_transparency(&self) -> bool {
        matches!(self, Self::Yuva420p)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ffmpeg_name())
    }
}

/// Video encoding configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncodingConfig {
    /// Video codec to use
    pub codec: VideoCodec,
    /// Quality preset
    pub preset: QualityPreset,
    /// Constant rate factor (codec-specific range)
    pub quality: u8,
    /// Bitrate in kbps (optional, for bitrate-based encoding)
    pub bitrate: Option<u32>,
    /// Number of encoding threads
    pub threads: Option<u8>,
    /// Pixel format
    pub pixel_format: PixelFormat,
}

impl VideoEncodingConfig {
    /// Create new encoding config with defaults
    #[must_use]
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            preset: QualityPreset::Medium,
            quality: codec.default_quality(),
            bitrate: None,
            threads: None,
            pixel_format: PixelFormat::Yuv420p,
        }
    }

    /// Set quality value
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Set quality preset
    #[must_use]
    pub fn with_preset(mut self, preset: QualityPreset) -> Self {
        self.preset = preset;
        self
    }

    /// Set bitrate for bitrate-based encoding
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    /// Set number of encoding threads
    #[must_use]
    pub fn with_threads(mut self, threads: u8) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set pixel format
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Encoder options passed to FFmpeg when opening the codec
    #[must_use]
    pub fn encoder_options(&self) -> Vec<(&'static str, String)> {
        let mut options = vec![("crf", self.quality.to_string())];
        match self.codec {
            VideoCodec::H264 | VideoCodec::H265 => {
                options.push(("preset", self.preset.ffmpeg_preset().to_string()));
            },
            VideoCodec::VP8 | VideoCodec::VP9 => {
                let deadline = match self.preset {
                    QualityPreset::Fast => "realtime",
                    QualityPreset::Medium | QualityPreset::Slow => "good",
                };
                options.push(("deadline", deadline.to_string()));
                if self.bitrate.is_none() {
                    // libvpx needs b:v 0 for constant quality mode
                    options.push(("b", "0".to_string()));
                }
            },
            VideoCodec::AV1 => {
                let cpu_used = match self.preset {
                    QualityPreset::Fast => "8",
                    QualityPreset::Medium => "6",
                    QualityPreset::Slow => "4",
                };
                options.push(("cpu-used", cpu_used.to_string()));
            },
        }
        if let Some(threads) = self.threads {
            options.push(("threads", threads.to_string()));
        }
        options
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let (min_quality, max_quality) = self.codec.quality_range();
        if self.quality < min_quality || self.quality > max_quality {
            return Err(PipelineError::config_value_error(
                "quality",
                self.quality,
                &format!("{}-{} for {}", min_quality, max_quality, self.codec),
                Some(self.codec.default_quality()),
            ));
        }

        if self.bitrate == Some(0) {
            return Err(PipelineError::invalid_config("Bitrate cannot be zero"));
        }

        if self.threads == Some(0) {
            return Err(PipelineError::invalid_config("Thread count cannot be zero"));
        }

        if self.pixel_format.supports_transparency() && !self.codec.supports_alpha() {
            return Err(PipelineError::invalid_config(format!(
                "Codec {} cannot encode pixel format {}; use vp8 or vp9 for transparent output",
                self.codec, self.pixel_format
            )));
        }

        Ok(())
    }
}

impl Default for VideoEncodingConfig {
    fn default() -> Self {
        Self::new(VideoCodec::H264)
    }
}
