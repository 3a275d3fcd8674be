//! Video backend module
//!
//! A [`VideoBackend`] knows how to probe a source, hand out a lazy
//! [`FrameSource`] for decoding and create a [`VideoEncoder`] for output.
//! Decoders and encoders are synchronous and are driven from dedicated
//! blocking threads by the pipeline, so implementations may hold
//! thread-affine native handles.

pub mod codec;
pub mod frame;
pub mod raw;
pub mod sampler;

#[cfg(feature = "video-support")]
pub mod ffmpeg;

pub use codec::*;
pub use frame::*;
pub use raw::RawVideoBackend;
pub use sampler::FrameSampler;

#[cfg(feature = "video-support")]
pub use self::ffmpeg::FFmpegBackend;

use crate::error::Result;
use async_trait::async_trait;
use image::RgbaImage;
use std::path::Path;

/// Frame rate assumed when a source does not report a usable one
pub const FALLBACK_FPS: f64 = 30.0;

/// Video format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    /// MP4 format (H.264/H.265)
    Mp4,
    /// AVI format
    Avi,
    /// MOV format (QuickTime)
    Mov,
    /// MKV format (Matroska)
    Mkv,
    /// WebM format
    WebM,
    /// Windows Media
    Wmv,
    /// Flash video
    Flv,
}

impl VideoFormat {
    /// Get file extension for the video format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::WebM => "webm",
            Self::Wmv => "wmv",
            Self::Flv => "flv",
        }
    }

    /// Detect format from file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            "mov" => Some(Self::Mov),
            "mkv" => Some(Self::Mkv),
            "webm" => Some(Self::WebM),
            "wmv" => Some(Self::Wmv),
            "flv" => Some(Self::Flv),
            _ => None,
        }
    }

    /// Detect format from a file path
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether this container can be written
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Wmv | Self::Flv)
    }

    /// Whether `codec` can be muxed into this container
    #[must_use]
    pub fn accepts_codec(&self, codec: VideoCodec) -> bool {
        match self {
            Self::WebM => matches!(codec, VideoCodec::VP8 | VideoCodec::VP9 | VideoCodec::AV1),
            Self::Mp4 | Self::Mov => !matches!(codec, VideoCodec::VP8),
            Self::Avi => matches!(codec, VideoCodec::H264 | VideoCodec::VP8),
            Self::Mkv => true,
            Self::Wmv | Self::Flv => false,
        }
    }
}

/// Video metadata information
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    /// Video duration in seconds (0 when unknown)
    pub duration: f64,
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
    /// Reported frames per second (0 when unknown)
    pub fps: f64,
    /// Number of frames, when the container reports it
    pub frame_count: Option<u64>,
    /// Container format, when recognised
    pub format: Option<VideoFormat>,
    /// Video codec name
    pub codec: String,
    /// Whether the video has an audio track
    pub has_audio: bool,
}

impl VideoMetadata {
    /// Native frame rate, falling back to 30 fps when the source has none
    #[must_use]
    pub fn native_fps(&self) -> f64 {
        if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            FALLBACK_FPS
        }
    }

    /// Best guess at the number of decodable frames
    #[must_use]
    pub fn estimated_frames(&self) -> Option<u64> {
        self.frame_count.or_else(|| {
            (self.duration > 0.0).then(|| (self.duration * self.native_fps()).round() as u64)
        })
    }
}

/// Parameters for opening an output stream
#[derive(Debug, Clone)]
pub struct EncodeSpec {
    pub width: u32,
    pub height: u32,
    /// Output frame rate
    pub fps: f64,
    pub encoding: VideoEncodingConfig,
    /// Container to write; `None` lets the backend pick from the path
    pub format: Option<VideoFormat>,
}

/// Lazily decodes frames from a source, in presentation order
pub trait FrameSource {
    /// Decode the next frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<RgbaImage>>;
}

/// Writes frames into an output container
pub trait VideoEncoder {
    /// Append one frame; frames are written in call order
    fn write_frame(&mut self, image: &RgbaImage) -> Result<()>;

    /// Flush and finalize the container, returning the number of frames written
    fn finish(self: Box<Self>) -> Result<u64>;
}

/// Trait for video backend implementations
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Read video metadata without decoding frames
    async fn probe(&self, input_path: &Path) -> Result<VideoMetadata>;

    /// Open a decoder for `input_path`
    ///
    /// Called from a blocking thread; the returned source is used on that thread only.
    fn open_source(&self, input_path: &Path) -> Result<Box<dyn FrameSource>>;

    /// Create an encoder writing to `output_path`
    ///
    /// Called from a blocking thread; the returned encoder is used on that thread only.
    fn create_encoder(&self, output_path: &Path, spec: &EncodeSpec)
        -> Result<Box<dyn VideoEncoder>>;

    /// Containers this backend can read
    fn supported_formats(&self) -> &[VideoFormat];
}
