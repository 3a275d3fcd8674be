//! FFmpeg integration for video processing
//!
//! This module provides the FFmpeg backend: metadata probing, lazy frame
//! decoding into RGBA, and encoding of RGBA frames into a real container,
//! all through the ffmpeg-next crate.

use super::{
    EncodeSpec, FrameSource, PixelFormat, VideoBackend, VideoEncoder, VideoFormat, VideoMetadata,
};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{Context as Scaler, Flags as ScalerFlags};
use ffmpeg::util::frame::video::Video as VideoFrameBuffer;
use ffmpeg::{codec, encoder, format, media, Packet, Rational};

const AV_TIME_BASE: f64 = 1_000_000.0;

static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialize FFmpeg once per process
fn ensure_initialized() -> Result<()> {
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| PipelineError::internal(format!("Failed to initialize FFmpeg: {}", e)))
}

/// FFmpeg video backend implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct FFmpegBackend;

impl FFmpegBackend {
    /// Create a new FFmpeg backend
    pub fn new() -> Result<Self> {
        ensure_initialized()?;
        Ok(Self)
    }

    fn probe_blocking(input_path: &Path) -> Result<VideoMetadata> {
        ensure_initialized()?;
        let input = format::input(&input_path)
            .map_err(|e| PipelineError::source_error(input_path, &e.to_string()))?;

        let video_stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| PipelineError::source_error(input_path, "no video stream found"))?;

        let decoder = codec::context::Context::from_parameters(video_stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| {
                PipelineError::source_error(input_path, &format!("no usable decoder: {}", e))
            })?;

        let mut fps = rational_to_f64(video_stream.avg_frame_rate());
        if !(fps.is_finite() && fps > 0.0) {
            fps = rational_to_f64(video_stream.rate());
        }

        let duration = if video_stream.duration() > 0 {
            video_stream.duration() as f64 * rational_to_f64(video_stream.time_base())
        } else if input.duration() > 0 {
            input.duration() as f64 / AV_TIME_BASE
        } else {
            0.0
        };

        let frame_count = u64::try_from(video_stream.frames()).ok().filter(|n| *n > 0);

        Ok(VideoMetadata {
            duration,
            width: decoder.width(),
            height: decoder.height(),
            fps: if fps.is_finite() { fps } else { 0.0 },
            frame_count,
            format: VideoFormat::from_path(input_path),
            codec: decoder.id().name().to_string(),
            has_audio: input.streams().best(media::Type::Audio).is_some(),
        })
    }
}

fn rational_to_f64(value: Rational) -> f64 {
    if value.denominator() == 0 {
        0.0
    } else {
        f64::from(value.numerator()) / f64::from(value.denominator())
    }
}

fn gcd(mut a: i32, mut b: i32) -> i32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs().max(1)
}

/// Frame rate as a reduced rational with millihertz precision
fn fps_to_rational(fps: f64) -> Rational {
    let num = (fps * 1000.0).round().max(1.0) as i32;
    let den = 1000;
    let divisor = gcd(num, den);
    Rational::new(num / divisor, den / divisor)
}

fn to_ffmpeg_pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Yuv444p => Pixel::YUV444P,
        PixelFormat::Yuva420p => Pixel::YUVA420P,
    }
}

fn muxer_name(format: VideoFormat) -> &'static str {
    match format {
        VideoFormat::Mp4 => "mp4",
        VideoFormat::Avi => "avi",
        VideoFormat::Mov => "mov",
        VideoFormat::Mkv => "matroska",
        VideoFormat::WebM => "webm",
        VideoFormat::Wmv => "asf",
        VideoFormat::Flv => "flv",
    }
}

#[async_trait]
impl VideoBackend for FFmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe(&self, input_path: &Path) -> Result<VideoMetadata> {
        let path: PathBuf = input_path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::probe_blocking(&path))
            .await
            .map_err(|e| PipelineError::internal(format!("probe task failed: {}", e)))?
    }

    fn open_source(&self, input_path: &Path) -> Result<Box<dyn FrameSource>> {
        ensure_initialized()?;
        let input = format::input(&input_path)
            .map_err(|e| PipelineError::source_error(input_path, &e.to_string()))?;

        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| PipelineError::source_error(input_path, "no video stream found"))?;
        let stream_index = stream.index();

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| {
                PipelineError::source_error(input_path, &format!("no usable decoder: {}", e))
            })?;

        log::debug!(
            "Opened {} ({}x{}, stream {})",
            input_path.display(),
            decoder.width(),
            decoder.height(),
            stream_index
        );

        Ok(Box::new(FfmpegFrameSource {
            input,
            stream_index,
            decoder,
            scaler: None,
            eof_sent: false,
            packets: 0,
            frames: 0,
        }))
    }

    fn create_encoder(
        &self,
        output_path: &Path,
        spec: &EncodeSpec,
    ) -> Result<Box<dyn VideoEncoder>> {
        ensure_initialized()?;
        FfmpegEncoder::open(output_path, spec).map(|encoder| Box::new(encoder) as Box<dyn VideoEncoder>)
    }

    fn supported_formats(&self) -> &[VideoFormat] {
        &[
            VideoFormat::Mp4,
            VideoFormat::Avi,
            VideoFormat::Mov,
            VideoFormat::Mkv,
            VideoFormat::WebM,
            VideoFormat::Wmv,
            VideoFormat::Flv,
        ]
    }
}

/// Decoder that pulls packets only when the caller asks for a frame
struct FfmpegFrameSource {
    input: format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<Scaler>,
    eof_sent: bool,
    packets: u64,
    frames: u64,
}

impl FfmpegFrameSource {
    fn convert(&mut self, decoded: &VideoFrameBuffer) -> Result<RgbaImage> {
        let width = decoded.width();
        let height = decoded.height();

        if self.scaler.is_none() {
            let scaler = Scaler::get(
                decoded.format(),
                width,
                height,
                Pixel::RGBA,
                width,
                height,
                ScalerFlags::BILINEAR,
            )
            .map_err(|e| {
                PipelineError::source_unreadable(format!("Failed to create frame scaler: {}", e))
            })?;
            self.scaler = Some(scaler);
        }

        let mut rgba_frame = VideoFrameBuffer::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(decoded, &mut rgba_frame).map_err(|e| {
                PipelineError::source_unreadable(format!("Failed to convert frame to RGBA: {}", e))
            })?;
        }

        let data = rgba_frame.data(0);
        let stride = rgba_frame.stride(0);
        let row_len = width as usize * 4;
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let row = data.get(start..start + row_len).ok_or_else(|| {
                PipelineError::source_unreadable("Decoded frame is smaller than reported")
            })?;
            pixels.extend_from_slice(row);
        }

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| PipelineError::internal("RGBA buffer size mismatch"))
    }
}

impl FrameSource for FfmpegFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let mut decoded = VideoFrameBuffer::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.frames += 1;
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                log::info!(
                    "Decoded {} frames from {} packets",
                    self.frames,
                    self.packets
                );
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    self.packets += 1;
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::warn!("Failed to send packet to decoder: {}", e);
                    }
                },
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().map_err(|e| {
                        PipelineError::source_unreadable(format!("Failed to flush decoder: {}", e))
                    })?;
                    self.eof_sent = true;
                },
                Err(e) => {
                    return Err(PipelineError::source_unreadable(format!(
                        "Failed to read packet: {}",
                        e
                    )));
                },
            }
        }
    }
}

/// Encoder writing RGBA frames into an FFmpeg output context
struct FfmpegEncoder {
    octx: format::context::Output,
    encoder: encoder::video::Encoder,
    scaler: Scaler,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    source_size: (u32, u32),
    next_pts: i64,
    frames: u64,
}

impl FfmpegEncoder {
    fn open(output_path: &Path, spec: &EncodeSpec) -> Result<Self> {
        let encoding = &spec.encoding;
        let mut octx = match spec.format {
            Some(format) => format::output_as(&output_path, muxer_name(format)),
            None => format::output(&output_path),
        }
        .map_err(|e| {
            PipelineError::encode(format!(
                "Failed to create output {}: {}",
                output_path.display(),
                e
            ))
        })?;

        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let codec = encoder::find_by_name(encoding.codec.ffmpeg_name()).ok_or_else(|| {
            PipelineError::encode(format!(
                "Encoder {} is not available in this FFmpeg build",
                encoding.codec.ffmpeg_name()
            ))
        })?;

        // 4:2:0 subsampling needs even dimensions
        let width = (spec.width & !1).max(2);
        let height = (spec.height & !1).max(2);
        let pixel = to_ffmpeg_pixel(encoding.pixel_format);
        let frame_rate = fps_to_rational(spec.fps);
        let time_base = frame_rate.invert();

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| PipelineError::encode(format!("Failed to create encoder: {}", e)))?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(pixel);
        video.set_time_base(time_base);
        video.set_frame_rate(Some(frame_rate));
        if let Some(kbps) = encoding.bitrate {
            video.set_bit_rate(kbps as usize * 1000);
        }
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = ffmpeg::Dictionary::new();
        for (key, value) in encoding.encoder_options() {
            options.set(key, &value);
        }

        let opened = video.open_with(options).map_err(|e| {
            PipelineError::encode(format!("Failed to open {}: {}", encoding.codec, e))
        })?;

        let stream_index = {
            let mut stream = octx
                .add_stream(codec)
                .map_err(|e| PipelineError::encode(format!("Failed to add stream: {}", e)))?;
            stream.set_parameters(&opened);
            stream.set_time_base(time_base);
            stream.index()
        };

        octx.write_header()
            .map_err(|e| PipelineError::encode(format!("Failed to write header: {}", e)))?;

        let stream_time_base = octx
            .stream(stream_index)
            .map_or(time_base, |stream| stream.time_base());

        let scaler = Scaler::get(
            Pixel::RGBA,
            spec.width,
            spec.height,
            pixel,
            width,
            height,
            ScalerFlags::BILINEAR,
        )
        .map_err(|e| PipelineError::encode(format!("Failed to create scaler: {}", e)))?;

        log::info!(
            "Encoding {} at {}x{}, {:.3} fps with {}",
            output_path.display(),
            width,
            height,
            spec.fps,
            encoding.codec
        );

        Ok(Self {
            octx,
            encoder: opened,
            scaler,
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            source_size: (spec.width, spec.height),
            next_pts: 0,
            frames: 0,
        })
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .map_err(|e| PipelineError::encode(format!("Failed to write packet: {}", e)))?;
        }
        Ok(())
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, image: &RgbaImage) -> Result<()> {
        if image.dimensions() != self.source_size {
            return Err(PipelineError::encode(format!(
                "Frame is {}x{}, stream is {}x{}",
                image.width(),
                image.height(),
                self.source_size.0,
                self.source_size.1
            )));
        }

        let (width, height) = self.source_size;
        let mut rgba = VideoFrameBuffer::new(Pixel::RGBA, width, height);
        let stride = rgba.stride(0);
        let row_len = width as usize * 4;
        let plane = rgba.data_mut(0);
        for (y, row) in image.as_raw().chunks_exact(row_len).enumerate() {
            let start = y * stride;
            plane
                .get_mut(start..start + row_len)
                .ok_or_else(|| PipelineError::encode("Frame buffer smaller than expected"))?
                .copy_from_slice(row);
        }

        let mut converted = VideoFrameBuffer::empty();
        self.scaler
            .run(&rgba, &mut converted)
            .map_err(|e| PipelineError::encode(format!("Failed to convert frame: {}", e)))?;
        converted.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&converted)
            .map_err(|e| PipelineError::encode(format!("Failed to encode frame: {}", e)))?;
        self.drain_packets()?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64> {
        self.encoder
            .send_eof()
            .map_err(|e| PipelineError::encode(format!("Failed to flush encoder: {}", e)))?;
        self.drain_packets()?;
        self.octx
            .write_trailer()
            .map_err(|e| PipelineError::encode(format!("Failed to write trailer: {}", e)))?;
        log::info!("Finalized video with {} frames", self.frames);
        Ok(self.frames)
    }
}
