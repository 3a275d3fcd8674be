//! Uncompressed RGBA frame-stream container
//!
//! Layout: the magic line `BGRV1\n`, one JSON header line with width, height
//! and fps, then `width * height * 4` bytes per frame until end of file. The
//! frame count is implied by the file size. The format is lossless and keeps
//! alpha, which makes it useful as an intermediate for external tools and as
//! a decoder-free backend in tests.

use super::{EncodeSpec, FrameSource, VideoBackend, VideoEncoder, VideoFormat, VideoMetadata};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8] = b"BGRV1\n";

/// Conventional file extension for raw frame streams
pub const RAW_EXTENSION: &str = "rgbv";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawHeader {
    width: u32,
    height: u32,
    fps: f64,
}

impl RawHeader {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Backend reading and writing the raw frame-stream container
#[derive(Debug, Clone, Copy, Default)]
pub struct RawVideoBackend;

impl RawVideoBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn read_header(path: &Path) -> Result<(BufReader<File>, RawHeader, u64)> {
    let file = File::open(path).map_err(|e| PipelineError::source_error(path, &e.to_string()))?;
    let file_len = file
        .metadata()
        .map_err(|e| PipelineError::source_error(path, &e.to_string()))?
        .len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; MAGIC.len()];
    reader
        .read_exact(&mut magic)
        .map_err(|_| PipelineError::source_error(path, "not a raw frame stream"))?;
    if magic != MAGIC {
        return Err(PipelineError::source_error(path, "not a raw frame stream"));
    }

    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| PipelineError::source_error(path, &e.to_string()))?;
    let header: RawHeader = serde_json::from_str(line.trim_end())
        .map_err(|e| PipelineError::source_error(path, &format!("bad header: {}", e)))?;
    if header.width == 0 || header.height == 0 {
        return Err(PipelineError::source_error(path, "zero frame dimensions"));
    }

    let payload = file_len.saturating_sub((MAGIC.len() + line.len()) as u64);
    Ok((reader, header, payload))
}

#[async_trait]
impl VideoBackend for RawVideoBackend {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn probe(&self, input_path: &Path) -> Result<VideoMetadata> {
        let path = input_path.to_path_buf();
        let (header, payload) = tokio::task::spawn_blocking(move || {
            read_header(&path).map(|(_, header, payload)| (header, payload))
        })
        .await
        .map_err(|e| PipelineError::internal(format!("probe task failed: {}", e)))??;

        let frame_count = payload / header.frame_len() as u64;
        let duration = if header.fps > 0.0 {
            frame_count as f64 / header.fps
        } else {
            0.0
        };

        Ok(VideoMetadata {
            duration,
            width: header.width,
            height: header.height,
            fps: header.fps,
            frame_count: Some(frame_count),
            format: None,
            codec: "rawvideo".to_string(),
            has_audio: false,
        })
    }

    fn open_source(&self, input_path: &Path) -> Result<Box<dyn FrameSource>> {
        let (reader, header, _) = read_header(input_path)?;
        Ok(Box::new(RawFrameSource {
            reader,
            header,
            path_display: input_path.display().to_string(),
        }))
    }

    fn create_encoder(
        &self,
        output_path: &Path,
        spec: &EncodeSpec,
    ) -> Result<Box<dyn VideoEncoder>> {
        let header = RawHeader {
            width: spec.width,
            height: spec.height,
            fps: spec.fps,
        };
        let file = File::create(output_path)
            .map_err(|e| PipelineError::encode(format!("create {}: {}", output_path.display(), e)))?;
        let mut writer = BufWriter::new(file);
        let header_json = serde_json::to_string(&header)
            .map_err(|e| PipelineError::encode(format!("header: {}", e)))?;
        let write_header = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
            writer.write_all(MAGIC)?;
            writer.write_all(header_json.as_bytes())?;
            writer.write_all(b"\n")
        };
        write_header(&mut writer)
            .map_err(|e| PipelineError::encode(format!("write header: {}", e)))?;

        Ok(Box::new(RawFrameWriter {
            writer,
            header,
            frames: 0,
        }))
    }

    fn supported_formats(&self) -> &[VideoFormat] {
        &[]
    }
}

struct RawFrameSource {
    reader: BufReader<File>,
    header: RawHeader,
    path_display: String,
}

impl FrameSource for RawFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let mut buf = vec![0u8; self.header.frame_len()];
        let mut filled = 0;
        while filled < buf.len() {
            let read = self
                .reader
                .read(buf.get_mut(filled..).unwrap_or(&mut []))
                .map_err(|e| PipelineError::source_unreadable(e.to_string()))?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(PipelineError::source_unreadable(format!(
                "{}: truncated frame ({} of {} bytes)",
                self.path_display,
                filled,
                buf.len()
            )));
        }

        RgbaImage::from_raw(self.header.width, self.header.height, buf)
            .map(Some)
            .ok_or_else(|| PipelineError::internal("frame buffer size mismatch"))
    }
}

struct RawFrameWriter {
    writer: BufWriter<File>,
    header: RawHeader,
    frames: u64,
}

impl VideoEncoder for RawFrameWriter {
    fn write_frame(&mut self, image: &RgbaImage) -> Result<()> {
        if image.dimensions() != (self.header.width, self.header.height) {
            return Err(PipelineError::encode(format!(
                "frame is {}x{}, stream is {}x{}",
                image.width(),
                image.height(),
                self.header.width,
                self.header.height
            )));
        }
        self.writer
            .write_all(image.as_raw())
            .map_err(|e| PipelineError::encode(format!("write frame: {}", e)))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        let frames = self.frames;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| PipelineError::encode(format!("flush: {}", e.error())))?;
        file.sync_all()
            .map_err(|e| PipelineError::encode(format!("sync: {}", e)))?;
        Ok(frames)
    }
}

/// A fully decoded raw stream
#[derive(Debug, Clone)]
pub struct RawVideo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames: Vec<RgbaImage>,
}

impl RawVideo {
    /// Duration in seconds
    #[must_use]
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.frames.len() as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Write `frames` as a raw stream at `fps`
pub fn write_raw_video(path: &Path, fps: f64, frames: &[RgbaImage]) -> Result<()> {
    let first = frames
        .first()
        .ok_or_else(|| PipelineError::encode("cannot write an empty raw stream"))?;
    let spec = EncodeSpec {
        width: first.width(),
        height: first.height(),
        fps,
        encoding: super::VideoEncodingConfig::default(),
        format: None,
    };
    let mut encoder = RawVideoBackend.create_encoder(path, &spec)?;
    for frame in frames {
        encoder.write_frame(frame)?;
    }
    encoder.finish()?;
    Ok(())
}

/// Decode a whole raw stream into memory
pub fn read_raw_video(path: &Path) -> Result<RawVideo> {
    let (reader, header, _) = read_header(path)?;
    let mut source = RawFrameSource {
        reader,
        header,
        path_display: path.display().to_string(),
    };
    let mut frames = Vec::new();
    while let Some(frame) = source.next_frame()? {
        frames.push(frame);
    }
    Ok(RawVideo {
        width: header.width,
        height: header.height,
        fps: header.fps,
        frames,
    })
}
