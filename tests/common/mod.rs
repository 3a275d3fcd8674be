//! Shared helpers for integration tests
//!
//! Sources are written in the raw frame-stream container so the tests need no
//! system FFmpeg. Every frame carries its index in the red and green channels
//! of each pixel, which survives the mock engine inside its foreground rect.

#![allow(dead_code)]

use async_trait::async_trait;
use bgremove_studio::backends::video::raw::{write_raw_video, RawVideoBackend};
use bgremove_studio::backends::video::{
    EncodeSpec, FrameSource, VideoBackend, VideoEncoder, VideoFormat, VideoMetadata,
};
use bgremove_studio::services::capacity::{AvailableCapacity, FixedCapacity};
use bgremove_studio::{
    BackgroundRemover, JobController, JobEvent, MockRemover, PipelineError, ProgressSnapshot,
    RemovalParams, Result,
};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const FRAME_WIDTH: u32 = 16;
pub const FRAME_HEIGHT: u32 = 12;

/// Pixel value used for frame `index`
pub fn index_pixel(index: u64) -> Rgba<u8> {
    Rgba([(index % 256) as u8, (index / 256) as u8, 100, 255])
}

/// Frame index encoded in a pixel written by [`index_pixel`]
pub fn pixel_index(pixel: Rgba<u8>) -> u64 {
    u64::from(pixel[0]) + u64::from(pixel[1]) * 256
}

pub fn indexed_frames(count: u64) -> Vec<RgbaImage> {
    (0..count)
        .map(|i| RgbaImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, index_pixel(i)))
        .collect()
}

/// Write a raw source of `count` indexed frames at `fps` into `dir`
pub fn write_source(dir: &Path, count: u64, fps: f64) -> PathBuf {
    let path = dir.join("source.rgbv");
    write_raw_video(&path, fps, &indexed_frames(count)).expect("failed to write raw source");
    path
}

/// Center pixel of `frame`, always inside the mock engine's foreground
pub fn center_pixel(frame: &RgbaImage) -> Rgba<u8> {
    *frame.get_pixel(frame.width() / 2, frame.height() / 2)
}

/// Controller over the raw backend that never fails its capacity check
pub fn raw_controller(adapter: Arc<dyn BackgroundRemover>) -> JobController {
    controller_with(Arc::new(RawVideoBackend), adapter)
}

pub fn controller_with(
    backend: Arc<dyn VideoBackend>,
    adapter: Arc<dyn BackgroundRemover>,
) -> JobController {
    JobController::new(backend, adapter)
        .with_capacity_probe(Arc::new(FixedCapacity(AvailableCapacity::default())))
}

/// Names of the entries in `dir`, sorted
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("failed to read directory")
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Every event already sent to a channel observer
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Progress snapshots among `events`, in delivery order
pub fn progress_snapshots(events: &[JobEvent]) -> Vec<ProgressSnapshot> {
    events
        .iter()
        .filter_map(|event| match event {
            JobEvent::Progress(snapshot) => Some(*snapshot),
            _ => None,
        })
        .collect()
}

/// Mock engine that records how many calls ran at the same time
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    inner: MockRemover,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new(inner: MockRemover) -> Self {
        Self {
            inner,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl BackgroundRemover for ConcurrencyTracker {
    fn name(&self) -> &str {
        "concurrency-tracker"
    }

    fn remove(&self, image: &RgbaImage, params: &RemovalParams) -> Result<RgbaImage> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let result = self.inner.remove(image, params);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Raw backend whose encoder fails when asked to write frame `fail_at`
#[derive(Debug, Clone, Copy)]
pub struct FailingEncoderBackend {
    pub fail_at: u64,
}

#[async_trait]
impl VideoBackend for FailingEncoderBackend {
    fn name(&self) -> &'static str {
        "failing-encoder"
    }

    async fn probe(&self, input_path: &Path) -> Result<VideoMetadata> {
        RawVideoBackend.probe(input_path).await
    }

    fn open_source(&self, input_path: &Path) -> Result<Box<dyn FrameSource>> {
        RawVideoBackend.open_source(input_path)
    }

    fn create_encoder(&self, output_path: &Path, spec: &EncodeSpec) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(FailingEncoder {
            inner: RawVideoBackend.create_encoder(output_path, spec)?,
            written: 0,
            fail_at: self.fail_at,
        }))
    }

    fn supported_formats(&self) -> &[VideoFormat] {
        &[]
    }
}

struct FailingEncoder {
    inner: Box<dyn VideoEncoder>,
    written: u64,
    fail_at: u64,
}

impl VideoEncoder for FailingEncoder {
    fn write_frame(&mut self, image: &RgbaImage) -> Result<()> {
        if self.written == self.fail_at {
            return Err(PipelineError::encode("disk full"));
        }
        self.inner.write_frame(image)?;
        self.written += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        self.inner.finish()
    }
}
