//! Ordered reassembly of processed frames into an output container

use super::{InFlight, StageContext, WindowSlot};
use crate::backends::video::{
    EncodeSpec, ProcessedFrame, VideoBackend, VideoEncoder, VideoEncodingConfig, VideoFormat,
};
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffers items that arrive out of order and releases them by index
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Add the item with `index`
    ///
    /// # Errors
    /// - [`PipelineError::Internal`] for an index already released or already pending
    pub fn push(&mut self, index: u64, item: T) -> Result<()> {
        if index < self.next || self.pending.contains_key(&index) {
            return Err(PipelineError::internal(format!(
                "frame {} delivered twice",
                index
            )));
        }
        self.pending.insert(index, item);
        Ok(())
    }

    /// Take the next item in order, if it has arrived
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    /// Index of the next item to be released
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Output written under a hidden temporary name next to its target
///
/// Dropping a staged output deletes the file; [`StagedOutput::persist`]
/// renames it into place.
#[derive(Debug)]
pub struct StagedOutput {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedOutput {
    /// Reserve a temporary file in the target's directory
    pub fn create(target: &Path) -> Result<Self> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
        let suffix = target
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", stem))
            .suffix(&suffix)
            .tempfile_in(dir)
            .map_err(|e| PipelineError::file_io_error("create staging file in", dir, &e))?;

        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    /// Where encoders should write
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the finished file to its target
    pub fn persist(self) -> Result<PathBuf> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| PipelineError::encode(format!("cannot move output into place: {}", e.error)))?;
        Ok(target)
    }
}

/// What a finished reassembly wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyReport {
    pub frames: u64,
    pub frame_size: (u32, u32),
}

/// Writes processed frames in index order
///
/// The encoder is created from the first frame's dimensions. Each pushed
/// frame may carry a ticket, dropped once the frame has been written.
pub struct VideoReassembler<T = ()> {
    backend: Arc<dyn VideoBackend>,
    path: PathBuf,
    fps: f64,
    encoding: VideoEncodingConfig,
    format: Option<VideoFormat>,
    encoder: Option<Box<dyn VideoEncoder>>,
    frame_size: Option<(u32, u32)>,
    order: ReorderBuffer<(ProcessedFrame, T)>,
    written: u64,
}

impl<T> VideoReassembler<T> {
    #[must_use]
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        path: PathBuf,
        fps: f64,
        encoding: VideoEncodingConfig,
        format: Option<VideoFormat>,
    ) -> Self {
        Self {
            backend,
            path,
            fps,
            encoding,
            format,
            encoder: None,
            frame_size: None,
            order: ReorderBuffer::new(),
            written: 0,
        }
    }

    /// Accept a frame and write every frame now in order
    ///
    /// Returns the number of frames written by this call.
    pub fn push(&mut self, frame: ProcessedFrame, ticket: T) -> Result<u64> {
        self.order.push(frame.index, (frame, ticket))?;
        let mut written = 0;
        while let Some((frame, ticket)) = self.order.pop_ready() {
            self.write(&frame)?;
            drop(ticket);
            written += 1;
        }
        Ok(written)
    }

    fn write(&mut self, frame: &ProcessedFrame) -> Result<()> {
        let encoder = match &mut self.encoder {
            Some(encoder) => encoder,
            empty => {
                let (width, height) = frame.image.dimensions();
                let spec = EncodeSpec {
                    width,
                    height,
                    fps: self.fps,
                    encoding: self.encoding.clone(),
                    format: self.format,
                };
                self.frame_size = Some((width, height));
                empty.insert(self.backend.create_encoder(&self.path, &spec)?)
            },
        };
        encoder.write_frame(&frame.image)?;
        self.written += 1;
        Ok(())
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Frames waiting for an earlier index
    #[must_use]
    pub fn pending(&self) -> usize {
        self.order.pending()
    }

    /// Finalize the container
    ///
    /// # Errors
    /// - [`PipelineError::EncodeError`] when frames are missing, nothing was written or the trailer fails
    pub fn finish(self) -> Result<ReassemblyReport> {
        if !self.order.is_empty() {
            return Err(PipelineError::encode(format!(
                "frame {} never arrived, {} later frames unwritten",
                self.order.next_index(),
                self.order.pending()
            )));
        }
        let (Some(encoder), Some(frame_size)) = (self.encoder, self.frame_size) else {
            return Err(PipelineError::encode("no frames to write"));
        };
        let frames = encoder.finish()?;
        Ok(ReassemblyReport { frames, frame_size })
    }
}

/// Run reassembly on a blocking thread, consuming `frames` in any order
pub(crate) fn spawn_reassembler(
    ctx: Arc<StageContext>,
    reassembler: ReassemblerSpec,
    mut frames: mpsc::Receiver<InFlight<ProcessedFrame>>,
) -> JoinHandle<Result<ReassemblyReport>> {
    let span = tracing::Span::current();

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let mut reassembler: VideoReassembler<WindowSlot> = reassembler.build();

        while let Some(in_flight) = frames.blocking_recv() {
            if ctx.stop.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let (frame, slot) = in_flight.into_parts();
            let written = reassembler.push(frame, slot)?;
            for _ in 0..written {
                ctx.progress.record_reassembled();
            }
            if written > 0 {
                ctx.emit_progress();
            }
        }

        if ctx.stop.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let report = reassembler.finish()?;
        tracing::debug!(frames = report.frames, "container finalized");
        Ok(report)
    })
}

/// Everything needed to build a [`VideoReassembler`] on its own thread
pub(crate) struct ReassemblerSpec {
    pub(crate) backend: Arc<dyn VideoBackend>,
    pub(crate) path: PathBuf,
    pub(crate) fps: f64,
    pub(crate) encoding: VideoEncodingConfig,
    pub(crate) format: Option<VideoFormat>,
}

impl ReassemblerSpec {
    fn build<T>(self) -> VideoReassembler<T> {
        VideoReassembler::new(self.backend, self.path, self.fps, self.encoding, self.format)
    }
}
