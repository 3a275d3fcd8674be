//! Video job controller
//!
//! [`JobController::start`] validates a [`VideoJob`], runs the pre-start
//! checks and drives the extractor, the processor pool and the reassembler
//! as one streaming pipeline. The caller gets a [`JobHandle`] immediately and
//! is never blocked by pipeline work.

pub mod state;

pub use state::JobState;

use crate::adapter::BackgroundRemover;
use crate::backends::video::{Frame, FrameSampler, FrameStatus, ProcessedFrame, VideoBackend, VideoFormat};
use crate::config::VideoJob;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::pipeline::extractor::spawn_extractor;
use crate::pipeline::reassembler::{spawn_reassembler, ReassemblerSpec};
use crate::pipeline::{FrameProcessor, InFlight, StageContext, StagedOutput};
use crate::services::capacity::{check_capacity, check_file_size, CapacityEstimate, CapacityProbe, SystemCapacityProbe};
use crate::services::progress::{JobObserver, JobProgress, ProgressSnapshot};
use crate::tracing_config::{events, spans};
use futures::StreamExt;
use state::StateTracker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Report of a completed job
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub source: PathBuf,
    pub output: PathBuf,
    pub state: JobState,
    pub progress: ProgressSnapshot,
    /// Rate the output was written at
    pub output_fps: f64,
    pub frame_size: (u32, u32),
    pub frames_written: u64,
    /// Frames replaced by a placeholder, ascending
    pub failed_frames: Vec<u64>,
    pub elapsed: Duration,
}

impl JobSummary {
    /// Output duration in seconds
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.output_fps > 0.0 {
            self.frames_written as f64 / self.output_fps
        } else {
            0.0
        }
    }
}

/// Terminal notification delivered to observers
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(JobSummary),
    Cancelled(ProgressSnapshot),
    Failed { kind: ErrorKind, message: String },
}

/// Handle to a running job
#[derive(Debug)]
pub struct JobHandle {
    cancel: CancellationToken,
    state: watch::Receiver<JobState>,
    progress: Arc<JobProgress>,
    task: JoinHandle<Result<JobSummary>>,
}

impl JobHandle {
    /// Request cancellation; takes effect at the next frame boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this job when triggered
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    #[must_use]
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Wait for the job to finish
    ///
    /// # Errors
    /// - [`PipelineError::Cancelled`] if the job was cancelled
    /// - the fatal error that moved the job to `Failed`
    pub async fn wait(self) -> Result<JobSummary> {
        self.task
            .await
            .map_err(|e| PipelineError::internal(format!("job task failed: {}", e)))?
    }
}

/// Runs video jobs against a video backend and a removal engine
#[derive(Clone)]
pub struct JobController {
    backend: Arc<dyn VideoBackend>,
    adapter: Arc<dyn BackgroundRemover>,
    capacity: Arc<dyn CapacityProbe>,
}

impl JobController {
    #[must_use]
    pub fn new(backend: Arc<dyn VideoBackend>, adapter: Arc<dyn BackgroundRemover>) -> Self {
        Self {
            backend,
            adapter,
            capacity: Arc::new(SystemCapacityProbe),
        }
    }

    /// Replace the probe used for the pre-start capacity check
    #[must_use]
    pub fn with_capacity_probe(mut self, probe: Arc<dyn CapacityProbe>) -> Self {
        self.capacity = probe;
        self
    }

    /// Start `job` on the current runtime
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self, job: VideoJob, observer: Arc<dyn JobObserver>) -> JobHandle {
        let cancel = CancellationToken::new();
        let progress = Arc::new(JobProgress::new());
        let (tracker, state) = StateTracker::new(observer.clone());
        let tracker = Arc::new(tracker);

        let ctx = Arc::new(StageContext::new(
            progress.clone(),
            tracker.clone(),
            observer.clone(),
            cancel.child_token(),
        ));
        let span = spans::video_job(&job.source, &job.output, job.config.removal.model.as_str());
        let controller = self.clone();
        let user_cancel = cancel.clone();

        let task = tokio::spawn(
            async move {
                let result = controller.execute(&job, &ctx, &user_cancel).await;
                let result = match result {
                    Err(_) if user_cancel.is_cancelled() => Err(PipelineError::Cancelled),
                    other => other,
                };
                finish(&tracker, observer.as_ref(), &ctx.progress, &result);
                result
            }
            .instrument(span),
        );

        JobHandle {
            cancel,
            state,
            progress,
            task,
        }
    }

    /// Start `job` and wait for it
    pub async fn run(&self, job: VideoJob, observer: Arc<dyn JobObserver>) -> Result<JobSummary> {
        self.start(job, observer).wait().await
    }

    async fn execute(
        &self,
        job: &VideoJob,
        ctx: &Arc<StageContext>,
        user_cancel: &CancellationToken,
    ) -> Result<JobSummary> {
        job.validate()?;
        let config = &job.config;

        if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::file_io_error("create output directory", parent, &e))?;
        }

        let metadata = self.backend.probe(&job.source).await?;
        let source_bytes = match config.max_source_mb {
            Some(limit) => check_file_size(&job.source, limit)?,
            None => tokio::fs::metadata(&job.source)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
        };

        let sampler = FrameSampler::new(config.frame_rate, metadata.native_fps());
        ctx.progress
            .set_expected_total(metadata.estimated_frames().map(|n| sampler.kept_count(n)));

        let estimate =
            CapacityEstimate::for_job(&metadata, config.in_flight_window, source_bytes, sampler.output_fps());
        let output_dir = output_dir(&job.output);
        let probe = self.capacity.clone();
        let available = tokio::task::spawn_blocking(move || probe.available(&output_dir))
            .await
            .map_err(|e| PipelineError::internal(format!("capacity probe failed: {}", e)))?;
        check_capacity(&estimate, &available)?;

        if user_cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        tracing::info!(
            width = metadata.width,
            height = metadata.height,
            native_fps = metadata.native_fps(),
            output_fps = sampler.output_fps(),
            step = sampler.step(),
            workers = config.workers,
            window = config.in_flight_window,
            backend = self.backend.name(),
            engine = self.adapter.name(),
            "starting video job"
        );
        if metadata.has_audio {
            events::warning_with_recommendation(
                "the source has an audio track that will not be copied",
                "mux the original audio back into the output with ffmpeg",
            );
        }
        ctx.state.advance(JobState::Extracting);

        let staged = StagedOutput::create(&job.output)?;
        let window = Arc::new(Semaphore::new(config.in_flight_window));
        let (frame_tx, frame_rx) = mpsc::channel::<InFlight<Frame>>(config.in_flight_window);
        let (encode_tx, encode_rx) = mpsc::channel::<InFlight<ProcessedFrame>>(config.in_flight_window);

        let extractor = spawn_extractor(
            ctx.clone(),
            self.backend.clone(),
            job.source.clone(),
            sampler,
            window,
            frame_tx,
        );
        let reassembler = spawn_reassembler(
            ctx.clone(),
            ReassemblerSpec {
                backend: self.backend.clone(),
                path: staged.path().to_path_buf(),
                fps: sampler.output_fps(),
                encoding: config.encoding.clone(),
                format: VideoFormat::from_path(&job.output),
            },
            encode_rx,
        );

        let processor = FrameProcessor::from_config(self.adapter.clone(), config);
        let drive_result = drive_processing(ctx, processor, config.workers, frame_rx, &encode_tx).await;
        if drive_result.is_err() {
            ctx.stop.cancel();
        }

        let extract_result = join_stage(extractor, "extraction").await;
        if extract_result.is_err() {
            ctx.stop.cancel();
        }

        let ready_for_reassembly = drive_result.is_ok()
            && matches!(extract_result, Ok(n) if n > 0)
            && !ctx.stop.is_cancelled();
        if ready_for_reassembly {
            ctx.state.advance(JobState::Reassembling);
        } else {
            ctx.stop.cancel();
        }
        drop(encode_tx);
        let reassemble_result = join_stage(reassembler, "reassembly").await;

        if user_cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if matches!(extract_result, Ok(0)) {
            return Err(PipelineError::source_error(
                &job.source,
                "no frames could be decoded",
            ));
        }
        let (extracted, report) = match (extract_result, drive_result, reassemble_result) {
            (Ok(extracted), Ok(()), Ok(report)) => (extracted, report),
            (extract, drive, reassemble) => {
                return Err(first_failure([extract.err(), drive.err(), reassemble.err()]));
            },
        };
        if report.frames != extracted {
            return Err(PipelineError::encode(format!(
                "wrote {} frames but extracted {}",
                report.frames, extracted
            )));
        }

        let output = staged.persist()?;
        let progress = ctx.progress.snapshot();
        Ok(JobSummary {
            source: job.source.clone(),
            output,
            state: JobState::Completed,
            progress,
            output_fps: sampler.output_fps(),
            frame_size: report.frame_size,
            frames_written: report.frames,
            failed_frames: ctx.progress.failed_indices(),
            elapsed: progress.elapsed,
        })
    }
}

/// Run frames through the processor pool and hand them to the reassembler
///
/// Frames complete in any order. Results that finish after a stop request
/// are discarded.
async fn drive_processing(
    ctx: &Arc<StageContext>,
    processor: FrameProcessor,
    workers: usize,
    frames: mpsc::Receiver<InFlight<Frame>>,
    encode: &mpsc::Sender<InFlight<ProcessedFrame>>,
) -> Result<()> {
    let mut processed = ReceiverStream::new(frames)
        .map(|in_flight| process_in_flight(processor.clone(), ctx.stop.clone(), in_flight))
        .buffer_unordered(workers.max(1));

    while let Some(result) = processed.next().await {
        let Some(in_flight) = result? else {
            continue;
        };
        let (frame, slot) = in_flight.into_parts();

        ctx.progress.record_processed();
        if let FrameStatus::Failed { reason } = &frame.status {
            ctx.progress.record_failed(frame.index);
            ctx.observer.on_frame_failed(frame.index, reason);
        }
        ctx.emit_progress();

        if encode.send(InFlight::new(frame, slot)).await.is_err() {
            // Reassembler stopped; its own result carries the error
            ctx.stop.cancel();
            break;
        }
    }
    Ok(())
}

async fn process_in_flight(
    processor: FrameProcessor,
    stop: CancellationToken,
    in_flight: InFlight<Frame>,
) -> Result<Option<InFlight<ProcessedFrame>>> {
    if stop.is_cancelled() {
        return Ok(None);
    }
    let (frame, slot) = in_flight.into_parts();
    let processed = processor.process(frame).await?;
    if stop.is_cancelled() {
        return Ok(None);
    }
    Ok(Some(InFlight::new(processed, slot)))
}

/// The first stage error that is not a knock-on cancellation
fn first_failure<const N: usize>(errors: [Option<PipelineError>; N]) -> PipelineError {
    let mut cancelled = None;
    for error in errors.into_iter().flatten() {
        match error {
            PipelineError::Cancelled => cancelled = Some(error),
            other => return other,
        }
    }
    cancelled.unwrap_or_else(|| PipelineError::internal("pipeline stopped without an error"))
}

async fn join_stage<T>(handle: JoinHandle<Result<T>>, stage: &str) -> Result<T> {
    handle
        .await
        .map_err(|e| PipelineError::internal(format!("{} task failed: {}", stage, e)))?
}

fn output_dir(output: &Path) -> PathBuf {
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn finish(
    tracker: &StateTracker,
    observer: &dyn JobObserver,
    progress: &JobProgress,
    result: &Result<JobSummary>,
) {
    let outcome = match result {
        Ok(summary) => {
            tracker.advance(JobState::Completed);
            tracing::info!(
                frames = summary.frames_written,
                failed = summary.failed_frames.len(),
                fps = summary.output_fps,
                output = %summary.output.display(),
                "video job completed"
            );
            JobOutcome::Completed(summary.clone())
        },
        Err(PipelineError::Cancelled) => {
            tracker.advance(JobState::Cancelled);
            tracing::info!("video job cancelled");
            JobOutcome::Cancelled(progress.snapshot())
        },
        Err(e) => {
            tracker.advance(JobState::Failed);
            tracing::error!(kind = ?e.kind(), error = %e, "video job failed");
            JobOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            }
        },
    };
    observer.on_finished(&outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockRemover;
    use crate::backends::video::raw::{read_raw_video, write_raw_video};
    use crate::backends::video::RawVideoBackend;
    use crate::config::VideoJobConfig;
    use crate::services::capacity::{AvailableCapacity, FixedCapacity};
    use crate::services::progress::NoOpObserver;
    use image::{Rgba, RgbaImage};

    fn controller(mock: MockRemover) -> JobController {
        JobController::new(Arc::new(RawVideoBackend), Arc::new(mock))
            .with_capacity_probe(Arc::new(FixedCapacity(AvailableCapacity::default())))
    }

    fn source(dir: &Path, count: u8) -> PathBuf {
        let path = dir.join("source.rgbv");
        let frames: Vec<RgbaImage> = (0..count)
            .map(|i| RgbaImage::from_pixel(8, 8, Rgba([i, 10, 10, 255])))
            .collect();
        write_raw_video(&path, 10.0, &frames).unwrap();
        path
    }

    #[tokio::test]
    async fn test_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path(), 6);
        let output = dir.path().join("out.rgbv");
        let config = VideoJobConfig::builder().workers(2).build().unwrap();

        let summary = controller(MockRemover::new())
            .run(VideoJob::new(&input, &output, config), Arc::new(NoOpObserver))
            .await
            .unwrap();

        assert_eq!(summary.state, JobState::Completed);
        assert_eq!(summary.frames_written, 6);
        assert_eq!(summary.frame_size, (8, 8));
        assert!(summary.failed_frames.is_empty());
        assert_eq!(read_raw_video(&output).unwrap().frames.len(), 6);
    }

    #[tokio::test]
    async fn test_capacity_failure_before_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path(), 3);
        let output = dir.path().join("out.rgbv");
        let mock = MockRemover::new();
        let controller = JobController::new(Arc::new(RawVideoBackend), Arc::new(mock.clone()))
            .with_capacity_probe(Arc::new(FixedCapacity(AvailableCapacity {
                memory_bytes: Some(1),
                disk_bytes: None,
            })));

        let handle = controller.start(
            VideoJob::new(&input, &output, VideoJobConfig::default()),
            Arc::new(NoOpObserver),
        );
        let mut states = handle.subscribe();
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert_eq!(*states.borrow_and_update(), JobState::Failed);
        assert_eq!(mock.calls(), 0);
        assert!(!output.exists());
    }

    struct ThreadRecordingProbe(std::sync::Mutex<Option<std::thread::ThreadId>>);

    impl CapacityProbe for ThreadRecordingProbe {
        fn available(&self, _output_dir: &Path) -> AvailableCapacity {
            *self.0.lock().unwrap() = Some(std::thread::current().id());
            AvailableCapacity::default()
        }
    }

    #[tokio::test]
    async fn test_capacity_probe_runs_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let input = source(dir.path(), 2);
        let output = dir.path().join("out.rgbv");
        let probe = Arc::new(ThreadRecordingProbe(std::sync::Mutex::new(None)));
        let controller = JobController::new(Arc::new(RawVideoBackend), Arc::new(MockRemover::new()))
            .with_capacity_probe(probe.clone());

        controller
            .run(VideoJob::new(&input, &output, VideoJobConfig::default()), Arc::new(NoOpObserver))
            .await
            .unwrap();

        // The current-thread runtime drives every task on this thread
        let probed_on = probe.0.lock().unwrap().unwrap();
        assert_ne!(probed_on, std::thread::current().id());
    }

    #[test]
    fn test_summary_duration() {
        let summary = JobSummary {
            source: PathBuf::from("in"),
            output: PathBuf::from("out"),
            state: JobState::Completed,
            progress: ProgressSnapshot::default(),
            output_fps: 10.0,
            frame_size: (2, 2),
            frames_written: 25,
            failed_frames: Vec::new(),
            elapsed: Duration::ZERO,
        };
        assert!((summary.duration_seconds() - 2.5).abs() < f64::EPSILON);
    }
}
