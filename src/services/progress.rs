//! Progress reporting service
//!
//! Video jobs publish counters through [`JobProgress`] and notify a
//! [`JobObserver`]; batch runs report [`ProgressUpdate`]s to a
//! [`ProgressReporter`]. Presentation layers implement one of the two traits
//! and never touch pipeline internals.

use crate::controller::{JobOutcome, JobState};
use instant::Instant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Progress stages of a job or batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Validating parameters and probing the source
    VideoAnalysis,
    /// Decoding and sampling frames
    FrameExtraction,
    /// Running background removal on frames
    FrameProcessing,
    /// Finalizing and moving the output into place
    VideoFinalization,
    /// Processing completed
    Completed,

    // Batch processing stages
    /// Discovering input files
    BatchInitialization,
    /// Processing individual item in batch
    BatchItemProcessing,
    /// Finalizing batch processing
    BatchFinalization,

    /// Downloading model files
    ModelDownload,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::VideoAnalysis => "Analyzing video metadata",
            ProcessingStage::FrameExtraction => "Extracting video frames",
            ProcessingStage::FrameProcessing => "Removing backgrounds",
            ProcessingStage::VideoFinalization => "Finalizing video file",
            ProcessingStage::Completed => "Processing completed",
            ProcessingStage::BatchInitialization => "Collecting input files",
            ProcessingStage::BatchItemProcessing => "Processing batch item",
            ProcessingStage::BatchFinalization => "Finalizing batch processing",
            ProcessingStage::ModelDownload => "Downloading model",
        }
    }

    /// Get the typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::VideoAnalysis => 5,
            ProcessingStage::FrameExtraction => 20,
            ProcessingStage::FrameProcessing => 70, // Variable based on frames
            ProcessingStage::VideoFinalization => 99,
            ProcessingStage::Completed => 100,
            ProcessingStage::BatchInitialization => 5,
            ProcessingStage::BatchItemProcessing => 50, // Variable based on items
            ProcessingStage::BatchFinalization => 98,
            ProcessingStage::ModelDownload => 50,
        }
    }

    /// Stage shown while a job is in `state`
    #[must_use]
    pub fn for_state(state: JobState) -> Self {
        match state {
            JobState::Idle => ProcessingStage::VideoAnalysis,
            JobState::Extracting => ProcessingStage::FrameExtraction,
            JobState::Processing => ProcessingStage::FrameProcessing,
            JobState::Reassembling => ProcessingStage::VideoFinalization,
            JobState::Completed | JobState::Cancelled | JobState::Failed => {
                ProcessingStage::Completed
            },
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
    /// Estimated time remaining (milliseconds, if available)
    pub eta_ms: Option<u64>,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            eta_ms: None,
            stage,
        }
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(
        stage: ProcessingStage,
        description: String,
        start_time: Instant,
    ) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            eta_ms: None,
            stage,
            description,
        }
    }

    /// Override the stage's typical percentage
    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }

    /// Add estimated time remaining
    #[must_use]
    pub fn with_eta(mut self, eta_ms: u64) -> Self {
        self.eta_ms = Some(eta_ms);
        self
    }
}

/// Statistics for batch processing operations
#[derive(Debug, Clone)]
pub struct BatchProcessingStats {
    /// Number of items completed
    pub items_completed: usize,
    /// Total number of items to process
    pub items_total: usize,
    /// Number of items that failed processing
    pub items_failed: usize,
    /// Name/path of the current item being processed
    pub current_item_name: String,
    /// Processing rate in items per second
    pub processing_rate: f64,
    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,
}

/// Batch progress update
#[derive(Debug, Clone)]
pub struct BatchProgressUpdate {
    /// Overall batch progress
    pub total_progress: ProgressUpdate,
    /// Processing statistics
    pub stats: BatchProcessingStats,
}

/// Trait for reporting progress of batch runs and downloads
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report completion after `elapsed_ms`
    fn report_completion(&self, elapsed_ms: u64);

    /// Report an error during processing
    fn report_error(&self, stage: ProcessingStage, error: &str);

    /// Report batch progress
    fn report_batch_progress(&self, update: BatchProgressUpdate) {
        self.report_progress(update.total_progress);
    }
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _elapsed_ms: u64) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Console progress reporter that logs progress
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            if let Some(eta) = update.eta_ms {
                log::info!(
                    "[{}%] {} ({}ms elapsed, ~{}ms remaining)",
                    update.progress,
                    update.description,
                    update.elapsed_ms,
                    eta
                );
            } else {
                log::info!(
                    "[{}%] {} ({}ms elapsed)",
                    update.progress,
                    update.description,
                    update.elapsed_ms
                );
            }
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, elapsed_ms: u64) {
        log::info!("✅ Completed in {}ms", elapsed_ms);
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }

    fn report_batch_progress(&self, update: BatchProgressUpdate) {
        log::info!(
            "📁 {}/{} files ({} failed, {:.1} files/sec) {}",
            update.stats.items_completed,
            update.stats.items_total,
            update.stats.items_failed,
            update.stats.processing_rate,
            update.stats.current_item_name
        );
    }
}

/// Frame counters of a running video job
///
/// Counters only grow, apart from the in-flight gauge. Cloning is not supported; share it behind an `Arc`.
#[derive(Debug)]
pub struct JobProgress {
    extracted: AtomicU64,
    processed: AtomicU64,
    reassembled: AtomicU64,
    failed: AtomicU64,
    /// Frames holding a slot of the in-flight window
    in_flight: AtomicU64,
    /// Expected frame count plus one; zero means unknown
    expected: AtomicU64,
    failed_indices: Mutex<Vec<u64>>,
    started: Instant,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl JobProgress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extracted: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            reassembled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            expected: AtomicU64::new(0),
            failed_indices: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn set_expected_total(&self, total: Option<u64>) {
        let encoded = total.map_or(0, |t| t.saturating_add(1));
        self.expected.store(encoded, Ordering::Relaxed);
    }

    pub fn record_extracted(&self) {
        self.extracted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame that went through the processor
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a processed frame whose engine call failed
    pub fn record_failed(&self, index: u64) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut indices) = self.failed_indices.lock() {
            indices.push(index);
        }
    }

    pub fn record_reassembled(&self) {
        self.reassembled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_admitted(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_released(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Indices of failed frames in ascending order
    #[must_use]
    pub fn failed_indices(&self) -> Vec<u64> {
        let mut indices = self
            .failed_indices
            .lock()
            .map(|indices| indices.clone())
            .unwrap_or_default();
        indices.sort_unstable();
        indices
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let expected = self.expected.load(Ordering::Relaxed);
        ProgressSnapshot {
            extracted: self.extracted.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            reassembled: self.reassembled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            expected_total: expected.checked_sub(1),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Point-in-time copy of [`JobProgress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub extracted: u64,
    pub processed: u64,
    pub reassembled: u64,
    pub failed: u64,
    /// Frames currently held between extraction and writing; never above the window
    pub in_flight: u64,
    /// Frames the source is expected to yield, when known
    pub expected_total: Option<u64>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Share of expected frames already written, 0-100
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        let total = self.expected_total.filter(|t| *t > 0)?;
        Some(((self.reassembled.min(total) * 100) / total) as u8)
    }

    /// Remaining time extrapolated from the write rate
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        let total = self.expected_total?;
        if self.reassembled == 0 || self.reassembled >= total {
            return None;
        }
        let per_frame = self.elapsed.as_secs_f64() / self.reassembled as f64;
        Some(Duration::from_secs_f64(per_frame * (total - self.reassembled) as f64))
    }

    /// Progress update for [`ProgressReporter`] consumers
    #[must_use]
    pub fn to_update(&self, state: JobState) -> ProgressUpdate {
        let stage = ProcessingStage::for_state(state);
        let mut update = ProgressUpdate {
            stage,
            progress: stage.progress_percentage(),
            description: format!(
                "{} ({} extracted, {} processed, {} written, {} failed)",
                stage.description(),
                self.extracted,
                self.processed,
                self.reassembled,
                self.failed
            ),
            elapsed_ms: self.elapsed.as_millis() as u64,
            eta_ms: None,
        };
        if let Some(percent) = self.percent() {
            update.progress = percent;
        }
        match self.eta() {
            Some(eta) => update.with_eta(eta.as_millis() as u64),
            None => update,
        }
    }
}

/// Receives notifications from a running video job
///
/// Callbacks run on pipeline threads and must not block.
pub trait JobObserver: Send + Sync {
    /// The job entered `state`; called once per state
    fn on_state_change(&self, state: JobState) {
        let _ = state;
    }

    /// Counters changed
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let _ = snapshot;
    }

    /// The engine failed on frame `index`; a placeholder was substituted
    fn on_frame_failed(&self, index: u64, reason: &str) {
        let _ = (index, reason);
    }

    /// Terminal notification, sent exactly once
    fn on_finished(&self, outcome: &JobOutcome) {
        let _ = outcome;
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl JobObserver for NoOpObserver {}

/// Observer that writes lifecycle events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl JobObserver for LoggingObserver {
    fn on_state_change(&self, state: JobState) {
        log::info!("Job state: {}", state);
    }

    fn on_frame_failed(&self, index: u64, reason: &str) {
        log::warn!("⚠️ Frame {} kept as placeholder: {}", index, reason);
    }

    fn on_finished(&self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed(summary) => log::info!(
                "✅ Wrote {} frames to {} in {:.1}s ({} failed)",
                summary.progress.reassembled,
                summary.output.display(),
                summary.elapsed.as_secs_f64(),
                summary.progress.failed
            ),
            JobOutcome::Cancelled(_) => log::info!("Job cancelled"),
            JobOutcome::Failed { kind, message } => {
                log::error!("❌ Job failed ({:?}): {}", kind, message);
            },
        }
    }
}

/// Event forwarded by [`ChannelObserver`]
#[derive(Debug, Clone)]
pub enum JobEvent {
    State(JobState),
    Progress(ProgressSnapshot),
    FrameFailed { index: u64, reason: String },
    Finished(JobOutcome),
}

/// Observer forwarding events into a channel
///
/// Lets a presentation layer consume events on its own task. Sends never
/// block; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelObserver {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl JobObserver for ChannelObserver {
    fn on_state_change(&self, state: JobState) {
        let _ = self.sender.send(JobEvent::State(state));
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let _ = self.sender.send(JobEvent::Progress(*snapshot));
    }

    fn on_frame_failed(&self, index: u64, reason: &str) {
        let _ = self.sender.send(JobEvent::FrameFailed {
            index,
            reason: reason.to_string(),
        });
    }

    fn on_finished(&self, outcome: &JobOutcome) {
        let _ = self.sender.send(JobEvent::Finished(outcome.clone()));
    }
}

/// Observer that drives a [`ProgressReporter`] from job events
///
/// Progress is forwarded on state changes and whenever the written share
/// moves by a whole percent.
pub struct ReporterObserver<R> {
    reporter: R,
    last: Mutex<(JobState, Option<u8>)>,
}

impl<R: ProgressReporter> ReporterObserver<R> {
    #[must_use]
    pub fn new(reporter: R) -> Self {
        Self {
            reporter,
            last: Mutex::new((JobState::Idle, None)),
        }
    }

    fn state(&self) -> JobState {
        self.last.lock().map(|last| last.0).unwrap_or(JobState::Idle)
    }
}

impl<R: ProgressReporter> JobObserver for ReporterObserver<R> {
    fn on_state_change(&self, state: JobState) {
        if let Ok(mut last) = self.last.lock() {
            *last = (state, None);
        }
        if !state.is_terminal() {
            self.reporter
                .report_progress(ProgressUpdate::new(ProcessingStage::for_state(state), Instant::now()));
        }
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let state = {
            let Ok(mut last) = self.last.lock() else {
                return;
            };
            let percent = snapshot.percent();
            if percent.is_none() || percent == last.1 {
                return;
            }
            last.1 = percent;
            last.0
        };
        self.reporter.report_progress(snapshot.to_update(state));
    }

    fn on_frame_failed(&self, index: u64, reason: &str) {
        self.reporter.report_error(
            ProcessingStage::FrameProcessing,
            &format!("frame {} kept as placeholder: {}", index, reason),
        );
    }

    fn on_finished(&self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed(summary) => {
                self.reporter
                    .report_completion(summary.elapsed.as_millis() as u64);
            },
            JobOutcome::Cancelled(_) => {},
            JobOutcome::Failed { message, .. } => {
                self.reporter
                    .report_error(ProcessingStage::for_state(self.state()), message);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct MockReporter {
        updates: Arc<Mutex<Vec<ProgressUpdate>>>,
        errors: Arc<Mutex<Vec<(ProcessingStage, String)>>>,
    }

    impl MockReporter {
        fn new() -> Self {
            Self {
                updates: Arc::new(Mutex::new(Vec::new())),
                errors: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ProgressReporter for MockReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update);
        }

        fn report_completion(&self, _elapsed_ms: u64) {}

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_processing_stage_descriptions() {
        assert_eq!(
            ProcessingStage::FrameExtraction.description(),
            "Extracting video frames"
        );
        assert_eq!(ProcessingStage::Completed.progress_percentage(), 100);
        assert_eq!(
            ProcessingStage::for_state(JobState::Processing),
            ProcessingStage::FrameProcessing
        );
    }

    #[test]
    fn test_progress_update_creation() {
        let start = Instant::now();
        let update = ProgressUpdate::new(ProcessingStage::VideoAnalysis, start).with_eta(500);
        assert_eq!(update.progress, 5);
        assert_eq!(update.eta_ms, Some(500));
        assert_eq!(update.with_progress(150).progress, 100);
    }

    #[test]
    fn test_default_batch_progress_forwards() {
        let reporter = MockReporter::new();
        reporter.report_batch_progress(BatchProgressUpdate {
            total_progress: ProgressUpdate::new(ProcessingStage::BatchItemProcessing, Instant::now()),
            stats: BatchProcessingStats {
                items_completed: 1,
                items_total: 2,
                items_failed: 0,
                current_item_name: "a.png".to_string(),
                processing_rate: 1.0,
                eta_seconds: None,
            },
        });
        reporter.report_error(ProcessingStage::BatchItemProcessing, "boom");
        assert_eq!(reporter.updates.lock().unwrap().len(), 1);
        assert_eq!(reporter.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_job_progress_counters() {
        let progress = JobProgress::new();
        assert_eq!(progress.snapshot().expected_total, None);

        progress.set_expected_total(Some(4));
        for _ in 0..4 {
            progress.record_extracted();
            progress.record_processed();
        }
        progress.record_failed(3);
        progress.record_failed(1);
        progress.record_reassembled();
        progress.record_reassembled();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.extracted, 4);
        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.reassembled, 2);
        assert_eq!(snapshot.expected_total, Some(4));
        assert_eq!(snapshot.percent(), Some(50));
        assert_eq!(progress.failed_indices(), vec![1, 3]);
    }

    #[test]
    fn test_expected_total_of_zero_is_known() {
        let progress = JobProgress::new();
        progress.set_expected_total(Some(0));
        assert_eq!(progress.snapshot().expected_total, Some(0));
        assert_eq!(progress.snapshot().percent(), None);
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_events() {
        let (observer, mut events) = ChannelObserver::new();
        observer.on_state_change(JobState::Extracting);
        observer.on_frame_failed(7, "engine error");
        drop(observer);

        assert!(matches!(events.recv().await, Some(JobEvent::State(JobState::Extracting))));
        match events.recv().await {
            Some(JobEvent::FrameFailed { index, reason }) => {
                assert_eq!(index, 7);
                assert_eq!(reason, "engine error");
            },
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.recv().await.is_none());
    }

    #[test]
    fn test_reporter_observer_throttles_by_percent() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let observer = ReporterObserver::new(MockReporter {
            updates: updates.clone(),
            errors: errors.clone(),
        });

        observer.on_state_change(JobState::Processing);
        let mut snapshot = ProgressSnapshot {
            expected_total: Some(200),
            ..ProgressSnapshot::default()
        };
        for written in [1, 2, 3, 4] {
            snapshot.reassembled = written;
            observer.on_progress(&snapshot);
        }
        observer.on_frame_failed(2, "engine error");
        observer.on_finished(&JobOutcome::Failed {
            kind: crate::error::ErrorKind::EncodeError,
            message: "disk full".to_string(),
        });

        // State change, then 0%, 1% and 2%
        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 4);
        assert!(updates.iter().all(|u| u.stage == ProcessingStage::FrameProcessing));
        assert_eq!(updates.last().unwrap().progress, 2);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1], (ProcessingStage::FrameProcessing, "disk full".to_string()));
    }
}
