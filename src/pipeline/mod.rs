//! Streaming video pipeline stages
//!
//! Frames flow extractor → processor pool → reassembler through bounded
//! channels. Each frame holds a permit of the in-flight window from the
//! moment it is extracted until it has been written, so the extractor
//! blocks once the window is full.

pub mod extractor;
pub mod processor;
pub mod reassembler;

pub use extractor::FrameExtractor;
pub use processor::FrameProcessor;
pub use reassembler::{ReassemblyReport, ReorderBuffer, StagedOutput, VideoReassembler};

use crate::controller::state::StateTracker;
use crate::services::progress::{JobObserver, JobProgress};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

/// Shared by all stages of one job
pub(crate) struct StageContext {
    pub(crate) progress: Arc<JobProgress>,
    pub(crate) state: Arc<StateTracker>,
    pub(crate) observer: Arc<dyn JobObserver>,
    /// Cancelled on user cancellation or when any stage fails
    pub(crate) stop: CancellationToken,
    progress_gate: Mutex<()>,
}

impl StageContext {
    pub(crate) fn new(
        progress: Arc<JobProgress>,
        state: Arc<StateTracker>,
        observer: Arc<dyn JobObserver>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            progress,
            state,
            observer,
            stop,
            progress_gate: Mutex::new(()),
        }
    }

    /// Send the current counters to the observer
    ///
    /// Snapshot and delivery happen under one lock, so the observer sees
    /// every counter in non-decreasing order across stage threads.
    pub(crate) fn emit_progress(&self) {
        let _gate = self.progress_gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.observer.on_progress(&self.progress.snapshot());
    }
}

/// One permit of the in-flight window, counted in [`JobProgress`]
pub(crate) struct WindowSlot {
    progress: Arc<JobProgress>,
    _permit: OwnedSemaphorePermit,
}

impl WindowSlot {
    pub(crate) fn new(permit: OwnedSemaphorePermit, progress: Arc<JobProgress>) -> Self {
        progress.record_admitted();
        Self {
            progress,
            _permit: permit,
        }
    }
}

impl Drop for WindowSlot {
    fn drop(&mut self) {
        // Runs before the permit field is released
        self.progress.record_released();
    }
}

/// An item holding one slot of the in-flight window
pub(crate) struct InFlight<T> {
    item: T,
    slot: WindowSlot,
}

impl<T> InFlight<T> {
    pub(crate) fn new(item: T, slot: WindowSlot) -> Self {
        Self { item, slot }
    }

    pub(crate) fn into_parts(self) -> (T, WindowSlot) {
        (self.item, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn test_window_slot_tracks_in_flight() {
        let progress = Arc::new(JobProgress::new());
        let window = Arc::new(Semaphore::new(2));

        let first = WindowSlot::new(window.clone().acquire_owned().await.unwrap(), progress.clone());
        let second = WindowSlot::new(window.clone().acquire_owned().await.unwrap(), progress.clone());
        assert_eq!(progress.snapshot().in_flight, 2);
        assert_eq!(window.available_permits(), 0);

        let (_, slot) = InFlight::new("frame", first).into_parts();
        drop(slot);
        assert_eq!(progress.snapshot().in_flight, 1);
        assert_eq!(window.available_permits(), 1);

        drop(second);
        assert_eq!(progress.snapshot().in_flight, 0);
        assert_eq!(window.available_permits(), 2);
    }
}
