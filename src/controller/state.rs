//! Job lifecycle states

use crate::services::progress::JobObserver;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a video job
///
/// `Idle → Extracting → Processing → Reassembling → Completed`, with
/// `Cancelled` and `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Extracting,
    Processing,
    Reassembling,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Extracting => 1,
            Self::Processing => 2,
            Self::Reassembling => 3,
            Self::Completed | Self::Cancelled | Self::Failed => 4,
        }
    }

    /// Whether a job in this state may move to `next`
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Cancelled | Self::Failed => true,
            Self::Completed => self == Self::Reassembling,
            _ => next.rank() == self.rank() + 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Processing => "processing",
            Self::Reassembling => "reassembling",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only holder of a job's state
///
/// Publishes every accepted transition on a watch channel and to the
/// observer, so each state is seen at most once.
pub(crate) struct StateTracker {
    sender: watch::Sender<JobState>,
    observer: Arc<dyn JobObserver>,
}

impl StateTracker {
    pub(crate) fn new(observer: Arc<dyn JobObserver>) -> (Self, watch::Receiver<JobState>) {
        let (sender, receiver) = watch::channel(JobState::Idle);
        (Self { sender, observer }, receiver)
    }

    /// Move to `next`; returns false when the transition is not allowed
    pub(crate) fn advance(&self, next: JobState) -> bool {
        let changed = self.sender.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(state = %next, "job state changed");
            self.observer.on_state_change(next);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::progress::NoOpObserver;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<JobState>>);

    impl JobObserver for Recorder {
        fn on_state_change(&self, state: JobState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(JobState::Idle.can_transition_to(JobState::Extracting));
        assert!(JobState::Extracting.can_transition_to(JobState::Processing));
        assert!(JobState::Processing.can_transition_to(JobState::Reassembling));
        assert!(JobState::Reassembling.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!JobState::Idle.can_transition_to(JobState::Processing));
        assert!(!JobState::Processing.can_transition_to(JobState::Extracting));
        assert!(!JobState::Processing.can_transition_to(JobState::Completed));
        assert!(!JobState::Extracting.can_transition_to(JobState::Idle));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobState::Completed, JobState::Cancelled, JobState::Failed] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobState::Failed));
            assert!(!terminal.can_transition_to(JobState::Cancelled));
        }
        for state in [JobState::Idle, JobState::Extracting, JobState::Processing, JobState::Reassembling] {
            assert!(state.can_transition_to(JobState::Cancelled));
            assert!(state.can_transition_to(JobState::Failed));
        }
    }

    #[test]
    fn test_tracker_publishes_each_state_once() {
        let recorder = Arc::new(Recorder::default());
        let (tracker, receiver) = StateTracker::new(recorder.clone());

        assert!(tracker.advance(JobState::Extracting));
        assert!(!tracker.advance(JobState::Extracting));
        assert!(tracker.advance(JobState::Processing));
        assert!(tracker.advance(JobState::Cancelled));
        assert!(!tracker.advance(JobState::Failed));

        assert_eq!(*receiver.borrow(), JobState::Cancelled);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![JobState::Extracting, JobState::Processing, JobState::Cancelled]
        );
    }

    #[test]
    fn test_tracker_starts_idle() {
        let (tracker, receiver) = StateTracker::new(Arc::new(NoOpObserver));
        assert_eq!(*receiver.borrow(), JobState::Idle);
        assert!(!tracker.advance(JobState::Completed));
    }
}
