//! Per-frame background removal

use crate::adapter::BackgroundRemover;
use crate::backends::video::{Frame, ProcessedFrame};
use crate::compositing::{apply_background, placeholder};
use crate::config::{BackgroundSpec, FailurePolicy, RemovalParams, VideoJobConfig};
use crate::error::{PipelineError, Result};
use instant::Instant;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Applies the engine to single frames
///
/// Engine errors, panics and wrong-size results never escape: the frame is
/// marked failed and replaced according to the failure policy. Either way
/// the configured background is composited under the result.
#[derive(Clone)]
pub struct FrameProcessor {
    adapter: Arc<dyn BackgroundRemover>,
    params: Arc<RemovalParams>,
    background: BackgroundSpec,
    policy: FailurePolicy,
}

impl FrameProcessor {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn BackgroundRemover>,
        params: RemovalParams,
        background: BackgroundSpec,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            adapter,
            params: Arc::new(params),
            background,
            policy,
        }
    }

    #[must_use]
    pub fn from_config(adapter: Arc<dyn BackgroundRemover>, config: &VideoJobConfig) -> Self {
        Self::new(
            adapter,
            config.removal.clone(),
            config.background,
            config.failure_policy,
        )
    }

    /// Process one frame on the calling thread
    #[must_use]
    pub fn process_frame(&self, frame: Frame) -> ProcessedFrame {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.adapter.remove(&frame.image, &self.params)
        }));

        let result = match outcome {
            Ok(Ok(image)) if image.dimensions() == frame.dimensions() => Ok(image),
            Ok(Ok(image)) => Err(format!(
                "engine returned {}x{} for a {}x{} frame",
                image.width(),
                image.height(),
                frame.image.width(),
                frame.image.height()
            )),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("engine panicked: {}", panic_message(payload.as_ref()))),
        };

        match result {
            Ok(mut image) => {
                apply_background(&mut image, &self.background);
                tracing::trace!(
                    frame = frame.index,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "frame processed"
                );
                ProcessedFrame::succeeded(&frame, image)
            },
            Err(reason) => {
                tracing::warn!(frame = frame.index, %reason, "background removal failed, substituting placeholder");
                let mut image = placeholder(&frame.image, self.policy);
                apply_background(&mut image, &self.background);
                ProcessedFrame::failed(&frame, image, reason)
            },
        }
    }

    /// Process one frame on the blocking pool
    ///
    /// # Errors
    /// - [`PipelineError::Internal`] if the blocking task could not complete
    pub async fn process(&self, frame: Frame) -> Result<ProcessedFrame> {
        let processor = self.clone();
        tokio::task::spawn_blocking(move || processor.process_frame(frame))
            .await
            .map_err(|e| PipelineError::internal(format!("frame task failed: {}", e)))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockRemover;
    use crate::backends::video::FrameStatus;
    use image::{Rgba, RgbaImage};

    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn processor(mock: MockRemover, background: BackgroundSpec, policy: FailurePolicy) -> FrameProcessor {
        FrameProcessor::new(Arc::new(mock), RemovalParams::default(), background, policy)
    }

    fn red_frame(index: u64) -> Frame {
        Frame::new(index, RgbaImage::from_pixel(8, 8, RED), 10.0)
    }

    #[test]
    fn test_success_composites_background() {
        let processed = processor(MockRemover::new(), BackgroundSpec::Color(GREEN), FailurePolicy::default())
            .process_frame(red_frame(3));
        assert_eq!(processed.index, 3);
        assert_eq!(processed.status, FrameStatus::Succeeded);
        assert_eq!(processed.image.get_pixel(0, 0), &GREEN);
        assert_eq!(processed.image.get_pixel(4, 4), &RED);
    }

    #[test]
    fn test_transparent_background_keeps_alpha() {
        let processed = processor(MockRemover::new(), BackgroundSpec::Transparent, FailurePolicy::default())
            .process_frame(red_frame(0));
        assert_eq!(processed.image.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_failure_substitutes_original() {
        let processed = processor(
            MockRemover::new().failing(),
            BackgroundSpec::Color(GREEN),
            FailurePolicy::SubstituteOriginal,
        )
        .process_frame(red_frame(1));
        assert!(processed.status.is_failed());
        assert!(processed.image.pixels().all(|p| *p == RED));
    }

    #[test]
    fn test_failure_substitutes_blank() {
        let processed = processor(
            MockRemover::new().failing(),
            BackgroundSpec::Color(GREEN),
            FailurePolicy::SubstituteBlank,
        )
        .process_frame(red_frame(1));
        assert!(processed.status.is_failed());
        assert!(processed.image.pixels().all(|p| *p == GREEN));
    }

    #[test]
    fn test_panic_is_a_frame_failure() {
        let processed = processor(
            MockRemover::new().panicking_calls([0]),
            BackgroundSpec::default(),
            FailurePolicy::default(),
        )
        .process_frame(red_frame(0));
        match processed.status {
            FrameStatus::Failed { reason } => assert!(reason.contains("panicked")),
            FrameStatus::Succeeded => panic!("panic should fail the frame"),
        }
    }

    #[test]
    fn test_wrong_size_is_a_frame_failure() {
        let processed = processor(
            MockRemover::new().wrong_size_calls([0]),
            BackgroundSpec::default(),
            FailurePolicy::default(),
        )
        .process_frame(red_frame(0));
        assert!(processed.status.is_failed());
        assert_eq!(processed.image.dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn test_async_process() {
        let processed = processor(MockRemover::new(), BackgroundSpec::default(), FailurePolicy::default())
            .process(red_frame(9))
            .await
            .unwrap();
        assert_eq!(processed.index, 9);
        assert!((processed.timestamp.as_secs_f64() - 0.9).abs() < 1e-9);
    }
}
