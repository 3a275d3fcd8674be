//! Frame extraction stage

use super::{InFlight, StageContext, WindowSlot};
use crate::backends::video::{Frame, FrameSampler, FrameSource, VideoBackend};
use crate::controller::JobState;
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

/// Lazy, ordered sequence of sampled frames from one source
///
/// Frames are numbered from zero in the order they are kept, and carry the
/// timestamp `index / output_fps`. Decoding stops at the first error.
pub struct FrameExtractor {
    source: Box<dyn FrameSource>,
    sampler: FrameSampler,
    decoded: u64,
    emitted: u64,
    finished: bool,
}

impl FrameExtractor {
    #[must_use]
    pub fn new(source: Box<dyn FrameSource>, sampler: FrameSampler) -> Self {
        Self {
            source,
            sampler,
            decoded: 0,
            emitted: 0,
            finished: false,
        }
    }

    /// Open `path` through `backend`
    ///
    /// # Errors
    /// - [`PipelineError::SourceUnreadable`] when the source cannot be opened
    pub fn open(backend: &dyn VideoBackend, path: &Path, sampler: FrameSampler) -> Result<Self> {
        let source = backend.open_source(path)?;
        Ok(Self::new(source, sampler))
    }

    #[must_use]
    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    /// Frames decoded so far, kept or not
    #[must_use]
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Frames yielded so far
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Iterator for FrameExtractor {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let image = match self.source.next_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    self.finished = true;
                    return None;
                },
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                },
            };

            let position = self.decoded;
            self.decoded += 1;
            if !self.sampler.keeps(position) {
                continue;
            }

            let frame = Frame::new(self.emitted, image, self.sampler.output_fps());
            if let Err(reason) = frame.validate() {
                self.finished = true;
                return Some(Err(PipelineError::source_unreadable(format!(
                    "decoded frame {}: {}",
                    position, reason
                ))));
            }
            self.emitted += 1;
            return Some(Ok(frame));
        }
    }
}

/// Run extraction on a blocking thread, feeding `frames`
///
/// Each frame takes a permit from `window` before it is sent; the permit
/// travels with the frame until it is written. Resolves to the number of
/// frames extracted.
pub(crate) fn spawn_extractor(
    ctx: Arc<StageContext>,
    backend: Arc<dyn VideoBackend>,
    source: PathBuf,
    sampler: FrameSampler,
    window: Arc<Semaphore>,
    frames: mpsc::Sender<InFlight<Frame>>,
) -> JoinHandle<Result<u64>> {
    let runtime = Handle::current();
    let span = tracing::Span::current();

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let extractor = FrameExtractor::open(backend.as_ref(), &source, sampler)?;
        tracing::debug!(step = sampler.step(), fps = sampler.output_fps(), "extraction started");

        let mut count = 0u64;
        for frame in extractor {
            let frame = frame?;
            if ctx.stop.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let permit = runtime.block_on(async {
                tokio::select! {
                    biased;
                    () = ctx.stop.cancelled() => None,
                    permit = window.clone().acquire_owned() => permit.ok(),
                }
            });
            let Some(permit) = permit else {
                return Err(PipelineError::Cancelled);
            };
            let slot = WindowSlot::new(permit, ctx.progress.clone());

            if frame.index == 0 {
                ctx.state.advance(JobState::Processing);
            }
            ctx.progress.record_extracted();
            ctx.emit_progress();
            count += 1;

            if frames.blocking_send(InFlight::new(frame, slot)).is_err() {
                // Receiver dropped: the pipeline is shutting down
                return Err(PipelineError::Cancelled);
            }
        }

        tracing::debug!(frames = count, "extraction finished");
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameRate;
    use image::{Rgba, RgbaImage};

    struct VecSource {
        frames: std::vec::IntoIter<RgbaImage>,
        fail_after: Option<usize>,
        served: usize,
    }

    impl VecSource {
        fn new(count: u8) -> Self {
            let frames: Vec<RgbaImage> = (0..count)
                .map(|i| RgbaImage::from_pixel(2, 2, Rgba([i, 0, 0, 255])))
                .collect();
            Self {
                frames: frames.into_iter(),
                fail_after: None,
                served: 0,
            }
        }
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            if self.fail_after == Some(self.served) {
                return Err(PipelineError::source_unreadable("corrupt packet"));
            }
            self.served += 1;
            Ok(self.frames.next())
        }
    }

    #[test]
    fn test_native_rate_keeps_every_frame() {
        let sampler = FrameSampler::new(FrameRate::Native, 10.0);
        let frames: Vec<Frame> = FrameExtractor::new(Box::new(VecSource::new(5)), sampler)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.index, i as u64);
            assert_eq!(frame.image.get_pixel(0, 0)[0], i as u8);
        }
        assert!((frames[4].timestamp_seconds() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_rate_samples_and_renumbers() {
        let sampler = FrameSampler::new(FrameRate::Explicit(10.0), 30.0);
        let mut extractor = FrameExtractor::new(Box::new(VecSource::new(9)), sampler);
        let frames: Vec<Frame> = extractor.by_ref().collect::<Result<_>>().unwrap();

        let kept: Vec<u8> = frames.iter().map(|f| f.image.get_pixel(0, 0)[0]).collect();
        assert_eq!(kept, vec![0, 3, 6]);
        assert_eq!(frames.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!((frames[2].timestamp_seconds() - 0.2).abs() < 1e-9);
        assert_eq!(extractor.decoded(), 9);
        assert_eq!(extractor.emitted(), 3);
    }

    #[test]
    fn test_decode_error_ends_sequence() {
        let mut source = VecSource::new(5);
        source.fail_after = Some(2);
        let mut extractor =
            FrameExtractor::new(Box::new(source), FrameSampler::new(FrameRate::Native, 10.0));
        assert!(extractor.next().unwrap().is_ok());
        assert!(extractor.next().unwrap().is_ok());
        assert!(matches!(
            extractor.next(),
            Some(Err(PipelineError::SourceUnreadable(_)))
        ));
        assert!(extractor.next().is_none());
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let mut extractor = FrameExtractor::new(
            Box::new(VecSource::new(0)),
            FrameSampler::new(FrameRate::Native, 25.0),
        );
        assert!(extractor.next().is_none());
    }
}
