//! Deterministic in-process engine for tests, benchmarks and dry runs
//!
//! [`MockRemover`] keeps the pixels inside a foreground rectangle and makes
//! everything else fully transparent. Failures, panics, wrong-size outputs
//! and per-call delays can be scheduled by call number.

use super::BackgroundRemover;
use crate::config::RemovalParams;
use crate::error::{PipelineError, Result};
use image::{Rgba, RgbaImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Region kept as foreground, in fractions of the frame size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForegroundRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl ForegroundRect {
    /// The centered half of the frame
    pub const CENTER: Self = Self {
        left: 0.25,
        top: 0.25,
        right: 0.75,
        bottom: 0.75,
    };

    /// Whether pixel `(x, y)` of a `width x height` frame is foreground
    #[must_use]
    pub fn contains(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        let fx = (x as f32 + 0.5) / width as f32;
        let fy = (y as f32 + 0.5) / height as f32;
        fx >= self.left && fx < self.right && fy >= self.top && fy < self.bottom
    }
}

#[derive(Debug, Clone, Default)]
enum FailureSchedule {
    #[default]
    Never,
    Always,
    /// Every `n`-th call fails (calls counted from one)
    Every(u64),
    /// Listed call numbers (counted from zero) fail
    Calls(HashSet<u64>),
}

impl FailureSchedule {
    fn fails(&self, call: u64) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Every(n) => *n > 0 && (call + 1) % n == 0,
            Self::Calls(calls) => calls.contains(&call),
        }
    }
}

/// Mock background-removal engine
#[derive(Debug, Clone)]
pub struct MockRemover {
    foreground: ForegroundRect,
    failures: FailureSchedule,
    panic_on: HashSet<u64>,
    wrong_size_on: HashSet<u64>,
    delays: Vec<Duration>,
    calls: Arc<AtomicU64>,
}

impl Default for MockRemover {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemover {
    #[must_use]
    pub fn new() -> Self {
        Self {
            foreground: ForegroundRect::CENTER,
            failures: FailureSchedule::Never,
            panic_on: HashSet::new(),
            wrong_size_on: HashSet::new(),
            delays: Vec::new(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn with_foreground(mut self, foreground: ForegroundRect) -> Self {
        self.foreground = foreground;
        self
    }

    /// Fail every call
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failures = FailureSchedule::Always;
        self
    }

    /// Fail every `n`-th call
    #[must_use]
    pub fn failing_every(mut self, n: u64) -> Self {
        self.failures = FailureSchedule::Every(n);
        self
    }

    /// Fail the listed call numbers, counted from zero
    #[must_use]
    pub fn failing_calls<I: IntoIterator<Item = u64>>(mut self, calls: I) -> Self {
        self.failures = FailureSchedule::Calls(calls.into_iter().collect());
        self
    }

    /// Panic on the listed call numbers
    #[must_use]
    pub fn panicking_calls<I: IntoIterator<Item = u64>>(mut self, calls: I) -> Self {
        self.panic_on = calls.into_iter().collect();
        self
    }

    /// Return a half-size image on the listed call numbers
    #[must_use]
    pub fn wrong_size_calls<I: IntoIterator<Item = u64>>(mut self, calls: I) -> Self {
        self.wrong_size_on = calls.into_iter().collect();
        self
    }

    /// Sleep before answering; call `n` waits `delays[n % len]`
    #[must_use]
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    /// Number of calls made so far, shared between clones
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Opaque white foreground on black, as engines return for mask-only output
    fn mask_only(&self, image: &RgbaImage) -> RgbaImage {
        let (width, height) = image.dimensions();
        RgbaImage::from_fn(width, height, |x, y| {
            if self.foreground.contains(x, y, width, height) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    fn mask(&self, image: &RgbaImage) -> RgbaImage {
        let (width, height) = image.dimensions();
        let mut output = image.clone();
        for (x, y, pixel) in output.enumerate_pixels_mut() {
            if !self.foreground.contains(x, y, width, height) {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        }
        output
    }
}

impl BackgroundRemover for MockRemover {
    fn name(&self) -> &str {
        "mock"
    }

    fn remove(&self, image: &RgbaImage, params: &RemovalParams) -> Result<RgbaImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delays.is_empty() {
            let delay = self
                .delays
                .get((call % self.delays.len() as u64) as usize)
                .copied()
                .unwrap_or_default();
            std::thread::sleep(delay);
        }

        if self.panic_on.contains(&call) {
            panic!("mock engine panicked on call {}", call);
        }
        if self.failures.fails(call) {
            return Err(PipelineError::adapter(format!(
                "simulated failure on call {}",
                call
            )));
        }
        if self.wrong_size_on.contains(&call) {
            let (width, height) = image.dimensions();
            return Ok(RgbaImage::new((width / 2).max(1), (height / 2).max(1)));
        }

        if params.only_mask {
            return Ok(self.mask_only(image));
        }
        Ok(self.mask(image))
    }
}
