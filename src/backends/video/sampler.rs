//! Frame-rate sampling for extraction

use crate::config::FrameRate;

/// Decides which decoded frames are kept and the rate they are written at
///
/// With an explicit target rate every `step`-th decoded frame is kept, where
/// `step = max(1, floor(native / target))`, and output runs at the target
/// rate. With the native rate every frame is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSampler {
    step: u64,
    output_fps: f64,
}

impl FrameSampler {
    #[must_use]
    pub fn new(rate: FrameRate, native_fps: f64) -> Self {
        match rate {
            FrameRate::Native => Self {
                step: 1,
                output_fps: native_fps,
            },
            FrameRate::Explicit(target) => {
                let step = (native_fps / target).floor();
                let step = if step.is_finite() && step >= 1.0 {
                    step as u64
                } else {
                    1
                };
                Self {
                    step,
                    output_fps: target,
                }
            },
        }
    }

    /// Whether the frame at decode position `decoded_index` is kept
    #[must_use]
    pub fn keeps(&self, decoded_index: u64) -> bool {
        decoded_index % self.step == 0
    }

    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Rate the kept frames are written at
    #[must_use]
    pub fn output_fps(&self) -> f64 {
        self.output_fps
    }

    /// Number of kept frames out of `decoded` decoded frames
    #[must_use]
    pub fn kept_count(&self, decoded: u64) -> u64 {
        decoded.div_ceil(self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_keeps_everything() {
        let sampler = FrameSampler::new(FrameRate::Native, 29.97);
        assert_eq!(sampler.step(), 1);
        assert!((0..100).all(|i| sampler.keeps(i)));
        assert!((sampler.output_fps() - 29.97).abs() < f64::EPSILON);
    }

    #[test]
    fn test_explicit_rate_steps() {
        let sampler = FrameSampler::new(FrameRate::Explicit(10.0), 30.0);
        assert_eq!(sampler.step(), 3);
        assert!(sampler.keeps(0));
        assert!(!sampler.keeps(1));
        assert!(sampler.keeps(3));
        assert_eq!(sampler.kept_count(30), 10);
        assert_eq!(sampler.kept_count(31), 11);
        assert!((sampler.output_fps() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_explicit_rate_above_native() {
        let sampler = FrameSampler::new(FrameRate::Explicit(60.0), 24.0);
        assert_eq!(sampler.step(), 1);
        assert_eq!(sampler.kept_count(24), 24);
    }

    #[test]
    fn test_non_integer_ratio_floors() {
        let sampler = FrameSampler::new(FrameRate::Explicit(12.0), 30.0);
        assert_eq!(sampler.step(), 2);
    }
}
