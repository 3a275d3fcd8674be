//! Job configuration
//!
//! Parameters arrive either through [`VideoJobConfig::builder`] or as a JSON
//! document ([`JobParams`]). Both paths end in [`VideoJobConfigBuilder::build`],
//! which validates everything once so a running job never sees a bad value.

use crate::backends::video::{PixelFormat, QualityPreset, VideoCodec, VideoEncodingConfig, VideoFormat};
use crate::error::{PipelineError, Result};
use crate::models::ModelName;
use image::Rgba;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Highest explicit frame rate accepted
pub const MAX_FPS: f64 = 120.0;

/// Background color used when none is configured
pub const DEFAULT_BG_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Largest accepted video source
pub const MAX_VIDEO_SIZE_MB: u64 = 1000;

/// Largest accepted still image
pub const MAX_IMAGE_SIZE_MB: u64 = 100;

/// In-flight frames allowed per worker when no window is configured
const WINDOW_PER_WORKER: usize = 2;

/// Rate at which frames are extracted and written
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FrameRate {
    /// Keep every decoded frame and write at the source rate
    #[default]
    Native,
    /// Sample to this rate (frames per second)
    Explicit(f64),
}

impl FrameRate {
    pub fn validate(&self) -> Result<()> {
        if let Self::Explicit(fps) = *self {
            if !(fps.is_finite() && fps > 0.0 && fps <= MAX_FPS) {
                return Err(PipelineError::config_value_error(
                    "fps",
                    fps,
                    "greater than 0 and at most 120",
                    Some(30.0),
                ));
            }
        }
        Ok(())
    }
}

/// What replaces the removed background
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackgroundSpec {
    /// Keep the alpha channel
    Transparent,
    /// Composite over a solid color
    Color(Rgba<u8>),
}

impl BackgroundSpec {
    #[must_use]
    pub fn color(&self) -> Option<Rgba<u8>> {
        match self {
            Self::Transparent => None,
            Self::Color(color) => Some(*color),
        }
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        matches!(self, Self::Transparent)
    }
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self::Color(DEFAULT_BG_COLOR)
    }
}

/// Trimap-based edge refinement settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlphaMattingParams {
    pub foreground_threshold: u8,
    pub background_threshold: u8,
    pub erode_size: u8,
}

impl AlphaMattingParams {
    pub const ERODE_RANGE: RangeInclusive<i64> = 1..=50;

    pub fn validate(&self) -> Result<()> {
        if !Self::ERODE_RANGE.contains(&i64::from(self.erode_size)) {
            return Err(PipelineError::config_value_error(
                "alpha_matting_erode_size",
                i64::from(self.erode_size),
                "1-50",
                Some(10),
            ));
        }
        Ok(())
    }
}

impl Default for AlphaMattingParams {
    fn default() -> Self {
        Self {
            foreground_threshold: 240,
            background_threshold: 10,
            erode_size: 10,
        }
    }
}

/// Point prompts for prompt-based models; label 1 marks foreground, 0 background
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointPrompts {
    pub points: Vec<[u32; 2]>,
    pub labels: Vec<u8>,
}

impl PointPrompts {
    pub fn validate(&self) -> Result<()> {
        if self.points.is_empty() {
            return Err(PipelineError::invalid_config(
                "input_points must contain at least one point",
            ));
        }
        if self.points.len() != self.labels.len() {
            return Err(PipelineError::invalid_config(format!(
                "input_points has {} entries but input_labels has {}",
                self.points.len(),
                self.labels.len()
            )));
        }
        if let Some(label) = self.labels.iter().find(|label| **label > 1) {
            return Err(PipelineError::config_value_error(
                "input_labels entry",
                *label,
                "0 or 1",
                None,
            ));
        }
        Ok(())
    }
}

/// Parameters forwarded to the background-removal engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemovalParams {
    pub model: ModelName,
    /// Edge refinement; `None` disables alpha matting
    pub alpha_matting: Option<AlphaMattingParams>,
    pub post_process_mask: bool,
    /// Return the grayscale mask instead of the cut-out subject
    pub only_mask: bool,
    /// Color the engine should place behind the subject
    pub bgcolor: Option<Rgba<u8>>,
    pub prompts: Option<PointPrompts>,
}

impl RemovalParams {
    pub fn validate(&self) -> Result<()> {
        if let Some(matting) = &self.alpha_matting {
            matting.validate()?;
        }
        if let Some(prompts) = &self.prompts {
            prompts.validate()?;
            if !self.model.is_prompt_based() {
                return Err(PipelineError::invalid_config(format!(
                    "point prompts need a prompt-based model, {} is not one",
                    self.model
                )));
            }
        }
        Ok(())
    }
}

/// What a frame becomes when the engine fails on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the unprocessed frame
    #[default]
    #[serde(alias = "original")]
    SubstituteOriginal,
    /// Use a fully transparent frame
    #[serde(alias = "blank")]
    SubstituteBlank,
}

/// Validated configuration of a video job
#[derive(Debug, Clone, PartialEq)]
pub struct VideoJobConfig {
    pub frame_rate: FrameRate,
    pub background: BackgroundSpec,
    pub removal: RemovalParams,
    pub encoding: VideoEncodingConfig,
    pub failure_policy: FailurePolicy,
    /// Concurrent engine calls
    pub workers: usize,
    /// Frames allowed between extraction and reassembly
    pub in_flight_window: usize,
    /// Reject sources larger than this many megabytes
    pub max_source_mb: Option<u64>,
}

impl Default for VideoJobConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            frame_rate: FrameRate::Native,
            background: BackgroundSpec::default(),
            removal: RemovalParams {
                bgcolor: Some(DEFAULT_BG_COLOR),
                ..RemovalParams::default()
            },
            encoding: VideoEncodingConfig::default(),
            failure_policy: FailurePolicy::default(),
            workers,
            in_flight_window: workers * WINDOW_PER_WORKER,
            max_source_mb: Some(MAX_VIDEO_SIZE_MB),
        }
    }
}

/// Number of workers used when none is configured
#[must_use]
pub fn default_workers() -> usize {
    num_cpus::get().max(1)
}

impl VideoJobConfig {
    /// Create a builder
    #[must_use]
    pub fn builder() -> VideoJobConfigBuilder {
        VideoJobConfigBuilder::default()
    }

    /// Validate all values
    pub fn validate(&self) -> Result<()> {
        self.frame_rate.validate()?;
        self.removal.validate()?;
        self.encoding.validate()?;

        if self.workers == 0 {
            return Err(PipelineError::config_value_error(
                "workers",
                0,
                "at least 1",
                Some(default_workers()),
            ));
        }
        if self.in_flight_window == 0 {
            return Err(PipelineError::config_value_error(
                "in_flight_window",
                0,
                "at least 1",
                Some(self.workers * WINDOW_PER_WORKER),
            ));
        }
        if self.background.is_transparent() && !self.encoding.pixel_format.supports_transparency() {
            return Err(PipelineError::invalid_config(format!(
                "Transparent background needs an alpha pixel format, codec {} writes {}",
                self.encoding.codec, self.encoding.pixel_format
            )));
        }
        Ok(())
    }
}

/// Builder for [`VideoJobConfig`]
#[derive(Debug, Default)]
pub struct VideoJobConfigBuilder {
    frame_rate: FrameRate,
    background: Option<BackgroundSpec>,
    removal: RemovalParams,
    codec: Option<VideoCodec>,
    quality: Option<u8>,
    preset: Option<QualityPreset>,
    bitrate: Option<u32>,
    failure_policy: FailurePolicy,
    workers: Option<usize>,
    in_flight_window: Option<usize>,
    max_source_mb: Option<Option<u64>>,
}

impl VideoJobConfigBuilder {
    #[must_use]
    pub fn frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Sample to an explicit rate
    #[must_use]
    pub fn fps(self, fps: f64) -> Self {
        self.frame_rate(FrameRate::Explicit(fps))
    }

    #[must_use]
    pub fn background(mut self, background: BackgroundSpec) -> Self {
        self.background = Some(background);
        self
    }

    #[must_use]
    pub fn bgcolor(self, color: Rgba<u8>) -> Self {
        self.background(BackgroundSpec::Color(color))
    }

    #[must_use]
    pub fn transparent(self) -> Self {
        self.background(BackgroundSpec::Transparent)
    }

    #[must_use]
    pub fn model(mut self, model: ModelName) -> Self {
        self.removal.model = model;
        self
    }

    #[must_use]
    pub fn alpha_matting(mut self, params: Option<AlphaMattingParams>) -> Self {
        self.removal.alpha_matting = params;
        self
    }

    #[must_use]
    pub fn post_process_mask(mut self, enabled: bool) -> Self {
        self.removal.post_process_mask = enabled;
        self
    }

    #[must_use]
    pub fn only_mask(mut self, enabled: bool) -> Self {
        self.removal.only_mask = enabled;
        self
    }

    #[must_use]
    pub fn point_prompts(mut self, prompts: Option<PointPrompts>) -> Self {
        self.removal.prompts = prompts;
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: VideoCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    #[must_use]
    pub fn preset(mut self, preset: QualityPreset) -> Self {
        self.preset = Some(preset);
        self
    }

    #[must_use]
    pub fn bitrate(mut self, kbps: u32) -> Self {
        self.bitrate = Some(kbps);
        self
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn in_flight_window(mut self, window: usize) -> Self {
        self.in_flight_window = Some(window);
        self
    }

    /// Size limit for sources; `None` disables the check
    #[must_use]
    pub fn max_source_mb(mut self, limit: Option<u64>) -> Self {
        self.max_source_mb = Some(limit);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<VideoJobConfig> {
        let background = self.background.unwrap_or_default();

        // Transparent output defaults to VP9, the only alpha-capable default
        let codec = self.codec.unwrap_or(if background.is_transparent() {
            VideoCodec::VP9
        } else {
            VideoCodec::H264
        });
        let mut encoding = VideoEncodingConfig::new(codec);
        if let Some(quality) = self.quality {
            encoding = encoding.with_quality(quality);
        }
        if let Some(preset) = self.preset {
            encoding = encoding.with_preset(preset);
        }
        if let Some(kbps) = self.bitrate {
            encoding = encoding.with_bitrate(kbps);
        }
        if background.is_transparent() {
            encoding = encoding.with_pixel_format(PixelFormat::Yuva420p);
        }

        let workers = self.workers.unwrap_or_else(default_workers);
        let in_flight_window = self
            .in_flight_window
            .unwrap_or_else(|| workers.max(1) * WINDOW_PER_WORKER);

        let mut removal = self.removal;
        removal.bgcolor = background.color();

        let config = VideoJobConfig {
            frame_rate: self.frame_rate,
            background,
            removal,
            encoding,
            failure_policy: self.failure_policy,
            workers,
            in_flight_window,
            max_source_mb: self.max_source_mb.unwrap_or(Some(MAX_VIDEO_SIZE_MB)),
        };
        config.validate()?;
        Ok(config)
    }
}

/// A submitted video job: paths plus validated configuration
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub source: PathBuf,
    pub output: PathBuf,
    pub config: VideoJobConfig,
}

impl VideoJob {
    #[must_use]
    pub fn new<S: Into<PathBuf>, O: Into<PathBuf>>(source: S, output: O, config: VideoJobConfig) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            config,
        }
    }

    /// Check paths against the configuration
    ///
    /// Outputs without a recognised video extension are accepted as-is so
    /// backends with their own containers can be used.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;

        if self.source == self.output {
            return Err(PipelineError::invalid_config(
                "Output path must differ from the source path",
            ));
        }

        if let Some(format) = VideoFormat::from_path(&self.output) {
            if !format.is_writable() {
                return Err(PipelineError::invalid_config(format!(
                    "Cannot write {} containers",
                    format.extension()
                )));
            }
            let codec = self.config.encoding.codec;
            if !format.accepts_codec(codec) {
                return Err(PipelineError::invalid_config(format!(
                    "Codec {} cannot be stored in a .{} file",
                    codec,
                    format.extension()
                )));
            }
            if self.config.background.is_transparent()
                && !matches!(format, VideoFormat::WebM | VideoFormat::Mkv)
            {
                return Err(PipelineError::invalid_config(format!(
                    "Transparent video needs a .webm or .mkv output, got .{}",
                    format.extension()
                )));
            }
        }
        Ok(())
    }
}

/// JSON job parameters as submitted by a caller
///
/// Field names follow the removal engine's own parameter names. Numeric
/// fields are kept as raw JSON so that wrong types produce a precise message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobParams {
    /// Number, numeric string, `"native"`, `""` or null
    pub fps: Option<Value>,
    /// `[r, g, b]`, `[r, g, b, a]` or `"transparent"`
    pub bgcolor: Option<Value>,
    pub model: Option<String>,
    pub alpha_matting: Option<bool>,
    pub alpha_matting_foreground_threshold: Option<Value>,
    pub alpha_matting_background_threshold: Option<Value>,
    pub alpha_matting_erode_size: Option<Value>,
    pub post_process_mask: Option<bool>,
    pub only_mask: Option<bool>,
    pub input_points: Option<Value>,
    pub input_labels: Option<Value>,
    pub failure_policy: Option<FailurePolicy>,
    pub workers: Option<usize>,
    pub in_flight_window: Option<usize>,
    pub codec: Option<VideoCodec>,
    pub quality: Option<u8>,
    pub preset: Option<QualityPreset>,
    pub max_source_mb: Option<u64>,
}

impl JobParams {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::invalid_config(format!("Invalid job parameters: {}", e)))
    }

    /// Read and parse a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::file_io_error("read parameters", path, &e))?;
        Self::from_json(&text)
    }

    /// Apply these parameters on top of `builder`
    pub fn apply(self, mut builder: VideoJobConfigBuilder) -> Result<VideoJobConfigBuilder> {
        if let Some(fps) = &self.fps {
            builder = builder.frame_rate(parse_frame_rate(fps)?);
        }
        if let Some(color) = &self.bgcolor {
            builder = builder.background(parse_background(color)?);
        }
        if let Some(model) = self.model {
            builder = builder.model(ModelName::new(model)?);
        }

        let matting_given = self.alpha_matting_foreground_threshold.is_some()
            || self.alpha_matting_background_threshold.is_some()
            || self.alpha_matting_erode_size.is_some();
        let defaults = AlphaMattingParams::default();
        let matting = AlphaMattingParams {
            foreground_threshold: parse_optional_u8(
                "alpha_matting_foreground_threshold",
                self.alpha_matting_foreground_threshold.as_ref(),
                0..=255,
                defaults.foreground_threshold,
            )?,
            background_threshold: parse_optional_u8(
                "alpha_matting_background_threshold",
                self.alpha_matting_background_threshold.as_ref(),
                0..=255,
                defaults.background_threshold,
            )?,
            erode_size: parse_optional_u8(
                "alpha_matting_erode_size",
                self.alpha_matting_erode_size.as_ref(),
                AlphaMattingParams::ERODE_RANGE,
                defaults.erode_size,
            )?,
        };
        match self.alpha_matting {
            Some(true) => builder = builder.alpha_matting(Some(matting)),
            Some(false) => builder = builder.alpha_matting(None),
            None if matting_given => builder = builder.alpha_matting(Some(matting)),
            None => {},
        }

        if let Some(enabled) = self.post_process_mask {
            builder = builder.post_process_mask(enabled);
        }
        if let Some(enabled) = self.only_mask {
            builder = builder.only_mask(enabled);
        }
        match (&self.input_points, &self.input_labels) {
            (None, None) => {},
            (Some(points), Some(labels)) => {
                builder = builder.point_prompts(Some(PointPrompts {
                    points: parse_points(points)?,
                    labels: parse_labels(labels)?,
                }));
            },
            _ => {
                return Err(PipelineError::invalid_config(
                    "input_points and input_labels must be given together",
                ));
            },
        }

        if let Some(policy) = self.failure_policy {
            builder = builder.failure_policy(policy);
        }
        if let Some(workers) = self.workers {
            builder = builder.workers(workers);
        }
        if let Some(window) = self.in_flight_window {
            builder = builder.in_flight_window(window);
        }
        if let Some(codec) = self.codec {
            builder = builder.codec(codec);
        }
        if let Some(quality) = self.quality {
            builder = builder.quality(quality);
        }
        if let Some(preset) = self.preset {
            builder = builder.preset(preset);
        }
        if let Some(limit) = self.max_source_mb {
            builder = builder.max_source_mb(Some(limit));
        }
        Ok(builder)
    }

    /// Validate into a complete configuration
    pub fn into_config(self) -> Result<VideoJobConfig> {
        self.apply(VideoJobConfig::builder())?.build()
    }
}

/// Parse a frame rate as accepted on the command line and in JSON
pub fn parse_frame_rate(value: &Value) -> Result<FrameRate> {
    let rate = match value {
        Value::Null => FrameRate::Native,
        Value::Number(n) => FrameRate::Explicit(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("native") {
                FrameRate::Native
            } else {
                let fps = trimmed.parse::<f64>().map_err(|_| {
                    PipelineError::invalid_config(format!(
                        "fps must be a number or \"native\", got {:?}",
                        s
                    ))
                })?;
                FrameRate::Explicit(fps)
            }
        },
        other => {
            return Err(PipelineError::invalid_config(format!(
                "fps must be a number or \"native\", got {}",
                other
            )));
        },
    };
    rate.validate()?;
    Ok(rate)
}

fn parse_background(value: &Value) -> Result<BackgroundSpec> {
    match value {
        Value::String(s) if s.eq_ignore_ascii_case("transparent") => {
            Ok(BackgroundSpec::Transparent)
        },
        Value::Array(items) if items.len() == 3 || items.len() == 4 => {
            let mut channels = [255u8; 4];
            for (slot, item) in channels.iter_mut().zip(items) {
                *slot = parse_u8("bgcolor channel", item, 0..=255, 255)?;
            }
            Ok(BackgroundSpec::Color(Rgba(channels)))
        },
        other => Err(PipelineError::invalid_config(format!(
            "bgcolor must be [r, g, b], [r, g, b, a] or \"transparent\", got {}",
            other
        ))),
    }
}

fn parse_int(name: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        _ => None,
    };
    parsed.ok_or_else(|| {
        PipelineError::invalid_config(format!("{} must be an integer, got {}", name, value))
    })
}

fn parse_u8(name: &str, value: &Value, range: RangeInclusive<i64>, recommended: u8) -> Result<u8> {
    let n = parse_int(name, value)?;
    if !range.contains(&n) {
        return Err(PipelineError::config_value_error(
            name,
            n,
            &format!("{}-{}", range.start(), range.end()),
            Some(i64::from(recommended)),
        ));
    }
    u8::try_from(n).map_err(|_| PipelineError::config_value_error(name, n, "0-255", None))
}

fn parse_optional_u8(
    name: &str,
    value: Option<&Value>,
    range: RangeInclusive<i64>,
    default: u8,
) -> Result<u8> {
    value.map_or(Ok(default), |v| parse_u8(name, v, range, default))
}

fn parse_points(value: &Value) -> Result<Vec<[u32; 2]>> {
    let items = value
        .as_array()
        .ok_or_else(|| PipelineError::invalid_config("input_points must be a list of [x, y]"))?;
    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([x, y]) => {
                let x = parse_int("input_points x", x)?;
                let y = parse_int("input_points y", y)?;
                match (u32::try_from(x), u32::try_from(y)) {
                    (Ok(x), Ok(y)) => Ok([x, y]),
                    _ => Err(PipelineError::invalid_config(format!(
                        "input_points coordinates must be non-negative, got [{}, {}]",
                        x, y
                    ))),
                }
            },
            _ => Err(PipelineError::invalid_config(format!(
                "input_points entries must be [x, y], got {}",
                item
            ))),
        })
        .collect()
}

fn parse_labels(value: &Value) -> Result<Vec<u8>> {
    let items = value
        .as_array()
        .ok_or_else(|| PipelineError::invalid_config("input_labels must be a list of 0 or 1"))?;
    items
        .iter()
        .map(|item| parse_u8("input_labels entry", item, 0..=1, 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = VideoJobConfig::default();
        assert_eq!(config.frame_rate, FrameRate::Native);
        assert_eq!(config.background, BackgroundSpec::Color(Rgba([0, 255, 0, 255])));
        assert_eq!(config.failure_policy, FailurePolicy::SubstituteOriginal);
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_sets_window_from_workers() {
        let config = VideoJobConfig::builder().workers(3).build().unwrap();
        assert_eq!(config.in_flight_window, 6);

        let config = VideoJobConfig::builder()
            .workers(3)
            .in_flight_window(4)
            .build()
            .unwrap();
        assert_eq!(config.in_flight_window, 4);
    }

    #[test]
    fn test_rejects_negative_erode_size() {
        let err = JobParams::from_json(r#"{"alpha_matting": true, "alpha_matting_erode_size": -1}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);
        assert!(err.to_string().contains("alpha_matting_erode_size"));
    }

    #[test]
    fn test_rejects_erode_size_even_when_matting_disabled() {
        let err = JobParams::from_json(r#"{"alpha_matting": false, "alpha_matting_erode_size": 99}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);
    }

    #[test]
    fn test_rejects_out_of_range_color() {
        let err = JobParams::from_json(r#"{"bgcolor": [256, 0, 0, 0]}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);
        assert!(err.to_string().contains("bgcolor"));
    }

    #[test]
    fn test_rejects_malformed_color_tuple() {
        for json in [
            r#"{"bgcolor": [0, 255]}"#,
            r#"{"bgcolor": "green"}"#,
            r#"{"bgcolor": [0, "x", 0]}"#,
        ] {
            let result = JobParams::from_json(json).unwrap().into_config();
            assert!(result.is_err(), "{} should be rejected", json);
        }
    }

    #[test]
    fn test_rejects_non_numeric_threshold() {
        let err = JobParams::from_json(r#"{"alpha_matting_foreground_threshold": "high"}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(JobParams::from_json(r#"{"alpha_mating": true}"#).is_err());
    }

    #[test]
    fn test_full_params_parse() {
        let config = JobParams::from_json(
            r#"{
                "fps": 12.5,
                "bgcolor": [10, 20, 30],
                "model": "isnet-general-use",
                "alpha_matting": true,
                "alpha_matting_foreground_threshold": 230,
                "alpha_matting_background_threshold": 15,
                "alpha_matting_erode_size": 12,
                "post_process_mask": true,
                "only_mask": true,
                "failure_policy": "blank",
                "workers": 2,
                "codec": "h265",
                "quality": 24
            }"#,
        )
        .unwrap()
        .into_config()
        .unwrap();

        assert_eq!(config.frame_rate, FrameRate::Explicit(12.5));
        assert_eq!(config.background, BackgroundSpec::Color(Rgba([10, 20, 30, 255])));
        assert_eq!(config.removal.bgcolor, Some(Rgba([10, 20, 30, 255])));
        assert_eq!(config.removal.model.as_str(), "isnet-general-use");
        assert_eq!(
            config.removal.alpha_matting,
            Some(AlphaMattingParams {
                foreground_threshold: 230,
                background_threshold: 15,
                erode_size: 12,
            })
        );
        assert!(config.removal.post_process_mask);
        assert!(config.removal.only_mask);
        assert_eq!(config.failure_policy, FailurePolicy::SubstituteBlank);
        assert_eq!(config.workers, 2);
        assert_eq!(config.encoding.codec, VideoCodec::H265);
        assert_eq!(config.encoding.quality, 24);
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate(&Value::Null).unwrap(), FrameRate::Native);
        assert_eq!(parse_frame_rate(&Value::from("native")).unwrap(), FrameRate::Native);
        assert_eq!(parse_frame_rate(&Value::from("")).unwrap(), FrameRate::Native);
        assert_eq!(parse_frame_rate(&Value::from("24")).unwrap(), FrameRate::Explicit(24.0));
        assert!(parse_frame_rate(&Value::from(0)).is_err());
        assert!(parse_frame_rate(&Value::from(121)).is_err());
        assert!(parse_frame_rate(&Value::from("fast")).is_err());
    }

    #[test]
    fn test_transparent_defaults_to_vp9() {
        let config = VideoJobConfig::builder().transparent().build().unwrap();
        assert_eq!(config.encoding.codec, VideoCodec::VP9);
        assert!(config.encoding.pixel_format.supports_transparency());
        assert_eq!(config.removal.bgcolor, None);
    }

    #[test]
    fn test_transparent_with_h264_is_rejected() {
        let err = VideoJobConfig::builder()
            .transparent()
            .codec(VideoCodec::H264)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);
    }

    #[test]
    fn test_point_prompts_validation() {
        let err = JobParams::from_json(r#"{"model": "sam", "input_points": [[1, 2]], "input_labels": [1, 0]}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert!(err.to_string().contains("input_labels"));

        let err = JobParams::from_json(r#"{"model": "sam", "input_points": [[1, 2]], "input_labels": [2]}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);

        let err = JobParams::from_json(r#"{"model": "sam", "input_points": [[1, 2]]}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);

        let config = JobParams::from_json(
            r#"{"model": "sam", "input_points": [[100, 150], [200, 300]], "input_labels": [1, 0]}"#,
        )
        .unwrap()
        .into_config()
        .unwrap();
        assert_eq!(config.removal.prompts.unwrap().points, vec![[100, 150], [200, 300]]);

        let err = JobParams::from_json(r#"{"model": "u2net", "input_points": [[1, 2]], "input_labels": [1]}"#)
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);
        assert!(err.to_string().contains("prompt-based"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(VideoJobConfig::builder().workers(0).build().is_err());
        assert!(VideoJobConfig::builder().in_flight_window(0).build().is_err());
    }

    #[test]
    fn test_job_output_container_checks() {
        let config = VideoJobConfig::default();
        assert!(VideoJob::new("in.mp4", "out.mp4", config.clone()).validate().is_ok());
        assert!(VideoJob::new("in.mp4", "out.webm", config.clone()).validate().is_err());
        assert!(VideoJob::new("in.mp4", "in.mp4", config.clone()).validate().is_err());
        assert!(VideoJob::new("in.mp4", "out.flv", config).validate().is_err());

        let transparent = VideoJobConfig::builder().transparent().build().unwrap();
        assert!(VideoJob::new("in.mp4", "out.webm", transparent.clone()).validate().is_ok());
        assert!(VideoJob::new("in.mp4", "out.mp4", transparent).validate().is_err());
    }
}
