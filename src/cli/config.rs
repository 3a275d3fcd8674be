//! Conversion of CLI arguments into job configuration
//!
//! Flags are layered over an optional JSON params file and then go through
//! the same [`JobParams`] validation as any other caller, so the CLI cannot
//! accept a value the library would reject.

use crate::adapter::RembgCommand;
use crate::batch::BatchSettings;
use crate::cli::main_impl::{RemovalArgs, VideoArgs};
use crate::config::{JobParams, VideoJobConfig};
use crate::models::models_dir;
use anyhow::{Context, Result};
use serde_json::Value;

/// Convert CLI arguments to validated configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Params file plus removal flags
    pub(crate) fn job_params(removal: &RemovalArgs) -> Result<JobParams> {
        let mut params = match &removal.params {
            Some(path) => JobParams::from_file(path)
                .with_context(|| format!("Failed to load parameters from {}", path.display()))?,
            None => JobParams::default(),
        };

        if let Some(model) = &removal.model {
            params.model = Some(model.clone());
        }
        if let Some(color) = &removal.bgcolor {
            params.bgcolor = Some(color_value(color));
        }
        if removal.alpha_matting {
            params.alpha_matting = Some(true);
        }
        if let Some(n) = &removal.foreground_threshold {
            params.alpha_matting_foreground_threshold = Some(flag_value(n));
        }
        if let Some(n) = &removal.background_threshold {
            params.alpha_matting_background_threshold = Some(flag_value(n));
        }
        if let Some(n) = &removal.erode_size {
            params.alpha_matting_erode_size = Some(flag_value(n));
        }
        if removal.post_process_mask {
            params.post_process_mask = Some(true);
        }
        if removal.only_mask {
            params.only_mask = Some(true);
        }
        if !removal.points.is_empty() || !removal.labels.is_empty() {
            let points = removal
                .points
                .iter()
                .map(|point| Value::Array(point.split(',').map(flag_value).collect()))
                .collect();
            let labels = removal.labels.iter().map(|label| flag_value(label)).collect();
            params.input_points = Some(Value::Array(points));
            params.input_labels = Some(Value::Array(labels));
        }
        Ok(params)
    }

    /// Validated video configuration from `args`
    pub(crate) fn video_config(args: &VideoArgs) -> Result<VideoJobConfig> {
        let mut params = Self::job_params(&args.removal)?;

        if let Some(fps) = &args.fps {
            params.fps = Some(Value::String(fps.clone()));
        }
        if let Some(policy) = &args.failure_policy {
            params.failure_policy = Some(
                serde_json::from_value(Value::String(policy.clone()))
                    .with_context(|| format!("Unknown failure policy '{}' (use original or blank)", policy))?,
            );
        }
        if let Some(workers) = args.workers {
            params.workers = Some(workers);
        }
        if let Some(window) = args.window {
            params.in_flight_window = Some(window);
        }
        if let Some(codec) = &args.codec {
            params.codec = Some(
                codec
                    .parse()
                    .with_context(|| format!("Unknown codec '{}'", codec))?,
            );
        }
        if let Some(quality) = args.quality {
            params.quality = Some(quality);
        }
        if let Some(preset) = &args.preset {
            params.preset = Some(
                serde_json::from_value(Value::String(preset.to_lowercase()))
                    .with_context(|| format!("Unknown preset '{}' (use fast, medium or slow)", preset))?,
            );
        }
        if let Some(limit) = args.max_source_mb {
            params.max_source_mb = Some(limit);
        }

        Ok(params.into_config()?)
    }

    /// Image settings from removal flags
    pub(crate) fn batch_settings(
        removal: &RemovalArgs,
        pattern: Option<String>,
        recursive: bool,
        max_image_mb: Option<u64>,
    ) -> Result<BatchSettings> {
        let config = Self::job_params(removal)?.into_config()?;
        let mut settings = BatchSettings {
            removal: config.removal,
            pattern,
            recursive,
            ..BatchSettings::default()
        }
        .with_background(config.background);
        if let Some(limit) = max_image_mb {
            settings.max_image_mb = Some(limit);
        }
        Ok(settings)
    }

    /// Engine adapter for the removal flags
    pub(crate) fn adapter(removal: &RemovalArgs) -> Result<RembgCommand> {
        let models = models_dir().context("Failed to resolve the model directory")?;
        Ok(RembgCommand::new(&removal.rembg).with_models_dir(models))
    }
}

/// A flag value as JSON: numbers stay numbers, anything else becomes a string
fn flag_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_number)
        .unwrap_or_else(|| Value::String(trimmed.to_string()))
}

fn color_value(raw: &str) -> Value {
    if raw.trim().eq_ignore_ascii_case("transparent") {
        Value::String("transparent".to_string())
    } else {
        Value::Array(raw.split(',').map(flag_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundSpec, FrameRate};
    use crate::error::{ErrorKind, PipelineError};
    use image::Rgba;

    fn video_args(extra: &[&str]) -> VideoArgs {
        use clap::Parser;
        let mut argv = vec!["bgremove-studio", "video", "clip.mp4"];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Command::Video(args) => args,
            _ => unreachable!(),
        }
    }

    fn config_error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
        err.downcast_ref::<PipelineError>().map(PipelineError::kind)
    }

    #[test]
    fn test_flag_value() {
        assert_eq!(flag_value(" 12 "), Value::from(12));
        assert_eq!(flag_value("-1"), Value::from(-1));
        assert_eq!(flag_value("abc"), Value::String("abc".to_string()));
        assert_eq!(flag_value("[1]"), Value::String("[1]".to_string()));
    }

    #[test]
    fn test_video_flags_build_config() {
        let args = video_args(&["--fps", "12.5", "--bgcolor", "0,0,255", "-j", "2"]);
        let config = CliConfigBuilder::video_config(&args).unwrap();
        assert_eq!(config.frame_rate, FrameRate::Explicit(12.5));
        assert_eq!(config.background, BackgroundSpec::Color(Rgba([0, 0, 255, 255])));
        assert_eq!(config.removal.bgcolor, Some(Rgba([0, 0, 255, 255])));
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_invalid_flags_are_rejected() {
        let err = CliConfigBuilder::video_config(&video_args(&["--ae=-1"])).unwrap_err();
        assert_eq!(config_error_kind(&err), Some(ErrorKind::ConfigValidation));

        let err = CliConfigBuilder::video_config(&video_args(&["--bgcolor", "256,0,0,0"])).unwrap_err();
        assert_eq!(config_error_kind(&err), Some(ErrorKind::ConfigValidation));

        assert!(CliConfigBuilder::video_config(&video_args(&["--failure-policy", "retry"])).is_err());
    }

    #[test]
    fn test_flags_override_params_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"fps": 30, "model": "u2netp", "workers": 4}"#).unwrap();
        let path_arg = path.to_string_lossy().into_owned();

        let config =
            CliConfigBuilder::video_config(&video_args(&["--params", &path_arg, "--fps", "native"])).unwrap();
        assert_eq!(config.frame_rate, FrameRate::Native);
        assert_eq!(config.removal.model.as_str(), "u2netp");
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_point_prompts() {
        let config = CliConfigBuilder::video_config(&video_args(&[
            "-m", "sam", "--point", "10,20", "--label", "1",
        ]))
        .unwrap();
        let prompts = config.removal.prompts.unwrap();
        assert_eq!(prompts.points, vec![[10, 20]]);
        assert_eq!(prompts.labels, vec![1]);
    }

    #[test]
    fn test_only_mask_flag() {
        let config = CliConfigBuilder::video_config(&video_args(&["--only-mask"])).unwrap();
        assert!(config.removal.only_mask);
        assert!(!config.removal.post_process_mask);
    }

    #[test]
    fn test_transparent_batch_settings() {
        let removal = RemovalArgs {
            bgcolor: Some("transparent".to_string()),
            ..RemovalArgs::default()
        };
        let settings = CliConfigBuilder::batch_settings(&removal, None, false, Some(5)).unwrap();
        assert_eq!(settings.background, BackgroundSpec::Transparent);
        assert_eq!(settings.removal.bgcolor, None);
        assert!(!settings.recursive);
        assert_eq!(settings.max_image_mb, Some(5));
    }
}
