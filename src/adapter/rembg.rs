//! Adapter that shells out to the `rembg` command line tool

use super::BackgroundRemover;
use crate::config::RemovalParams;
use crate::error::{PipelineError, Result};
use crate::models::MODELS_PATH_ENV;
use image::{ImageFormat, RgbaImage};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Lines of stderr kept in failure messages
const STDERR_TAIL_LINES: usize = 5;

/// Runs `rembg i <input> <output>` once per image on temporary PNG files
#[derive(Debug, Clone)]
pub struct RembgCommand {
    program: PathBuf,
    models_dir: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
}

impl Default for RembgCommand {
    fn default() -> Self {
        Self::new("rembg")
    }
}

impl RembgCommand {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            models_dir: None,
            scratch_dir: None,
        }
    }

    /// Directory the tool loads models from (`REMBG_MODELS_PATH`)
    #[must_use]
    pub fn with_models_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.models_dir = Some(dir.into());
        self
    }

    /// Directory for the temporary PNG files; the system temp dir otherwise
    #[must_use]
    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Check that the program can be started
    pub fn check_available(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                PipelineError::adapter(format!(
                    "cannot run '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::adapter(format!(
                "'{} --help' exited with {}",
                self.program.display(),
                status
            )))
        }
    }

    fn scratch_file(&self, prefix: &str) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".png");
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        file.map_err(|e| PipelineError::adapter(format!("cannot create scratch file: {}", e)))
    }
}

/// Command line arguments for `params`, excluding the subcommand and paths
#[must_use]
pub fn command_args(params: &RemovalParams) -> Vec<String> {
    let mut args = vec!["-m".to_string(), params.model.as_str().to_string()];

    if let Some(matting) = &params.alpha_matting {
        args.extend([
            "-a".to_string(),
            "-af".to_string(),
            matting.foreground_threshold.to_string(),
            "-ab".to_string(),
            matting.background_threshold.to_string(),
            "-ae".to_string(),
            matting.erode_size.to_string(),
        ]);
    }

    if params.only_mask {
        args.push("-om".to_string());
    }

    if params.post_process_mask {
        args.push("-ppm".to_string());
    }

    if let Some(color) = params.bgcolor {
        args.push("-bgc".to_string());
        args.extend(color.0.iter().map(u8::to_string));
    }

    if let Some(prompts) = &params.prompts {
        let sam_prompt: Vec<serde_json::Value> = prompts
            .points
            .iter()
            .zip(&prompts.labels)
            .map(|(point, label)| {
                serde_json::json!({ "type": "point", "data": point, "label": label })
            })
            .collect();
        args.push("-x".to_string());
        args.push(serde_json::json!({ "sam_prompt": sam_prompt }).to_string());
    }

    args
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines.get(start..).unwrap_or_default().join(" | ")
}

impl BackgroundRemover for RembgCommand {
    fn name(&self) -> &str {
        "rembg"
    }

    fn remove(&self, image: &RgbaImage, params: &RemovalParams) -> Result<RgbaImage> {
        let input = self.scratch_file("bgr-in-")?;
        let output = self.scratch_file("bgr-out-")?;

        image
            .save_with_format(input.path(), ImageFormat::Png)
            .map_err(|e| PipelineError::adapter(format!("cannot stage input image: {}", e)))?;

        let mut command = Command::new(&self.program);
        command
            .arg("i")
            .args(command_args(params))
            .arg(input.path())
            .arg(output.path())
            .stdin(Stdio::null());
        if let Some(dir) = &self.models_dir {
            command.env(MODELS_PATH_ENV, dir);
        }

        log::debug!(
            "Running {} for a {}x{} image with model {}",
            self.program.display(),
            image.width(),
            image.height(),
            params.model
        );

        let result = command.output().map_err(|e| {
            PipelineError::adapter(format!("cannot run '{}': {}", self.program.display(), e))
        })?;

        if !result.status.success() {
            let tail = stderr_tail(&result.stderr);
            log::warn!("{} exited with {}: {}", self.program.display(), result.status, tail);
            return Err(PipelineError::adapter(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                tail
            )));
        }

        let processed = image::open(output.path())
            .map_err(|e| PipelineError::adapter(format!("unreadable engine output: {}", e)))?
            .to_rgba8();
        Ok(processed)
    }
}
