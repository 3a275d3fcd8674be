//! Background Removal CLI Tool
//!
//! Command-line interface for removing backgrounds from videos, single images
//! and image directories, and for managing engine models.

use super::config::CliConfigBuilder;
use crate::{
    backends::backend_for,
    batch::{process_directory, process_image_file},
    controller::{JobController, JobOutcome, JobState},
    download::{DownloadProgress, ModelDownloader},
    models::{catalog, find_model, is_model_installed, models_dir, ModelInfo},
    services::{
        image_output_path, video_output_path, ChannelObserver, ConsoleProgressReporter, JobEvent,
        ReporterObserver,
    },
    tracing_config::{TracingConfig, TracingFormat, TracingGuard},
    VideoJob,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Background removal for videos and images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-studio")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Console, global = true)]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[cfg(feature = "tracing-files")]
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum LogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Remove the background of every frame of a video
    Video(VideoArgs),
    /// Remove the background of a single image
    Image(ImageArgs),
    /// Process every image in a directory tree
    Batch(BatchArgs),
    /// List the models the engine understands
    Models {
        /// Only show models present in the model directory
        #[arg(long)]
        installed: bool,
    },
    /// Download model weights into the model directory
    Download {
        /// Model names, e.g. u2net isnet-general-use
        #[arg(value_name = "MODEL", required_unless_present = "all")]
        models: Vec<String>,
        /// Download every catalog model
        #[arg(long)]
        all: bool,
    },
}

/// Engine and background options shared by all processing commands
#[derive(Args, Debug, Default, Clone)]
pub struct RemovalArgs {
    /// JSON file with job parameters; flags override its values
    #[arg(long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Engine model name [default: u2net]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Background color "r,g,b[,a]" (0-255) or "transparent" [default: 0,255,0,255]
    #[arg(long, value_name = "COLOR")]
    pub bgcolor: Option<String>,

    /// Enable alpha matting
    #[arg(short = 'a', long)]
    pub alpha_matting: bool,

    /// Alpha matting foreground threshold (0-255)
    #[arg(long = "af", value_name = "N")]
    pub foreground_threshold: Option<String>,

    /// Alpha matting background threshold (0-255)
    #[arg(long = "ab", value_name = "N")]
    pub background_threshold: Option<String>,

    /// Alpha matting erode size (1-50)
    #[arg(long = "ae", value_name = "N")]
    pub erode_size: Option<String>,

    /// Post-process the mask
    #[arg(long)]
    pub post_process_mask: bool,

    /// Output only the mask
    #[arg(long)]
    pub only_mask: bool,

    /// Point prompt "x,y" for prompt-based models (repeatable)
    #[arg(long = "point", value_name = "X,Y")]
    pub points: Vec<String>,

    /// Label for each point prompt: 1 foreground, 0 background (repeatable)
    #[arg(long = "label", value_name = "0|1")]
    pub labels: Vec<String>,

    /// Engine executable
    #[arg(long, value_name = "PATH", default_value = "rembg")]
    pub rembg: PathBuf,

    /// Download the model first when it is missing
    #[arg(long)]
    pub download_model: bool,
}

#[derive(Args, Debug)]
pub struct VideoArgs {
    /// Source video
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file [default: <stem>_no_bg_<timestamp>.mp4, or .webm when transparent]
    #[arg(short, long, value_name = "OUTPUT", conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Directory for the generated output name [default: next to the input]
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Target frame rate, or "native" for the source rate
    #[arg(long, value_name = "FPS")]
    pub fps: Option<String>,

    /// Replacement for frames the engine fails on: original or blank
    #[arg(long, value_name = "POLICY")]
    pub failure_policy: Option<String>,

    /// Concurrent engine calls [default: number of CPUs]
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Frames allowed in flight between extraction and writing [default: 2 per worker]
    #[arg(long)]
    pub window: Option<usize>,

    /// Output codec (h264, h265, vp8, vp9, av1)
    #[arg(long)]
    pub codec: Option<String>,

    /// Codec quality (codec-specific range)
    #[arg(long)]
    pub quality: Option<u8>,

    /// Encoder preset (fast, medium, slow)
    #[arg(long)]
    pub preset: Option<String>,

    /// Reject sources larger than this many megabytes [default: 1000]
    #[arg(long, value_name = "MB")]
    pub max_source_mb: Option<u64>,

    #[command(flatten)]
    pub removal: RemovalArgs,
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Source image
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file [default: <stem>_no_bg.<ext> next to the input]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Reject images larger than this many megabytes [default: 100]
    #[arg(long, value_name = "MB")]
    pub max_image_mb: Option<u64>,

    #[command(flatten)]
    pub removal: RemovalArgs,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Directory to scan for images
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Directory receiving the mirrored output tree
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Only process file names matching this glob (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Do not descend into subdirectories
    #[arg(long)]
    pub no_recursive: bool,

    /// Reject images larger than this many megabytes [default: 100]
    #[arg(long, value_name = "MB")]
    pub max_image_mb: Option<u64>,

    #[command(flatten)]
    pub removal: RemovalArgs,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing = init_tracing(&cli).context("Failed to initialize tracing")?;

    match &cli.command {
        Command::Video(args) => run_video(args, cli.verbose).await,
        Command::Image(args) => run_image(args).await,
        Command::Batch(args) => run_batch(args, cli.verbose).await,
        Command::Models { installed } => list_models(*installed),
        Command::Download { models, all } => download_models(models, *all).await,
    }
}

fn init_tracing(cli: &Cli) -> Result<TracingGuard> {
    let format = match cli.log_format {
        LogFormat::Console => TracingFormat::Console,
        LogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        LogFormat::Json => TracingFormat::Json,
    };

    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string());

    #[cfg(feature = "tracing-files")]
    if let Some(path) = &cli.log_file {
        config = config.with_output(crate::tracing_config::TracingOutput::File(path.clone()));
    }

    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }
    config.init()
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next frame boundary");
            token.cancel();
        }
    });
}

fn progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

async fn prepare_model(removal: &RemovalArgs, model: &ModelInfo) -> Result<()> {
    let dir = models_dir()?;
    if is_model_installed(model, &dir) {
        return Ok(());
    }
    if removal.download_model {
        download_model(model, &CancellationToken::new()).await
    } else {
        warn!(
            "Model '{}' is not in {}; the engine will try to fetch it (or pass --download-model)",
            model.name,
            dir.display()
        );
        Ok(())
    }
}

async fn run_video(args: &VideoArgs, verbose: u8) -> Result<()> {
    let config = CliConfigBuilder::video_config(args).context("Invalid job parameters")?;

    let output = match &args.output {
        Some(output) => output.clone(),
        None => {
            let extension = if config.background.is_transparent() { "webm" } else { "mp4" };
            video_output_path(&args.input, args.output_dir.as_deref(), extension, chrono::Local::now())
        },
    };

    prepare_model(&args.removal, config.removal.model.info()).await?;
    let adapter = CliConfigBuilder::adapter(&args.removal)?;
    adapter
        .check_available()
        .with_context(|| format!("Cannot start the engine '{}'", adapter.program().display()))?;

    let backend = backend_for(&args.input, &output)?;
    info!(
        "Processing {} -> {} ({} workers, model {})",
        args.input.display(),
        output.display(),
        config.workers,
        config.removal.model
    );

    let controller = JobController::new(backend, Arc::new(adapter));
    let job = VideoJob::new(&args.input, &output, config);

    // Verbose runs log progress lines instead of drawing a bar over the log output
    let handle = if verbose > 0 {
        let handle = controller.start(job, Arc::new(ReporterObserver::new(ConsoleProgressReporter::new(true))));
        cancel_on_ctrl_c(handle.cancellation_token());
        handle
    } else {
        let (observer, events) = ChannelObserver::new();
        let handle = controller.start(job, Arc::new(observer));
        cancel_on_ctrl_c(handle.cancellation_token());
        show_job_progress(events).await;
        handle
    };

    match handle.wait().await {
        Ok(summary) => {
            info!("📊 Video summary:");
            info!("  ├─ Output: {}", summary.output.display());
            info!(
                "  ├─ Frames: {} at {:.2} fps ({:.2}s)",
                summary.frames_written,
                summary.output_fps,
                summary.duration_seconds()
            );
            info!("  ├─ Failed frames: {}", summary.failed_frames.len());
            info!("  └─ Total time: {:.2}s", summary.elapsed.as_secs_f64());
            Ok(())
        },
        Err(crate::PipelineError::Cancelled) => {
            anyhow::bail!("Job cancelled; no output was written")
        },
        Err(e) => {
            error!("❌ Failed to process {}: {}", args.input.display(), e);
            Err(e.into())
        },
    }
}

/// Draw job events as a progress bar until the job finishes
async fn show_job_progress(mut events: mpsc::UnboundedReceiver<JobEvent>) {
    let bar = ProgressBar::new_spinner();
    bar.set_style(progress_style(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames {msg}",
    ));
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::State(state) => bar.set_message(state.to_string()),
            JobEvent::Progress(snapshot) => {
                if let Some(total) = snapshot.expected_total {
                    bar.set_length(total);
                }
                bar.set_position(snapshot.reassembled);
            },
            JobEvent::FrameFailed { index, reason } => {
                bar.suspend(|| warn!("Frame {} kept as placeholder: {}", index, reason));
            },
            JobEvent::Finished(outcome) => {
                let message = match &outcome {
                    JobOutcome::Completed(_) => JobState::Completed.to_string(),
                    JobOutcome::Cancelled(_) => JobState::Cancelled.to_string(),
                    JobOutcome::Failed { .. } => JobState::Failed.to_string(),
                };
                bar.finish_with_message(message);
                break;
            },
        }
    }
}

async fn run_image(args: &ImageArgs) -> Result<()> {
    let settings = CliConfigBuilder::batch_settings(&args.removal, None, true, args.max_image_mb)
        .context("Invalid job parameters")?;
    prepare_model(&args.removal, settings.removal.model.info()).await?;
    let adapter = CliConfigBuilder::adapter(&args.removal)?;

    let input = args.input.clone();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| image_output_path(&args.input, None));
    let start_time = Instant::now();

    let written = tokio::task::spawn_blocking(move || {
        process_image_file(&input, &output, &settings, &adapter)
    })
    .await
    .context("Image task failed")?
    .with_context(|| format!("Failed to process {}", args.input.display()))?;

    info!(
        "✅ Saved {} in {:.2}s",
        written.display(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn run_batch(args: &BatchArgs, verbose: u8) -> Result<()> {
    if !args.input_dir.is_dir() {
        anyhow::bail!("Input directory does not exist: {}", args.input_dir.display());
    }
    if args.output_dir.is_file() {
        anyhow::bail!(
            "Output path exists and is a file, not a directory: {}",
            args.output_dir.display()
        );
    }

    let settings = CliConfigBuilder::batch_settings(
        &args.removal,
        args.pattern.clone(),
        !args.no_recursive,
        args.max_image_mb,
    )
    .context("Invalid job parameters")?;
    prepare_model(&args.removal, settings.removal.model.info()).await?;
    let adapter = CliConfigBuilder::adapter(&args.removal)?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let reporter = ConsoleProgressReporter::new(verbose > 0);
    let start_time = Instant::now();

    let summary = process_directory(
        &args.input_dir,
        &args.output_dir,
        &settings,
        Arc::new(adapter),
        &reporter,
        &cancel,
    )
    .await
    .context("Batch processing stopped")?;

    let total_time = start_time.elapsed();
    info!("📊 Batch processing summary:");
    info!("  ├─ Files found: {}", summary.total);
    info!("  ├─ Files processed: {}", summary.successful);
    info!("  ├─ Files failed: {}", summary.failed);
    info!("  └─ Total time: {:.2}s", total_time.as_secs_f64());

    if summary.failed > 0 {
        warn!(
            "Some files failed to process. Processed: {}, Failed: {}",
            summary.successful, summary.failed
        );
    }
    Ok(())
}

fn list_models(installed_only: bool) -> Result<()> {
    let dir = models_dir()?;
    println!("Model directory: {}", dir.display());
    println!();
    for model in catalog() {
        let installed = is_model_installed(model, &dir);
        if installed_only && !installed {
            continue;
        }
        let marker = if installed { "✅" } else { "  " };
        let prompt = if model.prompt_based { " (point prompts)" } else { "" };
        println!("{} {:<24} {}{}", marker, model.name, model.description, prompt);
    }
    Ok(())
}

async fn download_models(names: &[String], all: bool) -> Result<()> {
    let models: Vec<&ModelInfo> = if all {
        catalog().iter().collect()
    } else {
        names
            .iter()
            .map(|name| {
                find_model(name).with_context(|| {
                    format!("Unknown model '{}'; run `bgremove-studio models` for the list", name)
                })
            })
            .collect::<Result<_>>()?
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    for model in models {
        download_model(model, &cancel).await?;
    }
    Ok(())
}

async fn download_model(model: &ModelInfo, cancel: &CancellationToken) -> Result<()> {
    let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
    if downloader.is_installed(model) {
        info!("Model '{}' already installed", model.name);
        return Ok(());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(progress_style(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    ));
    let files = downloader
        .ensure_model(model, cancel, |progress: &DownloadProgress| {
            if let Some(total) = progress.total {
                bar.set_length(total);
            }
            bar.set_position(progress.downloaded);
            bar.set_message(progress.file_name.clone());
        })
        .await
        .with_context(|| format!("Failed to download model '{}'", model.name))?;
    bar.finish_with_message(format!("✅ Downloaded {}", model.name));

    for file in files {
        info!("{} sha256 {}", file.path.display(), file.sha256);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_command() {
        let cli = Cli::try_parse_from([
            "bgremove-studio",
            "video",
            "clip.mp4",
            "--fps",
            "15",
            "--bgcolor",
            "0,0,255,255",
            "-j",
            "3",
            "--af",
            "200",
        ])
        .unwrap();
        match cli.command {
            Command::Video(args) => {
                assert_eq!(args.input, PathBuf::from("clip.mp4"));
                assert_eq!(args.fps.as_deref(), Some("15"));
                assert_eq!(args.workers, Some(3));
                assert_eq!(args.removal.bgcolor.as_deref(), Some("0,0,255,255"));
                assert_eq!(args.removal.foreground_threshold.as_deref(), Some("200"));
                assert_eq!(args.removal.rembg, PathBuf::from("rembg"));
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_batch_command() {
        let cli = Cli::try_parse_from([
            "bgremove-studio",
            "-vv",
            "batch",
            "in",
            "out",
            "--pattern",
            "*.jpg",
            "--no-recursive",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Batch(args) => {
                assert_eq!(args.pattern.as_deref(), Some("*.jpg"));
                assert!(args.no_recursive);
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_output_conflicts_with_output_dir() {
        let result = Cli::try_parse_from([
            "bgremove-studio",
            "video",
            "clip.mp4",
            "-o",
            "a.mp4",
            "--output-dir",
            "out",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_download_requires_model_or_all() {
        assert!(Cli::try_parse_from(["bgremove-studio", "download"]).is_err());
        assert!(Cli::try_parse_from(["bgremove-studio", "download", "--all"]).is_ok());
    }
}
