#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgremove-studio
//!
//! Background removal for single images, image folders and whole videos.
//! Segmentation itself is delegated to an external engine behind the
//! [`BackgroundRemover`] trait; the crate ships an adapter for the `rembg`
//! command line tool and a deterministic mock for tests.
//!
//! ## Features
//!
//! - **Streaming video pipeline**: frames are extracted, processed by a worker
//!   pool and written back in order, with bounded memory
//! - **Frame sampling**: keep the source rate or sample to a target rate
//! - **Solid or transparent backgrounds**: composite over any RGBA color, or
//!   keep alpha in VP9/WebM output
//! - **Failure tolerance**: frames the engine fails on are replaced by the
//!   original or a blank frame and reported, not fatal
//! - **Cancellation**: jobs stop at the next frame boundary and leave no
//!   partial output
//! - **Batch images**: process a directory tree into a mirrored output tree
//! - **Model management**: catalog of engine models and an async downloader
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_studio::{
//!     backends::backend_for, JobController, LoggingObserver, RembgCommand, VideoJob,
//!     VideoJobConfig,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let source = Path::new("clip.mp4");
//! let output = Path::new("clip_no_bg.mp4");
//!
//! let config = VideoJobConfig::builder().fps(15.0).workers(4).build()?;
//! let controller = JobController::new(backend_for(source, output)?, Arc::new(RembgCommand::default()));
//!
//! let handle = controller.start(VideoJob::new(source, output, config), Arc::new(LoggingObserver));
//! let summary = handle.wait().await?;
//! println!("{} frames, {} failed", summary.frames_written, summary.failed_frames.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line interface, progress bars and subscriber setup
//! - `webp-support` (default): WebP image format support
//! - `video-support`: FFmpeg decoding and encoding (needs system FFmpeg libraries)
//! - `tracing-json`, `tracing-files`: extra log output formats

pub mod adapter;
pub mod backends;
pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositing;
pub mod config;
pub mod controller;
pub mod download;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod tracing_config;

pub use adapter::{BackgroundRemover, MockRemover, RembgCommand};
pub use batch::{process_directory, process_image_file, BatchSettings, BatchSummary};
pub use config::{
    AlphaMattingParams, BackgroundSpec, FailurePolicy, FrameRate, JobParams, PointPrompts,
    RemovalParams, VideoJob, VideoJobConfig, VideoJobConfigBuilder,
};
pub use controller::{JobController, JobHandle, JobOutcome, JobState, JobSummary};
pub use download::{DownloadProgress, DownloadedFile, ModelDownloader};
pub use error::{ErrorKind, PipelineError, Result};
pub use models::{catalog, find_model, models_dir, ModelInfo, ModelName};
pub use services::{
    ChannelObserver, ConsoleProgressReporter, ImageIOService, JobEvent, JobObserver,
    LoggingObserver, NoOpObserver, NoOpProgressReporter, ProcessingStage, ProgressReporter,
    ProgressSnapshot, ProgressUpdate, ReporterObserver,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, init_library_tracing, TracingConfig, TracingFormat, TracingOutput};
pub use tracing_config::{events, spans};
