//! Single-image and directory batch processing
//!
//! Images go through the same engine and compositing as video frames, but an
//! engine failure fails the file instead of substituting a placeholder. A
//! directory run counts failed files and keeps going.

use crate::adapter::BackgroundRemover;
use crate::compositing::apply_background;
use crate::config::{BackgroundSpec, RemovalParams, MAX_IMAGE_SIZE_MB};
use crate::error::{PipelineError, Result};
use crate::pipeline::processor::panic_message;
use crate::services::capacity::check_file_size;
use crate::services::io::{image_output_path, ImageIOService, OUTPUT_SUFFIX};
use crate::services::progress::{
    BatchProcessingStats, BatchProgressUpdate, ProcessingStage, ProgressReporter, ProgressUpdate,
};
use crate::tracing_config::{events, spans};
use instant::Instant;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use walkdir::WalkDir;

/// How images are processed and which files a directory run picks up
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub removal: RemovalParams,
    pub background: BackgroundSpec,
    /// File-name glob such as `*.jpg`
    pub pattern: Option<String>,
    pub recursive: bool,
    /// Larger inputs fail with a capacity error; `None` disables the check
    pub max_image_mb: Option<u64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        let background = BackgroundSpec::default();
        Self {
            removal: RemovalParams {
                bgcolor: background.color(),
                ..RemovalParams::default()
            },
            background,
            pattern: None,
            recursive: true,
            max_image_mb: Some(MAX_IMAGE_SIZE_MB),
        }
    }
}

impl BatchSettings {
    /// Use `background` for compositing and as the engine's bgcolor
    #[must_use]
    pub fn with_background(mut self, background: BackgroundSpec) -> Self {
        self.removal.bgcolor = background.color();
        self.background = background;
        self
    }

    #[must_use]
    pub fn with_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// Outcome of a directory run
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Written files, in processing order
    pub outputs: Vec<PathBuf>,
    /// Failed inputs with the reason
    pub failures: Vec<(PathBuf, String)>,
}

/// Remove the background of one image file and save it to `output`
///
/// # Errors
/// - [`PipelineError::Capacity`] for inputs above the size limit
/// - [`PipelineError::AdapterFailure`] when the engine fails, panics or returns the wrong size
/// - image decode/encode and I/O errors
pub fn process_image_file(
    input: &Path,
    output: &Path,
    settings: &BatchSettings,
    adapter: &dyn BackgroundRemover,
) -> Result<PathBuf> {
    let _span = spans::file_processing(input).entered();
    let started = Instant::now();

    if let Some(limit) = settings.max_image_mb {
        check_file_size(input, limit)?;
    }
    let image = ImageIOService::load_image(input)?.to_rgba8();
    let mut result = panic::catch_unwind(AssertUnwindSafe(|| adapter.remove(&image, &settings.removal)))
        .map_err(|payload| {
            PipelineError::adapter(format!("engine panicked: {}", panic_message(payload.as_ref())))
        })??;
    if result.dimensions() != image.dimensions() {
        return Err(PipelineError::adapter(format!(
            "engine returned {}x{} for a {}x{} image",
            result.width(),
            result.height(),
            image.width(),
            image.height()
        )));
    }
    apply_background(&mut result, &settings.background);
    ImageIOService::save_image(result, output)?;

    tracing::debug!(
        output = %output.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "image processed"
    );
    Ok(output.to_path_buf())
}

/// Image files under `dir` matching `pattern`, sorted by path
///
/// # Errors
/// - [`PipelineError::ConfigValidation`] for an invalid glob pattern
/// - I/O errors while walking the directory
pub fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = pattern
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| PipelineError::invalid_config(format!("Invalid pattern '{}': {}", p, e)))
        })
        .transpose()?;

    let walker = WalkDir::new(dir).max_depth(if recursive { usize::MAX } else { 1 });
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| PipelineError::internal(format!("Failed to walk {}: {}", dir.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name_matches = pattern.as_ref().map_or(true, |p| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| p.matches(n))
        });
        if name_matches && ImageIOService::is_supported_format(path) && !is_own_output(path) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Output location for `input`, mirroring its position below `input_dir`
#[must_use]
pub fn mirrored_output_path(input: &Path, input_dir: &Path, output_dir: &Path) -> PathBuf {
    let relative_parent = input
        .strip_prefix(input_dir)
        .ok()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new(""));
    image_output_path(input, Some(output_dir.join(relative_parent).as_path()))
}

fn is_own_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(OUTPUT_SUFFIX))
}

/// Process every image below `input_dir` into `output_dir`
///
/// Files are processed one at a time on the blocking pool. Cancellation is
/// checked between files.
///
/// # Errors
/// - [`PipelineError::Cancelled`] if `cancel` fires
/// - discovery errors; per-file failures are counted in the summary instead
pub async fn process_directory(
    input_dir: &Path,
    output_dir: &Path,
    settings: &BatchSettings,
    adapter: Arc<dyn BackgroundRemover>,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<BatchSummary> {
    let started = Instant::now();
    reporter.report_progress(ProgressUpdate::new(ProcessingStage::BatchInitialization, started));

    let files = find_image_files(input_dir, settings.recursive, settings.pattern.as_deref())?;
    let span = spans::batch_processing(files.len());
    log::info!("Found {} image file(s) in {}", files.len(), input_dir.display());

    let summary = run_files(files, input_dir, output_dir, settings, adapter, reporter, cancel, started)
        .instrument(span)
        .await?;

    reporter.report_progress(ProgressUpdate::new(ProcessingStage::BatchFinalization, started));
    reporter.report_completion(started.elapsed().as_millis() as u64);
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn run_files(
    files: Vec<PathBuf>,
    input_dir: &Path,
    output_dir: &Path,
    settings: &BatchSettings,
    adapter: Arc<dyn BackgroundRemover>,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
    started: Instant,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary {
        total: files.len(),
        ..BatchSummary::default()
    };

    for input in files {
        if cancel.is_cancelled() {
            log::info!(
                "Batch cancelled after {} of {} file(s)",
                summary.successful + summary.failed,
                summary.total
            );
            return Err(PipelineError::Cancelled);
        }

        reporter.report_batch_progress(batch_update(&summary, &input, started));

        let output = mirrored_output_path(&input, input_dir, output_dir);
        let job_settings = settings.clone();
        let job_adapter = adapter.clone();
        let job_input = input.clone();
        let result = tokio::task::spawn_blocking(move || {
            process_image_file(&job_input, &output, &job_settings, job_adapter.as_ref())
        })
        .await
        .map_err(|e| PipelineError::internal(format!("image task failed: {}", e)))?;

        match result {
            Ok(path) => {
                summary.successful += 1;
                summary.outputs.push(path);
            },
            Err(e) => {
                events::error_with_context(&e, &format!("processing {}", input.display()));
                reporter.report_error(
                    ProcessingStage::BatchItemProcessing,
                    &format!("Failed to process {}: {}", input.display(), e),
                );
                summary.failed += 1;
                summary.failures.push((input, e.to_string()));
            },
        }
    }
    Ok(summary)
}

fn batch_update(summary: &BatchSummary, current: &Path, started: Instant) -> BatchProgressUpdate {
    let done = summary.successful + summary.failed;
    let elapsed = started.elapsed().as_secs_f64();
    let processing_rate = if elapsed > 0.0 && done > 0 {
        done as f64 / elapsed
    } else {
        0.0
    };
    let eta_seconds = (processing_rate > 0.0)
        .then(|| (summary.total.saturating_sub(done) as f64 / processing_rate) as u64);
    let percent = if summary.total == 0 {
        100
    } else {
        (done * 100 / summary.total) as u8
    };

    BatchProgressUpdate {
        total_progress: ProgressUpdate::with_description(
            ProcessingStage::BatchItemProcessing,
            format!("Processing {}", current.display()),
            started,
        )
        .with_progress(percent),
        stats: BatchProcessingStats {
            items_completed: summary.successful,
            items_total: summary.total,
            items_failed: summary.failed,
            current_item_name: current.display().to_string(),
            processing_rate,
            eta_seconds,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockRemover;
    use crate::error::ErrorKind;
    use crate::services::progress::NoOpProgressReporter;
    use image::{Rgba, RgbaImage};

    fn write_png(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([200, 0, 0, 255])).save(path).unwrap();
    }

    #[test]
    fn test_process_image_file_composites() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cat.png");
        write_png(&input);
        let output = dir.path().join("out/cat_no_bg.png");

        process_image_file(&input, &output, &BatchSettings::default(), &MockRemover::new()).unwrap();

        let saved = image::open(&output).unwrap().to_rgba8();
        assert_eq!(saved.get_pixel(0, 0), &Rgba([0, 255, 0, 255]));
        assert_eq!(saved.get_pixel(4, 4), &Rgba([200, 0, 0, 255]));
    }

    #[test]
    fn test_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cat.png");
        write_png(&input);
        let settings = BatchSettings {
            max_image_mb: Some(0),
            ..BatchSettings::default()
        };
        let err = process_image_file(&input, &dir.path().join("o.png"), &settings, &MockRemover::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
    }

    #[test]
    fn test_find_image_files_filters() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"));
        write_png(&dir.path().join("a.png"));
        write_png(&dir.path().join("a_no_bg.png"));
        write_png(&dir.path().join("nested/c.png"));
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let flat = find_image_files(dir.path(), false, None).unwrap();
        let names: Vec<String> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png".to_string(), "b.png".to_string()]);

        assert_eq!(find_image_files(dir.path(), true, None).unwrap().len(), 3);
        assert_eq!(find_image_files(dir.path(), true, Some("a*")).unwrap().len(), 1);
        assert!(find_image_files(dir.path(), true, Some("[")).is_err());
    }

    #[test]
    fn test_mirrored_output_path() {
        let path = mirrored_output_path(
            Path::new("/in/sub/cat.jpg"),
            Path::new("/in"),
            Path::new("/out"),
        );
        assert_eq!(path, PathBuf::from("/out/sub/cat_no_bg.jpg"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_file() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("in/a.png"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = process_directory(
            &dir.path().join("in"),
            &dir.path().join("out"),
            &BatchSettings::default(),
            Arc::new(MockRemover::new()),
            &NoOpProgressReporter,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!dir.path().join("out").exists());
    }
}
