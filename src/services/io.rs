//! Image file input/output and output naming

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Local};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::path::{Path, PathBuf};

/// Extensions picked up by batch runs
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "tif", "webp"];

/// Suffix appended to output stems
pub const OUTPUT_SUFFIX: &str = "_no_bg";

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image, falling back to content sniffing when the extension lies
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(PipelineError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );
                let data = std::fs::read(path_ref)
                    .map_err(|io_err| PipelineError::file_io_error("read image data", path_ref, &io_err))?;
                image::load_from_memory(&data).map_err(PipelineError::from)
            },
        }
    }

    /// Save `image`, picking the encoder from the extension
    ///
    /// Formats without alpha get the color channels only. Parent directories
    /// are created as needed.
    pub fn save_image<P: AsRef<Path>>(image: RgbaImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::file_io_error("create output directory", parent, &e))?;
        }

        let format = ImageFormat::from_path(path_ref).unwrap_or(ImageFormat::Png);
        let dynamic = DynamicImage::ImageRgba8(image);
        let result = if Self::supports_transparency(format) {
            dynamic.save_with_format(path_ref, format)
        } else {
            log::debug!(
                "{:?} has no alpha channel; writing color channels of {}",
                format,
                path_ref.display()
            );
            DynamicImage::ImageRgb8(dynamic.to_rgb8()).save_with_format(path_ref, format)
        };
        result.map_err(PipelineError::from)
    }

    /// Whether `format` keeps an alpha channel
    #[must_use]
    pub fn supports_transparency(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png | ImageFormat::WebP | ImageFormat::Tiff
        )
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    }
}

/// `{stem}_no_bg.{ext}` next to `input`, or inside `output_dir`
#[must_use]
pub fn image_output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let ext = input.extension().and_then(|s| s.to_str()).unwrap_or("png");
    let name = format!("{}{}.{}", stem, OUTPUT_SUFFIX, ext);
    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// `{stem}_no_bg_{YYYYmmdd_HHMMSS}.{ext}` for a video output
#[must_use]
pub fn video_output_path(
    input: &Path,
    output_dir: Option<&Path>,
    extension: &str,
    at: DateTime<Local>,
) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("video");
    let name = format!(
        "{}{}_{}.{}",
        stem,
        OUTPUT_SUFFIX,
        at.format("%Y%m%d_%H%M%S"),
        extension
    );
    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgba;

    #[test]
    fn test_supported_formats() {
        assert!(ImageIOService::is_supported_format("photo.JPG"));
        assert!(ImageIOService::is_supported_format("scan.tif"));
        assert!(!ImageIOService::is_supported_format("clip.mp4"));
        assert!(!ImageIOService::is_supported_format("README"));
    }

    #[test]
    fn test_image_output_naming() {
        assert_eq!(
            image_output_path(Path::new("/in/cat.jpg"), None),
            PathBuf::from("/in/cat_no_bg.jpg")
        );
        assert_eq!(
            image_output_path(Path::new("/in/cat.png"), Some(Path::new("/out"))),
            PathBuf::from("/out/cat_no_bg.png")
        );
    }

    #[test]
    fn test_video_output_naming() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            video_output_path(Path::new("/v/clip.mov"), Some(Path::new("/out")), "mp4", at),
            PathBuf::from("/out/clip_no_bg_20240309_140507.mp4")
        );
    }

    #[test]
    fn test_save_and_load_round_trip_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.png");
        let image = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        ImageIOService::save_image(image, &path).unwrap();

        let loaded = ImageIOService::load_image(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(0, 0), &Rgba([1, 2, 3, 4]));
    }

    #[test]
    fn test_jpeg_output_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        ImageIOService::save_image(RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 128])), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ImageIOService::load_image("/definitely/missing.png").unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
