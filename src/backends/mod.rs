//! Video backends
//!
//! - FFmpeg backend for real containers (`video-support` feature)
//! - Raw frame-stream backend, always available

pub mod video;

pub use self::video::*;

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

/// Pick a backend for a source/output pair
///
/// Raw frame streams (`.rgbv`) on both ends use the raw backend; anything
/// else needs FFmpeg.
pub fn backend_for(source: &Path, output: &Path) -> Result<Arc<dyn VideoBackend>> {
    let is_raw = |path: &Path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(video::raw::RAW_EXTENSION))
    };
    if is_raw(source) && is_raw(output) {
        return Ok(Arc::new(RawVideoBackend::new()));
    }
    ffmpeg_backend()
}

#[cfg(feature = "video-support")]
fn ffmpeg_backend() -> Result<Arc<dyn VideoBackend>> {
    Ok(Arc::new(FFmpegBackend::new()?))
}

#[cfg(not(feature = "video-support"))]
fn ffmpeg_backend() -> Result<Arc<dyn VideoBackend>> {
    Err(crate::error::PipelineError::invalid_config(
        "Video containers need the 'video-support' feature; only .rgbv frame streams are available",
    ))
}
