//! Background-removal engine seam
//!
//! The pipeline treats segmentation as a black box behind
//! [`BackgroundRemover`]. Calls are synchronous and are always made from a
//! blocking thread, so implementations are free to run subprocesses or
//! native inference sessions.

pub mod mock;
pub mod rembg;

pub use mock::MockRemover;
pub use rembg::RembgCommand;

use crate::config::RemovalParams;
use crate::error::Result;
use image::RgbaImage;

/// A background-removal engine
pub trait BackgroundRemover: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Remove the background from `image`
    ///
    /// The result must have the same dimensions as the input. Background
    /// pixels are expected to carry low alpha.
    ///
    /// # Errors
    /// - [`crate::PipelineError::AdapterFailure`] when the engine cannot process the image
    fn remove(&self, image: &RgbaImage, params: &RemovalParams) -> Result<RgbaImage>;
}

impl<T: BackgroundRemover + ?Sized> BackgroundRemover for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn remove(&self, image: &RgbaImage, params: &RemovalParams) -> Result<RgbaImage> {
        (**self).remove(image, params)
    }
}
