//! Error types for background removal jobs

use std::path::Path;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification of a [`PipelineError`]
///
/// Presentation layers use this to pick a message style without matching on
/// every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnreadable,
    AdapterFailure,
    EncodeError,
    ConfigValidation,
    Capacity,
    Cancelled,
    Io,
    Download,
    Internal,
}

impl ErrorKind {
    /// Whether an error of this kind only affects a single frame or file
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::AdapterFailure)
    }
}

/// Errors raised while validating, running or finishing a job
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source video could not be opened, probed or decoded
    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),

    /// The background-removal engine failed for one frame or image
    #[error("Adapter failure: {0}")]
    AdapterFailure(String),

    /// The output container could not be written or finalized
    #[error("Encode error: {0}")]
    EncodeError(String),

    /// Job parameters were rejected before the job started
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// Not enough memory or disk space to run the job
    #[error("Insufficient capacity: {0}")]
    Capacity(String),

    /// The job was cancelled by the caller
    #[error("Job cancelled")]
    Cancelled,

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Model download errors
    #[error("Download error: {0}")]
    Download(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnreadable(_) => ErrorKind::SourceUnreadable,
            Self::AdapterFailure(_) => ErrorKind::AdapterFailure,
            Self::EncodeError(_) => ErrorKind::EncodeError,
            Self::ConfigValidation(_) => ErrorKind::ConfigValidation,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) | Self::Image(_) => ErrorKind::Io,
            Self::Download(_) => ErrorKind::Download,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Create a new source unreadable error
    pub fn source_unreadable<S: Into<String>>(msg: S) -> Self {
        Self::SourceUnreadable(msg.into())
    }

    /// Create a new adapter failure
    pub fn adapter<S: Into<String>>(msg: S) -> Self {
        Self::AdapterFailure(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::EncodeError(msg.into())
    }

    /// Create a new configuration validation error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a new capacity error
    pub fn capacity<S: Into<String>>(msg: S) -> Self {
        Self::Capacity(msg.into())
    }

    /// Create a new download error
    pub fn download<S: Into<String>>(msg: S) -> Self {
        Self::Download(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::ConfigValidation(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create a source error for a specific file
    pub fn source_error<P: AsRef<Path>>(path: P, details: &str) -> Self {
        Self::SourceUnreadable(format!(
            "Cannot read video '{}': {}",
            path.as_ref().display(),
            details
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PipelineError::invalid_config("test config error");
        assert!(matches!(err, PipelineError::ConfigValidation(_)));
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);

        let err = PipelineError::encode("trailer");
        assert_eq!(err.kind(), ErrorKind::EncodeError);
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::source_unreadable("no video stream");
        assert_eq!(err.to_string(), "Source unreadable: no video stream");
        assert_eq!(PipelineError::Cancelled.to_string(), "Job cancelled");
    }

    #[test]
    fn test_config_value_error() {
        let err = PipelineError::config_value_error("alpha_matting_erode_size", -1, "1-50", Some(10));
        let message = err.to_string();
        assert!(message.contains("alpha_matting_erode_size"));
        assert!(message.contains("-1"));
        assert!(message.contains("1-50"));
        assert!(message.contains("Recommended: 10"));
    }

    #[test]
    fn test_only_adapter_failures_are_recoverable() {
        assert!(ErrorKind::AdapterFailure.is_recoverable());
        assert!(!ErrorKind::SourceUnreadable.is_recoverable());
        assert!(!ErrorKind::EncodeError.is_recoverable());
        assert!(!ErrorKind::Capacity.is_recoverable());
    }

    #[test]
    fn test_file_io_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = PipelineError::file_io_error("create", Path::new("/out/video.mp4"), &io_error);
        let message = err.to_string();
        assert!(message.contains("create"));
        assert!(message.contains("/out/video.mp4"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
