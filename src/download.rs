//! Model weight downloads
//!
//! Files are streamed into a temporary file next to their destination, hashed
//! while they arrive and renamed into place only once complete, so a failed
//! or cancelled download never leaves a truncated model behind.

use crate::error::{PipelineError, Result};
use crate::models::{is_model_installed, models_dir, ModelInfo};
use crate::tracing_config::{events, spans};
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Download progress information
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// File being downloaded
    pub file_name: String,
    /// Bytes downloaded
    pub downloaded: u64,
    /// Total file size (if known)
    pub total: Option<u64>,
    /// Download completed
    pub completed: bool,
}

/// A file written by the downloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the file contents
    pub sha256: String,
}

/// Fetches catalog models into the model directory
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    models_dir: PathBuf,
}

impl ModelDownloader {
    /// Downloader targeting the default model directory
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - No model directory could be resolved
    pub fn new() -> Result<Self> {
        Self::with_models_dir(models_dir()?)
    }

    pub fn with_models_dir<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| PipelineError::download(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            models_dir: dir.into(),
        })
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    #[must_use]
    pub fn is_installed(&self, model: &ModelInfo) -> bool {
        is_model_installed(model, &self.models_dir)
    }

    /// Download every missing weight file of `model`
    ///
    /// Files already present are left untouched. Returns the files that were
    /// written by this call.
    ///
    /// # Errors
    /// - [`PipelineError::Download`] on network or HTTP failures
    /// - [`PipelineError::Cancelled`] if `cancel` fires mid-download
    pub async fn ensure_model<F>(
        &self,
        model: &ModelInfo,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<Vec<DownloadedFile>>
    where
        F: FnMut(&DownloadProgress),
    {
        let mut written = Vec::new();
        for file in model.files {
            let destination = self.models_dir.join(file.file_name);
            if destination.is_file() {
                log::debug!("{} already present", destination.display());
                continue;
            }
            let url = file.url();
            let downloaded = self
                .download_file(&url, &destination, cancel, &mut on_progress)
                .instrument(spans::download(&url, &destination))
                .await?;
            log::info!(
                "Downloaded {} ({} bytes, sha256 {})",
                file.file_name,
                downloaded.bytes,
                downloaded.sha256
            );
            written.push(downloaded);
        }
        Ok(written)
    }

    /// Stream `url` into `destination`
    ///
    /// # Errors
    /// - [`PipelineError::Download`] on network or HTTP failures
    /// - [`PipelineError::Cancelled`] if `cancel` fires mid-download
    pub async fn download_file<F>(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<DownloadedFile>
    where
        F: FnMut(&DownloadProgress),
    {
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::file_io_error("create model directory", dir, &e))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::download(format!("Failed to download {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(PipelineError::download(format!(
                "HTTP error {} for {}",
                response.status(),
                url
            )));
        }

        let total = response.content_length();
        let file_name = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut progress = DownloadProgress {
            file_name,
            downloaded: 0,
            total,
            completed: false,
        };

        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(dir)
            .map_err(|e| PipelineError::file_io_error("create temporary file", dir, &e))?;
        let handle = temp
            .as_file()
            .try_clone()
            .map_err(|e| PipelineError::file_io_error("open temporary file", temp.path(), &e))?;
        let mut file = tokio::fs::File::from_std(handle);

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let chunk = chunk
                .map_err(|e| PipelineError::download(format!("Failed to read download stream: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| PipelineError::file_io_error("write to file", temp.path(), &e))?;
            hasher.update(&chunk);

            progress.downloaded += chunk.len() as u64;
            events::download_progress(url, progress.downloaded, total);
            on_progress(&progress);
        }
        file.flush()
            .await
            .map_err(|e| PipelineError::file_io_error("flush file", temp.path(), &e))?;
        drop(file);

        if let Some(expected) = total {
            if expected != progress.downloaded {
                return Err(PipelineError::download(format!(
                    "Truncated download of {}: {} of {} bytes",
                    url, progress.downloaded, expected
                )));
            }
        }

        temp.persist(destination)
            .map_err(|e| PipelineError::file_io_error("move download into place", destination, &e.error))?;
        progress.completed = true;
        on_progress(&progress);

        Ok(DownloadedFile {
            path: destination.to_path_buf(),
            bytes: progress.downloaded,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::find_model;

    #[tokio::test]
    async fn test_installed_model_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let model = find_model("u2netp").unwrap();
        std::fs::write(dir.path().join("u2netp.onnx"), b"weights").unwrap();

        let downloader = ModelDownloader::with_models_dir(dir.path()).unwrap();
        assert!(downloader.is_installed(model));

        let mut calls = 0;
        let written = downloader
            .ensure_model(model, &CancellationToken::new(), |_| calls += 1)
            .await
            .unwrap();
        assert!(written.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_missing_model_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_models_dir(dir.path()).unwrap();
        assert!(!downloader.is_installed(find_model("sam").unwrap()));
    }
}
