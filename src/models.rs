//! Catalog of the segmentation models understood by the removal engine
//!
//! The catalog is static: it lists every model name the engine accepts, the
//! weight files each one needs, and where those files are published. Local
//! weights live in a single model directory shared with the engine.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable overriding the model directory
pub const MODELS_PATH_ENV: &str = "REMBG_MODELS_PATH";

/// Model used when none is requested
pub const DEFAULT_MODEL: &str = "u2net";

const RELEASE_BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

/// One weight file belonging to a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFile {
    pub file_name: &'static str,
}

impl ModelFile {
    /// Public download URL for this file
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/{}", RELEASE_BASE_URL, self.file_name)
    }
}

/// Static description of a catalog entry
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub files: &'static [ModelFile],
    /// Model segments from point prompts instead of saliency
    pub prompt_based: bool,
}

const fn file(file_name: &'static str) -> ModelFile {
    ModelFile { file_name }
}

const fn entry(
    name: &'static str,
    description: &'static str,
    files: &'static [ModelFile],
) -> ModelInfo {
    ModelInfo {
        name,
        description,
        files,
        prompt_based: false,
    }
}

static CATALOG: &[ModelInfo] = &[
    entry("u2net", "General use (default)", &[file("u2net.onnx")]),
    entry("u2netp", "Lightweight version", &[file("u2netp.onnx")]),
    entry(
        "u2net_human_seg",
        "Human segmentation",
        &[file("u2net_human_seg.onnx")],
    ),
    entry(
        "u2net_cloth_seg",
        "Clothing segmentation",
        &[file("u2net_cloth_seg.onnx")],
    ),
    entry("silueta", "Compact general use (43MB)", &[file("silueta.onnx")]),
    entry(
        "isnet-general-use",
        "General use (improved)",
        &[file("isnet-general-use.onnx")],
    ),
    entry("isnet-anime", "Anime characters", &[file("isnet-anime.onnx")]),
    ModelInfo {
        name: "sam",
        description: "Segment Anything Model",
        files: &[
            file("vit_b-encoder-quant.onnx"),
            file("vit_b-decoder-quant.onnx"),
        ],
        prompt_based: true,
    },
    entry(
        "birefnet-general",
        "BiRefNet general",
        &[file("BiRefNet-general-epoch_244.onnx")],
    ),
    entry(
        "birefnet-general-lite",
        "BiRefNet lightweight",
        &[file("BiRefNet-general-bb_swin_v1_tiny-epoch_232.onnx")],
    ),
    entry(
        "birefnet-portrait",
        "Human portraits",
        &[file("BiRefNet-portrait-epoch_150.onnx")],
    ),
    entry(
        "birefnet-dis",
        "Dichotomous segmentation",
        &[file("BiRefNet-DIS-epoch_590.onnx")],
    ),
    entry(
        "birefnet-hrsod",
        "High-res object detection",
        &[file("BiRefNet-HRSOD_DHU-epoch_115.onnx")],
    ),
    entry(
        "birefnet-cod",
        "Concealed object detection",
        &[file("BiRefNet-COD-epoch_125.onnx")],
    ),
    entry(
        "birefnet-massive",
        "Massive dataset trained",
        &[file("BiRefNet-massive-TR_DIS5K_TR_TEs-epoch_420.onnx")],
    ),
];

/// All models in catalog order
#[must_use]
pub fn catalog() -> &'static [ModelInfo] {
    CATALOG
}

/// Look up a catalog entry by exact name
#[must_use]
pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|info| info.name == name)
}

/// A model name that is known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelName(String);

impl ModelName {
    /// Validate a model name against the catalog
    pub fn new<S: Into<String>>(name: S) -> Result<Self> {
        let name = name.into();
        if find_model(&name).is_none() {
            let known: Vec<&str> = CATALOG.iter().map(|info| info.name).collect();
            return Err(PipelineError::invalid_config(format!(
                "Unknown model '{}'. Available models: {}",
                name,
                known.join(", ")
            )));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Catalog entry for this name
    #[must_use]
    pub fn info(&self) -> &'static ModelInfo {
        // Construction guarantees membership; fall back to the default entry otherwise.
        find_model(&self.0).unwrap_or(&CATALOG[0])
    }

    #[must_use]
    pub fn is_prompt_based(&self) -> bool {
        self.info().prompt_based
    }
}

impl Default for ModelName {
    fn default() -> Self {
        Self(DEFAULT_MODEL.to_string())
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModelName {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ModelName> for String {
    fn from(value: ModelName) -> Self {
        value.0
    }
}

/// Resolve the directory that holds model weights
///
/// `REMBG_MODELS_PATH` wins; otherwise `~/.u2net`.
pub fn models_dir() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(MODELS_PATH_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".u2net"))
        .ok_or_else(|| PipelineError::internal("Cannot determine home directory for models"))
}

/// Whether every weight file of `model` exists in `dir`
#[must_use]
pub fn is_model_installed(model: &ModelInfo, dir: &Path) -> bool {
    model.files.iter().all(|f| dir.join(f.file_name).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_contains_default() {
        assert!(find_model(DEFAULT_MODEL).is_some());
        assert_eq!(ModelName::default().as_str(), "u2net");
        assert_eq!(catalog().len(), 15);
    }

    #[test]
    fn test_model_name_validation() {
        assert!(ModelName::new("isnet-anime").is_ok());
        let err = ModelName::new("not-a-model").unwrap_err();
        assert!(err.to_string().contains("Unknown model"));
    }

    #[test]
    fn test_sam_is_prompt_based() {
        let sam = ModelName::new("sam").unwrap();
        assert!(sam.is_prompt_based());
        assert_eq!(sam.info().files.len(), 2);
        assert!(!ModelName::default().is_prompt_based());
    }

    #[test]
    fn test_file_url() {
        let info = find_model("silueta").unwrap();
        assert_eq!(
            info.files[0].url(),
            "https://github.com/danielgatis/rembg/releases/download/v0.0.0/silueta.onnx"
        );
    }

    #[test]
    fn test_model_name_serde() {
        let name: ModelName = serde_json::from_str("\"birefnet-portrait\"").unwrap();
        assert_eq!(name.as_str(), "birefnet-portrait");
        assert!(serde_json::from_str::<ModelName>("\"bogus\"").is_err());
    }

    #[test]
    fn test_is_model_installed() {
        let dir = tempfile::tempdir().unwrap();
        let info = find_model("u2netp").unwrap();
        assert!(!is_model_installed(info, dir.path()));
        std::fs::write(dir.path().join("u2netp.onnx"), b"weights").unwrap();
        assert!(is_model_installed(info, dir.path()));
    }
}
