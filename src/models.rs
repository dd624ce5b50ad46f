//! Model specification and metadata
//!
//! A model is a HuggingFace-style repository holding an ONNX graph plus the
//! JSON sidecar describing its preprocessing contract. The repository layout
//! mirrors what `transformers`-family tooling publishes: `config.json`,
//! `preprocessor_config.json` and `onnx/model.onnx`.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Repository-relative path of the ONNX weights
pub const WEIGHTS_FILE: &str = "onnx/model.onnx";

/// Repository-relative sidecar files required next to the weights
pub const SIDECAR_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// Default salient-object segmentation model
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/briaai/RMBG-1.4";

/// Identifies which segmentation model to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// HuggingFace repository URL
    pub url: String,
    /// Optional SHA-256 digest of the weights file, verified after download
    pub weights_sha256: Option<String>,
}

impl ModelSpec {
    /// Spec for an arbitrary HuggingFace repository
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for non-HuggingFace URLs.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url: String = url.into();
        if !url.starts_with("https://huggingface.co/") {
            return Err(Error::invalid_config(format!(
                "Unsupported model URL: {url}. Only HuggingFace repositories are supported."
            )));
        }
        Ok(Self {
            url,
            weights_sha256: None,
        })
    }

    /// Attach an expected weights digest
    #[must_use]
    pub fn with_weights_sha256(mut self, digest: impl Into<String>) -> Self {
        self.weights_sha256 = Some(digest.into());
        self
    }

    /// Filesystem-safe identifier derived from the repository URL
    ///
    /// `https://huggingface.co/briaai/RMBG-1.4` becomes `briaai--RMBG-1.4`.
    #[must_use]
    pub fn model_id(&self) -> String {
        self.url
            .trim_start_matches("https://huggingface.co/")
            .trim_end_matches('/')
            .replace('/', "--")
    }

    /// Base URL for raw file downloads from the repository
    #[must_use]
    pub fn raw_file_url(&self, file: &str) -> String {
        format!("{}/resolve/main/{}", self.url.trim_end_matches('/'), file)
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            url: DEFAULT_MODEL_URL.to_string(),
            weights_sha256: None,
        }
    }
}

/// Resolved on-disk locations of a cached model's files
#[derive(Debug, Clone)]
pub struct ModelAssets {
    /// Directory holding the cached repository snapshot
    pub root: PathBuf,
    /// ONNX weights
    pub weights: PathBuf,
    /// Preprocessing sidecar
    pub preprocessor: PathBuf,
}

impl ModelAssets {
    /// Resolve asset paths under a cache directory
    #[must_use]
    pub fn in_dir(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            weights: root.join(WEIGHTS_FILE),
            preprocessor: root.join("preprocessor_config.json"),
        }
    }

    /// Whether every required file is present
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.weights.is_file() && self.preprocessor.is_file()
    }
}

/// Accepts both `{"width": w, "height": h}` objects and bare numbers, which
/// is how HuggingFace preprocessor configs vary across exporters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum SizeField {
    Square(u32),
    Rect { width: u32, height: u32 },
}

#[derive(Debug, Clone, Deserialize)]
struct RawPreprocessorConfig {
    #[serde(default)]
    size: Option<SizeField>,
    #[serde(default)]
    image_mean: Option<[f32; 3]>,
    #[serde(default)]
    image_std: Option<[f32; 3]>,
}

/// Preprocessing contract of a segmentation model
///
/// Describes how an RGB image must be shaped and normalized before it is
/// handed to the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessorConfig {
    /// Model input size as `[width, height]`
    pub target_size: [u32; 2],
    /// Per-channel normalization mean (applied after scaling to `[0, 1]`)
    pub normalization_mean: [f32; 3],
    /// Per-channel normalization standard deviation
    pub normalization_std: [f32; 3],
}

impl PreprocessorConfig {
    /// Parse a HuggingFace `preprocessor_config.json`
    ///
    /// Missing fields fall back to the RMBG-1.4 contract (1024x1024, mean
    /// 0.5, std 1.0) so partially populated sidecars still load.
    ///
    /// # Errors
    /// Returns [`Error::ModelLoad`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawPreprocessorConfig = serde_json::from_str(json)
            .map_err(|e| Error::model_load(format!("Malformed preprocessor config: {e}")))?;

        let defaults = Self::default();
        let target_size = match raw.size {
            Some(SizeField::Square(side)) => [side, side],
            Some(SizeField::Rect { width, height }) => [width, height],
            None => defaults.target_size,
        };
        Ok(Self {
            target_size,
            normalization_mean: raw.image_mean.unwrap_or(defaults.normalization_mean),
            normalization_std: raw.image_std.unwrap_or(defaults.normalization_std),
        })
    }

    /// Load and parse a sidecar file from disk
    ///
    /// # Errors
    /// Returns [`Error::ModelLoad`] for unreadable or malformed files.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::model_load(format!(
                "Failed to read preprocessor config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_from_url() {
        let spec = ModelSpec::default();
        assert_eq!(spec.model_id(), "briaai--RMBG-1.4");

        let spec = ModelSpec::from_url("https://huggingface.co/imgly/isnet-general-onnx").unwrap();
        assert_eq!(spec.model_id(), "imgly--isnet-general-onnx");
    }

    #[test]
    fn test_rejects_non_huggingface_url() {
        let err = ModelSpec::from_url("https://example.com/model").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_raw_file_url() {
        let spec = ModelSpec::default();
        assert_eq!(
            spec.raw_file_url(WEIGHTS_FILE),
            "https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model.onnx"
        );
    }

    #[test]
    fn test_preprocessor_config_object_size() {
        let json = r#"{
            "size": {"width": 1024, "height": 1024},
            "image_mean": [0.5, 0.5, 0.5],
            "image_std": [1.0, 1.0, 1.0]
        }"#;
        let config = PreprocessorConfig::from_json(json).unwrap();
        assert_eq!(config.target_size, [1024, 1024]);
        assert_eq!(config.normalization_mean, [0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_preprocessor_config_scalar_size_and_defaults() {
        let config = PreprocessorConfig::from_json(r#"{"size": 320}"#).unwrap();
        assert_eq!(config.target_size, [320, 320]);
        // Unspecified normalization falls back to the RMBG contract
        assert_eq!(config.normalization_std, [1.0, 1.0, 1.0]);

        let config = PreprocessorConfig::from_json("{}").unwrap();
        assert_eq!(config.target_size, [1024, 1024]);
    }

    #[test]
    fn test_preprocessor_config_malformed() {
        let err = PreprocessorConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
    }

    #[test]
    fn test_assets_resolution() {
        let assets = ModelAssets::in_dir(Path::new("/cache/briaai--RMBG-1.4"));
        assert!(assets.weights.ends_with("onnx/model.onnx"));
        assert!(assets.preprocessor.ends_with("preprocessor_config.json"));
        assert!(!assets.is_complete());
    }
}
