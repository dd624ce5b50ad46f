//! Inference engine abstraction
//!
//! The segmentation model is an external black box behind [`InferenceBackend`]:
//! a normalized NCHW tensor goes in, a single-channel probability tensor comes
//! out. The worker only ever talks to this trait, which keeps the pipeline
//! testable with a deterministic mock instead of a real model runtime.

use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{Error, Result};
use crate::models::PreprocessorConfig;
use crate::progress::DownloadEvent;
use crate::types::Mask;
use ndarray::Array4;

/// Contract for segmentation inference engines
pub trait InferenceBackend: Send {
    /// Fetch assets and build the session
    ///
    /// Emits zero or more [`DownloadEvent`]s while model assets are fetched;
    /// a warm cache emits none. Called at most once per backend instance.
    ///
    /// # Errors
    /// Returns [`Error::ModelLoad`] on download or session construction
    /// failures.
    fn load(
        &mut self,
        provider: ExecutionProvider,
        on_progress: &mut dyn FnMut(DownloadEvent),
    ) -> Result<()>;

    /// Run inference on a `[1, 3, H, W]` input tensor
    ///
    /// # Errors
    /// Returns [`Error::Inference`] when the backend is not loaded or the
    /// model run fails.
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Preprocessing contract of the loaded model
    ///
    /// # Errors
    /// Returns [`Error::ModelLoad`] before a successful [`load`](Self::load).
    fn preprocessor(&self) -> Result<PreprocessorConfig>;

    /// Whether [`load`](Self::load) has completed successfully
    fn is_loaded(&self) -> bool;
}

/// Factory injected into the worker so tests can substitute mock engines
pub trait BackendFactory: Send + Sync {
    /// Create an unloaded backend for the given configuration
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] when no backend is compiled in.
    fn create_backend(&self, config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>>;
}

/// Factory producing the default (ONNX Runtime) backend
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    #[cfg(feature = "onnx")]
    fn create_backend(&self, config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(crate::backends::OnnxBackend::new(config)?))
    }

    #[cfg(not(feature = "onnx"))]
    fn create_backend(&self, _config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>> {
        Err(Error::invalid_config(
            "No inference backend compiled in. Enable the `onnx` feature or inject a factory.",
        ))
    }
}

/// Validate a model output tensor and convert it into a [`Mask`]
///
/// The engine contract is a `[1, 1, H, W]` tensor of finite values. Wrong
/// rank, empty dimensions or non-finite samples are inference failures, not
/// panics.
///
/// # Errors
/// Returns [`Error::Inference`] for malformed output.
pub fn tensor_to_mask(tensor: &Array4<f32>) -> Result<Mask> {
    let shape = tensor.shape();
    let (batch, channels, height, width) = (
        shape.first().copied().unwrap_or(0),
        shape.get(1).copied().unwrap_or(0),
        shape.get(2).copied().unwrap_or(0),
        shape.get(3).copied().unwrap_or(0),
    );

    if batch != 1 || channels != 1 {
        return Err(Error::inference(format!(
            "Expected [1, 1, H, W] mask tensor, got {shape:?}"
        )));
    }
    if height == 0 || width == 0 {
        return Err(Error::inference(format!(
            "Mask tensor has empty spatial dimensions: {shape:?}"
        )));
    }

    let mut data = Vec::with_capacity(height * width);
    for value in tensor.iter() {
        if !value.is_finite() {
            return Err(Error::inference(
                "Mask tensor contains non-finite values (NaN or infinity)",
            ));
        }
        data.push(*value);
    }

    Mask::new(data, width as u32, height as u32)
}
