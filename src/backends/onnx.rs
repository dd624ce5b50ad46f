//! ONNX Runtime inference backend
//!
//! Wraps an `ort` session behind the [`InferenceBackend`] trait. Model assets
//! are resolved through the download cache; execution providers are probed
//! once per process and the choice is reused by every later load.

use crate::config::{ExecutionProvider, PipelineConfig};
use crate::download::ModelDownloader;
use crate::error::{Error, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelSpec, PreprocessorConfig};
use crate::progress::DownloadEvent;
use ndarray::Array4;
use ort::execution_providers::{
    CoreML as CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider, CUDA as CUDAExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::sync::OnceLock;

/// Result of the one-time hardware probe
static RESOLVED_PROVIDER: OnceLock<ExecutionProvider> = OnceLock::new();

/// ONNX Runtime backend for salient-object segmentation models
pub struct OnnxBackend {
    spec: ModelSpec,
    allow_download: bool,
    session: Option<Session>,
    preprocessor: Option<PreprocessorConfig>,
}

impl OnnxBackend {
    /// Create an unloaded backend for the configured model
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an unsupported model spec.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            spec: config.model.clone(),
            allow_download: config.allow_download,
            session: None,
            preprocessor: None,
        })
    }

    /// Resolve `Auto` to a concrete provider, probing hardware at most once
    /// per process
    #[must_use]
    pub fn resolve_provider(requested: ExecutionProvider) -> ExecutionProvider {
        match requested {
            ExecutionProvider::Auto => *RESOLVED_PROVIDER.get_or_init(Self::probe_best_provider),
            explicit => explicit,
        }
    }

    fn probe_best_provider() -> ExecutionProvider {
        log::debug!("Probing execution providers (once per process)");
        if OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false) {
            log::info!("CUDA execution provider is available and will be used");
            return ExecutionProvider::Cuda;
        }
        if OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
        {
            log::info!("CoreML execution provider is available and will be used");
            return ExecutionProvider::CoreMl;
        }
        log::info!("No hardware acceleration available, using CPU");
        ExecutionProvider::Cpu
    }

    /// Apply the resolved provider to a session builder, falling back to CPU
    /// when an explicitly requested accelerator is missing
    fn apply_provider(
        builder: ort::session::builder::SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<ort::session::builder::SessionBuilder> {
        let builder = match provider {
            ExecutionProvider::Cuda => {
                let cuda = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
                    builder
                        .with_execution_providers([cuda.build()])
                        .map_err(|e| {
                            Error::model_load(format!("Failed to set CUDA provider: {e}"))
                        })?
                } else {
                    log::warn!("CUDA requested but not available, falling back to CPU");
                    builder
                }
            },
            ExecutionProvider::CoreMl => {
                let coreml = CoreMLExecutionProvider::default().with_subgraphs(true);
                if OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false)
                {
                    builder
                        .with_execution_providers([coreml.build()])
                        .map_err(|e| {
                            Error::model_load(format!("Failed to set CoreML provider: {e}"))
                        })?
                } else {
                    log::warn!("CoreML requested but not available, falling back to CPU");
                    builder
                }
            },
            ExecutionProvider::Cpu | ExecutionProvider::Auto => builder,
        };
        Ok(builder)
    }
}

impl InferenceBackend for OnnxBackend {
    fn load(
        &mut self,
        provider: ExecutionProvider,
        on_progress: &mut dyn FnMut(DownloadEvent),
    ) -> Result<()> {
        let load_start = instant::Instant::now();

        // Resolve model assets, downloading on a cache miss. The worker
        // thread has no ambient runtime, so drive the async downloader with
        // a local one.
        let downloader = ModelDownloader::new()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::model_load(format!("Failed to start download runtime: {e}")))?;
        let assets = runtime.block_on(downloader.ensure_model(
            &self.spec,
            self.allow_download,
            on_progress,
        ))?;

        let preprocessor = PreprocessorConfig::from_file(&assets.preprocessor)?;

        let model_data = std::fs::read(&assets.weights).map_err(|e| {
            Error::model_load(format!(
                "Failed to read model weights '{}': {e}",
                assets.weights.display()
            ))
        })?;

        let resolved = Self::resolve_provider(provider);
        log::debug!("Building session with provider {resolved}");

        let builder = Session::builder()
            .map_err(|e| Error::model_load(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::model_load(format!("Failed to set optimization level: {e}")))?;

        let builder = Self::apply_provider(builder, resolved)?;

        let intra_threads = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| Error::model_load(format!("Failed to set intra threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| Error::model_load(format!("Failed to build session: {e}")))?;

        self.session = Some(session);
        self.preprocessor = Some(preprocessor);

        log::info!(
            "Model {} loaded in {:.0}ms ({resolved})",
            self.spec.model_id(),
            load_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::inference("ONNX session not loaded"))?;

        log::debug!("Running inference with input shape {:?}", input.dim());
        let inference_start = instant::Instant::now();

        let input_value = Value::from_array(input.clone())
            .map_err(|e| Error::inference(format!("Failed to convert input tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| Error::inference(format!("ONNX inference failed: {e}")))?;

        // Positional output access: the first (and for these models, only)
        // output is the mask tensor
        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| Error::inference("Model produced no output tensors"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| Error::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| Error::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output_tensor.shape().to_vec();
        if shape.len() != 4 {
            return Err(Error::inference(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        }

        let data = output_tensor.view().to_owned();
        let result = Array4::from_shape_vec(
            (
                shape.first().copied().unwrap_or(1),
                shape.get(1).copied().unwrap_or(1),
                shape.get(2).copied().unwrap_or(1),
                shape.get(3).copied().unwrap_or(1),
            ),
            data.into_raw_vec_and_offset().0,
        )
        .map_err(|e| Error::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Inference complete in {:.0}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    fn preprocessor(&self) -> Result<PreprocessorConfig> {
        self.preprocessor
            .clone()
            .ok_or_else(|| Error::model_load("Preprocessor config not loaded"))
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some()
    }
}
