//! Configuration types for the processing pipeline

use crate::error::{Error, Result};
use crate::models::ModelSpec;

/// Execution device for the inference engine
///
/// `Auto` probes hardware acceleration once per process (CUDA, then CoreML)
/// and falls back to CPU; the probe result is cached and never re-run per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    /// Probe for GPU acceleration, fall back to CPU
    #[default]
    Auto,
    /// NVIDIA CUDA
    Cuda,
    /// Apple CoreML
    CoreMl,
    /// Plain CPU inference
    Cpu,
}

impl ExecutionProvider {
    /// Parse a provider name as accepted on the command line
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "auto" => Ok(Self::Auto),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            "cpu" => Ok(Self::Cpu),
            _ => Err(Error::invalid_config(format!(
                "Unknown execution provider: {name}. Supported: auto, cpu, cuda, coreml"
            ))),
        }
    }

    /// Canonical lowercase name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cuda => "cuda",
            Self::CoreMl => "coreml",
            Self::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for the processing pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Which segmentation model to run
    pub model: ModelSpec,
    /// Requested execution device
    pub execution_provider: ExecutionProvider,
    /// Whether a missing model may be fetched from the network; when false a
    /// cache miss becomes a model-load error instead of a download
    pub allow_download: bool,
}

impl PipelineConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelSpec::default(),
            execution_provider: ExecutionProvider::Auto,
            allow_download: true,
        }
    }
}

/// Builder for [`PipelineConfig`]
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    #[must_use]
    pub fn model(mut self, model: ModelSpec) -> Self {
        self.config.model = model;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn allow_download(mut self, allow: bool) -> Self {
        self.config.allow_download = allow;
        self
    }

    /// Build the pipeline configuration
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] when the model URL is not supported.
    pub fn build(self) -> Result<PipelineConfig> {
        // Re-validate in case the ModelSpec struct was built by hand
        ModelSpec::from_url(self.config.model.url.clone())?;
        Ok(self.config)
    }
}
