//! Mock inference backends for pipeline testing
//!
//! These mocks stand in for the model runtime so worker and orchestrator
//! behavior (event ordering, single-flight loading, failure recovery) can be
//! verified without model files or a network.

use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{Error, Result};
use crate::inference::{BackendFactory, InferenceBackend};
use crate::models::PreprocessorConfig;
use crate::progress::DownloadEvent;
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared observation state for a mock factory and its backends
#[derive(Debug, Default)]
pub struct MockState {
    /// Number of completed or attempted `load` calls
    pub load_calls: usize,
    /// Number of `infer` calls
    pub infer_calls: usize,
    /// Number of backends the factory created
    pub backends_created: usize,
}

/// Behavior knobs for [`MockBackendFactory`]
#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Fail this many `load` calls before succeeding
    pub fail_loads: usize,
    /// Fail this many `infer` calls before succeeding
    pub fail_infers: usize,
    /// Inference returns a tensor containing NaN
    pub emit_nan: bool,
    /// Emit a synthetic weights download during `load`
    pub emit_download_events: bool,
    /// Sleep inside `load` (lets tests overlap submissions)
    pub load_delay: Duration,
    /// Sleep inside `infer`
    pub infer_delay: Duration,
    /// Model input size (kept tiny so tests stay fast)
    pub target_size: u32,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            fail_loads: 0,
            fail_infers: 0,
            emit_nan: false,
            emit_download_events: true,
            load_delay: Duration::ZERO,
            infer_delay: Duration::ZERO,
            target_size: 8,
        }
    }
}

/// Factory producing [`MockBackend`]s that share one observation state
pub struct MockBackendFactory {
    state: Arc<Mutex<MockState>>,
    options: MockOptions,
}

impl MockBackendFactory {
    /// Factory with default options (always succeeds)
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MockOptions::default())
    }

    /// Factory with explicit behavior knobs
    #[must_use]
    pub fn with_options(options: MockOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            options,
        }
    }

    /// Handle to the shared observation state
    #[must_use]
    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    /// Number of `load` calls observed so far
    #[must_use]
    pub fn load_calls(&self) -> usize {
        self.state.lock().unwrap().load_calls
    }
}

impl Default for MockBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(&self, _config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>> {
        let mut state = self.state.lock().unwrap();
        state.backends_created += 1;
        Ok(Box::new(MockBackend {
            loaded: false,
            state: Arc::clone(&self.state),
            options: self.options.clone(),
        }))
    }
}

/// Deterministic in-memory segmentation engine
///
/// Produces a mask that is foreground (1.0) in the left half and background
/// (0.0) in the right half of the model grid, regardless of input content.
pub struct MockBackend {
    loaded: bool,
    state: Arc<Mutex<MockState>>,
    options: MockOptions,
}

impl InferenceBackend for MockBackend {
    fn load(
        &mut self,
        _provider: ExecutionProvider,
        on_progress: &mut dyn FnMut(DownloadEvent),
    ) -> Result<()> {
        if !self.options.load_delay.is_zero() {
            std::thread::sleep(self.options.load_delay);
        }

        let should_fail = {
            let mut state = self.state.lock().unwrap();
            state.load_calls += 1;
            state.load_calls <= self.options.fail_loads
        };
        if should_fail {
            return Err(Error::model_load("mock load failure"));
        }

        if self.options.emit_download_events {
            let resource = "onnx/model.onnx";
            on_progress(DownloadEvent::initiate(resource));
            on_progress(DownloadEvent::progress(resource, 512, Some(1024)));
            on_progress(DownloadEvent::done(resource, 1024));
        }

        self.loaded = true;
        Ok(())
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.options.infer_delay.is_zero() {
            std::thread::sleep(self.options.infer_delay);
        }
        let should_fail = {
            let mut state = self.state.lock().unwrap();
            state.infer_calls += 1;
            state.infer_calls <= self.options.fail_infers
        };

        if !self.loaded {
            return Err(Error::inference("mock backend not loaded"));
        }
        if should_fail {
            return Err(Error::inference("mock inference failure"));
        }

        let shape = input.shape();
        let (height, width) = (
            shape.get(2).copied().unwrap_or(0),
            shape.get(3).copied().unwrap_or(0),
        );

        let mut output = Array4::<f32>::zeros((1, 1, height, width));
        #[allow(clippy::indexing_slicing)] // Pre-allocated to matching shape
        for y in 0..height {
            for x in 0..width {
                output[[0, 0, y, x]] = if x < width / 2 { 1.0 } else { 0.0 };
            }
        }
        if self.options.emit_nan {
            #[allow(clippy::indexing_slicing)]
            if height > 0 && width > 0 {
                output[[0, 0, 0, 0]] = f32::NAN;
            }
        }
        Ok(output)
    }

    fn preprocessor(&self) -> Result<PreprocessorConfig> {
        Ok(PreprocessorConfig {
            target_size: [self.options.target_size, self.options.target_size],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        })
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_counts_calls() {
        let factory = MockBackendFactory::new();
        let mut backend = factory.create_backend(&PipelineConfig::default()).unwrap();
        assert!(!backend.is_loaded());

        backend.load(ExecutionProvider::Cpu, &mut |_| {}).unwrap();
        assert!(backend.is_loaded());

        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        backend.infer(&input).unwrap();

        let state = factory.state();
        let state = state.lock().unwrap();
        assert_eq!(state.load_calls, 1);
        assert_eq!(state.infer_calls, 1);
        assert_eq!(state.backends_created, 1);
    }

    #[test]
    fn test_mock_half_mask_pattern() {
        let factory = MockBackendFactory::new();
        let mut backend = factory.create_backend(&PipelineConfig::default()).unwrap();
        backend.load(ExecutionProvider::Cpu, &mut |_| {}).unwrap();

        let input = Array4::<f32>::zeros((1, 3, 4, 4));
        let output = backend.infer(&input).unwrap();
        assert_eq!(output.shape(), &[1, 1, 4, 4]);
        assert_eq!(output[[0, 0, 0, 0]], 1.0);
        assert_eq!(output[[0, 0, 0, 3]], 0.0);
    }

    #[test]
    fn test_mock_failure_injection() {
        let factory = MockBackendFactory::with_options(MockOptions {
            fail_loads: 1,
            ..MockOptions::default()
        });

        let mut backend = factory.create_backend(&PipelineConfig::default()).unwrap();
        assert!(backend.load(ExecutionProvider::Cpu, &mut |_| {}).is_err());

        // A fresh attempt succeeds once the configured failures are spent
        let mut backend = factory.create_backend(&PipelineConfig::default()).unwrap();
        assert!(backend.load(ExecutionProvider::Cpu, &mut |_| {}).is_ok());
        assert_eq!(factory.load_calls(), 2);
    }

    #[test]
    fn test_mock_download_script() {
        let factory = MockBackendFactory::new();
        let mut backend = factory.create_backend(&PipelineConfig::default()).unwrap();
        let mut events = Vec::new();
        backend
            .load(ExecutionProvider::Cpu, &mut |e| events.push(e))
            .unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.resource == "onnx/model.onnx"));
    }
}
