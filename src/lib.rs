#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! # cutout
//!
//! On-device background removal: drop an image in, get the same image back
//! with its background turned transparent. A pretrained salient-object
//! segmentation model (RMBG-1.4 by default) produces a foreground mask which
//! is composited into the alpha channel of the original pixels.
//!
//! All heavy work happens off the caller's thread. A single background worker
//! owns the model (downloaded once, cached, loaded lazily with single-flight
//! semantics) and processes jobs strictly one at a time; the
//! [`Orchestrator`] hands pixel buffers to it by move, tracks a progress
//! state machine and resolves to a [`ResultImage`] or a typed [`Error`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use cutout::Orchestrator;
//!
//! # async fn example() -> cutout::Result<()> {
//! let orchestrator = Orchestrator::new()?;
//! let result = orchestrator.submit_file("photo.jpg").await?;
//! result.save_png("photo-cutout.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Observing progress
//!
//! The first job downloads and loads the model; a watch channel reports
//! per-resource download progress and the pipeline stage:
//!
//! ```rust,no_run
//! use cutout::{Orchestrator, ProgressState};
//!
//! # async fn example() -> cutout::Result<()> {
//! let orchestrator = Orchestrator::new()?;
//! let mut progress = orchestrator.progress();
//! tokio::spawn(async move {
//!     while progress.changed().await.is_ok() {
//!         if let ProgressState::LoadingModel { percent, message } = &*progress.borrow() {
//!             println!("{message} ({percent:?})");
//!         }
//!     }
//! });
//! orchestrator.submit_file("photo.jpg").await?.save_png("out.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use cutout::{ExecutionProvider, ModelSpec, Orchestrator, PipelineConfig, WorkerHandle};
//! use cutout::DefaultBackendFactory;
//! use std::sync::Arc;
//!
//! # fn example() -> cutout::Result<()> {
//! let config = PipelineConfig::builder()
//!     .model(ModelSpec::from_url("https://huggingface.co/briaai/RMBG-1.4")?)
//!     .execution_provider(ExecutionProvider::Cpu)
//!     .allow_download(false) // fail instead of fetching on a cache miss
//!     .build()?;
//! let worker = WorkerHandle::spawn(config, Arc::new(DefaultBackendFactory))?;
//! let orchestrator = Orchestrator::with_worker(worker);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `onnx` (default): ONNX Runtime inference backend with CUDA/CoreML
//!   acceleration and CPU fallback
//! - `cli` (default): the `cutout` command-line frontend
//! - `webp-support` (default): WebP decode via the image crate

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod orchestrator;
pub mod preprocess;
pub mod progress;
pub mod types;
pub mod worker;

// Public API exports
#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
pub use compositor::{composite, resample_bilinear};
pub use config::{ExecutionProvider, PipelineConfig, PipelineConfigBuilder};
pub use download::ModelDownloader;
pub use error::{Error, Result};
pub use inference::{BackendFactory, DefaultBackendFactory, InferenceBackend};
pub use models::{ModelAssets, ModelSpec, PreprocessorConfig, DEFAULT_MODEL_URL};
pub use orchestrator::Orchestrator;
pub use preprocess::ImagePreprocessor;
pub use progress::{DownloadEvent, DownloadStatus, ModelLoadProgress, ProgressState};
pub use types::{ImageJob, Mask, ResultImage};
pub use worker::WorkerHandle;

/// Remove the background from encoded image bytes in one call
///
/// Convenience wrapper that runs a throwaway [`Orchestrator`] against the
/// shared worker. Use an explicit orchestrator to observe progress or to
/// serialize multiple submissions through one busy guard.
///
/// # Errors
/// See [`Orchestrator::submit_bytes`].
pub async fn remove_background_from_bytes(bytes: Vec<u8>) -> Result<ResultImage> {
    Orchestrator::new()?.submit_bytes(bytes, "bytes").await
}

/// Remove the background from an image file in one call
///
/// # Errors
/// See [`Orchestrator::submit_file`].
pub async fn remove_background_from_file<P: AsRef<std::path::Path>>(
    path: P,
) -> Result<ResultImage> {
    Orchestrator::new()?.submit_file(path).await
}
