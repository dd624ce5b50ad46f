//! Error types for the background removal pipeline

use thiserror::Error as ThisError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the background removal pipeline
#[derive(ThisError, Debug)]
pub enum Error {
    /// Input file is not a readable image; raised before the worker is contacted
    #[error("Failed to decode input image: {0}")]
    Decode(#[from] image::ImageError),

    /// Network or asset failure while fetching or loading the model
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// The inference engine failed or returned malformed output
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Buffer ownership or integrity violation; unreachable in correct code
    #[error("Buffer transfer failed: {0}")]
    Transfer(String),

    /// A second submission arrived while a job was still in flight
    #[error("A job is already in flight on this orchestrator")]
    Busy,

    /// The job was cancelled before it started
    #[error("Job cancelled before it started")]
    Cancelled,

    /// The worker thread or its event channel went away mid-job
    #[error("Background worker is no longer running")]
    WorkerGone,

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new buffer transfer error
    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        Self::Transfer(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a model load error with network context
    pub fn network<E: std::fmt::Display>(context: &str, source: E) -> Self {
        Self::ModelLoad(format!("{context}: {source}"))
    }
}

/// Failure classification carried by a worker `Error` event
///
/// The worker converts every job-scoped failure into a single event with a
/// human-readable cause; the orchestrator maps the kind back onto [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// Model download or session construction failed
    ModelLoad,
    /// Backend inference failed or produced malformed output
    Inference,
    /// Buffer integrity violation inside the worker
    Transfer,
    /// Job was cancelled while still queued
    Cancelled,
}

impl JobErrorKind {
    /// Convert a worker event kind and message into the public error type
    pub(crate) fn into_error(self, message: String) -> Error {
        match self {
            Self::ModelLoad => Error::ModelLoad(message),
            Self::Inference => Error::Inference(message),
            Self::Transfer => Error::Transfer(message),
            Self::Cancelled => Error::Cancelled,
        }
    }
}
