//! Processing orchestrator
//!
//! The caller-facing coordinator: decodes an input into pixel data, moves it
//! to the background worker, multiplexes worker events into the
//! [`ProgressState`] machine and resolves to a [`ResultImage`] or a typed
//! error. Nothing here blocks the caller's async thread; decoding runs on a
//! blocking thread and everything else is message passing.
//!
//! State machine per job:
//!
//! ```text
//! Idle --submit--> LoadingModel --model_ready--> Processing --complete--> Complete
//!                       |                            |
//!                       +---------- error ----------+--> Error
//! ```
//!
//! `LoadingModel` is skipped once the worker reports the model warm. A fresh
//! submit from either terminal state starts the cycle again.

use crate::error::{Error, Result};
use crate::progress::{ModelLoadProgress, ProgressState};
use crate::types::{ImageJob, ResultImage};
use crate::worker::{JobRequest, WorkerEvent, WorkerHandle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Coordinates one background-removal job at a time
///
/// Cheap to construct; all heavy state lives in the shared worker. A second
/// submission while one is pending is rejected with [`Error::Busy`] rather
/// than interleaving progress events.
pub struct Orchestrator {
    worker: WorkerHandle,
    progress: watch::Sender<ProgressState>,
    in_flight: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Orchestrator backed by the process-wide worker singleton
    ///
    /// # Errors
    /// Returns [`Error::WorkerGone`] when the worker thread cannot be
    /// spawned.
    pub fn new() -> Result<Self> {
        Ok(Self::with_worker(WorkerHandle::shared()?))
    }

    /// Orchestrator backed by an explicit worker (tests inject mocks here)
    #[must_use]
    pub fn with_worker(worker: WorkerHandle) -> Self {
        let (progress, _) = watch::channel(ProgressState::Idle);
        Self {
            worker,
            progress,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to progress updates
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<ProgressState> {
        self.progress.subscribe()
    }

    /// Snapshot of the current progress state
    #[must_use]
    pub fn current_progress(&self) -> ProgressState {
        self.progress.borrow().clone()
    }

    /// Whether the segmentation model has been loaded by a previous job
    #[must_use]
    pub fn is_model_loaded(&self) -> bool {
        self.worker.is_model_warm()
    }

    /// Remove the background from an image file
    ///
    /// # Errors
    /// [`Error::Io`] when the file cannot be read, [`Error::Decode`] when it
    /// is not an image, [`Error::Busy`] while another job is pending, plus
    /// the job-scoped errors of [`submit`](Self::submit).
    pub async fn submit_file<P: AsRef<Path>>(&self, path: P) -> Result<ResultImage> {
        let path = path.as_ref();
        let source_id = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        let guard = self.begin()?;
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(Error::Io(e), guard)),
        };
        self.decode_and_run(bytes, source_id, guard).await
    }

    /// Remove the background from encoded image bytes
    ///
    /// # Errors
    /// [`Error::Decode`] for unreadable input (raised without contacting the
    /// worker), [`Error::Busy`] while another job is pending, plus the
    /// job-scoped errors of [`submit`](Self::submit).
    pub async fn submit_bytes(
        &self,
        bytes: Vec<u8>,
        source_id: impl Into<String>,
    ) -> Result<ResultImage> {
        let guard = self.begin()?;
        self.decode_and_run(bytes, source_id.into(), guard).await
    }

    /// Remove the background from an already decoded job
    ///
    /// # Errors
    /// [`Error::Busy`] while another job is pending; [`Error::ModelLoad`],
    /// [`Error::Inference`] or [`Error::Transfer`] when the worker reports a
    /// failure; [`Error::WorkerGone`] when the worker dies mid-job.
    pub async fn submit(&self, job: ImageJob) -> Result<ResultImage> {
        self.submit_with_cancellation(job, CancellationToken::new())
            .await
    }

    /// Like [`submit`](Self::submit), honoring a cancellation token
    ///
    /// Cancellation is checked when the job reaches the front of the worker
    /// queue: a token cancelled while the job is still queued rejects it with
    /// [`Error::Cancelled`] before any work starts.
    ///
    /// # Errors
    /// As [`submit`](Self::submit), plus [`Error::Cancelled`].
    pub async fn submit_with_cancellation(
        &self,
        job: ImageJob,
        cancel: CancellationToken,
    ) -> Result<ResultImage> {
        let guard = self.begin()?;
        self.run_job(job, cancel, guard).await
    }

    /// Decode on a blocking thread, then run the job
    async fn decode_and_run(
        &self,
        bytes: Vec<u8>,
        source_id: String,
        guard: InFlightGuard,
    ) -> Result<ResultImage> {
        let decoded = tokio::task::spawn_blocking(move || ImageJob::from_bytes(&bytes, source_id))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("decode task failed: {e}"))));

        match decoded {
            Ok(Ok(job)) => self.run_job(job, CancellationToken::new(), guard).await,
            Ok(Err(e)) | Err(e) => Err(self.fail(e, guard)),
        }
    }

    /// Drive one job through the worker and the progress state machine
    async fn run_job(
        &self,
        job: ImageJob,
        cancel: CancellationToken,
        guard: InFlightGuard,
    ) -> Result<ResultImage> {
        let source = job.source_id().to_string();
        debug!(%source, width = job.width(), height = job.height(), "submitting job");

        self.set_state(if self.worker.is_model_warm() {
            ProgressState::Processing
        } else {
            ProgressState::LoadingModel {
                percent: None,
                message: "Loading model...".to_string(),
            }
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.worker.submit(JobRequest {
            job,
            events: events_tx,
            cancel,
        }) {
            return Err(self.fail(e, guard));
        }

        let mut load_progress = ModelLoadProgress::new();
        while let Some(event) = events_rx.recv().await {
            match event {
                WorkerEvent::Download(download) => {
                    load_progress.record(&download);
                    self.set_state(ProgressState::LoadingModel {
                        percent: load_progress.overall_percent(),
                        message: load_progress.message(),
                    });
                },
                WorkerEvent::ModelReady => {
                    self.set_state(ProgressState::Processing);
                },
                WorkerEvent::Complete(result) => {
                    self.set_state(ProgressState::Complete);
                    drop(guard);
                    return Ok(result);
                },
                WorkerEvent::Error { kind, message } => {
                    return Err(self.fail(kind.into_error(message), guard));
                },
            }
        }

        // The worker dropped the channel without a terminal event
        Err(self.fail(Error::WorkerGone, guard))
    }

    /// Reject the job, publishing the failure on the progress channel
    fn fail(&self, error: Error, guard: InFlightGuard) -> Error {
        self.set_state(ProgressState::Error {
            message: error.to_string(),
        });
        drop(guard);
        error
    }

    fn set_state(&self, state: ProgressState) {
        self.progress.send_replace(state);
    }

    /// Claim the single in-flight slot
    fn begin(&self) -> Result<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(InFlightGuard {
            flag: Arc::clone(&self.in_flight),
        })
    }
}

/// Releases the in-flight slot on drop, including early-error paths
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
