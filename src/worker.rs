//! Background processing worker
//!
//! A single dedicated OS thread owns the model singleton and processes jobs
//! strictly one at a time: the next job is not picked up until the previous
//! one has emitted its terminal event. The thread is the only code that ever
//! constructs the model, which makes lazy initialization single-flight by
//! construction; concurrent first-submissions queue behind one load instead
//! of triggering duplicate downloads.
//!
//! All communication is message passing. Jobs arrive over a std mpsc channel
//! (the pixel buffer moves with them); per-job events flow back over a tokio
//! unbounded channel so the orchestrator can await them without blocking.

use crate::compositor;
use crate::config::PipelineConfig;
use crate::error::{Error, JobErrorKind, Result};
use crate::inference::{self, BackendFactory, DefaultBackendFactory, InferenceBackend};
use crate::models::PreprocessorConfig;
use crate::preprocess::ImagePreprocessor;
use crate::progress::DownloadEvent;
use crate::types::{ImageJob, ResultImage};
use image::RgbaImage;
use instant::Instant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Event stream emitted by the worker for one job
///
/// Per job the stream is `Download* ModelReady Complete` on success or
/// `Download* Error` on failure; `ModelReady` is emitted exactly once even
/// when the model was already warm.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// Model asset download progress (cold start only)
    Download(DownloadEvent),
    /// Model is loaded; inference is about to run
    ModelReady,
    /// Terminal: job succeeded, buffer ownership moves to the receiver
    Complete(ResultImage),
    /// Terminal: job failed
    Error {
        kind: JobErrorKind,
        message: String,
    },
}

/// One queued job plus its reply channel and cancellation token
pub(crate) struct JobRequest {
    pub(crate) job: ImageJob,
    pub(crate) events: UnboundedSender<WorkerEvent>,
    pub(crate) cancel: CancellationToken,
}

static SHARED_WORKER: OnceLock<WorkerHandle> = OnceLock::new();

/// Cloneable handle to the background worker thread
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<JobRequest>,
    warm: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Spawn a private worker thread with an injected backend factory
    ///
    /// # Errors
    /// Returns [`Error::WorkerGone`] when the OS refuses to spawn the thread.
    pub fn spawn(config: PipelineConfig, factory: Arc<dyn BackendFactory>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let warm = Arc::new(AtomicBool::new(false));
        let warm_flag = Arc::clone(&warm);

        std::thread::Builder::new()
            .name("cutout-worker".to_string())
            .spawn(move || run_worker(&receiver, &config, factory.as_ref(), &warm_flag))
            .map_err(|e| {
                warn!("failed to spawn worker thread: {e}");
                Error::WorkerGone
            })?;

        Ok(Self { sender, warm })
    }

    /// Process-wide worker singleton, created lazily on first use
    ///
    /// # Errors
    /// Returns [`Error::WorkerGone`] when the thread cannot be spawned.
    pub fn shared() -> Result<WorkerHandle> {
        if let Some(handle) = SHARED_WORKER.get() {
            return Ok(handle.clone());
        }
        let handle = Self::spawn(PipelineConfig::default(), Arc::new(DefaultBackendFactory))?;
        // On a lost init race the extra thread parks on an empty channel,
        // sees it close when `handle` drops, and exits.
        Ok(SHARED_WORKER.get_or_init(|| handle).clone())
    }

    /// Queue a job; ownership of the pixel buffer moves with the request
    pub(crate) fn submit(&self, request: JobRequest) -> Result<()> {
        self.sender.send(request).map_err(|_| Error::WorkerGone)
    }

    /// Whether the model singleton has been constructed
    ///
    /// Lets the orchestrator skip the `LoadingModel` state on warm submits.
    #[must_use]
    pub fn is_model_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }
}

/// The loaded model and its preprocessing contract
struct LoadedModel {
    backend: Box<dyn InferenceBackend>,
    preprocessor: PreprocessorConfig,
}

fn run_worker(
    receiver: &mpsc::Receiver<JobRequest>,
    config: &PipelineConfig,
    factory: &dyn BackendFactory,
    warm: &AtomicBool,
) {
    debug!("background worker started");
    let mut model: Option<LoadedModel> = None;

    // recv() returns only after the previous iteration finished, so jobs are
    // strictly serialized and a second job cannot interleave its events.
    while let Ok(request) = receiver.recv() {
        process_job(&mut model, config, factory, warm, request);
    }
    debug!("background worker shutting down");
}

fn process_job(
    model: &mut Option<LoadedModel>,
    config: &PipelineConfig,
    factory: &dyn BackendFactory,
    warm: &AtomicBool,
    request: JobRequest,
) {
    let JobRequest {
        job,
        events,
        cancel,
    } = request;
    let source = job.source_id().to_string();

    if cancel.is_cancelled() {
        debug!(%source, "job cancelled before start");
        let _ = events.send(WorkerEvent::Error {
            kind: JobErrorKind::Cancelled,
            message: format!("job '{source}' cancelled before it started"),
        });
        return;
    }

    // Lazy singleton: constructed here, on this thread, at most once. A
    // failed load leaves the slot empty so the next job retries instead of
    // being stuck behind a poisoned handle.
    if model.is_none() {
        match load_model(config, factory, &events) {
            Ok(loaded) => {
                *model = Some(loaded);
                warm.store(true, Ordering::Release);
            },
            Err(e) => {
                warn!(%source, error = %e, "model load failed");
                let _ = events.send(WorkerEvent::Error {
                    kind: classify(&e),
                    message: e.to_string(),
                });
                return;
            },
        }
    }

    // Exactly one ModelReady per job, warm or cold; the orchestrator keys
    // its transition to Processing off this event.
    if events.send(WorkerEvent::ModelReady).is_err() {
        debug!(%source, "orchestrator went away before inference");
        return;
    }

    let Some(loaded) = model.as_mut() else {
        let _ = events.send(WorkerEvent::Error {
            kind: JobErrorKind::ModelLoad,
            message: "model handle unexpectedly absent".to_string(),
        });
        return;
    };

    match execute(loaded, job) {
        Ok(result) => {
            let _ = events.send(WorkerEvent::Complete(result));
        },
        Err(e) => {
            // Inference failures do not discard the warm model
            warn!(%source, error = %e, "job failed");
            let _ = events.send(WorkerEvent::Error {
                kind: classify(&e),
                message: e.to_string(),
            });
        },
    }
}

fn load_model(
    config: &PipelineConfig,
    factory: &dyn BackendFactory,
    events: &UnboundedSender<WorkerEvent>,
) -> Result<LoadedModel> {
    let load_start = Instant::now();
    let mut backend = factory.create_backend(config)?;

    let mut forward = |event: DownloadEvent| {
        let _ = events.send(WorkerEvent::Download(event));
    };
    backend.load(config.execution_provider, &mut forward)?;

    let preprocessor = backend.preprocessor()?;
    info!(
        model = %config.model.model_id(),
        elapsed_ms = load_start.elapsed().as_millis() as u64,
        "model loaded"
    );
    Ok(LoadedModel {
        backend,
        preprocessor,
    })
}

/// Run one job through preprocess, inference and compositing
fn execute(loaded: &mut LoadedModel, job: ImageJob) -> Result<ResultImage> {
    let job_start = Instant::now();
    let (pixels, width, height, source) = job.into_parts();

    let rgba = RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| Error::transfer("job buffer rejected by image container"))?;

    let tensor = ImagePreprocessor::to_tensor(&rgba, &loaded.preprocessor)?;
    let output = loaded.backend.infer(&tensor)?;
    let mask = inference::tensor_to_mask(&output)?;

    let composed = compositor::composite(rgba.as_raw(), width, height, &mask)?;
    let result = ResultImage::from_raw(composed, width, height)?;

    info!(
        %source,
        width,
        height,
        elapsed_ms = job_start.elapsed().as_millis() as u64,
        "job complete"
    );
    Ok(result)
}

fn classify(error: &Error) -> JobErrorKind {
    match error {
        Error::ModelLoad(_) | Error::InvalidConfig(_) => JobErrorKind::ModelLoad,
        Error::Transfer(_) => JobErrorKind::Transfer,
        Error::Cancelled => JobErrorKind::Cancelled,
        _ => JobErrorKind::Inference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackendFactory, MockOptions};
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    fn red_job(size: u32) -> ImageJob {
        let pixels = std::iter::repeat([255u8, 0, 0, 255])
            .take((size * size) as usize)
            .flatten()
            .collect();
        ImageJob::new(pixels, size, size, "test.png").unwrap()
    }

    fn spawn_mock_worker(options: MockOptions) -> (WorkerHandle, Arc<MockBackendFactory>) {
        let factory = Arc::new(MockBackendFactory::with_options(options));
        let handle = WorkerHandle::spawn(
            PipelineConfig::default(),
            Arc::clone(&factory) as Arc<dyn BackendFactory>,
        )
        .unwrap();
        (handle, factory)
    }

    async fn run_job(handle: &WorkerHandle, job: ImageJob) -> Vec<WorkerEvent> {
        run_job_with_token(handle, job, CancellationToken::new()).await
    }

    async fn run_job_with_token(
        handle: &WorkerHandle,
        job: ImageJob,
        cancel: CancellationToken,
    ) -> Vec<WorkerEvent> {
        let (tx, mut rx) = unbounded_channel();
        handle
            .submit(JobRequest {
                job,
                events: tx,
                cancel,
            })
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = matches!(
                event,
                WorkerEvent::Complete(_) | WorkerEvent::Error { .. }
            );
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    fn kind(event: &WorkerEvent) -> &'static str {
        match event {
            WorkerEvent::Download(_) => "download",
            WorkerEvent::ModelReady => "model_ready",
            WorkerEvent::Complete(_) => "complete",
            WorkerEvent::Error { .. } => "error",
        }
    }

    #[tokio::test]
    async fn test_cold_job_event_order() {
        let (handle, _factory) = spawn_mock_worker(MockOptions::default());
        assert!(!handle.is_model_warm());

        let events = run_job(&handle, red_job(4)).await;
        let kinds: Vec<_> = events.iter().map(kind).collect();

        // Download events strictly precede the single ModelReady, which
        // precedes the terminal Complete
        let ready_at = kinds.iter().position(|k| *k == "model_ready").unwrap();
        assert!(ready_at >= 1, "cold start must emit download events first");
        assert!(kinds[..ready_at].iter().all(|k| *k == "download"));
        assert_eq!(
            kinds.iter().filter(|k| **k == "model_ready").count(),
            1,
            "exactly one model_ready per job"
        );
        assert_eq!(*kinds.last().unwrap(), "complete");
        assert!(!kinds.contains(&"error"));
        assert!(handle.is_model_warm());
    }

    #[tokio::test]
    async fn test_warm_job_still_emits_model_ready() {
        let (handle, factory) = spawn_mock_worker(MockOptions::default());

        run_job(&handle, red_job(4)).await;
        let events = run_job(&handle, red_job(4)).await;
        let kinds: Vec<_> = events.iter().map(kind).collect();

        assert_eq!(kinds, vec!["model_ready", "complete"]);
        assert_eq!(factory.load_calls(), 1, "warm job must not reload");
    }

    #[tokio::test]
    async fn test_single_flight_model_load() {
        let (handle, factory) = spawn_mock_worker(MockOptions {
            load_delay: Duration::from_millis(50),
            ..MockOptions::default()
        });

        // Queue both jobs before the first load can finish
        let (first, second) = tokio::join!(run_job(&handle, red_job(4)), run_job(&handle, red_job(4)));

        assert!(matches!(first.last(), Some(WorkerEvent::Complete(_))));
        assert!(matches!(second.last(), Some(WorkerEvent::Complete(_))));

        let state = factory.state();
        let state = state.lock().unwrap();
        assert_eq!(state.load_calls, 1, "concurrent cold jobs must share one load");
        assert_eq!(state.backends_created, 1);
    }

    #[tokio::test]
    async fn test_jobs_are_serialized_not_interleaved() {
        let (handle, _factory) = spawn_mock_worker(MockOptions {
            infer_delay: Duration::from_millis(20),
            ..MockOptions::default()
        });

        // Both jobs share one event channel, so the receiver observes the
        // worker's true send order across jobs.
        let (tx, mut rx) = unbounded_channel();
        for _ in 0..2 {
            handle
                .submit(JobRequest {
                    job: red_job(4),
                    events: tx.clone(),
                    cancel: CancellationToken::new(),
                })
                .unwrap();
        }
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(kind(&event));
        }

        let expected_tail = ["model_ready", "complete", "model_ready", "complete"];
        assert!(
            kinds.ends_with(&expected_tail),
            "job B's events must start after job A's terminal event, got {kinds:?}"
        );
    }

    #[tokio::test]
    async fn test_model_load_failure_is_retried_next_job() {
        let (handle, factory) = spawn_mock_worker(MockOptions {
            fail_loads: 1,
            ..MockOptions::default()
        });

        let events = run_job(&handle, red_job(4)).await;
        match events.last().unwrap() {
            WorkerEvent::Error { kind, .. } => assert_eq!(*kind, JobErrorKind::ModelLoad),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(!events.iter().any(|e| matches!(e, WorkerEvent::ModelReady)));
        assert!(!handle.is_model_warm(), "failed load must not mark warm");

        // The singleton is not poisoned: the next job loads successfully
        let events = run_job(&handle, red_job(4)).await;
        assert!(matches!(events.last(), Some(WorkerEvent::Complete(_))));
        assert_eq!(factory.load_calls(), 2);
        assert!(handle.is_model_warm());
    }

    #[tokio::test]
    async fn test_inference_failure_keeps_model_warm() {
        let (handle, factory) = spawn_mock_worker(MockOptions {
            fail_infers: 1,
            ..MockOptions::default()
        });

        let events = run_job(&handle, red_job(4)).await;
        match events.last().unwrap() {
            WorkerEvent::Error { kind, .. } => assert_eq!(*kind, JobErrorKind::Inference),
            other => panic!("expected error event, got {other:?}"),
        }

        let events = run_job(&handle, red_job(4)).await;
        assert!(matches!(events.last(), Some(WorkerEvent::Complete(_))));
        assert_eq!(factory.load_calls(), 1, "failed job must not corrupt the model");
    }

    #[tokio::test]
    async fn test_nan_output_is_an_inference_error() {
        let (handle, _factory) = spawn_mock_worker(MockOptions {
            emit_nan: true,
            ..MockOptions::default()
        });

        let events = run_job(&handle, red_job(4)).await;
        match events.last().unwrap() {
            WorkerEvent::Error { kind, message } => {
                assert_eq!(*kind, JobErrorKind::Inference);
                assert!(message.contains("non-finite"));
            },
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_job_is_rejected_before_start() {
        let (handle, factory) = spawn_mock_worker(MockOptions::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = run_job_with_token(&handle, red_job(4), cancel).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            WorkerEvent::Error { kind, .. } => assert_eq!(*kind, JobErrorKind::Cancelled),
            other => panic!("expected cancellation, got {other:?}"),
        }
        let state = factory.state();
        let state = state.lock().unwrap();
        assert_eq!(state.load_calls, 0, "cancelled job must not trigger a load");
        assert_eq!(state.infer_calls, 0);
    }

    #[tokio::test]
    async fn test_half_mask_composites_into_alpha() {
        // Mock mask is 1.0 in the left half, 0.0 in the right half of its
        // 8x8 grid; on a 4x4 red input the left two columns must come back
        // opaque and the right two transparent, RGB untouched.
        let (handle, _factory) = spawn_mock_worker(MockOptions::default());

        let events = run_job(&handle, red_job(4)).await;
        let result = match events.into_iter().last().unwrap() {
            WorkerEvent::Complete(result) => result,
            other => panic!("expected completion, got {other:?}"),
        };

        assert_eq!(result.width(), 4);
        assert_eq!(result.height(), 4);
        let pixels = result.pixels();
        for y in 0..4u32 {
            for x in 0..4u32 {
                let offset = ((y * 4 + x) * 4) as usize;
                assert_eq!(&pixels[offset..offset + 3], &[255, 0, 0]);
                let expected = if x < 2 { 255 } else { 0 };
                assert_eq!(pixels[offset + 3], expected, "pixel ({x},{y})");
            }
        }
    }
}
