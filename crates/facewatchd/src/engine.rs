use crate::events::{MatchEvent, MatchObserver};
use crate::loader::Ready;
use crate::overlay::{DisplaySurface, Overlay};
use crate::state::PipelineEvent;
use crate::status::StatusHandle;
use facewatch_core::{FaceAnalyzer, FaceMatch, FaceMatcher, Matcher, ModelError, ReferenceError};
use facewatch_hw::{CameraError, Frame, FrameSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const MODELS_MESSAGE: &str =
    "Failed to load face recognition models or data. Please check that the model files are installed and try again.";
pub(crate) const REFERENCE_MESSAGE: &str =
    "Failed to load face data. Please check if the image file exists and is accessible.";
const CAMERA_PERMISSION_MESSAGE: &str =
    "Failed to access webcam. Please make sure you have granted permission to use the camera.";
const CAMERA_MESSAGE: &str =
    "Failed to access webcam. Please check that a camera is connected and not in use.";

/// Consecutive capture failures after which the stream is abandoned.
const MAX_CAPTURE_FAILURES: u32 = 10;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Models(#[from] ModelError),
    #[error("reference error: {0}")]
    Reference(#[from] ReferenceError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
    #[error("worker thread failed: {0}")]
    Thread(String),
}

impl EngineError {
    /// The one message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Models(_) | EngineError::Thread(_) => MODELS_MESSAGE.to_string(),
            EngineError::Timeout { stage: "camera", .. } => CAMERA_MESSAGE.to_string(),
            EngineError::Timeout { .. } => MODELS_MESSAGE.to_string(),
            EngineError::Reference(_) => REFERENCE_MESSAGE.to_string(),
            EngineError::Camera(err) if err.is_permission_denied() => {
                CAMERA_PERMISSION_MESSAGE.to_string()
            }
            EngineError::Camera(_) => CAMERA_MESSAGE.to_string(),
        }
    }
}

/// What one frame produced.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// One entry per detection, unknowns included.
    pub matches: Vec<FaceMatch>,
    /// Events emitted for the non-unknown matches.
    pub events: Vec<MatchEvent>,
    pub dark: bool,
}

/// Knobs for the running loop, taken from the daemon config.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub threshold: f32,
    pub surface: DisplaySurface,
    pub warmup_frames: usize,
    pub camera_timeout: Option<Duration>,
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
}

/// Detect, match, draw and notify for one frame at a time.
pub struct RecognitionLoop<A, O> {
    analyzer: A,
    matcher: FaceMatcher,
    surface: DisplaySurface,
    overlay: Overlay,
    observer: O,
    status: StatusHandle,
    snapshot: Option<(PathBuf, u64)>,
    processed: u64,
}

impl<A: FaceAnalyzer, O: MatchObserver> RecognitionLoop<A, O> {
    pub fn new(
        ready: Ready<A>,
        threshold: f32,
        surface: DisplaySurface,
        observer: O,
        status: StatusHandle,
    ) -> Self {
        let (analyzer, references) = ready.into_parts();
        Self {
            analyzer,
            matcher: FaceMatcher::new(references, threshold),
            surface,
            overlay: Overlay::new(surface),
            observer,
            status,
            snapshot: None,
            processed: 0,
        }
    }

    /// Write the composited frame to `path` every `every` processed frames.
    pub fn with_snapshots(mut self, path: PathBuf, every: u64) -> Self {
        self.snapshot = Some((path, every.max(1)));
        self
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        self.status.apply(PipelineEvent::FrameStarted);
        let report = self.analyze(frame);
        self.processed += 1;
        self.status.record_frame();
        self.write_snapshot(frame);
        self.status.apply(PipelineEvent::FrameFinished);
        report
    }

    fn analyze(&mut self, frame: &Frame) -> FrameReport {
        // Stale boxes never outlive the frame they were drawn for.
        self.overlay.clear();

        if frame.is_dark {
            tracing::debug!(sequence = frame.sequence, "dark frame skipped");
            return FrameReport {
                dark: true,
                ..FrameReport::default()
            };
        }

        let faces = match self.analyzer.describe_all(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(err) => {
                tracing::warn!(error = %err, sequence = frame.sequence, "frame analysis failed");
                return FrameReport::default();
            }
        };

        let (sx, sy) = self.surface.scale_from((frame.width, frame.height));
        let mut report = FrameReport::default();

        for face in &faces {
            let result = self.matcher.best_match(&face.descriptor);
            self.overlay.draw(&face.bbox.scaled(sx, sy), &result.to_string());

            if !result.is_unknown() {
                let event = MatchEvent::now(result.label.clone(), result.distance);
                tracing::debug!(label = %event.label, distance = event.distance, "recognized");
                self.observer.on_face_matched(&event);
                self.status.set_latest_match(&event);
                report.events.push(event);
            }
            report.matches.push(result);
        }
        tracing::trace!(boxes = self.overlay.drawn().len(), "overlay redrawn");
        report
    }

    fn write_snapshot(&self, frame: &Frame) {
        let Some((path, every)) = &self.snapshot else {
            return;
        };
        if self.processed % every != 0 {
            return;
        }
        let Some(image) = self.overlay().composite(&frame.data, frame.width, frame.height) else {
            tracing::warn!(sequence = frame.sequence, "frame too short for snapshot");
            return;
        };
        if let Err(err) = image.save(path) {
            tracing::warn!(error = %err, path = %path.display(), "snapshot write failed");
        }
    }
}

/// Running capture and engine threads.
pub struct LoopHandle {
    stop: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    engine: Option<JoinHandle<()>>,
}

impl LoopHandle {
    /// Stop capturing, let the engine finish its current frame, join both threads.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in [self.capture.take(), self.engine.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::warn!(thread = %name, "thread panicked");
            }
        }
        tracing::info!("recognition loop stopped");
    }
}

/// Run `rloop` over frames from `source` on two dedicated threads.
///
/// The queue between them holds one frame; frames captured while the
/// engine is busy are dropped.
pub fn spawn_loop<S, A, O>(
    source: S,
    mut rloop: RecognitionLoop<A, O>,
    warmup_frames: usize,
) -> Result<LoopHandle, EngineError>
where
    S: FrameSource + 'static,
    A: FaceAnalyzer + Send + 'static,
    O: MatchObserver + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let status = rloop.status.clone();
    let (tx, mut rx) = mpsc::channel::<Frame>(1);

    let engine = std::thread::Builder::new()
        .name("facewatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(frame) = rx.blocking_recv() {
                rloop.process_frame(&frame);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(|e| EngineError::Thread(e.to_string()))?;

    let capture_stop = Arc::clone(&stop);
    let capture = std::thread::Builder::new()
        .name("facewatch-capture".into())
        .spawn(move || capture_frames(source, tx, &capture_stop, warmup_frames, &status))
        .map_err(|e| EngineError::Thread(e.to_string()))?;

    Ok(LoopHandle {
        stop,
        capture: Some(capture),
        engine: Some(engine),
    })
}

/// Capture-thread body. Returning drops the source and the sender, which
/// ends the engine thread.
fn capture_frames<S: FrameSource>(
    mut source: S,
    tx: mpsc::Sender<Frame>,
    stop: &AtomicBool,
    warmup_frames: usize,
    status: &StatusHandle,
) {
    tracing::info!("capture thread started");
    let mut warmed = 0usize;
    let mut failures = 0u32;

    while !stop.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(error = %err, failures, "frame capture failed");
                if failures >= MAX_CAPTURE_FAILURES {
                    tracing::error!(error = %err, "camera stream lost");
                    status.apply(PipelineEvent::Failed(EngineError::from(err).user_message()));
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
        };

        // AGC/AE settle over the first frames.
        if warmed < warmup_frames {
            warmed += 1;
            continue;
        }

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => status.record_dropped(),
            Err(TrySendError::Closed(_)) => break,
        }
    }
    tracing::info!("capture thread exiting");
}

/// Open the camera and start the loop.
///
/// A camera failure leaves `status` in `Error` and no loop is started.
pub async fn start_streaming<A, O, S, F>(
    ready: Ready<A>,
    open_camera: F,
    options: &LoopOptions,
    observer: O,
    status: &StatusHandle,
) -> Result<LoopHandle, EngineError>
where
    A: FaceAnalyzer + Send + 'static,
    O: MatchObserver + 'static,
    S: FrameSource + 'static,
    F: FnOnce() -> Result<S, CameraError> + Send + 'static,
{
    status.apply(PipelineEvent::CameraRequested);

    let task = tokio::task::spawn_blocking(open_camera);
    let opened = match options.camera_timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(deny(
                    status,
                    EngineError::Timeout {
                        stage: "camera",
                        secs: limit.as_secs(),
                    },
                ))
            }
        },
        None => task.await,
    };

    let source = match opened {
        Ok(Ok(source)) => source,
        Ok(Err(err)) => return Err(deny(status, err.into())),
        Err(join) => return Err(deny(status, EngineError::Thread(join.to_string()))),
    };

    let (width, height) = source.resolution();
    status.set_capture(width, height);
    status.apply(PipelineEvent::CameraGranted);
    tracing::info!(
        width,
        height,
        display_width = options.surface.width,
        display_height = options.surface.height,
        "camera streaming"
    );

    let mut rloop = RecognitionLoop::new(
        ready,
        options.threshold,
        options.surface,
        observer,
        status.clone(),
    );
    if let Some(path) = &options.snapshot_path {
        rloop = rloop.with_snapshots(path.clone(), options.snapshot_every);
    }

    spawn_loop(source, rloop, options.warmup_frames).map_err(|err| {
        status.apply(PipelineEvent::Failed(err.user_message()));
        err
    })
}

fn deny(status: &StatusHandle, err: EngineError) -> EngineError {
    tracing::error!(error = %err, "camera unavailable");
    status.apply(PipelineEvent::CameraDenied(err.user_message()));
    err
}
