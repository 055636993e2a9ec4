// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle
//!
//! [`CaptureSession`] drives one camera-based capture workflow from camera
//! acquisition to release:
//!
//! 1. `start()` acquires the camera, binds render targets inside the mount
//!    point, waits for the first frame to size them and spawns the
//!    Detection Loop.
//! 2. The loop delivers filtered detections to the result callback.
//! 3. Every exit from `active` (explicit `stop()`, auto-close, or a loop
//!    failure) runs the same teardown: cancel the loop, stop the stream
//!    tracks, clear the surfaces, return to `idle`, then notify.
//!
//! The stream, the surfaces and the loop handle are owned by the session
//! core and released by dropping them, so a session dropped while active
//! still releases the camera, without invoking callbacks.

mod loop_handle;
mod state;

pub use loop_handle::{CancelFlag, FrameGate, GateGuard, LoopHandle};
pub use state::{SessionState, SessionStatus};

use crate::backends::camera::{
    CameraFrame, FacingMode, MediaConstraints, MediaDevices, StreamGuard,
};
use crate::config::CaptureOptions;
use crate::constants::timing;
use crate::detection::{
    BackendKind, BarcodeBackend, Detection, DetectionBackend, InferenceModel, LabelMap,
    ObjectBackend, RawDetection, ResultSink,
};
use crate::errors::{SessionError, SessionResult};
use crate::render::{self, RenderTargets, SurfaceHost};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Called with the surviving detections of a processed frame
pub type ResultCallback = Arc<dyn Fn(&[Detection]) + Send + Sync>;
/// Called once when an opened session has been torn down
pub type ClosedCallback = Arc<dyn Fn() + Send + Sync>;
/// Called with the failure that ended a session or a start attempt
pub type ErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Caller notifications
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    on_result: Option<ResultCallback>,
    on_closed: Option<ClosedCallback>,
    on_error: Option<ErrorCallback>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_result(mut self, f: impl Fn(&[Detection]) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(f));
        self
    }

    pub fn on_closed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_closed = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&SessionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn closed(&self) {
        if let Some(cb) = &self.on_closed {
            cb();
        }
    }

    fn error(&self, err: &SessionError) {
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }
}

/// Platform services a session runs against
#[derive(Clone)]
pub struct Platform {
    pub media: Arc<dyn MediaDevices>,
    pub surfaces: SurfaceHost,
    /// Upper bound on waiting for the first frame
    pub metadata_timeout: Duration,
}

impl Platform {
    pub fn new(media: Arc<dyn MediaDevices>, surfaces: SurfaceHost) -> Self {
        Self {
            media,
            surfaces,
            metadata_timeout: Duration::from_secs(timing::METADATA_TIMEOUT_SECS),
        }
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }
}

/// How a Detection Loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// Stopped from outside
    Cancelled,
    /// Finished on its own (auto-close, or a single-shot scan)
    Completed,
    /// The backend failed; the session tears down with this error
    Failed(SessionError),
}

/// Outcome of handing one frame's detections to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The callback ran; `close` requests auto-close
    Delivered { close: bool },
    /// Nothing passed the Result Sink
    Empty,
    /// This frame was already delivered; the callback did not run
    Duplicate,
    /// The session is no longer active; the loop must exit
    Stale,
}

#[derive(Default)]
struct SessionCore {
    state: SessionState,
    /// Incremented by every `start()`
    generation: u64,
    stream: Option<StreamGuard>,
    targets: Option<RenderTargets>,
    loop_handle: Option<LoopHandle>,
    last_result: Option<Vec<Detection>>,
    /// Sequence of the newest processed frame and what it yielded
    processed: Option<(u64, Vec<Detection>)>,
}

impl SessionCore {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

struct SessionInner {
    id: Uuid,
    mount_id: String,
    backend: Arc<dyn DetectionBackend>,
    options: CaptureOptions,
    sink: ResultSink,
    callbacks: SessionCallbacks,
    platform: Platform,
    gate: FrameGate,
    core: Mutex<SessionCore>,
}

impl SessionInner {
    fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_frame(&self) -> Option<Arc<CameraFrame>> {
        self.lock_core()
            .stream
            .as_ref()
            .and_then(|guard| guard.stream().current_frame())
    }

    /// Scale, filter, draw and notify for one processed frame
    ///
    /// Each frame sequence is delivered at most once per run.
    fn deliver(
        &self,
        cancel: Option<&CancelFlag>,
        generation: u64,
        sequence: u64,
        frame_width: u32,
        frame_height: u32,
        raw: Vec<RawDetection>,
    ) -> (Delivery, Vec<Detection>) {
        let _gate = self.gate.enter();
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            return (Delivery::Stale, Vec::new());
        }

        let accepted = {
            let mut core = self.lock_core();
            if core.state != SessionState::Active || !core.is_current(generation) {
                return (Delivery::Stale, Vec::new());
            }
            if let Some((processed, previous)) = &core.processed {
                if *processed == sequence {
                    return (Delivery::Duplicate, previous.clone());
                }
            }
            let Some(targets) = core.targets.as_ref() else {
                return (Delivery::Stale, Vec::new());
            };

            if targets.sync_to(frame_width, frame_height) {
                debug!(
                    session = %self.id,
                    width = frame_width,
                    height = frame_height,
                    "Canvas resized to frame"
                );
            }
            let (canvas_width, canvas_height) = targets.canvas_size();
            let scaled = raw
                .into_iter()
                .map(|r| {
                    Detection::new(
                        r.label,
                        r.confidence,
                        r.bounds.to_pixels(canvas_width, canvas_height),
                    )
                })
                .collect();

            let accepted = self.sink.filter(scaled);
            targets.draw_overlay(&accepted);
            if !accepted.is_empty() {
                core.last_result = Some(accepted.clone());
            }
            core.processed = Some((sequence, accepted.clone()));
            accepted
        };

        if accepted.is_empty() {
            return (Delivery::Empty, accepted);
        }

        debug!(session = %self.id, count = accepted.len(), "Delivering detections");
        if let Some(cb) = &self.callbacks.on_result {
            cb(&accepted);
        }
        (
            Delivery::Delivered {
                close: self.options.auto_close_on_detection,
            },
            accepted,
        )
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = core.loop_handle.take() {
            handle.cancel();
        }
        let had_stream = core.stream.take().is_some();
        core.targets.take();
        if had_stream {
            debug!(session = %self.id, "Session dropped while open, released resources");
        }
    }
}

/// Text of a caught panic payload
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Handle the Detection Loop uses to reach its session
///
/// Holds only a weak reference, so a running loop never keeps a dropped
/// session alive.
#[derive(Clone)]
pub struct LoopContext {
    session: Weak<SessionInner>,
    cancel: CancelFlag,
    generation: u64,
    interval: Duration,
}

impl LoopContext {
    /// Interval between loop iterations
    pub fn poll_interval(&self) -> Duration {
        self.interval
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once the loop has been cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Newest frame of the session's stream
    pub fn current_frame(&self) -> Option<Arc<CameraFrame>> {
        if self.is_cancelled() {
            return None;
        }
        self.session.upgrade()?.current_frame()
    }

    /// Hand the raw detections of frame `sequence` to the session
    pub fn deliver(
        &self,
        sequence: u64,
        frame_width: u32,
        frame_height: u32,
        raw: Vec<RawDetection>,
    ) -> Delivery {
        let Some(inner) = self.session.upgrade() else {
            return Delivery::Stale;
        };
        inner
            .deliver(
                Some(&self.cancel),
                self.generation,
                sequence,
                frame_width,
                frame_height,
                raw,
            )
            .0
    }
}

/// A camera-based capture session
///
/// Cheap to clone; all clones control the same session.
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

/// Non-owning reference to a [`CaptureSession`], for use inside callbacks
#[derive(Clone)]
pub struct WeakSession(Weak<SessionInner>);

impl WeakSession {
    pub fn upgrade(&self) -> Option<CaptureSession> {
        self.0.upgrade().map(|inner| CaptureSession { inner })
    }
}

impl CaptureSession {
    /// Create an idle session bound to `mount_id`
    pub fn new(
        mount_id: impl Into<String>,
        backend: Arc<dyn DetectionBackend>,
        options: CaptureOptions,
        callbacks: SessionCallbacks,
        platform: Platform,
    ) -> Self {
        let options = options.validated();
        let inner = SessionInner {
            id: Uuid::new_v4(),
            mount_id: mount_id.into(),
            backend,
            sink: ResultSink::from_options(&options),
            options,
            callbacks,
            platform,
            gate: FrameGate::new(),
            core: Mutex::new(SessionCore::default()),
        };
        debug!(
            session = %inner.id,
            mount = %inner.mount_id,
            backend = %inner.backend.kind(),
            "Created capture session"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Barcode-scan session using the QR decoder
    pub fn barcode(
        mount_id: impl Into<String>,
        options: CaptureOptions,
        callbacks: SessionCallbacks,
        platform: Platform,
    ) -> Self {
        let backend = Arc::new(BarcodeBackend::qr(options.detection_region_size));
        Self::new(mount_id, backend, options, callbacks, platform)
    }

    /// Object-detection session around `model`
    pub fn object_detection(
        mount_id: impl Into<String>,
        model: Arc<dyn InferenceModel>,
        labels: LabelMap,
        options: CaptureOptions,
        callbacks: SessionCallbacks,
        platform: Platform,
    ) -> Self {
        let backend = Arc::new(ObjectBackend::new(model, labels));
        Self::new(mount_id, backend, options, callbacks, platform)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn mount_id(&self) -> &str {
        &self.inner.mount_id
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.inner.options
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock_core().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Current state and whether a loop is running
    pub fn status(&self) -> SessionStatus {
        let core = self.inner.lock_core();
        SessionStatus {
            state: core.state,
            loop_running: core
                .loop_handle
                .as_ref()
                .is_some_and(LoopHandle::is_running),
            backend: self.inner.backend.kind(),
        }
    }

    /// Most recent non-empty detection list of the current or last run
    pub fn last_result(&self) -> Option<Vec<Detection>> {
        self.inner.lock_core().last_result.clone()
    }

    /// Open the camera and begin detecting
    ///
    /// Valid only from `idle`. On failure everything acquired so far is
    /// released, the error callback runs and the session is `idle` again.
    /// A `stop()` while this is pending makes it return
    /// [`SessionError::Cancelled`].
    pub async fn start(&self) -> SessionResult<()> {
        let generation = {
            let mut core = self.inner.lock_core();
            if core.state != SessionState::Idle {
                return Err(SessionError::AlreadyRunning(core.state));
            }
            core.state = SessionState::Starting;
            core.generation += 1;
            core.last_result = None;
            core.processed = None;
            core.generation
        };

        info!(
            session = %self.inner.id,
            mount = %self.inner.mount_id,
            backend = %self.inner.backend.kind(),
            "Starting capture session"
        );

        match self.open(generation).await {
            Ok(()) => Ok(()),
            Err(e) if !self.is_starting(generation) => {
                debug!(session = %self.inner.id, error = %e, "Start superseded by stop");
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                self.fail_start(generation, &e);
                Err(e)
            }
        }
    }

    fn is_starting(&self, generation: u64) -> bool {
        let core = self.inner.lock_core();
        core.state == SessionState::Starting && core.is_current(generation)
    }

    /// Store a resource acquired during start, unless the start was cancelled
    fn stage(
        &self,
        generation: u64,
        store: impl FnOnce(&mut SessionCore),
    ) -> SessionResult<()> {
        let mut core = self.inner.lock_core();
        if core.state != SessionState::Starting || !core.is_current(generation) {
            return Err(SessionError::Cancelled);
        }
        store(&mut core);
        Ok(())
    }

    async fn open(&self, generation: u64) -> SessionResult<()> {
        let inner = &self.inner;
        let constraints = MediaConstraints {
            facing_mode: FacingMode::Environment,
            aspect_ratio: Some(inner.options.aspect_ratio),
            frame_rate: None,
        };

        let stream = inner.platform.media.get_user_media(&constraints).await?;
        info!(session = %inner.id, stream = %stream.id(), "Camera acquired");

        // Unstaged resources are released on the early return
        let mut guard = Some(StreamGuard::new(Arc::clone(&stream)));
        self.stage(generation, |core| core.stream = guard.take())?;

        let mut targets = Some(render::bind(
            &inner.platform.surfaces,
            &inner.mount_id,
            stream.as_ref(),
        )?);
        self.stage(generation, |core| core.targets = targets.take())?;

        let metadata = tokio::time::timeout(inner.platform.metadata_timeout, stream.metadata_ready())
            .await
            .map_err(|_| {
                SessionError::DeviceUnavailable(format!(
                    "no video metadata within {}s",
                    inner.platform.metadata_timeout.as_secs_f32()
                ))
            })??;
        debug!(
            session = %inner.id,
            width = metadata.width,
            height = metadata.height,
            "Video metadata ready"
        );

        let mut core = inner.lock_core();
        if core.state != SessionState::Starting || !core.is_current(generation) {
            return Err(SessionError::Cancelled);
        }
        if let Some(targets) = core.targets.as_ref() {
            targets.size_to(metadata);
        }

        let cancel = CancelFlag::new();
        let ctx = LoopContext {
            session: Arc::downgrade(&self.inner),
            cancel: cancel.clone(),
            generation,
            interval: inner.options.poll_interval(),
        };
        let backend = Arc::clone(&inner.backend);
        let weak = Arc::downgrade(&self.inner);
        let session_id = inner.id;

        let task = async move {
            let exit = AssertUnwindSafe(backend.run(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    LoopExit::Failed(SessionError::Inference(format!(
                        "detection loop panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });
            debug!(session = %session_id, exit = ?exit, "Detection loop exited");
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let session = CaptureSession { inner };
            match exit {
                LoopExit::Cancelled => {}
                LoopExit::Completed => {
                    session.teardown(Some(generation), None);
                }
                LoopExit::Failed(e) => {
                    session.teardown(Some(generation), Some(e));
                }
            }
        };

        core.loop_handle = Some(LoopHandle::spawn(task, cancel, inner.gate.clone()));
        core.state = SessionState::Active;
        info!(session = %inner.id, mount = %inner.mount_id, "Capture session active");
        Ok(())
    }

    fn fail_start(&self, generation: u64, err: &SessionError) {
        let (stream, targets) = {
            let mut core = self.inner.lock_core();
            if core.state != SessionState::Starting || !core.is_current(generation) {
                return;
            }
            core.state = SessionState::Error;
            (core.stream.take(), core.targets.take())
        };
        drop(stream);
        drop(targets);
        self.inner.lock_core().state = SessionState::Idle;

        warn!(session = %self.inner.id, error = %err, "Capture session failed to start");
        self.inner.callbacks.error(err);
    }

    /// Stop the session and release the camera
    ///
    /// No-op when idle or already stopping. Safe to call from inside the
    /// session's own callbacks. Returns after the loop is cancelled, the
    /// stream tracks are stopped and the mount point is empty; the closed
    /// callback has run by then.
    ///
    /// While `start()` is still waiting for the platform to grant the
    /// camera there is nothing to release yet. The closed callback runs
    /// right away and the pending `start()` stops the stream as soon as it
    /// is granted, so a track can be live briefly after this returns.
    pub fn stop(&self) {
        self.teardown(None, None);
    }

    /// The single exit path out of `starting` and `active`
    ///
    /// With `expected` set, only tears down if that start generation is
    /// still current. Returns false if there was nothing to tear down.
    fn teardown(&self, expected: Option<u64>, failure: Option<SessionError>) -> bool {
        let inner = &self.inner;
        let (handle, from) = {
            let mut core = inner.lock_core();
            if expected.is_some_and(|generation| !core.is_current(generation)) {
                return false;
            }
            let from = core.state;
            if !from.is_running() {
                return false;
            }
            core.state = if failure.is_some() && from == SessionState::Active {
                SessionState::Error
            } else {
                SessionState::Stopping
            };
            (core.loop_handle.take(), from)
        };

        info!(session = %inner.id, from = %from, "Stopping capture session");

        // Loop first, so no frame is processed once teardown has begun
        if let Some(handle) = handle {
            handle.cancel();
        }

        let (stream, targets) = {
            let mut core = inner.lock_core();
            (core.stream.take(), core.targets.take())
        };
        drop(stream);
        drop(targets);

        inner.lock_core().state = SessionState::Idle;
        info!(session = %inner.id, mount = %inner.mount_id, "Capture session closed");

        inner.callbacks.closed();
        if let Some(err) = failure {
            error!(session = %inner.id, error = %err, "Capture session failed");
            inner.callbacks.error(&err);
        }
        true
    }

    /// Run one detection pass on the current frame
    ///
    /// Goes through the Result Sink and the result callback like a loop
    /// iteration, and honours auto-close. A backend failure tears the
    /// session down. If the loop already delivered the current frame, its
    /// detections are returned without invoking the callback again.
    pub async fn capture(&self) -> SessionResult<Vec<Detection>> {
        let (frame, generation) = {
            let core = self.inner.lock_core();
            if core.state != SessionState::Active {
                return Err(SessionError::NotActive);
            }
            let frame = core
                .stream
                .as_ref()
                .and_then(|guard| guard.stream().current_frame());
            (frame, core.generation)
        };
        let Some(frame) = frame else {
            return Ok(Vec::new());
        };

        let raw = match self.inner.backend.detect_frame(Arc::clone(&frame)).await {
            Ok(raw) => raw,
            Err(e) => {
                self.teardown(Some(generation), Some(e.clone()));
                return Err(e);
            }
        };

        let (delivery, detections) = self.inner.deliver(
            None,
            generation,
            frame.sequence,
            frame.width,
            frame.height,
            raw,
        );
        match delivery {
            Delivery::Stale => Err(SessionError::NotActive),
            Delivery::Delivered { close: true } => {
                self.teardown(Some(generation), None);
                Ok(detections)
            }
            _ => Ok(detections),
        }
    }
}
