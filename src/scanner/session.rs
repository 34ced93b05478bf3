//! Scan sessions.
//!
//! # Overview
//!
//! A [`ScanSession`] binds one [`CapturePipeline`] to a [`Dispatcher`] and a
//! [`CompletionSink`]. Starting a session starts the pipeline; the pipeline
//! pushes events into a bounded channel drained by a dedicated dispatch
//! thread, which is the only writer of the dispatcher state and the only
//! caller of the sink.
//!
//! The host owns two [`Toggle`]s: pause and front camera. The session reads
//! the pause toggle for every event and reacts to front-camera changes by
//! switching the pipeline's camera. It never writes either toggle.
//!
//! # Stopping
//!
//! [`ScanSession::stop`] may be called at any time, from any thread,
//! including from inside the completion sink. Once it returns, the sink is
//! not called again. Dropping the session stops it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use super::dispatch::{Dispatcher, Outcome};
use super::pipeline::{CapturePipeline, EventSender, PipelineConfig, PreviewState};
use super::{
    CameraPosition, DeviceRotation, FocusPoint, PipelineEvent, ScanError, ScanMode, ScanResult,
    ScreenPoint, Symbology, SymbologySet, Viewport,
};

/// Default minimum time between two deliveries in continuous mode.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// How often the dispatch thread re-checks toggles while idle.
const DISPATCH_TICK: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A boolean owned by the host and observed by a session.
///
/// Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct Toggle(Arc<AtomicBool>);

impl Toggle {
    /// Create a toggle with an initial value.
    #[must_use]
    pub fn new(value: bool) -> Self {
        Self(Arc::new(AtomicBool::new(value)))
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the value.
    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// Receives the results of a session.
///
/// Called from the session's dispatch thread (or, for setup failures, from
/// the thread that started the session).
pub trait CompletionSink: Send + Sync {
    /// Handle one delivery or failure.
    fn complete(&self, result: ScanResult);
}

impl<F> CompletionSink for F
where
    F: Fn(ScanResult) + Send + Sync,
{
    fn complete(&self, result: ScanResult) {
        self(result)
    }
}

/// Everything a session needs besides its pipeline and sink.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delivery mode.
    pub mode: ScanMode,
    /// Code formats to recognize. Fixed for the session's lifetime.
    pub symbologies: SymbologySet,
    /// Minimum time between deliveries in continuous mode.
    pub scan_interval: Duration,
    /// Whether the preview shows a viewfinder overlay.
    pub show_viewfinder: bool,
    /// Host-owned pause binding.
    pub paused: Toggle,
    /// Host-owned front-camera binding.
    pub front_camera: Toggle,
}

impl SessionConfig {
    /// QR-only configuration for `mode` with default interval and toggles.
    #[must_use]
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            symbologies: [Symbology::Qr].into_iter().collect(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            show_viewfinder: false,
            paused: Toggle::default(),
            front_camera: Toggle::default(),
        }
    }

    /// Recognize these symbologies instead.
    #[must_use]
    pub fn with_symbologies(mut self, symbologies: impl IntoIterator<Item = Symbology>) -> Self {
        self.symbologies = symbologies.into_iter().collect();
        self
    }

    /// Set the continuous-mode interval.
    #[must_use]
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Show or hide the viewfinder overlay.
    #[must_use]
    pub fn with_viewfinder(mut self, show: bool) -> Self {
        self.show_viewfinder = show;
        self
    }

    /// Bind the pause toggle.
    #[must_use]
    pub fn with_pause_toggle(mut self, toggle: Toggle) -> Self {
        self.paused = toggle;
        self
    }

    /// Bind the front-camera toggle.
    #[must_use]
    pub fn with_camera_toggle(mut self, toggle: Toggle) -> Self {
        self.front_camera = toggle;
        self
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            symbologies: self.symbologies.clone(),
            camera: CameraPosition::from_front(self.front_camera.get()),
            show_viewfinder: self.show_viewfinder,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(ScanMode::default())
    }
}

struct Inner {
    pipeline: Mutex<Box<dyn CapturePipeline>>,
    dispatcher: Mutex<Dispatcher>,
    sink: Box<dyn CompletionSink>,
    paused: Toggle,
    front_camera: Toggle,
    stopped: AtomicBool,
    delivery_gate: Mutex<()>,
    dispatch_thread: OnceLock<ThreadId>,
}

impl Inner {
    fn on_dispatch_thread(&self) -> bool {
        self.dispatch_thread.get() == Some(&std::thread::current().id())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        let first = !self.stopped.swap(true, Ordering::SeqCst);

        // Wait out a delivery in flight on the dispatch thread. From inside
        // the sink we already hold the gate.
        if !self.on_dispatch_thread() {
            drop(lock(&self.delivery_gate));
        }

        if first {
            lock(&self.pipeline).stop();
            log::info!("Scan session stopped");
        }
    }

    fn dispatch(&self, event: PipelineEvent) {
        let _gate = lock(&self.delivery_gate);
        if self.is_stopped() {
            return;
        }

        let outcome = lock(&self.dispatcher).handle(event, self.paused.get(), Instant::now());
        match outcome {
            Outcome::Deliver(result) => {
                let failed = result.is_err();
                match &result {
                    Ok(code) => log::debug!("Delivering code {:?}", code),
                    Err(e) => log::warn!("Scan failed: {}", e),
                }
                self.sink.complete(result);
                if failed {
                    self.stop();
                }
            }
            Outcome::Discard(reason) => log::trace!("Discarded event: {:?}", reason),
        }
    }

    fn sync_camera(&self, camera: CameraPosition) {
        if self.is_stopped() {
            return;
        }
        log::debug!("Camera toggle changed to {:?}", camera);
        let switched = lock(&self.pipeline).set_camera(camera);
        if let Err(err) = switched {
            self.report_setup_failure(err);
        }
    }

    /// Deliver a failure to attach the pipeline, ignoring the pause toggle.
    fn report_setup_failure(&self, err: ScanError) {
        let _gate = lock(&self.delivery_gate);
        if self.is_stopped() {
            return;
        }
        let outcome = lock(&self.dispatcher).setup_failed(err);
        if let Outcome::Deliver(result) = outcome {
            log::warn!("Scan pipeline could not be set up: {}", err);
            self.sink.complete(result);
        }
        self.stop();
    }
}

fn dispatch_loop(inner: &Inner, events: Receiver<PipelineEvent>, camera: CameraPosition) {
    let _ = inner.dispatch_thread.set(std::thread::current().id());
    let mut front = camera == CameraPosition::Front;

    while !inner.is_stopped() {
        match events.recv_timeout(DISPATCH_TICK) {
            Ok(event) => inner.dispatch(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("Capture pipeline closed its event stream");
                break;
            }
        }

        let now_front = inner.front_camera.get();
        if now_front != front {
            front = now_front;
            inner.sync_camera(CameraPosition::from_front(now_front));
        }
    }
}

/// Weak reference to a session, safe to capture inside its own sink.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Weak<Inner>,
}

impl SessionHandle {
    /// Stop the session if it still exists.
    pub fn stop(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.stop();
        }
    }

    /// Whether the session is gone or stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.upgrade().is_none_or(|inner| inner.is_stopped())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// One configured scanning attempt.
pub struct ScanSession {
    inner: Arc<Inner>,
    mode: ScanMode,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScanSession {
    /// Start `pipeline` and begin delivering results to `sink`.
    ///
    /// If the pipeline cannot be set up, the sink receives exactly one
    /// failure before this returns and the session is already stopped.
    pub fn start(
        config: SessionConfig,
        pipeline: Box<dyn CapturePipeline>,
        sink: impl CompletionSink + 'static,
    ) -> Self {
        let inner = Arc::new(Inner {
            pipeline: Mutex::new(pipeline),
            dispatcher: Mutex::new(Dispatcher::new(config.mode, config.scan_interval)),
            sink: Box::new(sink),
            paused: config.paused.clone(),
            front_camera: config.front_camera.clone(),
            stopped: AtomicBool::new(false),
            delivery_gate: Mutex::new(()),
            dispatch_thread: OnceLock::new(),
        });
        let session = Self {
            inner,
            mode: config.mode,
            worker: Mutex::new(None),
        };

        log::info!(
            "Starting {} scan session for {:?}",
            config.mode,
            config.symbologies
        );

        let (events, rx) = EventSender::channel();
        let pipeline_config = config.pipeline_config();
        let camera = pipeline_config.camera;
        let started = lock(&session.inner.pipeline).start(&pipeline_config, events);
        if let Err(err) = started {
            let outcome = lock(&session.inner.dispatcher).setup_failed(err);
            session.inner.stopped.store(true, Ordering::SeqCst);
            if let Outcome::Deliver(result) = outcome {
                log::warn!("Scan session could not start: {}", err);
                session.inner.sink.complete(result);
            }
            return session;
        }

        let inner = Arc::clone(&session.inner);
        let spawned = std::thread::Builder::new()
            .name("codescan-dispatch".to_string())
            .spawn(move || dispatch_loop(&inner, rx, camera));
        match spawned {
            Ok(handle) => *lock(&session.worker) = Some(handle),
            Err(e) => {
                log::error!("Failed to spawn dispatch thread: {}", e);
                session.inner.stop();
            }
        }
        session
    }

    /// A handle that can stop this session from inside its own sink.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Stop capturing and delivering. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
        if self.inner.on_dispatch_thread() {
            return;
        }
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                log::error!("Dispatch thread panicked");
            }
        }
    }

    /// Request focus at a preview touch location. Best effort.
    pub fn focus(&self, touch: ScreenPoint, viewport: Viewport) {
        if self.inner.is_stopped() {
            return;
        }
        match FocusPoint::from_touch(touch, viewport) {
            Some(point) => lock(&self.inner.pipeline).focus(point),
            None => log::debug!("Ignoring focus request on empty viewport"),
        }
    }

    /// Forward a device rotation to the pipeline.
    pub fn orientation_changed(&self, rotation: DeviceRotation) {
        lock(&self.inner.pipeline).handle_orientation_change(rotation.into());
    }

    /// Current preview description.
    #[must_use]
    pub fn preview(&self) -> PreviewState {
        lock(&self.inner.pipeline).preview()
    }

    /// Delivery mode.
    #[must_use]
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Whether the session has been stopped (explicitly or by a failure).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Whether a `Once` session has delivered its code.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        lock(&self.inner.dispatcher).is_finished()
    }

    /// Whether a failure has been delivered.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        lock(&self.inner.dispatcher).has_failed()
    }

    /// Number of successful deliveries so far.
    #[must_use]
    pub fn deliveries(&self) -> usize {
        lock(&self.inner.dispatcher).deliveries()
    }

    /// Codes delivered so far in `OncePerCode` mode.
    #[must_use]
    pub fn seen_codes(&self) -> BTreeSet<String> {
        lock(&self.inner.dispatcher)
            .seen_codes()
            .iter()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("mode", &self.mode)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.stop();
    }
}
