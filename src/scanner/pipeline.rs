//! Capture pipeline capability.
//!
//! A [`CapturePipeline`] owns an input (a camera, a replayed frame source, or
//! a simulated payload) and pushes [`PipelineEvent`]s to its session through
//! an [`EventSender`]. Sessions never know which implementation they drive.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use super::{CameraPosition, FocusPoint, Orientation, PipelineEvent, ScanError, SymbologySet};

/// Capacity of the event channel between a pipeline and its session.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Configuration handed to [`CapturePipeline::start`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    /// Code formats to recognize.
    pub symbologies: SymbologySet,
    /// Camera to capture from.
    pub camera: CameraPosition,
    /// Whether the preview shows a viewfinder overlay.
    pub show_viewfinder: bool,
}

/// What a host needs to render the live preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviewState {
    /// Whether frames are currently streaming.
    pub running: bool,
    /// Active camera.
    pub camera: CameraPosition,
    /// Current video orientation.
    pub orientation: Orientation,
    /// Whether to draw the viewfinder overlay.
    pub show_viewfinder: bool,
}

/// Sending half of the pipeline-to-session event channel.
///
/// [`EventSender::send`] never blocks: when the session is behind, the event
/// is dropped, which is the same as a camera dropping a frame.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: SyncSender<PipelineEvent>,
}

impl EventSender {
    /// Create a bounded event channel.
    #[must_use]
    pub fn channel() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Push an event. Returns `false` if the session has gone away.
    pub fn send(&self, event: PipelineEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::trace!("Event channel full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Push an event, waiting for room if the session is behind.
    ///
    /// For host-driven input that must not be lost. Must not be called from
    /// inside a completion callback of the same session.
    pub fn send_wait(&self, event: PipelineEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Source of code events for a scan session.
///
/// `start` either succeeds and begins pushing events, or fails with the
/// [`ScanError`] the session must report. Implementations must make `stop`
/// idempotent and must not push events after it returns.
pub trait CapturePipeline: Send {
    /// Attach input and output for `config` and begin streaming events.
    fn start(&mut self, config: &PipelineConfig, events: EventSender) -> Result<(), ScanError>;

    /// Halt the input. A no-op when already stopped.
    fn stop(&mut self);

    /// Switch to another camera. In-flight frames may be dropped.
    ///
    /// Fails with the setup error when the new camera cannot be attached; the
    /// pipeline is stopped by then and the session must report the error.
    fn set_camera(&mut self, camera: CameraPosition) -> Result<(), ScanError>;

    /// Keep preview and decode geometry aligned with the device rotation.
    fn handle_orientation_change(&mut self, orientation: Orientation);

    /// Best-effort focus and exposure bias. Failures are never reported.
    fn focus(&mut self, point: FocusPoint);

    /// Current preview description.
    fn preview(&self) -> PreviewState;
}
