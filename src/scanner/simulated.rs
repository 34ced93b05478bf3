//! Fallback pipeline for environments without camera hardware.
//!
//! [`SimulatedCapture`] never touches a device. Its paired
//! [`SimulatedTrigger`] lets the host push input into the same event path a
//! live camera uses:
//! - [`SimulatedTrigger::tap`] sends the fixed simulated payload
//! - [`SimulatedTrigger::scan`] sends any value typed in by hand
//! - [`SimulatedTrigger::submit_image`] decodes a still image, sending the
//!   first code found or a `BadOutput` failure when there is none

use image::DynamicImage;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::decoder::QrDecoder;
use super::pipeline::{CapturePipeline, EventSender, PipelineConfig, PreviewState};
use super::{
    CameraPosition, CodeEvent, FocusPoint, Orientation, PipelineEvent, ScanError, Symbology,
};

#[derive(Debug, Default)]
struct Shared {
    payload: String,
    events: Mutex<Option<EventSender>>,
}

impl Shared {
    fn events(&self) -> MutexGuard<'_, Option<EventSender>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, event: PipelineEvent) -> bool {
        // Clone out so a full channel never blocks `stop` on this lock.
        let events = self.events().clone();
        match events {
            Some(events) => events.send_wait(event),
            None => {
                log::debug!("Simulated capture is not running, ignoring input");
                false
            }
        }
    }
}

/// Capture pipeline fed by a fixed payload or still images.
#[derive(Debug)]
pub struct SimulatedCapture {
    shared: Arc<Shared>,
    config: PipelineConfig,
    orientation: Orientation,
}

/// Host-side handle for feeding a [`SimulatedCapture`].
#[derive(Debug, Clone)]
pub struct SimulatedTrigger {
    shared: Arc<Shared>,
    decoder: QrDecoder,
}

impl SimulatedCapture {
    /// Create a pipeline with its trigger. An empty payload disables `tap`.
    pub fn new(payload: impl Into<String>) -> (Self, SimulatedTrigger) {
        let shared = Arc::new(Shared {
            payload: payload.into(),
            events: Mutex::new(None),
        });
        let trigger = SimulatedTrigger {
            shared: Arc::clone(&shared),
            decoder: QrDecoder::new(),
        };
        let pipeline = Self {
            shared,
            config: PipelineConfig::default(),
            orientation: Orientation::default(),
        };
        (pipeline, trigger)
    }

    fn is_running(&self) -> bool {
        self.shared.events().is_some()
    }
}

impl CapturePipeline for SimulatedCapture {
    fn start(&mut self, config: &PipelineConfig, events: EventSender) -> Result<(), ScanError> {
        self.config = config.clone();
        *self.shared.events() = Some(events);
        log::info!("Camera unavailable, using simulated capture");
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.events().take();
    }

    fn set_camera(&mut self, camera: CameraPosition) -> Result<(), ScanError> {
        self.config.camera = camera;
        Ok(())
    }

    fn handle_orientation_change(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    fn focus(&mut self, _point: FocusPoint) {}

    fn preview(&self) -> PreviewState {
        PreviewState {
            running: self.is_running(),
            camera: self.config.camera,
            orientation: self.orientation,
            show_viewfinder: self.config.show_viewfinder,
        }
    }
}

impl SimulatedTrigger {
    /// Send the simulated payload as if it had been scanned.
    ///
    /// An empty payload counts as missing simulated data: a warning is logged
    /// and no empty code is sent. Returns `false` when nothing was sent.
    pub fn tap(&self) -> bool {
        if self.shared.payload.is_empty() {
            log::warn!("Simulated data not provided");
            return false;
        }
        let code = CodeEvent::new(self.shared.payload.clone(), Symbology::Qr);
        self.shared.send(PipelineEvent::Code(code))
    }

    /// Send an arbitrary value as if it had been scanned (manual entry).
    pub fn scan(&self, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.is_empty() {
            return false;
        }
        self.shared
            .send(PipelineEvent::Code(CodeEvent::new(value, Symbology::Qr)))
    }

    /// Decode a still image and send its first code, or `BadOutput`.
    pub fn submit_image(&self, image: &DynamicImage) -> bool {
        let event = match self.decoder.decode_image(image) {
            Some(code) => PipelineEvent::Code(code),
            None => {
                log::debug!("No code found in submitted image");
                PipelineEvent::Failure(ScanError::BadOutput)
            }
        };
        self.shared.send(event)
    }

    /// Load a still image from disk and submit it.
    ///
    /// An unreadable image counts as an image without a code.
    pub fn submit_image_path<P: AsRef<Path>>(&self, path: P) -> bool {
        match self.decoder.decode_path(path) {
            Ok(Some(code)) => self.shared.send(PipelineEvent::Code(code)),
            Ok(None) => self.shared.send(PipelineEvent::Failure(ScanError::BadOutput)),
            Err(e) => {
                log::warn!("{}", e);
                self.shared.send(PipelineEvent::Failure(ScanError::BadOutput))
            }
        }
    }
}
