//! Hardware-backed capture pipeline.
//!
//! # Overview
//!
//! [`DeviceCapture`] drives a [`CaptureDevice`] obtained from a
//! [`DeviceProvider`]. Starting the pipeline attaches the device's input and
//! decode output, then spawns a worker thread that pulls frames, decodes the
//! first code of each frame, and pushes it to the session.
//!
//! Setup failures map to [`ScanError`]:
//! - no device for the requested camera, or its input is rejected: `BadInput`
//! - the decode output is rejected, or nothing can decode the requested
//!   symbologies: `BadOutput`
//!
//! The worker never blocks on the session, so [`CapturePipeline::stop`] can
//! join it from any thread, including from inside a completion callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use image::GrayImage;
use thiserror::Error;

use super::decoder::{FrameDecoder, QrDecoder};
use super::pipeline::{CapturePipeline, EventSender, PipelineConfig, PreviewState};
use super::{CameraPosition, FocusPoint, Orientation, PipelineEvent, ScanError, SymbologySet};

/// Default time a worker waits for a frame before re-checking the stop flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Errors reported by a capture device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device exists for the requested camera.
    #[error("No capture device available for the {0:?} camera")]
    Unavailable(CameraPosition),

    /// The device refused to attach as a capture input.
    #[error("Capture input rejected: {0}")]
    InputRejected(String),

    /// The device refused to attach a decode output.
    #[error("Decode output rejected: {0}")]
    OutputRejected(String),

    /// Another client holds the configuration lock.
    #[error("Device configuration is locked")]
    ConfigurationLocked,

    /// An I/O error occurred while reading from the device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of asking a device for its next frame.
#[derive(Debug, Clone)]
pub enum FrameRead {
    /// A new frame.
    Frame(GrayImage),
    /// No frame arrived within the timeout.
    Idle,
    /// The device will not produce any more frames.
    Ended,
}

/// Focus behavior requested on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// Keep refocusing on the point of interest.
    ContinuousAuto,
}

/// Exposure behavior requested on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    /// Keep re-exposing for the point of interest.
    ContinuousAuto,
}

/// A physical (or physical-like) video capture device.
pub trait CaptureDevice: Send {
    /// Human-readable device name for logs.
    fn name(&self) -> &str;

    /// Attach the device as the capture input.
    fn attach_input(&mut self) -> Result<(), DeviceError>;

    /// Attach a decode output for the given symbologies.
    fn attach_output(&mut self, symbologies: &SymbologySet) -> Result<(), DeviceError>;

    /// Wait up to `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> Result<FrameRead, DeviceError>;

    /// Rotate the video connection. Returns `false` if rotation is unsupported.
    fn set_video_orientation(&mut self, orientation: Orientation) -> bool;

    /// Acquire the configuration lock for focus and exposure changes.
    fn lock_for_configuration(&mut self) -> Result<(), DeviceError>;

    /// Set the focus point of interest and mode. Requires the configuration lock.
    fn set_focus(&mut self, point: FocusPoint, mode: FocusMode);

    /// Set the exposure point of interest and mode. Requires the configuration lock.
    fn set_exposure(&mut self, point: FocusPoint, mode: ExposureMode);

    /// Release the configuration lock.
    fn unlock_for_configuration(&mut self);

    /// Halt streaming and release the hardware.
    fn release(&mut self);
}

/// Hands out capture devices by camera position.
pub trait DeviceProvider: Send {
    /// Open the device for `camera`, or `None` if there is none.
    fn open(&self, camera: CameraPosition) -> Option<Box<dyn CaptureDevice>>;
}

type SharedDevice = Arc<Mutex<Box<dyn CaptureDevice>>>;

fn lock_device(device: &Mutex<Box<dyn CaptureDevice>>) -> MutexGuard<'_, Box<dyn CaptureDevice>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capture pipeline over a [`CaptureDevice`].
pub struct DeviceCapture {
    provider: Box<dyn DeviceProvider>,
    decoder: Arc<dyn FrameDecoder>,
    poll_interval: Duration,
    config: PipelineConfig,
    orientation: Orientation,
    device: Option<SharedDevice>,
    events: Option<EventSender>,
    worker: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    failure: Option<ScanError>,
}

impl DeviceCapture {
    /// Create a pipeline that opens devices from `provider` and decodes QR codes.
    pub fn new(provider: impl DeviceProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            decoder: Arc::new(QrDecoder::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            config: PipelineConfig::default(),
            orientation: Orientation::default(),
            device: None,
            events: None,
            worker: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            failure: None,
        }
    }

    /// Use a different frame decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Set how long the worker waits for a frame between stop checks.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Whether the worker thread is streaming.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn open_device(&mut self) -> Result<Box<dyn CaptureDevice>, ScanError> {
        let camera = self.config.camera;
        let Some(mut device) = self.provider.open(camera) else {
            log::warn!("{}", DeviceError::Unavailable(camera));
            return Err(ScanError::BadInput);
        };

        if let Err(e) = device.attach_input() {
            log::warn!("Failed to attach {}: {}", device.name(), e);
            device.release();
            return Err(ScanError::BadInput);
        }

        let decodable = self
            .config
            .symbologies
            .iter()
            .any(|s| self.decoder.supports(*s));
        if !decodable {
            log::warn!(
                "No decoder for requested symbologies {:?}",
                self.config.symbologies
            );
            device.release();
            return Err(ScanError::BadOutput);
        }

        if let Err(e) = device.attach_output(&self.config.symbologies) {
            log::warn!("Failed to attach decode output to {}: {}", device.name(), e);
            device.release();
            return Err(ScanError::BadOutput);
        }

        if !device.set_video_orientation(self.orientation) {
            log::debug!("{} does not support video orientation", device.name());
        }

        log::info!("Capturing from {} ({:?} camera)", device.name(), camera);
        Ok(device)
    }

    fn spawn_worker(&mut self, device: SharedDevice, events: EventSender) {
        self.stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&self.stop_flag);
        let decoder = Arc::clone(&self.decoder);
        let symbologies = self.config.symbologies.clone();
        let poll_interval = self.poll_interval;

        let handle = std::thread::Builder::new()
            .name("codescan-capture".to_string())
            .spawn(move || {
                capture_loop(&device, &*decoder, &symbologies, &events, &stop_flag, poll_interval)
            });

        match handle {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => log::error!("Failed to spawn capture worker: {}", e),
        }
    }

    fn halt_worker(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Capture worker panicked");
            }
        }
    }

    fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            let mut device = lock_device(&device);
            log::debug!("Releasing {}", device.name());
            device.release();
        }
    }
}

fn capture_loop(
    device: &Mutex<Box<dyn CaptureDevice>>,
    decoder: &dyn FrameDecoder,
    symbologies: &SymbologySet,
    events: &EventSender,
    stop_flag: &AtomicBool,
    poll_interval: Duration,
) {
    let mut frames: u64 = 0;
    while !stop_flag.load(Ordering::SeqCst) {
        let read = lock_device(device).next_frame(poll_interval);
        let frame = match read {
            Ok(FrameRead::Frame(frame)) => frame,
            Ok(FrameRead::Idle) => continue,
            Ok(FrameRead::Ended) => {
                log::info!("Capture stream ended after {} frames", frames);
                break;
            }
            Err(e) => {
                log::warn!("Capture stream failed: {}", e);
                break;
            }
        };
        frames += 1;

        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        if let Some(code) = decoder.decode_first(&frame, symbologies) {
            log::trace!("Frame {}: recognized {} code", frames, code.symbology);
            if !events.send(PipelineEvent::Code(code)) {
                log::debug!("Session gone, stopping capture");
                break;
            }
        }
    }
}

impl CapturePipeline for DeviceCapture {
    fn start(&mut self, config: &PipelineConfig, events: EventSender) -> Result<(), ScanError> {
        if let Some(err) = self.failure {
            return Err(err);
        }
        self.stop();
        self.config = config.clone();

        let device = match self.open_device() {
            Ok(device) => Arc::new(Mutex::new(device)),
            Err(err) => {
                self.failure = Some(err);
                return Err(err);
            }
        };

        self.device = Some(Arc::clone(&device));
        self.events = Some(events.clone());
        self.spawn_worker(device, events);
        Ok(())
    }

    fn stop(&mut self) {
        self.halt_worker();
        self.release_device();
        self.events = None;
    }

    fn set_camera(&mut self, camera: CameraPosition) -> Result<(), ScanError> {
        if let Some(err) = self.failure {
            return Err(err);
        }
        if self.config.camera == camera {
            return Ok(());
        }
        self.config.camera = camera;

        let Some(events) = self.events.clone() else {
            return Ok(());
        };

        log::debug!("Switching to the {:?} camera", camera);
        self.halt_worker();
        self.release_device();

        match self.open_device() {
            Ok(device) => {
                let device = Arc::new(Mutex::new(device));
                self.device = Some(Arc::clone(&device));
                self.spawn_worker(device, events);
                Ok(())
            }
            Err(err) => {
                self.failure = Some(err);
                self.events = None;
                Err(err)
            }
        }
    }

    fn handle_orientation_change(&mut self, orientation: Orientation) {
        self.orientation = orientation;
        if let Some(device) = &self.device {
            let mut device = lock_device(device);
            if !device.set_video_orientation(orientation) {
                log::debug!("{} does not support video orientation", device.name());
            }
        }
    }

    fn focus(&mut self, point: FocusPoint) {
        let Some(device) = &self.device else {
            return;
        };
        let mut device = lock_device(device);
        if let Err(e) = device.lock_for_configuration() {
            log::debug!("Ignoring focus request on {}: {}", device.name(), e);
            return;
        }
        device.set_focus(point, FocusMode::ContinuousAuto);
        device.set_exposure(point, ExposureMode::ContinuousAuto);
        device.unlock_for_configuration();
    }

    fn preview(&self) -> PreviewState {
        PreviewState {
            running: self.is_running(),
            camera: self.config.camera,
            orientation: self.orientation,
            show_viewfinder: self.config.show_viewfinder,
        }
    }
}

impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
