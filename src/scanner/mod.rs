//! Scanner module for code-scan sessions.
//!
//! This module provides functionality for:
//! - Capture pipelines that turn video frames or still images into code events
//! - QR decoding of grayscale frames
//! - The dispatch state machine that decides which codes are delivered
//! - Scan sessions binding a pipeline, a dispatcher, and a completion sink
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`pipeline`]: The [`CapturePipeline`] capability and its configuration
//! - [`device`]: Hardware-backed pipeline over a [`device::CaptureDevice`]
//! - [`frames`]: A capture device replaying a directory of still frames
//! - [`simulated`]: Fallback pipeline for environments without a camera
//! - [`decoder`]: Frame decoding (QR via rqrr)
//! - [`dispatch`]: Per-event delivery rules (once, once-per-code, continuous)
//! - [`session`]: [`ScanSession`] lifecycle, toggles, and result delivery
//!
//! # Example
//!
//! ```no_run
//! use codescan::scanner::{ScanMode, ScanResult, ScanSession, SessionConfig, SimulatedCapture};
//!
//! let (pipeline, trigger) = SimulatedCapture::new("4006381333931");
//! let config = SessionConfig::new(ScanMode::Once);
//! let session = ScanSession::start(config, Box::new(pipeline), |result: ScanResult| {
//!     match result {
//!         Ok(code) => println!("scanned {code}"),
//!         Err(e) => eprintln!("scan failed: {e}"),
//!     }
//! });
//!
//! trigger.tap();
//! session.stop();
//! ```

pub mod decoder;
pub mod device;
pub mod dispatch;
pub mod frames;
pub mod pipeline;
pub mod session;
pub mod simulated;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// Re-export main types
pub use decoder::{FrameDecoder, QrDecoder};
pub use device::{CaptureDevice, DeviceCapture, DeviceError, DeviceProvider};
pub use dispatch::{Discard, Dispatcher, Outcome};
pub use frames::{FrameDirectoryDevice, FrameDirectoryProvider};
pub use pipeline::{CapturePipeline, EventSender, PipelineConfig, PreviewState};
pub use session::{
    CompletionSink, ScanSession, SessionConfig, SessionHandle, Toggle, DEFAULT_SCAN_INTERVAL,
};
pub use simulated::{SimulatedCapture, SimulatedTrigger};

/// A machine-readable code format.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Symbology {
    /// QR code
    Qr,
    /// EAN-8
    Ean8,
    /// EAN-13
    Ean13,
    /// UPC-E
    UpcE,
    /// Code 39
    Code39,
    /// Code 93
    Code93,
    /// Code 128
    Code128,
    /// ITF-14
    Itf14,
    /// Interleaved 2 of 5
    Interleaved2of5,
    /// PDF417
    Pdf417,
    /// Aztec
    Aztec,
    /// Data Matrix
    DataMatrix,
}

impl std::fmt::Display for Symbology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Qr => "QR",
            Self::Ean8 => "EAN-8",
            Self::Ean13 => "EAN-13",
            Self::UpcE => "UPC-E",
            Self::Code39 => "Code 39",
            Self::Code93 => "Code 93",
            Self::Code128 => "Code 128",
            Self::Itf14 => "ITF-14",
            Self::Interleaved2of5 => "Interleaved 2 of 5",
            Self::Pdf417 => "PDF417",
            Self::Aztec => "Aztec",
            Self::DataMatrix => "Data Matrix",
        };
        f.write_str(name)
    }
}

/// Set of symbologies a session recognizes. Fixed for the session's lifetime.
pub type SymbologySet = BTreeSet<Symbology>;

/// How many results a session delivers and whether duplicates are suppressed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    /// Deliver the first code, then ignore everything.
    #[default]
    Once,
    /// Deliver each distinct code once.
    OncePerCode,
    /// Deliver any code, at most once per scan interval.
    Continuous,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::OncePerCode => write!(f, "once-per-code"),
            Self::Continuous => write!(f, "continuous"),
        }
    }
}

/// Failures delivered through the completion sink.
///
/// Both kinds are terminal for the capture pipeline that reported them.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanError {
    /// No usable capture device, or its input could not be attached.
    #[error("No usable capture input")]
    BadInput,

    /// The decoding output could not be attached, or a still image held no code.
    #[error("No usable decode output")]
    BadOutput,
}

/// What the completion sink receives: the decoded text or a failure.
pub type ScanResult = Result<String, ScanError>;

/// A code recognized in a single frame or still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEvent {
    /// Decoded text
    pub value: String,
    /// Format the code was recognized as
    pub symbology: Symbology,
}

impl CodeEvent {
    /// Create a new code event.
    #[must_use]
    pub fn new(value: impl Into<String>, symbology: Symbology) -> Self {
        Self {
            value: value.into(),
            symbology,
        }
    }
}

/// An event pushed from a capture pipeline to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A code was recognized.
    Code(CodeEvent),
    /// A decode-time failure (a still image without any code).
    Failure(ScanError),
}

/// Which physical camera a pipeline captures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    /// Rear-facing camera.
    #[default]
    Back,
    /// Front-facing camera.
    Front,
}

impl CameraPosition {
    /// Map a "front camera" toggle value to a position.
    #[must_use]
    pub fn from_front(front: bool) -> Self {
        if front {
            Self::Front
        } else {
            Self::Back
        }
    }
}

/// Video orientation of the preview and decode geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Upright portrait.
    #[default]
    Portrait,
    /// Portrait, rotated 180 degrees.
    PortraitUpsideDown,
    /// Landscape with the home side on the left.
    LandscapeLeft,
    /// Landscape with the home side on the right.
    LandscapeRight,
}

/// Orientation as reported by a rotation notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRotation {
    /// Orientation could not be determined.
    Unknown,
    /// Upright portrait.
    Portrait,
    /// Portrait, rotated 180 degrees.
    PortraitUpsideDown,
    /// Landscape with the home side on the left.
    LandscapeLeft,
    /// Landscape with the home side on the right.
    LandscapeRight,
    /// Device lying flat, screen up.
    FaceUp,
    /// Device lying flat, screen down.
    FaceDown,
}

impl From<DeviceRotation> for Orientation {
    fn from(rotation: DeviceRotation) -> Self {
        match rotation {
            DeviceRotation::PortraitUpsideDown => Self::PortraitUpsideDown,
            DeviceRotation::LandscapeLeft => Self::LandscapeLeft,
            DeviceRotation::LandscapeRight => Self::LandscapeRight,
            DeviceRotation::Portrait
            | DeviceRotation::Unknown
            | DeviceRotation::FaceUp
            | DeviceRotation::FaceDown => Self::Portrait,
        }
    }
}

/// A touch location in preview coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    /// Horizontal offset from the left edge
    pub x: f64,
    /// Vertical offset from the top edge
    pub y: f64,
}

/// Size of the preview surface the touch was made on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Preview width
    pub width: f64,
    /// Preview height
    pub height: f64,
}

/// Focus point of interest in normalized sensor coordinates (0.0..=1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusPoint {
    /// Normalized x
    pub x: f64,
    /// Normalized y
    pub y: f64,
}

impl FocusPoint {
    /// Map a preview touch to a sensor focus point.
    ///
    /// The sensor is landscape while the preview is portrait, so axes swap
    /// and the new y runs right-to-left. Returns `None` for a degenerate
    /// viewport.
    #[must_use]
    pub fn from_touch(touch: ScreenPoint, viewport: Viewport) -> Option<Self> {
        if viewport.width <= 0.0 || viewport.height <= 0.0 {
            return None;
        }
        let x = (touch.y / viewport.height).clamp(0.0, 1.0);
        let y = (1.0 - touch.x / viewport.width).clamp(0.0, 1.0);
        Some(Self { x, y })
    }
}
