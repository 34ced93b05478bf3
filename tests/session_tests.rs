//! Integration tests for scan sessions over the simulated and frame-replay
//! pipelines.

use codescan::scanner::{
    CodeEvent, DeviceCapture, FrameDecoder, FrameDirectoryProvider, ScanError, ScanMode,
    ScanResult, ScanSession, SessionConfig, SimulatedCapture, Symbology, SymbologySet, Toggle,
};
use image::{DynamicImage, GrayImage, Luma};
use qrcode::{Color, QrCode};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(300);

/// Reads the code from the first pixel of a frame: 0 means no code.
struct PixelDecoder;

impl FrameDecoder for PixelDecoder {
    fn supports(&self, symbology: Symbology) -> bool {
        symbology == Symbology::Qr
    }

    fn decode(&self, frame: &GrayImage, _symbologies: &SymbologySet) -> Vec<CodeEvent> {
        match frame.get_pixel(0, 0).0[0] {
            0 => Vec::new(),
            v => vec![CodeEvent::new(format!("CODE-{v}"), Symbology::Qr)],
        }
    }
}

fn start(
    config: SessionConfig,
    pipeline: Box<dyn codescan::scanner::CapturePipeline>,
) -> (ScanSession, Receiver<ScanResult>) {
    let (tx, rx) = mpsc::channel();
    let session = ScanSession::start(config, pipeline, move |result: ScanResult| {
        let _ = tx.send(result);
    });
    (session, rx)
}

fn wait_for(rx: &Receiver<ScanResult>, count: usize) -> Vec<ScanResult> {
    (0..count)
        .map(|_| rx.recv_timeout(WAIT).expect("expected a delivery"))
        .collect()
}

fn settle(rx: &Receiver<ScanResult>) -> Vec<ScanResult> {
    std::thread::sleep(SETTLE);
    rx.try_iter().collect()
}

fn ok(value: &str) -> ScanResult {
    Ok(value.to_string())
}

fn write_frames(dir: &Path, values: &[u8]) {
    for (i, value) in values.iter().enumerate() {
        GrayImage::from_pixel(4, 4, Luma([*value]))
            .save(dir.join(format!("{i:03}.png")))
            .unwrap();
    }
}

/// Render `value` as a QR code, 8 pixels per module with a 4-module quiet zone.
fn qr_image(value: &str) -> GrayImage {
    const SCALE: u32 = 8;
    const QUIET: u32 = 4;
    let code = QrCode::new(value.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let size = (modules + 2 * QUIET) * SCALE;
    GrayImage::from_fn(size, size, |x, y| {
        let (mx, my) = (x / SCALE, y / SCALE);
        let inside =
            (QUIET..QUIET + modules).contains(&mx) && (QUIET..QUIET + modules).contains(&my);
        let dark =
            inside && colors[((my - QUIET) * modules + (mx - QUIET)) as usize] == Color::Dark;
        Luma([if dark { 0 } else { 255 }])
    })
}

fn frame_pipeline(provider: FrameDirectoryProvider) -> Box<DeviceCapture> {
    Box::new(
        DeviceCapture::new(provider.with_frame_interval(Duration::from_millis(5)))
            .with_decoder(Arc::new(PixelDecoder))
            .with_poll_interval(Duration::from_millis(10)),
    )
}

// =============================================================================
// Delivery modes
// =============================================================================

#[test]
fn test_once_delivers_first_code_only() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let (session, rx) = start(SessionConfig::new(ScanMode::Once), Box::new(pipeline));

    trigger.scan("A");
    trigger.scan("A");
    trigger.scan("B");

    assert_eq!(wait_for(&rx, 1), vec![ok("A")]);
    assert!(settle(&rx).is_empty());
    assert!(session.is_finished());
    assert_eq!(session.deliveries(), 1);
}

#[test]
fn test_once_per_code_suppresses_repeats() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let (session, rx) = start(SessionConfig::new(ScanMode::OncePerCode), Box::new(pipeline));

    for value in ["A", "B", "A", "C"] {
        trigger.scan(value);
    }

    assert_eq!(wait_for(&rx, 3), vec![ok("A"), ok("B"), ok("C")]);
    assert!(settle(&rx).is_empty());
    let seen: Vec<_> = session.seen_codes().into_iter().collect();
    assert_eq!(seen, vec!["A", "B", "C"]);
}

#[test]
fn test_continuous_without_interval_delivers_everything() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let config = SessionConfig::new(ScanMode::Continuous).with_scan_interval(Duration::ZERO);
    let (_session, rx) = start(config, Box::new(pipeline));

    for value in ["A", "A", "B"] {
        trigger.scan(value);
    }

    assert_eq!(wait_for(&rx, 3), vec![ok("A"), ok("A"), ok("B")]);
}

#[test]
fn test_continuous_interval_throttles_deliveries() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let config =
        SessionConfig::new(ScanMode::Continuous).with_scan_interval(Duration::from_secs(60));
    let (session, rx) = start(config, Box::new(pipeline));

    for value in ["A", "B", "C"] {
        trigger.scan(value);
    }

    assert_eq!(wait_for(&rx, 1), vec![ok("A")]);
    assert!(settle(&rx).is_empty());
    assert!(!session.is_finished());
}

#[test]
fn test_tap_delivers_simulated_payload() {
    let (pipeline, trigger) = SimulatedCapture::new("4006381333931");
    let (_session, rx) = start(SessionConfig::new(ScanMode::Once), Box::new(pipeline));

    assert!(trigger.tap());
    assert_eq!(wait_for(&rx, 1), vec![ok("4006381333931")]);
}

// =============================================================================
// Pause
// =============================================================================

#[test]
fn test_paused_session_discards_codes() {
    let paused = Toggle::new(true);
    let (pipeline, trigger) = SimulatedCapture::new("");
    let config = SessionConfig::new(ScanMode::Once).with_pause_toggle(paused.clone());
    let (session, rx) = start(config, Box::new(pipeline));

    trigger.scan("A");
    assert!(settle(&rx).is_empty());
    assert!(!session.is_finished());

    paused.set(false);
    trigger.scan("B");
    assert_eq!(wait_for(&rx, 1), vec![ok("B")]);
}

#[test]
fn test_paused_session_discards_image_failures() {
    let paused = Toggle::new(true);
    let (pipeline, trigger) = SimulatedCapture::new("");
    let config = SessionConfig::new(ScanMode::Once).with_pause_toggle(paused);
    let (session, rx) = start(config, Box::new(pipeline));

    let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(32, 32, Luma([255])));
    trigger.submit_image(&blank);

    assert!(settle(&rx).is_empty());
    assert!(!session.is_stopped());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_missing_device_reports_bad_input_once() {
    let dir = tempdir().unwrap();
    let provider = FrameDirectoryProvider::new(dir.path().join("no-such-dir"));
    let (session, rx) = start(SessionConfig::new(ScanMode::Once), frame_pipeline(provider));

    // Setup failures are delivered before start returns.
    assert_eq!(rx.try_recv().unwrap(), Err(ScanError::BadInput));
    assert!(session.is_stopped());
    assert!(session.has_failed());
    assert!(settle(&rx).is_empty());
}

#[test]
fn test_unsupported_symbologies_report_bad_output() {
    let dir = tempdir().unwrap();
    write_frames(dir.path(), &[1]);
    let provider = FrameDirectoryProvider::new(dir.path());
    let config = SessionConfig::new(ScanMode::Once).with_symbologies([Symbology::Ean13]);
    let (session, rx) = start(config, frame_pipeline(provider));

    assert_eq!(rx.try_recv().unwrap(), Err(ScanError::BadOutput));
    assert!(session.is_stopped());
    assert!(settle(&rx).is_empty());
}

#[test]
fn test_blank_image_reports_bad_output_once() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let (session, rx) = start(SessionConfig::new(ScanMode::Once), Box::new(pipeline));

    let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([255])));
    trigger.submit_image(&blank);

    assert_eq!(wait_for(&rx, 1), vec![Err(ScanError::BadOutput)]);
    // The failure stops the session, so later input goes nowhere.
    std::thread::sleep(SETTLE);
    assert!(session.is_stopped());
    assert!(!trigger.submit_image(&blank));
    assert!(rx.try_iter().next().is_none());
}

#[test]
fn test_camera_switch_failure_reported_while_paused() {
    let back = tempdir().unwrap();
    write_frames(back.path(), &[0]);

    let provider = FrameDirectoryProvider::new(back.path()).with_repeat(true);
    let paused = Toggle::new(true);
    let front_camera = Toggle::new(false);
    let config = SessionConfig::new(ScanMode::Continuous)
        .with_pause_toggle(paused)
        .with_camera_toggle(front_camera.clone());
    let (session, rx) = start(config, frame_pipeline(provider));

    front_camera.set(true);
    assert_eq!(wait_for(&rx, 1), vec![Err(ScanError::BadInput)]);
    assert!(settle(&rx).is_empty());
    assert!(session.is_stopped());
    assert!(session.has_failed());
}

#[test]
fn test_unreadable_image_reports_bad_output() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let (_session, rx) = start(SessionConfig::new(ScanMode::Once), Box::new(pipeline));

    trigger.submit_image_path("/non/existent/ticket.png");
    assert_eq!(wait_for(&rx, 1), vec![Err(ScanError::BadOutput)]);
}

// =============================================================================
// QR decoding
// =============================================================================

#[test]
fn test_submitted_qr_image_delivers_its_value() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let (session, rx) = start(SessionConfig::new(ScanMode::Once), Box::new(pipeline));

    let image = DynamicImage::ImageLuma8(qr_image("4006381333931"));
    assert!(trigger.submit_image(&image));
    assert_eq!(wait_for(&rx, 1), vec![ok("4006381333931")]);
    assert!(session.is_finished());
}

#[test]
fn test_qr_image_path_delivers_its_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ticket.png");
    qr_image("TICKET-0042").save(&path).unwrap();

    let (pipeline, trigger) = SimulatedCapture::new("");
    let (_session, rx) = start(SessionConfig::new(ScanMode::Once), Box::new(pipeline));

    assert!(trigger.submit_image_path(&path));
    assert_eq!(wait_for(&rx, 1), vec![ok("TICKET-0042")]);
}

#[test]
fn test_replayed_qr_frames_decode_with_default_decoder() {
    let dir = tempdir().unwrap();
    GrayImage::from_pixel(64, 64, Luma([255]))
        .save(dir.path().join("000.png"))
        .unwrap();
    qr_image("FIRST").save(dir.path().join("001.png")).unwrap();
    qr_image("FIRST").save(dir.path().join("002.png")).unwrap();
    qr_image("SECOND").save(dir.path().join("003.png")).unwrap();

    let provider = FrameDirectoryProvider::new(dir.path())
        .with_frame_interval(Duration::from_millis(5));
    let pipeline = DeviceCapture::new(provider).with_poll_interval(Duration::from_millis(10));
    let (_session, rx) = start(SessionConfig::new(ScanMode::OncePerCode), Box::new(pipeline));

    assert_eq!(wait_for(&rx, 2), vec![ok("FIRST"), ok("SECOND")]);
    assert!(settle(&rx).is_empty());
}

// =============================================================================
// Stop
// =============================================================================

#[test]
fn test_no_delivery_after_stop() {
    let (pipeline, trigger) = SimulatedCapture::new("A");
    let (session, rx) = start(SessionConfig::new(ScanMode::OncePerCode), Box::new(pipeline));

    session.stop();
    session.stop();

    assert!(!trigger.tap());
    assert!(!trigger.scan("B"));
    assert!(settle(&rx).is_empty());
    assert!(!session.preview().running);
}

#[test]
fn test_stop_from_inside_sink() {
    let (pipeline, trigger) = SimulatedCapture::new("");
    let results = Arc::new(Mutex::new(Vec::new()));
    let handle_slot: Arc<Mutex<Option<codescan::scanner::SessionHandle>>> =
        Arc::new(Mutex::new(None));

    let sink_results = Arc::clone(&results);
    let sink_handle = Arc::clone(&handle_slot);
    let session = ScanSession::start(
        SessionConfig::new(ScanMode::OncePerCode),
        Box::new(pipeline),
        move |result: ScanResult| {
            sink_results.lock().unwrap().push(result);
            if let Some(handle) = sink_handle.lock().unwrap().as_ref() {
                handle.stop();
            }
        },
    );
    *handle_slot.lock().unwrap() = Some(session.handle());

    trigger.scan("A");
    std::thread::sleep(SETTLE);
    trigger.scan("B");
    std::thread::sleep(SETTLE);

    assert!(session.is_stopped());
    assert_eq!(*results.lock().unwrap(), vec![ok("A")]);
}

#[test]
fn test_dropping_session_stops_pipeline() {
    let (pipeline, trigger) = SimulatedCapture::new("A");
    let (session, _rx) = start(SessionConfig::new(ScanMode::Once), Box::new(pipeline));
    drop(session);
    assert!(!trigger.tap());
}

// =============================================================================
// Frame replay
// =============================================================================

#[test]
fn test_frame_replay_once_per_code() {
    let dir = tempdir().unwrap();
    write_frames(dir.path(), &[0, 1, 1, 2, 0, 1, 3]);
    let provider = FrameDirectoryProvider::new(dir.path());
    let (session, rx) = start(
        SessionConfig::new(ScanMode::OncePerCode),
        frame_pipeline(provider),
    );

    assert_eq!(
        wait_for(&rx, 3),
        vec![ok("CODE-1"), ok("CODE-2"), ok("CODE-3")]
    );
    assert!(settle(&rx).is_empty());
    assert!(!session.preview().running, "stream should have ended");
}

#[test]
fn test_camera_toggle_switches_device() {
    let back = tempdir().unwrap();
    let front = tempdir().unwrap();
    write_frames(back.path(), &[0]);
    write_frames(front.path(), &[7]);

    let provider = FrameDirectoryProvider::new(back.path())
        .with_front(front.path())
        .with_repeat(true);
    let front_camera = Toggle::new(false);
    let config = SessionConfig::new(ScanMode::OncePerCode).with_camera_toggle(front_camera.clone());
    let (session, rx) = start(config, frame_pipeline(provider));

    assert!(settle(&rx).is_empty());
    assert_eq!(
        session.preview().camera,
        codescan::scanner::CameraPosition::Back
    );

    front_camera.set(true);
    assert_eq!(wait_for(&rx, 1), vec![ok("CODE-7")]);
    assert_eq!(
        session.preview().camera,
        codescan::scanner::CameraPosition::Front
    );
    assert!(settle(&rx).is_empty());
}

#[test]
fn test_camera_toggle_to_missing_camera_fails() {
    let back = tempdir().unwrap();
    write_frames(back.path(), &[0]);

    let provider = FrameDirectoryProvider::new(back.path()).with_repeat(true);
    let front_camera = Toggle::new(false);
    let config = SessionConfig::new(ScanMode::Continuous).with_camera_toggle(front_camera.clone());
    let (session, rx) = start(config, frame_pipeline(provider));

    front_camera.set(true);
    assert_eq!(wait_for(&rx, 1), vec![Err(ScanError::BadInput)]);
    std::thread::sleep(SETTLE);
    assert!(session.is_stopped());
    assert!(rx.try_iter().next().is_none());
}

// =============================================================================
// Preview
// =============================================================================

#[test]
fn test_preview_follows_rotation_and_viewfinder() {
    use codescan::scanner::{DeviceRotation, Orientation, ScreenPoint, Viewport};

    let (pipeline, _trigger) = SimulatedCapture::new("");
    let config = SessionConfig::new(ScanMode::Once).with_viewfinder(true);
    let (session, _rx) = start(config, Box::new(pipeline));

    session.orientation_changed(DeviceRotation::LandscapeLeft);
    assert_eq!(session.preview().orientation, Orientation::LandscapeLeft);

    session.orientation_changed(DeviceRotation::FaceUp);
    assert_eq!(session.preview().orientation, Orientation::Portrait);

    // Focus requests are best effort and never surface an error.
    session.focus(
        ScreenPoint { x: 10.0, y: 20.0 },
        Viewport {
            width: 0.0,
            height: 0.0,
        },
    );
    assert!(session.preview().show_viewfinder);
    assert!(session.preview().running);
}
