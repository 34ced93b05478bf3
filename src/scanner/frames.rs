//! Capture device replaying a directory of still frames.
//!
//! # Overview
//! [`FrameDirectoryDevice`] plays the image files of a directory, in file-name
//! order, as a video stream at a fixed frame interval. It lets a host drive the
//! hardware-backed pipeline from recorded frames: one directory per camera,
//! provided through [`FrameDirectoryProvider`].
//!
//! Frames are rotated to the current video orientation before decoding.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::{imageops, GrayImage};
use walkdir::WalkDir;

use super::device::{
    CaptureDevice, DeviceError, DeviceProvider, ExposureMode, FocusMode, FrameRead,
};
use super::{CameraPosition, FocusPoint, Orientation, Symbology, SymbologySet};

/// Default spacing between replayed frames (about 30 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

const FRAME_EXTENSIONS: [&str; 6] = ["png", "bmp", "gif", "tif", "tiff", "webp"];

/// Collect the frame files of `dir`, sorted by file name.
///
/// Only the top level is read; subdirectories are ignored.
pub fn list_frames(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable frame entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect()
}

/// Provider mapping each camera to a directory of frames.
#[derive(Debug, Clone, Default)]
pub struct FrameDirectoryProvider {
    back: Option<PathBuf>,
    front: Option<PathBuf>,
    frame_interval: Duration,
    repeat: bool,
}

impl FrameDirectoryProvider {
    /// Create a provider whose back camera replays `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            back: Some(dir.into()),
            front: None,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            repeat: false,
        }
    }

    /// Give the front camera its own frame directory.
    #[must_use]
    pub fn with_front(mut self, dir: impl Into<PathBuf>) -> Self {
        self.front = Some(dir.into());
        self
    }

    /// Set the spacing between frames.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Loop the frames instead of ending the stream.
    #[must_use]
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }
}

impl DeviceProvider for FrameDirectoryProvider {
    fn open(&self, camera: CameraPosition) -> Option<Box<dyn CaptureDevice>> {
        let dir = match camera {
            CameraPosition::Back => self.back.as_ref()?,
            CameraPosition::Front => self.front.as_ref()?,
        };
        let device = FrameDirectoryDevice::open(dir, self.frame_interval, self.repeat)?;
        log::debug!(
            "Replaying {} frames for the {:?} camera",
            device.frame_count(),
            camera
        );
        Some(Box::new(device))
    }
}

/// A capture device backed by a directory of image files.
#[derive(Debug)]
pub struct FrameDirectoryDevice {
    name: String,
    frames: Vec<PathBuf>,
    position: usize,
    frame_interval: Duration,
    repeat: bool,
    next_due: Option<Instant>,
    orientation: Orientation,
    configuring: bool,
}

impl FrameDirectoryDevice {
    /// Open `dir`. Returns `None` if it holds no frames.
    #[must_use]
    pub fn open(dir: &Path, frame_interval: Duration, repeat: bool) -> Option<Self> {
        let frames = list_frames(dir);
        if frames.is_empty() {
            log::debug!("No frames in {}", dir.display());
            return None;
        }
        Some(Self {
            name: format!("frames:{}", dir.display()),
            frames,
            position: 0,
            frame_interval,
            repeat,
            next_due: None,
            orientation: Orientation::Portrait,
            configuring: false,
        })
    }

    /// Number of frames in one pass.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn load(&self, path: &Path) -> Option<GrayImage> {
        match image::open(path) {
            Ok(image) => Some(rotate(image.to_luma8(), self.orientation)),
            Err(e) => {
                log::warn!("Skipping unreadable frame {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn rotate(frame: GrayImage, orientation: Orientation) -> GrayImage {
    match orientation {
        Orientation::Portrait => frame,
        Orientation::PortraitUpsideDown => imageops::rotate180(&frame),
        Orientation::LandscapeLeft => imageops::rotate270(&frame),
        Orientation::LandscapeRight => imageops::rotate90(&frame),
    }
}

impl CaptureDevice for FrameDirectoryDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach_input(&mut self) -> Result<(), DeviceError> {
        if self.frames.is_empty() {
            return Err(DeviceError::InputRejected(format!("{} was released", self.name)));
        }
        Ok(())
    }

    fn attach_output(&mut self, symbologies: &SymbologySet) -> Result<(), DeviceError> {
        if !symbologies.contains(&Symbology::Qr) {
            return Err(DeviceError::OutputRejected(
                "replayed frames are only decoded for QR codes".to_string(),
            ));
        }
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<FrameRead, DeviceError> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(FrameRead::Idle);
                }
                std::thread::sleep(wait);
            }
        }

        if self.position >= self.frames.len() {
            if !self.repeat || self.frames.is_empty() {
                return Ok(FrameRead::Ended);
            }
            self.position = 0;
        }

        let path = self.frames[self.position].clone();
        self.position += 1;
        self.next_due = Some(Instant::now() + self.frame_interval);

        Ok(match self.load(&path) {
            Some(frame) => FrameRead::Frame(frame),
            None => FrameRead::Idle,
        })
    }

    fn set_video_orientation(&mut self, orientation: Orientation) -> bool {
        self.orientation = orientation;
        true
    }

    fn lock_for_configuration(&mut self) -> Result<(), DeviceError> {
        if self.configuring {
            return Err(DeviceError::ConfigurationLocked);
        }
        self.configuring = true;
        Ok(())
    }

    // Recorded frames have a fixed focus.
    fn set_focus(&mut self, point: FocusPoint, _mode: FocusMode) {
        log::trace!("{}: focus point ({:.2}, {:.2}) ignored", self.name, point.x, point.y);
    }

    fn set_exposure(&mut self, _point: FocusPoint, _mode: ExposureMode) {}

    fn unlock_for_configuration(&mut self) {
        self.configuring = false;
    }

    fn release(&mut self) {
        self.frames.clear();
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::fs;
    use tempfile::tempdir;

    fn write_frame(dir: &Path, name: &str, value: u8) {
        GrayImage::from_pixel(4, 2, Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_list_frames_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "002.png", 2);
        write_frame(dir.path(), "001.png", 1);
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_frame(&dir.path().join("nested"), "000.png", 0);

        let frames = list_frames(dir.path());
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["001.png", "002.png"]);
    }

    #[test]
    fn test_provider_without_frames_has_no_device() {
        let dir = tempdir().unwrap();
        let provider = FrameDirectoryProvider::new(dir.path());
        assert!(provider.open(CameraPosition::Back).is_none());
        assert!(provider.open(CameraPosition::Front).is_none());
    }

    #[test]
    fn test_replays_frames_then_ends() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "a.png", 10);
        write_frame(dir.path(), "b.png", 20);

        let mut device = FrameDirectoryDevice::open(dir.path(), Duration::ZERO, false).unwrap();
        assert_eq!(device.frame_count(), 2);

        let mut values = Vec::new();
        loop {
            match device.next_frame(Duration::from_millis(10)).unwrap() {
                FrameRead::Frame(frame) => values.push(frame.get_pixel(0, 0).0[0]),
                FrameRead::Idle => {}
                FrameRead::Ended => break,
            }
        }
        assert_eq!(values, vec![10, 20]);
    }

    #[test]
    fn test_repeat_loops_frames() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "a.png", 5);

        let mut device = FrameDirectoryDevice::open(dir.path(), Duration::ZERO, true).unwrap();
        for _ in 0..3 {
            assert!(matches!(
                device.next_frame(Duration::from_millis(10)).unwrap(),
                FrameRead::Frame(_)
            ));
        }
    }

    #[test]
    fn test_orientation_rotates_frames() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "a.png", 1);

        let mut device = FrameDirectoryDevice::open(dir.path(), Duration::ZERO, false).unwrap();
        assert!(device.set_video_orientation(Orientation::LandscapeRight));
        match device.next_frame(Duration::from_millis(10)).unwrap() {
            FrameRead::Frame(frame) => assert_eq!(frame.dimensions(), (2, 4)),
            other => panic!("Expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_output_requires_qr() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "a.png", 1);
        let mut device = FrameDirectoryDevice::open(dir.path(), Duration::ZERO, false).unwrap();

        let ean: SymbologySet = [Symbology::Ean13].into_iter().collect();
        assert!(matches!(
            device.attach_output(&ean),
            Err(DeviceError::OutputRejected(_))
        ));
        let qr: SymbologySet = [Symbology::Qr, Symbology::Ean13].into_iter().collect();
        assert!(device.attach_output(&qr).is_ok());
    }

    #[test]
    fn test_released_device_rejects_input() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "a.png", 1);
        let mut device = FrameDirectoryDevice::open(dir.path(), Duration::ZERO, false).unwrap();
        device.release();
        assert!(matches!(
            device.attach_input(),
            Err(DeviceError::InputRejected(_))
        ));
    }

    #[test]
    fn test_configuration_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "a.png", 1);
        let mut device = FrameDirectoryDevice::open(dir.path(), Duration::ZERO, false).unwrap();

        device.lock_for_configuration().unwrap();
        assert!(matches!(
            device.lock_for_configuration(),
            Err(DeviceError::ConfigurationLocked)
        ));
        device.set_focus(FocusPoint { x: 0.1, y: 0.2 }, FocusMode::ContinuousAuto);
        device.unlock_for_configuration();
        assert!(device.lock_for_configuration().is_ok());
    }
}
