//! Frame decoding.
//!
//! # Overview
//! A [`FrameDecoder`] turns a grayscale frame into the codes it contains.
//! [`QrDecoder`] is the built-in implementation, backed by rqrr.
//!
//! Only the first detection of a frame is forwarded to a session; extra
//! codes in the same frame are ignored.

use image::{DynamicImage, GrayImage};
use rqrr::PreparedImage;
use std::path::Path;
use thiserror::Error;

use super::{CodeEvent, Symbology, SymbologySet};

/// Errors that can occur while loading a still image for decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Failed to open or decode the image file.
    #[error("Failed to load image {0}: {1}")]
    Load(String, #[source] image::ImageError),
}

/// Recognizes codes in grayscale frames.
pub trait FrameDecoder: Send + Sync {
    /// Whether this decoder can recognize `symbology` at all.
    fn supports(&self, symbology: Symbology) -> bool;

    /// All codes of the requested symbologies found in `frame`, in detection order.
    fn decode(&self, frame: &GrayImage, symbologies: &SymbologySet) -> Vec<CodeEvent>;

    /// The first code found in `frame`, if any.
    fn decode_first(&self, frame: &GrayImage, symbologies: &SymbologySet) -> Option<CodeEvent> {
        self.decode(frame, symbologies).into_iter().next()
    }
}

/// QR decoder backed by rqrr.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDecoder;

impl QrDecoder {
    /// Create a new QR decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decode the first QR code in a still image.
    pub fn decode_image(&self, image: &DynamicImage) -> Option<CodeEvent> {
        let symbologies: SymbologySet = [Symbology::Qr].into_iter().collect();
        self.decode_first(&image.to_luma8(), &symbologies)
    }

    /// Load a still image from disk and decode the first QR code in it.
    pub fn decode_path<P: AsRef<Path>>(&self, path: P) -> Result<Option<CodeEvent>, DecodeError> {
        let path = path.as_ref();
        let image =
            image::open(path).map_err(|e| DecodeError::Load(path.display().to_string(), e))?;
        Ok(self.decode_image(&image))
    }
}

impl QrDecoder {
    /// Decode the detected grids of `frame` in order, stopping after the
    /// first success when `first_only` is set.
    fn decode_grids(frame: &GrayImage, first_only: bool) -> Vec<CodeEvent> {
        let (width, height) = frame.dimensions();
        let mut prepared =
            PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                frame.get_pixel(x as u32, y as u32).0[0]
            });

        let grids = prepared.detect_grids();
        log::trace!("Found {} potential QR grids in {}x{} frame", grids.len(), width, height);

        let codes = grids.into_iter().filter_map(|grid| match grid.decode() {
            Ok((_, content)) => Some(CodeEvent::new(content, Symbology::Qr)),
            Err(e) => {
                log::trace!("Grid decode failed: {:?}", e);
                None
            }
        });
        if first_only {
            codes.take(1).collect()
        } else {
            codes.collect()
        }
    }
}

impl FrameDecoder for QrDecoder {
    fn supports(&self, symbology: Symbology) -> bool {
        symbology == Symbology::Qr
    }

    fn decode(&self, frame: &GrayImage, symbologies: &SymbologySet) -> Vec<CodeEvent> {
        if !symbologies.contains(&Symbology::Qr) {
            return Vec::new();
        }
        Self::decode_grids(frame, false)
    }

    fn decode_first(&self, frame: &GrayImage, symbologies: &SymbologySet) -> Option<CodeEvent> {
        if !symbologies.contains(&Symbology::Qr) {
            return None;
        }
        Self::decode_grids(frame, true).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use qrcode::{Color, QrCode};

    fn qr_only() -> SymbologySet {
        [Symbology::Qr].into_iter().collect()
    }

    /// Render `value` as a QR code, 8 pixels per module with a 4-module quiet zone.
    fn qr_frame(value: &str) -> GrayImage {
        const SCALE: u32 = 8;
        const QUIET: u32 = 4;
        let code = QrCode::new(value.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let size = (modules + 2 * QUIET) * SCALE;
        GrayImage::from_fn(size, size, |x, y| {
            let (mx, my) = (x / SCALE, y / SCALE);
            let inside = (QUIET..QUIET + modules).contains(&mx)
                && (QUIET..QUIET + modules).contains(&my);
            let dark = inside
                && colors[((my - QUIET) * modules + (mx - QUIET)) as usize] == Color::Dark;
            Luma([if dark { 0 } else { 255 }])
        })
    }

    #[test]
    fn test_decodes_rendered_qr() {
        let frame = qr_frame("4006381333931");
        let code = QrDecoder::new().decode_first(&frame, &qr_only()).unwrap();
        assert_eq!(code, CodeEvent::new("4006381333931", Symbology::Qr));
        assert_eq!(QrDecoder::new().decode(&frame, &qr_only()).len(), 1);
    }

    #[test]
    fn test_rendered_qr_ignored_when_qr_not_requested() {
        let frame = qr_frame("https://example.com/ticket/42");
        let symbologies: SymbologySet = [Symbology::Ean13].into_iter().collect();
        assert!(QrDecoder::new().decode_first(&frame, &symbologies).is_none());
    }

    #[test]
    fn test_decode_path_reads_saved_qr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticket.png");
        qr_frame("TICKET-0042").save(&path).unwrap();

        let code = QrDecoder::new().decode_path(&path).unwrap().unwrap();
        assert_eq!(code.value, "TICKET-0042");
        assert_eq!(code.symbology, Symbology::Qr);
    }

    #[test]
    fn test_qr_decoder_supports_only_qr() {
        let decoder = QrDecoder::new();
        assert!(decoder.supports(Symbology::Qr));
        assert!(!decoder.supports(Symbology::Ean13));
    }

    #[test]
    fn test_blank_frame_has_no_codes() {
        let frame = GrayImage::from_pixel(64, 64, Luma([255]));
        assert!(QrDecoder::new().decode(&frame, &qr_only()).is_empty());
    }

    #[test]
    fn test_checkerboard_has_no_codes() {
        let mut frame = GrayImage::new(64, 64);
        for x in 0..64 {
            for y in 0..64 {
                let v = if (x / 8 + y / 8) % 2 == 0 { 255 } else { 0 };
                frame.put_pixel(x, y, Luma([v]));
            }
        }
        assert!(QrDecoder::new().decode_first(&frame, &qr_only()).is_none());
    }

    #[test]
    fn test_qr_not_requested_skips_decoding() {
        let frame = GrayImage::from_pixel(16, 16, Luma([0]));
        let symbologies: SymbologySet = [Symbology::Ean13].into_iter().collect();
        assert!(QrDecoder::new().decode(&frame, &symbologies).is_empty());
    }

    #[test]
    fn test_decode_path_missing_file() {
        let result = QrDecoder::new().decode_path("/non/existent/image.png");
        assert!(matches!(result, Err(DecodeError::Load(_, _))));
    }
}
