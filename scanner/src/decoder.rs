use attendance_common::frame::{Detection, Frame, Point};
use image::{GrayImage, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

/// Code-decoding primitive: a frame in, zero or more detections out.
///
/// Implementations are stateless; the order of the returned detections is
/// whatever the underlying detector produces.
pub trait CodeDecoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Vec<Detection>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// QR decoder backed by `rqrr`, run on the luma channel of the JPEG.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode the frame's JPEG to grayscale. `None` for corrupt or empty frames.
    pub fn luma(jpeg: &[u8]) -> Option<GrayImage> {
        let img = ImageReader::new(Cursor::new(jpeg))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()?;
        Some(img.to_luma8())
    }

    pub fn decode_luma(&self, gray: &GrayImage) -> Vec<Detection> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            gray.width() as usize,
            gray.height() as usize,
            |x, y| gray.get_pixel(x as u32, y as u32).0[0],
        );

        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| {
                let geometry = grid.bounds.iter().map(|p| Point::new(p.x, p.y)).collect();
                match grid.decode() {
                    Ok((_meta, content)) => Some(Detection::new(content, geometry)),
                    Err(e) => {
                        debug!(error = %e, "grid located but not decodable");
                        None
                    }
                }
            })
            .collect()
    }
}

impl CodeDecoder for QrDecoder {
    fn decode(&self, frame: &Frame) -> Vec<Detection> {
        if frame.is_empty() {
            debug!(seq = frame.seq, "empty frame, nothing to decode");
            return Vec::new();
        }
        let Some(gray) = Self::luma(&frame.jpeg) else {
            warn!(seq = frame.seq, bytes = frame.size(), "failed to decode frame image");
            return Vec::new();
        };
        let detections = self.decode_luma(&gray);
        if !detections.is_empty() {
            debug!(seq = frame.seq, count = detections.len(), "codes decoded");
        }
        detections
    }

    fn name(&self) -> &str {
        "qr"
    }
}
