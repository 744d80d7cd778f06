//! Fakes shared by pipeline and session tests.

use async_trait::async_trait;
use attendance_common::frame::{Detection, Frame, Point};
use attendance_common::record::Record;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, Luma};
use qrcode::{Color, QrCode};
use std::sync::Mutex;

use crate::decoder::CodeDecoder;
use crate::sink::{Ack, RecordSink, SinkDestination, SinkError};

/// Frame whose "image" is the UTF-8 payload text, for use with [`PayloadDecoder`].
pub fn frame(seq: u64, payload: &str) -> Frame {
    Frame::new(payload.as_bytes().to_vec(), 0, seq)
}

/// JPEG of a real QR code for `payload`: 6 px modules and a 4-module quiet zone.
pub fn qr_jpeg(payload: &str) -> Vec<u8> {
    const SCALE: u32 = 6;
    const QUIET: u32 = 4;
    let code = QrCode::new(payload.as_bytes()).unwrap();
    let width = code.width() as u32;
    let colors = code.to_colors();
    let side = (width + 2 * QUIET) * SCALE;
    let gray = GrayImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / SCALE, y / SCALE);
        let inside = (QUIET..QUIET + width).contains(&mx) && (QUIET..QUIET + width).contains(&my);
        if inside && colors[((my - QUIET) * width + (mx - QUIET)) as usize] == Color::Dark {
            Luma([0])
        } else {
            Luma([255])
        }
    });

    let rgb = DynamicImage::ImageLuma8(gray).to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 95)
        .encode_image(&rgb)
        .unwrap();
    jpeg
}

/// Treats the frame bytes as text. Empty means no code; `|` separates
/// several codes in one frame.
pub struct PayloadDecoder;

impl CodeDecoder for PayloadDecoder {
    fn decode(&self, frame: &Frame) -> Vec<Detection> {
        let text = String::from_utf8_lossy(&frame.jpeg);
        if text.is_empty() {
            return Vec::new();
        }
        text.split('|')
            .map(|p| {
                Detection::new(
                    p,
                    vec![
                        Point::new(10, 10),
                        Point::new(50, 10),
                        Point::new(50, 50),
                        Point::new(10, 50),
                    ],
                )
            })
            .collect()
    }

    fn name(&self) -> &str {
        "payload"
    }
}

/// Records every append; optionally fails each one with a fixed error.
pub struct RecordingSink {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    failure: Option<SinkError>,
}

impl RecordingSink {
    pub fn ok() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    pub fn failing(error: SinkError) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn append(
        &self,
        destination: &SinkDestination,
        record: &Record,
    ) -> Result<Ack, SinkError> {
        self.calls
            .lock()
            .unwrap()
            .push((destination.id().to_string(), record.fields().to_vec()));
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(Ack {
                updated_range: Some("Sheet1!A2:E2".into()),
            }),
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}
