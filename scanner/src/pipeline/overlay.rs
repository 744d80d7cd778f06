use attendance_common::frame::{Detection, Frame, Point};
use image::{Rgb, RgbImage};

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CAPTION_BG: Rgb<u8> = Rgb([0, 0, 0]);
const LINE_THICKNESS: i32 = 2;
const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;
/// Caption baseline sits this far above the first polygon point.
const CAPTION_OFFSET: i32 = 10;

/// What gets drawn over a frame when a code was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub polygon: Vec<Point>,
    pub caption: String,
}

impl Overlay {
    pub fn from_detection(detection: &Detection) -> Self {
        Self {
            polygon: detection.geometry.clone(),
            caption: detection.payload.clone(),
        }
    }
}

/// The most recent frame as it should be shown to the operator.
///
/// Rendering is deferred to [`DisplayFrame::render`] so the pipeline itself
/// never touches pixels.
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub frame: Frame,
    pub overlay: Option<Overlay>,
}

impl DisplayFrame {
    pub fn plain(frame: Frame) -> Self {
        Self {
            frame,
            overlay: None,
        }
    }

    pub fn annotated(frame: Frame, detection: &Detection) -> Self {
        Self {
            frame,
            overlay: Some(Overlay::from_detection(detection)),
        }
    }

    /// Decode the frame and draw the overlay, if any. `None` if the frame
    /// image cannot be decoded.
    pub fn render(&self) -> Option<RgbImage> {
        let mut img = image::load_from_memory(&self.frame.jpeg).ok()?.to_rgb8();
        if let Some(overlay) = &self.overlay {
            draw_overlay(&mut img, overlay);
        }
        Some(img)
    }
}

/// Draw a closed quadrilateral around the code and its payload above the first corner.
/// Polygons that are not quadrilaterals are skipped; the caption is still drawn
/// when an anchor point exists.
pub fn draw_overlay(img: &mut RgbImage, overlay: &Overlay) {
    if overlay.polygon.len() == 4 {
        for i in 0..4 {
            let a = overlay.polygon[i];
            let b = overlay.polygon[(i + 1) % 4];
            draw_line(img, a, b, OVERLAY_COLOR);
        }
    }
    if let Some(anchor) = overlay.polygon.first() {
        let top = (anchor.y - CAPTION_OFFSET - GLYPH_H).max(0);
        draw_caption(img, anchor.x.max(0), top, &overlay.caption);
    }
}

fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_line(img: &mut RgbImage, from: Point, to: Point, color: Rgb<u8>) {
    let (mut x, mut y) = (from.x, from.y);
    let dx = (to.x - from.x).abs();
    let dy = -(to.y - from.y).abs();
    let sx = if from.x < to.x { 1 } else { -1 };
    let sy = if from.y < to.y { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        for ox in 0..LINE_THICKNESS {
            for oy in 0..LINE_THICKNESS {
                put(img, x + ox, y + oy, color);
            }
        }
        if x == to.x && y == to.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_caption(img: &mut RgbImage, left: i32, top: i32, text: &str) {
    let width = text.chars().count() as i32 * GLYPH_ADVANCE + 2;
    for y in top..top + GLYPH_H + 2 {
        for x in left..left + width {
            put(img, x, y, CAPTION_BG);
        }
    }

    let mut x = left + 1;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (bits >> (GLYPH_W - 1 - col)) & 1 == 1 {
                        put(img, x + col, top + 1 + row as i32, OVERLAY_COLOR);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// 5x7 bitmap glyphs, one byte per row, MSB of the low five bits on the left.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => return None,
    };
    Some(rows)
}
