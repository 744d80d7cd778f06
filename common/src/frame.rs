/// A raw camera frame with timestamp metadata.
///
/// The image is kept in its encoded form (JPEG, as served by the camera) and
/// only decoded by whoever needs pixels. The pipeline owns a frame for one
/// processing cycle; only the latest is retained for display.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg,
            captured_at_ms,
            seq,
        }
    }

    /// A device may hand back a zero-length body when it misbehaves.
    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    pub fn size(&self) -> usize {
        self.jpeg.len()
    }

    /// File name used when the frame is written out as a preview snapshot.
    pub fn snapshot_name(&self) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        format!(
            "{ts}_{seq:06}.jpg",
            ts = dt.format("%Y%m%dT%H%M%S%3fZ"),
            seq = self.seq
        )
    }
}

/// Pixel coordinate in frame space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One decoded optical code: its string content and the outline where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub payload: String,
    /// Polygon of zero or more points; QR codes yield four corners.
    pub geometry: Vec<Point>,
}

impl Detection {
    pub fn new(payload: impl Into<String>, geometry: Vec<Point>) -> Self {
        Self {
            payload: payload.into(),
            geometry,
        }
    }
}
