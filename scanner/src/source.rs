use async_trait::async_trait;
use attendance_common::config::CameraConfig;
use attendance_common::frame::Frame;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("camera returned HTTP status {0}")]
    Status(u16),
    #[error("camera handle already closed")]
    Closed,
}

/// A camera handle yielding frames on demand.
///
/// Handles are obtained already open and are not restartable: once
/// [`FrameSource::close`] has run every further poll fails with
/// [`DeviceError::Closed`].
#[async_trait]
pub trait FrameSource: Send {
    /// Fetch the current frame. Errors are per-cycle; the caller skips the cycle.
    async fn poll(&mut self) -> Result<Frame, DeviceError>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "camera"
    }
}

/// Camera exposed as an HTTP snapshot endpoint: every GET returns one JPEG.
pub struct HttpCamera {
    client: Option<reqwest::Client>,
    url: String,
    seq: u64,
}

impl HttpCamera {
    /// Build the handle. No request is made; pair with [`HttpCamera::probe`]
    /// to report an unreachable camera before scanning starts.
    pub fn connect(config: &CameraConfig) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            // A snapshot slower than one tick is useless; the next tick fetches a fresh one.
            .timeout(config.poll_interval().max(Duration::from_millis(500)))
            .build()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        Ok(Self {
            client: Some(client),
            url: config.url.clone(),
            seq: 0,
        })
    }

    /// Fetch one snapshot and discard it. A failure is advisory: every poll
    /// retries the endpoint.
    pub async fn probe(&self) -> Result<(), DeviceError> {
        let client = self.client.as_ref().ok_or(DeviceError::Closed)?;
        let resp = client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DeviceError::Unavailable(format!(
                "probe returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        info!(url = self.url, "camera reachable");
        Ok(())
    }
}

#[async_trait]
impl FrameSource for HttpCamera {
    async fn poll(&mut self) -> Result<Frame, DeviceError> {
        let client = self.client.as_ref().ok_or(DeviceError::Closed)?;

        let resp = client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DeviceError::Read(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DeviceError::Status(resp.status().as_u16()));
        }
        let jpeg = resp
            .bytes()
            .await
            .map_err(|e| DeviceError::Read(e.to_string()))?
            .to_vec();

        let seq = self.seq;
        self.seq += 1;
        let frame = Frame::new(jpeg, Utc::now().timestamp_millis(), seq);
        debug!(seq, bytes = frame.size(), "frame polled");
        Ok(frame)
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            info!(url = self.url, frames = self.seq, "camera released");
        }
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn name(&self) -> &str {
        &self.url
    }
}

impl Drop for HttpCamera {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(url = self.url, "camera dropped while open, releasing");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> CameraConfig {
        CameraConfig {
            // Port 9 (discard) on loopback is not serving HTTP.
            url: "http://127.0.0.1:9/frame".into(),
            poll_interval_ms: 80,
            connect_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn unreachable_camera_reported_before_scanning() {
        let camera = HttpCamera::connect(&unreachable()).unwrap();
        assert!(matches!(camera.probe().await, Err(DeviceError::Unavailable(_))));
        assert!(camera.is_open());
    }

    #[tokio::test]
    async fn unreachable_camera_fails_per_poll() {
        let mut camera = HttpCamera::connect(&unreachable()).unwrap();
        for _ in 0..2 {
            assert!(matches!(camera.poll().await, Err(DeviceError::Read(_))));
        }
        assert!(camera.is_open());
    }

    #[tokio::test]
    async fn closed_camera_refuses_to_poll() {
        let mut camera = HttpCamera {
            client: Some(reqwest::Client::new()),
            url: "http://127.0.0.1:9/frame".into(),
            seq: 0,
        };
        camera.close();
        assert!(!camera.is_open());
        assert!(matches!(camera.poll().await, Err(DeviceError::Closed)));
        // Second close is a no-op.
        camera.close();
    }
}
