use attendance_common::config::DisplayConfig;
use image::codecs::jpeg::JpegEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::pipeline::DisplayFrame;

const PREVIEW_QUALITY: u8 = 80;

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("frame image could not be decoded for preview")]
    Render,
    #[error("failed to encode preview: {0}")]
    Encode(String),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
}

/// Operator-facing output: the preview snapshot and the capture log.
///
/// Both are optional file mirrors; the capture log is always echoed to stdout.
pub struct Display {
    preview_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

impl Display {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            preview_path: config.preview_path.as_ref().map(PathBuf::from),
            log_path: config.log_path.as_ref().map(PathBuf::from),
        }
    }

    pub fn disabled() -> Self {
        Self {
            preview_path: None,
            log_path: None,
        }
    }

    /// Write the latest frame, overlay included, to the preview file.
    pub fn refresh(&self, frame: &DisplayFrame) -> Result<(), DisplayError> {
        let Some(path) = &self.preview_path else {
            return Ok(());
        };
        let img = frame.render().ok_or(DisplayError::Render)?;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, PREVIEW_QUALITY)
            .encode_image(&img)
            .map_err(|e| DisplayError::Encode(e.to_string()))?;

        // Write then rename so a viewer never sees a half-written file.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &jpeg).map_err(|e| write_err(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| write_err(path, e))?;
        debug!(
            snapshot = frame.frame.snapshot_name(),
            bytes = jpeg.len(),
            "preview refreshed"
        );
        Ok(())
    }

    /// Surface a captured payload to the operator.
    pub fn show_capture(&self, payload: &str, delivered: bool) {
        if delivered {
            println!("{payload}");
        } else {
            println!("{payload}  [not delivered]");
        }
        if let Some(path) = &self.log_path {
            if let Err(e) = append_line(path, payload) {
                warn!(error = %e, "failed to mirror capture log");
            }
        }
    }
}

fn write_err(path: &Path, e: std::io::Error) -> DisplayError {
    DisplayError::Write(path.display().to_string(), e)
}

fn append_line(path: &Path, line: &str) -> Result<(), DisplayError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| write_err(path, e))?;
    writeln!(file, "{line}").map_err(|e| write_err(path, e))
}
