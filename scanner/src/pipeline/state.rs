use attendance_common::frame::Frame;
use attendance_common::record::{ParseError, RecordParser};
use tracing::{debug, info, warn};

use crate::decoder::CodeDecoder;
use crate::sink::{Ack, RecordSink, SinkDestination, SinkError};

use super::overlay::DisplayFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No camera session yet.
    Idle,
    /// Polling frames, nothing pending.
    Scanning,
    /// A decoded payload is waiting for the operator.
    Detected,
    /// Shut down; the device has been released.
    Stopped,
}

/// What one call to [`ScanPipeline::on_frame`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Pipeline is not scanning; the frame was dropped.
    Ignored,
    /// Zero detections. State unchanged.
    NoDetection,
    /// First detection seen but not yet stable enough to become pending.
    Candidate { payload: String, seen: u32 },
    /// The payload is now the pending scan. `changed` is false when it
    /// merely refreshed an identical pending payload.
    Pending { payload: String, changed: bool },
}

/// What one call to [`ScanPipeline::on_capture_requested`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Nothing pending; no state change.
    NothingPending,
    /// Payload failed to parse; it stays pending.
    Rejected { payload: String, error: ParseError },
    /// Row delivered.
    Appended { payload: String, ack: Ack },
    /// Append attempted and failed. The scan is still consumed.
    SinkFailed { payload: String, error: SinkError },
}

/// Consecutive-detection gate in front of the pending slot.
#[derive(Debug)]
struct Stability {
    required: u32,
    candidate: Option<(String, u32)>,
}

impl Stability {
    fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            candidate: None,
        }
    }

    /// Record one sighting; returns how many consecutive frames showed it.
    fn observe(&mut self, payload: &str) -> u32 {
        match &mut self.candidate {
            Some((current, seen)) if current == payload => {
                *seen = seen.saturating_add(1);
                *seen
            }
            _ => {
                self.candidate = Some((payload.to_string(), 1));
                1
            }
        }
    }

    fn reset(&mut self) {
        self.candidate = None;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub frames_with_codes: u64,
    pub captures: u64,
    pub rejected: u64,
    pub sink_failures: u64,
}

/// Turns a stream of frames into at most one pending payload, and an operator
/// capture into one append attempt.
///
/// The pending slot has exactly one owner. Capture takes the payload out of
/// the slot before anything else happens, so no frame can overwrite it
/// between reading and confirming.
pub struct ScanPipeline {
    decoder: Box<dyn CodeDecoder>,
    parser: RecordParser,
    state: PipelineState,
    pending: Option<String>,
    stability: Stability,
    display: Option<DisplayFrame>,
    log: Vec<String>,
    stats: PipelineStats,
}

impl ScanPipeline {
    pub fn new(decoder: Box<dyn CodeDecoder>, parser: RecordParser, stable_frames: u32) -> Self {
        Self {
            decoder,
            parser,
            state: PipelineState::Idle,
            pending: None,
            stability: Stability::new(stable_frames),
            display: None,
            log: Vec::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Latest frame, annotated if it carried a code.
    pub fn display(&self) -> Option<&DisplayFrame> {
        self.display.as_ref()
    }

    /// Raw payloads of every capture attempted, delivered or not, oldest first.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Idle → Scanning. No effect in any other state.
    pub fn start(&mut self) {
        if self.state == PipelineState::Idle {
            info!(decoder = self.decoder.name(), "IDLE→SCANNING");
            self.state = PipelineState::Scanning;
        }
    }

    /// Any state → Stopped. Drops the pending scan.
    pub fn stop(&mut self) {
        if self.state != PipelineState::Stopped {
            info!(from = ?self.state, pending = self.pending.is_some(), "pipeline stopped");
            self.pending = None;
            self.stability.reset();
            self.state = PipelineState::Stopped;
        }
    }

    /// Forget the pending scan without capturing it.
    pub fn reset(&mut self) {
        if let Some(payload) = self.pending.take() {
            info!(payload, "DETECTED→SCANNING: pending scan discarded");
            self.state = PipelineState::Scanning;
        }
        self.stability.reset();
    }

    pub fn on_frame(&mut self, frame: Frame) -> FrameOutcome {
        if !matches!(self.state, PipelineState::Scanning | PipelineState::Detected) {
            debug!(seq = frame.seq, state = ?self.state, "frame outside scanning, dropped");
            return FrameOutcome::Ignored;
        }
        self.stats.frames += 1;

        let detections = self.decoder.decode(&frame);
        let Some(first) = detections.first() else {
            self.stability.reset();
            self.display = Some(DisplayFrame::plain(frame));
            return FrameOutcome::NoDetection;
        };
        self.stats.frames_with_codes += 1;
        if detections.len() > 1 {
            debug!(seq = frame.seq, count = detections.len(), "multiple codes, honouring the first");
        }

        let payload = first.payload.clone();
        let seen = self.stability.observe(&payload);
        self.display = Some(DisplayFrame::annotated(frame, first));

        if seen < self.stability.required {
            debug!(payload, seen, required = self.stability.required, "candidate not yet stable");
            return FrameOutcome::Candidate { payload, seen };
        }

        let changed = self.pending.as_deref() != Some(payload.as_str());
        if changed {
            info!(payload, "SCANNING→DETECTED: code decoded");
        }
        self.pending = Some(payload.clone());
        self.state = PipelineState::Detected;
        FrameOutcome::Pending { payload, changed }
    }

    pub async fn on_capture_requested(
        &mut self,
        sink: &dyn RecordSink,
        destination: &SinkDestination,
    ) -> CaptureOutcome {
        let Some(payload) = self.pending.take() else {
            warn!("capture requested with no code detected");
            return CaptureOutcome::NothingPending;
        };

        let record = match self.parser.parse(&payload) {
            Ok(r) => r,
            Err(error) => {
                warn!(payload, error = %error, "scanned data does not have the expected fields");
                self.stats.rejected += 1;
                self.pending = Some(payload.clone());
                return CaptureOutcome::Rejected { payload, error };
            }
        };

        // The scan is consumed whether or not the sink accepts it.
        self.state = PipelineState::Scanning;
        self.stability.reset();
        self.stats.captures += 1;

        info!(payload, sink = sink.name(), destination = %destination, "appending capture");
        let result = sink.append(destination, &record).await;
        self.log.push(payload.clone());

        match result {
            Ok(ack) => CaptureOutcome::Appended { payload, ack },
            Err(error) => {
                warn!(payload, error = %error, "failed to append capture to sink");
                self.stats.sink_failures += 1;
                CaptureOutcome::SinkFailed { payload, error }
            }
        }
    }
}
