use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::console::Command;
use crate::display::Display;
use crate::pipeline::{CaptureOutcome, FrameOutcome, PipelineStats, ScanPipeline};
use crate::sink::{self, RecordSink, SinkDestination};
use crate::source::FrameSource;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Destination(#[from] sink::ConfigError),
    #[error("destination already set to {0}")]
    AlreadyConfigured(SinkDestination),
    #[error("no destination configured, captures are disabled")]
    NoDestination,
}

/// Owns the pipeline and the destination and drives both from the frame
/// ticker and operator commands.
///
/// Everything runs on one task. A capture is awaited inside the loop, so the
/// next frame is only polled once it has finished.
pub struct SessionController {
    pipeline: ScanPipeline,
    sink: Arc<dyn RecordSink>,
    destination: Option<SinkDestination>,
    display: Display,
    poll_interval: Duration,
}

impl SessionController {
    pub fn new(
        pipeline: ScanPipeline,
        sink: Arc<dyn RecordSink>,
        display: Display,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            sink,
            destination: None,
            display,
            poll_interval,
        }
    }

    #[cfg(test)]
    pub fn pipeline(&self) -> &ScanPipeline {
        &self.pipeline
    }

    pub fn destination(&self) -> Option<&SinkDestination> {
        self.destination.as_ref()
    }

    /// Derive and fix the destination. Fails without side effects on a bad
    /// URL or if a destination is already set.
    pub fn submit_destination(&mut self, url: &str) -> Result<&SinkDestination, SessionError> {
        if let Some(existing) = &self.destination {
            return Err(SessionError::AlreadyConfigured(existing.clone()));
        }
        let destination = sink::configure(url)?;
        info!(destination = %destination, "destination configured");
        Ok(self.destination.insert(destination))
    }

    /// Read operator lines until one yields a destination. `None` if input closes first.
    pub async fn prompt_destination(
        &mut self,
        lines: &mut mpsc::Receiver<String>,
    ) -> Option<SinkDestination> {
        loop {
            crate::console::prompt_url();
            let line = lines.recv().await?;
            match self.submit_destination(&line) {
                Ok(dest) => return Some(dest.clone()),
                Err(e) => {
                    warn!(error = %e, "rejected destination URL");
                    println!("{e}");
                }
            }
        }
    }

    /// Use `preset` if it yields a destination, else prompt the operator.
    /// An unusable preset is reported and then ignored.
    pub async fn establish_destination(
        &mut self,
        preset: Option<&str>,
        lines: &mut mpsc::Receiver<String>,
    ) -> Option<SinkDestination> {
        if let Some(url) = preset {
            match self.submit_destination(url) {
                Ok(dest) => return Some(dest.clone()),
                Err(e) => {
                    warn!(error = %e, "configured sheets.url rejected, asking the operator");
                    println!("Configured sheet URL is not usable: {e}");
                }
            }
        }
        self.prompt_destination(lines).await
    }

    /// Begin scanning. Refused until a destination is set.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.destination.is_none() {
            return Err(SessionError::NoDestination);
        }
        self.pipeline.start();
        Ok(())
    }

    /// One polling cycle: fetch, evaluate, refresh the preview.
    /// A device error skips the cycle.
    pub async fn tick(&mut self, source: &mut dyn FrameSource) -> Option<FrameOutcome> {
        let frame = match source.poll().await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, source = source.name(), "frame cycle skipped");
                return None;
            }
        };
        let outcome = self.pipeline.on_frame(frame);
        if let FrameOutcome::Pending {
            payload,
            changed: true,
        } = &outcome
        {
            println!("Detected: {payload}  (press enter to capture)");
        }
        if let Some(display) = self.pipeline.display() {
            if let Err(e) = self.display.refresh(display) {
                debug!(error = %e, "preview not refreshed");
            }
        }
        Some(outcome)
    }

    pub async fn capture(&mut self) -> Result<CaptureOutcome, SessionError> {
        let Some(destination) = self.destination.clone() else {
            warn!("capture refused: no destination configured");
            return Err(SessionError::NoDestination);
        };
        let outcome = self
            .pipeline
            .on_capture_requested(self.sink.as_ref(), &destination)
            .await;
        match &outcome {
            CaptureOutcome::Appended { payload, ack } => {
                debug!(range = ?ack.updated_range, "sink acknowledged row");
                self.display.show_capture(payload, true)
            }
            CaptureOutcome::SinkFailed { payload, .. } => self.display.show_capture(payload, false),
            CaptureOutcome::Rejected { payload, error } => {
                println!("Scanned data does not have the correct number of fields ({error}): {payload}")
            }
            CaptureOutcome::NothingPending => println!("No QR code detected to capture."),
        }
        Ok(outcome)
    }

    /// Returns `false` when the command ends the session.
    pub async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Capture => {
                if let Err(e) = self.capture().await {
                    println!("{e}");
                }
                true
            }
            Command::Reset => {
                self.pipeline.reset();
                true
            }
            Command::Quit => false,
            Command::Unknown(text) => {
                warn!(command = %text, "unknown operator command");
                true
            }
        }
    }

    /// Drive the session until the operator quits, input closes or `shutdown`
    /// resolves. The source is closed on every one of those paths.
    pub async fn run<F>(
        mut self,
        mut source: Box<dyn FrameSource>,
        commands: &mut mpsc::Receiver<String>,
        shutdown: F,
    ) -> PipelineStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.poll_interval);
        // Late ticks are dropped rather than bunched: only the newest frame matters.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(source.as_mut()).await;
                }
                line = commands.recv() => {
                    let Some(line) = line else {
                        info!("operator input closed");
                        break;
                    };
                    if !self.handle_command(Command::parse(&line)).await {
                        info!("operator quit");
                        break;
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        source.close();
        self.pipeline.stop();
        let stats = self.pipeline.stats();
        info!(
            frames = stats.frames,
            frames_with_codes = stats.frames_with_codes,
            captures = stats.captures,
            rejected = stats.rejected,
            sink_failures = stats.sink_failures,
            "session ended"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{frame, PayloadDecoder, RecordingSink};
    use crate::pipeline::PipelineState;
    use crate::sink::SinkError;
    use crate::source::DeviceError;
    use async_trait::async_trait;
    use attendance_common::frame::Frame;
    use attendance_common::record::{ParseError, RecordParser};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    const URL: &str = "https://docs.google.com/spreadsheets/d/1AbCdEf/edit#gid=0";
    const VALID: &str = "Alice, 1001, 2024-01-01T09:00, CS101, Morning";

    /// Plays back queued frames, then repeats the last one forever.
    struct ScriptedSource {
        frames: VecDeque<Result<Frame, DeviceError>>,
        last: Option<Frame>,
        open: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Result<Frame, DeviceError>>) -> (Self, Arc<AtomicBool>) {
            let open = Arc::new(AtomicBool::new(true));
            (
                Self {
                    frames: frames.into(),
                    last: None,
                    open: Arc::clone(&open),
                },
                open,
            )
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn poll(&mut self) -> Result<Frame, DeviceError> {
            if !self.is_open() {
                return Err(DeviceError::Closed);
            }
            match self.frames.pop_front() {
                Some(Ok(f)) => {
                    self.last = Some(f.clone());
                    Ok(f)
                }
                Some(Err(e)) => Err(e),
                None => self.last.clone().ok_or(DeviceError::Read("no frames".into())),
            }
        }

        fn close(&mut self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    fn controller(sink: Arc<RecordingSink>) -> SessionController {
        let pipeline = ScanPipeline::new(Box::new(PayloadDecoder), RecordParser::default(), 1);
        SessionController::new(pipeline, sink, Display::disabled(), Duration::from_millis(5))
    }

    #[test]
    fn invalid_url_leaves_destination_unset() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        let err = session.submit_destination("https://example.com/nothing").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Destination(sink::ConfigError::InvalidDestination(_))
        ));
        assert!(session.destination().is_none());
        assert!(matches!(session.start(), Err(SessionError::NoDestination)));
        assert_eq!(session.pipeline().state(), PipelineState::Idle);
    }

    #[test]
    fn destination_is_immutable_once_set() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        session.submit_destination(URL).unwrap();
        let err = session
            .submit_destination("https://docs.google.com/spreadsheets/d/other/edit")
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyConfigured(_)));
        assert_eq!(session.destination().unwrap().id(), "1AbCdEf");
    }

    #[tokio::test]
    async fn capture_refused_without_destination() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        assert!(matches!(session.capture().await, Err(SessionError::NoDestination)));
    }

    #[tokio::test]
    async fn prompt_retries_until_valid_url() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        let (tx, mut rx) = mpsc::channel(4);
        tx.send("not a sheet".to_string()).await.unwrap();
        tx.send(URL.to_string()).await.unwrap();
        let dest = session.prompt_destination(&mut rx).await.unwrap();
        assert_eq!(dest.id(), "1AbCdEf");
    }

    #[tokio::test]
    async fn prompt_gives_up_when_input_closes() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        let (tx, mut rx) = mpsc::channel::<String>(1);
        drop(tx);
        assert!(session.prompt_destination(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn valid_preset_skips_prompt() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let dest = session.establish_destination(Some(URL), &mut rx).await.unwrap();
        assert_eq!(dest.id(), "1AbCdEf");
    }

    #[tokio::test]
    async fn invalid_preset_falls_back_to_prompt() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        let (tx, mut rx) = mpsc::channel(2);
        tx.send(URL.to_string()).await.unwrap();
        let dest = session
            .establish_destination(Some("https://example.com/no-id"), &mut rx)
            .await
            .unwrap();
        assert_eq!(dest.id(), "1AbCdEf");
    }

    #[tokio::test]
    async fn unreachable_camera_keeps_session_alive() {
        use crate::source::HttpCamera;
        use attendance_common::config::CameraConfig;

        let mut session = controller(Arc::new(RecordingSink::ok()));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let camera = HttpCamera::connect(&CameraConfig {
            url: "http://127.0.0.1:9/frame".into(),
            poll_interval_ms: 5,
            connect_timeout_secs: 1,
        })
        .unwrap();
        assert!(camera.probe().await.is_err());

        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let stats = session
            .run(
                Box::new(camera),
                &mut rx,
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await;
        assert_eq!(stats.frames, 0);
    }

    #[tokio::test]
    async fn end_to_end_capture() {
        let sink = Arc::new(RecordingSink::ok());
        let mut session = controller(Arc::clone(&sink));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let (mut source, _) = ScriptedSource::new(vec![Ok(frame(0, VALID))]);
        let outcome = session.tick(&mut source).await.unwrap();
        assert!(matches!(outcome, FrameOutcome::Pending { .. }));
        assert_eq!(session.pipeline().pending(), Some(VALID));

        let outcome = session.capture().await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Appended { .. }));
        assert!(session.pipeline().pending().is_none());
        assert_eq!(session.pipeline().log(), &[VALID.to_string()]);

        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "1AbCdEf");
        assert_eq!(
            calls[0].1,
            vec!["Alice", "1001", "2024-01-01T09:00", "CS101", "Morning"]
        );
    }

    #[tokio::test]
    async fn end_to_end_malformed_then_valid() {
        let sink = Arc::new(RecordingSink::ok());
        let mut session = controller(Arc::clone(&sink));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let (mut source, _) =
            ScriptedSource::new(vec![Ok(frame(0, "Alice, 1001")), Ok(frame(1, VALID))]);

        session.tick(&mut source).await;
        let outcome = session.capture().await.unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::Rejected {
                payload: "Alice, 1001".into(),
                error: ParseError::ArityMismatch { expected: 5, got: 2 },
            }
        );
        assert!(sink.calls().is_empty());
        assert_eq!(session.pipeline().pending(), Some("Alice, 1001"));

        session.tick(&mut source).await;
        assert!(matches!(
            session.capture().await.unwrap(),
            CaptureOutcome::Appended { .. }
        ));
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn sink_failure_reported_and_scanning_continues() {
        let sink = Arc::new(RecordingSink::failing(SinkError::AuthFailure("401".into())));
        let mut session = controller(Arc::clone(&sink));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let (mut source, _) = ScriptedSource::new(vec![Ok(frame(0, VALID)), Ok(frame(1, ""))]);
        session.tick(&mut source).await;
        let outcome = session.capture().await.unwrap();
        assert!(matches!(
            outcome,
            CaptureOutcome::SinkFailed {
                error: SinkError::AuthFailure(_),
                ..
            }
        ));
        assert!(session.pipeline().pending().is_none());
        assert_eq!(session.pipeline().state(), PipelineState::Scanning);

        assert_eq!(
            session.tick(&mut source).await,
            Some(FrameOutcome::NoDetection)
        );
    }

    #[tokio::test]
    async fn device_error_skips_cycle() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let (mut source, _) = ScriptedSource::new(vec![
            Err(DeviceError::Status(503)),
            Ok(frame(1, VALID)),
        ]);
        assert!(session.tick(&mut source).await.is_none());
        assert_eq!(session.pipeline().state(), PipelineState::Scanning);
        assert!(session.tick(&mut source).await.is_some());
        assert_eq!(session.pipeline().state(), PipelineState::Detected);
    }

    #[tokio::test]
    async fn reset_command_clears_pending() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();
        let (mut source, _) = ScriptedSource::new(vec![Ok(frame(0, VALID))]);
        session.tick(&mut source).await;

        assert!(session.handle_command(Command::Reset).await);
        assert!(session.pipeline().pending().is_none());
        assert!(session.handle_command(Command::Unknown("x".into())).await);
        assert!(!session.handle_command(Command::Quit).await);
    }

    #[tokio::test]
    async fn run_closes_source_on_quit() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let (source, open) = ScriptedSource::new(vec![Ok(frame(0, ""))]);
        let (tx, mut rx) = mpsc::channel(4);
        tx.send("q".to_string()).await.unwrap();

        session
            .run(Box::new(source), &mut rx, std::future::pending())
            .await;
        assert!(!open.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_closes_source_when_input_ends() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let (source, open) = ScriptedSource::new(vec![Ok(frame(0, VALID))]);
        let (tx, mut rx) = mpsc::channel::<String>(1);
        drop(tx);

        session
            .run(Box::new(source), &mut rx, std::future::pending())
            .await;
        assert!(!open.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_closes_source_on_shutdown_signal() {
        let mut session = controller(Arc::new(RecordingSink::ok()));
        session.submit_destination(URL).unwrap();
        session.start().unwrap();

        let (source, open) = ScriptedSource::new(vec![Ok(frame(0, VALID))]);
        let (_tx, mut rx) = mpsc::channel::<String>(1);

        let stats = session
            .run(
                Box::new(source),
                &mut rx,
                tokio::time::sleep(Duration::from_millis(30)),
            )
            .await;
        assert!(!open.load(Ordering::SeqCst));
        assert!(stats.frames >= 1);
        assert_eq!(stats.captures, 0);
    }
}
