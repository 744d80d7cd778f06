use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sink::SinkDestination;

const BANNER: &str = r"
  ==============================
     Attendance Scanner
  ==============================
";

/// Operator action while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Capture,
    Reset,
    Quit,
    Unknown(String),
}

impl Command {
    /// An empty line counts as pressing the capture button.
    pub fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" | "c" | "capture" => Command::Capture,
            "r" | "reset" => Command::Reset,
            "q" | "quit" | "exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Forward stdin lines to a channel. The channel closes when stdin hits EOF.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
}

/// Read `input` on its own OS thread. A read blocked there never holds up
/// runtime shutdown.
fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "operator input read failed");
                        return;
                    }
                }
            }
            debug!("operator input reached EOF");
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to start operator input thread");
    }
    rx
}

/// Show the banner until `duration` elapses or the operator presses enter.
/// Returns `false` if input closed during the splash.
pub async fn splash(lines: &mut mpsc::Receiver<String>, duration: Duration) -> bool {
    println!("{BANNER}");
    println!("(press enter to continue)");
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        line = lines.recv() => line.is_some(),
    }
}

pub fn prompt_url() {
    println!("Enter Google Sheets URL:");
}

pub fn scanning_help(destination: &SinkDestination) {
    info!(destination = %destination, "scanning; enter = capture, r = reset, q = quit");
    println!("Scanning into sheet {destination}. [enter] capture  [r] reset  [q] quit");
}
