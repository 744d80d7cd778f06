mod console;
mod decoder;
mod display;
mod pipeline;
mod session;
mod sink;
mod source;

use attendance_common::config::{Config, SheetsConfig};
use attendance_common::record::RecordParser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::decoder::QrDecoder;
use crate::display::Display;
use crate::pipeline::ScanPipeline;
use crate::session::SessionController;
use crate::sink::credentials::{
    ServiceAccountKey, ServiceAccountTokens, StaticToken, TokenSource, UnavailableCredentials,
};
use crate::sink::sheets::SheetsClient;
use crate::source::{FrameSource, HttpCamera};

const ACCESS_TOKEN_ENV: &str = "SHEETS_ACCESS_TOKEN";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        config = %config_path.display(),
        camera = config.camera.url,
        poll_ms = config.camera.poll_interval_ms,
        "starting attendance scanner"
    );

    let tokens = token_source(&config.sheets);
    let sheets = match SheetsClient::new(&config.sheets, tokens) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to build sheets client");
            std::process::exit(1);
        }
    };

    let parser = RecordParser::from_config(&config.scan);
    info!(fields = parser.arity(), stable_frames = config.scan.stable_frames, "record schema");
    let pipeline = ScanPipeline::new(
        Box::new(QrDecoder::new()),
        parser,
        config.scan.stable_frames,
    );
    let mut session = SessionController::new(
        pipeline,
        Arc::new(sheets),
        Display::new(&config.display),
        config.camera.poll_interval(),
    );

    let mut lines = console::spawn_stdin_reader();
    if !console::splash(&mut lines, Duration::from_secs(config.display.splash_secs)).await {
        info!("input closed during splash, exiting");
        return;
    }

    if session
        .establish_destination(config.sheets.url.as_deref(), &mut lines)
        .await
        .is_none()
    {
        info!("input closed before a destination was given, exiting");
        return;
    }

    let camera = match HttpCamera::connect(&config.camera) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build camera client");
            std::process::exit(1);
        }
    };
    if let Err(e) = camera.probe().await {
        warn!(error = %e, url = config.camera.url, "camera could not be opened, retrying every tick");
        println!("Camera could not be opened.");
    }

    if let Err(e) = session.start() {
        error!(error = %e, "cannot start scanning");
        std::process::exit(1);
    }
    if let Some(destination) = session.destination() {
        console::scanning_help(destination);
    }

    let source: Box<dyn FrameSource> = Box::new(camera);
    session.run(source, &mut lines, shutdown_signal()).await;
}

/// Pick the bearer token source: a pre-minted token from the environment, else
/// the service-account key file.
fn token_source(config: &SheetsConfig) -> Arc<dyn TokenSource> {
    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
        if !token.trim().is_empty() {
            info!(env = ACCESS_TOKEN_ENV, "using pre-minted access token");
            return Arc::new(StaticToken::new(token.trim()));
        }
    }

    match service_account(Path::new(&config.credentials_path), config) {
        Ok(tokens) => Arc::new(tokens),
        Err(e) => {
            warn!(
                error = %e,
                path = config.credentials_path,
                "credentials unavailable, captures will fail to append"
            );
            Arc::new(UnavailableCredentials::new(&e))
        }
    }
}

fn service_account(
    path: &Path,
    config: &SheetsConfig,
) -> Result<ServiceAccountTokens, sink::credentials::CredentialError> {
    let key = ServiceAccountKey::load(path)?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| sink::credentials::CredentialError::Transport(e.to_string()))?;
    ServiceAccountTokens::new(key, http)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
