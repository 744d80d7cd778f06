use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// HTTP endpoint returning a single JPEG snapshot per GET.
    pub url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
    /// Spreadsheet URL. When absent the operator is prompted for one.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_worksheet")]
    pub worksheet: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_field_count")]
    pub field_count: usize,
    /// Consecutive identical detections required before a payload becomes pending.
    /// 1 means the first detection wins.
    #[serde(default = "default_stable_frames")]
    pub stable_frames: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub preview_path: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default = "default_splash_secs")]
    pub splash_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            url: None,
            credentials_path: default_credentials_path(),
            api_base: default_api_base(),
            worksheet: default_worksheet(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            field_count: default_field_count(),
            stable_frames: default_stable_frames(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            preview_path: None,
            log_path: None,
            splash_secs: default_splash_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CameraConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.scan.field_count == 0 {
            return Err(ConfigError::Parse("scan.field_count must be at least 1".into()));
        }
        if config.scan.delimiter.is_empty() {
            return Err(ConfigError::Parse("scan.delimiter must not be empty".into()));
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    80
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_credentials_path() -> String {
    "credentials.json".into()
}
fn default_api_base() -> String {
    "https://sheets.googleapis.com/v4".into()
}
fn default_worksheet() -> String {
    "Sheet1".into()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_delimiter() -> String {
    ", ".into()
}
fn default_field_count() -> usize {
    5
}
fn default_stable_frames() -> u32 {
    1
}
fn default_splash_secs() -> u64 {
    3
}
fn default_log_level() -> String {
    "info".into()
}
