pub mod credentials;
pub mod sheets;

use async_trait::async_trait;
use attendance_common::record::Record;
use std::fmt;

/// Spreadsheet identifier extracted from the operator's URL.
///
/// Only [`configure`] builds one, so holding a `SinkDestination` means the URL
/// matched. It is never changed once the session has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDestination {
    id: String,
}

impl SinkDestination {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for SinkDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid destination URL {0:?}: expected a /d/<id> segment")]
    InvalidDestination(String),
}

const ID_MARKER: &str = "/d/";

/// Extract the identifier following `/d/` in a spreadsheet URL.
///
/// The identifier is the longest run of `[A-Za-z0-9_-]` right after the
/// marker and must be non-empty. The first `/d/` that carries one wins.
pub fn configure(url: &str) -> Result<SinkDestination, ConfigError> {
    let url = url.trim();
    let mut rest = url;
    while let Some(pos) = rest.find(ID_MARKER) {
        let after = &rest[pos + ID_MARKER.len()..];
        let end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(after.len());
        if end > 0 {
            return Ok(SinkDestination {
                id: after[..end].to_string(),
            });
        }
        rest = after;
    }
    Err(ConfigError::InvalidDestination(url.to_string()))
}

/// Acknowledgement from the sink for one appended row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// Range the service reports as written, e.g. `Sheet1!A7:E7`.
    pub updated_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected credentials: {0}")]
    AuthFailure(String),
    #[error("sink unreachable: {0}")]
    NetworkFailure(String),
    #[error("destination unavailable: {0}")]
    DestinationUnavailable(String),
}

/// Row-append interface to the external tabular store.
///
/// One call appends one row with the record's fields in order. There is no
/// retry behind this call; a returned error means the row was not delivered.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(
        &self,
        destination: &SinkDestination,
        record: &Record,
    ) -> Result<Ack, SinkError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
