use async_trait::async_trait;
use attendance_common::config::SheetsConfig;
use attendance_common::record::Record;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::credentials::TokenSource;
use super::{Ack, RecordSink, SinkDestination, SinkError};

/// Appends rows through the spreadsheet `values:append` endpoint.
pub struct SheetsClient {
    http: reqwest::Client,
    api_base: String,
    worksheet: String,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Debug, Serialize)]
struct AppendBody<'a> {
    values: [&'a [String]; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
}

impl SheetsClient {
    pub fn new(config: &SheetsConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SinkError::NetworkFailure(e.to_string()))?;
        Ok(Self::with_client(config, http, tokens))
    }

    pub fn with_client(
        config: &SheetsConfig,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            api_base: config.api_base.clone(),
            worksheet: config.worksheet.clone(),
            tokens,
        }
    }

    /// `{api_base}/spreadsheets/{id}/values/{worksheet}!A1:append?...`, with
    /// every path segment percent-encoded.
    pub fn append_url(&self, destination: &SinkDestination) -> Result<Url, SinkError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| SinkError::DestinationUnavailable(format!("bad api base: {e}")))?;
        let range = format!("{}!A1:append", self.worksheet);
        url.path_segments_mut()
            .map_err(|_| SinkError::DestinationUnavailable("api base cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["spreadsheets", destination.id(), "values", range.as_str()]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }
}

/// Map a non-success HTTP status from the sheets API onto the sink taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> SinkError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SinkError::AuthFailure(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::BAD_REQUEST => {
            SinkError::DestinationUnavailable(detail)
        }
        _ => SinkError::NetworkFailure(detail),
    }
}

#[async_trait]
impl RecordSink for SheetsClient {
    async fn append(
        &self,
        destination: &SinkDestination,
        record: &Record,
    ) -> Result<Ack, SinkError> {
        let url = self.append_url(destination)?;
        let token = self.tokens.access_token().await?;

        debug!(destination = %destination, fields = record.len(), "appending row");
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&AppendBody {
                values: [record.fields()],
            })
            .send()
            .await
            .map_err(|e| SinkError::NetworkFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        // A 2xx means the row landed even if the body is not what we expect.
        let updated_range = resp
            .json::<AppendResponse>()
            .await
            .ok()
            .and_then(|r| r.updates)
            .and_then(|u| u.updated_range);
        info!(destination = %destination, range = ?updated_range, "row appended");
        Ok(Ack { updated_range })
    }

    fn name(&self) -> &str {
        "sheets"
    }
}
