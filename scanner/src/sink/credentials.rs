//! Bearer tokens for the sheets API.
//!
//! The session is handed a [`TokenSource`] at construction; nothing here reads
//! process-wide state on its own. Sources:
//!
//! - [`ServiceAccountTokens`]: signs an RS256 assertion with the service
//!   account's private key and exchanges it at the key's `token_uri`. The
//!   access token is cached and refreshed ahead of expiry.
//! - [`StaticToken`]: a pre-minted token, e.g. from `SHEETS_ACCESS_TOKEN`.
//! - [`UnavailableCredentials`]: a key file that failed to load.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::SinkError;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Refresh this long before the token actually expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);
/// Lifetime requested for each signed assertion (the service maximum).
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read key file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse key file: {0}")]
    Parse(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("token endpoint rejected assertion with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<CredentialError> for SinkError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Transport(msg) => SinkError::NetworkFailure(msg),
            other => SinkError::AuthFailure(other.to_string()),
        }
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, CredentialError>;
}

/// A fixed bearer token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, CredentialError> {
        Ok(self.0.clone())
    }
}

/// Stands in when the key file could not be loaded at start-up. Every request
/// fails with the load error.
pub struct UnavailableCredentials(String);

impl UnavailableCredentials {
    pub fn new(reason: &CredentialError) -> Self {
        Self(reason.to_string())
    }
}

#[async_trait]
impl TokenSource for UnavailableCredentials {
    async fn access_token(&self) -> Result<String, CredentialError> {
        Err(CredentialError::InvalidKey(self.0.clone()))
    }
}

/// The fields of a service-account JSON key file that the token flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".into()
}

impl ServiceAccountKey {
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CredentialError::ReadFile(path.display().to_string(), e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CredentialError> {
        serde_json::from_str(content).map_err(|e| CredentialError::Parse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn needs_refresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN >= self.expires_at
    }
}

pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Result<Self, CredentialError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        info!(client_email = key.client_email, "service account credentials loaded");
        Ok(Self {
            key,
            encoding_key,
            http,
            cached: Mutex::new(None),
        })
    }

    /// Signed JWT asserting the service account identity for `now` (Unix seconds).
    pub fn assertion(&self, now: i64) -> Result<String, CredentialError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))
    }

    async fn exchange(&self) -> Result<CachedToken, CredentialError> {
        let assertion = self.assertion(chrono::Utc::now().timestamp())?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CredentialError::Parse(e.to_string()))?;
        debug!(expires_in = token.expires_in, "access token minted");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.access_token.clone());
            }
        }
        let token = self.exchange().await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }
}
