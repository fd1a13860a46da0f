//! Shared types for Courier
//!
//! This crate contains the plain data structures used by the session core
//! and the CLI: request descriptors, response metadata, progress values,
//! authentication challenges and the session configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Request Types
// ============================================================================

/// HTTP method of a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// The method token as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether a response to this method can carry a body
    pub fn expects_response_body(&self) -> bool {
        !matches!(self, HttpMethod::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request descriptor. The method and body are supplied at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Overrides the session-wide timeout for this request only
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// Parse `url` and build a request for it
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Coarse classification of an HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusClass {
    pub fn from_code(status: u16) -> Self {
        match status {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Unknown,
        }
    }
}

/// Status codes in [400, 600) are reported as failures unless passthrough is enabled
pub fn is_failure_status(status: u16) -> bool {
    (400..600).contains(&status)
}

/// Response metadata reported by the engine once headers arrive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub status: u16,
    /// Final URL after any redirects the engine followed
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<u64>,
}

impl ResponseMetadata {
    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_code(self.status)
    }

    /// First header value matching `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// One progress tick, passed through exactly as the engine reported it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes transferred since the previous tick
    pub bytes: u64,
    /// Bytes transferred so far
    pub total_bytes: u64,
    /// Total the engine expects to transfer, when known
    pub expected_total: Option<u64>,
}

// ============================================================================
// Authentication Types
// ============================================================================

/// An authentication challenge raised by a server or proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Scheme named by the challenge header, e.g. "Basic" or "Bearer"
    pub scheme: String,
    pub realm: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// True for 407 challenges from a proxy
    pub proxy: bool,
    /// Number of credentials already rejected for this task
    pub previous_failure_count: u32,
}

/// Credential offered in answer to a challenge
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credential {
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// How a challenge should be answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeDisposition {
    UseCredential,
    PerformDefaultHandling,
    CancelAuthenticationChallenge,
    RejectProtectionSpace,
}

/// Answer to a challenge: a disposition and, for `UseCredential`, the credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub disposition: ChallengeDisposition,
    pub credential: Option<Credential>,
}

impl ChallengeResponse {
    pub fn use_credential(credential: Credential) -> Self {
        Self {
            disposition: ChallengeDisposition::UseCredential,
            credential: Some(credential),
        }
    }

    pub fn default_handling() -> Self {
        Self {
            disposition: ChallengeDisposition::PerformDefaultHandling,
            credential: None,
        }
    }

    pub fn cancel() -> Self {
        Self {
            disposition: ChallengeDisposition::CancelAuthenticationChallenge,
            credential: None,
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whole-request timeout in seconds (None = no timeout)
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Maximum redirects the engine follows (0 disables following)
    pub max_redirects: usize,
    /// Deliver 4xx/5xx responses as successes
    pub passthrough: bool,
    /// Promote every task to a download task that streams its body to disk
    pub stream_to_disk: bool,
    /// Directory for temporary download files (None = system temp dir)
    pub temp_dir: Option<PathBuf>,
    pub default_headers: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            connect_timeout_secs: 30,
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
            passthrough: false,
            stream_to_disk: true,
            temp_dir: None,
            default_headers: BTreeMap::new(),
        }
    }
}

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
