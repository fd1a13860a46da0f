//! Error types for Courier core

use crate::response::ResponseBody;
use courier_types::ResponseMetadata;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors delivered to a task's completion callback
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No response received")]
    NoResponse,

    #[error("Invalid download destination: {}", .0.display())]
    InvalidDownloadDestination(PathBuf),

    #[error("HTTP error: {}", .response.status)]
    Http {
        response: ResponseMetadata,
        body: ResponseBody,
    },

    #[error("File operation failed: {0}")]
    FileOperation(#[source] std::io::Error),

    #[error("Failed to materialize response body: {0}")]
    BodyMaterialization(#[source] std::io::Error),

    #[error("Session configuration error: {0}")]
    Configuration(String),
}

/// Where an error originated, for branching without inspecting messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The network failed; nothing this layer can recover
    Network,
    /// The server answered with a 4xx/5xx status
    Status,
    /// The engine completed without a response object
    Integrity,
    /// A local disk operation failed
    LocalIo,
    Configuration,
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Transport(_) => ErrorCategory::Network,
            SessionError::Http { .. } => ErrorCategory::Status,
            SessionError::NoResponse => ErrorCategory::Integrity,
            SessionError::InvalidDownloadDestination(_)
            | SessionError::FileOperation(_)
            | SessionError::BodyMaterialization(_) => ErrorCategory::LocalIo,
            SessionError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Status code of an HTTP error
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Http { response, .. } => Some(response.status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(TransportError {
                kind: TransportErrorKind::Cancelled,
                ..
            })
        )
    }
}

/// Kind of transport-level failure reported by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Cancelled,
    TimedOut,
    Connect,
    Redirect,
    /// Reading or storing the response body failed
    Body,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::TimedOut => "timed out",
            TransportErrorKind::Connect => "connection failed",
            TransportErrorKind::Redirect => "redirect failed",
            TransportErrorKind::Body => "body transfer failed",
            TransportErrorKind::Other => "request failed",
        };
        f.write_str(name)
    }
}

/// A transport failure, wrapping whatever the engine reported
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "task was cancelled")
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::TimedOut
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_redirect() {
            TransportErrorKind::Redirect
        } else if error.is_body() || error.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        Self::with_source(kind, error)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::with_source(TransportErrorKind::Body, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_separate_network_status_and_disk() {
        let transport = SessionError::from(TransportError::cancelled());
        assert_eq!(transport.category(), ErrorCategory::Network);
        assert!(transport.is_cancelled());

        let disk = SessionError::FileOperation(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(disk.category(), ErrorCategory::LocalIo);
        assert!(!disk.is_cancelled());

        assert_eq!(SessionError::NoResponse.category(), ErrorCategory::Integrity);
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error = TransportError::from(io);
        assert_eq!(error.kind, TransportErrorKind::Body);
        assert_eq!(error.to_string(), "body transfer failed: disk full");
        assert!(std::error::Error::source(&error).is_some());
    }
}
