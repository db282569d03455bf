//! Typed errors for the board sync engine.
//!
//! `SyncError` is the taxonomy every transport failure is mapped onto before it
//! reaches the cache or a caller:
//! - `NotFound` / `Expired`: the board or task is gone; terminal
//! - `ValidationFailed`: bad input or task limit; the user must correct it
//! - `Transient`: network, timeout or 5xx; eligible for the automatic retries
//! - `Rejected` / `Protocol`: other 4xx and malformed payloads; terminal
//! - `Cancelled`: the board view was released while a read was in flight

use kanbin_common::ValidationError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the transport, the cache and the sync controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Board has expired: {0}")]
    Expired(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl SyncError {
    /// Map a non-success HTTP status (and the server's error text) onto the taxonomy.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::NOT_FOUND => Self::NotFound(message),
            StatusCode::GONE => Self::Expired(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::ValidationFailed(message)
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                Self::Transient(message)
            }
            s if s.is_server_error() => Self::Transient(message),
            s => Self::Rejected {
                status: s.as_u16(),
                message,
            },
        }
    }

    /// The board or task is gone for good; polling it again is pointless.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Expired(_))
    }

    /// Whether the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short label for logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Expired(_) => "expired",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Transient(_) => "transient",
            Self::Rejected { .. } => "rejected",
            Self::Protocol(_) => "protocol",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Protocol(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, err.to_string());
        }
        // connect, timeout, body and redirect failures
        Self::Transient(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
