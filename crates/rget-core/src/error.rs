//! Error types for rget core

use rget_types::FailureKind;
use std::path::PathBuf;
use thiserror::Error;

/// Statuses worth another attempt
pub const TRANSIENT_STATUS: [u16; 4] = [500, 502, 503, 504];

/// Errors that can occur in rget core
#[derive(Debug, Error)]
pub enum RgetError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Unexpected server response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("SHA-256 mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(
        "Not enough disk space for {}: need {:.1} MiB, available {:.1} MiB",
        .path.display(),
        mib(.required),
        mib(.available)
    )]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid SHA-256 (must be 64 hex chars): {0}")]
    InvalidDigest(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse class of an error, deciding how far it propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or I/O failure of one transfer
    Transfer,
    /// Digest mismatch
    Verification,
    /// Transfer refused before it started
    Precondition,
    /// User cancellation
    Cancelled,
    /// Bad arguments or unreadable inputs, reported before any network activity
    Input,
}

impl ErrorKind {
    /// Process exit status for this class
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Verification => 2,
            ErrorKind::Cancelled => 130,
            ErrorKind::Transfer | ErrorKind::Precondition | ErrorKind::Input => 1,
        }
    }

    /// Whether a batch may skip to the next URL after this failure
    pub fn is_skippable(self) -> bool {
        self.failure_kind().is_some()
    }

    pub fn failure_kind(self) -> Option<FailureKind> {
        match self {
            ErrorKind::Transfer => Some(FailureKind::Transfer),
            ErrorKind::Verification => Some(FailureKind::Verification),
            ErrorKind::Precondition => Some(FailureKind::Precondition),
            ErrorKind::Cancelled | ErrorKind::Input => None,
        }
    }
}

impl RgetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RgetError::ChecksumMismatch { .. } => ErrorKind::Verification,
            RgetError::InsufficientSpace { .. } => ErrorKind::Precondition,
            RgetError::Cancelled => ErrorKind::Cancelled,
            RgetError::InvalidDigest(_) | RgetError::InvalidInput(_) => ErrorKind::Input,
            // A bad line in a URL list fails that entry only
            _ => ErrorKind::Transfer,
        }
    }

    /// Check if this error is retryable.
    ///
    /// `is_connect()` also covers DNS resolution and TLS handshake
    /// failures, so those are retried along with refused connections.
    pub fn is_retryable(&self) -> bool {
        match self {
            RgetError::Network(e) => e.is_connect() || e.is_timeout() || e.is_body(),
            RgetError::Timeout(_) => true,
            RgetError::HttpStatus { status, .. } => TRANSIENT_STATUS.contains(status),
            _ => false,
        }
    }

    /// Short label used in retry warnings
    pub fn reason(&self) -> String {
        match self {
            RgetError::HttpStatus { status, .. } => format!("HTTP {}", status),
            RgetError::Timeout(_) => "timeout".to_string(),
            RgetError::Network(e) if e.is_connect() => "connection failed".to_string(),
            RgetError::Network(e) if e.is_timeout() => "timeout".to_string(),
            RgetError::Network(e) if e.is_body() => "truncated body".to_string(),
            other => other.to_string(),
        }
    }
}

fn mib(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}
