//! Error types for grabber
//!
//! This module provides the failure taxonomy of the acquisition engine:
//! - A top-level [`Error`] returned by fallible operations
//! - Collaborator errors ([`SessionError`], [`FetchError`], [`MaterializeError`])
//! - A serializable [`FailureKind`] attached to per-document and per-page results
//!
//! Only [`Error::FatalSession`] aborts a run. Every other failure is attached to the
//! document, asset or task it concerns and aggregated into the run report.

use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for grabber operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for grabber
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.workers")
        key: Option<String>,
    },

    /// The platform refused access (login wall, email gate, permission denied)
    #[error("access gated: {0}")]
    AccessGate(String),

    /// A navigation or render wait did not finish in time
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout {
        /// URL that was being loaded
        url: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// A browser-native download did not finish in time
    #[error("native download {id} did not finish within {timeout:?}")]
    NativeDownloadTimeout {
        /// Download identifier reported by the session
        id: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Network failure that survived the retry budget
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// A signed asset URL expired before it could be used
    #[error("asset for page {page} of document {document} expired")]
    ExpiredAsset {
        /// Document the asset belongs to
        document: String,
        /// 1-based page index
        page: u32,
    },

    /// Some pages of a document are missing from its compiled PDF
    #[error("{document} is missing pages {missing:?}")]
    PartialDownload {
        /// Document name
        document: String,
        /// Missing 1-based page numbers, ascending
        missing: Vec<u32>,
    },

    /// The control-plane session is unusable; the run must stop
    #[error("session lost: {0}")]
    FatalSession(String),

    /// The platform does not offer the affordance a tier needs
    #[error("{tier} affordance absent: {reason}")]
    AffordanceAbsent {
        /// Tier whose affordance was missing
        tier: Tier,
        /// What was looked for
        reason: String,
    },

    /// Non-fatal session error (script failure, malformed response)
    #[error("session error: {0}")]
    Session(SessionError),

    /// Asset fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Writing the output tree failed
    #[error("materialize error: {0}")]
    Materialize(#[from] MaterializeError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reported by a [`Session`](crate::session::Session) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The browsing context is gone (browser crashed, socket closed)
    #[error("session disconnected: {0}")]
    Disconnected(String),

    /// Navigation did not complete within the allotted time
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout {
        /// URL being loaded
        url: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The rendered page is behind an access gate
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A page script failed or returned something unusable
    #[error("script failed: {0}")]
    Script(String),

    /// A native download could not be started
    #[error("native download failed: {0}")]
    Download(String),
}

impl From<SessionError> for Error {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Disconnected(message) => Error::FatalSession(message),
            SessionError::NavigationTimeout { url, timeout } => {
                Error::NavigationTimeout { url, timeout }
            }
            SessionError::AccessDenied(message) => Error::AccessGate(message),
            other => Error::Session(other),
        }
    }
}

/// Errors from fetching a single signed asset
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The server rejected the request's credentials or signature scope
    #[error("permission denied (HTTP {code})")]
    PermissionDenied {
        /// HTTP status code
        code: u16,
    },

    /// The server reports the signed URL as expired
    #[error("signed URL expired")]
    ExpiredSignature,

    /// The asset's deadline passed before the attempt could start
    #[error("asset deadline passed before attempt")]
    DeadlinePassed,

    /// Too many requests
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    /// Server-side failure
    #[error("server error (HTTP {code})")]
    Server {
        /// HTTP status code
        code: u16,
    },

    /// Any other client error status
    #[error("client error (HTTP {code})")]
    Client {
        /// HTTP status code
        code: u16,
    },

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or was reset
    #[error("connection failed: {0}")]
    Connection(String),

    /// Response body could not be written to its destination
    #[error("write failed: {0}")]
    Write(String),
}

impl FetchError {
    /// Classify an HTTP error status together with a snippet of its body
    pub fn from_status(code: u16, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        match code {
            400 | 403 if lower.contains("expired") => FetchError::ExpiredSignature,
            401 | 403 => FetchError::PermissionDenied { code },
            429 => FetchError::RateLimited,
            500..=599 => FetchError::Server { code },
            _ => FetchError::Client { code },
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = error.status() {
            FetchError::from_status(status.as_u16(), "")
        } else {
            FetchError::Connection(error.to_string())
        }
    }
}

/// Errors raised while writing the output tree
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// A computed path is unusable
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// A file already exists and the collision action forbids replacing it
    #[error("file already exists: {path}")]
    FileCollision {
        /// The colliding path
        path: PathBuf,
    },

    /// Nothing to compile for a document
    #[error("no pages available for {document}")]
    NoPages {
        /// Document name
        document: String,
    },

    /// Image decoding or PDF assembly failed
    #[error("PDF encoding failed: {0}")]
    PdfEncoding(String),

    /// The archive could not be read
    #[error("failed to extract {archive}: {reason}")]
    Archive {
        /// Archive path
        archive: PathBuf,
        /// Failure reason
        reason: String,
    },

    /// A blocking worker panicked or was cancelled
    #[error("background task failed: {0}")]
    Join(String),
}

/// Serializable classification of a failure, attached to results and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Access gate or permission denied
    AccessGate,
    /// Navigation or render timeout
    NavigationTimeout,
    /// Retry budget exhausted on transient network errors
    TransientNetwork,
    /// Signed asset expired
    ExpiredAsset,
    /// Some pages failed
    PartialDownload,
    /// Control plane lost
    FatalSession,
    /// Tier affordance not offered
    AffordanceAbsent,
    /// Non-retryable client error
    ClientError,
    /// Malformed data from the platform
    Malformed,
    /// Local filesystem, PDF or archive failure
    Materialize,
    /// Anything else
    Other,
}

impl Error {
    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FatalSession(_))
    }

    /// Machine-readable classification of this error
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::AccessGate(_) => FailureKind::AccessGate,
            Error::NavigationTimeout { .. } | Error::NativeDownloadTimeout { .. } => {
                FailureKind::NavigationTimeout
            }
            Error::TransientNetwork(_) => FailureKind::TransientNetwork,
            Error::ExpiredAsset { .. } => FailureKind::ExpiredAsset,
            Error::PartialDownload { .. } => FailureKind::PartialDownload,
            Error::FatalSession(_) => FailureKind::FatalSession,
            Error::AffordanceAbsent { .. } => FailureKind::AffordanceAbsent,
            Error::Session(_) => FailureKind::Malformed,
            Error::Fetch(e) => e.failure_kind(),
            Error::Materialize(_) | Error::Io(_) => FailureKind::Materialize,
            Error::Network(_) => FailureKind::TransientNetwork,
            Error::Config { .. } | Error::Serialization(_) => FailureKind::Other,
        }
    }
}

impl FetchError {
    /// Machine-readable classification of this fetch failure
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::PermissionDenied { .. } => FailureKind::AccessGate,
            FetchError::ExpiredSignature | FetchError::DeadlinePassed => FailureKind::ExpiredAsset,
            FetchError::RateLimited
            | FetchError::Server { .. }
            | FetchError::Timeout
            | FetchError::Connection(_) => FailureKind::TransientNetwork,
            FetchError::Client { .. } => FailureKind::ClientError,
            FetchError::Write(_) => FailureKind::Materialize,
        }
    }
}
