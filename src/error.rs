//! Error types for vectorq
//!
//! This module provides the error handling for the library:
//! - A top-level [`Error`] with `#[from]` conversions for the underlying crates
//! - Domain-specific error types (session, materialization, validation, quota)
//! - [`FailureReason`], the job-level failure taxonomy surfaced in batch state

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for vectorq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vectorq
///
/// Each variant includes enough context to explain the failure without
/// reaching back into the batch state.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk.min_bytes")
        key: Option<String>,
    },

    /// Conversion session failed
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Artifact materialization failed
    #[error("materialization error: {0}")]
    Materialize(#[from] MaterializeError),

    /// Input rejected before entering the batch
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Quota service failure or exhaustion
    #[error("quota error: {0}")]
    Quota(#[from] QuotaError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Artifact service asked the client to back off (HTTP 429 or 503)
    #[error("artifact service busy (HTTP {status})")]
    ServiceBusy {
        /// Response status code
        status: u16,
        /// Pause requested through `Retry-After`, if given in seconds
        retry_after: Option<Duration>,
    },

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Raster decode/encode error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A batch is already running on this orchestrator
    #[error("a batch is already running")]
    BatchRunning,

    /// Operation not valid in the current batch state
    #[error("invalid batch state: {0}")]
    InvalidState(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Protocol session failures
///
/// These are the terminal `Failed` sub-reasons of a conversion session. They
/// are per-job: the batch continues with the next job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The transport did not open within the connect timeout, or refused
    #[error("connection timed out or failed: {0}")]
    ConnectionTimeout(String),

    /// The remote service reported an unrecoverable error
    #[error("remote error: {0}")]
    RemoteError(String),

    /// The transport closed before a terminal message arrived
    #[error("transport closed unexpectedly")]
    TransportClosedUnexpectedly,

    /// The session was cancelled by the orchestrator
    #[error("stopped by caller")]
    StoppedByCaller,
}

/// Artifact fetch and conversion failures
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The remote artifact endpoint rejected or failed the request
    #[error("fetch of {format} artifact failed: {reason}")]
    FetchFailed {
        /// The requested artifact format (e.g., "svg", "png")
        format: String,
        /// The error string returned by the fetch
        reason: String,
    },

    /// Writing to, reading from, or deleting in the storage sink failed
    #[error("storage operation on {path} failed: {reason}")]
    Storage {
        /// The path the storage sink was operating on
        path: PathBuf,
        /// The underlying failure
        reason: String,
    },

    /// Local raster conversion failed
    #[error("conversion to {format} failed: {reason}")]
    ConversionFailed {
        /// The target raster format
        format: String,
        /// The reason conversion failed
        reason: String,
    },
}

/// Input rejected before entering the queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// File is empty
    #[error("{name} is empty")]
    Empty {
        /// Original filename
        name: String,
    },

    /// File exceeds the configured maximum size
    #[error("{name} is {size} bytes, maximum is {max}")]
    Oversized {
        /// Original filename
        name: String,
        /// Actual size in bytes
        size: u64,
        /// Configured maximum in bytes
        max: u64,
    },

    /// File could not be decoded as an image
    #[error("{name} is not a readable image: {reason}")]
    Corrupt {
        /// Original filename
        name: String,
        /// Decoder message
        reason: String,
    },
}

/// Quota gate failures
#[derive(Debug, Error)]
pub enum QuotaError {
    /// The account has used its whole allowance
    #[error("quota exceeded: {used} of {limit} used")]
    Exceeded {
        /// Units consumed so far
        used: u64,
        /// Account limit
        limit: u64,
    },

    /// The quota service could not be reached or answered with an error
    #[error("quota service unavailable: {0}")]
    Unavailable(String),
}

/// Job-level failure classification recorded in the batch state
///
/// Every failed job carries one of these plus a human-readable message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Transport could not be opened in time
    ConnectionTimeout,
    /// Remote service reported an unrecoverable error
    RemoteError,
    /// Transport closed before completion without a stop request
    TransportClosedUnexpectedly,
    /// Session closed because the batch was stopped
    StoppedByCaller,
    /// The account had no remaining quota
    QuotaExceeded,
    /// Downloading or converting artifacts failed
    MaterializationFailure,
    /// Input could not be (re)loaded or validated
    ValidationFailure,
}

impl From<&SessionError> for FailureReason {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::ConnectionTimeout(_) => FailureReason::ConnectionTimeout,
            SessionError::RemoteError(_) => FailureReason::RemoteError,
            SessionError::TransportClosedUnexpectedly => {
                FailureReason::TransportClosedUnexpectedly
            }
            SessionError::StoppedByCaller => FailureReason::StoppedByCaller,
        }
    }
}

impl Error {
    /// Classify this error into the job-level failure taxonomy
    ///
    /// Input-side errors (unreadable or undecodable source, missing payload)
    /// are validation failures; HTTP and artifact errors are materialization
    /// failures.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Error::Session(e) => FailureReason::from(e),
            Error::Quota(_) => FailureReason::QuotaExceeded,
            Error::Validation(_) | Error::Io(_) | Error::Image(_) | Error::InvalidState(_) => {
                FailureReason::ValidationFailure
            }
            _ => FailureReason::MaterializationFailure,
        }
    }
}
