//! # vectorq
//!
//! Image-to-vector conversion client with a sequential, quota-aware batch queue.
//!
//! ## Overview
//!
//! - A [`ProtocolClient`] drives one image through a remote conversion
//!   session over a streaming connection: negotiate, upload in chunks, wait
//!   for milestones, collect the result token.
//! - A [`Materializer`] turns the token into files: the vector artifact and,
//!   optionally, a raster converted locally from the remote baseline.
//! - A [`BatchOrchestrator`] runs many jobs one after another, checks the
//!   quota before each, stops on batch-fatal failures and resumes from the
//!   first job that did not succeed.
//!
//! Storage, quota accounting and the transport are traits, so the embedding
//! application decides where bytes live and who pays for them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use vectorq::{BatchOptions, BatchOrchestrator, Config, FsStorage, JobOptions, UnlimitedQuota};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = BatchOrchestrator::new(
//!         Config::default(),
//!         Arc::new(UnlimitedQuota),
//!         Arc::new(FsStorage),
//!     )?;
//!
//!     // Reject empty, oversized and corrupt files up front
//!     let sources = vec![PathBuf::from("logo.png"), PathBuf::from("photo.jpg")];
//!     let (jobs, rejected) = orchestrator
//!         .preparer()
//!         .prepare_all(&sources, &JobOptions::default())
//!         .await;
//!     for (path, error) in rejected {
//!         eprintln!("skipping {}: {}", path.display(), error);
//!     }
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let options = BatchOptions {
//!         account_id: "acct-42".to_string(),
//!         anti_forgery_token: "token".to_string(),
//!         secondary_format: None,
//!     };
//!     let stats = orchestrator.run(jobs, options).await?;
//!     println!("{} converted, {} failed", stats.success, stats.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch queue orchestration (decomposed into focused submodules)
pub mod batch;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Artifact download and local raster conversion
pub mod materializer;
/// Conversion protocol client
pub mod protocol;
/// Quota gate interface
pub mod quota;
/// Retry logic with exponential backoff
pub mod retry;
/// Storage sink interface and filesystem implementation
pub mod storage;
/// Streaming transport interface and WebSocket implementation
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Input validation and job preparation
pub mod validation;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use batch::{BatchOrchestrator, BatchSnapshot, JobEntry};
pub use config::{
    BatchConfig, ChunkConfig, Config, OutputConfig, RetryConfig, TransportConfig, ValidationConfig,
};
pub use error::{
    Error, FailureReason, MaterializeError, QuotaError, Result, SessionError, ValidationError,
};
pub use materializer::{ArtifactFetcher, ArtifactRequest, HttpArtifactFetcher, Materializer};
pub use protocol::{
    ProtocolClient, SessionOutcome, SessionRequest, choose_chunk_size, chunk_count,
};
pub use quota::{QuotaGate, QuotaSnapshot, UnlimitedQuota};
pub use storage::{FsStorage, StorageSink};
pub use transport::{Connector, Inbound, Transport, WsConnector};
pub use types::{
    BatchOptions, BatchStats, Event, JobId, JobOptions, JobStatus, MaterializedArtifacts,
    OutputFormat, RasterFormat,
};
pub use validation::{ConversionJob, JobPreparer, prepare_image};

/// Stop the orchestrator's active batch when the process is asked to terminate
///
/// Waits for a termination signal, then calls
/// [`BatchOrchestrator::stop`]. The session in flight is closed and its job
/// fails with `StoppedByCaller`, so a later [`resume`](BatchOrchestrator::resume)
/// picks it up again.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vectorq::{BatchOrchestrator, Config, FsStorage, UnlimitedQuota, stop_on_signal};
///
/// # async fn example() -> vectorq::Result<()> {
/// let orchestrator = BatchOrchestrator::new(
///     Config::default(),
///     Arc::new(UnlimitedQuota),
///     Arc::new(FsStorage),
/// )?;
/// tokio::spawn(stop_on_signal(orchestrator.clone()));
/// # Ok(())
/// # }
/// ```
pub async fn stop_on_signal(orchestrator: BatchOrchestrator) {
    wait_for_signal().await;
    if orchestrator.is_running() {
        tracing::info!("Stopping batch after termination signal");
        orchestrator.stop();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    }
}
