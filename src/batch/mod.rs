//! Batch queue orchestration split into focused submodules.
//!
//! The `BatchOrchestrator` struct and its methods are organized by concern:
//! - [`state`] - Per-job statuses, counters and ETA
//! - [`runner`] - The sequential run loop and per-job pipeline
//! - [`control`] - Start, stop, resume and snapshots

mod control;
mod runner;
pub mod state;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use state::{BatchSnapshot, JobEntry};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use futures::Stream;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::materializer::{ArtifactFetcher, HttpArtifactFetcher};
use crate::quota::QuotaGate;
use crate::storage::StorageSink;
use crate::transport::{Connector, WsConnector};
use crate::types::{BatchOptions, Event};
use crate::validation::{ConversionJob, JobPreparer};
use state::BatchState;

/// External services the orchestrator talks to
#[derive(Clone)]
pub(crate) struct Collaborators {
    /// Opens one transport per conversion session
    pub(crate) connector: Arc<dyn Connector>,
    /// Asked before each job, told after each success
    pub(crate) quota: Arc<dyn QuotaGate>,
    /// Source reads and artifact writes
    pub(crate) storage: Arc<dyn StorageSink>,
    /// Downloads finished artifacts
    pub(crate) fetcher: Arc<dyn ArtifactFetcher>,
}

/// Flags shared between the run loop and the control surface
#[derive(Clone, Default)]
pub(crate) struct RunControl {
    /// Checked at every loop boundary
    pub(crate) stop_requested: Arc<AtomicBool>,
    /// Set while a run owns the queue
    pub(crate) running: Arc<AtomicBool>,
    /// Cancellation token of the session currently in flight
    pub(crate) active: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    /// Last progress value of the session in flight
    pub(crate) active_progress: Arc<AtomicU8>,
    /// Options of the most recent run, reused on resume
    pub(crate) last_options: Arc<Mutex<Option<BatchOptions>>>,
}

/// Releases the running flag when a run ends, however it ends
pub(crate) struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Sequential, quota-aware conversion queue (cloneable - all fields are Arc-wrapped)
///
/// One job is converted at a time. Progress and results are broadcast as
/// [`Event`]s; the current state can be read with
/// [`snapshot`](BatchOrchestrator::snapshot) at any time.
#[derive(Clone)]
pub struct BatchOrchestrator {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Transport, quota, storage and fetcher
    pub(crate) services: Collaborators,
    /// Statuses and counters, read by snapshots
    pub(crate) state: Arc<RwLock<BatchState>>,
    /// Jobs of the current batch, owning their payloads
    pub(crate) jobs: Arc<Mutex<Vec<ConversionJob>>>,
    /// Stop, running and active-session bookkeeping
    pub(crate) control: RunControl,
}

impl BatchOrchestrator {
    /// Create an orchestrator using the websocket transport and HTTP artifact fetcher
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is inconsistent, or
    /// `Error::Network` if the HTTP client cannot be built.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use vectorq::{BatchOrchestrator, Config, FsStorage, UnlimitedQuota};
    /// # fn example() -> vectorq::Result<()> {
    /// let orchestrator = BatchOrchestrator::new(
    ///     Config::default(),
    ///     Arc::new(UnlimitedQuota),
    ///     Arc::new(FsStorage),
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        config: Config,
        quota: Arc<dyn QuotaGate>,
        storage: Arc<dyn StorageSink>,
    ) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpArtifactFetcher::new(&config.output, config.retry.clone())?;
        let (event_tx, _rx) = broadcast::channel(config.batch.event_capacity);

        tracing::debug!(
            endpoint = %config.transport.endpoint,
            output_dir = %config.output.output_dir.display(),
            "Batch orchestrator created"
        );

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            services: Collaborators {
                connector: Arc::new(WsConnector),
                quota,
                storage,
                fetcher: Arc::new(fetcher),
            },
            state: Arc::new(RwLock::new(BatchState::default())),
            jobs: Arc::new(Mutex::new(Vec::new())),
            control: RunControl::default(),
        })
    }

    /// Replace the transport connector
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.services.connector = connector;
        self
    }

    /// Replace the artifact fetcher
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.services.fetcher = fetcher;
        self
    }

    /// Job preparer reading through this orchestrator's storage sink
    pub fn preparer(&self) -> JobPreparer {
        JobPreparer::new(
            Arc::clone(&self.services.storage),
            self.config.validation.clone(),
        )
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Subscribe to batch events
    ///
    /// Each subscriber receives every event emitted after it subscribed. A
    /// subscriber that falls more than `batch.event_capacity` events behind
    /// observes `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Batch events as a stream, skipping over lag gaps
    pub fn event_stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "Event stream lagged");
                None
            }
        })
    }

    /// Emit an event to all subscribers; dropped if nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
