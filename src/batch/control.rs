//! Batch lifecycle control -- run, start, stop, resume and snapshots.

use std::sync::atomic::Ordering;

use super::{BatchOrchestrator, BatchSnapshot};
use crate::error::{Error, Result};
use crate::types::{BatchOptions, BatchStats};
use crate::validation::ConversionJob;

impl BatchOrchestrator {
    /// Replace the batch with `jobs` and run it to completion or stop
    ///
    /// Jobs are renumbered by position. Per-job results arrive as events;
    /// the returned counters describe the batch when the run ended.
    ///
    /// # Errors
    ///
    /// Returns `Error::BatchRunning` if a run is already in progress. Job
    /// failures are not errors; they are recorded in the batch state.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use vectorq::*;
    /// # async fn example(orchestrator: BatchOrchestrator, jobs: Vec<ConversionJob>) -> Result<()> {
    /// let options = BatchOptions {
    ///     account_id: "acct-42".to_string(),
    ///     anti_forgery_token: "csrf".to_string(),
    ///     secondary_format: Some(RasterFormat::Jpeg),
    /// };
    /// let stats = orchestrator.run(jobs, options).await?;
    /// println!("{} of {} converted", stats.success, stats.total);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, jobs: Vec<ConversionJob>, options: BatchOptions) -> Result<BatchStats> {
        let guard = self.claim()?;
        self.install(jobs).await;
        self.execute(guard, options, 0).await
    }

    /// Spawn [`run`](Self::run) in a background task
    ///
    /// The queue is claimed before this returns, so a `stop()` issued right
    /// after is honored.
    pub fn start(
        &self,
        jobs: Vec<ConversionJob>,
        options: BatchOptions,
    ) -> Result<tokio::task::JoinHandle<Result<BatchStats>>> {
        let guard = self.claim()?;
        let orchestrator = self.clone();
        Ok(tokio::spawn(async move {
            orchestrator.install(jobs).await;
            orchestrator.execute(guard, options, 0).await
        }))
    }

    /// Request a cooperative stop
    ///
    /// The loop stops at its next boundary; the session in flight is closed
    /// and its job fails with `StoppedByCaller`. Jobs not yet started stay
    /// pending. Stopping an idle orchestrator does nothing.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        self.control.stop_requested.store(true, Ordering::SeqCst);
        if let Ok(active) = self.control.active.lock()
            && let Some(token) = active.as_ref()
        {
            token.cancel();
        }
        tracing::info!("Batch stop requested");
    }

    /// Re-run the batch from its first job that has not succeeded
    ///
    /// Failed jobs go back to pending and are retried in order; successful
    /// jobs are skipped. Released payloads are reloaded from their source.
    ///
    /// # Errors
    ///
    /// Returns `Error::BatchRunning` while a run is in progress and
    /// `Error::InvalidState` if no batch has been run yet.
    pub async fn resume(&self) -> Result<BatchStats> {
        let guard = self.claim()?;
        let (options, start) = self.prepare_resume().await?;
        self.execute(guard, options, start).await
    }

    /// Spawn [`resume`](Self::resume) in a background task
    pub async fn start_resume(&self) -> Result<tokio::task::JoinHandle<Result<BatchStats>>> {
        let guard = self.claim()?;
        let (options, start) = self.prepare_resume().await?;
        let orchestrator = self.clone();
        Ok(tokio::spawn(async move {
            orchestrator.execute(guard, options, start).await
        }))
    }

    async fn prepare_resume(&self) -> Result<(BatchOptions, usize)> {
        let options = self
            .control
            .last_options
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::InvalidState("no batch has been run".to_string()))?;

        let mut state = self.state.write().await;
        state.reset_for_resume();
        let start = state.first_unfinished().unwrap_or(state.entries.len());
        tracing::info!(start_index = start, "Resuming batch");
        Ok((options, start))
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst)
    }

    /// Copy of the current statuses, counters, ETA and quota
    pub async fn snapshot(&self) -> BatchSnapshot {
        let running = self.is_running();
        let progress = self.control.active_progress.load(Ordering::SeqCst);
        let active_progress = (running && progress > 0).then_some(progress);
        self.state.read().await.snapshot(running, active_progress)
    }
}
