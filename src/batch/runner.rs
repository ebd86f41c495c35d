//! Run loop -- walks the batch one job at a time from a resumable cursor.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use super::state::JobResult;
use super::{BatchOrchestrator, RunGuard};
use crate::error::{Error, FailureReason, QuotaError, Result};
use crate::materializer::{MaterializeRequest, Materializer};
use crate::protocol::{ProtocolClient, SessionRequest, choose_chunk_size};
use crate::quota::QuotaSnapshot;
use crate::types::{BatchOptions, BatchStats, Event, JobId, JobStatus};
use crate::validation::{ConversionJob, JobPreparer};

/// What the loop does after a job reached its terminal status
struct JobOutcome {
    result: JobResult,
    /// Stop the whole batch after this job
    halt: bool,
}

impl JobOutcome {
    fn failed(reason: FailureReason, error: impl ToString) -> Self {
        Self {
            result: JobResult::Failed {
                reason,
                error: error.to_string(),
            },
            halt: false,
        }
    }

    fn fatal(reason: FailureReason, error: impl ToString) -> Self {
        Self {
            halt: true,
            ..Self::failed(reason, error)
        }
    }

    /// Job failure classified by the error itself
    fn from_error(err: &Error, halt: bool) -> Self {
        Self {
            halt,
            ..Self::failed(err.failure_reason(), err)
        }
    }
}

/// Per-run collaborators built once the chunk size is known
struct RunContext {
    client: ProtocolClient,
    materializer: Materializer,
    preparer: JobPreparer,
    options: BatchOptions,
}

impl BatchOrchestrator {
    /// Claim the queue for a run; fails if one is already in progress
    ///
    /// Clears any stale stop request so a stop issued after this point is
    /// honored by the run that follows.
    pub(crate) fn claim(&self) -> Result<RunGuard> {
        if self.control.running.swap(true, Ordering::SeqCst) {
            return Err(Error::BatchRunning);
        }
        self.control.stop_requested.store(false, Ordering::SeqCst);
        Ok(RunGuard {
            running: Arc::clone(&self.control.running),
        })
    }

    /// Replace the batch with `jobs`, numbering them by position
    ///
    /// Payloads that can be read again from their source are dropped here,
    /// so only the job in flight holds one.
    pub(crate) async fn install(&self, mut jobs: Vec<ConversionJob>) {
        for (index, job) in jobs.iter_mut().enumerate() {
            job.set_id(JobId(index));
            if job.source().is_some() {
                job.release();
            }
        }
        self.state
            .write()
            .await
            .load(jobs.iter().map(|job| (job.id(), job.name().to_string())));
        *self.jobs.lock().await = jobs;
    }

    /// Run the loop from `start` until every job is terminal or a stop is requested
    pub(crate) async fn execute(
        &self,
        _guard: RunGuard,
        options: BatchOptions,
        start: usize,
    ) -> Result<BatchStats> {
        *self.control.last_options.lock().await = Some(options.clone());

        let sizes: Vec<usize> = self
            .jobs
            .lock()
            .await
            .iter()
            .map(ConversionJob::byte_len)
            .collect();
        let total = sizes.len();
        let chunk_size = choose_chunk_size(&sizes, &self.config.chunk);

        let ctx = RunContext {
            client: ProtocolClient::new(
                Arc::clone(&self.services.connector),
                self.config.transport.clone(),
                chunk_size,
            ),
            materializer: Materializer::new(
                Arc::clone(&self.services.fetcher),
                Arc::clone(&self.services.storage),
                self.config.output.output_dir.clone(),
                self.config.output.baseline_raster,
            ),
            preparer: self.preparer(),
            options,
        };

        self.state.write().await.begin_run(start);
        tracing::info!(total, start_index = start, chunk_size, "Batch started");
        self.emit_event(Event::BatchStarted {
            total,
            start_index: start,
        });

        let mut processed_any = false;
        for index in start..total {
            let status = self.state.read().await.entries.get(index).map(|e| e.status);
            if status == Some(JobStatus::Success) {
                continue;
            }

            if self.stop_requested() {
                return Ok(self.finish_stopped().await);
            }
            if processed_any && !self.config.batch.inter_job_delay.is_zero() {
                tokio::time::sleep(self.config.batch.inter_job_delay).await;
                if self.stop_requested() {
                    return Ok(self.finish_stopped().await);
                }
            }
            processed_any = true;

            let outcome = self.process_job(index, &ctx).await;
            self.record(index, outcome).await;
        }

        if self.stop_requested() {
            return Ok(self.finish_stopped().await);
        }

        let stats = self.state.read().await.stats();
        tracing::info!(
            success = stats.success,
            failed = stats.failed,
            "Batch finished"
        );
        self.emit_event(Event::BatchFinished {
            stats: stats.clone(),
        });
        Ok(stats)
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.control.stop_requested.load(Ordering::SeqCst)
    }

    async fn finish_stopped(&self) -> BatchStats {
        let stats = {
            let mut state = self.state.write().await;
            state.stopped = true;
            state.stats()
        };
        tracing::info!(
            processed = stats.processed,
            total = stats.total,
            "Batch stopped"
        );
        self.emit_event(Event::BatchStopped {
            stats: stats.clone(),
        });
        stats
    }

    /// Quota check, session, materialization and usage report for one job
    async fn process_job(&self, index: usize, ctx: &RunContext) -> JobOutcome {
        let id = JobId(index);

        let quota = match self.check_quota(&ctx.options.account_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => return JobOutcome::from_error(&e, true),
        };

        let request = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(index) else {
                return JobOutcome::fatal(
                    FailureReason::ValidationFailure,
                    format!("job {index} is missing from the queue"),
                );
            };

            self.state.write().await.begin_job(index);
            self.emit_event(Event::JobStarted {
                id,
                name: job.name().to_string(),
            });

            if let Err(e) = ctx.preparer.reload(job).await {
                return JobOutcome::from_error(&e, false);
            }
            let Some(payload) = job.take_payload() else {
                return JobOutcome::failed(
                    FailureReason::ValidationFailure,
                    "payload unavailable",
                );
            };
            SessionRequest {
                id,
                name: job.name().to_string(),
                payload,
                width: job.width(),
                height: job.height(),
                options: job.options().clone(),
            }
        };
        let name = request.name.clone();
        let format = request.options.output_format;

        let cancel = self.register_active();
        let tx = self.event_tx.clone();
        let progress = Arc::clone(&self.control.active_progress);
        let session = ctx
            .client
            .run(request, &cancel, move |percent| {
                progress.store(percent, Ordering::SeqCst);
                tx.send(Event::JobProgress { id, percent }).ok();
            })
            .await;
        self.clear_active();

        let outcome = match session {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(job_index = index, file = %name, error = %e, "Conversion session failed");
                return JobOutcome::from_error(&Error::Session(e), false);
            }
        };

        let artifacts = ctx
            .materializer
            .materialize(&MaterializeRequest {
                id,
                name: &name,
                token: &outcome.token,
                anti_forgery_token: &ctx.options.anti_forgery_token,
                format,
                secondary: ctx.options.secondary_format,
            })
            .await;
        drop(outcome);

        match artifacts {
            Ok(artifacts) => {
                self.record_usage(&ctx.options.account_id, quota).await;
                tracing::info!(job_index = index, file = %name, "Job converted");
                JobOutcome {
                    result: JobResult::Succeeded(artifacts),
                    halt: false,
                }
            }
            Err(e) => {
                tracing::error!(job_index = index, file = %name, error = %e, "Materialization failed, stopping batch");
                JobOutcome::from_error(&Error::Materialize(e), true)
            }
        }
    }

    /// Fresh quota read; an exhausted or unreachable gate refuses the job
    async fn check_quota(&self, account_id: &str) -> Result<QuotaSnapshot> {
        let snapshot = match self.services.quota.get_quota(account_id).await {
            Ok(snapshot) => snapshot,
            Err(Error::Quota(e)) => {
                tracing::error!(account_id, error = %e, "Quota service refused, stopping batch");
                return Err(Error::Quota(e));
            }
            Err(e) => {
                tracing::error!(account_id, error = %e, "Quota service unavailable, stopping batch");
                return Err(Error::Quota(QuotaError::Unavailable(e.to_string())));
            }
        };
        self.state.write().await.quota = Some(snapshot);

        if snapshot.is_exhausted() {
            tracing::warn!(
                account_id,
                used = snapshot.used,
                limit = snapshot.limit,
                "Quota exhausted, stopping batch"
            );
            return Err(Error::Quota(QuotaError::Exceeded {
                used: snapshot.used,
                limit: snapshot.limit,
            }));
        }
        Ok(snapshot)
    }

    /// Report one more unit used and re-sync the cached snapshot
    async fn record_usage(&self, account_id: &str, before: QuotaSnapshot) {
        let after = before.consumed_one();
        let cached = match self.services.quota.report_usage(account_id, after.used).await {
            Ok(()) => Some(after),
            Err(e) => {
                tracing::warn!(account_id, error = %e, "Failed to report quota usage");
                None
            }
        };
        self.state.write().await.quota = cached;
    }

    /// Register a cancellation token for the session about to start
    fn register_active(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut active) = self.control.active.lock() {
            *active = Some(token.clone());
        }
        // A stop that raced the registration still closes this session
        if self.stop_requested() {
            token.cancel();
        }
        token
    }

    fn clear_active(&self) {
        if let Ok(mut active) = self.control.active.lock() {
            *active = None;
        }
        self.control.active_progress.store(0, Ordering::SeqCst);
    }

    /// Store a terminal status, release the payload and broadcast the new counters
    async fn record(&self, index: usize, outcome: JobOutcome) {
        let id = JobId(index);
        if let Some(job) = self.jobs.lock().await.get_mut(index) {
            job.release();
        }
        let stats = {
            let mut state = self.state.write().await;
            state.finish_job(index, &outcome.result);
            state.stats()
        };

        match outcome.result {
            JobResult::Succeeded(artifacts) => {
                self.emit_event(Event::JobSucceeded { id, artifacts });
            }
            JobResult::Failed { reason, error } => {
                self.emit_event(Event::JobFailed { id, reason, error });
            }
        }
        self.emit_event(Event::BatchProgress { stats });

        if outcome.halt {
            self.control.stop_requested.store(true, Ordering::SeqCst);
        }
    }
}
