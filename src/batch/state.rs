//! Batch bookkeeping -- job statuses, counters, cursor and ETA.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FailureReason;
use crate::quota::QuotaSnapshot;
use crate::types::{BatchStats, JobId, JobStatus, MaterializedArtifacts};

/// Status of one job as shown to the UI
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    /// Position in the batch
    pub id: JobId,
    /// Original filename
    pub name: String,
    /// Current status
    pub status: JobStatus,
    /// Failure classification, set when `status` is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Human-readable failure cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Written files, set when `status` is `Success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<MaterializedArtifacts>,
    /// Number of runs that started this job
    pub attempts: u32,
}

impl JobEntry {
    fn new(id: JobId, name: String) -> Self {
        Self {
            id,
            name,
            status: JobStatus::Pending,
            reason: None,
            error: None,
            artifacts: None,
            attempts: 0,
        }
    }
}

/// Point-in-time copy of the batch for UI reads
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    /// Every job in batch order
    pub jobs: Vec<JobEntry>,
    /// Counters and ETA
    pub stats: BatchStats,
    /// Highest index the current or last run has started
    pub cursor: usize,
    /// Whether the last run ended through a stop
    pub stopped: bool,
    /// Whether a run is in progress
    pub running: bool,
    /// Session progress of the job in flight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_progress: Option<u8>,
    /// Quota as last seen by the batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaSnapshot>,
}

/// How one job ended
#[derive(Clone, Debug)]
pub(crate) enum JobResult {
    Succeeded(MaterializedArtifacts),
    Failed {
        reason: FailureReason,
        error: String,
    },
}

/// Mutable batch state owned by the orchestrator
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    pub(crate) entries: Vec<JobEntry>,
    pub(crate) stopped: bool,
    pub(crate) cursor: usize,
    pub(crate) success: usize,
    pub(crate) failed: usize,
    /// Start of the current run, for the ETA
    pub(crate) run_started: Option<Instant>,
    /// Jobs that reached a terminal status in the current run
    pub(crate) run_processed: usize,
    pub(crate) quota: Option<QuotaSnapshot>,
}

impl BatchState {
    /// Replace the batch with fresh pending entries
    pub(crate) fn load(&mut self, jobs: impl IntoIterator<Item = (JobId, String)>) {
        *self = Self {
            entries: jobs
                .into_iter()
                .map(|(id, name)| JobEntry::new(id, name))
                .collect(),
            ..Self::default()
        };
    }

    /// Reset run-scoped fields; the quota cache is invalidated
    pub(crate) fn begin_run(&mut self, start: usize) {
        self.stopped = false;
        self.cursor = start;
        self.run_started = Some(Instant::now());
        self.run_processed = 0;
        self.quota = None;
    }

    /// Mark a job as processing and advance the cursor
    pub(crate) fn begin_job(&mut self, index: usize) {
        self.cursor = self.cursor.max(index);
        if let Some(entry) = self.entries.get_mut(index) {
            entry.status = JobStatus::Processing;
            entry.reason = None;
            entry.error = None;
            entry.attempts += 1;
        }
    }

    /// Record a terminal status; returns false if the job was already terminal
    pub(crate) fn finish_job(&mut self, index: usize, result: &JobResult) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.status.is_terminal() {
            tracing::warn!(job_index = index, status = ?entry.status, "Job already finished");
            return false;
        }

        match result {
            JobResult::Succeeded(artifacts) => {
                entry.status = JobStatus::Success;
                entry.artifacts = Some(artifacts.clone());
                self.success += 1;
            }
            JobResult::Failed { reason, error } => {
                entry.status = JobStatus::Failed;
                entry.reason = Some(*reason);
                entry.error = Some(error.clone());
                self.failed += 1;
            }
        }
        self.run_processed += 1;
        true
    }

    /// Counters plus ETA = elapsed / processed-this-run * remaining
    pub(crate) fn stats(&self) -> BatchStats {
        let total = self.entries.len();
        let processed = self.success + self.failed;
        let remaining = total.saturating_sub(processed);

        let average = match (self.run_started, self.run_processed) {
            (Some(started), n) if n > 0 => Some(started.elapsed() / n as u32),
            _ => None,
        };
        let eta = average.map(|avg| avg * remaining as u32);

        BatchStats {
            total,
            processed,
            success: self.success,
            failed: self.failed,
            eta_ms: eta.map(as_millis),
            average_job_ms: average.map(as_millis),
        }
    }

    /// Index of the first job that has not succeeded
    pub(crate) fn first_unfinished(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.status != JobStatus::Success)
    }

    /// Put every non-success job back to pending
    ///
    /// Failure counts are dropped with them, so `processed` only counts
    /// successes until the new run finishes more jobs.
    pub(crate) fn reset_for_resume(&mut self) {
        for entry in &mut self.entries {
            if entry.status != JobStatus::Success {
                entry.status = JobStatus::Pending;
                entry.reason = None;
                entry.error = None;
            }
        }
        self.failed = 0;
        self.stopped = false;
    }

    pub(crate) fn snapshot(&self, running: bool, active_progress: Option<u8>) -> BatchSnapshot {
        BatchSnapshot {
            jobs: self.entries.clone(),
            stats: self.stats(),
            cursor: self.cursor,
            stopped: self.stopped,
            running,
            active_progress,
            quota: self.quota,
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
