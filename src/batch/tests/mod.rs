//! Batch orchestrator tests against scripted collaborators.


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use super::*;
use crate::error::FailureReason;
use crate::test_helpers::{
    Behavior, FakeFetcher, FixedQuota, MemoryStorage, Script, ScriptedConnector, png_bytes,
};
use crate::types::{BatchOptions, Event, JobId, JobOptions, JobStatus};
use crate::validation::ConversionJob;

fn test_config() -> Config {
    let mut config = Config::default();
    config.transport.endpoint = "ws://converter.test/ws".to_string();
    config.output.output_dir = "out".into();
    config.batch.inter_job_delay = Duration::ZERO;
    config.chunk.min_bytes = 1024;
    config.chunk.max_bytes = 1024;
    config
}

fn orchestrator_with(
    config: Config,
    connector: &Arc<ScriptedConnector>,
    quota: &Arc<FixedQuota>,
    storage: &Arc<MemoryStorage>,
    fetcher: FakeFetcher,
) -> (BatchOrchestrator, Arc<FakeFetcher>) {
    let fetcher = Arc::new(fetcher);
    let orchestrator = BatchOrchestrator::new(config, quota.clone(), storage.clone())
        .unwrap()
        .with_connector(connector.clone())
        .with_fetcher(fetcher.clone());
    (orchestrator, fetcher)
}

fn orchestrator(
    connector: &Arc<ScriptedConnector>,
    quota: &Arc<FixedQuota>,
    storage: &Arc<MemoryStorage>,
    fetcher: FakeFetcher,
) -> (BatchOrchestrator, Arc<FakeFetcher>) {
    orchestrator_with(test_config(), connector, quota, storage, fetcher)
}

fn svg_fetcher() -> FakeFetcher {
    FakeFetcher::serving(vec![("svg", b"<svg/>".to_vec())])
}

fn options() -> BatchOptions {
    BatchOptions {
        account_id: "acct-1".to_string(),
        anti_forgery_token: "csrf".to_string(),
        secondary_format: None,
    }
}

/// In-memory job with an arbitrary payload of `len` bytes
fn job(name: &str, len: usize) -> ConversionJob {
    ConversionJob::from_bytes(name, vec![7u8; len], 10, 10, JobOptions::default())
}

/// Job backed by a real PNG in storage, so it can be reloaded on resume
fn stored_job(storage: &MemoryStorage, path: &str) -> ConversionJob {
    let png = png_bytes(4, 4);
    storage
        .files
        .lock()
        .unwrap()
        .insert(path.into(), png.clone());
    ConversionJob::from_bytes(path, png, 4, 4, JobOptions::default()).with_source(path)
}

fn successes(n: usize) -> Vec<Behavior> {
    (0..n)
        .map(|i| Behavior::Open(Script::success(&format!("tok-{i}"))))
        .collect()
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn status(snapshot: &BatchSnapshot, index: usize) -> JobStatus {
    snapshot.jobs[index].status
}

fn reason(snapshot: &BatchSnapshot, index: usize) -> Option<FailureReason> {
    snapshot.jobs[index].reason
}
