//! Shared in-memory fakes for the transport, storage, quota and fetcher seams.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::error::{Error, QuotaError, Result};
use crate::materializer::{ArtifactFetcher, ArtifactRequest};
use crate::quota::{QuotaGate, QuotaSnapshot};
use crate::storage::StorageSink;
use crate::transport::{Connector, Inbound, Transport};

/// A frame written by the client
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Control(Value),
    Binary(Vec<u8>),
}

/// What a scripted transport does once its inbound queue is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exhausted {
    /// Report the connection as closed
    Close,
    /// Never answer again (a stalled remote)
    Hang,
}

/// Inbound messages for one connection
#[derive(Debug, Clone)]
pub(crate) struct Script {
    pub(crate) inbound: VecDeque<Inbound>,
    pub(crate) exhausted: Exhausted,
    /// Fail every write after this many successful ones
    pub(crate) fail_writes_after: Option<usize>,
}

impl Script {
    pub(crate) fn new(inbound: Vec<Inbound>, exhausted: Exhausted) -> Self {
        Self {
            inbound: inbound.into(),
            exhausted,
            fail_writes_after: None,
        }
    }

    /// The full milestone sequence ending in "result ready"
    pub(crate) fn success(token: &str) -> Self {
        Self::new(
            vec![
                control(json!({"command": 5, "body": {}})),
                control(json!({"command": 6, "body": {}})),
                control(json!({"command": 7, "body": {"spec": {"token": token}}})),
                control(json!({"command": 8, "body": {}})),
                control(json!({"command": 9, "body": {}})),
            ],
            Exhausted::Close,
        )
    }

    /// An unrecoverable remote error as the first inbound message
    pub(crate) fn fatal(message: &str) -> Self {
        Self::new(
            vec![control(
                json!({"command": 10, "body": {"unrecoverable": true, "message": message}}),
            )],
            Exhausted::Close,
        )
    }

    /// Remote accepts the upload and then never answers
    pub(crate) fn stall() -> Self {
        Self::new(Vec::new(), Exhausted::Hang)
    }
}

pub(crate) fn control(value: Value) -> Inbound {
    Inbound::Control(value)
}

/// What happens on one connection attempt
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    Open(Script),
    Refuse,
    Hang,
}

/// Everything observed on one opened connection
#[derive(Debug, Default, Clone)]
pub(crate) struct ConnectionLog {
    pub(crate) url: Option<Url>,
    pub(crate) sent: Vec<Sent>,
    pub(crate) closed: bool,
}

impl ConnectionLog {
    pub(crate) fn binary_chunks(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter_map(|s| match s {
                Sent::Binary(b) => Some(b.clone()),
                Sent::Control(_) => None,
            })
            .collect()
    }

    pub(crate) fn commands(&self) -> Vec<u64> {
        self.sent
            .iter()
            .filter_map(|s| match s {
                Sent::Control(v) => v.get("command").and_then(Value::as_u64),
                Sent::Binary(_) => None,
            })
            .collect()
    }
}

/// Connector replaying one [`Behavior`] per connection attempt
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    behaviors: Mutex<VecDeque<Behavior>>,
    attempts: AtomicUsize,
    pub(crate) logs: Arc<Mutex<Vec<ConnectionLog>>>,
}

impl ScriptedConnector {
    pub(crate) fn new(behaviors: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            attempts: AtomicUsize::new(0),
            logs: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn log(&self, connection: usize) -> ConnectionLog {
        self.logs.lock().unwrap()[connection].clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behaviors.lock().unwrap().pop_front();
        match behavior {
            Some(Behavior::Open(script)) => {
                let mut logs = self.logs.lock().unwrap();
                logs.push(ConnectionLog {
                    url: Some(url.clone()),
                    ..Default::default()
                });
                Ok(Box::new(ScriptedTransport {
                    script,
                    writes: 0,
                    index: logs.len() - 1,
                    logs: Arc::clone(&self.logs),
                }))
            }
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Refuse) | None => {
                Err(Error::Other("connection refused".to_string()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedTransport {
    script: Script,
    writes: usize,
    index: usize,
    logs: Arc<Mutex<Vec<ConnectionLog>>>,
}

impl ScriptedTransport {
    fn record(&mut self, sent: Sent) -> Result<()> {
        if let Some(limit) = self.script.fail_writes_after
            && self.writes >= limit
        {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection reset",
            )));
        }
        self.writes += 1;
        self.logs.lock().unwrap()[self.index].sent.push(sent);
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_control(&mut self, message: &Value) -> Result<()> {
        self.record(Sent::Control(message.clone()))
    }

    async fn send_binary(&mut self, chunk: &[u8]) -> Result<()> {
        self.record(Sent::Binary(chunk.to_vec()))
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        match self.script.inbound.pop_front() {
            Some(inbound) => Some(Ok(inbound)),
            None => match self.script.exhausted {
                Exhausted::Close => None,
                Exhausted::Hang => std::future::pending().await,
            },
        }
    }

    async fn close(&mut self) {
        self.logs.lock().unwrap()[self.index].closed = true;
    }
}

/// Storage sink backed by a map
#[derive(Default)]
pub(crate) struct MemoryStorage {
    pub(crate) files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    pub(crate) fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStorage {
    pub(crate) fn with_files(files: Vec<(&str, Vec<u8>)>) -> Arc<Self> {
        let storage = Self::default();
        {
            let mut map = storage.files.lock().unwrap();
            for (path, bytes) in files {
                map.insert(PathBuf::from(path), bytes);
            }
        }
        Arc::new(storage)
    }

    pub(crate) fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub(crate) fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl StorageSink for MemoryStorage {
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only volume",
            )));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.get(path).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let bytes = files.remove(from).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", from.display()),
            ))
        })?;
        files.insert(to.to_path_buf(), bytes);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Quota gate with a fixed limit, counting reported usage
pub(crate) struct FixedQuota {
    pub(crate) limit: u64,
    pub(crate) used: Mutex<u64>,
    pub(crate) reports: Mutex<Vec<u64>>,
    pub(crate) unavailable: bool,
}

impl FixedQuota {
    pub(crate) fn new(limit: u64, used: u64) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: Mutex::new(used),
            reports: Mutex::new(Vec::new()),
            unavailable: false,
        })
    }

    /// A gate whose service cannot be reached
    pub(crate) fn offline() -> Arc<Self> {
        Arc::new(Self {
            limit: 0,
            used: Mutex::new(0),
            reports: Mutex::new(Vec::new()),
            unavailable: true,
        })
    }

    pub(crate) fn reports(&self) -> Vec<u64> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuotaGate for FixedQuota {
    async fn get_quota(&self, _account_id: &str) -> Result<QuotaSnapshot> {
        if self.unavailable {
            return Err(Error::Quota(QuotaError::Unavailable(
                "quota service offline".to_string(),
            )));
        }
        Ok(QuotaSnapshot {
            limit: self.limit,
            used: *self.used.lock().unwrap(),
        })
    }

    async fn report_usage(&self, _account_id: &str, new_count: u64) -> Result<()> {
        *self.used.lock().unwrap() = new_count;
        self.reports.lock().unwrap().push(new_count);
        Ok(())
    }
}

/// Artifact fetcher serving canned bytes per format
#[derive(Default)]
pub(crate) struct FakeFetcher {
    pub(crate) artifacts: HashMap<String, Vec<u8>>,
    pub(crate) failing: Vec<String>,
    pub(crate) requests: Mutex<Vec<ArtifactRequest>>,
}

impl FakeFetcher {
    pub(crate) fn serving(artifacts: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            artifacts: artifacts
                .into_iter()
                .map(|(format, bytes)| (format.to_string(), bytes))
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn failing(mut self, format: &str) -> Self {
        self.failing.push(format.to_string());
        self
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, request: &ArtifactRequest) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.contains(&request.format) {
            return Err(Error::Other(format!("HTTP 500 for {}", request.format)));
        }
        self.artifacts
            .get(&request.format)
            .cloned()
            .ok_or_else(|| Error::Other(format!("no {} artifact", request.format)))
    }
}

/// A small valid PNG of the given size
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
