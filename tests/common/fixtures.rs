//! Shared fixtures: images, configs, quota and artifact server

use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use vectorq::{Config, QuotaGate, QuotaSnapshot, Result};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Minimal SVG served as the primary artifact
pub const SVG: &[u8] = b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>";

/// Encode a `width` x `height` PNG with a gradient fill
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 16) as u8, (y * 16) as u8, 128, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Write a PNG input file into `dir`
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, png_bytes(width, height)).unwrap();
    path
}

/// Config pointing at the fake converter and artifact server
pub fn test_config(endpoint: &str, artifacts: &MockServer, output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.transport.endpoint = endpoint.to_string();
    config.transport.connect_timeout = Duration::from_secs(5);
    config.output.output_dir = output_dir.to_path_buf();
    config.output.artifact_endpoint = format!("{}/api/artifacts", artifacts.uri());
    config.batch.inter_job_delay = Duration::ZERO;
    config.chunk.min_bytes = 64;
    config.chunk.max_bytes = 256;
    config.retry.max_attempts = 1;
    config
}

/// Artifact server answering svg and png requests for any token
pub async fn artifact_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/artifacts"))
        .and(query_param("format", "svg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SVG))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/artifacts"))
        .and(query_param("format", "png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(6, 6)))
        .mount(&server)
        .await;
    server
}

/// Quota gate with a fixed limit that records usage reports
pub struct CountingQuota {
    limit: u64,
    used: Mutex<u64>,
    reports: Mutex<Vec<u64>>,
}

impl CountingQuota {
    /// Gate allowing `limit` conversions, none used yet
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: Mutex::new(0),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Usage counts reported so far
    pub fn reports(&self) -> Vec<u64> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuotaGate for CountingQuota {
    async fn get_quota(&self, _account_id: &str) -> Result<QuotaSnapshot> {
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

/// Files in `dir` with the given extension
pub fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    files
}
