//! Configuration types for vectorq

use crate::error::{Error, Result};
use crate::types::RasterFormat;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Streaming endpoint and connection settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the streaming conversion endpoint (ws:// or wss://)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Maximum time to wait for the connection to open (default: 15 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Protocol version constant appended to the endpoint query
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Host identifier sent in the session metadata
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout: default_connect_timeout(),
            protocol_version: default_protocol_version(),
            host: default_host(),
        }
    }
}

/// Upload chunk sizing
///
/// The chunk size is picked once per batch from the average input size:
/// `average / target_chunks_per_file`, clamped to `[min_bytes, max_bytes]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Smallest chunk size in bytes (default: 64 KiB)
    #[serde(default = "default_min_chunk")]
    pub min_bytes: usize,

    /// Largest chunk size in bytes (default: 1 MiB)
    #[serde(default = "default_max_chunk")]
    pub max_bytes: usize,

    /// Number of chunks an average file should be split into (default: 16)
    #[serde(default = "default_target_chunks")]
    pub target_chunks_per_file: usize,

    /// Chunk size used when there is nothing to average (default: 256 KiB)
    #[serde(default = "default_chunk")]
    pub default_bytes: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_bytes: default_min_chunk(),
            max_bytes: default_max_chunk(),
            target_chunks_per_file: default_target_chunks(),
            default_bytes: default_chunk(),
        }
    }
}

/// Batch loop behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Pause between jobs before the next payload is loaded (default: 800 ms)
    #[serde(default = "default_inter_job_delay", with = "duration_ms_serde")]
    pub inter_job_delay: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            inter_job_delay: default_inter_job_delay(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Artifact destination and fetch settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory artifacts are written to (default: "./vectorized")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// HTTP endpoint serving finished artifacts
    #[serde(default = "default_artifact_endpoint")]
    pub artifact_endpoint: String,

    /// The single raster format the remote side serves (default: png)
    #[serde(default)]
    pub baseline_raster: RasterFormat,

    /// Timeout for one artifact request (default: 60 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            artifact_endpoint: default_artifact_endpoint(),
            baseline_raster: RasterFormat::default(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

/// Input acceptance limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Largest accepted input file in bytes (default: 50 MiB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Longest side in pixels before an image is downscaled (None = never resize)
    #[serde(default = "default_max_dimension")]
    pub max_dimension: Option<u32>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            max_dimension: default_max_dimension(),
        }
    }
}

/// Retry configuration for artifact fetches
///
/// Only transient HTTP failures are retried. Conversion sessions are never
/// retried; that decision belongs to whoever resumes the batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for [`BatchOrchestrator`](crate::BatchOrchestrator)
///
/// Every field has a default, so `Config::default()` is a working
/// configuration apart from the endpoints.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Streaming endpoint settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Upload chunk sizing
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Batch loop behavior
    #[serde(default)]
    pub batch: BatchConfig,

    /// Artifact destination and fetch settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Input acceptance limits
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Artifact fetch retries
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Check that the configuration is internally consistent
    ///
    /// Returns `Error::Config` naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if url::Url::parse(&self.transport.endpoint).is_err() {
            return Err(config_error(
                "transport.endpoint",
                format!("'{}' is not a valid URL", self.transport.endpoint),
            ));
        }
        if url::Url::parse(&self.output.artifact_endpoint).is_err() {
            return Err(config_error(
                "output.artifact_endpoint",
                format!("'{}' is not a valid URL", self.output.artifact_endpoint),
            ));
        }
        if self.transport.connect_timeout.is_zero() {
            return Err(config_error(
                "transport.connect_timeout",
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.chunk.min_bytes == 0 {
            return Err(config_error(
                "chunk.min_bytes",
                "chunk size must be at least one byte".to_string(),
            ));
        }
        if self.chunk.min_bytes > self.chunk.max_bytes {
            return Err(config_error(
                "chunk.min_bytes",
                format!(
                    "minimum chunk size {} exceeds maximum {}",
                    self.chunk.min_bytes, self.chunk.max_bytes
                ),
            ));
        }
        if self.chunk.target_chunks_per_file == 0 {
            return Err(config_error(
                "chunk.target_chunks_per_file",
                "target chunk count must be greater than zero".to_string(),
            ));
        }
        if self.batch.event_capacity == 0 {
            return Err(config_error(
                "batch.event_capacity",
                "event channel capacity must be greater than zero".to_string(),
            ));
        }
        if self.validation.max_dimension == Some(0) {
            return Err(config_error(
                "validation.max_dimension",
                "maximum dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn config_error(key: &str, message: String) -> Error {
    Error::Config {
        message,
        key: Some(key.to_string()),
    }
}

// Default value functions
fn default_endpoint() -> String {
    "wss://vectorizer.example.com/ws/session".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_protocol_version() -> String {
    "3".to_string()
}

fn default_host() -> String {
    "vectorq".to_string()
}

fn default_min_chunk() -> usize {
    64 * 1024
}

fn default_max_chunk() -> usize {
    1024 * 1024
}

fn default_target_chunks() -> usize {
    16
}

fn default_chunk() -> usize {
    256 * 1024
}

fn default_inter_job_delay() -> Duration {
    Duration::from_millis(800)
}

fn default_event_capacity() -> usize {
    1000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("vectorized")
}

fn default_artifact_endpoint() -> String {
    "https://vectorizer.example.com/api/artifacts".to_string()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_input_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_max_dimension() -> Option<u32> {
    Some(8000)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
