//! Core types for vectorq

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::FailureReason;

/// Stable position of a job inside its batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub usize);

impl JobId {
    /// Create a new JobId
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the inner index
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for JobId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl From<JobId> for usize {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status as seen by the batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be processed
    #[default]
    Pending,
    /// Currently converting or materializing
    Processing,
    /// Converted and written
    Success,
    /// Failed with a recorded cause
    Failed,
}

impl JobStatus {
    /// Whether this status ends a run attempt for the job
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// Vector output format requested from the remote service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Scalable Vector Graphics
    #[default]
    Svg,
    /// Portable Document Format
    Pdf,
    /// Encapsulated PostScript
    Eps,
    /// AutoCAD Drawing Exchange Format
    Dxf,
}

impl OutputFormat {
    /// Wire name and file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Eps => "eps",
            OutputFormat::Dxf => "dxf",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raster format for secondary artifacts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    /// PNG (the only format the remote serves)
    #[default]
    Png,
    /// JPEG
    Jpeg,
    /// WebP (lossless)
    Webp,
    /// Windows bitmap
    Bmp,
    /// GIF
    Gif,
    /// TIFF
    Tiff,
}

impl RasterFormat {
    /// Wire name and file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg => "jpg",
            RasterFormat::Webp => "webp",
            RasterFormat::Bmp => "bmp",
            RasterFormat::Gif => "gif",
            RasterFormat::Tiff => "tiff",
        }
    }

    /// Matching encoder in the `image` crate
    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            RasterFormat::Png => image::ImageFormat::Png,
            RasterFormat::Jpeg => image::ImageFormat::Jpeg,
            RasterFormat::Webp => image::ImageFormat::WebP,
            RasterFormat::Bmp => image::ImageFormat::Bmp,
            RasterFormat::Gif => image::ImageFormat::Gif,
            RasterFormat::Tiff => image::ImageFormat::Tiff,
        }
    }
}

impl std::fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job conversion parameters chosen when files are accepted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobOptions {
    /// Target locale sent to the remote service (default: "en-US")
    pub locale: String,
    /// Vector format to fetch
    pub output_format: OutputFormat,
    /// DPI declared in the session metadata (default: 72)
    pub dpi: u32,
    /// Whether the source is CMYK
    pub is_cmyk: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            output_format: OutputFormat::default(),
            dpi: 72,
            is_cmyk: false,
        }
    }
}

/// Per-run parameters supplied by the surrounding application
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Account checked against the quota gate
    pub account_id: String,
    /// Anti-forgery token of the active session, sent with artifact fetches
    pub anti_forgery_token: String,
    /// Optional raster format to produce next to the vector artifact
    #[serde(default)]
    pub secondary_format: Option<RasterFormat>,
}

/// Files written for one successful job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedArtifacts {
    /// Path of the vector artifact
    pub primary: PathBuf,
    /// Path of the converted raster artifact, if one was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<PathBuf>,
}

/// Aggregate counters for a batch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Jobs in the batch
    pub total: usize,
    /// Jobs that reached a terminal status in this run (success + failed)
    pub processed: usize,
    /// Successful jobs
    pub success: usize,
    /// Failed jobs
    pub failed: usize,
    /// Estimated time until the batch completes, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
    /// Rolling average duration of one job, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_job_ms: Option<u64>,
}

/// Event emitted during a batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run (fresh or resumed) has started
    BatchStarted {
        /// Number of jobs in the batch
        total: usize,
        /// First index the run will look at
        start_index: usize,
    },

    /// A job moved to processing
    JobStarted {
        /// Job index
        id: JobId,
        /// Original filename
        name: String,
    },

    /// Session progress for the active job
    JobProgress {
        /// Job index
        id: JobId,
        /// Progress percentage (0 to 100, never decreasing within a session)
        percent: u8,
    },

    /// Job converted and its artifacts written
    JobSucceeded {
        /// Job index
        id: JobId,
        /// Written artifacts
        artifacts: MaterializedArtifacts,
    },

    /// Job failed
    JobFailed {
        /// Job index
        id: JobId,
        /// Failure classification
        reason: FailureReason,
        /// Human-readable cause
        error: String,
    },

    /// Aggregate counters after a job reached a terminal status
    BatchProgress {
        /// Current counters and ETA
        stats: BatchStats,
    },

    /// The run ended because a stop was requested
    BatchStopped {
        /// Counters at the moment of stopping
        stats: BatchStats,
    },

    /// The run processed every job
    BatchFinished {
        /// Final counters
        stats: BatchStats,
    },
}
