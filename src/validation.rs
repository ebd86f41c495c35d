//! Job acceptance -- size and corruption checks, dimension sniffing and pre-resize.
//!
//! Files that fail here never enter a batch. Accepted files become
//! [`ConversionJob`]s that remember their source, size and dimensions but
//! not their bytes; the payload is read again right before its session.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat};

use crate::config::ValidationConfig;
use crate::error::{Error, Result, ValidationError};
use crate::storage::StorageSink;
use crate::types::{JobId, JobOptions};

/// One accepted file waiting in a batch
///
/// Jobs built by [`JobPreparer`] hold no payload while queued; the batch
/// loads it from the source right before the job's session and releases it
/// when the job ends. Jobs built with [`from_bytes`](Self::from_bytes) and no
/// source keep their payload until they run, and their memory is the
/// caller's responsibility.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    id: JobId,
    name: String,
    source: Option<PathBuf>,
    payload: Option<Vec<u8>>,
    byte_len: usize,
    width: u32,
    height: u32,
    options: JobOptions,
}

impl ConversionJob {
    /// Accept an already prepared, in-memory payload
    ///
    /// No validation happens here. Use [`prepare_image`] or
    /// [`JobPreparer`] for untrusted input.
    pub fn from_bytes(
        name: impl Into<String>,
        payload: Vec<u8>,
        width: u32,
        height: u32,
        options: JobOptions,
    ) -> Self {
        Self {
            id: JobId(0),
            name: name.into(),
            source: None,
            byte_len: payload.len(),
            payload: Some(payload),
            width,
            height,
            options,
        }
    }

    /// Remember where the payload came from so it can be reloaded
    #[must_use]
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Position in the batch
    pub fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: JobId) {
        self.id = id;
    }

    /// Original filename
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the payload was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Size of the (possibly resized) payload in bytes
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Declared width after any pre-resize
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Declared height after any pre-resize
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Conversion parameters
    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Whether the payload is still held in memory
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Move the payload out, leaving the job without one
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.payload.take()
    }

    /// Drop the payload without handing it anywhere
    pub fn release(&mut self) {
        self.payload = None;
    }
}

/// A validated image ready to become a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    /// Encoded bytes to upload
    pub bytes: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Whether the image was downscaled and re-encoded
    pub resized: bool,
}

/// Validate `bytes` and downscale when the longest side exceeds the limit
///
/// Rejects empty and oversized input before decoding, then performs a full
/// decode so truncated files are caught here rather than remotely. Resized
/// images are re-encoded as PNG.
pub fn prepare_image(
    name: &str,
    bytes: Vec<u8>,
    config: &ValidationConfig,
) -> std::result::Result<PreparedImage, ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::Empty {
            name: name.to_string(),
        });
    }
    let size = bytes.len() as u64;
    if size > config.max_input_bytes {
        return Err(ValidationError::Oversized {
            name: name.to_string(),
            size,
            max: config.max_input_bytes,
        });
    }

    let corrupt = |e: image::ImageError| ValidationError::Corrupt {
        name: name.to_string(),
        reason: e.to_string(),
    };
    let decoded = image::load_from_memory(&bytes).map_err(corrupt)?;
    let (width, height) = decoded.dimensions();

    match config.max_dimension {
        Some(max) if width.max(height) > max => {
            let resized = decoded.resize(max, max, FilterType::Lanczos3);
            let (new_width, new_height) = resized.dimensions();
            let mut out = Cursor::new(Vec::new());
            resized.write_to(&mut out, ImageFormat::Png).map_err(corrupt)?;

            tracing::debug!(
                file = %name,
                from_width = width,
                from_height = height,
                to_width = new_width,
                to_height = new_height,
                "Downscaled oversized image"
            );

            Ok(PreparedImage {
                bytes: out.into_inner(),
                width: new_width,
                height: new_height,
                resized: true,
            })
        }
        _ => Ok(PreparedImage {
            bytes,
            width,
            height,
            resized: false,
        }),
    }
}

/// Reads source files through a [`StorageSink`] and turns them into jobs
#[derive(Clone)]
pub struct JobPreparer {
    storage: Arc<dyn StorageSink>,
    config: ValidationConfig,
}

impl JobPreparer {
    /// Create a preparer reading through `storage`
    pub fn new(storage: Arc<dyn StorageSink>, config: ValidationConfig) -> Self {
        Self { storage, config }
    }

    /// Read and validate one file
    ///
    /// The bytes are dropped once validated; only the size and dimensions
    /// of the (possibly resized) image are kept.
    pub async fn prepare(&self, source: &Path, options: JobOptions) -> Result<ConversionJob> {
        let name = display_name(source);
        let bytes = self.storage.read(source).await?;
        let image = self.decode(name.clone(), bytes).await?;

        Ok(ConversionJob {
            id: JobId(0),
            name,
            source: Some(source.to_path_buf()),
            byte_len: image.bytes.len(),
            payload: None,
            width: image.width,
            height: image.height,
            options,
        })
    }

    /// Prepare many files, splitting them into accepted jobs and rejections
    ///
    /// Accepted jobs are numbered densely in input order. Storage failures
    /// are reported as rejections too.
    pub async fn prepare_all(
        &self,
        sources: &[PathBuf],
        options: &JobOptions,
    ) -> (Vec<ConversionJob>, Vec<(PathBuf, Error)>) {
        let mut accepted = Vec::with_capacity(sources.len());
        let mut rejected = Vec::new();

        for source in sources {
            match self.prepare(source, options.clone()).await {
                Ok(mut job) => {
                    job.set_id(JobId(accepted.len()));
                    accepted.push(job);
                }
                Err(e) => {
                    tracing::warn!(file = %source.display(), error = %e, "Rejected input file");
                    rejected.push((source.clone(), e));
                }
            }
        }

        tracing::info!(
            accepted = accepted.len(),
            rejected = rejected.len(),
            "Prepared conversion jobs"
        );
        (accepted, rejected)
    }

    /// Load the payload from the job's source if it is not held
    pub async fn reload(&self, job: &mut ConversionJob) -> Result<()> {
        if job.has_payload() {
            return Ok(());
        }
        let source = job.source.clone().ok_or_else(|| {
            Error::InvalidState(format!("job {} has no source to reload from", job.id))
        })?;

        let bytes = self.storage.read(&source).await?;
        let image = self.decode(job.name.clone(), bytes).await?;
        job.byte_len = image.bytes.len();
        job.width = image.width;
        job.height = image.height;
        job.payload = Some(image.bytes);
        Ok(())
    }

    async fn decode(&self, name: String, bytes: Vec<u8>) -> Result<PreparedImage> {
        let config = self.config.clone();
        let image = tokio::task::spawn_blocking(move || prepare_image(&name, bytes, &config))
            .await
            .map_err(|e| Error::Other(format!("image decode task failed: {e}")))??;
        Ok(image)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
