//! Artifact materialization -- turns a result token into files on the storage sink.
//!
//! - [`fetcher`] - HTTP implementation of [`ArtifactFetcher`]
//! - [`raster`] - local re-encoding of the baseline raster
//!
//! The primary vector artifact is always fetched. A secondary raster is
//! optional; the remote side only serves one baseline raster format, so any
//! other format is produced locally and the baseline file is removed.
//! Every failure here is fatal for the batch.

pub mod fetcher;
pub mod raster;

pub use fetcher::HttpArtifactFetcher;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MaterializeError, Result};
use crate::storage::StorageSink;
use crate::types::{JobId, MaterializedArtifacts, OutputFormat, RasterFormat};
use crate::utils::{artifact_path, partial_path};

/// One artifact download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactRequest {
    /// Result token from the conversion session
    pub token: String,
    /// Anti-forgery token of the active session
    pub anti_forgery_token: String,
    /// Wire name of the requested format (e.g., "svg", "png")
    pub format: String,
    /// Where the bytes will be written
    pub destination: PathBuf,
}

/// Source of finished artifacts
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download one artifact; any error fails the job
    async fn fetch(&self, request: &ArtifactRequest) -> Result<Vec<u8>>;
}

/// What to materialize for one completed session
#[derive(Clone, Copy, Debug)]
pub struct MaterializeRequest<'a> {
    /// Job index, for logging
    pub id: JobId,
    /// Original filename, used to name the artifacts
    pub name: &'a str,
    /// Result token
    pub token: &'a str,
    /// Anti-forgery token sent with every fetch
    pub anti_forgery_token: &'a str,
    /// Vector format of the primary artifact
    pub format: OutputFormat,
    /// Optional raster format of the secondary artifact
    pub secondary: Option<RasterFormat>,
}

/// Fetches and writes the artifacts of completed sessions
#[derive(Clone)]
pub struct Materializer {
    fetcher: Arc<dyn ArtifactFetcher>,
    storage: Arc<dyn StorageSink>,
    output_dir: PathBuf,
    baseline: RasterFormat,
}

impl Materializer {
    /// Create a materializer writing under `output_dir`
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        storage: Arc<dyn StorageSink>,
        output_dir: impl Into<PathBuf>,
        baseline: RasterFormat,
    ) -> Self {
        Self {
            fetcher,
            storage,
            output_dir: output_dir.into(),
            baseline,
        }
    }

    /// Directory artifacts are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fetch and write the primary artifact and, if requested, the secondary
    ///
    /// On failure nothing written for this request is left behind.
    pub async fn materialize(
        &self,
        request: &MaterializeRequest<'_>,
    ) -> std::result::Result<MaterializedArtifacts, MaterializeError> {
        let primary = self
            .fetch_to(request, request.format.as_str())
            .await?;

        let secondary = match request.secondary {
            None => None,
            Some(target) => match self.secondary(request, target).await {
                Ok(path) => Some(path),
                Err(e) => {
                    self.discard(&primary).await;
                    return Err(e);
                }
            },
        };

        tracing::info!(
            job_index = request.id.0,
            primary = %primary.display(),
            secondary = ?secondary,
            "Artifacts written"
        );
        Ok(MaterializedArtifacts { primary, secondary })
    }

    async fn secondary(
        &self,
        request: &MaterializeRequest<'_>,
        target: RasterFormat,
    ) -> std::result::Result<PathBuf, MaterializeError> {
        let baseline_path = self.fetch_to(request, self.baseline.as_str()).await?;
        if target == self.baseline {
            return Ok(baseline_path);
        }

        let converted = self.convert(&baseline_path, target).await;
        self.discard(&baseline_path).await;
        let bytes = converted?;

        let path = artifact_path(&self.output_dir, request.name, target.as_str());
        self.write(&path, &bytes).await?;
        tracing::debug!(
            job_index = request.id.0,
            from = %self.baseline,
            to = %target,
            "Converted secondary raster"
        );
        Ok(path)
    }

    async fn convert(
        &self,
        baseline_path: &Path,
        target: RasterFormat,
    ) -> std::result::Result<Vec<u8>, MaterializeError> {
        let baseline = self
            .storage
            .read(baseline_path)
            .await
            .map_err(|e| storage_error(baseline_path, e))?;

        let conversion_failed = |reason: String| MaterializeError::ConversionFailed {
            format: target.to_string(),
            reason,
        };
        tokio::task::spawn_blocking(move || raster::convert(&baseline, target))
            .await
            .map_err(|e| conversion_failed(e.to_string()))?
            .map_err(|e| conversion_failed(e.to_string()))
    }

    async fn fetch_to(
        &self,
        request: &MaterializeRequest<'_>,
        format: &str,
    ) -> std::result::Result<PathBuf, MaterializeError> {
        let destination = artifact_path(&self.output_dir, request.name, format);
        let artifact = ArtifactRequest {
            token: request.token.to_string(),
            anti_forgery_token: request.anti_forgery_token.to_string(),
            format: format.to_string(),
            destination: destination.clone(),
        };

        let fetch_failed = |reason: String| MaterializeError::FetchFailed {
            format: format.to_string(),
            reason,
        };
        let bytes = self
            .fetcher
            .fetch(&artifact)
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(fetch_failed("empty response body".to_string()));
        }

        self.write(&destination, &bytes).await?;
        Ok(destination)
    }

    /// Write through a `.part` sibling so readers never see a half-written file
    async fn write(&self, path: &Path, bytes: &[u8]) -> std::result::Result<(), MaterializeError> {
        let partial = partial_path(path);
        self.storage
            .write(&partial, bytes)
            .await
            .map_err(|e| storage_error(&partial, e))?;

        if let Err(e) = self.storage.rename(&partial, path).await {
            self.discard(&partial).await;
            return Err(storage_error(path, e));
        }
        Ok(())
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = self.storage.delete(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete intermediate file");
        }
    }
}

fn storage_error(path: &Path, err: crate::Error) -> MaterializeError {
    MaterializeError::Storage {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
