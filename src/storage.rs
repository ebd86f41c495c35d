//! Storage sink -- where input files are read from and artifacts are written to.
//!
//! The batch never touches the filesystem directly. The embedding
//! application supplies a [`StorageSink`]; [`FsStorage`] is the default.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Byte-level storage used for inputs and artifacts
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Write `bytes` to `path`, replacing any existing file
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Read the whole file at `path`
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Move `from` to `to`
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete `path`; deleting a missing file is not an error
    async fn delete(&self, path: &Path) -> Result<()>;
}

/// [`StorageSink`] over the local filesystem
///
/// Parent directories are created on write.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

#[async_trait]
impl StorageSink for FsStorage {
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
