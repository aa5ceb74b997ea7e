//! Backing byte stores for upload sessions
//!
//! Each session owns one append-only blob, addressed by its upload id.

use super::UploadId;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWrite;

/// Writer returned by [`BlobStore::appender`]
pub type BlobAppender = Pin<Box<dyn AsyncWrite + Send>>;

/// Append-only blob storage keyed by upload id
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create an empty blob for `id`.
    ///
    /// Must fail with [`io::ErrorKind::AlreadyExists`] if a blob for `id`
    /// already exists, rather than truncating it.
    async fn create(&self, id: &UploadId) -> io::Result<()>;

    /// Open the blob for `id` positioned at its end.
    async fn appender(&self, id: &UploadId) -> io::Result<BlobAppender>;

    /// Discard every byte of the blob for `id` past `len`.
    ///
    /// A blob already no longer than `len` is left untouched.
    async fn truncate(&self, id: &UploadId, len: u64) -> io::Result<()>;
}

/// Store that keeps one file per upload in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`. The directory must already exist.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the blobs
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob for `id`
    pub fn path_for(&self, id: &UploadId) -> PathBuf {
        self.root.join(id.to_string())
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn create(&self, id: &UploadId) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_for(id))
            .await?;
        Ok(())
    }

    async fn appender(&self, id: &UploadId) -> io::Result<BlobAppender> {
        let file = OpenOptions::new()
            .append(true)
            .open(self.path_for(id))
            .await?;
        Ok(Box::pin(file))
    }

    async fn truncate(&self, id: &UploadId, len: u64) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(self.path_for(id))
            .await?;
        if file.metadata().await?.len() > len {
            file.set_len(len).await?;
        }
        Ok(())
    }
}
