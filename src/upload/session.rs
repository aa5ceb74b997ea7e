//! Upload session state
//!
//! A session records one upload: its declared size, how many bytes have been
//! committed so far, and the client's metadata. The offset is an atomic so
//! status queries never wait on an in-flight append; appends themselves are
//! serialized by a per-session async lock.

use super::store::BlobStore;
use super::writer::ChunkWriter;
use super::{UploadError, UploadId};
use bytes::Bytes;
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Progress of an upload, derived from offset and declared size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// No bytes received yet
    Created,
    /// Some but not all bytes received
    Receiving,
    /// Offset reached the declared size
    Complete,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    pub offset: u64,
    pub declared_size: u64,
    pub metadata: Option<String>,
}

impl UploadStatus {
    pub fn state(&self) -> UploadState {
        state_for(self.offset, self.declared_size)
    }
}

/// One resumable upload
pub struct UploadSession {
    id: UploadId,
    declared_size: u64,
    metadata: Option<String>,
    offset: AtomicU64,
    store: Arc<dyn BlobStore>,
    write_lock: Mutex<()>,
}

impl UploadSession {
    /// Create a session with offset 0 over an already-created blob
    pub fn new(
        id: UploadId,
        declared_size: u64,
        metadata: Option<String>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            id,
            declared_size,
            metadata,
            offset: AtomicU64::new(0),
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &UploadId {
        &self.id
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Metadata exactly as supplied on create
    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    /// Last committed offset
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Bytes still accepted before the declared size is reached
    pub fn remaining(&self) -> u64 {
        self.declared_size.saturating_sub(self.offset())
    }

    pub fn state(&self) -> UploadState {
        state_for(self.offset(), self.declared_size)
    }

    pub fn status(&self) -> UploadStatus {
        UploadStatus {
            offset: self.offset(),
            declared_size: self.declared_size,
            metadata: self.metadata.clone(),
        }
    }

    /// Advance the offset after `len` bytes were durably appended.
    ///
    /// Only called by the chunk writer while the write lock is held.
    pub(crate) fn commit(&self, len: u64) {
        self.offset.fetch_add(len, Ordering::AcqRel);
    }

    /// Cut the blob back to the committed offset after a failed write.
    ///
    /// Only called by the chunk writer while the write lock is held.
    pub(crate) async fn discard_uncommitted(&self) {
        let offset = self.offset();
        if let Err(e) = self.store.truncate(&self.id, offset).await {
            tracing::error!(
                upload_id = %self.id,
                offset,
                error = %e,
                "Failed to discard uncommitted bytes"
            );
        }
    }

    /// Append `body` at `expected_offset`.
    ///
    /// The write lock is held for the whole call, covering the offset check,
    /// the length check and every block write, and is released on every
    /// return path.
    pub async fn append<S, E>(
        &self,
        expected_offset: u64,
        content_length: Option<u64>,
        body: S,
        writer: ChunkWriter,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let _guard = self.write_lock.lock().await;

        let current = self.offset();
        if expected_offset != current {
            return Err(UploadError::Conflict {
                expected: expected_offset,
                current,
            });
        }

        if let Some(length) = content_length {
            if length > self.remaining() {
                return Err(UploadError::ExceedsDeclaredSize {
                    offset: current,
                    declared_size: self.declared_size,
                });
            }
        }

        let mut sink = self
            .store
            .appender(&self.id)
            .await
            .map_err(|source| UploadError::Io {
                offset: current,
                source,
            })?;

        writer.copy(self, &mut sink, body).await
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("id", &self.id)
            .field("declared_size", &self.declared_size)
            .field("offset", &self.offset())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

fn state_for(offset: u64, declared_size: u64) -> UploadState {
    if offset >= declared_size {
        UploadState::Complete
    } else if offset == 0 {
        UploadState::Created
    } else {
        UploadState::Receiving
    }
}
