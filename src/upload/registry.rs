//! Upload registry
//!
//! Owns every session for the lifetime of the server. Sessions are added by
//! [`UploadRegistry::create`] and never removed.

use super::session::{UploadSession, UploadStatus};
use super::store::BlobStore;
use super::writer::ChunkWriter;
use super::{UploadError, UploadId, UploadLimits};
use crate::metadata;
use crate::metrics;
use crate::protocol;
use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use std::io;
use std::sync::Arc;

/// Attempts at drawing an unused id before giving up
const ID_ALLOCATION_ATTEMPTS: usize = 8;

/// Parameters of an append call, as supplied by the client
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendRequest<'a> {
    /// Offset the client believes the upload is at
    pub expected_offset: u64,
    /// Value of the request's content type, if any
    pub content_type: Option<&'a str>,
    /// Declared body length, if known up front
    pub content_length: Option<u64>,
}

/// Map from upload id to session
pub struct UploadRegistry {
    sessions: DashMap<UploadId, Arc<UploadSession>>,
    store: Arc<dyn BlobStore>,
    limits: UploadLimits,
}

impl UploadRegistry {
    pub fn new(store: Arc<dyn BlobStore>, limits: UploadLimits) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            limits,
        }
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Register a new upload of `declared_size` bytes.
    ///
    /// The session is only registered once its blob exists; an empty
    /// metadata string is stored as no metadata.
    #[tracing::instrument(name = "upload.create", skip(self, metadata), err)]
    pub async fn create(
        &self,
        declared_size: u64,
        metadata: Option<&str>,
    ) -> Result<UploadId, UploadError> {
        if declared_size > self.limits.max_size {
            return Err(UploadError::SizeExceeded {
                size: declared_size,
                max: self.limits.max_size,
            });
        }

        let metadata = metadata.filter(|m| !m.is_empty());
        if let Some(raw) = metadata {
            metadata::validate(raw)?;
        }

        for _ in 0..ID_ALLOCATION_ATTEMPTS {
            let id = UploadId::new();
            if self.sessions.contains_key(&id) {
                continue;
            }

            match self.store.create(&id).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(UploadError::Storage(e)),
            }

            let session = UploadSession::new(
                id,
                declared_size,
                metadata.map(str::to_string),
                Arc::clone(&self.store),
            );

            // Create-new blob semantics make `id` ours alone
            self.sessions.insert(id, Arc::new(session));

            metrics::record_upload_created(declared_size);
            tracing::info!(upload_id = %id, declared_size, "Created upload");
            return Ok(id);
        }

        Err(UploadError::IdAllocation)
    }

    /// Find the session for `id`
    pub fn lookup(&self, id: &str) -> Result<Arc<UploadSession>, UploadError> {
        let key: UploadId = id.parse()?;
        self.sessions
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| UploadError::NotFound(id.to_string()))
    }

    /// Current offset and metadata of `id`. Never waits on an append.
    pub fn status(&self, id: &str) -> Result<UploadStatus, UploadError> {
        self.lookup(id).map(|session| session.status())
    }

    /// Append `body` to upload `id`.
    ///
    /// Checks the content type, then that the upload exists, then (under the
    /// session lock) the expected offset. Returns the new offset.
    #[tracing::instrument(
        name = "upload.append",
        skip(self, request, body),
        fields(expected_offset = request.expected_offset),
        err
    )]
    pub async fn append<S, E>(
        &self,
        id: &str,
        request: AppendRequest<'_>,
        body: S,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        protocol::check_content_type(request.content_type)?;

        let session = self.lookup(id)?;
        let start = session.offset();
        let writer = ChunkWriter::new(self.limits.chunk_size);

        let result = session
            .append(request.expected_offset, request.content_length, body, writer)
            .await;

        let appended = session.offset().saturating_sub(start);
        metrics::record_append(appended, result.as_ref().err().map(UploadError::kind));

        if result.is_ok() && appended > 0 && session.offset() == session.declared_size() {
            metrics::record_upload_completed();
            tracing::info!(
                upload_id = %session.id(),
                size = session.declared_size(),
                "Upload complete"
            );
        }

        result
    }
}
