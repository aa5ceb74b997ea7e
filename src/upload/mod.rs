//! Upload module
//!
//! Resumable upload sessions, their registry, and the chunked writer that
//! streams request bodies into the backing store.

use crate::metadata::MetadataError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub mod registry;
pub mod session;
pub mod store;
pub mod writer;

pub use registry::{AppendRequest, UploadRegistry};
pub use session::{UploadSession, UploadState, UploadStatus};
pub use store::{BlobStore, FileStore};
pub use writer::ChunkWriter;

/// Default maximum declared upload size (1 GiB)
pub const DEFAULT_MAX_SIZE: u64 = 1024 * 1024 * 1024;

/// Default block size used when streaming a payload to the store (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Declared size {size} exceeds maximum {max}")]
    SizeExceeded { size: u64, max: u64 },

    #[error("Invalid upload length: {0}")]
    InvalidLength(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(#[from] MetadataError),

    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Offset mismatch: expected {expected}, current {current}")]
    Conflict { expected: u64, current: u64 },

    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),

    #[error("Invalid upload offset: {0}")]
    InvalidOffset(String),

    #[error("Payload exceeds declared size {declared_size} at offset {offset}")]
    ExceedsDeclaredSize { offset: u64, declared_size: u64 },

    #[error("Unsupported protocol version: {0}")]
    VersionMismatch(String),

    #[error("IO error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to allocate a unique upload id")]
    IdAllocation,

    #[error("Storage error: {0}")]
    Storage(#[source] std::io::Error),
}

impl UploadError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::SizeExceeded { .. } => "size_exceeded",
            UploadError::InvalidLength(_) => "invalid_length",
            UploadError::InvalidMetadata(_) => "invalid_metadata",
            UploadError::NotFound(_) => "not_found",
            UploadError::Conflict { .. } => "conflict",
            UploadError::UnsupportedMediaType(_) => "unsupported_media_type",
            UploadError::InvalidOffset(_) => "invalid_offset",
            UploadError::ExceedsDeclaredSize { .. } => "exceeds_declared_size",
            UploadError::VersionMismatch(_) => "version_mismatch",
            UploadError::Io { .. } => "io",
            UploadError::IdAllocation => "id_allocation",
            UploadError::Storage(_) => "storage",
        }
    }
}

/// Upload identifier
///
/// A random UUID, rendered in lowercase hyphenated form on the wire and as
/// the blob name in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for UploadId {
    type Err = UploadError;

    /// Ids that are not UUIDs can never have been issued, so they are
    /// reported as unknown rather than malformed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| UploadError::NotFound(s.to_string()))
    }
}

/// Size limits applied by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Largest declared size accepted on create
    pub max_size: u64,
    /// Block size for streaming payloads into the store
    pub chunk_size: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
