//! tus protocol constants and header helpers
//!
//! Maps the tus 1.0.0 wire surface (header names, version marker,
//! status codes) onto the upload core.

use crate::upload::UploadError;
use hyper::header::{HeaderMap, HeaderName};
use hyper::StatusCode;

/// Protocol version spoken by this server
pub const TUS_VERSION: &str = "1.0.0";

/// Extensions advertised on capability discovery
pub const TUS_EXTENSIONS: &[&str] = &["creation"];

/// Content type required on append requests
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");

/// Server capabilities reported on discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub version: &'static str,
    pub extensions: &'static [&'static str],
    pub max_size: u64,
}

impl Capabilities {
    pub fn new(max_size: u64) -> Self {
        Self {
            version: TUS_VERSION,
            extensions: TUS_EXTENSIONS,
            max_size,
        }
    }

    /// Extensions as a `Tus-Extension` header value
    pub fn extension_list(&self) -> String {
        self.extensions.join(",")
    }
}

/// HTTP status for an upload error
pub fn status_for(err: &UploadError) -> StatusCode {
    match err {
        UploadError::SizeExceeded { .. } | UploadError::ExceedsDeclaredSize { .. } => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        UploadError::InvalidLength(_)
        | UploadError::InvalidMetadata(_)
        | UploadError::InvalidOffset(_) => StatusCode::BAD_REQUEST,
        UploadError::NotFound(_) => StatusCode::NOT_FOUND,
        UploadError::Conflict { .. } => StatusCode::CONFLICT,
        UploadError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        UploadError::VersionMismatch(_) => StatusCode::PRECONDITION_FAILED,
        UploadError::Io { .. } | UploadError::IdAllocation | UploadError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Header value as a string, if present and valid visible ASCII
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Append requests must carry exactly the offset octet-stream content type
pub fn check_content_type(content_type: Option<&str>) -> Result<(), UploadError> {
    match content_type {
        Some(OFFSET_OCTET_STREAM) => Ok(()),
        other => Err(UploadError::UnsupportedMediaType(
            other.unwrap_or_default().to_string(),
        )),
    }
}

/// Reject requests that name a protocol version other than ours.
///
/// A missing `Tus-Resumable` header is accepted.
pub fn check_version(headers: &HeaderMap) -> Result<(), UploadError> {
    match headers.get(&TUS_RESUMABLE) {
        None => Ok(()),
        Some(v) if v.as_bytes() == TUS_VERSION.as_bytes() => Ok(()),
        Some(v) => Err(UploadError::VersionMismatch(
            String::from_utf8_lossy(v.as_bytes()).into_owned(),
        )),
    }
}

/// `Upload-Length` of a create request; absent means 0
pub fn upload_length(headers: &HeaderMap) -> Result<u64, UploadError> {
    parse_u64(headers, &UPLOAD_LENGTH, UploadError::InvalidLength)
}

/// `Upload-Offset` of an append request; absent means 0
pub fn upload_offset(headers: &HeaderMap) -> Result<u64, UploadError> {
    parse_u64(headers, &UPLOAD_OFFSET, UploadError::InvalidOffset)
}

/// `Content-Length`, if present and numeric
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, &hyper::header::CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
}

fn parse_u64(
    headers: &HeaderMap,
    name: &HeaderName,
    invalid: fn(String) -> UploadError,
) -> Result<u64, UploadError> {
    let Some(value) = headers.get(name) else {
        return Ok(0);
    };
    let text = value
        .to_str()
        .map_err(|_| invalid(String::from_utf8_lossy(value.as_bytes()).into_owned()))?
        .trim();
    if text.is_empty() {
        return Ok(0);
    }
    text.parse().map_err(|_| invalid(text.to_string()))
}
