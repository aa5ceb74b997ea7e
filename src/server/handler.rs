//! Request handlers
//!
//! Translates parsed tus operations into registry calls and renders the
//! results as HTTP responses. Every response carries `Tus-Resumable`.

use super::AppState;
use crate::metrics;
use crate::protocol::{
    self, Capabilities, TUS_EXTENSION, TUS_MAX_SIZE, TUS_RESUMABLE, TUS_VERSION,
    TUS_VERSION_HEADER, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
};
use crate::router::{RouterError, TusOperation};
use crate::upload::{AppendRequest, UploadError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type TusResponse = Response<Full<Bytes>>;

/// Handle HTTP request
///
/// # Supported Endpoints
///
/// * `OPTIONS {base}` - capability discovery
/// * `POST {base}` - create an upload
/// * `HEAD {base}/{id}` - upload status
/// * `PATCH {base}/{id}` - append a chunk
/// * `GET /health` - health check
/// * `GET /metrics` - Prometheus metrics
pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<TusResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, "Handling request");

    let operation = match state.parser.parse(method.as_str(), &path) {
        Ok(op) => op,
        Err(e) => return Ok(router_error_response(&e)),
    };

    let result = match operation {
        TusOperation::Health => Ok(health_response()),
        TusOperation::Metrics => Ok(metrics_response(state.metrics_enabled)),
        TusOperation::Discover => Ok(discover(&state.capabilities)),
        TusOperation::Create => create(req, &state).await,
        TusOperation::Status { id } => status(&req, &id, &state),
        TusOperation::Append { id } => append(req, &id, &state).await,
    };

    Ok(result.unwrap_or_else(|e| error_response(&e, &method, &path, &state.capabilities)))
}

/// Empty-bodied response carrying the protocol version marker
fn tus_response(status: StatusCode) -> TusResponse {
    tus_response_with_body(status, Bytes::new())
}

fn tus_response_with_body(status: StatusCode, body: impl Into<Bytes>) -> TusResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    response
}

fn discover(capabilities: &Capabilities) -> TusResponse {
    let mut response = tus_response(StatusCode::NO_CONTENT);
    let headers = response.headers_mut();
    headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(capabilities.version));
    if let Ok(value) = HeaderValue::from_str(&capabilities.extension_list()) {
        headers.insert(TUS_EXTENSION, value);
    }
    headers.insert(TUS_MAX_SIZE, HeaderValue::from(capabilities.max_size));
    response
}

async fn create(req: Request<Incoming>, state: &AppState) -> Result<TusResponse, UploadError> {
    let (declared_size, metadata) = {
        let headers = req.headers();
        protocol::check_version(headers)?;
        let metadata = headers
            .get(UPLOAD_METADATA)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        (protocol::upload_length(headers)?, metadata)
    };

    let id = state.registry.create(declared_size, metadata.as_deref()).await?;
    let location = state.location_for(&id.to_string());

    let mut response = tus_response(StatusCode::CREATED);
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
        }
        Err(e) => error!(upload_id = %id, error = %e, "Location is not a valid header value"),
    }
    Ok(response)
}

fn status(req: &Request<Incoming>, id: &str, state: &AppState) -> Result<TusResponse, UploadError> {
    protocol::check_version(req.headers())?;

    let status = state.registry.status(id)?;

    let mut response = tus_response(StatusCode::OK);
    let headers = response.headers_mut();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(status.offset));
    headers.insert(UPLOAD_LENGTH, HeaderValue::from(status.declared_size));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(value) = status
        .metadata
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
    {
        headers.insert(UPLOAD_METADATA, value);
    }
    Ok(response)
}

async fn append(
    req: Request<Incoming>,
    id: &str,
    state: &AppState,
) -> Result<TusResponse, UploadError> {
    let (content_type, expected_offset, content_length) = {
        let headers = req.headers();
        protocol::check_version(headers)?;

        // Same precedence as the registry: content type, existence, then offset
        let content_type = protocol::header_str(headers, &CONTENT_TYPE).map(str::to_string);
        protocol::check_content_type(content_type.as_deref())?;
        state.registry.lookup(id)?;

        let expected_offset = protocol::upload_offset(headers)?;
        (content_type, expected_offset, protocol::content_length(headers))
    };

    let body = req.into_body().into_data_stream();
    let request = AppendRequest {
        expected_offset,
        content_type: content_type.as_deref(),
        content_length,
    };
    let offset = state.registry.append(id, request, body).await?;

    let mut response = tus_response(StatusCode::NO_CONTENT);
    response
        .headers_mut()
        .insert(UPLOAD_OFFSET, HeaderValue::from(offset));
    Ok(response)
}

fn health_response() -> TusResponse {
    let mut response = tus_response_with_body(StatusCode::OK, r#"{"status":"ok"}"#);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn metrics_response(enabled: bool) -> TusResponse {
    if !enabled {
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    }

    match metrics::render() {
        Ok((content_type, body)) => {
            let mut response = tus_response_with_body(StatusCode::OK, body);
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> TusResponse {
    let mut response = tus_response_with_body(status, body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn router_error_response(err: &RouterError) -> TusResponse {
    match err {
        RouterError::NotFound(path) => {
            debug!(%path, "No route");
            text_response(StatusCode::NOT_FOUND, "Not Found")
        }
        RouterError::MethodNotAllowed { allow, .. } => {
            debug!(error = %err, "Method not allowed");
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, err.to_string());
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(*allow));
            response
        }
    }
}

fn error_response(
    err: &UploadError,
    method: &Method,
    path: &str,
    capabilities: &Capabilities,
) -> TusResponse {
    let status = protocol::status_for(err);
    metrics::record_error(err.kind());

    if status.is_server_error() {
        error!(%method, %path, error = %err, kind = err.kind(), "Request failed");
    } else if matches!(err, UploadError::Conflict { .. } | UploadError::NotFound(_)) {
        info!(%method, %path, error = %err, "Request rejected");
    } else {
        warn!(%method, %path, error = %err, kind = err.kind(), "Request rejected");
    }

    // HEAD responses never carry a body
    let mut response = if method == Method::HEAD {
        tus_response(status)
    } else {
        text_response(status, err.to_string())
    };

    let headers = response.headers_mut();
    match err {
        UploadError::SizeExceeded { .. } => {
            headers.insert(TUS_MAX_SIZE, HeaderValue::from(capabilities.max_size));
        }
        UploadError::VersionMismatch(_) => {
            headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(capabilities.version));
        }
        UploadError::Io { offset, .. } | UploadError::ExceedsDeclaredSize { offset, .. } => {
            headers.insert(UPLOAD_OFFSET, HeaderValue::from(*offset));
        }
        _ => {}
    }
    response
}
