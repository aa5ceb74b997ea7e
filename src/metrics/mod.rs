//! Metrics module
//!
//! Provides Prometheus metrics for upload activity.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_gauge, Counter,
    CounterVec, Encoder, Histogram, IntGauge, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_CREATED: Counter = register_counter!(
        "tus_uploads_created_total",
        "Total number of uploads created"
    ).unwrap();

    pub static ref UPLOADS_COMPLETED: Counter = register_counter!(
        "tus_uploads_completed_total",
        "Total number of uploads that reached their declared size"
    ).unwrap();

    pub static ref DECLARED_SIZE: Histogram = register_histogram!(
        "tus_upload_declared_size_bytes",
        "Declared size of created uploads",
        vec![1024.0, 65536.0, 1048576.0, 16777216.0, 134217728.0, 1073741824.0]
    ).unwrap();

    // Append metrics
    pub static ref APPENDS_TOTAL: CounterVec = register_counter_vec!(
        "tus_appends_total",
        "Append requests by outcome",
        &["status"]
    ).unwrap();

    pub static ref APPEND_BYTES_TOTAL: Counter = register_counter!(
        "tus_append_bytes_total",
        "Total bytes appended to upload stores"
    ).unwrap();

    // Server metrics
    pub static ref REQUESTS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "tus_requests_in_flight",
        "Requests currently being handled"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "tus_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a newly created upload
pub fn record_upload_created(declared_size: u64) {
    UPLOADS_CREATED.inc();
    DECLARED_SIZE.observe(declared_size as f64);
}

/// Record an upload reaching its declared size
pub fn record_upload_completed() {
    UPLOADS_COMPLETED.inc();
}

/// Record an append call
///
/// `bytes` counts what was committed, which may be non-zero on failure.
pub fn record_append(bytes: u64, error: Option<&str>) {
    APPENDS_TOTAL
        .with_label_values(&[error.unwrap_or("success")])
        .inc();
    APPEND_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_upload_created() {
        record_upload_created(1024);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_append_outcomes() {
        record_append(400, None);
        record_append(12, Some("io"));
        assert!(APPENDS_TOTAL.with_label_values(&["success"]).get() >= 1.0);
        assert!(APPENDS_TOTAL.with_label_values(&["io"]).get() >= 1.0);
    }

    #[test]
    fn test_render_contains_metrics() {
        record_upload_completed();
        let (content_type, body) = render().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("tus_uploads_completed_total"));
    }
}
