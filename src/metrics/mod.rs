//! Metrics module
//!
//! Prometheus metrics for uploads, part transfers, store calls and the API.

pub mod server;

pub use server::{MetricsServer, MetricsServerError};

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Histogram, HistogramVec,
};
use std::time::Duration;

lazy_static! {
    // Upload metrics
    pub static ref MULTIPART_UPLOADS: CounterVec = register_counter_vec!(
        "kura_multipart_uploads_total",
        "Multipart uploads by final outcome",
        &["status"]  // "completed", "cancelled" or "failed"
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "kura_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "kura_upload_bytes_total",
        "Bytes acknowledged by the store"
    ).unwrap();

    // Part metrics
    pub static ref PART_ATTEMPTS: CounterVec = register_counter_vec!(
        "kura_part_attempts_total",
        "Part transfer attempts by result",
        &["result"]  // "success", "retry" or "rejected"
    ).unwrap();

    pub static ref PART_DURATION: Histogram = register_histogram!(
        "kura_part_transfer_duration_seconds",
        "Part transfer duration in seconds",
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    pub static ref ABORTS: CounterVec = register_counter_vec!(
        "kura_multipart_aborts_total",
        "Abort calls by result; failures may leave orphaned parts",
        &["status"]
    ).unwrap();

    // Store metrics
    pub static ref STORE_OPERATIONS: CounterVec = register_counter_vec!(
        "kura_store_operations_total",
        "Object store calls by operation and result",
        &["operation", "status"]
    ).unwrap();

    // API metrics
    pub static ref API_REQUESTS: CounterVec = register_counter_vec!(
        "kura_api_requests_total",
        "HTTP API requests by route and status code",
        &["route", "status"]
    ).unwrap();

    pub static ref API_DURATION: HistogramVec = register_histogram_vec!(
        "kura_api_request_duration_seconds",
        "HTTP API request duration in seconds",
        &["route"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record how a multipart upload ended
pub fn record_upload_outcome(status: &str) {
    MULTIPART_UPLOADS.with_label_values(&[status]).inc();
}

pub fn record_parts_per_upload(parts: u32) {
    MULTIPART_PARTS.observe(f64::from(parts));
}

pub fn record_bytes_uploaded(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

pub fn record_part_attempt(result: &str) {
    PART_ATTEMPTS.with_label_values(&[result]).inc();
}

pub fn record_part_duration(duration: Duration) {
    PART_DURATION.observe(duration.as_secs_f64());
}

pub fn record_abort(success: bool) {
    ABORTS.with_label_values(&[status_label(success)]).inc();
}

pub fn record_store_operation(operation: &str, success: bool) {
    STORE_OPERATIONS
        .with_label_values(&[operation, status_label(success)])
        .inc();
}

/// Record a completed API request
pub fn record_api_request(route: &str, status: u16, duration: Duration) {
    let status = status.to_string();
    API_REQUESTS
        .with_label_values(&[route, status.as_str()])
        .inc();
    API_DURATION
        .with_label_values(&[route])
        .observe(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_upload_outcome() {
        let before = MULTIPART_UPLOADS.with_label_values(&["completed"]).get();
        record_upload_outcome("completed");
        assert!(MULTIPART_UPLOADS.with_label_values(&["completed"]).get() >= before + 1.0);
    }

    #[test]
    fn test_record_abort() {
        let before = ABORTS.with_label_values(&["failure"]).get();
        record_abort(false);
        assert!(ABORTS.with_label_values(&["failure"]).get() >= before + 1.0);
    }

    #[test]
    fn test_record_part_metrics() {
        record_part_attempt("retry");
        record_part_duration(Duration::from_millis(120));
        record_bytes_uploaded(5 * 1024 * 1024);
        record_parts_per_upload(3);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_api_request() {
        record_api_request("multipart_init", 200, Duration::from_millis(3));
        assert!(API_REQUESTS.with_label_values(&["multipart_init", "200"]).get() >= 1.0);
    }
}
