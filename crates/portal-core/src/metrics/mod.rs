//! Metric recording for the portal access layer.
//!
//! Everything goes through the `metrics` facade; the binary decides where it is exported.
//! Label values are either static strings or come from small closed sets (endpoint names,
//! HTTP statuses, error kinds, negotiable field names), so cardinality stays bounded.

use metrics::{counter, histogram};
use std::time::Duration;

use crate::errors::GatewayError;

/// Records one completed (or failed) portal call. Status `0` marks a transport failure.
pub fn record_portal_request(endpoint: &'static str, status: u16, elapsed: Duration) {
    counter!("portal_requests_total", "endpoint" => endpoint, "status" => status.to_string())
        .increment(1);
    histogram!("portal_latency_seconds", "endpoint" => endpoint).record(elapsed.as_secs_f64());
}

pub fn record_metadata_fetch(status: u16) {
    counter!("portal_metadata_fetch_total", "status" => status.to_string()).increment(1);
}

pub fn record_unsupported_field(field: &str) {
    counter!("portal_unsupported_fields_total", "field" => field.to_string()).increment(1);
}

pub fn record_finalized_fallback() {
    counter!("finalized_fallback_total").increment(1);
}

pub fn record_stream_resume() {
    counter!("portal_stream_resumes_total").increment(1);
}

pub fn record_circuit_open() {
    counter!("portal_circuit_open_total").increment(1);
}

#[allow(clippy::cast_possible_truncation)]
pub fn record_ndjson(lines: usize, bytes: usize) {
    counter!("ndjson_lines_total").increment(lines as u64);
    counter!("ndjson_bytes_total").increment(bytes as u64);
}

/// Records the outcome of one coalesced batch item: `ok`, `null` or `error`.
pub fn record_batch_item(status: &'static str) {
    counter!("batch_items_total", "status" => status).increment(1);
}

pub fn record_error(error: &GatewayError) {
    counter!("errors_total", "category" => error.kind().as_str()).increment(1);
}
