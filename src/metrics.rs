//! Metrics and telemetry for the data-mining engine
//!
//! Prometheus metrics for query throughput and latency, processing failures,
//! and memory pressure.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn recording on or off process wide
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether metrics are recorded
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

lazy_static! {
    // === Query Counters ===

    /// Finished queries by type and final state
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "datamining_queries_total",
        "Total queries by type and final state",
        &["query_type", "state"]
    ).unwrap();

    /// Aborted queries by reason
    pub static ref ABORTED_QUERIES: CounterVec = register_counter_vec!(
        "datamining_aborted_queries_total",
        "Total aborted queries by reason",
        &["reason"]
    ).unwrap();

    // === Latency Histograms ===

    /// Query run duration
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "datamining_query_duration_seconds",
        "Query run latency in seconds",
        &["query_type"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).unwrap();

    // === Resource Gauges ===

    /// Queries currently running
    pub static ref RUNNING_QUERIES: Gauge = register_gauge!(
        "datamining_running_queries",
        "Number of queries currently running"
    ).unwrap();

    /// Last observed free memory ratio
    pub static ref FREE_MEMORY_RATIO: Gauge = register_gauge!(
        "datamining_free_memory_ratio",
        "Free memory ratio seen by the last memory check"
    ).unwrap();

    // === Error Counters ===

    /// Processing failures by severity
    pub static ref PROCESSING_FAILURES: CounterVec = register_counter_vec!(
        "datamining_processing_failures_total",
        "Total processing failures by severity",
        &["severity"]
    ).unwrap();

    /// Memory alerts by level
    pub static ref MEMORY_ALERTS: CounterVec = register_counter_vec!(
        "datamining_memory_alerts_total",
        "Total memory alerts by level",
        &["level"]
    ).unwrap();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a finished query
pub fn record_query(query_type: &str, state: &str, duration_secs: f64) {
    if !is_enabled() {
        return;
    }
    QUERIES_TOTAL.with_label_values(&[query_type, state]).inc();
    QUERY_DURATION
        .with_label_values(&[query_type])
        .observe(duration_secs);
}

/// Record a processing failure
pub fn record_failure(severity: &str) {
    if !is_enabled() {
        return;
    }
    PROCESSING_FAILURES.with_label_values(&[severity]).inc();
}

/// Record a task the worker pool refused
pub fn record_rejected_task() {
    record_failure("rejected");
}

/// Record an aborted query
pub fn record_aborted_query(reason: &str) {
    if !is_enabled() {
        return;
    }
    ABORTED_QUERIES.with_label_values(&[reason]).inc();
}

/// Record a memory alert
pub fn record_memory_alert(level: &str) {
    if !is_enabled() {
        return;
    }
    MEMORY_ALERTS.with_label_values(&[level]).inc();
}

/// Update the free memory ratio
pub fn set_free_memory_ratio(ratio: f64) {
    if !is_enabled() {
        return;
    }
    FREE_MEMORY_RATIO.set(ratio);
}

/// A query started running
pub fn inc_running_queries() {
    if !is_enabled() {
        return;
    }
    RUNNING_QUERIES.inc();
}

/// A query stopped running
pub fn dec_running_queries() {
    if !is_enabled() {
        return;
    }
    RUNNING_QUERIES.dec();
}
