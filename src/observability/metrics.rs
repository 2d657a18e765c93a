//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_circuit_transitions_total` (counter): state changes by circuit, target state
//! - `resilience_circuit_rejections_total` (counter): fail-fast rejections by circuit
//! - `resilience_lock_acquisitions_total` (counter): try-lock outcomes by lock type
//! - `resilience_locks_held` (gauge): locks currently tracked locally
//! - `resilience_lock_auto_releases_total` (counter): locks released by the safety timer
//! - `resilience_realtime_reconnects_total` (counter): scheduled reconnects
//! - `resilience_realtime_channels` (gauge): tracked channels
//! - `resilience_outbox_pending` (gauge): messages awaiting retry
//! - `resilience_outbox_dead_lettered_total` (counter): messages that exhausted the budget
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are low-cardinality names, never resource or channel ids

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_circuit_transition(circuit: &str, to: &'static str) {
    metrics::counter!(
        "resilience_circuit_transitions_total",
        "circuit" => circuit.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_circuit_rejection(circuit: &str) {
    metrics::counter!(
        "resilience_circuit_rejections_total",
        "circuit" => circuit.to_string()
    )
    .increment(1);
}

pub fn record_lock_attempt(lock_type: &'static str, outcome: &'static str) {
    metrics::counter!(
        "resilience_lock_acquisitions_total",
        "lock_type" => lock_type,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_locks_held(count: usize) {
    metrics::gauge!("resilience_locks_held").set(count as f64);
}

pub fn record_lock_auto_release(lock_type: &'static str) {
    metrics::counter!("resilience_lock_auto_releases_total", "lock_type" => lock_type)
        .increment(1);
}

pub fn record_reconnect() {
    metrics::counter!("resilience_realtime_reconnects_total").increment(1);
}

pub fn record_channel_count(count: usize) {
    metrics::gauge!("resilience_realtime_channels").set(count as f64);
}

pub fn record_outbox_pending(count: usize) {
    metrics::gauge!("resilience_outbox_pending").set(count as f64);
}

pub fn record_dead_letter() {
    metrics::counter!("resilience_outbox_dead_lettered_total").increment(1);
}
