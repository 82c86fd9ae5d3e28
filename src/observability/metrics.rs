//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_sessions_accepted_total` (counter): client connections taken over
//! - `gateway_sessions_completed_total` (counter): jokes delivered
//! - `gateway_session_failures_total` (counter): by terminal `state`
//! - `gateway_dns_lookups_total` (counter): by `outcome`
//! - `gateway_active_sessions` (gauge): sessions alive across all workers
//! - `gateway_session_duration_seconds` (histogram): accept to removal

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const SESSIONS_ACCEPTED: &str = "gateway_sessions_accepted_total";
pub const SESSIONS_COMPLETED: &str = "gateway_sessions_completed_total";
pub const SESSION_FAILURES: &str = "gateway_session_failures_total";
pub const DNS_LOOKUPS: &str = "gateway_dns_lookups_total";
pub const ACTIVE_SESSIONS: &str = "gateway_active_sessions";
pub const SESSION_DURATION: &str = "gateway_session_duration_seconds";

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime; the exporter spawns its
/// HTTP listener there.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_session_opened() {
    counter!(SESSIONS_ACCEPTED).increment(1);
    gauge!(ACTIVE_SESSIONS).increment(1.0);
}

pub fn record_session_closed(lifetime: Duration) {
    gauge!(ACTIVE_SESSIONS).decrement(1.0);
    histogram!(SESSION_DURATION).record(lifetime.as_secs_f64());
}

pub fn record_session_completed() {
    counter!(SESSIONS_COMPLETED).increment(1);
}

pub fn record_session_failure(state: &'static str) {
    counter!(SESSION_FAILURES, "state" => state).increment(1);
}

pub fn record_dns_lookup(outcome: &'static str) {
    counter!(DNS_LOOKUPS, "outcome" => outcome).increment(1);
}
