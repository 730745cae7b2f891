//! Metric name constants shared across crates.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

/// Negotiate requests issued (counter, labels: status).
pub const NEGOTIATE_REQUESTS_TOTAL: &str = "negotiate_requests_total";
/// Candidate transports that failed to start (counter, labels: transport).
pub const TRANSPORT_START_FAILURES_TOTAL: &str = "transport_start_failures_total";
/// Connections established, initial or reconnect (counter, labels: transport).
pub const CONNECTIONS_ESTABLISHED_TOTAL: &str = "connections_established_total";
/// Reconnect attempts made (counter).
pub const RECONNECT_ATTEMPTS_TOTAL: &str = "reconnect_attempts_total";
