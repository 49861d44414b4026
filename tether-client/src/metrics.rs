//! OpenTelemetry instruments for a connection
//!
//! - **tether.client.connection.state**: state code (gauge, see [`state_code`])
//! - **tether.client.requests.total** / **request.duration**: by method and status
//! - **tether.client.errors.total**: by error type
//! - **tether.client.connect.failures**: by failure category
//! - **tether.client.reconnection.attempts** / **reconnection.success**
//! - **tether.client.timeouts.total**
//! - **tether.client.notifications.received**: by method
//! - **tether.client.requests.pending**: outstanding correlated requests (gauge)
//!
//! Instruments are no-ops until a meter provider is installed, e.g. by
//! [`tether_core::init_observability`].

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};
use tether_core::FailureCategory;

/// Numeric code recorded by the state gauge
pub fn state_code(state: ConnectionState) -> i64 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Reconnecting => 3,
        ConnectionState::Closed => 4,
    }
}

/// Client metrics
pub struct ClientMetrics {
    connection_state: Gauge<i64>,
    requests_total: Counter<u64>,
    request_duration: Histogram<f64>,
    errors_total: Counter<u64>,
    connect_failures: Counter<u64>,
    reconnection_attempts: Counter<u64>,
    reconnection_success: Counter<u64>,
    timeouts_total: Counter<u64>,
    notifications_received: Counter<u64>,
    pending_requests: Gauge<i64>,
}

impl ClientMetrics {
    /// Create instruments on the global meter provider
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Create instruments on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("tether.client.connection.state")
                .with_description(
                    "Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=closed)",
                )
                .build(),
            requests_total: meter
                .u64_counter("tether.client.requests.total")
                .with_description("Correlated requests completed")
                .build(),
            request_duration: meter
                .f64_histogram("tether.client.request.duration")
                .with_description("Request round-trip time in seconds")
                .with_unit("s")
                .build(),
            errors_total: meter
                .u64_counter("tether.client.errors.total")
                .with_description("Errors encountered")
                .build(),
            connect_failures: meter
                .u64_counter("tether.client.connect.failures")
                .with_description("Failed dial attempts by category")
                .build(),
            reconnection_attempts: meter
                .u64_counter("tether.client.reconnection.attempts")
                .with_description("Reconnect attempts scheduled")
                .build(),
            reconnection_success: meter
                .u64_counter("tether.client.reconnection.success")
                .with_description("Successful reconnections")
                .build(),
            timeouts_total: meter
                .u64_counter("tether.client.timeouts.total")
                .with_description("Requests that timed out")
                .build(),
            notifications_received: meter
                .u64_counter("tether.client.notifications.received")
                .with_description("Unsolicited messages received")
                .build(),
            pending_requests: meter
                .i64_gauge("tether.client.requests.pending")
                .with_description("Outstanding correlated requests")
                .build(),
        }
    }

    /// Record a state transition
    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(
            state_code(state),
            &[KeyValue::new("state", state.as_str())],
        );
    }

    /// Record a completed request
    pub fn record_request(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }

    /// Record a failed dial
    pub fn record_connect_failure(&self, category: FailureCategory) {
        self.connect_failures
            .add(1, &[KeyValue::new("category", category.as_str())]);
    }

    /// Record a scheduled reconnect
    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    /// Record a successful reconnect
    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    /// Record a request timeout
    pub fn record_timeout(&self) {
        self.timeouts_total.add(1, &[]);
    }

    /// Record an unsolicited message
    pub fn record_notification(&self, method: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    /// Record the outstanding request count
    pub fn update_pending(&self, count: usize) {
        self.pending_requests
            .record(i64::try_from(count).unwrap_or(i64::MAX), &[]);
    }
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert_eq!(state_code(ConnectionState::Disconnected), 0);
        assert_eq!(state_code(ConnectionState::Connected), 2);
        assert_eq!(state_code(ConnectionState::Closed), 4);
    }

    #[test]
    fn test_recording_without_provider() {
        let metrics = ClientMetrics::new("test-client");

        metrics.update_connection_state(ConnectionState::Reconnecting);
        metrics.record_request("public/get_time", "success", 0.004);
        metrics.record_request("private/buy", "error", 0.02);
        metrics.record_error("decode");
        metrics.record_connect_failure(FailureCategory::Auth);
        metrics.record_reconnection_attempt();
        metrics.record_reconnection_success();
        metrics.record_timeout();
        metrics.record_notification("subscription");
        metrics.update_pending(3);
    }
}
