//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Connection traffic is counted by wrapping the
//! transport halves handed to the core, see [`MeteredConnection`].

use async_trait::async_trait;
use huddle_transport::{Connection, ConnectionId, MessageSink, MessageStream, TransportError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const ROOMS_CREATED: &str = "huddle_rooms_created_total";
    pub const JOINS_TOTAL: &str = "huddle_joins_total";
    pub const MESSAGES_TOTAL: &str = "huddle_messages_total";
    pub const MESSAGES_BYTES: &str = "huddle_messages_bytes";
    pub const SEND_FAILURES: &str = "huddle_send_failures_total";
    pub const RELAY_EXITS: &str = "huddle_relay_exits_total";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of WebSocket connections"
    );
    metrics::describe_counter!(names::ROOMS_CREATED, "Total number of rooms created");
    metrics::describe_counter!(names::JOINS_TOTAL, "Total number of successful room joins");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages by direction");
    metrics::describe_counter!(names::SEND_FAILURES, "Outgoing sends that failed");
    metrics::describe_counter!(names::RELAY_EXITS, "Relay loops ended, by reason");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a room creation.
pub fn record_room_created() {
    counter!(names::ROOMS_CREATED).increment(1);
}

/// Record a successful join.
pub fn record_join() {
    counter!(names::JOINS_TOTAL).increment(1);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a failed outgoing send.
pub fn record_send_failure() {
    counter!(names::SEND_FAILURES).increment(1);
}

/// Record the end of a relay loop.
pub fn record_relay_exit(reason: &'static str) {
    counter!(names::RELAY_EXITS, "reason" => reason).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// A connection whose traffic is counted.
pub struct MeteredConnection {
    inner: Box<dyn Connection>,
}

impl MeteredConnection {
    /// Wrap a connection.
    #[must_use]
    pub fn new(inner: Box<dyn Connection>) -> Self {
        Self { inner }
    }
}

impl Connection for MeteredConnection {
    fn id(&self) -> &ConnectionId {
        self.inner.id()
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }

    fn split(self: Box<Self>) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        let (sink, stream) = self.inner.split();
        (
            Box::new(MeteredSink { inner: sink }),
            Box::new(MeteredStream { inner: stream }),
        )
    }
}

/// Counts a send as failed if it is dropped before completing, as when the
/// room gives up on a slow member.
struct SendAttempt {
    settled: bool,
}

impl Drop for SendAttempt {
    fn drop(&mut self) {
        if !self.settled {
            record_send_failure();
        }
    }
}

struct MeteredSink {
    inner: Box<dyn MessageSink>,
}

#[async_trait]
impl MessageSink for MeteredSink {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let mut attempt = SendAttempt { settled: false };
        let result = self.inner.send(text).await;
        attempt.settled = true;
        match &result {
            Ok(()) => record_message(text.len(), "outbound"),
            Err(_) => record_send_failure(),
        }
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}

struct MeteredStream {
    inner: Box<dyn MessageStream>,
}

#[async_trait]
impl MessageStream for MeteredStream {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        let result = self.inner.recv().await;
        match &result {
            Ok(Some(text)) => record_message(text.len(), "inbound"),
            Ok(None) => {}
            Err(TransportError::FrameTooLarge { .. }) => record_error("frame_too_large"),
            Err(_) => record_error("receive"),
        }
        result
    }
}
