//! Prometheus metrics for the push gateway.
//!
//! This module provides the metrics for monitoring the gateway:
//! - Connection metrics (active connections, topic subscriptions)
//! - Push metrics (sent, delivered, failed by target type)
//! - WebSocket metrics (lifecycle, inbound message mix)
//! - Heartbeat and reconnect metrics
//! - Error counts by class

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, ErrorMetrics, HeartbeatMetrics, MessageMetrics,
    ReconnectMetrics, WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "pulse";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of active WebSocket connections (one per connected user)
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of active WebSocket connections"
    ).unwrap();

    /// Total topics with subscribers
    pub static ref TOPICS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_topics_active", METRIC_PREFIX),
        "Total number of topics with at least one subscriber"
    ).unwrap();

    /// Number of subscribers per topic
    pub static ref TOPIC_SUBSCRIBERS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_topic_subscribers", METRIC_PREFIX),
        "Number of subscribers per topic",
        &["topic"]
    ).unwrap();

    // ============================================================================
    // Push Metrics
    // ============================================================================

    /// Total pushes sent by target type
    pub static ref PUSHES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_pushes_sent_total", METRIC_PREFIX),
        "Total pushes sent",
        &["target"]
    ).unwrap();

    /// Total envelopes delivered to connections
    pub static ref PUSHES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pushes_delivered_total", METRIC_PREFIX),
        "Total envelopes successfully handed to connections"
    ).unwrap();

    /// Total delivery failures
    pub static ref PUSHES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pushes_failed_total", METRIC_PREFIX),
        "Total envelope delivery failures"
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    /// WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket messages received from clients
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket messages received from clients",
        &["type"]
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    ).unwrap();

    /// Heartbeat send timeouts
    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Total heartbeat send timeouts"
    ).unwrap();

    /// Connections reaped for missing a probe
    pub static ref HEARTBEAT_REAPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_reaped_total", METRIC_PREFIX),
        "Total connections reaped for missing a heartbeat probe"
    ).unwrap();

    // ============================================================================
    // Reconnect Metrics
    // ============================================================================

    /// Reconnect invitations scheduled
    pub static ref RECONNECT_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnect_scheduled_total", METRIC_PREFIX),
        "Total reconnect invitations scheduled"
    ).unwrap();

    /// Reconnect cycles that gave up
    pub static ref RECONNECT_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnect_exhausted_total", METRIC_PREFIX),
        "Total reconnect cycles that exhausted their attempts"
    ).unwrap();

    /// Users with a reconnect cycle in progress
    pub static ref RECONNECT_PENDING: IntGauge = register_int_gauge!(
        format!("{}_reconnect_pending", METRIC_PREFIX),
        "Users with a reconnect cycle in progress"
    ).unwrap();

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Errors by class
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_gateway_errors_total", METRIC_PREFIX),
        "Total gateway errors by class",
        &["class"]
    ).unwrap();
}
