//! Metrics helper structs for convenient metric recording

use std::collections::HashMap;

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_ACTIVE, ERRORS_TOTAL, HEARTBEAT_DURATION_MS, HEARTBEAT_REAPED_TOTAL,
    HEARTBEAT_TIMEOUTS, PUSHES_DELIVERED_TOTAL, PUSHES_FAILED_TOTAL, PUSHES_SENT_TOTAL,
    RECONNECT_EXHAUSTED_TOTAL, RECONNECT_PENDING, RECONNECT_SCHEDULED_TOTAL, TOPICS_ACTIVE,
    TOPIC_SUBSCRIBERS, WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording push metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record a push targeted at a single user
    pub fn record_user_push() {
        PUSHES_SENT_TOTAL.with_label_values(&["user"]).inc();
    }

    /// Record a push targeted at a topic
    pub fn record_topic_push() {
        PUSHES_SENT_TOTAL.with_label_values(&["topic"]).inc();
    }

    /// Record a broadcast to every connection
    pub fn record_broadcast() {
        PUSHES_SENT_TOTAL.with_label_values(&["broadcast"]).inc();
    }

    /// Record successful deliveries
    pub fn record_delivered(count: u64) {
        PUSHES_DELIVERED_TOTAL.inc_by(count);
    }

    /// Record failed deliveries
    pub fn record_failed(count: u64) {
        PUSHES_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording WebSocket message metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    /// Record a subscribe message
    pub fn record_subscribe() {
        WS_MESSAGES_RECEIVED.with_label_values(&["subscribe"]).inc();
    }

    /// Record an unsubscribe message
    pub fn record_unsubscribe() {
        WS_MESSAGES_RECEIVED
            .with_label_values(&["unsubscribe"])
            .inc();
    }

    /// Record a sync request
    pub fn record_sync() {
        WS_MESSAGES_RECEIVED
            .with_label_values(&["sync_request"])
            .inc();
    }

    /// Record an unparseable or unsupported frame
    pub fn record_invalid() {
        WS_MESSAGES_RECEIVED.with_label_values(&["invalid"]).inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    /// Record heartbeat round duration
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }

    /// Record heartbeat send timeouts
    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }

    /// Record a connection reaped for missing a probe
    pub fn record_reaped() {
        HEARTBEAT_REAPED_TOTAL.inc();
    }
}

/// Helper struct for reconnect metrics
pub struct ReconnectMetrics;

impl ReconnectMetrics {
    /// Record a scheduled reconnect invitation
    pub fn record_scheduled() {
        RECONNECT_SCHEDULED_TOTAL.inc();
    }

    /// Record a reconnect cycle giving up
    pub fn record_exhausted() {
        RECONNECT_EXHAUSTED_TOTAL.inc();
    }

    /// Set the number of users with a cycle in progress
    pub fn set_pending(count: usize) {
        RECONNECT_PENDING.set(count as i64);
    }
}

/// Helper struct for error metrics
pub struct ErrorMetrics;

impl ErrorMetrics {
    /// Record an error by class
    pub fn record(class: &str) {
        ERRORS_TOTAL.with_label_values(&[class]).inc();
    }
}

/// Helper struct for connection gauges, refreshed at scrape time
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// Set the active connection count
    pub fn set_connections(count: usize) {
        CONNECTIONS_ACTIVE.set(count as i64);
    }

    /// Replace the per-topic subscriber gauges with the current view.
    /// Resetting first drops series for topics that no longer exist.
    pub fn set_topics(topics: &HashMap<String, usize>) {
        TOPIC_SUBSCRIBERS.reset();
        for (topic, members) in topics {
            TOPIC_SUBSCRIBERS
                .with_label_values(&[topic])
                .set(*members as i64);
        }
        TOPICS_ACTIVE.set(topics.len() as i64);
    }
}
