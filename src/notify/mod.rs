//! Outbound push API.
//!
//! The surface domain collaborators call to reach connected clients: targeted
//! pushes by user id, topic fan-out, and the all-connections broadcast used for
//! server fault notices. Pushing to an absent user is a skip, never an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::diagnostics::{ErrorClass, ErrorTracker};
use crate::metrics::MessageMetrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::websocket::{OutboundFrame, PushKind, ServerMessage};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Threshold for using pre-serialization (saves serialization overhead for larger sends)
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Result of a push attempt
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Delivery {
    /// Number of connections the message was delivered to
    pub delivered: usize,
    /// Number of connections that failed to receive
    pub failed: usize,
    /// Whether any delivery was successful
    pub success: bool,
}

impl Delivery {
    fn new(delivered: usize, failed: usize) -> Self {
        Self {
            delivered,
            failed,
            success: delivered > 0,
        }
    }

    fn none() -> Self {
        Self::new(0, 0)
    }
}

/// Statistics for the notifier
#[derive(Debug, Default)]
pub struct NotifierStats {
    pub user_pushes: AtomicU64,
    pub topic_pushes: AtomicU64,
    pub broadcasts: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
}

impl NotifierStats {
    pub fn snapshot(&self) -> NotifierStatsSnapshot {
        NotifierStatsSnapshot {
            user_pushes: self.user_pushes.load(Ordering::Relaxed),
            topic_pushes: self.topic_pushes.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of notifier statistics
#[derive(Debug, Clone, Serialize)]
pub struct NotifierStatsSnapshot {
    pub user_pushes: u64,
    pub topic_pushes: u64,
    pub broadcasts: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
}

/// Pushes envelopes to connected clients.
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
    tracker: Arc<ErrorTracker>,
    stats: NotifierStats,
}

impl Notifier {
    pub fn new(registry: Arc<ConnectionRegistry>, tracker: Arc<ErrorTracker>) -> Self {
        Self {
            registry,
            tracker,
            stats: NotifierStats::default(),
        }
    }

    /// Get notifier statistics
    pub fn stats(&self) -> NotifierStatsSnapshot {
        self.stats.snapshot()
    }

    /// Push an event to one user. A user without an active connection is
    /// skipped silently.
    #[tracing::instrument(
        name = "notifier.notify_user",
        skip(self, data),
        fields(event = %kind.as_str())
    )]
    pub async fn notify_user(
        &self,
        user_id: &str,
        kind: PushKind,
        data: serde_json::Value,
    ) -> Delivery {
        self.stats.user_pushes.fetch_add(1, Ordering::Relaxed);
        MessageMetrics::record_user_push();

        let Some(handle) = self.registry.lookup(user_id) else {
            tracing::debug!(user_id = %user_id, "Skipping push, user not connected");
            return Delivery::none();
        };

        let result = self
            .fan_out(&[handle], &ServerMessage::push(kind, data))
            .await;

        tracing::debug!(
            user_id = %user_id,
            delivered = result.delivered,
            failed = result.failed,
            "Pushed event to user"
        );
        result
    }

    /// Push an event to every user subscribed to a topic.
    #[tracing::instrument(
        name = "notifier.notify_topic",
        skip(self, data),
        fields(event = %kind.as_str())
    )]
    pub async fn notify_topic(
        &self,
        topic: &str,
        kind: PushKind,
        data: serde_json::Value,
    ) -> Delivery {
        self.stats.topic_pushes.fetch_add(1, Ordering::Relaxed);
        MessageMetrics::record_topic_push();

        self.broadcast(topic, &ServerMessage::push(kind, data)).await
    }

    /// Deliver an envelope to the current subscribers of a topic.
    ///
    /// Subscribers without an active connection are skipped; delivery order is
    /// unspecified across recipients but in-order per recipient.
    #[tracing::instrument(name = "notifier.broadcast", skip(self, message))]
    pub async fn broadcast(&self, topic: &str, message: &ServerMessage) -> Delivery {
        let members = self.registry.topic_members(topic);
        if members.is_empty() {
            return Delivery::none();
        }

        let mut handles = Vec::with_capacity(members.len());
        let mut skipped = 0;
        for user_id in &members {
            match self.registry.lookup(user_id) {
                Some(handle) => handles.push(handle),
                None => skipped += 1,
            }
        }

        let result = self.fan_out(&handles, message).await;

        tracing::debug!(
            topic = %topic,
            delivered = result.delivered,
            failed = result.failed,
            skipped = skipped,
            "Broadcast to topic"
        );
        result
    }

    /// Deliver an envelope to every connected client.
    pub async fn broadcast_all(&self, message: &ServerMessage) -> Delivery {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        MessageMetrics::record_broadcast();

        let handles = self.registry.all_handles();
        let result = self.fan_out(&handles, message).await;

        tracing::debug!(
            delivered = result.delivered,
            failed = result.failed,
            "Broadcast to all connections"
        );
        result
    }

    /// Report an internal fault: log it, track it, and tell every connected
    /// client. The fault never propagates to the caller.
    pub async fn report_server_error(&self, message: impl Into<String>) -> Delivery {
        let message = message.into();
        tracing::error!(message = %message, "Server error reported to clients");
        self.tracker.record(ErrorClass::Server, message.clone());

        self.broadcast_all(&ServerMessage::server_error(message)).await
    }

    /// Send an envelope to a list of connections concurrently.
    /// Uses bounded parallelism and pre-serializes once for larger fan-outs.
    async fn fan_out(&self, handles: &[Arc<ConnectionHandle>], message: &ServerMessage) -> Delivery {
        if handles.is_empty() {
            return Delivery::none();
        }

        // For a small number of connections, simple sequential sending without
        // pre-serialization wins.
        if handles.len() <= 3 {
            let mut delivered = 0;
            let mut failed = 0;
            for handle in handles {
                match handle.send(message.clone()).await {
                    Ok(_) => delivered += 1,
                    Err(_) => failed += 1,
                }
            }
            return self.finish(delivered, failed);
        }

        let frame = if handles.len() >= PRESERIALIZATION_THRESHOLD {
            match OutboundFrame::shared(message) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to pre-serialize envelope, falling back to per-connection serialization");
                    OutboundFrame::Message(message.clone())
                }
            }
        } else {
            OutboundFrame::Message(message.clone())
        };

        let mut futures = FuturesUnordered::new();
        let mut delivered = 0;
        let mut failed = 0;
        let mut pending = 0;

        for handle in handles {
            let handle = handle.clone();
            let frame = frame.clone();
            futures.push(async move { handle.send_frame(frame).await.is_ok() });
            pending += 1;

            // Drain completed sends once we hit the concurrency limit
            while pending >= MAX_CONCURRENT_SENDS {
                match futures.next().await {
                    Some(true) => {
                        pending -= 1;
                        delivered += 1;
                    }
                    Some(false) => {
                        pending -= 1;
                        failed += 1;
                    }
                    None => break,
                }
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        self.finish(delivered, failed)
    }

    fn finish(&self, delivered: usize, failed: usize) -> Delivery {
        self.stats
            .total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        MessageMetrics::record_delivered(delivered as u64);
        MessageMetrics::record_failed(failed as u64);
        Delivery::new(delivered, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionMeta;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn notifier_with_registry() -> (Arc<ConnectionRegistry>, Notifier) {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = Notifier::new(registry.clone(), Arc::new(ErrorTracker::default()));
        (registry, notifier)
    }

    fn connect(registry: &ConnectionRegistry, user_id: &str) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(8);
        registry.register(user_id.to_string(), ConnectionMeta::default(), tx);
        rx
    }

    #[tokio::test]
    async fn test_notify_absent_user_is_noop() {
        let (_registry, notifier) = notifier_with_registry();

        let result = notifier
            .notify_user("ghost", PushKind::UserUpdate, json!({}))
            .await;
        assert!(!result.success);
        assert_eq!(result.delivered, 0);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test]
    async fn test_notify_user_delivers_push_envelope() {
        let (registry, notifier) = notifier_with_registry();
        let mut rx = connect(&registry, "user-1");

        let result = notifier
            .notify_user("user-1", PushKind::PortfolioUpdate, json!({"total": 10}))
            .await;
        assert!(result.success);

        match rx.recv().await {
            Some(OutboundFrame::Message(msg)) => {
                let value = serde_json::to_value(&msg).unwrap();
                assert_eq!(value["type"], "PORTFOLIO_UPDATE");
                assert_eq!(value["data"]["total"], 10);
            }
            other => panic!("expected push envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_subscribers() {
        let (registry, notifier) = notifier_with_registry();
        let mut sub_rx = connect(&registry, "subscriber");
        let mut other_rx = connect(&registry, "bystander");
        registry.subscribe("subscriber", "prices");

        let result = notifier
            .notify_topic("prices", PushKind::UserUpdate, json!({"v": 1}))
            .await;
        assert_eq!(result.delivered, 1);

        assert!(sub_rx.recv().await.is_some());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_error_reaches_everyone_and_is_tracked() {
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = Arc::new(ErrorTracker::default());
        let notifier = Notifier::new(registry.clone(), tracker.clone());
        let mut rx_a = connect(&registry, "a");
        let mut rx_b = connect(&registry, "b");

        let result = notifier.report_server_error("backing store unavailable").await;
        assert_eq!(result.delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await {
                Some(OutboundFrame::Message(ServerMessage::ServerError { message })) => {
                    assert_eq!(message, "backing store unavailable");
                }
                other => panic!("expected SERVER_ERROR, got {:?}", other),
            }
        }

        let recent = tracker.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].class, ErrorClass::Server);
    }

    #[tokio::test]
    async fn test_large_fan_out_uses_shared_frames() {
        let (registry, notifier) = notifier_with_registry();
        let mut receivers = Vec::new();
        for i in 0..6 {
            let rx = connect(&registry, &format!("user-{}", i));
            registry.subscribe(&format!("user-{}", i), "prices");
            receivers.push(rx);
        }

        let result = notifier
            .broadcast("prices", &ServerMessage::push(PushKind::UserUpdate, json!({})))
            .await;
        assert_eq!(result.delivered, 6);

        for rx in &mut receivers {
            match rx.recv().await {
                Some(OutboundFrame::Shared(_)) => {}
                other => panic!("expected pre-serialized frame, got {:?}", other),
            }
        }
    }
}
