//! Graceful shutdown handling for the gateway.
//!
//! This module provides coordinated shutdown functionality that:
//! 1. Signals background tasks to stop
//! 2. Removes every connection from the registry and queues a close frame
//! 3. Waits bounded for the registry to drain
//!
//! Removing entries here, rather than letting each socket tear itself down,
//! keeps the reconnect orchestrator out of the picture: a handler whose
//! connection is already gone from the registry never schedules invitations.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::registry::ConnectionRegistry;
use crate::websocket::OutboundFrame;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for close frames to be queued (default: 5 seconds)
    pub close_timeout: Duration,
    /// Time to wait for the registry to drain (default: 10 seconds)
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Handles graceful shutdown of the gateway
pub struct GatewayShutdown {
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GatewayShutdown {
    /// Create a new graceful shutdown handler
    pub fn new(registry: Arc<ConnectionRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            registry,
            shutdown_tx,
            config: ShutdownConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    ///
    /// Returns a ShutdownResult with details about the shutdown process
    #[tracing::instrument(
        name = "gateway_shutdown",
        skip(self),
        fields(
            total_connections = self.registry.connection_count()
        )
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        // Phase 1: Signal background tasks to stop
        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        // Phase 2: Close all registered connections
        tracing::info!("Phase 2: Closing connections");
        result.connections_closed = self.close_connections().await;

        // Phase 3: Wait for the registry to drain
        tracing::info!("Phase 3: Waiting for registry to drain");
        result.drained = self.wait_for_drain().await;

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            connections_closed = result.connections_closed,
            drained = result.drained,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Remove every connection from the registry and queue a close frame.
    /// The removal happens first so socket teardown sees a stale entry and
    /// skips reconnect orchestration.
    async fn close_connections(&self) -> usize {
        let connections = self.registry.all_handles();
        let total = connections.len();

        if total == 0 {
            return 0;
        }

        tracing::info!(total_connections = total, "Closing registered connections");

        let mut futures = FuturesUnordered::new();
        let mut closed = 0;

        for conn in connections {
            self.registry.remove_if_current(&conn.user_id, conn.id);
            futures.push(async move {
                match timeout(Duration::from_secs(2), conn.send_frame(OutboundFrame::Close)).await
                {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(
                            connection_id = %conn.id,
                            error = %e,
                            "Failed to queue close frame"
                        );
                        false
                    }
                    Err(_) => {
                        tracing::debug!(
                            connection_id = %conn.id,
                            "Timeout queueing close frame"
                        );
                        false
                    }
                }
            });
        }

        // Process all closes with overall timeout
        let close_future = async {
            while let Some(success) = futures.next().await {
                if success {
                    closed += 1;
                }
            }
        };

        let _ = timeout(self.config.close_timeout, close_future).await;

        tracing::info!(closed = closed, total = total, "Close frames queued");

        closed
    }

    /// Wait for the registry to drain. Connections that registered after the
    /// close snapshot stay behind and are reported.
    async fn wait_for_drain(&self) -> bool {
        if self.registry.connection_count() == 0 {
            return true;
        }

        let wait_future = async {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if self.registry.connection_count() == 0 {
                    break;
                }
            }
        };

        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.registry.connection_count();
        if remaining > 0 {
            tracing::warn!(
                remaining_connections = remaining,
                "Some connections did not close gracefully"
            );
            return false;
        }

        true
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether shutdown completed successfully
    pub success: bool,
    /// Number of connections that had a close frame queued
    pub connections_closed: usize,
    /// Whether the registry fully drained
    pub drained: bool,
    /// Total time taken for shutdown
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionMeta;
    use tokio::sync::mpsc;

    fn create_test_components() -> (Arc<ConnectionRegistry>, broadcast::Sender<()>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, _) = broadcast::channel(1);
        (registry, tx)
    }

    #[tokio::test]
    async fn test_shutdown_no_connections() {
        let (registry, tx) = create_test_components();
        let shutdown = GatewayShutdown::new(registry, tx);

        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert_eq!(result.connections_closed, 0);
        assert!(result.drained);
    }

    #[tokio::test]
    async fn test_shutdown_closes_registered_connections() {
        let (registry, tx) = create_test_components();

        let (sender_a, mut rx_a) = mpsc::channel(8);
        let (sender_b, mut rx_b) = mpsc::channel(8);
        registry.register("user-a".to_string(), ConnectionMeta::default(), sender_a);
        registry.register("user-b".to_string(), ConnectionMeta::default(), sender_b);

        let shutdown = GatewayShutdown::new(registry.clone(), tx);
        let result = shutdown.execute("redeploy").await;

        assert!(result.success);
        assert_eq!(result.connections_closed, 2);
        assert!(result.drained);
        assert_eq!(registry.connection_count(), 0);

        assert!(matches!(rx_a.recv().await, Some(OutboundFrame::Close)));
        assert!(matches!(rx_b.recv().await, Some(OutboundFrame::Close)));
    }

    #[tokio::test]
    async fn test_shutdown_signals_background_tasks() {
        let (registry, tx) = create_test_components();
        let mut shutdown_rx = tx.subscribe();

        let shutdown = GatewayShutdown::new(registry, tx);
        let result = shutdown.execute("test").await;

        assert!(result.success);
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
    }
}
