use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebSocketConfig;
use crate::metrics::HeartbeatMetrics;
use crate::reconnect::ReconnectOrchestrator;
use crate::registry::ConnectionRegistry;
use crate::session::SessionObserver;
use crate::websocket::OutboundFrame;

/// Timeout for individual probe send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent probe sends to avoid overwhelming the system
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background liveness monitor.
///
/// Every tick runs the two-state protocol over all registered connections: a
/// connection that never answered the previous probe is reaped (registry
/// cascade, forced close, reconnect orchestration); everyone else is marked
/// suspect and probed again. A Pong in the socket's recv loop marks it alive.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    orchestrator: Arc<ReconnectOrchestrator>,
    sessions: Arc<dyn SessionObserver>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        orchestrator: Arc<ReconnectOrchestrator>,
        sessions: Arc<dyn SessionObserver>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            orchestrator,
            sessions,
            shutdown,
        }
    }

    /// Run the probe loop until shutdown.
    pub async fn run(mut self) {
        let interval = Duration::from_secs(self.config.heartbeat_interval);
        let mut timer = tokio::time::interval(interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.probe_round().await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// One tick: reap the connections that missed the previous probe, then
    /// probe the rest in parallel batches.
    async fn probe_round(&self) {
        let connections = self.registry.all_handles();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let start = Instant::now();

        let mut to_probe = Vec::with_capacity(total_count);
        let mut reaped = 0usize;

        for handle in connections {
            let answered = handle.mark_suspect();
            if answered {
                to_probe.push(handle);
                continue;
            }

            // Missed a full probe cycle: dead. The teardown of the socket task
            // observes the removal and skips its own cleanup.
            if self
                .registry
                .remove_if_current(&handle.user_id, handle.id)
                .is_some()
            {
                reaped += 1;
                handle.try_close();
                self.sessions.session_closed(&handle.user_id);
                HeartbeatMetrics::record_reaped();
                tracing::warn!(
                    user_id = %handle.user_id,
                    connection_id = %handle.id,
                    "Reaped unresponsive connection"
                );
                self.orchestrator.handle_abnormal_disconnect(&handle.user_id);
            }
        }

        let sent = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let timed_out = Arc::new(AtomicUsize::new(0));

        // Process in batches to avoid overwhelming the system
        for batch in to_probe.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let futures: Vec<_> = batch
                .iter()
                .map(|handle| {
                    let sent = sent.clone();
                    let failed = failed.clone();
                    let timed_out = timed_out.clone();
                    let handle = handle.clone();

                    async move {
                        let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);
                        match timeout(send_timeout, handle.send_frame(OutboundFrame::Ping)).await {
                            Ok(Ok(_)) => {
                                sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(Err(_)) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    connection_id = %handle.id,
                                    "Failed to queue probe, connection may be dead"
                                );
                            }
                            Err(_) => {
                                timed_out.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    connection_id = %handle.id,
                                    timeout_ms = HEARTBEAT_SEND_TIMEOUT_MS,
                                    "Probe send timed out"
                                );
                            }
                        }
                    }
                })
                .collect();

            // Execute batch in parallel
            join_all(futures).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let sent_count = sent.load(Ordering::Relaxed);
        let failed_count = failed.load(Ordering::Relaxed);
        let timed_out_count = timed_out.load(Ordering::Relaxed);

        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if timed_out_count > 0 {
            HeartbeatMetrics::record_timeouts(timed_out_count as u64);
        }

        tracing::debug!(
            total = total_count,
            probed = sent_count,
            reaped = reaped,
            failed = failed_count,
            timed_out = timed_out_count,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        // Warn if the round is taking too long
        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total_count,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }
}
