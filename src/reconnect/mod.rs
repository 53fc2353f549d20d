//! Reconnection orchestration for abnormally closed connections.
//!
//! Each user with an abnormal disconnect gets one invitation cycle: bounded,
//! exponentially backed-off `RECONNECT_REQUEST` broadcasts on the reserved
//! `system` topic, ending in `CONNECTION_FAILED` when the attempts run out.
//! A successful re-registration clears the attempt counter; an already-sleeping
//! invitation timer is left to fire once (a stale invite is harmless).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

use crate::config::ReconnectConfig;
use crate::diagnostics::{ErrorClass, ErrorTracker};
use crate::metrics::ReconnectMetrics;
use crate::notify::Notifier;
use crate::registry::ConnectionRegistry;
use crate::websocket::ServerMessage;

/// Topic reserved for gateway-originated lifecycle notices.
pub const SYSTEM_TOPIC: &str = "system";

/// Backoff policy for reconnect invitations.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 keeps delays exact
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before the invitation for a 0-based attempt index:
    /// `min(base * 2^attempt, max)`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;

        let exact = if attempt >= 32 {
            cap
        } else {
            base.saturating_mul(1u64 << attempt).min(cap)
        };

        let delay_ms = if self.jitter_factor > 0.0 && exact > 0 {
            let jitter_range = exact as f64 * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (exact as f64 + jitter).max(0.0) as u64
        } else {
            exact
        };

        Duration::from_millis(delay_ms)
    }
}

/// Runs per-user reconnect invitation cycles.
pub struct ReconnectOrchestrator {
    policy: ReconnectPolicy,
    /// user_id -> attempts already scheduled in the current cycle
    attempts: DashMap<String, u32>,
    /// users with a cycle task currently running
    in_flight: DashMap<String, ()>,
    registry: Arc<ConnectionRegistry>,
    notifier: Arc<Notifier>,
    tracker: Arc<ErrorTracker>,
}

impl ReconnectOrchestrator {
    pub fn new(
        policy: ReconnectPolicy,
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<Notifier>,
        tracker: Arc<ErrorTracker>,
    ) -> Self {
        Self {
            policy,
            attempts: DashMap::new(),
            in_flight: DashMap::new(),
            registry,
            notifier,
            tracker,
        }
    }

    /// Start an invitation cycle for a user whose connection dropped without a
    /// normal close. A cycle already running for the user absorbs the new
    /// failure instead of spawning a second one.
    pub fn handle_abnormal_disconnect(self: &Arc<Self>, user_id: &str) {
        if self.in_flight.insert(user_id.to_string(), ()).is_some() {
            tracing::debug!(user_id = %user_id, "Reconnect cycle already running");
            return;
        }

        let orchestrator = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            orchestrator.run_cycle(user_id).await;
        });
    }

    #[tracing::instrument(name = "reconnect.cycle", skip(self))]
    async fn run_cycle(&self, user_id: String) {
        loop {
            let attempt = self.attempts.get(&user_id).map(|a| *a).unwrap_or(0);

            if attempt >= self.policy.max_attempts {
                self.attempts.remove(&user_id);
                ReconnectMetrics::record_exhausted();
                self.tracker.record(
                    ErrorClass::ReconnectExhausted,
                    format!("user {} gone after {} invitations", user_id, attempt),
                );
                tracing::warn!(
                    user_id = %user_id,
                    attempts = attempt,
                    "Reconnect attempts exhausted"
                );
                self.notifier
                    .broadcast(
                        SYSTEM_TOPIC,
                        &ServerMessage::connection_failed(user_id.as_str()),
                    )
                    .await;
                break;
            }

            self.attempts.insert(user_id.clone(), attempt + 1);
            let delay = self.policy.delay_for(attempt);
            ReconnectMetrics::record_scheduled();
            tracing::info!(
                user_id = %user_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect invitation"
            );

            tokio::time::sleep(delay).await;

            // The invitation goes out even if the user re-registered during the
            // sleep; the timer is never cancelled mid-flight.
            self.notifier
                .broadcast(
                    SYSTEM_TOPIC,
                    &ServerMessage::reconnect_request(user_id.as_str()),
                )
                .await;

            if self.registry.is_connected(&user_id) {
                tracing::debug!(user_id = %user_id, "User reconnected, ending invitation cycle");
                break;
            }
        }

        self.in_flight.remove(&user_id);
    }

    /// Forget a user's attempt counter (called on successful registration).
    pub fn clear(&self, user_id: &str) {
        if self.attempts.remove(user_id).is_some() {
            tracing::debug!(user_id = %user_id, "Cleared reconnect attempts");
        }
    }

    /// Attempts scheduled so far for a user, if a cycle has state for them.
    pub fn pending_attempts(&self, user_id: &str) -> Option<u32> {
        self.attempts.get(user_id).map(|a| *a)
    }

    /// Current attempt counters for the diagnostics snapshot.
    pub fn attempt_snapshot(&self) -> HashMap<String, u32> {
        self.attempts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Number of users with an unresolved reconnect cycle.
    pub fn tracked_users(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact_policy() -> ReconnectPolicy {
        ReconnectPolicy::default()
    }

    #[test]
    fn test_delay_table_matches_contract() {
        let policy = exact_policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(16_000));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = exact_policy();
        assert_eq!(policy.delay_for(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(20), Duration::from_millis(30_000));
        // Shift widths past the cap saturate instead of overflowing.
        assert_eq!(policy.delay_for(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = ReconnectPolicy {
            jitter_factor: 0.1,
            ..ReconnectPolicy::default()
        };

        for _ in 0..100 {
            let delay = policy.delay_for(1).as_millis() as u64;
            assert!((1_800..=2_200).contains(&delay), "delay {} out of bounds", delay);
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = ReconnectConfig {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 120,
            jitter_factor: 0.0,
        };
        let policy = ReconnectPolicy::from_config(&config);

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(120));
    }
}
