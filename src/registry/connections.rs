use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{ConnectionHandle, ConnectionMeta};
use crate::websocket::OutboundFrame;

/// Tracks every active connection and topic subscription.
///
/// Both maps are keyed by user id: a user holds at most one connection, and a
/// topic holds the set of subscribed user ids. Registering over an existing
/// entry closes the superseded transport. Removing a user cascades through the
/// topic index and drops any topic entry left empty.
pub struct ConnectionRegistry {
    /// user_id -> active handle
    connections: DashMap<String, Arc<ConnectionHandle>>,
    /// topic -> subscribed user ids, created lazily, dropped when empty
    topics: DashMap<String, HashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            topics: DashMap::new(),
        }
    }

    /// Register a connection for a user, returning the new handle and the
    /// superseded one if the user was already connected.
    pub fn register(
        &self,
        user_id: String,
        meta: ConnectionMeta,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> (Arc<ConnectionHandle>, Option<Arc<ConnectionHandle>>) {
        let handle = Arc::new(ConnectionHandle::new(user_id.clone(), meta, sender));
        let replaced = self.connections.insert(user_id, handle.clone());

        match replaced {
            Some(old) => {
                old.try_close();
                tracing::info!(
                    user_id = %handle.user_id,
                    connection_id = %handle.id,
                    superseded_connection_id = %old.id,
                    "Connection registered, closing superseded transport"
                );
                (handle, Some(old))
            }
            None => {
                tracing::info!(
                    user_id = %handle.user_id,
                    connection_id = %handle.id,
                    "Connection registered"
                );
                (handle, None)
            }
        }
    }

    /// Look up the active connection for a user. Absent is a normal outcome.
    pub fn lookup(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(user_id).map(|h| h.clone())
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Remove a user's connection and cascade it out of every topic entry.
    pub fn remove(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(user_id)?;
        self.drop_subscriber(user_id);

        tracing::info!(
            user_id = %user_id,
            connection_id = %handle.id,
            "Connection removed"
        );
        Some(handle)
    }

    /// Remove only if the registered handle is still the given connection.
    ///
    /// Teardown of a superseded or already-reaped socket must not delete the
    /// entry a newer connection now owns; it also guarantees each abnormal
    /// disconnect is handed to the reconnect orchestrator exactly once.
    pub fn remove_if_current(
        &self,
        user_id: &str,
        connection_id: Uuid,
    ) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self
            .connections
            .remove_if(user_id, |_, h| h.id == connection_id)?;
        self.drop_subscriber(user_id);

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection removed"
        );
        Some(handle)
    }

    /// Subscribe a connected user to a topic. Returns false when the user has
    /// no active connection.
    pub fn subscribe(&self, user_id: &str, topic: &str) -> bool {
        if !self.connections.contains_key(user_id) {
            return false;
        }

        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(user_id.to_string());

        // A removal may have cascaded between the presence check and the
        // insert; re-check and undo so no topic entry outlives its user.
        if !self.connections.contains_key(user_id) {
            self.unsubscribe(user_id, topic);
            return false;
        }

        tracing::debug!(user_id = %user_id, topic = %topic, "Subscribed to topic");
        true
    }

    /// Drop one topic subscription, deleting the topic entry if it empties.
    pub fn unsubscribe(&self, user_id: &str, topic: &str) {
        if let Some(mut members) = self.topics.get_mut(topic) {
            members.remove(user_id);
            if members.is_empty() {
                drop(members);
                self.topics.remove_if(topic, |_, m| m.is_empty());
            }
        }

        tracing::debug!(user_id = %user_id, topic = %topic, "Unsubscribed from topic");
    }

    /// User ids currently subscribed to a topic.
    pub fn topic_members(&self, topic: &str) -> Vec<String> {
        self.topics
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every active handle (heartbeat probing, shutdown close).
    pub fn all_handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStats {
        let mut topic_counts = HashMap::new();
        for entry in self.topics.iter() {
            topic_counts.insert(entry.key().clone(), entry.value().len());
        }

        RegistryStats {
            connections: self.connections.len(),
            topics: topic_counts,
        }
    }

    /// Strip a user out of every topic set, dropping entries left empty.
    fn drop_subscriber(&self, user_id: &str) {
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(user_id);
        }
        self.topics.retain(|_, members| !members.is_empty());
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub connections: usize,
    pub topics: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::OutboundFrame;

    fn register_user(registry: &ConnectionRegistry, user_id: &str) -> Arc<ConnectionHandle> {
        let (tx, rx) = mpsc::channel(8);
        std::mem::forget(rx);
        registry.register(user_id.to_string(), ConnectionMeta::default(), tx).0
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let handle = register_user(&registry, "user-1");

        let found = registry.lookup("user-1").unwrap();
        assert_eq!(found.id, handle.id);
        assert!(registry.lookup("user-2").is_none());
    }

    #[test]
    fn test_replacement_closes_superseded_transport() {
        let registry = ConnectionRegistry::new();
        let (old_tx, mut old_rx) = mpsc::channel(8);
        let (old_handle, _) =
            registry.register("user-1".to_string(), ConnectionMeta::default(), old_tx);

        let (new_tx, _new_rx) = mpsc::channel(8);
        let (new_handle, replaced) =
            registry.register("user-1".to_string(), ConnectionMeta::default(), new_tx);

        assert_eq!(replaced.unwrap().id, old_handle.id);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.lookup("user-1").unwrap().id, new_handle.id);
        assert!(matches!(old_rx.try_recv(), Ok(OutboundFrame::Close)));
    }

    #[test]
    fn test_remove_cascades_topic_subscriptions() {
        let registry = ConnectionRegistry::new();
        register_user(&registry, "user-1");
        register_user(&registry, "user-2");

        assert!(registry.subscribe("user-1", "portfolio"));
        assert!(registry.subscribe("user-2", "portfolio"));
        assert!(registry.subscribe("user-1", "prices"));
        assert_eq!(registry.topic_count(), 2);

        registry.remove("user-1");

        // The shared topic keeps its other member; the solo topic is gone.
        assert_eq!(registry.topic_members("portfolio"), vec!["user-2"]);
        assert_eq!(registry.topic_count(), 1);
        assert!(registry.lookup("user-1").is_none());
    }

    #[test]
    fn test_unsubscribe_drops_empty_topic_entry() {
        let registry = ConnectionRegistry::new();
        register_user(&registry, "user-1");

        assert!(registry.subscribe("user-1", "portfolio"));
        assert_eq!(registry.topic_count(), 1);

        registry.unsubscribe("user-1", "portfolio");
        assert_eq!(registry.topic_count(), 0);
        assert!(registry.topic_members("portfolio").is_empty());
    }

    #[test]
    fn test_subscribe_requires_active_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.subscribe("ghost", "portfolio"));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_remove_if_current_ignores_stale_teardown() {
        let registry = ConnectionRegistry::new();
        let old = register_user(&registry, "user-1");
        let new = register_user(&registry, "user-1");
        assert!(registry.subscribe("user-1", "portfolio"));

        // The superseded socket's teardown must not touch the new entry.
        assert!(registry.remove_if_current("user-1", old.id).is_none());
        assert!(registry.is_connected("user-1"));
        assert_eq!(registry.topic_members("portfolio"), vec!["user-1"]);

        assert!(registry.remove_if_current("user-1", new.id).is_some());
        assert!(!registry.is_connected("user-1"));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_stats_reports_per_topic_counts() {
        let registry = ConnectionRegistry::new();
        register_user(&registry, "user-1");
        register_user(&registry, "user-2");
        registry.subscribe("user-1", "prices");
        registry.subscribe("user-2", "prices");

        let stats = registry.stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.topics.get("prices"), Some(&2));
    }
}
