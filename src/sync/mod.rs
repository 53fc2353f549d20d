//! Per-type synchronization providers.
//!
//! A `SYNC_REQUEST` names a sync `type` (portfolio, preferences, ...); each type
//! is served by an external collaborator that computes what the client missed
//! since its last sync point. Providers are registered at startup and looked up
//! by name; any failure is contained by the dispatcher and surfaced to the
//! client as an `ERROR` envelope.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error type for sync lookups
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no provider registered for sync type \"{0}\"")]
    UnknownType(String),

    #[error("sync provider failed: {0}")]
    Provider(#[from] anyhow::Error),
}

/// Computes the updates a user missed since their last synchronization point.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    async fn updates_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Providers keyed by the sync `type` named in `SYNC_REQUEST`.
#[derive(Default)]
pub struct SyncProviderRegistry {
    providers: HashMap<String, Arc<dyn SyncProvider>>,
}

impl SyncProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sync_type: impl Into<String>, provider: Arc<dyn SyncProvider>) {
        self.providers.insert(sync_type.into(), provider);
    }

    pub fn with_provider(
        mut self,
        sync_type: impl Into<String>,
        provider: Arc<dyn SyncProvider>,
    ) -> Self {
        self.register(sync_type, provider);
        self
    }

    pub async fn fetch(
        &self,
        sync_type: &str,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<serde_json::Value, SyncError> {
        let provider = self
            .providers
            .get(sync_type)
            .ok_or_else(|| SyncError::UnknownType(sync_type.to_string()))?;

        Ok(provider.updates_since(user_id, since).await?)
    }

    pub fn provider_types(&self) -> Vec<&str> {
        self.providers.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
