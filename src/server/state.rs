use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::auth::TokenVerifier;
use crate::config::Settings;
use crate::diagnostics::{ErrorTracker, GatewaySnapshot};
use crate::notify::Notifier;
use crate::reconnect::{ReconnectOrchestrator, ReconnectPolicy};
use crate::registry::ConnectionRegistry;
use crate::session::{NoopSessionObserver, SessionObserver};
use crate::sync::SyncProviderRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub verifier: Arc<TokenVerifier>,
    pub registry: Arc<ConnectionRegistry>,
    pub notifier: Arc<Notifier>,
    pub reconnect: Arc<ReconnectOrchestrator>,
    pub sync: Arc<SyncProviderRegistry>,
    pub sessions: Arc<dyn SessionObserver>,
    pub diagnostics: Arc<ErrorTracker>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self::with_collaborators(
            settings,
            SyncProviderRegistry::new(),
            Arc::new(NoopSessionObserver),
        )
    }

    /// Wire the gateway with its domain collaborators: sync providers for
    /// SYNC_REQUEST handling and an observer for session activity reporting.
    pub fn with_collaborators(
        settings: Settings,
        sync: SyncProviderRegistry,
        sessions: Arc<dyn SessionObserver>,
    ) -> Self {
        let diagnostics = Arc::new(ErrorTracker::default());
        let verifier = Arc::new(TokenVerifier::new(&settings.jwt));
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = Arc::new(Notifier::new(registry.clone(), diagnostics.clone()));
        let reconnect = Arc::new(ReconnectOrchestrator::new(
            ReconnectPolicy::from_config(&settings.reconnect),
            registry.clone(),
            notifier.clone(),
            diagnostics.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            verifier,
            registry,
            notifier,
            reconnect,
            sync: Arc::new(sync),
            sessions,
            diagnostics,
            start_time: Instant::now(),
        }
    }

    /// Point-in-time view of the gateway for the diagnostics surface.
    pub fn snapshot(&self) -> GatewaySnapshot {
        GatewaySnapshot {
            connections: self.registry.connection_count(),
            topics: self.registry.topic_count(),
            reconnect_attempts: self.reconnect.attempt_snapshot(),
            recent_errors: self.diagnostics.recent(),
            generated_at: Utc::now(),
        }
    }
}
