//! Health check and statistics endpoints.

use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diagnostics::ErrorRecord;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub topics: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub pushes: PushStats,
    pub reconnect: ReconnectStats,
    pub recent_errors: Vec<ErrorRecord>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub topics: HashMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct PushStats {
    pub user_pushes: u64,
    pub topic_pushes: u64,
    pub broadcasts: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
}

#[derive(Debug, Serialize)]
pub struct ReconnectStats {
    pub users_pending: usize,
    pub attempts: HashMap<String, u32>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.start_time.elapsed().as_secs();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        connections: ConnectionHealthResponse {
            total: state.registry.connection_count(),
            topics: state.registry.topic_count(),
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let registry_stats = state.registry.stats();
    let push_stats = state.notifier.stats();
    let snapshot = state.snapshot();

    Json(StatsResponse {
        connections: ConnectionStats {
            total_connections: registry_stats.connections,
            topics: registry_stats.topics,
        },
        pushes: PushStats {
            user_pushes: push_stats.user_pushes,
            topic_pushes: push_stats.topic_pushes,
            broadcasts: push_stats.broadcasts,
            total_delivered: push_stats.total_delivered,
            total_failed: push_stats.total_failed,
        },
        reconnect: ReconnectStats {
            users_pending: snapshot.reconnect_attempts.len(),
            attempts: snapshot.reconnect_attempts,
        },
        recent_errors: snapshot.recent_errors,
        generated_at: snapshot.generated_at,
    })
}
