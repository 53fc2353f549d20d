//! HTTP push triggers for backend services.
//!
//! These endpoints let collaborator services hand an event to the gateway for
//! immediate fan-out over WebSocket. Delivery is fire-and-forget: a user who is
//! not connected is skipped, and the response only reports how many live
//! connections accepted the frame.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::server::AppState;
use crate::websocket::PushKind;

/// Request to push an event to a single user
#[derive(Debug, Deserialize)]
pub struct PushUserRequest {
    /// Target user ID
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Event type to wrap the payload in
    pub event: PushKind,
    /// Event payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Request to push an event to every subscriber of a topic
#[derive(Debug, Deserialize)]
pub struct PushTopicRequest {
    /// Target topic name
    pub topic: String,
    /// Event type to wrap the payload in
    pub event: PushKind,
    /// Event payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Response for push operations
#[derive(Debug, Serialize)]
pub struct PushResponse {
    /// Whether at least one connection accepted the frame
    pub success: bool,
    /// Number of connections the event was delivered to
    pub delivered: usize,
    /// Number of failed deliveries
    pub failed: usize,
    /// Timestamp of the operation
    pub timestamp: DateTime<Utc>,
}

/// Push an event to a specific user
pub async fn push_user(
    State(state): State<AppState>,
    Json(request): Json<PushUserRequest>,
) -> Result<Json<PushResponse>> {
    if request.user_id.trim().is_empty() {
        return Err(GatewayError::Validation(
            "userId must not be empty".to_string(),
        ));
    }

    let result = state
        .notifier
        .notify_user(&request.user_id, request.event, request.data)
        .await;

    Ok(Json(PushResponse {
        success: result.success,
        delivered: result.delivered,
        failed: result.failed,
        timestamp: Utc::now(),
    }))
}

/// Push an event to every subscriber of a topic
pub async fn push_topic(
    State(state): State<AppState>,
    Json(request): Json<PushTopicRequest>,
) -> Result<Json<PushResponse>> {
    if request.topic.trim().is_empty() {
        return Err(GatewayError::Validation(
            "topic must not be empty".to_string(),
        ));
    }

    let result = state
        .notifier
        .notify_topic(&request.topic, request.event, request.data)
        .await;

    Ok(Json(PushResponse {
        success: result.success,
        delivered: result.delivered,
        failed: result.failed,
        timestamp: Utc::now(),
    }))
}
