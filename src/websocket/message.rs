use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages sent from client to gateway.
///
/// Envelope layout is `{"type": "...", "data": {...}}`; anything that does not
/// parse into this enum is a protocol fault and is dropped without a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
    SyncRequest {
        #[serde(rename = "type")]
        sync_type: String,
        #[serde(rename = "lastSyncTime")]
        last_sync_time: DateTime<Utc>,
    },
}

impl ClientMessage {
    /// Stable label for metrics.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ClientMessage::Subscribe { .. } => "SUBSCRIBE",
            ClientMessage::Unsubscribe { .. } => "UNSUBSCRIBE",
            ClientMessage::SyncRequest { .. } => "SYNC_REQUEST",
        }
    }
}

/// Messages sent from gateway to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    ConnectionEstablished {
        #[serde(rename = "userId")]
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    Subscribed {
        topics: Vec<String>,
    },
    Unsubscribed {
        topics: Vec<String>,
    },
    SyncResponse {
        #[serde(rename = "type")]
        sync_type: String,
        updates: serde_json::Value,
    },
    Error {
        message: String,
    },
    ServerError {
        message: String,
    },
    ReconnectRequest {
        #[serde(rename = "userId")]
        user_id: String,
    },
    ConnectionFailed {
        #[serde(rename = "userId")]
        user_id: String,
    },
    UserUpdate(serde_json::Value),
    PortfolioUpdate(serde_json::Value),
    PreferencesUpdate(serde_json::Value),
}

/// The closed set of collaborator push events the Notifier accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushKind {
    UserUpdate,
    PortfolioUpdate,
    PreferencesUpdate,
}

impl PushKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushKind::UserUpdate => "USER_UPDATE",
            PushKind::PortfolioUpdate => "PORTFOLIO_UPDATE",
            PushKind::PreferencesUpdate => "PREFERENCES_UPDATE",
        }
    }
}

impl ServerMessage {
    pub fn connection_established(user_id: impl Into<String>) -> Self {
        Self::ConnectionEstablished {
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn subscribed(topics: Vec<String>) -> Self {
        Self::Subscribed { topics }
    }

    pub fn unsubscribed(topics: Vec<String>) -> Self {
        Self::Unsubscribed { topics }
    }

    pub fn sync_response(sync_type: impl Into<String>, updates: serde_json::Value) -> Self {
        Self::SyncResponse {
            sync_type: sync_type.into(),
            updates,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::ServerError {
            message: message.into(),
        }
    }

    pub fn reconnect_request(user_id: impl Into<String>) -> Self {
        Self::ReconnectRequest {
            user_id: user_id.into(),
        }
    }

    pub fn connection_failed(user_id: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            user_id: user_id.into(),
        }
    }

    pub fn push(kind: PushKind, data: serde_json::Value) -> Self {
        match kind {
            PushKind::UserUpdate => Self::UserUpdate(data),
            PushKind::PortfolioUpdate => Self::PortfolioUpdate(data),
            PushKind::PreferencesUpdate => Self::PreferencesUpdate(data),
        }
    }
}

/// What travels over a connection's outbound channel.
///
/// `Shared` carries a payload serialized once and fanned out to many recipients;
/// `Ping` and `Close` are transport control frames (liveness probe, forced
/// termination on replacement/reap/shutdown).
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Message(ServerMessage),
    Shared(Arc<str>),
    Ping,
    Close,
}

impl OutboundFrame {
    pub fn shared(message: &ServerMessage) -> serde_json::Result<Self> {
        Ok(Self::Shared(serde_json::to_string(message)?.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_envelope_parses() {
        let raw = r#"{"type":"SUBSCRIBE","data":{"topics":["portfolio","prices"]}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Subscribe { topics } => {
                assert_eq!(topics, vec!["portfolio", "prices"]);
            }
            other => panic!("expected Subscribe, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_without_topics_defaults_to_empty() {
        let raw = r#"{"type":"SUBSCRIBE","data":{}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Subscribe { topics } => assert!(topics.is_empty()),
            other => panic!("expected Subscribe, got {:?}", other),
        }
    }

    #[test]
    fn test_sync_request_uses_wire_field_names() {
        let raw = r#"{"type":"SYNC_REQUEST","data":{"type":"portfolio","lastSyncTime":"2024-05-01T12:00:00Z"}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::SyncRequest {
                sync_type,
                last_sync_time,
            } => {
                assert_eq!(sync_type, "portfolio");
                assert_eq!(last_sync_time.timestamp(), 1714564800);
            }
            other => panic!("expected SyncRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let raw = r#"{"type":"MADE_UP","data":{}}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_subscribed_envelope_shape() {
        let msg = ServerMessage::subscribed(vec!["portfolio".to_string()]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "SUBSCRIBED", "data": {"topics": ["portfolio"]}})
        );
    }

    #[test]
    fn test_connection_established_carries_user_and_timestamp() {
        let msg = ServerMessage::connection_established("user-1");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "CONNECTION_ESTABLISHED");
        assert_eq!(value["data"]["userId"], "user-1");
        assert!(value["data"]["timestamp"].is_string());
    }

    #[test]
    fn test_push_event_wraps_payload_as_data() {
        let msg = ServerMessage::push(PushKind::PortfolioUpdate, json!({"total": 42}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "PORTFOLIO_UPDATE", "data": {"total": 42}})
        );
    }

    #[test]
    fn test_sync_response_keeps_literal_type_key() {
        let msg = ServerMessage::sync_response("preferences", json!([{"k": "v"}]));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["data"]["type"], "preferences");
        assert_eq!(value["data"]["updates"], json!([{"k": "v"}]));
    }

    #[test]
    fn test_shared_frame_matches_direct_serialization() {
        let msg = ServerMessage::reconnect_request("user-9");
        let direct = serde_json::to_string(&msg).unwrap();
        match OutboundFrame::shared(&msg).unwrap() {
            OutboundFrame::Shared(text) => assert_eq!(&*text, direct.as_str()),
            other => panic!("expected Shared, got {:?}", other),
        }
    }

    #[test]
    fn test_push_kind_parses_from_screaming_case() {
        let kind: PushKind = serde_json::from_value(json!("USER_UPDATE")).unwrap();
        assert_eq!(kind, PushKind::UserUpdate);
        assert_eq!(kind.as_str(), "USER_UPDATE");
    }
}
