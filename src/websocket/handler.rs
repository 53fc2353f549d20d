use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::diagnostics::ErrorClass;
use crate::metrics::{
    WsMessageMetrics, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};
use crate::registry::{ConnectionHandle, ConnectionMeta};
use crate::server::AppState;

use super::message::{ClientMessage, OutboundFrame, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;
const CLOSE_CODE_NORMAL: u16 = 1000;

/// How a connection ended, derived from the transport.
///
/// Normal closes end the session quietly; anything else hands the user
/// over to the reconnect orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Normal,
    Abnormal,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    // Extract token from query parameter or Authorization header
    let token = match extract_token(&query, &headers) {
        Some(t) => t,
        None => {
            state
                .diagnostics
                .record(ErrorClass::Authentication, "missing token on upgrade");
            return (StatusCode::UNAUTHORIZED, "Missing authentication token").into_response();
        }
    };

    // Validate JWT token
    let claims = match state.verifier.verify(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "JWT validation failed");
            state
                .diagnostics
                .record(ErrorClass::Authentication, e.to_string());
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    let meta = ConnectionMeta::new(
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        Some(addr.to_string()),
    );

    tracing::info!(user_id = %claims.sub, "WebSocket upgrade requested");

    // Upgrade to WebSocket
    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub, meta))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Register a connection and run the post-registration sequence: clear any
/// pending reconnect attempts, report the session, greet the client.
///
/// Public so integration tests can stand up connections without a socket.
pub async fn establish(
    state: &AppState,
    user_id: String,
    meta: ConnectionMeta,
    sender: mpsc::Sender<OutboundFrame>,
) -> Arc<ConnectionHandle> {
    let (handle, _replaced) = state.registry.register(user_id, meta, sender);

    state.reconnect.clear(&handle.user_id);
    state.sessions.session_opened(&handle.user_id, &handle.meta);
    WS_CONNECTIONS_OPENED.inc();

    tracing::info!(
        connection_id = %handle.id,
        user_id = %handle.user_id,
        "WebSocket connection established"
    );

    let _ = handle
        .send(ServerMessage::connection_established(
            handle.user_id.as_str(),
        ))
        .await;

    handle
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, meta),
    fields(
        user_id = %user_id,
        otel.kind = "server"
    )
)]
async fn handle_socket(socket: WebSocket, state: AppState, user_id: String, meta: ConnectionMeta) {
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(CHANNEL_BUFFER_SIZE);

    let handle = establish(&state, user_id.clone(), meta, tx).await;
    let connection_id = handle.id;

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for draining the outbound channel into the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Message(msg) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize envelope");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Shared(text) => {
                    if ws_sender
                        .send(Message::Text(text.as_ref().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                OutboundFrame::Ping => {
                    if ws_sender
                        .send(Message::Ping(Default::default()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = ws_sender.close().await;
                    break;
                }
            }
        }
    });

    // Task for receiving messages from WebSocket
    let recv_state = state.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if let Some(disconnect) = process_frame(msg, &recv_state, &recv_handle).await {
                        return disconnect;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %recv_handle.id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    return Disconnect::Abnormal;
                }
            }
        }

        // Stream ended without a close frame
        Disconnect::Abnormal
    });

    // Wait for either task to complete. The send task finishing first means
    // the transport broke mid-write or a forced close went out.
    let disconnect = tokio::select! {
        reason = &mut recv_task => reason.unwrap_or(Disconnect::Abnormal),
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            Disconnect::Abnormal
        }
    };

    // Tear down only if this connection is still the registered one. A
    // superseded or reaped connection was already cleaned up elsewhere.
    match state.registry.remove_if_current(&user_id, connection_id) {
        Some(_) => {
            state.sessions.session_closed(&user_id);
            match disconnect {
                Disconnect::Normal => {
                    tracing::info!(
                        connection_id = %connection_id,
                        user_id = %user_id,
                        "WebSocket connection closed"
                    );
                }
                Disconnect::Abnormal => {
                    state.diagnostics.record(
                        ErrorClass::Transport,
                        format!("connection lost for user {}", user_id),
                    );
                    tracing::warn!(
                        connection_id = %connection_id,
                        user_id = %user_id,
                        "WebSocket connection lost"
                    );
                    state.reconnect.handle_abnormal_disconnect(&user_id);
                }
            }
        }
        None => {
            tracing::debug!(
                connection_id = %connection_id,
                user_id = %user_id,
                "Connection already replaced or reaped"
            );
        }
    }

    // Record connection closed and duration metrics
    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);
}

/// Process a received WebSocket frame.
/// Returns the disconnect reason once the connection should be torn down.
async fn process_frame(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> Option<Disconnect> {
    match msg {
        Message::Text(text) => {
            handle.mark_alive();
            handle_text(state, handle, &text).await;
            None
        }
        Message::Binary(_) => {
            WsMessageMetrics::record_invalid();
            state.diagnostics.record(
                ErrorClass::Protocol,
                format!("binary frame from user {}", handle.user_id),
            );
            tracing::warn!(connection_id = %handle.id, "Dropping binary frame");
            None
        }
        Message::Ping(_) => {
            // Axum answers the pong itself; inbound traffic proves liveness
            handle.mark_alive();
            None
        }
        Message::Pong(_) => {
            handle.mark_alive();
            None
        }
        Message::Close(frame) => {
            let code = frame.as_ref().map(|f| f.code);
            tracing::debug!(connection_id = %handle.id, code = ?code, "Received close frame");
            if code == Some(CLOSE_CODE_NORMAL) {
                Some(Disconnect::Normal)
            } else {
                Some(Disconnect::Abnormal)
            }
        }
    }
}

/// Parse and dispatch a text frame. Unparseable payloads are logged and
/// dropped without a reply; the connection stays open.
///
/// Public so integration tests can drive the dispatch path directly.
pub async fn handle_text(state: &AppState, handle: &Arc<ConnectionHandle>, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            WsMessageMetrics::record_invalid();
            state.diagnostics.record(
                ErrorClass::Protocol,
                format!("unparseable frame from user {}: {}", handle.user_id, e),
            );
            tracing::warn!(
                connection_id = %handle.id,
                user_id = %handle.user_id,
                error = %e,
                "Dropping unparseable frame"
            );
            return;
        }
    };

    handle_client_message(msg, state, handle).await;
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(msg, state, handle),
    fields(
        connection_id = %handle.id,
        user_id = %handle.user_id,
        message_type = msg.kind_str()
    )
)]
async fn handle_client_message(
    msg: ClientMessage,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) {
    match msg {
        ClientMessage::Subscribe { topics } => {
            WsMessageMetrics::record_subscribe();
            for topic in &topics {
                state.registry.subscribe(&handle.user_id, topic);
            }
            tracing::info!(
                connection_id = %handle.id,
                topics = ?topics,
                "Subscribed to topics"
            );
            // The confirmation echoes the requested topics, even when empty
            let _ = handle.send(ServerMessage::subscribed(topics)).await;
        }
        ClientMessage::Unsubscribe { topics } => {
            WsMessageMetrics::record_unsubscribe();
            for topic in &topics {
                state.registry.unsubscribe(&handle.user_id, topic);
            }
            tracing::info!(
                connection_id = %handle.id,
                topics = ?topics,
                "Unsubscribed from topics"
            );
            let _ = handle.send(ServerMessage::unsubscribed(topics)).await;
        }
        ClientMessage::SyncRequest {
            sync_type,
            last_sync_time,
        } => {
            WsMessageMetrics::record_sync();
            match state
                .sync
                .fetch(&sync_type, &handle.user_id, last_sync_time)
                .await
            {
                Ok(updates) => {
                    let _ = handle
                        .send(ServerMessage::sync_response(sync_type, updates))
                        .await;
                }
                Err(e) => {
                    state.diagnostics.record(
                        ErrorClass::Handler,
                        format!(
                            "sync {} failed for user {}: {}",
                            sync_type, handle.user_id, e
                        ),
                    );
                    tracing::warn!(
                        connection_id = %handle.id,
                        sync_type = %sync_type,
                        error = %e,
                        "Sync request failed"
                    );
                    let _ = handle.send(ServerMessage::error("Sync failed")).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_token_from_query() {
        let query = WsQuery {
            token: Some("query-token".to_string()),
        };
        let headers = HeaderMap::new();

        assert_eq!(
            extract_token(&query, &headers),
            Some("query-token".to_string())
        );
    }

    #[test]
    fn test_extract_token_from_bearer_header() {
        let query = WsQuery { token: None };
        let headers = headers_with_auth("Bearer header-token");

        assert_eq!(
            extract_token(&query, &headers),
            Some("header-token".to_string())
        );
    }

    #[test]
    fn test_query_token_wins_over_header() {
        let query = WsQuery {
            token: Some("query-token".to_string()),
        };
        let headers = headers_with_auth("Bearer header-token");

        assert_eq!(
            extract_token(&query, &headers),
            Some("query-token".to_string())
        );
    }

    #[test]
    fn test_extract_token_missing() {
        let query = WsQuery { token: None };

        assert_eq!(extract_token(&query, &HeaderMap::new()), None);
        // Non-bearer schemes are not accepted
        assert_eq!(
            extract_token(&query, &headers_with_auth("Basic dXNlcjpwdw==")),
            None
        );
    }
}
