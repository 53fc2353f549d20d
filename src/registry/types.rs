//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::{OutboundFrame, ServerMessage};

/// Transport-level facts captured at upgrade time.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionMeta {
    pub fn new(user_agent: Option<String>, remote_addr: Option<String>) -> Self {
        Self {
            user_agent,
            remote_addr,
            connected_at: Utc::now(),
        }
    }
}

impl Default for ConnectionMeta {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Handle for a single WebSocket connection.
///
/// The `alive` flag is the two-state liveness machine: the heartbeat clears it
/// when probing and the recv loop sets it back on Pong. A connection found
/// already cleared at the next probe has missed one round and is reaped.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub meta: ConnectionMeta,
    sender: mpsc::Sender<OutboundFrame>,
    alive: AtomicBool,
}

impl ConnectionHandle {
    pub fn new(user_id: String, meta: ConnectionMeta, sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            meta,
            sender,
            alive: AtomicBool::new(true),
        }
    }

    /// Queue an envelope for this connection (serialized by the send task).
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundFrame>> {
        self.sender.send(OutboundFrame::Message(message)).await
    }

    /// Queue an already-built frame (pre-serialized fan-out payloads, control frames).
    pub async fn send_frame(
        &self,
        frame: OutboundFrame,
    ) -> Result<(), mpsc::error::SendError<OutboundFrame>> {
        self.sender.send(frame).await
    }

    /// Best-effort forced termination. A full queue means the peer is already
    /// stalled; the heartbeat reaps it on the next round.
    pub fn try_close(&self) {
        let _ = self.sender.try_send(OutboundFrame::Close);
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the liveness flag, returning whether the connection had answered
    /// since the previous probe.
    pub fn mark_suspect(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}
