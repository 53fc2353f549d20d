//! Session activity reporting boundary.

use crate::registry::ConnectionMeta;

/// Fire-and-forget observer of session lifecycle events.
///
/// The gateway never waits on this collaborator and ignores anything it does;
/// implementations that talk to a remote tracker should spawn their own work.
pub trait SessionObserver: Send + Sync {
    fn session_opened(&self, user_id: &str, meta: &ConnectionMeta);
    fn session_closed(&self, user_id: &str);
}

/// Used when no activity tracker is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionObserver;

impl SessionObserver for NoopSessionObserver {
    fn session_opened(&self, _user_id: &str, _meta: &ConnectionMeta) {}
    fn session_closed(&self, _user_id: &str) {}
}
