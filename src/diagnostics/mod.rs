//! Gateway fault bookkeeping.
//!
//! Every contained fault is classified, counted in Prometheus and kept in a small
//! in-memory ring so `/stats` can show what went wrong recently without log access.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::metrics::ErrorMetrics;

const DEFAULT_RECENT_CAPACITY: usize = 16;

/// Fault classes the gateway contains without dropping the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Handshake rejected before upgrade
    Authentication,
    /// Unparseable or malformed client frame
    Protocol,
    /// A dispatch handler (sync provider, subscription bookkeeping) failed
    Handler,
    /// Socket-level send/receive failure
    Transport,
    /// Internal fault reported to all connected clients
    Server,
    /// Reconnection cycle ran out of attempts
    ReconnectExhausted,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Authentication => "authentication",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Handler => "handler",
            ErrorClass::Transport => "transport",
            ErrorClass::Server => "server",
            ErrorClass::ReconnectExhausted => "reconnect_exhausted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub class: ErrorClass,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Bounded ring of the most recent gateway faults.
///
/// Recording is fire-and-forget: the class counter is incremented and the record
/// displaces the oldest entry once the ring is full.
pub struct ErrorTracker {
    recent: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl ErrorTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, class: ErrorClass, message: impl Into<String>) {
        ErrorMetrics::record(class.as_str());

        let record = ErrorRecord {
            class,
            message: message.into(),
            occurred_at: Utc::now(),
        };

        let mut recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    /// Most recent faults, newest first.
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

/// Read-only view of gateway state for the diagnostics surface.
#[derive(Debug, Serialize)]
pub struct GatewaySnapshot {
    pub connections: usize,
    pub topics: usize,
    pub reconnect_attempts: HashMap<String, u32>,
    pub recent_errors: Vec<ErrorRecord>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_keeps_newest_within_capacity() {
        let tracker = ErrorTracker::new(3);
        for i in 0..5 {
            tracker.record(ErrorClass::Protocol, format!("frame {}", i));
        }

        let recent = tracker.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "frame 4");
        assert_eq!(recent[2].message, "frame 2");
    }

    #[test]
    fn test_tracker_records_class() {
        let tracker = ErrorTracker::default();
        tracker.record(ErrorClass::Transport, "send failed");

        let recent = tracker.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].class, ErrorClass::Transport);
    }

    #[test]
    fn test_class_labels_are_stable() {
        assert_eq!(ErrorClass::Authentication.as_str(), "authentication");
        assert_eq!(ErrorClass::ReconnectExhausted.as_str(), "reconnect_exhausted");
    }
}
