//! Connection State and Statistics

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::StreamError;

/// Lifecycle state of a [`StreamConnection`](super::StreamConnection)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    /// No connection and nothing scheduled
    #[default]
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Stream is open and frames are flowing
    Connected,
    /// Connection dropped, waiting for the backoff delay
    Reconnecting,
    /// Terminal failure; only a new `open()` leaves this state
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Read-only snapshot of connection statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    /// When the current (or last) connection opened
    pub connected_at: Option<DateTime<Utc>>,
    /// When the last connection closed or dropped
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Successful re-opens after a drop
    pub reconnect_count: u32,
    /// Frames received across all connections
    pub message_count: u64,
    /// Failed attempts, drops and skipped frames
    pub error_count: u32,
    /// Most recent error
    pub last_error: Option<StreamError>,
    /// Length of the current connection, or of the last one once closed
    pub uptime: Duration,
}

/// Mutable bookkeeping behind [`ConnectionStats`]
///
/// Owned by the connection; only snapshots escape.
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    stats: ConnectionStats,
    connected_since: Option<Instant>,
}

impl StatsTracker {
    pub(crate) fn mark_connected(&mut self) {
        self.stats.connected_at = Some(Utc::now());
        self.stats.uptime = Duration::ZERO;
        self.connected_since = Some(Instant::now());
    }

    pub(crate) fn mark_disconnected(&mut self) {
        if let Some(since) = self.connected_since.take() {
            self.stats.uptime = since.elapsed();
            self.stats.disconnected_at = Some(Utc::now());
        }
    }

    pub(crate) fn record_reconnect(&mut self) -> u32 {
        self.stats.reconnect_count += 1;
        self.stats.reconnect_count
    }

    pub(crate) fn record_message(&mut self) {
        self.stats.message_count += 1;
    }

    pub(crate) fn record_error(&mut self, error: StreamError) {
        self.stats.error_count += 1;
        self.stats.last_error = Some(error);
    }

    /// Snapshot with `uptime` recomputed if still connected
    pub(crate) fn snapshot(&self) -> ConnectionStats {
        let mut stats = self.stats.clone();
        if let Some(since) = self.connected_since {
            stats.uptime = since.elapsed();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_tracks_connection() {
        let mut tracker = StatsTracker::default();
        tracker.mark_connected();

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(tracker.snapshot().uptime, Duration::from_millis(250));

        tracker.mark_disconnected();
        tokio::time::advance(Duration::from_millis(500)).await;

        let stats = tracker.snapshot();
        assert_eq!(stats.uptime, Duration::from_millis(250));
        assert!(stats.disconnected_at.is_some());
    }

    #[test]
    fn test_error_recording() {
        let mut tracker = StatsTracker::default();
        tracker.record_error(StreamError::Transport(TransportError::Closed));
        tracker.record_error(StreamError::Transport(TransportError::Status { status: 503 }));

        let stats = tracker.snapshot();
        assert_eq!(stats.error_count, 2);
        assert_eq!(
            stats.last_error,
            Some(StreamError::Transport(TransportError::Status { status: 503 }))
        );
    }
}
