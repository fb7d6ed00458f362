//! Session State
//!
//! The observable aggregate published by a [`StreamSession`](super::StreamSession)
//! and the views derived from it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::connection::{ConnectionState, ConnectionStats, StreamingMetadata};
use crate::error::StreamError;
use crate::telemetry::SessionId;

/// Rendered when no time estimate is available
pub const NO_ESTIMATE: &str = "—";

/// Snapshot of one streaming session
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionState {
    /// Session this snapshot belongs to (`None` before the first start)
    pub session_id: Option<SessionId>,
    /// Between `start()` and a terminal event or `stop()`
    pub is_streaming: bool,
    /// A connect attempt is in flight
    pub is_connecting: bool,
    /// Waiting to retry after a failure
    pub is_reconnecting: bool,
    /// Latest state reported by the connection
    pub connection_state: ConnectionState,
    /// Progress percentage, 0-100
    pub progress: f64,
    /// Total job time estimated by the server
    pub estimated_time: Option<Duration>,
    /// Tokens handed to the consumer
    pub tokens_processed: u64,
    /// Latest metadata-frame
    pub metadata: Option<StreamingMetadata>,
    /// Terminal error, if the session failed
    pub error: Option<StreamError>,
    /// Latest connection statistics
    pub stats: ConnectionStats,
    /// Wall-clock start time
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) started: Option<Instant>,
}

impl SessionState {
    /// Fresh state for a session that is starting now
    pub(crate) fn starting(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            is_streaming: true,
            started_at: Some(Utc::now()),
            started: Some(Instant::now()),
            ..Self::default()
        }
    }

    /// Connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Health classification of the connection
    #[must_use]
    pub fn connection_quality(&self) -> ConnectionQuality {
        ConnectionQuality::classify(self.connection_state, &self.stats)
    }

    /// `estimated_time - elapsed`, floored at zero
    ///
    /// `None` when not streaming or when no estimate has been received.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        if !self.is_streaming {
            return None;
        }
        let estimate = self.estimated_time?;
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        Some(estimate.saturating_sub(elapsed))
    }

    /// [`remaining`](Self::remaining) rendered as `"Ns"` / `"Mm Ss"`
    #[must_use]
    pub fn estimated_time_remaining(&self) -> String {
        format_remaining(self.remaining())
    }
}

/// Render a remaining duration as `"Ns"` or `"Mm Ss"`
///
/// Partial seconds round up so a nearly finished job never reads `0s` early.
#[must_use]
pub fn format_remaining(remaining: Option<Duration>) -> String {
    let Some(remaining) = remaining else {
        return NO_ESTIMATE.to_string();
    };
    let secs = remaining.as_millis().div_ceil(1000);
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Coarse connection health
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// Connected with no errors or reconnects
    Excellent,
    /// Connected with few errors and at most one reconnect
    Good,
    /// Connected but struggling
    Poor,
    /// Not connected
    Disconnected,
}

impl ConnectionQuality {
    /// Classify a connection state and its stats
    #[must_use]
    pub fn classify(state: ConnectionState, stats: &ConnectionStats) -> Self {
        if state != ConnectionState::Connected {
            return Self::Disconnected;
        }
        match (stats.error_count, stats.reconnect_count) {
            (0, 0) => Self::Excellent,
            (errors, reconnects) if errors < 3 && reconnects < 2 => Self::Good,
            _ => Self::Poor,
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Poor => write!(f, "poor"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}
