//! Session Telemetry
//!
//! Sessions report notable moments as [`TelemetryEvent`]s
//! (`category`/`action`/`value`/`metadata`) to a [`TelemetrySink`]. Where the
//! events end up is the sink's business; the engine only emits them.
//!
//! | Category     | Action               | Value              |
//! |--------------|----------------------|--------------------|
//! | `streaming`  | `batch_delivered`    | items in the batch |
//! | `streaming`  | `frame_skipped`      |                    |
//! | `streaming`  | `complete`           | tokens processed   |
//! | `streaming`  | `error`              |                    |
//! | `streaming`  | `timeout`            | timeout in ms      |
//! | `connection` | `reconnect_attempt`  | attempt number     |
//! | `connection` | `reconnected`        | reconnect count    |

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Category for streaming events
pub const CATEGORY_STREAMING: &str = "streaming";
/// Category for connection events
pub const CATEGORY_CONNECTION: &str = "connection";

/// Unique identifier for one `start()` of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One telemetry record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryEvent {
    /// Event group (`streaming`, `connection`)
    pub category: &'static str,
    /// What happened
    pub action: &'static str,
    /// Optional numeric value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Free-form context; always carries `session_id`
    pub metadata: Map<String, Value>,
    /// When the event was raised
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Create an event tagged with `session`
    #[must_use]
    pub fn new(session: SessionId, category: &'static str, action: &'static str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("session_id".to_string(), Value::String(session.0.to_string()));
        Self {
            category,
            action,
            value: None,
            metadata,
            timestamp: Utc::now(),
        }
    }

    /// Attach a numeric value
    #[must_use]
    pub fn with_value(mut self, value: impl Into<f64>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attach one metadata entry
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for telemetry events
///
/// Called from the session's driver task; implementations must not block.
pub trait TelemetrySink: Send + Sync {
    /// Record one event
    fn record(&self, event: TelemetryEvent);
}

/// Emits every event as a structured `tracing` event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        let metadata = Value::Object(event.metadata);
        tracing::debug!(
            target: "tokenflow::telemetry",
            category = event.category,
            action = event.action,
            value = event.value,
            metadata = %metadata,
            "telemetry"
        );
    }
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// `(category, action)` pairs in recording order
    #[must_use]
    pub fn actions(&self) -> Vec<(&'static str, &'static str)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.category, e.action))
            .collect()
    }

    /// Events with the given action
    #[must_use]
    pub fn with_action(&self, action: &str) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
