//! Stream Connection
//!
//! Owns one logical connection to a streaming endpoint and keeps it alive.
//!
//! # State Machine
//!
//! ```text
//!                open()
//! Disconnected ─────────► Connecting ──────► Connected ──── done / close() ───► Disconnected
//!                             ▲    │              │
//!                   delay     │    │ fatal        │ unexpected drop
//!                             │    ▼              ▼
//!                        Reconnecting ◄───────────┘
//!                             │
//!                             │ attempts exhausted / fatal
//!                             ▼
//!                           Error  (terminal until the next open())
//! ```
//!
//! All work happens in one spawned task per `open()`. Outcomes are reported
//! as [`ConnectionEvent`]s on the channel returned by [`StreamConnection::new`];
//! events from one task are delivered in the order they were raised.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, BackoffConfig};
use super::classifier::{DefaultClassifier, ErrorClass, ErrorClassifier};
use super::frame::{Frame, FrameParser, JsonFrameParser, LineDecoder, StreamingMetadata};
use super::state::{ConnectionState, ConnectionStats, StatsTracker};
use super::transport::{ByteStream, SharedHeaders, StreamTransport};
use crate::error::{FrameParseError, StreamError, TransportError};

// ============================================================================
// Configuration
// ============================================================================

/// Parameters for one `open()` call
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Streaming endpoint
    pub url: String,
    /// Headers re-read on every attempt
    pub headers: SharedHeaders,
    /// Whether drops are retried at all
    pub reconnect: bool,
    /// Retries allowed after a failure (0 disables auto-reconnect)
    pub max_reconnect_attempts: u32,
    /// Delay schedule between retries
    pub backoff: BackoffConfig,
}

impl ConnectionConfig {
    /// Config for `url` with default reconnect behaviour
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: SharedHeaders::default(),
            reconnect: true,
            max_reconnect_attempts: 5,
            backoff: BackoffConfig::default(),
        }
    }

    /// Set the shared headers
    #[must_use]
    pub fn with_headers(mut self, headers: SharedHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the backoff schedule
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

// ============================================================================
// Events
// ============================================================================

/// Details of a scheduled retry
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectInfo {
    /// 1-based attempt number about to be made
    pub attempt: u32,
    /// Retry budget
    pub max_attempts: u32,
    /// Wait before the attempt
    pub delay: Duration,
    /// What went wrong
    pub reason: TransportError,
}

/// Lifecycle and data events raised by a connection
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt started
    Connecting,
    /// Stream opened (fired once per successful connect or reconnect)
    Open,
    /// A drop or failed attempt scheduled a retry
    Reconnecting(ReconnectInfo),
    /// A retry succeeded after an earlier connection dropped
    Reconnected {
        /// Total reconnects on this connection
        count: u32,
    },
    /// One token-frame, in arrival order
    Token(String),
    /// Job metadata
    Metadata(StreamingMetadata),
    /// Progress report
    Progress {
        /// Percentage 0-100
        percent: f64,
        /// Estimated total job time
        estimated: Option<Duration>,
    },
    /// A malformed frame was skipped
    FrameSkipped(FrameParseError),
    /// Terminal failure; nothing follows
    Error(StreamError),
    /// Terminal success; nothing follows
    Done(Value),
}

impl ConnectionEvent {
    /// Whether no further events follow this one
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done(_))
    }
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Debug, Default)]
struct Shared {
    state: ConnectionState,
    stats: StatsTracker,
}

/// A self-healing streaming connection
pub struct StreamConnection {
    transport: Arc<dyn StreamTransport>,
    parser: Arc<dyn FrameParser>,
    classifier: Arc<dyn ErrorClassifier>,
    shared: Arc<Mutex<Shared>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    /// Create a connection over `transport`
    ///
    /// Returns the connection and the receiver its events are delivered on.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Self {
            transport,
            parser: Arc::new(JsonFrameParser::new()),
            classifier: Arc::new(DefaultClassifier::new()),
            shared: Arc::new(Mutex::new(Shared::default())),
            events_tx,
            task: None,
        };
        (connection, events_rx)
    }

    /// Replace the wire frame parser
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn FrameParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Replace the fatal-error classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Start connecting; outcomes arrive as events
    ///
    /// Calling `open()` on a running connection closes it first.
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self, config: ConnectionConfig) {
        self.close();

        info!(
            url = %config.url,
            transport = self.transport.name(),
            max_reconnect_attempts = config.max_reconnect_attempts,
            "Opening stream connection"
        );

        let worker = Worker {
            transport: Arc::clone(&self.transport),
            parser: Arc::clone(&self.parser),
            classifier: Arc::clone(&self.classifier),
            shared: Arc::clone(&self.shared),
            events: self.events_tx.clone(),
            backoff: Backoff::new(config.backoff.clone()),
            config,
        };
        self.task = Some(tokio::spawn(worker.run()));
    }

    /// Stop the connection and any pending reconnect timer
    ///
    /// Idempotent. No events are emitted after `close()` returns.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let mut shared = self.shared.lock();
        if shared.state != ConnectionState::Disconnected {
            debug!(from = %shared.state, "Closing stream connection");
            shared.stats.mark_disconnected();
            if shared.state != ConnectionState::Error {
                shared.state = ConnectionState::Disconnected;
            }
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Snapshot of the statistics
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.shared.lock().stats.snapshot()
    }

    /// Whether a connection task is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// How one established stream ended
enum StreamEnd {
    Done(Value),
    ServerError(String),
    Dropped(TransportError),
    ReceiverGone,
}

struct Worker {
    transport: Arc<dyn StreamTransport>,
    parser: Arc<dyn FrameParser>,
    classifier: Arc<dyn ErrorClassifier>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    config: ConnectionConfig,
    backoff: Backoff,
}

impl Worker {
    async fn run(mut self) {
        // Set once a connection has been established and then lost
        let mut dropped_before = false;

        loop {
            self.set_state(ConnectionState::Connecting);
            if !self.emit(ConnectionEvent::Connecting) {
                return;
            }

            let headers = self.config.headers.snapshot();
            let failure = match self.transport.connect(&self.config.url, &headers).await {
                Ok(stream) => {
                    let reconnect_count = {
                        let mut shared = self.shared.lock();
                        shared.state = ConnectionState::Connected;
                        shared.stats.mark_connected();
                        dropped_before.then(|| shared.stats.record_reconnect())
                    };
                    self.backoff.reset();
                    info!(url = %self.config.url, "Stream connected");

                    if !self.emit(ConnectionEvent::Open) {
                        return;
                    }
                    if let Some(count) = reconnect_count {
                        info!(reconnect_count = count, "Stream reconnected");
                        if !self.emit(ConnectionEvent::Reconnected { count }) {
                            return;
                        }
                    }

                    match self.pump(stream).await {
                        StreamEnd::Done(payload) => {
                            self.finish(ConnectionState::Disconnected, None);
                            info!("Stream completed");
                            self.emit(ConnectionEvent::Done(payload));
                            return;
                        }
                        StreamEnd::ServerError(message) => {
                            let error = StreamError::Server { message };
                            self.finish(ConnectionState::Error, Some(error.clone()));
                            warn!(error = %error, "Server reported an error");
                            self.emit(ConnectionEvent::Error(error));
                            return;
                        }
                        StreamEnd::ReceiverGone => return,
                        StreamEnd::Dropped(e) => {
                            self.shared.lock().stats.mark_disconnected();
                            dropped_before = true;
                            warn!(error = %e, "Stream dropped");
                            e
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, attempt = self.backoff.attempt(), "Connect attempt failed");
                    e
                }
            };

            if self.classifier.classify(&failure) == ErrorClass::Fatal {
                let error = StreamError::Fatal(failure);
                self.finish(ConnectionState::Error, Some(error.clone()));
                warn!(error = %error, "Fatal connection error, not retrying");
                self.emit(ConnectionEvent::Error(error));
                return;
            }

            self.shared
                .lock()
                .stats
                .record_error(StreamError::Transport(failure.clone()));

            let attempts = self.backoff.attempt();
            if !self.config.reconnect || attempts >= self.config.max_reconnect_attempts {
                let error = StreamError::ReconnectExhausted {
                    attempts,
                    last: failure,
                };
                self.set_state(ConnectionState::Error);
                warn!(attempts, "Reconnect attempts exhausted");
                self.emit(ConnectionEvent::Error(error));
                return;
            }

            let delay = self.backoff.next_delay();
            let info = ReconnectInfo {
                attempt: self.backoff.attempt(),
                max_attempts: self.config.max_reconnect_attempts,
                delay,
                reason: failure,
            };
            self.set_state(ConnectionState::Reconnecting);
            info!(
                attempt = info.attempt,
                max_attempts = info.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            if !self.emit(ConnectionEvent::Reconnecting(info)) {
                return;
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Read frames until the stream ends
    async fn pump(&self, mut stream: ByteStream) -> StreamEnd {
        let mut decoder = LineDecoder::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    decoder.push(&bytes);
                    while let Some(line) = decoder.next_line() {
                        if let Some(end) = self.handle_line(&line) {
                            return end;
                        }
                    }
                }
                Err(e) => return StreamEnd::Dropped(e),
            }
        }

        if let Some(line) = decoder.finish() {
            if let Some(end) = self.handle_line(&line) {
                return end;
            }
        }
        StreamEnd::Dropped(TransportError::Closed)
    }

    /// Dispatch one line; returns `Some` when the stream should stop
    fn handle_line(&self, line: &str) -> Option<StreamEnd> {
        let event = match self.parser.parse(line) {
            Ok(None) => return None,
            Ok(Some(frame)) => {
                self.shared.lock().stats.record_message();
                match frame {
                    Frame::Token(text) => ConnectionEvent::Token(text),
                    Frame::Metadata(metadata) => ConnectionEvent::Metadata(metadata),
                    Frame::Progress { percent, estimated } => {
                        ConnectionEvent::Progress { percent, estimated }
                    }
                    Frame::Done(payload) => return Some(StreamEnd::Done(payload)),
                    Frame::Error(message) => return Some(StreamEnd::ServerError(message)),
                }
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed frame");
                self.shared
                    .lock()
                    .stats
                    .record_error(StreamError::FrameParse(e.clone()));
                ConnectionEvent::FrameSkipped(e)
            }
        };

        if self.emit(event) {
            None
        } else {
            Some(StreamEnd::ReceiverGone)
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.lock().state = state;
    }

    /// Move to a terminal state, closing out uptime
    fn finish(&self, state: ConnectionState, error: Option<StreamError>) {
        let mut shared = self.shared.lock();
        shared.stats.mark_disconnected();
        if let Some(error) = error {
            shared.stats.record_error(error);
        }
        shared.state = state;
    }

    /// Send an event; false once nobody is listening
    fn emit(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
