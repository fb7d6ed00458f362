//! Stream Session
//!
//! Wires a [`StreamConnection`] into an [`AdaptiveBatchScheduler`] and keeps
//! the published [`SessionState`] in step with both.
//!
//! # Execution Model
//!
//! Each `start()` spawns one driver task. The driver is the only place where
//! connection events, flush ticks and the session deadline are handled, one
//! at a time:
//!
//! ```text
//!  connection task ──events──►┐
//!  flush deadline  ──────────►├─ driver ──► Core (state, scheduler) ──► pending ──► callbacks
//!  session deadline ─────────►┘
//! ```
//!
//! Consumer callbacks are never invoked while the core is locked. Outbound
//! work is queued in `pending` and dispatched one item at a time under a
//! re-entrant dispatch lock, so callbacks are serialized and a callback may
//! call `stop()`, `retry()` or `start()` on the same session.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use super::options::{
    CompleteCallback, ErrorCallback, SessionDefaults, SessionOptions, TokenCallback,
};
use super::state::{ConnectionQuality, SessionState};
use crate::batch::{AdaptiveBatchScheduler, BatchSink, FlushPriority};
use crate::connection::{
    ConnectionEvent, ConnectionState, ConnectionStats, DefaultClassifier, ErrorClassifier,
    FrameParser, JsonFrameParser, SharedHeaders, StreamConnection, StreamTransport,
};
use crate::error::StreamError;
use crate::telemetry::{
    SessionId, TelemetryEvent, TelemetrySink, TracingTelemetry, CATEGORY_CONNECTION,
    CATEGORY_STREAMING,
};

// ============================================================================
// Session Handle
// ============================================================================

/// Control surface for one stream at a time
///
/// Cheap to clone; clones control the same session.
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn StreamTransport>,
    parser: Arc<dyn FrameParser>,
    classifier: Arc<dyn ErrorClassifier>,
    telemetry: Arc<dyn TelemetrySink>,
    defaults: SessionDefaults,
    state_tx: Arc<watch::Sender<SessionState>>,
    dispatch: Arc<ReentrantMutex<()>>,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    active: Option<ActiveSession>,
    last_options: Option<SessionOptions>,
}

struct ActiveSession {
    id: SessionId,
    headers: SharedHeaders,
    core: Arc<Mutex<Core>>,
    callbacks: Callbacks,
    driver: JoinHandle<()>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Teardown {
    Flush,
    Discard,
}

impl StreamSession {
    /// Create a session over `transport` with default settings
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self::builder(transport).build()
    }

    /// Start configuring a session
    pub fn builder(transport: Arc<dyn StreamTransport>) -> StreamSessionBuilder {
        StreamSessionBuilder {
            transport,
            parser: Arc::new(JsonFrameParser::new()),
            classifier: Arc::new(DefaultClassifier::new()),
            telemetry: Arc::new(TracingTelemetry),
            defaults: SessionDefaults::default(),
        }
    }

    /// Begin streaming
    ///
    /// Stops (and flushes) any session already running first. Returns
    /// immediately; progress is reported through the callbacks and
    /// [`subscribe`](Self::subscribe). Must be called within a tokio runtime.
    pub fn start(&self, options: SessionOptions) -> SessionId {
        self.stop();

        let id = SessionId::new();
        let resolved = self.inner.defaults.resolve(&options);
        let callbacks = Callbacks::from(&options);

        let (connection, events) = StreamConnection::new(Arc::clone(&self.inner.transport));
        let connection = connection
            .with_parser(Arc::clone(&self.inner.parser))
            .with_classifier(Arc::clone(&self.inner.classifier));

        let priority = resolved.batch.priority;
        let core = Core {
            id,
            connection,
            scheduler: AdaptiveBatchScheduler::new(resolved.batch, BatchCollector::default()),
            state: SessionState::starting(id),
            pending: VecDeque::new(),
            timeout: resolved.timeout,
            finished: false,
            telemetry: Arc::clone(&self.inner.telemetry),
            state_tx: Arc::clone(&self.inner.state_tx),
        };
        let core = Arc::new(Mutex::new(core));

        info!(
            session = %id,
            url = %options.url,
            timeout_secs = resolved.timeout.as_secs(),
            "Starting stream session"
        );
        {
            let mut core = core.lock();
            core.publish();
            core.connection.open(resolved.connection);
        }

        let driver = Driver {
            core: Arc::clone(&core),
            events,
            callbacks: callbacks.clone(),
            dispatch: Arc::clone(&self.inner.dispatch),
            priority,
            deadline: deadline_after(resolved.timeout),
        };
        let driver = tokio::spawn(driver.run());

        let displaced = {
            let mut control = self.inner.control.lock();
            control.last_options = Some(options.clone());
            control.active.replace(ActiveSession {
                id,
                headers: options.headers,
                core,
                callbacks,
                driver,
            })
        };
        if let Some(displaced) = displaced {
            self.teardown(displaced, Teardown::Flush);
        }

        id
    }

    /// Stop streaming, delivering any buffered tokens first
    ///
    /// Cancels pending reconnects and closes the transport. Idempotent, and
    /// safe to call from inside a callback.
    pub fn stop(&self) {
        let active = self.inner.control.lock().active.take();
        if let Some(active) = active {
            self.teardown(active, Teardown::Flush);
        }
    }

    /// Like [`stop`](Self::stop) but buffered tokens are discarded
    pub fn abort(&self) {
        let active = self.inner.control.lock().active.take();
        if let Some(active) = active {
            self.teardown(active, Teardown::Discard);
        }
    }

    /// Stop, then start again with the last-used options
    ///
    /// Returns `None` if the session was never started.
    pub fn retry(&self) -> Option<SessionId> {
        let options = self.inner.control.lock().last_options.clone()?;
        info!(url = %options.url, "Retrying stream session");
        Some(self.start(options))
    }

    /// Live connection stats, or the last known ones when idle
    #[must_use]
    pub fn get_stats(&self) -> ConnectionStats {
        let core = self
            .inner
            .control
            .lock()
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.core));
        match core {
            Some(core) => core.lock().connection.stats(),
            None => self.inner.state_tx.borrow().stats.clone(),
        }
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Observe every published state snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Every published state snapshot as a stream
    ///
    /// Yields the current snapshot first.
    #[must_use]
    pub fn updates(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.inner.state_tx.subscribe())
    }

    /// Headers of the running session, for credential refresh
    #[must_use]
    pub fn headers(&self) -> Option<SharedHeaders> {
        self.inner
            .control
            .lock()
            .active
            .as_ref()
            .map(|active| active.headers.clone())
    }

    /// ID of the current session, if one was started and not stopped
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner
            .control
            .lock()
            .active
            .as_ref()
            .map(|active| active.id)
    }

    /// Between `start()` and a terminal event or `stop()`
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.inner.state_tx.borrow().is_streaming
    }

    /// Connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().is_connected()
    }

    /// Latest progress percentage, 0-100
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.inner.state_tx.borrow().progress
    }

    /// Remaining time as `"Ns"` / `"Mm Ss"`, or `"—"` when unknown
    #[must_use]
    pub fn estimated_time_remaining(&self) -> String {
        self.inner.state_tx.borrow().estimated_time_remaining()
    }

    /// Health of the current connection
    #[must_use]
    pub fn connection_quality(&self) -> ConnectionQuality {
        self.inner.state_tx.borrow().connection_quality()
    }

    fn teardown(&self, active: ActiveSession, mode: Teardown) {
        active.driver.abort();

        {
            let mut core = active.core.lock();
            core.connection.close();
            core.pending.retain(|item| matches!(item, Outbound::Tokens(_)));
            match mode {
                Teardown::Flush => {
                    core.scheduler.flush();
                    core.collect_batches();
                }
                Teardown::Discard => {
                    core.pending.clear();
                    core.scheduler.clear();
                }
            }

            core.finished = true;
            let stats = core.connection.stats();
            let state = &mut core.state;
            state.is_streaming = false;
            state.is_connecting = false;
            state.is_reconnecting = false;
            state.connection_state = ConnectionState::Disconnected;
            state.stats = stats;
            core.publish();

            info!(
                session = %active.id,
                mode = ?mode,
                tokens_processed = core.state.tokens_processed,
                "Stream session stopped"
            );
        }

        dispatch(&self.inner.dispatch, &active.core, &active.callbacks);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(active) = self.control.get_mut().active.take() {
            active.driver.abort();
            active.core.lock().connection.close();
        }
    }
}

/// Builder for [`StreamSession`]
pub struct StreamSessionBuilder {
    transport: Arc<dyn StreamTransport>,
    parser: Arc<dyn FrameParser>,
    classifier: Arc<dyn ErrorClassifier>,
    telemetry: Arc<dyn TelemetrySink>,
    defaults: SessionDefaults,
}

impl StreamSessionBuilder {
    /// Defaults merged under every `start()`
    #[must_use]
    pub fn defaults(mut self, defaults: SessionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Wire frame parser
    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn FrameParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Fatal-error classifier
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Telemetry destination
    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Finish building the session
    pub fn build(self) -> StreamSession {
        let (state_tx, _) = watch::channel(SessionState::default());
        StreamSession {
            inner: Arc::new(Inner {
                transport: self.transport,
                parser: self.parser,
                classifier: self.classifier,
                telemetry: self.telemetry,
                defaults: self.defaults,
                state_tx: Arc::new(state_tx),
                dispatch: Arc::new(ReentrantMutex::new(())),
                control: Mutex::new(Control::default()),
            }),
        }
    }
}

// ============================================================================
// Core
// ============================================================================

/// Collects batches delivered by the scheduler
#[derive(Debug, Default)]
struct BatchCollector {
    batches: Vec<Vec<String>>,
}

impl BatchSink<String> for BatchCollector {
    fn deliver(&mut self, batch: Vec<String>) {
        self.batches.push(batch);
    }
}

/// Work for the consumer, queued in delivery order
#[derive(Debug)]
enum Outbound {
    Tokens(String),
    Complete(Value),
    Error(StreamError),
}

/// Consumer callbacks of one session
#[derive(Clone)]
struct Callbacks {
    on_token: Option<TokenCallback>,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

impl From<&SessionOptions> for Callbacks {
    fn from(options: &SessionOptions) -> Self {
        Self {
            on_token: options.on_token.clone(),
            on_complete: options.on_complete.clone(),
            on_error: options.on_error.clone(),
        }
    }
}

/// State owned by one session run
struct Core {
    id: SessionId,
    connection: StreamConnection,
    scheduler: AdaptiveBatchScheduler<String, BatchCollector>,
    state: SessionState,
    pending: VecDeque<Outbound>,
    timeout: Duration,
    finished: bool,
    telemetry: Arc<dyn TelemetrySink>,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl Core {
    /// Apply one connection event
    fn handle_event(&mut self, event: ConnectionEvent) {
        let state = &mut self.state;
        match event {
            ConnectionEvent::Connecting => {
                state.is_connecting = true;
                state.connection_state = ConnectionState::Connecting;
            }
            ConnectionEvent::Open => {
                state.is_connecting = false;
                state.is_reconnecting = false;
                state.connection_state = ConnectionState::Connected;
                state.error = None;
            }
            ConnectionEvent::Reconnecting(info) => {
                state.is_connecting = false;
                state.is_reconnecting = true;
                state.connection_state = ConnectionState::Reconnecting;
                self.telemetry.record(
                    TelemetryEvent::new(self.id, CATEGORY_CONNECTION, "reconnect_attempt")
                        .with_value(info.attempt)
                        .with_meta("max_attempts", info.max_attempts)
                        .with_meta("delay_ms", info.delay.as_millis() as u64)
                        .with_meta("reason", info.reason.to_string()),
                );
            }
            ConnectionEvent::Reconnected { count } => {
                state.is_reconnecting = false;
                state.connection_state = ConnectionState::Connected;
                self.telemetry.record(
                    TelemetryEvent::new(self.id, CATEGORY_CONNECTION, "reconnected")
                        .with_value(count),
                );
            }
            ConnectionEvent::Token(text) => self.scheduler.enqueue(text),
            ConnectionEvent::Metadata(metadata) => {
                if let Some(estimated) = metadata.estimated_duration {
                    state.estimated_time = Some(estimated);
                }
                state.metadata = Some(metadata);
            }
            ConnectionEvent::Progress { percent, estimated } => {
                state.progress = percent;
                if estimated.is_some() {
                    state.estimated_time = estimated;
                }
            }
            ConnectionEvent::FrameSkipped(e) => {
                self.telemetry.record(
                    TelemetryEvent::new(self.id, CATEGORY_STREAMING, "frame_skipped")
                        .with_meta("error", e.to_string()),
                );
            }
            ConnectionEvent::Error(e) => self.fail(e),
            ConnectionEvent::Done(payload) => self.complete(payload),
        }
    }

    /// Flush tick
    fn tick(&mut self) -> usize {
        let delivered = self.scheduler.tick();
        self.collect_batches();
        delivered
    }

    /// Terminal success
    fn complete(&mut self, payload: Value) {
        self.scheduler.flush();
        self.collect_batches();

        self.finished = true;
        let state = &mut self.state;
        state.is_streaming = false;
        state.is_connecting = false;
        state.is_reconnecting = false;
        state.progress = 100.0;
        state.connection_state = ConnectionState::Disconnected;

        info!(
            session = %self.id,
            tokens_processed = state.tokens_processed,
            "Stream session complete"
        );
        self.telemetry.record(
            TelemetryEvent::new(self.id, CATEGORY_STREAMING, "complete")
                .with_value(state.tokens_processed as f64),
        );
        self.pending.push_back(Outbound::Complete(payload));
    }

    /// Terminal failure; buffered tokens are delivered before the error
    fn fail(&mut self, error: StreamError) {
        self.scheduler.flush();
        self.collect_batches();

        self.finished = true;
        let state = &mut self.state;
        state.is_streaming = false;
        state.is_connecting = false;
        state.is_reconnecting = false;
        state.connection_state = ConnectionState::Error;
        state.error = Some(error.clone());

        warn!(session = %self.id, error = %error, kind = ?error.kind(), "Stream session failed");
        self.telemetry.record(
            TelemetryEvent::new(self.id, CATEGORY_STREAMING, "error")
                .with_meta("error", error.to_string())
                .with_meta("kind", format!("{:?}", error.kind())),
        );
        self.pending.push_back(Outbound::Error(error));
    }

    /// Session deadline passed without a terminal event
    fn time_out(&mut self) {
        self.connection.close();
        self.telemetry.record(
            TelemetryEvent::new(self.id, CATEGORY_STREAMING, "timeout")
                .with_value(self.timeout.as_millis() as f64),
        );
        self.fail(StreamError::Timeout {
            after: self.timeout,
        });
    }

    /// Move scheduler output into the outbound queue
    fn collect_batches(&mut self) {
        let batches = std::mem::take(&mut self.scheduler.sink_mut().batches);
        let interval_ms = self.scheduler.interval().as_millis() as u64;
        for batch in batches {
            let items = batch.len();
            self.state.tokens_processed += items as u64;
            self.telemetry.record(
                TelemetryEvent::new(self.id, CATEGORY_STREAMING, "batch_delivered")
                    .with_value(items as f64)
                    .with_meta("interval_ms", interval_ms),
            );
            debug!(session = %self.id, items, "Batch delivered");
            self.pending.push_back(Outbound::Tokens(batch.concat()));
        }
    }

    /// Refresh stats and publish the snapshot
    fn publish(&mut self) {
        self.state.stats = self.connection.stats();
        self.state_tx.send_replace(self.state.clone());
    }
}

/// Deliver queued outbound work, one item at a time
fn dispatch(lock: &ReentrantMutex<()>, core: &Mutex<Core>, callbacks: &Callbacks) {
    let _turn = lock.lock();
    loop {
        let Some(item) = core.lock().pending.pop_front() else {
            break;
        };
        match item {
            Outbound::Tokens(text) => {
                if let Some(on_token) = &callbacks.on_token {
                    on_token(&text);
                }
            }
            Outbound::Complete(payload) => {
                if let Some(on_complete) = &callbacks.on_complete {
                    on_complete(&payload);
                }
            }
            Outbound::Error(error) => {
                if let Some(on_error) = &callbacks.on_error {
                    on_error(&error);
                }
            }
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Furthest deadline the driver waits for; longer timeouts are clamped to it
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, clamped so huge timeouts never overflow `Instant`
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now)
}

enum Wake {
    Event(Option<ConnectionEvent>),
    Tick,
    Deadline,
}

struct Driver {
    core: Arc<Mutex<Core>>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    callbacks: Callbacks,
    dispatch: Arc<ReentrantMutex<()>>,
    priority: FlushPriority,
    deadline: Instant,
}

impl Driver {
    async fn run(mut self) {
        let mut last_tick = Instant::now();

        loop {
            let interval = self.core.lock().scheduler.interval();
            let flush_at = last_tick + interval;

            let wake = match self.priority {
                FlushPriority::High => tokio::select! {
                    biased;
                    _ = sleep_until(flush_at) => Wake::Tick,
                    _ = sleep_until(self.deadline) => Wake::Deadline,
                    event = self.events.recv() => Wake::Event(event),
                },
                FlushPriority::Normal => tokio::select! {
                    event = self.events.recv() => Wake::Event(event),
                    _ = sleep_until(flush_at) => Wake::Tick,
                    _ = sleep_until(self.deadline) => Wake::Deadline,
                },
            };

            let _turn = self.dispatch.lock();
            {
                let mut core = self.core.lock();
                if core.finished {
                    return;
                }

                match wake {
                    Wake::Tick => {
                        last_tick = Instant::now();
                        if core.tick() == 0 {
                            continue;
                        }
                    }
                    Wake::Deadline => core.time_out(),
                    Wake::Event(Some(event)) => core.handle_event(event),
                    Wake::Event(None) => core.fail(StreamError::ConnectionLost),
                }
                core.publish();
            }

            dispatch(&self.dispatch, &self.core, &self.callbacks);

            if self.core.lock().finished {
                return;
            }
        }
    }
}
