//! Test Utilities
//!
//! Scripted transports for exercising connections and sessions without a
//! network.
//!
//! # Usage
//!
//! ```ignore
//! use tokenflow_core::testing::{Attempt, ScriptedTransport, Step};
//!
//! let transport = ScriptedTransport::new(vec![
//!     // First connect: one token, then the stream drops
//!     Attempt::stream(vec![Step::token("Hel")]),
//!     // Second connect: finishes normally
//!     Attempt::stream(vec![Step::token("lo"), Step::done()]),
//! ]);
//! ```
//!
//! Each `connect()` consumes the next [`Attempt`]. Once the script runs out,
//! further connects fail with `TransportError::ConnectionFailed`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::{ByteStream, HeaderMap, StreamTransport};
use crate::error::TransportError;

/// One item in a scripted byte stream
#[derive(Clone, Debug)]
pub enum Step {
    /// Raw bytes, delivered as one chunk
    Bytes(Vec<u8>),
    /// Pause before the next step
    Wait(Duration),
    /// Fail the stream with this error
    Fail(TransportError),
    /// Keep the stream open forever
    Hang,
}

impl Step {
    /// A complete line (newline appended)
    pub fn line(text: impl Into<String>) -> Self {
        let mut bytes = text.into().into_bytes();
        bytes.push(b'\n');
        Self::Bytes(bytes)
    }

    /// An NDJSON token-frame
    pub fn token(content: &str) -> Self {
        Self::line(serde_json::json!({ "type": "token", "content": content }).to_string())
    }

    /// An NDJSON progress-frame
    pub fn progress(percent: f64, estimated_time_ms: Option<u64>) -> Self {
        let mut frame = serde_json::json!({ "type": "progress", "progress": percent });
        if let Some(ms) = estimated_time_ms {
            frame["estimated_time_ms"] = ms.into();
        }
        Self::line(frame.to_string())
    }

    /// An NDJSON done-frame with no payload
    pub fn done() -> Self {
        Self::line(r#"{"type":"done"}"#)
    }

    /// Pause for `ms` milliseconds
    pub fn wait_ms(ms: u64) -> Self {
        Self::Wait(Duration::from_millis(ms))
    }

    /// Never finish
    pub fn hang() -> Self {
        Self::Hang
    }
}

/// Outcome of one scripted connect
#[derive(Clone, Debug)]
pub enum Attempt {
    /// Connect fails immediately
    Fail(TransportError),
    /// Connect succeeds and plays these steps; the stream then ends
    Stream(Vec<Step>),
}

impl Attempt {
    /// Successful connect playing `steps`
    pub fn stream(steps: Vec<Step>) -> Self {
        Self::Stream(steps)
    }

    /// Failed connect
    pub fn fail(error: TransportError) -> Self {
        Self::Fail(error)
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    attempts: VecDeque<Attempt>,
    seen_headers: Vec<HeaderMap>,
    seen_urls: Vec<String>,
}

/// Transport that replays a fixed script
///
/// Clones share the script and the recorded calls, so keep a clone around to
/// inspect what the connection did.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Create a transport that plays `attempts` in order
    pub fn new(attempts: Vec<Attempt>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                attempts: attempts.into(),
                ..ScriptState::default()
            })),
        }
    }

    /// Append another attempt to the script
    pub fn push(&self, attempt: Attempt) {
        self.state.lock().attempts.push_back(attempt);
    }

    /// Number of `connect()` calls so far
    pub fn connect_count(&self) -> usize {
        self.state.lock().seen_urls.len()
    }

    /// Headers passed to each `connect()` call
    pub fn seen_headers(&self) -> Vec<HeaderMap> {
        self.state.lock().seen_headers.clone()
    }

    /// URLs passed to each `connect()` call
    pub fn seen_urls(&self) -> Vec<String> {
        self.state.lock().seen_urls.clone()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<ByteStream, TransportError> {
        let next = {
            let mut state = self.state.lock();
            state.seen_urls.push(url.to_string());
            state.seen_headers.push(headers.clone());
            state.attempts.pop_front()
        };

        match next {
            None => Err(TransportError::ConnectionFailed(
                "script exhausted".to_string(),
            )),
            Some(Attempt::Fail(error)) => Err(error),
            Some(Attempt::Stream(steps)) => Ok(play(steps)),
        }
    }
}

fn play(steps: Vec<Step>) -> ByteStream {
    let stream = futures::stream::unfold(steps.into_iter(), |mut steps| async move {
        loop {
            let step = match steps.next() {
                Some(step) => step,
                None => return None,
            };
            match step {
                Step::Bytes(bytes) => return Some((Ok(bytes), steps)),
                Step::Fail(error) => return Some((Err(error), steps)),
                Step::Wait(delay) => tokio::time::sleep(delay).await,
                Step::Hang => futures::future::pending::<()>().await,
            }
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_script_is_consumed_in_order() {
        let transport = ScriptedTransport::new(vec![
            Attempt::fail(TransportError::Status { status: 503 }),
            Attempt::stream(vec![Step::line("a"), Step::line("b")]),
        ]);

        let first = transport.connect("http://x", &HeaderMap::new()).await;
        assert!(matches!(first, Err(TransportError::Status { status: 503 })));

        let mut stream = transport
            .connect("http://x", &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(Ok(b"a\n".to_vec())));
        assert_eq!(stream.next().await, Some(Ok(b"b\n".to_vec())));
        assert_eq!(stream.next().await, None);

        let exhausted = transport.connect("http://x", &HeaderMap::new()).await;
        assert!(matches!(exhausted, Err(TransportError::ConnectionFailed(_))));
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_step_delays_next_chunk() {
        let transport =
            ScriptedTransport::new(vec![Attempt::stream(vec![Step::wait_ms(500), Step::token("x")])]);
        let mut stream = transport
            .connect("http://x", &HeaderMap::new())
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        assert!(stream.next().await.is_some());
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
