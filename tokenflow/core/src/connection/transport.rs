//! Stream Transports
//!
//! The [`StreamTransport`] trait opens one long-lived byte stream. The
//! connection state machine calls it once per (re)connect attempt and never
//! holds on to a transport-specific handle, so any source of bytes works:
//! HTTP via [`HttpTransport`], or an in-memory script in tests.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::RwLock;

use crate::error::TransportError;

/// Chunks of bytes as they arrive from the network
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Header map forwarded on every connection attempt
pub type HeaderMap = BTreeMap<String, String>;

/// Opens streaming connections
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Connect to `url` with `headers` and return the response body stream
    ///
    /// Must fail with [`TransportError::Status`] for non-success responses so
    /// the classifier can tell auth failures from outages.
    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<ByteStream, TransportError>;
}

/// Headers shared between the caller and a running connection
///
/// Snapshotted on every connect attempt; a credential refresher can call
/// [`SharedHeaders::replace`] while the stream is live and the next
/// reconnect picks the new values up.
#[derive(Clone, Debug, Default)]
pub struct SharedHeaders {
    inner: Arc<RwLock<HeaderMap>>,
}

impl SharedHeaders {
    /// Wrap an initial header map
    #[must_use]
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            inner: Arc::new(RwLock::new(headers)),
        }
    }

    /// Current headers
    #[must_use]
    pub fn snapshot(&self) -> HeaderMap {
        self.inner.read().clone()
    }

    /// Set or overwrite one header
    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.write().insert(name.into(), value.into());
    }

    /// Replace all headers
    pub fn replace(&self, headers: HeaderMap) {
        *self.inner.write() = headers;
    }
}

impl From<HeaderMap> for SharedHeaders {
    fn from(headers: HeaderMap) -> Self {
        Self::new(headers)
    }
}

/// HTTP(S) streaming transport
#[derive(Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given connect timeout
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the HTTP client cannot
    /// be built (e.g. TLS backend failed to initialise).
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { http_client })
    }

    /// Use an existing reqwest client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<ByteStream, TransportError> {
        let url =
            reqwest::Url::parse(url).map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme `{}`",
                url.scheme()
            )));
        }

        let mut request = self
            .http_client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/event-stream, application/x-ndjson",
            );
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::InvalidEndpoint(e.to_string())
            } else {
                TransportError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TransportError::Stream(e.to_string()))
        });
        Ok(Box::pin(stream))
    }
}
