//! Session Options and Defaults

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::batch::BatchConfig;
use crate::connection::{BackoffConfig, ConnectionConfig, SharedHeaders};
use crate::error::StreamError;

/// Receives the concatenated text of each delivered batch
pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Receives the done-frame payload
pub type CompleteCallback = Arc<dyn Fn(&Value) + Send + Sync>;
/// Receives the terminal error
pub type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Per-call options for [`StreamSession::start`](super::StreamSession::start)
///
/// Unset fields fall back to the session's [`SessionDefaults`].
///
/// # Example
///
/// ```ignore
/// let options = SessionOptions::new("https://api.example.com/stream")
///     .with_header("Authorization", "Bearer token")
///     .with_max_reconnect_attempts(3)
///     .on_token(|text| print!("{text}"));
/// ```
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Streaming endpoint
    pub url: String,
    /// Headers sent on every (re)connect; shared with credential refreshers
    pub headers: SharedHeaders,
    /// Override for auto-reconnect
    pub reconnect: Option<bool>,
    /// Override for the retry budget
    pub max_reconnect_attempts: Option<u32>,
    /// Override for the per-tick batch bound
    pub batch_size: Option<usize>,
    /// Override for the session deadline
    pub timeout: Option<Duration>,
    /// Batch consumer
    pub on_token: Option<TokenCallback>,
    /// Completion consumer
    pub on_complete: Option<CompleteCallback>,
    /// Terminal error consumer
    pub on_error: Option<ErrorCallback>,
}

impl SessionOptions {
    /// Options for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Add one header
    #[must_use]
    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Use an existing shared header map
    #[must_use]
    pub fn with_headers(mut self, headers: SharedHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Enable or disable auto-reconnect
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Reconnect attempts per outage (0 disables reconnect)
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Maximum tokens per delivered batch
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Deadline for a terminal event, measured from `start()`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the batch consumer
    #[must_use]
    pub fn on_token(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_token = Some(Arc::new(callback));
        self
    }

    /// Set the completion consumer
    #[must_use]
    pub fn on_complete(mut self, callback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    /// Set the terminal error consumer
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&StreamError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("url", &self.url)
            .field("headers", &self.headers.snapshot().keys().collect::<Vec<_>>())
            .field("reconnect", &self.reconnect)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .field("on_token", &self.on_token.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Defaults that [`SessionOptions`] are merged over
///
/// Usually produced by [`load_config`](crate::config::load_config).
#[derive(Clone, Debug, PartialEq)]
pub struct SessionDefaults {
    /// Auto-reconnect on drops
    pub reconnect: bool,
    /// Retry budget
    pub max_reconnect_attempts: u32,
    /// Delay schedule between retries
    pub backoff: BackoffConfig,
    /// Scheduler tuning
    pub batch: BatchConfig,
    /// Deadline for a terminal event, measured from `start()`
    pub timeout: Duration,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_reconnect_attempts: 5,
            backoff: BackoffConfig::default(),
            batch: BatchConfig::default(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Options merged over defaults
#[derive(Clone, Debug)]
pub(crate) struct ResolvedOptions {
    pub connection: ConnectionConfig,
    pub batch: BatchConfig,
    pub timeout: Duration,
}

impl SessionDefaults {
    pub(crate) fn resolve(&self, options: &SessionOptions) -> ResolvedOptions {
        let connection = ConnectionConfig {
            url: options.url.clone(),
            headers: options.headers.clone(),
            reconnect: options.reconnect.unwrap_or(self.reconnect),
            max_reconnect_attempts: options
                .max_reconnect_attempts
                .unwrap_or(self.max_reconnect_attempts),
            backoff: self.backoff.clone(),
        };

        let mut batch = self.batch.clone();
        if let Some(size) = options.batch_size {
            batch.max_batch_size = size.max(1);
        }

        ResolvedOptions {
            connection,
            batch,
            timeout: options.timeout.unwrap_or(self.timeout),
        }
    }
}
