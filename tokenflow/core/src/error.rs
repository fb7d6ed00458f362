//! Error Types
//!
//! Errors raised while ingesting a stream. All of them are `Clone` so they
//! can be stored inside [`ConnectionStats`](crate::connection::ConnectionStats)
//! and [`SessionState`](crate::session::SessionState) snapshots.
//!
//! # Taxonomy
//!
//! | Kind                 | Examples                            | Handling                      |
//! |----------------------|-------------------------------------|-------------------------------|
//! | `Transport`          | network drop, 5xx, EOF without done | absorbed, drives reconnect    |
//! | `FatalConnection`    | 401/403, malformed endpoint         | surfaced, session ends        |
//! | `FrameParse`         | one malformed frame                 | frame skipped, stream goes on |
//! | `Timeout`            | no terminal event before deadline   | surfaced, session ends        |

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors produced by a [`StreamTransport`](crate::connection::StreamTransport)
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Endpoint answered with a non-success status
    #[error("endpoint returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// The endpoint URL could not be used at all
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Reading from an established stream failed
    #[error("stream read failed: {0}")]
    Stream(String),

    /// The stream ended before a done-frame was received
    #[error("stream closed before completion")]
    Closed,
}

/// A single frame could not be decoded
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum FrameParseError {
    /// Line was not valid JSON
    #[error("invalid frame JSON: {0}")]
    InvalidJson(String),

    /// JSON object carried an unrecognised `type`
    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    /// A required field was absent or had the wrong type
    #[error("frame `{frame}` is missing field `{field}`")]
    MissingField {
        /// Frame type being decoded
        frame: String,
        /// Field that was expected
        field: &'static str,
    },
}

/// Classification of a [`StreamError`] following the ingestion taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Recoverable transport problem
    Transport,
    /// Non-retryable connection problem
    FatalConnection,
    /// Malformed individual frame
    FrameParse,
    /// Session deadline elapsed
    Timeout,
}

/// Error recorded in connection stats and surfaced in session state
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum StreamError {
    /// Recoverable transport failure (absorbed by reconnects)
    #[error(transparent)]
    Transport(TransportError),

    /// Transport failure classified as fatal; no retry happens
    #[error("fatal connection error: {0}")]
    Fatal(TransportError),

    /// A frame was skipped
    #[error(transparent)]
    FrameParse(FrameParseError),

    /// Every reconnect attempt failed
    #[error("gave up after {attempts} reconnect attempts: {last}")]
    ReconnectExhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last: TransportError,
    },

    /// The server sent an error-frame
    #[error("server error: {message}")]
    Server {
        /// Message carried by the frame
        message: String,
    },

    /// No terminal event arrived before the session deadline
    #[error("no terminal event within {}ms", .after.as_millis())]
    Timeout {
        /// Configured session timeout
        after: Duration,
    },

    /// The connection task went away without reporting a terminal event
    #[error("connection lost")]
    ConnectionLost,
}

impl StreamError {
    /// Map this error onto the ingestion taxonomy
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::FrameParse(_) => ErrorKind::FrameParse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Fatal(_)
            | Self::ReconnectExhausted { .. }
            | Self::Server { .. }
            | Self::ConnectionLost => ErrorKind::FatalConnection,
        }
    }

    /// Whether this error ends the session
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::FatalConnection | ErrorKind::Timeout
        )
    }
}

impl From<FrameParseError> for StreamError {
    fn from(err: FrameParseError) -> Self {
        Self::FrameParse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        assert_eq!(
            StreamError::Transport(TransportError::Closed).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            StreamError::Fatal(TransportError::Status { status: 401 }).kind(),
            ErrorKind::FatalConnection
        );
        assert_eq!(
            StreamError::FrameParse(FrameParseError::UnknownType("x".into())).kind(),
            ErrorKind::FrameParse
        );
        assert_eq!(
            StreamError::Timeout {
                after: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_terminal_errors() {
        assert!(!StreamError::Transport(TransportError::Closed).is_terminal());
        assert!(!StreamError::FrameParse(FrameParseError::InvalidJson("{".into())).is_terminal());
        assert!(StreamError::ConnectionLost.is_terminal());
        assert!(StreamError::ReconnectExhausted {
            attempts: 3,
            last: TransportError::Closed
        }
        .is_terminal());
    }

    #[test]
    fn test_display() {
        let err = StreamError::Timeout {
            after: Duration::from_millis(1000),
        };
        assert_eq!(err.to_string(), "no terminal event within 1000ms");

        let err = StreamError::Fatal(TransportError::Status { status: 403 });
        assert_eq!(err.to_string(), "fatal connection error: endpoint returned HTTP 403");
    }
}
