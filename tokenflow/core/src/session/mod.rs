//! Stream Sessions
//!
//! [`StreamSession`] is the consumer-facing control surface: `start`, `stop`,
//! `retry`, `abort`, plus an observable [`SessionState`] and views derived
//! from it (progress, time remaining, connection quality).

mod options;
mod state;
mod stream_session;

pub use options::{
    CompleteCallback, ErrorCallback, SessionDefaults, SessionOptions, TokenCallback,
};
pub use state::{format_remaining, ConnectionQuality, SessionState, NO_ESTIMATE};
pub use stream_session::{StreamSession, StreamSessionBuilder};
