//! Tokenflow Core - Resilient Streaming Ingestion
//!
//! Consumes a long-lived, server-pushed token stream over an unreliable
//! network, survives disconnects, and hands tokens to a consumer at a pace it
//! can absorb.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          StreamSession                            │
//! │                                                                   │
//! │  start/stop/retry ──►  driver task (single ordered executor)      │
//! │                          │             │              │           │
//! │                    ConnectionEvent   flush tick    deadline       │
//! │                          │             │                          │
//! │  ┌───────────────────────┴──┐   ┌──────┴─────────────────┐        │
//! │  │     StreamConnection     │   │ AdaptiveBatchScheduler │        │
//! │  │  backoff · classifier    │──►│  FIFO · bounded ticks  │──► onToken
//! │  │  transport · frames      │   └────────────────────────┘        │
//! │  └──────────────────────────┘                                     │
//! │             │                                                     │
//! │   open / progress / error / done ──► SessionState (watch) ──► subscribers
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokenflow_core::{HttpTransport, SessionOptions, StreamSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = HttpTransport::new(Duration::from_secs(10))?;
//!     let session = StreamSession::new(Arc::new(transport));
//!
//!     session.start(
//!         SessionOptions::new("https://api.example.com/v1/stream")
//!             .with_header("Authorization", "Bearer ...")
//!             .on_token(|text| print!("{text}"))
//!             .on_complete(|_| println!()),
//!     );
//!
//!     let mut state = session.subscribe();
//!     state.wait_for(|s| !s.is_streaming).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`connection`]: Reconnecting stream connection, transports, wire frames
//! - [`batch`]: Adaptive batch scheduler
//! - [`session`]: Session control surface and observable state
//! - [`telemetry`]: Telemetry events and sinks
//! - [`config`]: TOML / environment configuration
//! - [`error`]: Error taxonomy
//! - [`testing`]: Scripted transports for tests

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

pub mod batch;
pub mod config;
pub mod connection;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod testing;

// Connection exports
pub use connection::{
    Backoff, BackoffConfig, ConnectionConfig, ConnectionEvent, ConnectionState, ConnectionStats,
    DefaultClassifier, ErrorClass, ErrorClassifier, Frame, FrameParser, HttpTransport,
    JsonFrameParser, ReconnectInfo, SharedHeaders, StreamConnection, StreamTransport,
    StreamingMetadata,
};

// Batching exports
pub use batch::{AdaptiveBatchScheduler, BatchConfig, BatchSink, FlushPriority, SchedulerStats};

// Session exports
pub use session::{
    ConnectionQuality, SessionDefaults, SessionOptions, SessionState, StreamSession,
    StreamSessionBuilder,
};

// Telemetry exports
pub use telemetry::{
    NoopTelemetry, RecordingTelemetry, SessionId, TelemetryEvent, TelemetrySink, TracingTelemetry,
};

// Error exports
pub use error::{ErrorKind, FrameParseError, StreamError, TransportError};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, TokenflowConfig, TokenflowToml,
};
