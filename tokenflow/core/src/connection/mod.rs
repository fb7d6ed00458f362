//! Streaming Connection Layer
//!
//! Everything between the network and the session:
//!
//! - [`StreamTransport`]: opens a byte stream (HTTP by default)
//! - [`LineDecoder`] / [`FrameParser`]: bytes to typed [`Frame`]s
//! - [`ErrorClassifier`]: recoverable vs. fatal failures
//! - [`Backoff`]: exponential delay with jitter between retries
//! - [`StreamConnection`]: the reconnecting state machine tying it together

mod backoff;
mod classifier;
mod frame;
mod state;
mod stream_connection;
mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use classifier::{DefaultClassifier, ErrorClass, ErrorClassifier};
pub use frame::{Frame, FrameParser, JsonFrameParser, LineDecoder, StreamingMetadata, MAX_LINE_SIZE};
pub use state::{ConnectionState, ConnectionStats};
pub use stream_connection::{ConnectionConfig, ConnectionEvent, ReconnectInfo, StreamConnection};
pub use transport::{ByteStream, HeaderMap, HttpTransport, SharedHeaders, StreamTransport};
