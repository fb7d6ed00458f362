//! Adaptive Batching
//!
//! Decouples the network arrival rate from the consumer's render rate.
//! Tokens are queued as they arrive and handed to a [`BatchSink`] in bounded,
//! order-preserving batches on an adaptive cadence.

mod config;
mod scheduler;

pub use config::{BatchConfig, FlushPriority};
pub use scheduler::{AdaptiveBatchScheduler, BatchSink, SchedulerStats};
