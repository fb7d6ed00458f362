//! Adaptive Batch Scheduler
//!
//! Coalesces high-frequency items into bounded batches delivered on a tick.
//!
//! The scheduler itself owns no timer: the owner calls [`tick`] whenever
//! [`interval`] has elapsed since the previous tick. This keeps every sink
//! invocation on the owner's task, so batches and other events observed by the
//! consumer are never delivered concurrently.
//!
//! # Adaptive Throttling
//!
//! After each tick the remaining backlog is compared with the previous one.
//!
//! ```text
//! backlog grew for `rising_ticks` ticks in a row  → interval *= growth_factor (≤ max_flush_interval)
//! queue empty for `idle_ticks` ticks in a row      → interval *= shrink_factor (≥ flush_interval)
//! ```
//!
//! [`tick`]: AdaptiveBatchScheduler::tick
//! [`interval`]: AdaptiveBatchScheduler::interval

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::config::BatchConfig;

/// Receives delivered batches
pub trait BatchSink<T> {
    /// Take one batch, items in enqueue order
    fn deliver(&mut self, batch: Vec<T>);
}

impl<T, F> BatchSink<T> for F
where
    F: FnMut(Vec<T>),
{
    fn deliver(&mut self, batch: Vec<T>) {
        self(batch)
    }
}

/// Counters kept by the scheduler
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Items accepted by `enqueue`
    pub items_enqueued: u64,
    /// Items handed to the sink
    pub items_delivered: u64,
    /// Sink invocations
    pub batches_delivered: u64,
    /// Items dropped by `clear`
    pub items_discarded: u64,
}

/// FIFO batcher with a per-tick size bound and adaptive cadence
pub struct AdaptiveBatchScheduler<T, S> {
    config: BatchConfig,
    sink: S,
    queue: VecDeque<T>,
    interval: Duration,
    last_backlog: usize,
    rising_streak: u32,
    idle_streak: u32,
    stats: SchedulerStats,
}

impl<T, S: BatchSink<T>> AdaptiveBatchScheduler<T, S> {
    /// Create a scheduler delivering into `sink`
    pub fn new(config: BatchConfig, sink: S) -> Self {
        let interval = config.flush_interval;
        Self {
            config,
            sink,
            queue: VecDeque::new(),
            interval,
            last_backlog: 0,
            rising_streak: 0,
            idle_streak: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Append one item; never delivers
    pub fn enqueue(&mut self, item: T) {
        self.queue.push_back(item);
        self.stats.items_enqueued += 1;
    }

    /// Deliver up to `max_batch_size` of the oldest items and adapt the interval
    ///
    /// Returns the number of items delivered.
    pub fn tick(&mut self) -> usize {
        let was_empty = self.queue.is_empty();
        let delivered = if was_empty {
            0
        } else {
            let take = self.queue.len().min(self.batch_bound());
            let batch: Vec<T> = self.queue.drain(..take).collect();
            self.deliver(batch)
        };

        if self.config.adaptive_throttling {
            self.adapt(was_empty);
        }
        self.last_backlog = self.queue.len();
        delivered
    }

    /// Deliver everything pending now, in `max_batch_size` chunks
    ///
    /// Returns the number of items delivered.
    pub fn flush(&mut self) -> usize {
        let mut delivered = 0;
        while !self.queue.is_empty() {
            let take = self.queue.len().min(self.batch_bound());
            let batch: Vec<T> = self.queue.drain(..take).collect();
            delivered += self.deliver(batch);
        }
        self.last_backlog = 0;
        delivered
    }

    /// Drop everything pending without delivery
    ///
    /// Returns the number of items discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        self.stats.items_discarded += discarded as u64;
        self.last_backlog = 0;
        if discarded > 0 {
            debug!(discarded, "Cleared pending batch items");
        }
        discarded
    }

    /// Items waiting for delivery
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current tick interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delivery counters so far
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Configuration the scheduler was built with
    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Access the sink (e.g. to drain a collecting sink)
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn batch_bound(&self) -> usize {
        self.config.max_batch_size.max(1)
    }

    fn deliver(&mut self, batch: Vec<T>) -> usize {
        let size = batch.len();
        self.stats.items_delivered += size as u64;
        self.stats.batches_delivered += 1;
        self.sink.deliver(batch);
        size
    }

    fn adapt(&mut self, was_empty: bool) {
        let backlog = self.queue.len();

        if was_empty {
            self.rising_streak = 0;
            self.idle_streak += 1;
            if self.idle_streak >= self.config.idle_ticks {
                self.idle_streak = 0;
                self.rescale(self.config.shrink_factor);
            }
        } else if backlog > self.last_backlog {
            self.idle_streak = 0;
            self.rising_streak += 1;
            if self.rising_streak >= self.config.rising_ticks {
                self.rising_streak = 0;
                self.rescale(self.config.growth_factor);
            }
        } else {
            self.rising_streak = 0;
            self.idle_streak = 0;
        }
    }

    fn rescale(&mut self, factor: f64) {
        let micros = (self.interval.as_micros() as f64 * factor).round() as u64;
        let floor = self.config.flush_interval;
        let ceiling = self.config.max_flush_interval.max(floor);
        let next = Duration::from_micros(micros).clamp(floor, ceiling);
        if next != self.interval {
            debug!(
                from_ms = self.interval.as_millis() as u64,
                to_ms = next.as_millis() as u64,
                backlog = self.queue.len(),
                "Adjusted flush interval"
            );
            self.interval = next;
        }
    }
}
