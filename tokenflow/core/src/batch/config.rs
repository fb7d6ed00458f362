//! Batch Scheduler Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduling hint for flush ticks relative to other pending work
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushPriority {
    /// Flush deadlines are checked before pending network events
    High,
    /// Network events and flush deadlines are polled fairly
    #[default]
    Normal,
}

/// Configuration for the adaptive batch scheduler
#[derive(Clone, Debug, PartialEq)]
pub struct BatchConfig {
    /// Base tick interval; also the floor adaptive throttling shrinks back to
    /// Default: 16ms (~60 Hz)
    pub flush_interval: Duration,
    /// Most items delivered by one tick
    pub max_batch_size: usize,
    /// Stretch the interval while the backlog keeps growing
    pub adaptive_throttling: bool,
    /// Ceiling for the stretched interval
    pub max_flush_interval: Duration,
    /// Interval multiplier applied when the backlog is rising
    pub growth_factor: f64,
    /// Interval multiplier applied when the queue has been idle
    pub shrink_factor: f64,
    /// Consecutive rising ticks before the interval grows
    pub rising_ticks: u32,
    /// Consecutive empty ticks before the interval shrinks
    pub idle_ticks: u32,
    /// Tick scheduling hint
    pub priority: FlushPriority,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(16), // ~60 FPS
            max_batch_size: 50,
            adaptive_throttling: true,
            max_flush_interval: Duration::from_millis(250),
            growth_factor: 1.5,
            shrink_factor: 0.5,
            rising_ticks: 2,
            idle_ticks: 3,
            priority: FlushPriority::Normal,
        }
    }
}

impl BatchConfig {
    /// Set the base interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the per-tick batch bound
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Enable or disable adaptive throttling
    #[must_use]
    pub fn with_adaptive_throttling(mut self, enabled: bool) -> Self {
        self.adaptive_throttling = enabled;
        self
    }

    /// Set the scheduling hint
    #[must_use]
    pub fn with_priority(mut self, priority: FlushPriority) -> Self {
        self.priority = priority;
        self
    }
}
