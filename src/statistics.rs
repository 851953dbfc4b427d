//! Sliding-window statistics fed by every accepted sample.

use crate::Sample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of recent samples a sink keeps statistics over by default.
pub const DEFAULT_WINDOW: usize = 100;

/// Trait for statistics collaborators attached to a sink.
pub trait Statistics: Send {
    /// Records an accepted sample.
    fn push(&mut self, timestamp: i64, value: i64);

    /// Summarizes the current window.
    fn summary(&self) -> WindowSummary;

    /// Number of recent samples the collaborator wants to be primed with.
    fn window(&self) -> usize;
}

/// Aggregates over the samples currently in the window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowSummary {
    pub count: usize,
    pub sum: i128,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub mean: Option<f64>,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

/// Keeps the last `window` samples and summarizes them on demand.
#[derive(Debug, Clone)]
pub struct WindowStatistics {
    window: usize,
    samples: VecDeque<Sample>,
    sum: i128,
}

impl Default for WindowStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl WindowStatistics {
    /// Creates an empty window of the given size (at least one sample).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0,
        }
    }
}

impl Statistics for WindowStatistics {
    fn push(&mut self, timestamp: i64, value: i64) {
        if self.samples.len() == self.window
            && let Some(evicted) = self.samples.pop_front()
        {
            self.sum -= i128::from(evicted.value);
        }
        self.samples.push_back(Sample::new(timestamp, value));
        self.sum += i128::from(value);
    }

    fn summary(&self) -> WindowSummary {
        let count = self.samples.len();
        WindowSummary {
            count,
            sum: self.sum,
            min: self.samples.iter().map(|s| s.value).min(),
            max: self.samples.iter().map(|s| s.value).max(),
            mean: (count > 0).then(|| self.sum as f64 / count as f64),
            first_timestamp: self.samples.front().map(|s| s.timestamp),
            last_timestamp: self.samples.back().map(|s| s.timestamp),
        }
    }

    fn window(&self) -> usize {
        self.window
    }
}
