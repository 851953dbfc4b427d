//! partsink - An embedded, partitioned time-series sink
//!
//! Samples are pushed per `(id, category)` sink into an open partition that is
//! mirrored to an uncompressed file for recovery. Partitions are sealed into
//! gzip-compressed segment files under `yyyy/MM/dd` directories once they grow
//! too large or span too much time. Queries stitch the open partition and the
//! sealed history back together.

pub mod codec;
pub mod error;
pub mod layout;
pub mod mirror;
pub mod partition;
pub mod query;
pub mod registry;
pub mod sink;
pub mod statistics;
pub mod store;
pub mod tags;

pub use error::{PartsinkError, Result};
pub use partition::PushOutcome;
pub use registry::{FixedPartitionConfig, PartitionConfig, RegistryBuilder, SinkRegistry};
pub use sink::{PartitionedSink, SinkOptions};
pub use statistics::{Statistics, WindowStatistics, WindowSummary};
pub use store::{DiskStore, MemoryStore, Store, SyncMode};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single observation, the smallest unit of data in a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub value: i64,
}

impl Sample {
    /// Creates a new Sample.
    pub fn new(timestamp: i64, value: i64) -> Self {
        Self { timestamp, value }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sample(ts: {}, val: {})", self.timestamp, self.value)
    }
}

/// An ordered run of samples.
///
/// Snapshots returned from queries or read from disk are ascending by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    values: Vec<Sample>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps already ordered samples.
    pub fn from_values(values: Vec<Sample>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Sample] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Sample> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.values.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.values.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.values.iter()
    }

    pub(crate) fn push(&mut self, sample: Sample) {
        self.values.push(sample);
    }

    pub(crate) fn extend(&mut self, other: Snapshot) {
        self.values.extend(other.values);
    }
}

impl From<Vec<Sample>> for Snapshot {
    fn from(values: Vec<Sample>) -> Self {
        Self::from_values(values)
    }
}

impl FromIterator<Sample> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
