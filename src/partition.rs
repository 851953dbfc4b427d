//! The open partition of a sink and its rotation into sealed segments.
//!
//! The lifecycle is: Open (in memory, mirrored) -> Sealed (immutable segment).

use crate::codec;
use crate::layout::SegmentLayout;
use crate::mirror::Mirror;
use crate::store::Store;
use crate::{PartsinkError, Result, Sample, Snapshot};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// What a successful push did to the partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The sample joined the open partition.
    Appended,
    /// The open partition was sealed first; the sample opened a new one.
    Rotated(SealedSegment),
}

/// A partition that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSegment {
    pub path: PathBuf,
    pub start: i64,
    pub end: i64,
    pub num_samples: usize,
}

/// Rotation thresholds of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPolicy {
    /// Maximum time span, in milliseconds, between the first and any later sample.
    pub interval: i64,
    /// Maximum number of samples; 0 means unbounded.
    pub size: usize,
}

/// The open partition: ordered samples plus their mirror.
pub struct PartitionBuffer {
    id: String,
    category: String,
    samples: Snapshot,
    mirror: Arc<dyn Mirror>,
    policy: PartitionPolicy,
}

impl PartitionBuffer {
    /// Creates a buffer holding `samples`, usually empty or reloaded from the mirror.
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        samples: Snapshot,
        mirror: Arc<dyn Mirror>,
        policy: PartitionPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            samples,
            mirror,
            policy,
        }
    }

    /// Samples of the open partition, ascending.
    pub fn samples(&self) -> &Snapshot {
        &self.samples
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }

    /// Returns true if accepting `timestamp` requires sealing the partition first.
    pub fn rotation_due(&self, timestamp: i64) -> bool {
        let Some(first) = self.samples.first() else {
            return false;
        };
        (self.policy.size > 0 && self.samples.len() >= self.policy.size)
            || timestamp > first.timestamp.saturating_add(self.policy.interval)
    }

    /// Accepts a sample at the end of the partition, sealing it first if due.
    ///
    /// A sample that triggers rotation becomes the first sample of the new
    /// partition.
    pub fn push(
        &mut self,
        store: &dyn Store,
        layout: &SegmentLayout,
        sample: Sample,
    ) -> Result<PushOutcome> {
        if let Some(first) = self.samples.first()
            && sample.timestamp < first.timestamp
        {
            return Err(PartsinkError::HistoricalDataRejected {
                id: self.id.clone(),
                category: self.category.clone(),
                timestamp: sample.timestamp,
                partition_start: first.timestamp,
            });
        }

        if let Some(last) = self.samples.last()
            && sample.timestamp < last.timestamp
        {
            return Err(PartsinkError::OutOfOrderWithinPartition {
                id: self.id.clone(),
                category: self.category.clone(),
                timestamp: sample.timestamp,
                last: last.timestamp,
            });
        }

        let mut outcome = PushOutcome::Appended;
        if self.rotation_due(sample.timestamp)
            && let Some(sealed) = self.seal(store, layout)?
        {
            outcome = PushOutcome::Rotated(sealed);
        }

        self.mirror.append(&[sample])?;
        self.samples.push(sample);
        Ok(outcome)
    }

    /// Writes the open partition as a compressed segment and starts an empty one.
    ///
    /// The in-memory samples are dropped only after both the segment and the
    /// mirror reset were written; a failed seal can be retried as is.
    fn seal(
        &mut self,
        store: &dyn Store,
        layout: &SegmentLayout,
    ) -> Result<Option<SealedSegment>> {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return Ok(None);
        };
        let (start, end) = (first.timestamp, last.timestamp);

        let dir = layout.date_directory(start);
        store.create_dir_all(&dir)?;

        let path = layout.segment_path(start);
        codec::encode(store, &path, self.samples.values(), true)?;
        self.mirror.reset()?;

        let num_samples = self.samples.len();
        self.samples = Snapshot::new();

        debug!(
            id = %self.id,
            category = %self.category,
            segment = %path.display(),
            start,
            end,
            num_samples,
            "Sealed partition"
        );

        Ok(Some(SealedSegment {
            path,
            start,
            end,
            num_samples,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{NopMirror, StoreMirror};
    use crate::store::MemoryStore;
    use std::path::Path;

    fn buffer(policy: PartitionPolicy) -> PartitionBuffer {
        PartitionBuffer::new("id", "cat", Snapshot::new(), Arc::new(NopMirror), policy)
    }

    #[test]
    fn test_rotation_due_by_size() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let mut buffer = buffer(PartitionPolicy {
            interval: i64::MAX,
            size: 2,
        });

        assert!(!buffer.rotation_due(1));
        buffer.push(&store, &layout, Sample::new(1, 1)).unwrap();
        assert!(!buffer.rotation_due(2));
        buffer.push(&store, &layout, Sample::new(2, 2)).unwrap();
        assert!(buffer.rotation_due(3));
    }

    #[test]
    fn test_rotation_due_by_interval_is_strict() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let mut buffer = buffer(PartitionPolicy {
            interval: 100,
            size: 0,
        });

        buffer.push(&store, &layout, Sample::new(1000, 1)).unwrap();
        assert!(!buffer.rotation_due(1100));
        assert!(buffer.rotation_due(1101));
    }

    #[test]
    fn test_interval_does_not_overflow() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let mut buffer = buffer(PartitionPolicy {
            interval: i64::MAX,
            size: 0,
        });
        buffer.push(&store, &layout, Sample::new(1, 1)).unwrap();
        assert!(!buffer.rotation_due(i64::MAX));
    }

    #[test]
    fn test_push_rejects_historical_and_out_of_order() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let mut buffer = buffer(PartitionPolicy {
            interval: 10_000,
            size: 0,
        });

        buffer.push(&store, &layout, Sample::new(100, 1)).unwrap();
        buffer.push(&store, &layout, Sample::new(200, 2)).unwrap();

        assert!(matches!(
            buffer.push(&store, &layout, Sample::new(99, 0)),
            Err(PartsinkError::HistoricalDataRejected {
                timestamp: 99,
                partition_start: 100,
                ..
            })
        ));
        assert!(matches!(
            buffer.push(&store, &layout, Sample::new(150, 0)),
            Err(PartsinkError::OutOfOrderWithinPartition {
                timestamp: 150,
                last: 200,
                ..
            })
        ));
        // Equal timestamps are not a regression.
        buffer.push(&store, &layout, Sample::new(200, 3)).unwrap();
        assert_eq!(buffer.samples().len(), 3);
    }

    #[test]
    fn test_rotation_seals_previous_samples_and_keeps_trigger() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("");
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let mirror = Arc::new(StoreMirror::open(shared, Path::new("mirror"), "id", "cat").unwrap());
        let mut buffer = PartitionBuffer::new(
            "id",
            "cat",
            Snapshot::new(),
            mirror.clone(),
            PartitionPolicy {
                interval: 10_000,
                size: 2,
            },
        );

        assert_eq!(
            buffer.push(&store, &layout, Sample::new(1, 1)).unwrap(),
            PushOutcome::Appended
        );
        buffer.push(&store, &layout, Sample::new(2, 2)).unwrap();
        let outcome = buffer.push(&store, &layout, Sample::new(3, 3)).unwrap();

        let PushOutcome::Rotated(sealed) = outcome else {
            panic!("expected rotation, got {outcome:?}");
        };
        assert_eq!(sealed.start, 1);
        assert_eq!(sealed.end, 2);
        assert_eq!(sealed.num_samples, 2);
        assert_eq!(sealed.path, layout.segment_path(1));

        let segment = codec::decode(&store, &sealed.path, true).unwrap();
        assert_eq!(segment.values(), &[Sample::new(1, 1), Sample::new(2, 2)]);
        assert_eq!(buffer.samples().values(), &[Sample::new(3, 3)]);
        assert_eq!(mirror.load().unwrap().unwrap().values(), &[Sample::new(3, 3)]);
    }

    #[test]
    fn test_failed_seal_keeps_samples() {
        let store = MemoryStore::new();
        let layout = SegmentLayout::new("blocked");
        // A file where the date directory tree should go makes the seal fail.
        store.writer(Path::new("blocked")).unwrap();

        let mut buffer = buffer(PartitionPolicy {
            interval: 10,
            size: 0,
        });
        buffer.push(&store, &layout, Sample::new(1, 1)).unwrap();

        let err = buffer.push(&store, &layout, Sample::new(100, 2)).unwrap_err();
        assert!(err.is_storage_failure());
        assert_eq!(buffer.samples().values(), &[Sample::new(1, 1)]);
    }
}
