//! A sink owns the partition lifecycle and query surface of one `(id, category)`.

use crate::layout::SegmentLayout;
use crate::mirror::{Mirror, NopMirror, StoreMirror};
use crate::partition::{PartitionBuffer, PartitionPolicy, PushOutcome};
use crate::query::QueryEngine;
use crate::statistics::{Statistics, WindowStatistics, WindowSummary};
use crate::store::Store;
use crate::tags::Tags;
use crate::{PartsinkError, Result, Sample, Snapshot};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Default maximum time span of an open partition: one hour.
pub const DEFAULT_PARTITION_INTERVAL_MS: i64 = 3_600_000;

/// Everything needed to open a sink.
pub struct SinkOptions {
    id: String,
    category: String,
    store: Arc<dyn Store>,
    root: PathBuf,
    partition_interval: i64,
    partition_size: usize,
    mirror: Option<(Arc<dyn Store>, PathBuf)>,
    statistics: Option<Box<dyn Statistics>>,
}

impl SinkOptions {
    /// Options for a sink whose segments live below `root` in `store`.
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        store: Arc<dyn Store>,
        root: impl AsRef<Path>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            store,
            root: root.as_ref().to_path_buf(),
            partition_interval: DEFAULT_PARTITION_INTERVAL_MS,
            partition_size: 0,
            mirror: None,
            statistics: None,
        }
    }

    /// Sets the maximum time span of an open partition, in milliseconds.
    pub fn with_partition_interval(mut self, interval_ms: i64) -> Self {
        self.partition_interval = interval_ms;
        self
    }

    /// Sets the maximum number of samples of an open partition; 0 is unbounded.
    pub fn with_partition_size(mut self, size: usize) -> Self {
        self.partition_size = size;
        self
    }

    /// Mirrors the open partition into `dir` of `store`.
    pub fn with_mirror(mut self, store: Arc<dyn Store>, dir: impl AsRef<Path>) -> Self {
        self.mirror = Some((store, dir.as_ref().to_path_buf()));
        self
    }

    /// Replaces the default window statistics.
    pub fn with_statistics(mut self, statistics: Box<dyn Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }
}

/// A partitioned time-series sink.
///
/// Pushes are serialized by a write lock; queries share a read lock so they
/// never observe a half-finished rotation.
pub struct PartitionedSink {
    id: String,
    category: String,
    store: Arc<dyn Store>,
    layout: SegmentLayout,
    buffer: RwLock<PartitionBuffer>,
    statistics: Mutex<Box<dyn Statistics>>,
    tags: Tags,
}

impl PartitionedSink {
    /// Opens a sink, reloading its open partition from the mirror if one exists.
    pub fn open(options: SinkOptions) -> Result<Self> {
        let SinkOptions {
            id,
            category,
            store,
            root,
            partition_interval,
            partition_size,
            mirror,
            statistics,
        } = options;

        if partition_interval < 0 {
            return Err(PartsinkError::InvalidConfiguration(format!(
                "partition interval must not be negative, got {partition_interval}"
            )));
        }

        store.create_dir_all(&root)?;

        let mirror: Arc<dyn Mirror> = match mirror {
            Some((mirror_store, dir)) => {
                Arc::new(StoreMirror::open(mirror_store, &dir, &id, &category)?)
            }
            None => Arc::new(NopMirror),
        };
        let samples = mirror.load()?.unwrap_or_default();
        if !samples.is_empty() {
            info!(
                id = %id,
                category = %category,
                samples = samples.len(),
                "Recovered open partition from mirror"
            );
        }

        let policy = PartitionPolicy {
            interval: partition_interval,
            size: partition_size,
        };
        let buffer = PartitionBuffer::new(id.clone(), category.clone(), samples, mirror, policy);
        let tags = Tags::load(store.clone(), &root)?;
        let statistics = statistics.unwrap_or_else(|| Box::new(WindowStatistics::default()));

        let sink = Self {
            id,
            category,
            store,
            layout: SegmentLayout::new(&root),
            buffer: RwLock::new(buffer),
            statistics: Mutex::new(statistics),
            tags,
        };
        sink.prime_statistics()?;

        info!(
            id = %sink.id,
            category = %sink.category,
            root = %root.display(),
            "Opened sink"
        );
        Ok(sink)
    }

    fn prime_statistics(&self) -> Result<()> {
        let window = self.statistics.lock().window();
        let recent = self.snapshot_until(window, chrono::Utc::now().timestamp_millis())?;

        let mut statistics = self.statistics.lock();
        for sample in &recent {
            statistics.push(sample.timestamp, sample.value);
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Root directory of this sink inside its store.
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn partition_interval(&self) -> i64 {
        self.buffer.read().policy().interval
    }

    pub fn partition_size(&self) -> usize {
        self.buffer.read().policy().size
    }

    /// Appends a sample to the open partition, sealing the partition first if
    /// it is full or spans too much time.
    pub fn push(&self, timestamp: i64, value: i64) -> Result<PushOutcome> {
        let mut buffer = self.buffer.write();
        let outcome = buffer.push(self.store.as_ref(), &self.layout, Sample::new(timestamp, value))?;
        self.statistics.lock().push(timestamp, value);
        Ok(outcome)
    }

    /// Returns the most recent `amount` samples at or before `until`, ascending.
    pub fn snapshot_until(&self, amount: usize, until: i64) -> Result<Snapshot> {
        let buffer = self.buffer.read();
        QueryEngine::new(self.store.as_ref(), &self.layout).snapshot_until(
            buffer.samples(),
            amount,
            until,
        )
    }

    /// Returns every sample with `from <= timestamp <= until`, ascending.
    pub fn snapshot_between(&self, from: i64, until: i64) -> Result<Snapshot> {
        let buffer = self.buffer.read();
        QueryEngine::new(self.store.as_ref(), &self.layout).snapshot_between(
            buffer.samples(),
            from,
            until,
        )
    }

    /// Copy of the open partition.
    pub fn buffered(&self) -> Snapshot {
        self.buffer.read().samples().clone()
    }

    /// Summary of the statistics window.
    pub fn statistics(&self) -> WindowSummary {
        self.statistics.lock().summary()
    }

    pub fn tag(&self, key: &str) -> Option<String> {
        self.tags.get(key)
    }

    /// Sets or, with `None`, removes a tag.
    pub fn set_tag(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.tags.set(key, value)
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.keys()
    }
}
