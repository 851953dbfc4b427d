//! Registry handing out one sink per `(id, category)`.

use crate::sink::{DEFAULT_PARTITION_INTERVAL_MS, PartitionedSink, SinkOptions};
use crate::store::{DiskStore, MemoryStore, Store, SyncMode};
use crate::{PartsinkError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Supplies rotation thresholds per sink.
pub trait PartitionConfig: Send + Sync {
    /// Maximum time span of an open partition, in milliseconds.
    fn partition_interval(&self, id: &str, category: &str) -> i64;

    /// Maximum number of samples in an open partition; 0 is unbounded.
    fn partition_size(&self, id: &str, category: &str) -> usize;
}

/// The same thresholds for every sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPartitionConfig {
    pub interval_ms: i64,
    pub size: usize,
}

impl PartitionConfig for FixedPartitionConfig {
    fn partition_interval(&self, _id: &str, _category: &str) -> i64 {
        self.interval_ms
    }

    fn partition_size(&self, _id: &str, _category: &str) -> usize {
        self.size
    }
}

/// Builder for creating a SinkRegistry instance.
pub struct RegistryBuilder {
    data_path: Option<PathBuf>,
    store: Option<Arc<dyn Store>>,
    mirror_path: Option<PathBuf>,
    mirror_store: Option<(Arc<dyn Store>, PathBuf)>,
    partition_interval: Duration,
    partition_size: usize,
    partition_config: Option<Arc<dyn PartitionConfig>>,
    sync_mode: SyncMode,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            data_path: None,
            store: None,
            mirror_path: None,
            mirror_store: None,
            partition_interval: Duration::from_millis(DEFAULT_PARTITION_INTERVAL_MS as u64),
            partition_size: 0,
            partition_config: None,
            sync_mode: SyncMode::default(),
        }
    }
}

impl RegistryBuilder {
    /// Creates a new RegistryBuilder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores segments below a directory on disk.
    pub fn with_data_path(mut self, path: impl AsRef<Path>) -> Self {
        self.data_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Stores segments in an arbitrary store; takes precedence over the data path.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Mirrors open partitions into a directory on disk.
    pub fn with_mirror_path(mut self, path: impl AsRef<Path>) -> Self {
        self.mirror_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Mirrors open partitions into `dir` of an arbitrary store.
    pub fn with_mirror_store(mut self, store: Arc<dyn Store>, dir: impl AsRef<Path>) -> Self {
        self.mirror_store = Some((store, dir.as_ref().to_path_buf()));
        self
    }

    /// Sets the partition interval used when no partition config is given.
    pub fn with_partition_interval(mut self, interval: Duration) -> Self {
        self.partition_interval = interval;
        self
    }

    /// Sets the partition size used when no partition config is given.
    pub fn with_partition_size(mut self, size: usize) -> Self {
        self.partition_size = size;
        self
    }

    /// Uses per-sink partition thresholds.
    pub fn with_partition_config(mut self, config: Arc<dyn PartitionConfig>) -> Self {
        self.partition_config = Some(config);
        self
    }

    /// Sets the fsync policy of stores created from paths.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Builds the SinkRegistry instance.
    pub fn build(self) -> Result<Arc<SinkRegistry>> {
        let partition_config = match self.partition_config {
            Some(config) => config,
            None => {
                let interval_ms = i64::try_from(self.partition_interval.as_millis())
                    .map_err(|_| {
                        PartsinkError::InvalidConfiguration(
                            "partition interval is too large".to_string(),
                        )
                    })?;
                if interval_ms == 0 {
                    return Err(PartsinkError::InvalidConfiguration(
                        "partition interval must be at least one millisecond".to_string(),
                    ));
                }
                Arc::new(FixedPartitionConfig {
                    interval_ms,
                    size: self.partition_size,
                })
            }
        };

        let store: Arc<dyn Store> = match (self.store, self.data_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(DiskStore::with_sync_mode(path, self.sync_mode)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };

        let mirror = match (self.mirror_store, self.mirror_path) {
            (Some(mirror), _) => Some(mirror),
            (None, Some(path)) => {
                let mirror_store: Arc<dyn Store> =
                    Arc::new(DiskStore::with_sync_mode(path, self.sync_mode)?);
                Some((mirror_store, PathBuf::new()))
            }
            (None, None) => None,
        };

        Ok(Arc::new(SinkRegistry {
            store,
            mirror,
            partition_config,
            sinks: DashMap::new(),
        }))
    }
}

/// Lazily opens sinks and keeps them for the registry's lifetime.
pub struct SinkRegistry {
    store: Arc<dyn Store>,
    mirror: Option<(Arc<dyn Store>, PathBuf)>,
    partition_config: Arc<dyn PartitionConfig>,
    sinks: DashMap<(String, String), Arc<PartitionedSink>>,
}

impl SinkRegistry {
    /// Returns the sink for `(id, category)`, opening it on first access.
    ///
    /// Concurrent first accesses to the same key open exactly one sink.
    pub fn sink(&self, id: &str, category: &str) -> Result<Arc<PartitionedSink>> {
        validate_identifier(id)?;
        validate_identifier(category)?;

        let key = (id.to_string(), category.to_string());
        if let Some(sink) = self.sinks.get(&key) {
            return Ok(sink.clone());
        }

        match self.sinks.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let sink = Arc::new(self.open_sink(id, category)?);
                entry.insert(sink.clone());
                Ok(sink)
            }
        }
    }

    fn open_sink(&self, id: &str, category: &str) -> Result<PartitionedSink> {
        let root = Path::new(id).join(category);
        debug!(id, category, root = %root.display(), "Opening sink");

        let mut options = SinkOptions::new(id, category, self.store.clone(), root)
            .with_partition_interval(self.partition_config.partition_interval(id, category))
            .with_partition_size(self.partition_config.partition_size(id, category));
        if let Some((store, dir)) = &self.mirror {
            options = options.with_mirror(store.clone(), dir);
        }
        PartitionedSink::open(options)
    }

    /// Lists every id that has at least one category on storage.
    pub fn sinks(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut sinks = BTreeMap::new();
        let root = Path::new("");

        for id in self.store.list(root)? {
            if !id.is_dir {
                continue;
            }
            let mut categories: Vec<String> = self
                .store
                .list(Path::new(&id.name))?
                .into_iter()
                .filter(|entry| entry.is_dir)
                .map(|entry| entry.name)
                .collect();
            if !categories.is_empty() {
                categories.sort();
                sinks.insert(id.name, categories);
            }
        }

        Ok(sinks)
    }

    /// Number of sinks opened so far.
    pub fn open_sinks(&self) -> usize {
        self.sinks.len()
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', ':']);
    if invalid {
        return Err(PartsinkError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}
