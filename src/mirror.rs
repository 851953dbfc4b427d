//! Write-through mirror of the open partition.

use crate::codec;
use crate::store::Store;
use crate::{Result, Sample, Snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File extension of mirror resources.
pub const MIRROR_EXTENSION: &str = ".csv";

/// Trait for mirror implementations.
pub trait Mirror: Send + Sync {
    /// Appends accepted samples.
    fn append(&self, samples: &[Sample]) -> Result<()>;

    /// Empties the mirror after its samples were sealed.
    fn reset(&self) -> Result<()>;

    /// Reads back the mirrored partition, if a mirror existed before.
    fn load(&self) -> Result<Option<Snapshot>>;
}

/// Mirror that keeps nothing; the open partition is lost on restart.
pub struct NopMirror;

impl Mirror for NopMirror {
    fn append(&self, _samples: &[Sample]) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(None)
    }
}

/// Mirror stored as an uncompressed resource in a [`Store`].
pub struct StoreMirror {
    store: Arc<dyn Store>,
    path: PathBuf,
}

impl StoreMirror {
    /// Creates a mirror for a sink inside `dir`, creating the directory if needed.
    pub fn open(store: Arc<dyn Store>, dir: &Path, id: &str, category: &str) -> Result<Self> {
        store.create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(Self::file_name(id, category)),
            store,
        })
    }

    /// Name of the mirror resource for a sink.
    pub fn file_name(id: &str, category: &str) -> String {
        format!("{id}:{category}{MIRROR_EXTENSION}")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Mirror for StoreMirror {
    fn append(&self, samples: &[Sample]) -> Result<()> {
        codec::append(self.store.as_ref(), &self.path, samples, false)
    }

    fn reset(&self) -> Result<()> {
        codec::encode(self.store.as_ref(), &self.path, &[], false)
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.store.exists(&self.path) {
            self.reset()?;
            return Ok(None);
        }

        let snapshot = codec::decode(self.store.as_ref(), &self.path, false)?;
        debug!(
            mirror = %self.path.display(),
            samples = snapshot.len(),
            "Loaded mirror"
        );
        Ok(Some(snapshot))
    }
}
