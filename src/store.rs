//! Storage capability used by every other component.
//!
//! A [`Store`] is a hierarchy of named directories and files addressed by paths
//! relative to the store's root. Files can be read, overwritten, and (when the
//! backend supports it) appended to in place.

use crate::{PartsinkError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

/// Trait for hierarchical storage backends.
pub trait Store: Send + Sync {
    /// Returns true if a file or directory exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if `path` is an existing directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Creates `path` and all of its missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Lists the direct children of a directory, in no particular order.
    fn list(&self, dir: &Path) -> Result<Vec<Entry>>;

    /// Opens a file for streaming reads.
    fn reader(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Opens a file for writing, truncating any previous content.
    fn writer(&self, path: &Path) -> Result<Box<dyn Write + Send>>;

    /// Opens a file for writing after its existing content.
    ///
    /// Returns `None` when the backend cannot append without rewriting the file.
    fn appender(&self, path: &Path) -> Result<Option<Box<dyn Write + Send>>>;
}

/// Durability policy for [`DiskStore`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Flush to the page cache only.
    #[default]
    None,
    /// Flush and fsync every time a writer is flushed.
    PerWrite,
}

/// Filesystem-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
    sync_mode: SyncMode,
}

impl DiskStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_sync_mode(root, SyncMode::default())
    }

    /// Opens a store with an explicit sync mode.
    pub fn with_sync_mode(root: impl AsRef<Path>, sync_mode: SyncMode) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| PartsinkError::io_at(&root, e))?;
        Ok(Self { root, sync_mode })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    fn open_error(path: PathBuf, err: io::Error) -> PartsinkError {
        if err.kind() == io::ErrorKind::NotFound {
            PartsinkError::NotFound { path }
        } else {
            PartsinkError::io_at(path, err)
        }
    }
}

impl Store for DiskStore {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.resolve(path).is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path);
        fs::create_dir_all(&full).map_err(|e| PartsinkError::io_at(full, e))
    }

    fn list(&self, dir: &Path) -> Result<Vec<Entry>> {
        let full = self.resolve(dir);
        let entries = fs::read_dir(&full).map_err(|e| Self::open_error(full.clone(), e))?;

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PartsinkError::io_at(&full, e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_dir = entry
                .file_type()
                .map_err(|e| PartsinkError::io_at(entry.path(), e))?
                .is_dir();
            children.push(Entry { name, is_dir });
        }

        Ok(children)
    }

    fn reader(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let full = self.resolve(path);
        let file = File::open(&full).map_err(|e| Self::open_error(full, e))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn writer(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        let full = self.resolve(path);
        let file = File::create(&full).map_err(|e| Self::open_error(full, e))?;
        Ok(Box::new(FileWriter {
            inner: BufWriter::new(file),
            sync_mode: self.sync_mode,
        }))
    }

    fn appender(&self, path: &Path) -> Result<Option<Box<dyn Write + Send>>> {
        let full = self.resolve(path);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .map_err(|e| Self::open_error(full, e))?;
        Ok(Some(Box::new(FileWriter {
            inner: BufWriter::new(file),
            sync_mode: self.sync_mode,
        })))
    }
}

struct FileWriter {
    inner: BufWriter<File>,
    sync_mode: SyncMode,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Always push the userspace buffer to the kernel before deciding on fsync.
        self.inner.flush()?;
        if self.sync_mode == SyncMode::PerWrite {
            self.inner.get_ref().sync_all()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Arc<Mutex<Vec<u8>>>),
}

/// In-process store, mainly for tests and ephemeral sinks.
///
/// Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    nodes: Arc<Mutex<BTreeMap<PathBuf, Node>>>,
    append: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with true append support.
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(BTreeMap::new())),
            append: true,
        }
    }

    /// Creates an empty store whose files can only be rewritten, never appended.
    pub fn without_append() -> Self {
        Self {
            append: false,
            ..Self::new()
        }
    }

    /// Returns a copy of a file's bytes.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.nodes.lock().get(path.as_ref()) {
            Some(Node::File(data)) => Some(data.lock().clone()),
            _ => None,
        }
    }

    fn is_root(path: &Path) -> bool {
        path.as_os_str().is_empty()
    }

    fn parent_is_dir(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> bool {
        match path.parent() {
            None => false,
            Some(parent) if Self::is_root(parent) => true,
            Some(parent) => matches!(nodes.get(parent), Some(Node::Dir)),
        }
    }

    fn create_file(&self, path: &Path, truncate: bool) -> Result<Arc<Mutex<Vec<u8>>>> {
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(Node::Dir) => {
                return Err(PartsinkError::io_at(
                    path,
                    io::Error::new(io::ErrorKind::AlreadyExists, "path is a directory"),
                ));
            }
            Some(Node::File(data)) if !truncate => return Ok(data.clone()),
            _ => {}
        }

        if !Self::parent_is_dir(&nodes, path) {
            return Err(PartsinkError::NotFound {
                path: path.parent().unwrap_or(path).to_path_buf(),
            });
        }

        let data = Arc::new(Mutex::new(Vec::new()));
        nodes.insert(path.to_path_buf(), Node::File(data.clone()));
        Ok(data)
    }
}

impl Store for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        Self::is_root(path) || self.nodes.lock().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        Self::is_root(path) || matches!(self.nodes.lock().get(path), Some(Node::Dir))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut nodes = self.nodes.lock();
        let mut missing = Vec::new();

        for ancestor in path.ancestors().filter(|p| !Self::is_root(p)) {
            match nodes.get(ancestor) {
                Some(Node::Dir) => break,
                Some(Node::File(_)) => {
                    return Err(PartsinkError::io_at(
                        ancestor,
                        io::Error::new(io::ErrorKind::AlreadyExists, "path is a file"),
                    ));
                }
                None => missing.push(ancestor.to_path_buf()),
            }
        }

        for dir in missing {
            nodes.insert(dir, Node::Dir);
        }
        Ok(())
    }

    fn list(&self, dir: &Path) -> Result<Vec<Entry>> {
        if !self.is_dir(dir) {
            return Err(PartsinkError::NotFound {
                path: dir.to_path_buf(),
            });
        }

        let nodes = self.nodes.lock();
        let children = nodes
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, node)| {
                let name = path.file_name()?.to_str()?.to_string();
                Some(Entry {
                    name,
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect();
        Ok(children)
    }

    fn reader(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        match self.nodes.lock().get(path) {
            Some(Node::File(data)) => Ok(Box::new(Cursor::new(data.lock().clone()))),
            Some(Node::Dir) => Err(PartsinkError::io_at(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path is a directory"),
            )),
            None => Err(PartsinkError::NotFound {
                path: path.to_path_buf(),
            }),
        }
    }

    fn writer(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        let data = self.create_file(path, true)?;
        Ok(Box::new(MemoryWriter { data }))
    }

    fn appender(&self, path: &Path) -> Result<Option<Box<dyn Write + Send>>> {
        if !self.append {
            return Ok(None);
        }
        let data = self.create_file(path, false)?;
        Ok(Some(Box::new(MemoryWriter { data })))
    }
}

struct MemoryWriter {
    data: Arc<Mutex<Vec<u8>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
