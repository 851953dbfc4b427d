//! Small persisted key/value map attached to each sink.

use crate::store::Store;
use crate::{PartsinkError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Name of the tag file inside a sink's root directory.
pub const TAGS_FILE_NAME: &str = "meta.json";

/// Name of the older `key=value` tag file, read when no [`TAGS_FILE_NAME`] exists.
pub const LEGACY_TAGS_FILE_NAME: &str = "meta.cfg";

/// Tags of one sink, loaded once and written through on every change.
pub struct Tags {
    store: Arc<dyn Store>,
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl Tags {
    /// Loads the tags stored in `dir`, if any.
    ///
    /// Tags from a legacy `meta.cfg` are imported as is and saved as JSON on
    /// the next change; the legacy file is left untouched.
    pub fn load(store: Arc<dyn Store>, dir: &Path) -> Result<Self> {
        let path = dir.join(TAGS_FILE_NAME);
        let legacy = dir.join(LEGACY_TAGS_FILE_NAME);

        let values: BTreeMap<String, String> = if store.exists(&path) {
            let reader = store.reader(&path)?;
            serde_json::from_reader(reader)?
        } else if store.exists(&legacy) {
            let mut content = String::new();
            store
                .reader(&legacy)?
                .read_to_string(&mut content)
                .map_err(|e| PartsinkError::io_at(&legacy, e))?;
            let values = parse_properties(&content);
            info!(
                file = %legacy.display(),
                tags = values.len(),
                "Imported legacy tags"
            );
            values
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            store,
            path,
            values: Mutex::new(values),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    /// Sets a tag, or removes it when `value` is `None`, and persists the map.
    pub fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut values = self.values.lock();
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.to_string());
            }
            None => {
                values.remove(key);
            }
        }
        self.persist(&values)
    }

    /// Tag keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let mut writer = self.store.writer(&self.path)?;
        serde_json::to_writer_pretty(&mut writer, values)?;
        writer
            .flush()
            .map_err(|e| PartsinkError::io_at(&self.path, e))
    }
}

/// Parses `key=value` / `key:value` lines with `#` and `!` comments and
/// backslash escapes. Line continuations are not supported.
fn parse_properties(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        // Split at the first unescaped separator.
        let mut split = None;
        let mut escaped = false;
        for (i, c) in line.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '=' | ':' => {
                    split = Some((i, i + 1));
                    break;
                }
                c if c.is_whitespace() => {
                    split = Some((i, i + c.len_utf8()));
                    break;
                }
                _ => {}
            }
        }

        let (key, value) = match split {
            Some((end, rest)) => {
                let value = line[rest..].trim_start();
                // `key = value` has whitespace before the real separator.
                let value = value
                    .strip_prefix(['=', ':'])
                    .filter(|_| line[end..rest].trim().is_empty())
                    .map_or(value, str::trim_start);
                (&line[..end], value)
            }
            None => (line, ""),
        };
        values.insert(unescape(key), unescape(value));
    }

    values
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => out.push_str(&hex),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}
