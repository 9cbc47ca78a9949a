// ── Durable key/value storage ──
//
// String keys, JSON-text values. Access is synchronous: a write completes
// before `set` returns, and each value is a small blob per top-level key.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::debug;

use crate::error::StorageError;

const FILE_EXTENSION: &str = "json";

/// Backend the state store persists through.
pub trait KeyValueStorage: Send + Sync {
    /// Stored text for `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All stored keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

// ── MemoryStorage ────────────────────────────────────────────────

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with `entries`, e.g. legacy keys in tests.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let storage = Self::new();
        for (key, value) in entries {
            storage.entries.insert(key.into(), value.into());
        }
        storage
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

// ── FileStorage ──────────────────────────────────────────────────

/// One `<key>.json` file per key inside a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so
/// a crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        debug!(dir = %dir.display(), "file storage opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{FILE_EXTENSION}")))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let staging = self.dir.join(format!(".{key}.{FILE_EXTENSION}.tmp"));
        fs::write(&staging, value).map_err(|e| io_error(key, e))?;
        fs::rename(&staging, &path).map_err(|e| io_error(key, e))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let dir_key = self.dir.display().to_string();
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&dir_key, e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir_key, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Keys become file names: no separators, no leading dot, nothing empty.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey { key: key.to_owned() })
    }
}

fn io_error(key: &str, source: std::io::Error) -> StorageError {
    if source.kind() == ErrorKind::StorageFull {
        StorageError::QuotaExceeded { key: key.to_owned() }
    } else {
        StorageError::Io {
            key: key.to_owned(),
            source,
        }
    }
}
