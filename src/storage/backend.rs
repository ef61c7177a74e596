//! Key/value persistence backends consumed by the encrypted store.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Backend errors.
#[derive(Debug)]
pub enum StorageError {
    IoError(String),
    ParseError(String),
    QuotaExceeded { limit: usize },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(e) => write!(f, "IO error: {e}"),
            StorageError::ParseError(e) => write!(f, "Parse error: {e}"),
            StorageError::QuotaExceeded { limit } => {
                write!(f, "Storage quota exceeded ({limit} entries)")
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Minimal string key/value capability.
///
/// Enumeration (`len` + `key`) is optional; backends that cannot list their
/// keys keep the defaults and the encrypted store's `clear` becomes a no-op.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Number of stored keys, or `None` if the backend cannot enumerate.
    fn len(&self) -> Option<usize> {
        None
    }

    /// Key at `index` in enumeration order.
    fn key(&self, _index: usize) -> Option<String> {
        None
    }
}

/// In-memory backend, optionally capped at a number of entries.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: Mutex<BTreeMap<String, String>>,
    max_entries: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes of new keys once `max_entries` are stored.
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            items: Mutex::default(),
            max_entries: Some(max_entries),
        }
    }

    fn items(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw stored value, bypassing any decryption.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.items().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items().keys().cloned().collect()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items();
        if let Some(limit) = self.max_entries {
            if items.len() >= limit && !items.contains_key(key) {
                return Err(StorageError::QuotaExceeded { limit });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items().remove(key);
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.items().len())
    }

    fn key(&self, index: usize) -> Option<String> {
        self.items().keys().nth(index).cloned()
    }
}

/// Backend persisting all items as one JSON object on disk.
///
/// The whole document is rewritten on every mutation.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open (or lazily create) the store file at `path`.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let items = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| StorageError::IoError(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| StorageError::ParseError(e.to_string()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn items(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::IoError(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(items)
            .map_err(|e| StorageError::ParseError(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| StorageError::IoError(e.to_string()))
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items();
        let previous = items.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&items) {
            // Keep memory and disk in agreement.
            match previous {
                Some(old) => items.insert(key.to_string(), old),
                None => items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items();
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.items().len())
    }

    fn key(&self, index: usize) -> Option<String> {
        self.items().keys().nth(index).cloned()
    }
}
