//! String-keyed durable storage with JSON (de)serialization on top.
//!
//! # Design
//! `StorageBackend` is the raw `key -> text` medium (in memory, or a JSON file
//! on disk). `PersistentStore` layers the value contract over it: writes are
//! JSON-encoded, reads decode JSON and fall back to the raw text when it does
//! not parse, and an absent key reads as the empty string.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// Raw text storage.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: String) -> Result<(), ApiError>;
    fn remove_item(&self, key: &str) -> Result<(), ApiError>;
    fn clear(&self) -> Result<(), ApiError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-lifetime storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: Mutex<HashMap<String, String>>,
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.items).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: String) -> Result<(), ApiError> {
        lock(&self.items).insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), ApiError> {
        lock(&self.items).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        lock(&self.items).clear();
        Ok(())
    }
}

/// Storage persisted as a single JSON object, rewritten on every mutation.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open `path`, loading existing entries. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref().to_path_buf();
        let items = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ApiError::Storage(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(ApiError::Storage(format!("{}: {e}", path.display()))),
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<(), ApiError> {
        let text = serde_json::to_string_pretty(items).map_err(|e| ApiError::Storage(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| ApiError::Storage(format!("{}: {e}", self.path.display())))
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.items).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: String) -> Result<(), ApiError> {
        let mut items = lock(&self.items);
        items.insert(key.to_string(), value);
        self.flush(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), ApiError> {
        let mut items = lock(&self.items);
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let mut items = lock(&self.items);
        items.clear();
        self.flush(&items)
    }
}

/// JSON value store over a `StorageBackend`.
#[derive(Debug, Default)]
pub struct PersistentStore<B> {
    backend: B,
    // serializes read-modify-write sequences such as compare-and-clear
    guard: Mutex<()>,
}

impl<B: StorageBackend> PersistentStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            guard: Mutex::new(()),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), ApiError> {
        let text = serde_json::to_string(value).map_err(|e| ApiError::Storage(e.to_string()))?;
        self.backend.set_item(key, text)
    }

    /// Read `key`. Absent (or empty) keys read as `""`; text that is not JSON
    /// comes back verbatim as a string.
    pub fn get(&self, key: &str) -> Value {
        match self.backend.get_item(key) {
            None => Value::String(String::new()),
            Some(raw) if raw.is_empty() => Value::String(raw),
            Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        }
    }

    /// Typed read; `None` when absent or not decodable as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.get_item(key)?;
        serde_json::from_str(&raw).ok()
    }

    pub fn remove(&self, key: &str) -> Result<(), ApiError> {
        self.backend.remove_item(key)
    }

    pub fn clear(&self) -> Result<(), ApiError> {
        self.backend.clear()
    }

    pub(crate) fn lock_guard(&self) -> MutexGuard<'_, ()> {
        lock(&self.guard)
    }
}
