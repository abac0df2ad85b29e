//! Synchronous string key-value stores backing local progress.
//!
//! `MemoryStore` stands in for browser local storage (including quota
//! failures and cross-tab change events); `FileStore` persists to a single
//! JSON object on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use crate::error::QuizError;

/// A string-keyed store with fallible writes.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), QuizError>;
    fn remove(&self, key: &str) -> Result<(), QuizError>;
    fn keys(&self) -> Vec<String>;
}

/// A write observed by other holders of the same store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory store with an optional byte quota.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: None,
            changes,
        }
    }

    /// Reject writes that would push total key+value bytes over `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Listen for writes, the way another tab sees `storage` events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    pub fn used_bytes(&self) -> usize {
        lock(&self.entries)
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn notify(&self, key: &str, new_value: Option<&str>) {
        // No receivers is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value: new_value.map(str::to_string),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), QuizError> {
        {
            let mut entries = lock(&self.entries);
            if let Some(quota) = self.quota_bytes {
                let current: usize = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if current + key.len() + value.len() > quota {
                    return Err(QuizError::Storage(format!(
                        "quota of {quota} bytes exceeded writing {key}"
                    )));
                }
            }
            entries.insert(key.to_string(), value.to_string());
        }
        self.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), QuizError> {
        let removed = lock(&self.entries).remove(key).is_some();
        if removed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }
}

/// Store persisted as one JSON object file, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read store: {}", path.display()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("failed to parse store: {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), QuizError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| QuizError::Storage(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| QuizError::Storage(format!("{}: {e}", self.path.display())))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), QuizError> {
        let mut entries = lock(&self.entries);
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), QuizError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }
}
