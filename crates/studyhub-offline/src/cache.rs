//! Named cache generations, each a URL → response map.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::fetch::{FetchResponse, ResponseSource};

/// What one cache generation should contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub version: String,
    #[serde(default)]
    pub static_assets: Vec<String>,
    /// Question bank documents, precached best-effort.
    #[serde(default)]
    pub quiz_data: Vec<String>,
}

impl CacheManifest {
    pub fn entries(&self) -> impl Iterator<Item = &String> {
        self.static_assets.iter().chain(&self.quiz_data)
    }

    pub fn len(&self) -> usize {
        self.static_assets.len() + self.quiz_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl CachedResponse {
    pub fn into_response(self, source: ResponseSource) -> FetchResponse {
        FetchResponse {
            status: self.status,
            body: self.body,
            content_type: self.content_type,
            source,
        }
    }
}

impl From<&FetchResponse> for CachedResponse {
    fn from(r: &FetchResponse) -> Self {
        Self {
            status: r.status,
            body: r.body.clone(),
            content_type: r.content_type.clone(),
        }
    }
}

/// All cache generations, shared between the worker and its background
/// revalidation tasks.
#[derive(Default)]
pub struct CacheStorage {
    caches: Mutex<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BTreeMap<String, CachedResponse>>> {
        self.caches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the named cache if it does not exist.
    pub fn open(&self, name: &str) {
        self.lock().entry(name.to_string()).or_default();
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn put(&self, name: &str, url: &str, response: CachedResponse) {
        self.lock()
            .entry(name.to_string())
            .or_default()
            .insert(url.to_string(), response);
    }

    /// Store only if the cache still exists. Used by work that may outlive
    /// the generation it started in.
    pub fn put_if_open(&self, name: &str, url: &str, response: CachedResponse) -> bool {
        match self.lock().get_mut(name) {
            Some(cache) => {
                cache.insert(url.to_string(), response);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str, url: &str) -> Option<CachedResponse> {
        self.lock().get(name).and_then(|c| c.get(url)).cloned()
    }

    /// Names of every cache, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// URLs stored in one cache, sorted.
    pub fn urls(&self, name: &str) -> Vec<String> {
        self.lock()
            .get(name)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn delete(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn entry_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, BTreeMap::len)
    }
}
