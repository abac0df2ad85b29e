//! The cache synchronizer: worker lifecycle and fetch-serving policy.
//!
//! Each deployed version owns one cache generation named
//! `{cache_prefix}{version}`. A new version installs into its own generation
//! next to the live one, waits until the page agrees to switch, and on
//! activation deletes every other generation under the prefix. Requests are
//! only ever served from the active generation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::cache::{CacheManifest, CacheStorage, CachedResponse};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher, Method, ResponseSource};
use crate::messages::{CacheStats, ClientEvent, PageMessage, WorkerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Registering,
    Installing,
    Waiting,
    Activating,
    Active,
    /// Replaced or failed. Terminal.
    Redundant,
}

impl WorkerState {
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Redundant, _) => false,
            (_, Redundant) => true,
            (Registering, Installing)
            | (Installing, Waiting)
            | (Installing, Activating)
            | (Waiting, Activating)
            | (Activating, Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Registering => "registering",
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct Worker {
    manifest: CacheManifest,
    state: WorkerState,
}

impl Worker {
    fn new(manifest: CacheManifest) -> Self {
        Self {
            manifest,
            state: WorkerState::Registering,
        }
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn transition(&mut self, next: WorkerState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("worker {}: {} -> {next}", self.version(), self.state);
        self.state = next;
        Ok(())
    }
}

#[derive(Default)]
struct Lifecycle {
    installing: Option<Worker>,
    waiting: Option<Worker>,
    active: Option<Worker>,
    retired: Vec<String>,
}

impl Lifecycle {
    fn take_installing(&mut self, version: &str) -> Option<Worker> {
        if self.installing.as_ref().is_some_and(|w| w.version() == version) {
            self.installing.take()
        } else {
            None
        }
    }

    fn retire(&mut self, mut worker: Worker) {
        if worker.transition(WorkerState::Redundant).is_ok() {
            self.retired.push(worker.manifest.version);
        }
    }

    fn knows(&self, version: &str) -> bool {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .any(|w| w.version() == version)
    }
}

/// One manifest entry that could not be cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub url: String,
    pub reason: String,
}

/// Outcome of populating a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub version: String,
    pub cached: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

impl InstallReport {
    fn empty(version: &str) -> Self {
        Self {
            version: version.to_string(),
            cached: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached: self.cached.len(),
            failed: self.failed.len(),
            total: self.cached.len() + self.failed.len(),
        }
    }
}

/// The version document served at `version_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionDocument {
    pub version: String,
    #[serde(default, alias = "staticAssets")]
    pub static_assets: Option<Vec<String>>,
    #[serde(default, alias = "quizData")]
    pub quiz_data: Option<Vec<String>>,
}

/// Owns the cache generations and the worker lifecycle.
///
/// Lifecycle state sits behind a `std::sync::Mutex` that is never held
/// across an `.await`.
pub struct Synchronizer {
    config: SyncConfig,
    fetcher: Arc<dyn Fetcher>,
    caches: Arc<CacheStorage>,
    lifecycle: Mutex<Lifecycle>,
    clients: mpsc::UnboundedSender<ClientEvent>,
}

impl Synchronizer {
    /// Create a synchronizer and the channel its pages listen on.
    pub fn new(
        config: SyncConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        Self::with_storage(config, fetcher, Arc::new(CacheStorage::new()))
    }

    /// Like [`new`](Self::new), over existing cache storage.
    pub fn with_storage(
        config: SyncConfig,
        fetcher: Arc<dyn Fetcher>,
        caches: Arc<CacheStorage>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (clients, rx) = mpsc::unbounded_channel();
        let sync = Self {
            config,
            fetcher,
            caches,
            lifecycle: Mutex::new(Lifecycle::default()),
            clients,
        };
        (sync, rx)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<CacheStorage> {
        &self.caches
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn post(&self, event: impl Into<ClientEvent>) {
        if self.clients.send(event.into()).is_err() {
            tracing::debug!("no pages listening");
        }
    }

    pub fn active_version(&self) -> Option<String> {
        self.lock().active.as_ref().map(|w| w.version().to_string())
    }

    pub fn waiting_version(&self) -> Option<String> {
        self.lock().waiting.as_ref().map(|w| w.version().to_string())
    }

    /// Current state of the worker for `version`, if it was ever seen.
    pub fn worker_state(&self, version: &str) -> Option<WorkerState> {
        let lc = self.lock();
        let state = [&lc.installing, &lc.waiting, &lc.active]
            .into_iter()
            .flatten()
            .find(|w| w.version() == version)
            .map(|w| w.state)
            .or_else(|| {
                lc.retired
                    .iter()
                    .any(|v| v == version)
                    .then_some(WorkerState::Redundant)
            });
        state
    }

    fn active_cache(&self) -> Option<String> {
        self.lock()
            .active
            .as_ref()
            .map(|w| self.config.cache_name(w.version()))
    }

    // -- lifecycle ---------------------------------------------------------

    /// Install the configured version. With no active generation it
    /// activates straight away.
    #[instrument(skip(self), fields(version = %self.config.version))]
    pub async fn register(&self) -> Result<InstallReport, SyncError> {
        self.install(self.config.manifest()).await
    }

    /// Populate a new generation for `manifest`.
    ///
    /// Individual fetch failures are logged and reported without failing the
    /// install, except for static assets under `strict_static`.
    #[instrument(skip(self, manifest), fields(version = %manifest.version))]
    pub async fn install(&self, manifest: CacheManifest) -> Result<InstallReport, SyncError> {
        let version = manifest.version.clone();
        {
            let mut lc = self.lock();
            if lc.active.as_ref().is_some_and(|w| w.version() == version)
                || lc.waiting.as_ref().is_some_and(|w| w.version() == version)
            {
                tracing::debug!("{version} is already installed");
                return Ok(InstallReport::empty(&version));
            }
            if lc.installing.as_ref().is_some_and(|w| w.version() == version) {
                return Err(SyncError::Install {
                    version,
                    reason: "already installing".into(),
                });
            }
            let mut worker = Worker::new(manifest.clone());
            worker.transition(WorkerState::Installing)?;
            if let Some(previous) = lc.installing.replace(worker) {
                tracing::info!("install of {} superseded by {version}", previous.version());
                lc.retire(previous);
            }
        }

        let cache = self.config.cache_name(&version);
        self.caches.open(&cache);
        let report = self.populate(&cache, &manifest).await;

        if self.config.strict_static {
            let static_failures = report
                .failed
                .iter()
                .filter(|f| manifest.static_assets.contains(&f.url))
                .count();
            if static_failures > 0 {
                self.caches.delete(&cache);
                let mut lc = self.lock();
                if let Some(worker) = lc.take_installing(&version) {
                    lc.retire(worker);
                }
                return Err(SyncError::Install {
                    version,
                    reason: format!("{static_failures} static asset(s) could not be cached"),
                });
            }
        }

        let mut lc = self.lock();
        let Some(mut worker) = lc.take_installing(&version) else {
            return Err(SyncError::Install {
                version,
                reason: "superseded by a newer install".into(),
            });
        };

        tracing::info!(
            "installed {version}: {} cached, {} failed",
            report.cached.len(),
            report.failed.len()
        );

        if lc.active.is_some() {
            worker.transition(WorkerState::Waiting)?;
            if let Some(previous) = lc.waiting.replace(worker) {
                self.caches.delete(&self.config.cache_name(previous.version()));
                lc.retire(previous);
            }
            drop(lc);
            self.post(WorkerMessage::UpdateAvailable {
                new_version: version,
            });
        } else {
            self.activate_locked(&mut lc, worker)?;
        }

        Ok(report)
    }

    /// Fetch every manifest entry concurrently and store the successes.
    async fn populate(&self, cache: &str, manifest: &CacheManifest) -> InstallReport {
        let fetches = manifest.entries().map(|url| async move {
            let result = self.fetcher.fetch(&FetchRequest::get(url.clone())).await;
            (url.clone(), result)
        });
        let results = join_all(fetches).await;

        let mut report = InstallReport::empty(&manifest.version);
        for (url, result) in results {
            let reason = match result {
                Ok(response) if response.is_success() => {
                    if self.caches.put_if_open(cache, &url, CachedResponse::from(&response)) {
                        report.cached.push(url);
                        continue;
                    }
                    "cache was deleted".to_string()
                }
                Ok(response) => format!("HTTP {}", response.status),
                Err(e) => e.to_string(),
            };
            tracing::warn!("failed to cache {url}: {reason}");
            report.failed.push(FailedEntry { url, reason });
        }
        report
    }

    fn activate_locked(&self, lc: &mut Lifecycle, mut worker: Worker) -> Result<(), SyncError> {
        worker.transition(WorkerState::Activating)?;

        let keep = self.config.cache_name(worker.version());
        let installing = lc
            .installing
            .as_ref()
            .map(|w| self.config.cache_name(w.version()));
        for name in self.caches.keys() {
            if name.starts_with(&self.config.cache_prefix)
                && name != keep
                && Some(&name) != installing.as_ref()
            {
                self.caches.delete(&name);
                tracing::info!("deleted stale cache {name}");
            }
        }

        worker.transition(WorkerState::Active)?;
        let version = worker.version().to_string();
        let replaced = match lc.active.replace(worker) {
            Some(previous) => {
                lc.retire(previous);
                true
            }
            None => false,
        };

        tracing::info!("activated {version}");
        self.post(WorkerMessage::SwActivated { version });
        if replaced {
            self.post(ClientEvent::ControllerChange);
        }
        Ok(())
    }

    /// Activate the waiting worker. Returns `false` if nothing was waiting.
    pub fn skip_waiting(&self) -> Result<bool, SyncError> {
        let mut lc = self.lock();
        let Some(worker) = lc.waiting.take() else {
            tracing::debug!("skip waiting with no waiting worker");
            return Ok(false);
        };
        self.activate_locked(&mut lc, worker)?;
        Ok(true)
    }

    /// Ask the server for its current version and install it if it is new.
    ///
    /// Returns the version that was installed, if any.
    #[instrument(skip(self))]
    pub async fn check_for_update(&self) -> Result<Option<String>, SyncError> {
        let url = self.config.version_url.clone();
        let response = self.fetcher.fetch(&FetchRequest::get(url.clone())).await?;
        if !response.is_success() {
            return Err(SyncError::HttpStatus {
                url,
                status: response.status,
            });
        }
        let doc: VersionDocument = response.json().map_err(|e| SyncError::Decode {
            url,
            message: e.to_string(),
        })?;

        let known = self.lock().knows(&doc.version);
        if known {
            tracing::debug!("{} is current", doc.version);
            return Ok(None);
        }

        tracing::info!("new version {} available", doc.version);
        let manifest = CacheManifest {
            version: doc.version.clone(),
            static_assets: doc
                .static_assets
                .unwrap_or_else(|| self.config.static_assets.clone()),
            quiz_data: doc.quiz_data.unwrap_or_else(|| self.config.quiz_data.clone()),
        };
        self.install(manifest).await?;
        Ok(Some(doc.version))
    }

    /// Re-download every entry of the active manifest into the active cache.
    #[instrument(skip(self))]
    pub async fn force_update(&self) -> Result<CacheStats, SyncError> {
        let (cache, manifest) = {
            let lc = self.lock();
            let worker = lc.active.as_ref().ok_or(SyncError::NotActive)?;
            (self.config.cache_name(worker.version()), worker.manifest.clone())
        };

        let stats = self.populate(&cache, &manifest).await.stats();
        tracing::info!("refreshed {}: {}/{} cached", cache, stats.cached, stats.total);
        self.post(WorkerMessage::CacheUpdated { stats });
        Ok(stats)
    }

    pub async fn handle_message(&self, message: PageMessage) -> Result<(), SyncError> {
        match message {
            PageMessage::SkipWaiting => {
                self.skip_waiting()?;
            }
            PageMessage::ForceUpdate => {
                self.force_update().await?;
            }
            PageMessage::CheckUpdate => {
                self.check_for_update().await?;
            }
            PageMessage::GetVersion => {
                let version = self
                    .active_version()
                    .unwrap_or_else(|| self.config.version.clone());
                self.post(WorkerMessage::Version { version });
            }
        }
        Ok(())
    }

    /// Process page messages until every sender is dropped.
    pub async fn run(&self, mut messages: mpsc::Receiver<PageMessage>) {
        while let Some(message) = messages.recv().await {
            if let Err(e) = self.handle_message(message.clone()).await {
                tracing::warn!("handling {message:?} failed: {e}");
            }
        }
        tracing::debug!("page channel closed");
    }

    // -- fetch policy ------------------------------------------------------

    /// Answer a page request from the active generation or the network.
    pub async fn serve(&self, request: &FetchRequest) -> Result<FetchResponse, SyncError> {
        let key = self.config.cache_key(&request.url).to_string();
        if request.method != Method::Get || self.config.is_network_only(&key) {
            return self.fetcher.fetch(request).await;
        }
        let Some(cache) = self.active_cache() else {
            return self.fetcher.fetch(request).await;
        };

        if self.config.is_cache_first(&key) {
            self.cache_first(&cache, &key, request).await
        } else {
            self.network_first(&cache, &key, request).await
        }
    }

    fn fallback(&self, cache: &str) -> Option<FetchResponse> {
        self.caches
            .get(cache, &self.config.offline_fallback)
            .map(|r| r.into_response(ResponseSource::Fallback))
    }

    async fn cache_first(
        &self,
        cache: &str,
        key: &str,
        request: &FetchRequest,
    ) -> Result<FetchResponse, SyncError> {
        if let Some(hit) = self.caches.get(cache, key) {
            if self.config.revalidate_on_hit {
                self.revalidate(cache, key, request);
            }
            return Ok(hit.into_response(ResponseSource::Cache));
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == 200 {
                    self.caches.put_if_open(cache, key, CachedResponse::from(&response));
                }
                Ok(response)
            }
            Err(e) => {
                if request.navigate || self.config.is_quiz_data(key) {
                    if let Some(fallback) = self.fallback(cache) {
                        tracing::debug!("serving offline fallback for {key}");
                        return Ok(fallback);
                    }
                }
                Err(e)
            }
        }
    }

    /// Refresh a cached entry in the background.
    fn revalidate(&self, cache: &str, key: &str, request: &FetchRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let caches = Arc::clone(&self.caches);
        let cache = cache.to_string();
        let key = key.to_string();
        let request = request.clone();
        tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if response.status == 200 => {
                    caches.put_if_open(&cache, &key, CachedResponse::from(&response));
                }
                Ok(response) => {
                    tracing::debug!("revalidation of {key} got HTTP {}", response.status)
                }
                Err(e) => tracing::debug!("revalidation of {key} failed: {e}"),
            }
        });
    }

    async fn network_first(
        &self,
        cache: &str,
        key: &str,
        request: &FetchRequest,
    ) -> Result<FetchResponse, SyncError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == 200 {
                    self.caches.put_if_open(cache, key, CachedResponse::from(&response));
                }
                Ok(response)
            }
            Err(e) => {
                tracing::debug!("network failed for {key}: {e}");
                if let Some(hit) = self.caches.get(cache, key) {
                    return Ok(hit.into_response(ResponseSource::Cache));
                }
                if request.navigate {
                    if let Some(fallback) = self.fallback(cache) {
                        return Ok(fallback);
                    }
                }
                Ok(FetchResponse::service_unavailable())
            }
        }
    }
}
