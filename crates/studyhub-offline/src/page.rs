//! Page-side half of the update hand-off.
//!
//! The coordinator polls the worker for new versions, asks the host before
//! switching to one, and reloads exactly once when a new worker takes
//! control.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::messages::{ClientEvent, PageMessage, WorkerMessage};

/// What the host is asked when an update is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePrompt {
    pub new_version: String,
    /// A quiz is in progress and would be interrupted by the reload.
    pub unsaved_progress: bool,
}

/// The embedding page.
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Ask the user whether to switch to the new version now.
    async fn confirm_update(&self, prompt: &UpdatePrompt) -> bool;
    fn reload(&self);
    fn has_unsaved_progress(&self) -> bool;
}

/// Browser-side page lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    VisibilityChanged { visible: bool },
    /// `persisted` is `true` when restored from the back/forward cache.
    PageShow { persisted: bool },
    /// The user asked to apply an update they declined earlier.
    ApplyPendingUpdate,
}

pub struct UpdateCoordinator<H: PageHost> {
    host: H,
    to_worker: mpsc::Sender<PageMessage>,
    check_interval: Duration,
    force_refresh_delay: Duration,
    pending_update: Option<String>,
    worker_version: Option<String>,
    hidden: bool,
    reloading: bool,
}

impl<H: PageHost> UpdateCoordinator<H> {
    pub fn new(host: H, to_worker: mpsc::Sender<PageMessage>, config: &SyncConfig) -> Self {
        Self {
            host,
            to_worker,
            check_interval: Duration::from_secs(config.check_interval_secs),
            force_refresh_delay: Duration::from_secs(config.force_refresh_delay_secs),
            pending_update: None,
            worker_version: None,
            hidden: false,
            reloading: false,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Version announced by `UPDATE_AVAILABLE` and not yet applied.
    pub fn pending_update(&self) -> Option<&str> {
        self.pending_update.as_deref()
    }

    /// Last version the worker reported.
    pub fn worker_version(&self) -> Option<&str> {
        self.worker_version.as_deref()
    }

    async fn send(&self, message: PageMessage) -> Result<(), SyncError> {
        self.to_worker
            .send(message)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub async fn handle_client_event(&mut self, event: ClientEvent) -> Result<(), SyncError> {
        match event {
            ClientEvent::Message(WorkerMessage::UpdateAvailable { new_version }) => {
                self.pending_update = Some(new_version.clone());
                let prompt = UpdatePrompt {
                    new_version,
                    unsaved_progress: self.host.has_unsaved_progress(),
                };
                if self.host.confirm_update(&prompt).await {
                    self.apply_pending_update().await?;
                } else {
                    tracing::info!("update to {} deferred", prompt.new_version);
                }
            }
            ClientEvent::Message(WorkerMessage::SwActivated { version }) => {
                if self.pending_update.as_deref() == Some(version.as_str()) {
                    self.pending_update = None;
                }
                self.worker_version = Some(version);
            }
            ClientEvent::Message(WorkerMessage::Version { version }) => {
                self.worker_version = Some(version);
            }
            ClientEvent::Message(WorkerMessage::CacheUpdated { stats }) => {
                tracing::debug!("cache refreshed: {}/{} entries", stats.cached, stats.total);
            }
            ClientEvent::ControllerChange => {
                if self.reloading {
                    tracing::debug!("reload already in progress");
                } else {
                    self.reloading = true;
                    tracing::info!("new worker in control, reloading");
                    self.host.reload();
                }
            }
        }
        Ok(())
    }

    pub async fn handle_page_event(&mut self, event: PageEvent) -> Result<(), SyncError> {
        match event {
            PageEvent::VisibilityChanged { visible } => {
                let was_hidden = self.hidden;
                self.hidden = !visible;
                if visible && was_hidden {
                    self.send(PageMessage::CheckUpdate).await?;
                }
            }
            PageEvent::PageShow { persisted } => {
                if persisted {
                    self.send(PageMessage::CheckUpdate).await?;
                }
            }
            PageEvent::ApplyPendingUpdate => {
                self.apply_pending_update().await?;
            }
        }
        Ok(())
    }

    /// Send `SKIP_WAITING` for the pending update. Returns `false` if there
    /// is none.
    pub async fn apply_pending_update(&mut self) -> Result<bool, SyncError> {
        match &self.pending_update {
            Some(version) => {
                tracing::info!("applying update {version}");
                self.send(PageMessage::SkipWaiting).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drive the coordinator until the worker side goes away.
    ///
    /// Sends `CHECK_UPDATE` every `check_interval` and one `FORCE_UPDATE`
    /// shortly after start.
    pub async fn run(
        mut self,
        mut from_worker: mpsc::UnboundedReceiver<ClientEvent>,
        mut page_events: mpsc::Receiver<PageEvent>,
    ) -> Result<Self, SyncError> {
        let mut checks = interval_at(Instant::now() + self.check_interval, self.check_interval);
        let force_refresh = sleep(self.force_refresh_delay);
        tokio::pin!(force_refresh);
        let mut forced = false;
        let mut page_open = true;

        loop {
            tokio::select! {
                event = from_worker.recv() => match event {
                    Some(event) => self.handle_client_event(event).await?,
                    None => break,
                },
                event = page_events.recv(), if page_open => match event {
                    Some(event) => self.handle_page_event(event).await?,
                    None => page_open = false,
                },
                _ = checks.tick() => self.send(PageMessage::CheckUpdate).await?,
                _ = &mut force_refresh, if !forced => {
                    forced = true;
                    self.send(PageMessage::ForceUpdate).await?;
                }
            }
        }

        tracing::debug!("worker channel closed");
        Ok(self)
    }
}
