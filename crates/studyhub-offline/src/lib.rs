//! studyhub-offline: versioned offline caching and the page/worker update
//! hand-off.
//!
//! A [`worker::Synchronizer`] owns the cache generations and serves requests
//! from the active one; an [`page::UpdateCoordinator`] runs on the page side
//! and decides when a newly installed version takes over. The two talk only
//! through the typed [`messages`] over channels.

pub mod bank_source;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod messages;
pub mod mock;
pub mod page;
pub mod worker;

pub use bank_source::CachedBankSource;
pub use config::{load_sync_config, load_sync_config_from, SyncConfig};
pub use fetch::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use mock::MockFetcher;
pub use page::{PageHost, UpdateCoordinator};
pub use worker::Synchronizer;
