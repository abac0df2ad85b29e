//! Mock fetcher for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::SyncError;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher, ResponseSource};

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
    content_type: Option<String>,
}

/// A scripted fetcher for exercising cache policy without a server.
///
/// Unknown URLs answer 404. Going offline, or marking a URL as failing,
/// turns requests into network errors.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Route>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    call_count: AtomicU32,
    calls: Mutex<HashMap<String, u32>>,
    last_request: Mutex<Option<FetchRequest>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn guess_content_type(url: &str) -> Option<String> {
    let ct = if url.ends_with(".json") {
        "application/json"
    } else if url.ends_with(".css") {
        "text/css"
    } else if url.ends_with(".js") {
        "application/javascript"
    } else if url.ends_with(".png") {
        "image/png"
    } else {
        "text/html"
    };
    Some(ct.to_string())
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`route`](Self::route) with status 200.
    pub fn with_route(self, url: &str, body: &str) -> Self {
        self.route(url, 200, body);
        self
    }

    /// Serve `body` with `status` for `url`, replacing any earlier route.
    pub fn route(&self, url: &str, status: u16, body: &str) {
        lock(&self.routes).insert(
            url.to_string(),
            Route {
                status,
                body: body.as_bytes().to_vec(),
                content_type: guess_content_type(url),
            },
        );
    }

    pub fn route_json(&self, url: &str, value: &serde_json::Value) {
        self.route(url, 200, &value.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Make requests for `url` fail at the transport level.
    pub fn fail(&self, url: &str) {
        lock(&self.failing).insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        lock(&self.failing).remove(url);
    }

    /// Total requests seen.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls_for(&self, url: &str) -> u32 {
        lock(&self.calls).get(url).copied().unwrap_or(0)
    }

    pub fn last_request(&self) -> Option<FetchRequest> {
        lock(&self.last_request).clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SyncError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *lock(&self.calls).entry(request.url.clone()).or_insert(0) += 1;
        *lock(&self.last_request) = Some(request.clone());

        if self.offline.load(Ordering::Relaxed) || lock(&self.failing).contains(&request.url) {
            return Err(SyncError::Network {
                url: request.url.clone(),
                message: "offline".into(),
            });
        }

        let route = lock(&self.routes).get(&request.url).cloned();
        Ok(match route {
            Some(route) => FetchResponse {
                status: route.status,
                body: route.body,
                content_type: route.content_type,
                source: ResponseSource::Network,
            },
            None => FetchResponse {
                status: 404,
                body: b"Not Found".to_vec(),
                content_type: Some("text/plain".into()),
                source: ResponseSource::Network,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_and_unknown_urls() {
        let fetcher = MockFetcher::new().with_route("/static/style.css", "body {}");

        let hit = fetcher.fetch(&FetchRequest::get("/static/style.css")).await.unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.text(), "body {}");
        assert_eq!(hit.content_type.as_deref(), Some("text/css"));

        let miss = fetcher.fetch(&FetchRequest::get("/nope")).await.unwrap();
        assert_eq!(miss.status, 404);
        assert_eq!(fetcher.call_count(), 2);
        assert_eq!(fetcher.calls_for("/static/style.css"), 1);
    }

    #[tokio::test]
    async fn offline_and_failing_urls() {
        let fetcher = MockFetcher::new().with_route("/", "<html>");
        fetcher.fail("/");
        assert!(fetcher.fetch(&FetchRequest::get("/")).await.is_err());
        fetcher.recover("/");
        assert!(fetcher.fetch(&FetchRequest::get("/")).await.is_ok());

        fetcher.set_offline(true);
        let err = fetcher.fetch(&FetchRequest::navigate("/")).await.unwrap_err();
        assert!(err.is_offline());
        assert!(fetcher.last_request().unwrap().navigate);
    }
}
