//! Network access behind a trait, plus the reqwest-backed implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::SyncError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// An outgoing request as the page issues it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    /// `true` for top-level page navigations.
    #[serde(default)]
    pub navigate: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            navigate: false,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            navigate: true,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// The offline fallback document.
    Fallback,
    /// Made up locally because nothing else was available.
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Plain-text 503 returned when the network and cache both came up empty.
    pub fn service_unavailable() -> Self {
        Self {
            status: 503,
            body: b"Offline".to_vec(),
            content_type: Some("text/plain".into()),
            source: ResponseSource::Synthesized,
        }
    }
}

/// Anything that can perform a request.
///
/// Non-2xx responses are returned as `Ok`; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SyncError>;
}

/// Fetcher over HTTP, resolving relative URLs against a base.
pub struct HttpFetcher {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout_secs: Option<u64>) -> Result<Self, SyncError> {
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SyncError::Network {
                url: base_url.to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, request), fields(url = %request.url, method = %request.method))]
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SyncError> {
        let url = self.resolve(&request.url);

        let response = self
            .client
            .request(request.method.into(), &url)
            .send()
            .await
            .map_err(|e| SyncError::Network {
                url: request.url.clone(),
                message: if e.is_timeout() {
                    format!("timed out after {}s", self.timeout_secs)
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| SyncError::Network {
            url: request.url.clone(),
            message: format!("failed to read body: {e}"),
        })?;

        tracing::debug!("{} {} -> {status}", request.method, request.url);

        Ok(FetchResponse {
            status,
            body: body.to_vec(),
            content_type,
            source: ResponseSource::Network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_relative_urls_against_base() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/modules/Renal.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"question": "q", "options": ["a"], "correct": "A"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&format!("{}/", server.uri()), None).unwrap();
        let response = fetcher
            .fetch(&FetchRequest::get("/modules/Renal.json"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value[0]["correct"], "A");
    }

    #[tokio::test]
    async fn http_errors_are_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&server.uri(), None).unwrap();
        let response = fetcher.fetch(&FetchRequest::get("nope")).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.text(), "missing");
    }

    #[tokio::test]
    async fn post_uses_request_method() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/progress"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&server.uri(), None).unwrap();
        let request = FetchRequest::get("/api/progress").with_method(Method::Post);
        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let fetcher = HttpFetcher::new("http://127.0.0.1:1", Some(2)).unwrap();
        let err = fetcher.fetch(&FetchRequest::get("/")).await.unwrap_err();
        assert!(err.is_offline());
    }

    #[test]
    fn synthesized_503() {
        let r = FetchResponse::service_unavailable();
        assert_eq!(r.status, 503);
        assert_eq!(r.source, ResponseSource::Synthesized);
        assert_eq!(r.text(), "Offline");
    }
}
