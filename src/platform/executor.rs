//! Authenticated page-context execution
//!
//! All site I/O goes through a `PageExecutor`: the core never holds the
//! site's session itself, it asks the executor to perform a request "as the
//! page". `HttpPageExecutor` is the stand-alone adapter that relays a cookie
//! header copied from a logged-in browser.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::SessionConfig;

/// Errors raised by a page executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Request failed with status {0}")]
    Status(u16),
    #[error("Response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("No page context available: {0}")]
    Unavailable(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// A request to perform inside the authenticated page context
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub url: String,
    pub method: String,
    /// JSON body, serialized as `application/json;charset=UTF-8`
    pub body: Option<Value>,
    /// Per-request headers on top of the executor's defaults
    pub headers: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>, method: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body,
            headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, "GET", None)
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(url, "POST", Some(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Raw result of a page-context request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl PageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, ExecutorError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Capability to perform network I/O with the host page's session
#[async_trait]
pub trait PageExecutor: Send + Sync {
    /// Perform a request and return status, body and headers
    async fn execute(&self, request: &PageRequest) -> Result<PageResponse, ExecutorError>;

    /// Perform a request and parse a successful response as JSON
    async fn fetch_json(&self, request: &PageRequest) -> Result<Value, ExecutorError> {
        let response = self.execute(request).await?;
        if !response.is_success() {
            return Err(ExecutorError::Status(response.status));
        }
        response.json()
    }
}

/// Page executor backed by reqwest, relaying a copied session cookie
pub struct HttpPageExecutor {
    client: reqwest::Client,
}

impl HttpPageExecutor {
    /// Build the client with the session's cookie, user agent and headers as defaults
    pub fn new(config: &SessionConfig) -> Result<Self, ExecutorError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ExecutorError::InvalidRequest(format!("header '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ExecutorError::InvalidRequest(format!("header value: {}", e)))?;
            headers.insert(name, value);
        }
        if let Some(cookie) = &config.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ExecutorError::InvalidRequest(format!("cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageExecutor for HttpPageExecutor {
    async fn execute(&self, request: &PageRequest) -> Result<PageResponse, ExecutorError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| ExecutorError::InvalidRequest(format!("method '{}': {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json;charset=UTF-8")
                .body(serde_json::to_string(body)?);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.text().await?;

        debug!(url = %request.url, status, bytes = body.len(), "page request finished");

        Ok(PageResponse {
            status,
            body,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_is_2xx() {
        let ok = PageResponse {
            status: 204,
            ..Default::default()
        };
        let redirect = PageResponse {
            status: 302,
            ..Default::default()
        };
        assert!(ok.is_success());
        assert!(!redirect.is_success());
    }

    #[test]
    fn http_executor_rejects_bad_header_names() {
        let mut config = SessionConfig::default();
        config.headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            HttpPageExecutor::new(&config),
            Err(ExecutorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn request_builders_set_method_and_body() {
        let req = PageRequest::post_json("https://example.com/api", serde_json::json!({"a": 1}))
            .with_header("x-t", "1");
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers, vec![("x-t".to_string(), "1".to_string())]);
        assert_eq!(PageRequest::get("https://example.com").body, None);
    }
}
