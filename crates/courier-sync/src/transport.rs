//! # HTTP Transport
//!
//! The seam between the engine and the network.
//!
//! [`HttpTransport`] sends one request and hands back the raw status and
//! body. It knows nothing about credentials, retries, or status semantics;
//! those belong to [`crate::client::RemoteClient`] and
//! [`crate::token::TokenManager`]. Tests plug a scripted fake in here.
//!
//! ```text
//!   RemoteClient / TokenManager
//!              │ RemoteRequest
//!              ▼
//!   ┌──────────────────────┐        ┌──────────────────────────┐
//!   │ dyn HttpTransport    │──────► │ ReqwestTransport         │──► platform
//!   └──────────────────────┘        │ base URL, timeout, UA    │
//!                                   └──────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

/// One outbound call, relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    /// Path such as `/v2/orders`; joined onto the base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl RemoteRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        RemoteRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::None,
        }
    }

    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    /// Sets a header, replacing any previous value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// JSON body text for the audit log.
    pub fn body_text(&self) -> Option<String> {
        match &self.body {
            RequestBody::None => None,
            RequestBody::Json(v) => Some(v.to_string()),
            // Form bodies carry the client secret.
            RequestBody::Form(_) => Some("<form>".to_string()),
        }
    }
}

/// Raw answer of the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        RemoteResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON; an empty body is `null`.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
    }

    /// JSON body if it parses, otherwise the body as a string.
    pub fn payload(&self) -> Value {
        self.json()
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }

    /// Short single-line rendering for logs.
    pub fn preview(&self) -> String {
        const PREVIEW_CHAR_LIMIT: usize = 160;

        let compact = String::from_utf8_lossy(&self.body)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
        if compact.chars().count() > PREVIEW_CHAR_LIMIT {
            format!("{preview}...")
        } else {
            preview
        }
    }

    /// Body text for the audit log; binary bodies are summarized.
    pub fn audit_text(&self) -> String {
        match std::str::from_utf8(&self.body) {
            Ok(text) => text.to_string(),
            Err(_) => format!("<binary {} bytes>", self.body.len()),
        }
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Failure to get any HTTP answer at all.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

/// Sends a single request; never retries.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError>;
}

// =============================================================================
// Reqwest Implementation
// =============================================================================

/// Transport backed by a pooled reqwest client.
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    user_agent: String,
}

impl ReqwestTransport {
    /// Builds a transport with a fixed per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        base_url: Url,
        timeout: Duration,
        user_agent: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(ReqwestTransport {
            client,
            base_url: with_trailing_slash(base_url),
            user_agent: user_agent.into(),
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .header(reqwest::header::ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::None => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_transport_error)?;

        Ok(RemoteResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn map_transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}
