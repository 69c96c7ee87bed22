//! Requests, responses and the transport seam
//!
//! A [`Transport`] is whatever actually puts bytes on the wire for the host
//! app. The capture hook sits in front of it and never changes what it sees.

use crate::models::{CachePolicy, Headers};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync>>;

/// Outgoing request body
pub enum RequestBody {
    Empty,
    Buffered(Bytes),
    /// Read once by the transport; cannot be snapshotted
    Streaming(BodyStream),
}

impl RequestBody {
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static,
    {
        RequestBody::Streaming(Box::pin(stream))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            RequestBody::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// In-process markers. These never reach the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RequestTags {
    /// Issued by the inspector for its own bookkeeping
    internal: bool,
    /// Already recorded by a capture hook further out
    captured: bool,
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Headers,
    pub body: RequestBody,
    tags: RequestTags,
    cache_policy: CachePolicy,
}

impl HttpRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: RequestBody::Empty,
            tags: RequestTags::default(),
            cache_policy: CachePolicy::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(http::Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Mark as issued by the inspector itself so no hook records it
    pub fn internal(mut self) -> Self {
        self.tags.internal = true;
        self
    }

    pub fn is_internal(&self) -> bool {
        self.tags.internal
    }

    pub fn is_captured(&self) -> bool {
        self.tags.captured
    }

    pub(crate) fn mark_captured(&mut self) {
        self.tags.captured = true;
    }

    /// Storage policy of the session that sent this request
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub(crate) fn set_cache_policy(&mut self, policy: CachePolicy) {
        self.cache_policy = policy;
    }
}

/// Fully buffered response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            cache_policy,
            ..
        } = request;

        let mut builder = self.client.request(method, &url);
        if let Some(directive) = cache_directive(cache_policy, &headers) {
            builder = builder.header(reqwest::header::CACHE_CONTROL, directive);
        }
        for (key, value) in headers.iter() {
            if let Ok(name) = reqwest::header::HeaderName::try_from(key) {
                if let Ok(value) = reqwest::header::HeaderValue::from_str(value) {
                    builder = builder.header(name, value);
                }
            }
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Buffered(bytes) => builder.body(bytes),
            RequestBody::Streaming(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = Headers::from_header_map(response.headers());
        let body = response.bytes().await.map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// `reqwest` keeps no response cache of its own, so only the no-store case
/// needs saying on the wire. A caller-supplied Cache-Control wins.
fn cache_directive(policy: CachePolicy, headers: &Headers) -> Option<&'static str> {
    match policy {
        CachePolicy::NotAllowed if !headers.contains("cache-control") => Some("no-store"),
        _ => None,
    }
}
