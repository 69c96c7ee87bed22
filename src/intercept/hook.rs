//! The capture hook
//!
//! Sits in the interceptor chain of the default [`NetworkConfiguration`] and
//! records every request it sees into the [`RecordStore`]. The request handed
//! on to the transport is the one the app built; only the in-process
//! `captured` tag changes.
//!
//! [`NetworkConfiguration`]: super::NetworkConfiguration

use super::network::{Interceptor, Next};
use super::transport::{HttpRequest, HttpResponse, RequestBody, TransportError};
use crate::models::{Completion, ResponseFacet, SessionConfig, TrafficRecord};
use crate::storage::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Registration name of the capture hook
pub const HOOK_NAME: &str = "trafficscope.capture";

/// Request bodies larger than this are recorded truncated (512 KiB)
pub const MAX_BODY_CAPTURE_BYTES: usize = 512 * 1024;

/// State shared between the controller and the hook
pub struct CaptureContext {
    config: RwLock<SessionConfig>,
    enabled: AtomicBool,
    store: Arc<RecordStore>,
}

impl CaptureContext {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            config: RwLock::new(SessionConfig::default()),
            enabled: AtomicBool::new(false),
            store,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Returns the previous value
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst)
    }

    pub fn is_ignored(&self, url: &str) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ignore_rules
            .is_ignored(url)
    }

    pub fn config(&self) -> SessionConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_config<R>(&self, f: impl FnOnce(&mut SessionConfig) -> R) -> R {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut config)
    }
}

pub struct CaptureInterceptor {
    context: Arc<CaptureContext>,
}

impl CaptureInterceptor {
    pub fn new(context: Arc<CaptureContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Interceptor for CaptureInterceptor {
    fn name(&self) -> &'static str {
        HOOK_NAME
    }

    async fn intercept(
        &self,
        mut request: HttpRequest,
        next: Next<'_>,
    ) -> Result<HttpResponse, TransportError> {
        if request.is_internal() || request.is_captured() {
            return next.run(request).await;
        }
        if !self.context.is_enabled() {
            return next.run(request).await;
        }
        if self.context.is_ignored(&request.url) {
            tracing::trace!("Ignoring {} {}", request.method, request.url);
            return next.run(request).await;
        }

        let store = Arc::clone(&self.context.store);
        let id = store.insert(snapshot_request(&request));
        request.mark_captured();
        let pending = PendingCapture {
            store,
            id: Some(id),
        };

        let result = next.run(request).await;
        match &result {
            Ok(response) => pending.finish(Completion::Response(snapshot_response(response))),
            Err(err) => pending.finish(Completion::Failed(err.to_string())),
        }
        result
    }
}

/// Settles the record when the exchange ends. If the request future is
/// dropped first, the record is settled as canceled.
struct PendingCapture {
    store: Arc<RecordStore>,
    id: Option<String>,
}

impl PendingCapture {
    fn finish(mut self, completion: Completion) {
        if let Some(id) = self.id.take() {
            self.store.update(&id, completion, now_ms());
        }
    }
}

impl Drop for PendingCapture {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            tracing::debug!("Request for record {} dropped before completion", id);
            self.store.update(&id, Completion::Canceled, now_ms());
        }
    }
}

fn snapshot_request(request: &HttpRequest) -> TrafficRecord {
    let mut record = TrafficRecord::new(
        request.method.as_str(),
        &request.url,
        request.headers.clone(),
    );
    match &request.body {
        RequestBody::Empty => {}
        RequestBody::Buffered(bytes) => {
            let (body, truncated) = capture_body(bytes);
            record = record.with_body(Some(body));
            if truncated {
                record.add_note(format!(
                    "request body truncated to {} of {} bytes",
                    MAX_BODY_CAPTURE_BYTES,
                    bytes.len()
                ));
            }
        }
        RequestBody::Streaming(_) => {
            record.add_note("streaming request body not captured");
        }
    }
    record
}

fn snapshot_response(response: &HttpResponse) -> ResponseFacet {
    ResponseFacet {
        status_code: response.status,
        headers: response.headers.clone(),
        body: if response.body.is_empty() {
            None
        } else {
            Some(response.body.to_vec())
        },
    }
}

fn capture_body(bytes: &[u8]) -> (Vec<u8>, bool) {
    if bytes.len() > MAX_BODY_CAPTURE_BYTES {
        (bytes[..MAX_BODY_CAPTURE_BYTES].to_vec(), true)
    } else {
        (bytes.to_vec(), false)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
