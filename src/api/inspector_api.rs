//! Inspector API
//!
//! Entry points for the host app and for the presentation surface. Errors
//! cross this boundary as strings.

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::{RecordFilter, TrafficRecord};
use crate::session::SessionController;
use crate::storage::{self, RecordEvent, SessionLog};

/// Keeps the non-blocking log writer flushing until the process exits
#[cfg_attr(debug_assertions, allow(dead_code))]
static LOG_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Get the version of the TrafficScope core library
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Initialize diagnostics logging (call once at startup).
/// `diagnostics_dir` is used for log files in release mode.
#[allow(unused_variables)]
pub fn init_core(diagnostics_dir: Option<PathBuf>) -> Result<bool, String> {
    let level = resolve_log_level();

    #[cfg(debug_assertions)]
    {
        // Debug mode: log to console (stderr)
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .try_init();
    }

    #[cfg(not(debug_assertions))]
    {
        let log_dir = diagnostics_dir.unwrap_or_else(|| PathBuf::from("logs"));
        std::fs::create_dir_all(&log_dir).map_err(|e| {
            format!(
                "Failed to create log directory {}: {}",
                log_dir.display(),
                e
            )
        })?;

        if LOG_GUARD.get().is_none() {
            let file_appender = tracing_appender::rolling::daily(&log_dir, "trafficscope_core");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            if LOG_GUARD.set(guard).is_ok() {
                // Logging may already be set up by the host app; not fatal.
                let _ = tracing_subscriber::fmt()
                    .with_max_level(level)
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .try_init();
            }
        }
    }

    tracing::info!(
        "TrafficScope core initialized v{}",
        env!("CARGO_PKG_VERSION")
    );
    Ok(true)
}

fn resolve_log_level() -> tracing::level_filters::LevelFilter {
    parse_log_level(std::env::var("RUST_LOG").ok().as_deref())
}

fn parse_log_level(value: Option<&str>) -> tracing::level_filters::LevelFilter {
    use tracing::level_filters::LevelFilter;

    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => LevelFilter::TRACE,
        Some("debug") => LevelFilter::DEBUG,
        Some("warn") | Some("warning") => LevelFilter::WARN,
        Some("error") => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// What the presentation surface is allowed to do. It reads records and
/// closes itself; it never mutates records.
#[derive(Clone)]
pub struct InspectorApi {
    controller: Arc<SessionController>,
}

impl InspectorApi {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    /// Records for the list view, most recent first, bodies stripped
    pub fn list(&self) -> Vec<TrafficRecord> {
        self.controller
            .list()
            .iter()
            .map(TrafficRecord::without_bodies)
            .collect()
    }

    /// Full record including bodies
    pub fn get(&self, id: &str) -> Result<TrafficRecord, String> {
        self.controller
            .get(id)
            .map(|record| (*record).clone())
            .ok_or_else(|| "Record not found".to_string())
    }

    pub fn clear(&self) -> u64 {
        self.controller.clear() as u64
    }

    pub fn set_filter(&self, text: String) {
        self.controller.set_filter(text);
    }

    pub fn set_record_filter(&self, filter: RecordFilter) {
        self.controller.set_record_filter(filter);
    }

    pub fn is_started(&self) -> bool {
        self.controller.is_started()
    }

    pub fn is_enabled(&self) -> bool {
        self.controller.is_enabled()
    }

    pub fn session_log(&self) -> Option<Vec<u8>> {
        self.controller.session_log()
    }

    /// Export the records matching the current filter to a HAR file
    pub async fn export_har(&self, output_path: impl AsRef<Path>) -> Result<u64, String> {
        let records = self.controller.list().to_vec();
        let count = storage::export_har_to_path(records, output_path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(count as u64)
    }

    /// Read back a session log written by an earlier run
    pub fn load_session_log(&self, path: impl AsRef<Path>) -> Result<Vec<TrafficRecord>, String> {
        SessionLog::read_records(path).map_err(|e| e.to_string())
    }

    /// The surface was closed by the user
    pub fn close(&self) {
        self.controller.hide();
    }

    pub fn subscribe_records(&self) -> broadcast::Receiver<RecordEvent> {
        self.controller.subscribe_records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::NetworkConfiguration;
    use crate::models::{Completion, Headers, InspectorOptions, ResponseFacet};
    use tempfile::tempdir;
    use tracing::level_filters::LevelFilter;

    fn api() -> (InspectorApi, tempfile::TempDir) {
        let dir = tempdir().expect("temp dir");
        let controller = Arc::new(SessionController::new(
            InspectorOptions::with_storage_root(dir.path()),
            Arc::new(NetworkConfiguration::new()),
        ));
        controller.start();
        (InspectorApi::new(controller), dir)
    }

    fn insert_completed(api: &InspectorApi, url: &str) -> String {
        let mut record = TrafficRecord::new("POST", url, Headers::new()).with_body(Some(b"req".to_vec()));
        record.complete(
            Completion::Response(ResponseFacet {
                status_code: 200,
                headers: Headers::new(),
                body: Some(b"resp".to_vec()),
            }),
            record.request.started_at + 3,
        );
        api.controller.store().insert(record)
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!(parse_log_level(Some("DEBUG")), LevelFilter::DEBUG);
        assert_eq!(parse_log_level(Some("warning")), LevelFilter::WARN);
        assert_eq!(parse_log_level(Some("nonsense")), LevelFilter::INFO);
        assert_eq!(parse_log_level(None), LevelFilter::INFO);
    }

    #[test]
    fn init_core_can_be_called_twice() {
        let dir = tempdir().expect("temp dir");
        assert_eq!(init_core(Some(dir.path().to_path_buf())), Ok(true));
        assert_eq!(init_core(Some(dir.path().to_path_buf())), Ok(true));
    }

    #[test]
    fn list_strips_bodies_but_get_keeps_them() {
        let (api, _dir) = api();
        let id = insert_completed(&api, "https://example.com/a");

        let listed = api.list();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].request.body.is_none());
        assert!(listed[0].response.as_ref().unwrap().body.is_none());

        let full = api.get(&id).unwrap();
        assert_eq!(full.request.body.as_deref(), Some(&b"req"[..]));
        assert!(api.get("missing").is_err());
    }

    #[test]
    fn close_hides_and_clear_empties() {
        let (api, _dir) = api();
        insert_completed(&api, "https://example.com/a");
        api.controller.show();

        api.close();
        assert!(!api.controller.is_presented());
        assert_eq!(api.clear(), 1);
        assert_eq!(api.clear(), 0);
        assert!(api.list().is_empty());
    }

    #[tokio::test]
    async fn export_writes_har() {
        let (api, dir) = api();
        let out = dir.path().join("export.har");
        assert!(api.export_har(&out).await.is_err());

        insert_completed(&api, "https://example.com/a");
        assert_eq!(api.export_har(&out).await, Ok(1));
        let har: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(har["log"]["entries"][0]["request"]["url"], "https://example.com/a");
    }

    #[test]
    fn session_log_can_be_loaded_back() {
        let (api, _dir) = api();
        insert_completed(&api, "https://example.com/logged");
        let path = api.controller.store().log_path().unwrap();

        let records = api.load_session_log(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request.url, "https://example.com/logged");
    }
}
