//! On-disk layout
//!
//! ```text
//! <storage_root>/
//!   traffic/   session_<started_ms>.log files only
//!   logs/      diagnostics written by the tracing appender
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const TRAFFIC_DIR: &str = "traffic";
const DIAGNOSTICS_DIR: &str = "logs";
const SESSION_LOG_PREFIX: &str = "session_";
const SESSION_LOG_EXT: &str = "log";

#[derive(Debug, Clone)]
pub struct StoragePaths {
    traffic: PathBuf,
    diagnostics: PathBuf,
}

impl StoragePaths {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        let root = storage_root.as_ref();
        Self {
            traffic: root.join(TRAFFIC_DIR),
            diagnostics: root.join(DIAGNOSTICS_DIR),
        }
    }

    pub fn traffic_dir(&self) -> &Path {
        &self.traffic
    }

    pub fn diagnostics_dir(&self) -> &Path {
        &self.diagnostics
    }

    pub fn session_log_path(&self, session_started_ms: i64) -> PathBuf {
        self.traffic.join(format!(
            "{}{}.{}",
            SESSION_LOG_PREFIX, session_started_ms, SESSION_LOG_EXT
        ))
    }

    pub fn create_dir_if_missing(&self) -> io::Result<()> {
        fs::create_dir_all(&self.traffic)
    }

    pub fn delete_dir(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.traffic) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Delete and recreate the traffic directory
    pub fn clear_old_data(&self) -> io::Result<()> {
        self.delete_dir()?;
        self.create_dir_if_missing()
    }

    /// Session log files currently on disk, oldest name first
    pub fn session_logs(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.traffic) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut logs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if is_session_log(&path) {
                logs.push(path);
            }
        }
        logs.sort();
        Ok(logs)
    }

    /// Remove session logs whose modification time is at least `max_age` ago
    pub fn purge_logs_older_than(&self, max_age: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut purged = 0;
        for path in self.session_logs()? {
            let modified = fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                fs::remove_file(&path)?;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!("Purged {} session logs older than {:?}", purged, max_age);
        }
        Ok(purged)
    }
}

fn is_session_log(path: &Path) -> bool {
    let has_prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(SESSION_LOG_PREFIX))
        .unwrap_or(false);
    has_prefix && path.extension().and_then(|e| e.to_str()) == Some(SESSION_LOG_EXT)
}
