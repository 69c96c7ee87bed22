//! Session configuration
//!
//! Everything here is set through explicit calls on the controller; there is
//! no file or environment format.

use crate::intercept::IgnoreRules;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_RECORDS: usize = 10_000;
const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_LOG_MAX_AGE_DAYS: u64 = 5;

/// Storage policy handed to networking sessions built from the default configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    #[default]
    NotAllowed,
    Allowed,
    AllowedInMemoryOnly,
}

/// What brings the inspector on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerGesture {
    #[default]
    Shake,
    /// The host app calls show/hide/toggle itself
    Custom,
}

/// Bounds on what the record store keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionLimits {
    pub max_records: usize,
    pub max_bytes: usize,
}

impl RetentionLimits {
    pub fn records(max_records: usize) -> Self {
        Self {
            max_records,
            ..Self::default()
        }
    }
}

impl Default for RetentionLimits {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Construction-time options for a [`crate::session::SessionController`]
#[derive(Debug, Clone)]
pub struct InspectorOptions {
    /// Base directory; traffic logs live in `<root>/traffic`
    pub storage_root: PathBuf,
    pub retention: RetentionLimits,
    /// Session logs older than this are purged at start
    pub log_max_age: Duration,
    /// Mirror completed records into the session log
    pub persist_session_log: bool,
}

impl InspectorOptions {
    pub fn with_storage_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: root.into(),
            ..Self::default()
        }
    }
}

impl Default for InspectorOptions {
    fn default() -> Self {
        let storage_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("trafficscope");
        Self {
            storage_root,
            retention: RetentionLimits::default(),
            log_max_age: Duration::from_secs(DEFAULT_LOG_MAX_AGE_DAYS * 24 * 60 * 60),
            persist_session_log: true,
        }
    }
}

/// Mutable, process-lifetime settings owned by the controller
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Requests matching these never enter the store
    pub ignore_rules: IgnoreRules,
    pub cache_policy: CachePolicy,
    pub gesture: TriggerGesture,
    /// Milliseconds since epoch of the last presented -> hidden transition
    pub last_dismissed_at: Option<i64>,
}
