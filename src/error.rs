use thiserror::Error;

/// Errors surfaced to callers of the inspector.
///
/// None of these ever reach the host app's own network traffic; the capture
/// path swallows and logs its failures instead.
#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("session log line {line} is malformed: {source}")]
    MalformedLog {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("no records to export")]
    NothingToExport,
}

pub type Result<T> = std::result::Result<T, InspectorError>;
