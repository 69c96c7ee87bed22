//! Traffic record model
//!
//! Represents a single request/response exchange observed by the capture hook.

use super::headers::Headers;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lifecycle of a captured exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    /// Request observed, waiting on the transport
    Pending,
    /// A response was received
    Completed,
    /// The transport reported an error
    Failed,
    /// The caller dropped the request before it finished
    Canceled,
}

/// What the app sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFacet {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    #[serde(default, with = "body_encoding")]
    pub body: Option<Vec<u8>>,
    /// Milliseconds since epoch
    pub started_at: i64,
}

/// What came back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFacet {
    pub status_code: u16,
    pub headers: Headers,
    #[serde(default, with = "body_encoding")]
    pub body: Option<Vec<u8>>,
}

/// Outcome delivered to the store when the transport settles
#[derive(Debug, Clone)]
pub enum Completion {
    Response(ResponseFacet),
    Failed(String),
    Canceled,
}

/// One captured request/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Unique identifier, assigned at capture time
    pub id: String,
    /// Insertion order within the store, used as a tie-break
    #[serde(default)]
    pub sequence: u64,
    pub state: RecordState,
    pub request: RequestFacet,
    pub response: Option<ResponseFacet>,
    /// Transport error description, set instead of `response`
    pub error: Option<String>,
    /// Milliseconds since epoch
    pub completed_at: Option<i64>,
    pub duration_ms: Option<u64>,
    /// Capture problems worth showing next to the record
    pub notes: Option<String>,
}

impl TrafficRecord {
    /// Create a pending record for an outgoing request
    pub fn new(method: &str, url: &str, headers: Headers) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence: 0,
            state: RecordState::Pending,
            request: RequestFacet {
                method: method.to_ascii_uppercase(),
                url: url.to_string(),
                headers,
                body: None,
                started_at: Utc::now().timestamp_millis(),
            },
            response: None,
            error: None,
            completed_at: None,
            duration_ms: None,
            notes: None,
        }
    }

    pub fn with_body(mut self, body: Option<Vec<u8>>) -> Self {
        self.request.body = body.filter(|b| !b.is_empty());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.state == RecordState::Pending
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }

    /// Apply the outcome. Returns false if the record was already settled.
    pub(crate) fn complete(&mut self, completion: Completion, completed_at: i64) -> bool {
        if !self.is_pending() {
            return false;
        }
        match completion {
            Completion::Response(response) => {
                self.state = RecordState::Completed;
                self.response = Some(response);
            }
            Completion::Failed(error) => {
                self.state = RecordState::Failed;
                self.error = Some(error);
            }
            Completion::Canceled => {
                self.state = RecordState::Canceled;
                self.error = Some("request canceled".to_string());
            }
        }
        self.completed_at = Some(completed_at);
        self.duration_ms = Some(completed_at.saturating_sub(self.request.started_at).max(0) as u64);
        true
    }

    /// Append a note, keeping earlier ones
    pub(crate) fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        self.notes = Some(match self.notes.take() {
            Some(existing) => format!("{existing}; {note}"),
            None => note,
        });
    }

    /// Rough in-memory footprint used by the byte cap
    pub fn approx_size(&self) -> usize {
        let request = self.request.url.len()
            + self.request.method.len()
            + self.request.headers.byte_len()
            + self.request.body.as_ref().map_or(0, Vec::len);
        let response = self.response.as_ref().map_or(0, |r| {
            r.headers.byte_len() + r.body.as_ref().map_or(0, Vec::len)
        });
        request + response + self.error.as_ref().map_or(0, String::len)
    }

    /// Copy without bodies, for list views
    pub fn without_bodies(&self) -> Self {
        let mut light = self.clone();
        light.request.body = None;
        if let Some(response) = light.response.as_mut() {
            response.body = None;
        }
        light
    }

    /// Get duration as formatted string
    pub fn duration_str(&self) -> String {
        match self.duration_ms {
            Some(ms) if ms < 1000 => format!("{}ms", ms),
            Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
            None => "-".to_string(),
        }
    }
}

/// Filter options for querying stored records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Case-insensitive substring of the URL or the method
    pub text: Option<String>,
    /// Exact method, compared case-insensitively
    pub method: Option<String>,
    /// Minimum HTTP status (inclusive)
    pub status_min: Option<u16>,
    /// Maximum HTTP status (inclusive)
    pub status_max: Option<u16>,
}

impl RecordFilter {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &TrafficRecord) -> bool {
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            if !record.request.url.to_lowercase().contains(&needle)
                && !record.request.method.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if !record.request.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(min) = self.status_min {
            if record.status_code().unwrap_or(0) < min {
                return false;
            }
        }
        if let Some(max) = self.status_max {
            if record.status_code().unwrap_or(0) > max {
                return false;
            }
        }
        true
    }
}

/// Bodies are written as base64 so a log line stays printable
mod body_encoding {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match body {
            Some(bytes) => serializer.serialize_some(&general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| {
                general_purpose::STANDARD
                    .decode(text)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(method: &str, url: &str) -> TrafficRecord {
        TrafficRecord::new(method, url, Headers::new())
    }

    #[test]
    fn completion_applies_only_once() {
        let mut record = sample("get", "https://example.com/a");
        assert_eq!(record.request.method, "GET");

        let started = record.request.started_at;
        let response = ResponseFacet {
            status_code: 200,
            headers: Headers::new(),
            body: Some(b"ok".to_vec()),
        };
        assert!(record.complete(Completion::Response(response), started + 25));
        assert_eq!(record.state, RecordState::Completed);
        assert_eq!(record.duration_ms, Some(25));

        assert!(!record.complete(Completion::Failed("late".into()), started + 50));
        assert_eq!(record.state, RecordState::Completed);
        assert!(record.error.is_none());
        assert_eq!(record.duration_ms, Some(25));
    }

    #[test]
    fn filter_text_matches_url_or_method() {
        let record = sample("POST", "https://api.example.com/Login");

        assert!(RecordFilter::text("login").matches(&record));
        assert!(RecordFilter::text("post").matches(&record));
        assert!(!RecordFilter::text("delete").matches(&record));
        assert!(RecordFilter::text("").matches(&record));
    }

    #[test]
    fn filter_status_range_excludes_pending() {
        let record = sample("GET", "https://example.com");
        let filter = RecordFilter {
            status_min: Some(200),
            ..Default::default()
        };
        assert!(!filter.matches(&record));
    }

    #[test]
    fn bodies_survive_json_round_trip() {
        let record = sample("PUT", "https://example.com/upload").with_body(Some(vec![0, 159, 146]));
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));

        let parsed: TrafficRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.request.body, Some(vec![0, 159, 146]));
        assert_eq!(parsed, record);
    }

    #[test]
    fn without_bodies_strips_both_sides() {
        let mut record = sample("GET", "https://example.com").with_body(Some(b"req".to_vec()));
        record.complete(
            Completion::Response(ResponseFacet {
                status_code: 204,
                headers: Headers::new(),
                body: Some(b"resp".to_vec()),
            }),
            record.request.started_at,
        );

        let light = record.without_bodies();
        assert!(light.request.body.is_none());
        assert!(light.response.unwrap().body.is_none());
        assert!(record.approx_size() > 0);
    }
}
