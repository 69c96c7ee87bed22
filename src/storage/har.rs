use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::error::InspectorError;
use crate::models::{Headers, RecordState, TrafficRecord};

const HAR_VERSION: &str = "1.2";
const CREATOR_NAME: &str = "TrafficScope";
const CREATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
const HTTP_VERSION: &str = "HTTP/1.1";

#[derive(Serialize)]
struct HarLog<'a> {
    log: HarLogInner<'a>,
}

#[derive(Serialize)]
struct HarLogInner<'a> {
    version: &'static str,
    creator: HarCreator<'a>,
    entries: Vec<HarEntry>,
}

#[derive(Serialize)]
struct HarCreator<'a> {
    name: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
struct HarEntry {
    #[serde(rename = "startedDateTime")]
    started_datetime: String,
    time: i64,
    request: HarRequest,
    response: HarResponse,
    cache: HashMap<String, Value>,
    timings: HarTimings,
    #[serde(skip_serializing_if = "Option::is_none", rename = "_error")]
    error: Option<String>,
}

#[derive(Serialize)]
struct HarRequest {
    method: String,
    url: String,
    #[serde(rename = "httpVersion")]
    http_version: &'static str,
    headers: Vec<HarHeader>,
    #[serde(rename = "queryString")]
    query_string: Vec<HarHeader>,
    cookies: Vec<Value>,
    #[serde(rename = "headersSize")]
    headers_size: i64,
    #[serde(rename = "bodySize")]
    body_size: i64,
    #[serde(skip_serializing_if = "Option::is_none", rename = "postData")]
    post_data: Option<HarPostData>,
}

#[derive(Serialize)]
struct HarResponse {
    status: i64,
    #[serde(rename = "statusText")]
    status_text: String,
    #[serde(rename = "httpVersion")]
    http_version: &'static str,
    headers: Vec<HarHeader>,
    cookies: Vec<Value>,
    content: HarContent,
    #[serde(rename = "redirectURL")]
    redirect_url: String,
    #[serde(rename = "headersSize")]
    headers_size: i64,
    #[serde(rename = "bodySize")]
    body_size: i64,
}

#[derive(Serialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct HarPostData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
}

#[derive(Serialize)]
struct HarContent {
    size: i64,
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
}

#[derive(Serialize)]
struct HarTimings {
    send: i64,
    wait: i64,
    receive: i64,
}

/// Build a HAR document. Pending records are skipped.
pub fn records_to_har(records: &[TrafficRecord]) -> anyhow::Result<Value> {
    let entries = records
        .iter()
        .filter(|r| r.state != RecordState::Pending)
        .map(HarEntry::from_record)
        .collect();
    serde_json::to_value(HarLog {
        log: HarLogInner {
            version: HAR_VERSION,
            creator: HarCreator {
                name: CREATOR_NAME,
                version: CREATOR_VERSION,
            },
            entries,
        },
    })
    .context("serializing HAR log")
}

pub async fn export_har_to_path(
    records: Vec<TrafficRecord>,
    output_path: impl AsRef<Path>,
) -> anyhow::Result<usize> {
    let settled = records
        .iter()
        .filter(|r| r.state != RecordState::Pending)
        .count();
    if settled == 0 {
        return Err(InspectorError::NothingToExport.into());
    }
    let value = records_to_har(&records)?;
    let json = serde_json::to_string_pretty(&value)?;
    tokio::fs::write(output_path, json)
        .await
        .context("writing HAR file")?;
    Ok(settled)
}

impl HarEntry {
    fn from_record(record: &TrafficRecord) -> Self {
        let started_datetime = Utc
            .timestamp_millis_opt(record.request.started_at)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let time = record.duration_ms.unwrap_or(0) as i64;
        Self {
            started_datetime,
            time,
            request: HarRequest::from_record(record),
            response: HarResponse::from_record(record),
            cache: HashMap::new(),
            timings: HarTimings {
                send: 0,
                wait: time,
                receive: 0,
            },
            error: record.error.clone(),
        }
    }
}

impl HarRequest {
    fn from_record(record: &TrafficRecord) -> Self {
        let request = &record.request;
        let content_type = request.headers.get("content-type");
        let (body_size, post_data) = match &request.body {
            Some(bytes) => {
                let (text, encoding) = encode_text(bytes);
                (
                    bytes.len() as i64,
                    Some(HarPostData {
                        mime_type: content_type.unwrap_or("application/octet-stream").to_string(),
                        text,
                        encoding,
                    }),
                )
            }
            None => (0, None),
        };
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            http_version: HTTP_VERSION,
            headers: har_headers(&request.headers),
            query_string: query_pairs(&request.url),
            cookies: Vec::new(),
            headers_size: -1,
            body_size,
            post_data,
        }
    }
}

impl HarResponse {
    fn from_record(record: &TrafficRecord) -> Self {
        let Some(response) = &record.response else {
            // HAR has no failure entry; status 0 is the convention.
            return Self {
                status: 0,
                status_text: record.error.clone().unwrap_or_default(),
                http_version: HTTP_VERSION,
                headers: Vec::new(),
                cookies: Vec::new(),
                content: HarContent {
                    size: 0,
                    mime_type: "x-unknown".to_string(),
                    text: None,
                    encoding: None,
                },
                redirect_url: String::new(),
                headers_size: -1,
                body_size: -1,
            };
        };

        let mime_type = response
            .headers
            .get("content-type")
            .unwrap_or("application/octet-stream")
            .to_string();
        let (size, text, encoding) = match &response.body {
            Some(bytes) => {
                let (text, encoding) = encode_text(bytes);
                (bytes.len() as i64, Some(text), encoding)
            }
            None => (0, None, None),
        };
        let status_text = http::StatusCode::from_u16(response.status_code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();

        Self {
            status: response.status_code as i64,
            status_text,
            http_version: HTTP_VERSION,
            headers: har_headers(&response.headers),
            cookies: Vec::new(),
            content: HarContent {
                size,
                mime_type,
                text,
                encoding,
            },
            redirect_url: response.headers.get("location").unwrap_or_default().to_string(),
            headers_size: -1,
            body_size: size,
        }
    }
}

fn har_headers(headers: &Headers) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|(name, value)| HarHeader {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

fn encode_text(bytes: &[u8]) -> (String, Option<&'static str>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), None),
        Err(_) => (general_purpose::STANDARD.encode(bytes), Some("base64")),
    }
}

fn query_pairs(url: &str) -> Vec<HarHeader> {
    let Some(query) = url
        .parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.query().map(str::to_string))
    else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            HarHeader {
                name: percent_decode(name),
                value: percent_decode(value),
            }
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(h), Some(l)) => {
                        output.push(h << 4 | l);
                        i += 3;
                    }
                    _ => {
                        output.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                output.push(b' ');
                i += 1;
            }
            byte => {
                output.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&output).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
