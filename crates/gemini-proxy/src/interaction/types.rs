//! Interaction record types
//!
//! Defines the persisted unit of the proxy, one [`InteractionRecord`] per
//! inbound request, plus the request/response snapshots it is built from.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Header snapshot with lowercase names; repeated headers are joined with ", "
pub type HeaderSnapshot = BTreeMap<String, String>;

/// Capture a header map for logging
pub fn snapshot_headers(headers: &HeaderMap) -> HeaderSnapshot {
    let mut snapshot = HeaderSnapshot::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        snapshot
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    snapshot
}

/// True when the content-type's media type is `application/json`
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Read the `content-type` header as a string, if present and valid
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// A request or response body as it is written to the interaction log
#[derive(Debug, Clone, PartialEq)]
pub enum LoggedBody {
    /// Body declared as JSON and successfully parsed
    Json(Value),
    /// UTF-8 text
    Text(String),
    /// Anything that is neither JSON nor valid UTF-8
    Bytes(Bytes),
}

impl LoggedBody {
    /// Decode a body for logging based on its content-type
    ///
    /// JSON content is parsed and a parse failure is returned to the caller,
    /// since the content-type then lied about the payload. An empty body is
    /// always logged as empty text.
    pub fn decode(content_type: Option<&str>, raw: &[u8]) -> Result<Self, serde_json::Error> {
        if raw.is_empty() {
            return Ok(LoggedBody::Text(String::new()));
        }

        if is_json_content_type(content_type) {
            return serde_json::from_slice(raw).map(LoggedBody::Json);
        }

        Ok(match std::str::from_utf8(raw) {
            Ok(text) => LoggedBody::Text(text.to_string()),
            Err(_) => LoggedBody::Bytes(Bytes::copy_from_slice(raw)),
        })
    }

    /// Decode as UTF-8 text, replacing invalid sequences
    pub fn lossy(raw: &[u8]) -> Self {
        LoggedBody::Text(String::from_utf8_lossy(raw).into_owned())
    }

    /// Clone a top-level field out of a JSON object body
    pub fn object_field(&self, name: &str) -> Option<Value> {
        match self {
            LoggedBody::Json(Value::Object(map)) => map.get(name).cloned(),
            _ => None,
        }
    }
}

impl Serialize for LoggedBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LoggedBody::Json(value) => value.serialize(serializer),
            LoggedBody::Text(text) => serializer.serialize_str(text),
            LoggedBody::Bytes(raw) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("base64", &BASE64.encode(raw))?;
                map.end()
            }
        }
    }
}

/// Inbound request as captured before forwarding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub headers: HeaderSnapshot,
    pub body: LoggedBody,
}

/// Upstream response as captured after relaying
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HeaderSnapshot,
    pub body: LoggedBody,
}

/// Failure description stored on error records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionError {
    pub message: String,
    pub details: String,
}

/// Identity and start time of one inbound request
#[derive(Debug, Clone)]
pub struct InteractionStart {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    started: Instant,
}

impl InteractionStart {
    /// Mark the moment a request was first observed
    pub fn now() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the request was first observed
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

/// One persisted request/response (or request/error) cycle
///
/// Exactly one of `response` and `error` is set; records are only built
/// through [`InteractionRecord::completed`] and [`InteractionRecord::failed`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionRecord {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub request: RequestSnapshot,
    pub response: Option<ResponseSnapshot>,
    pub duration_ms: f64,
    pub generation_settings: Option<Value>,
    pub usage_metadata: Option<Value>,
    pub error: Option<InteractionError>,
}

impl InteractionRecord {
    /// Record for a request whose upstream response was relayed
    ///
    /// `usage_metadata` is only looked up when `extract_usage` is set; the
    /// streaming path stores its body as text and leaves it empty.
    pub fn completed(
        start: &InteractionStart,
        request: RequestSnapshot,
        response: ResponseSnapshot,
        extract_usage: bool,
    ) -> Self {
        let generation_settings = request.body.object_field("generationConfig");
        let usage_metadata = if extract_usage {
            response.body.object_field("usageMetadata")
        } else {
            None
        };

        Self {
            request_id: start.request_id,
            timestamp: start.timestamp,
            request,
            response: Some(response),
            duration_ms: start.elapsed_ms(),
            generation_settings,
            usage_metadata,
            error: None,
        }
    }

    /// Record for a request that ended in a proxy or upstream failure
    pub fn failed(start: &InteractionStart, request: RequestSnapshot, error: InteractionError) -> Self {
        let generation_settings = request.body.object_field("generationConfig");

        Self {
            request_id: start.request_id,
            timestamp: start.timestamp,
            request,
            response: None,
            duration_ms: start.elapsed_ms(),
            generation_settings,
            usage_metadata: None,
            error: Some(error),
        }
    }

    /// Whether this record describes a failure
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
