//! Frame record: the atomic unit of a session log
//!
//! A frame is serialized as a field-named map so readers ignore fields they
//! do not know and default fields a writer did not send.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current frame format revision
pub const FRAME_VERSION: u32 = 1;

/// Role used when the writer does not supply one
pub const DEFAULT_ROLE: &str = "user";

/// One event record in a session log.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Frame {
    /// Format revision
    pub version: u32,
    /// UTC append time, RFC 3339
    pub time: String,
    /// Sanitized session identifier
    pub session_id: String,
    /// Writer-supplied actor
    pub user_id: String,
    /// Free-form tag such as "user" or "assistant"
    pub role: String,
    /// Per-session sequence number, `None` when the writer opted out
    pub seq: Option<u64>,
    /// Payload
    pub content: String,
    /// Informational key/value pairs, never interpreted by the log
    pub metadata: BTreeMap<String, Value>,
}

impl Frame {
    /// Builds a frame stamped with the current UTC time.
    pub fn new(session_id: impl Into<String>, fields: FrameFields, seq: Option<u64>) -> Self {
        Self {
            version: FRAME_VERSION,
            time: now_rfc3339(),
            session_id: session_id.into(),
            user_id: fields.user_id,
            role: fields.role,
            seq,
            content: fields.content,
            metadata: fields.metadata,
        }
    }

    /// Parsed append time, if the stored string is a recognizable timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.time)
    }
}

/// Writer-supplied part of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFields {
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
}

impl FrameFields {
    /// Fields with the default role and no metadata.
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: DEFAULT_ROLE.to_string(),
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Current UTC time with microsecond precision and an explicit `+00:00` offset.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parses RFC 3339 (`Z` or numeric offset), a naive ISO-8601 date-time, or a
/// bare date. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
