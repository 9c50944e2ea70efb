//! Core data model shared by the cache, the extractor and the orchestrator.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Build the composite identity of an event.
///
/// Listing sources and cache lookups must agree on this exact format, a
/// collision silently overwrites the older record.
pub fn event_key(category: &str, name: &str, tag: &str) -> String {
    format!("[{}] {} ({})", category.trim(), name.trim(), tag.trim())
}

/// The set of resolved records owned by the orchestrator for one run.
pub type WorkingSet = HashMap<String, CacheRecord>;

/// A persisted resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(rename = "url")]
    pub resolved_url: String,
    pub resolved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CacheRecord {
    pub fn new(resolved_url: impl Into<String>, resolved_at: DateTime<Utc>) -> Self {
        Self {
            resolved_url: resolved_url.into(),
            resolved_at,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An event discovered on a listing page during the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub key: String,
    /// Opaque value handed to the extractor, usually the event page URL.
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_hint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CandidateEvent {
    pub fn new(key: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reference: reference.into(),
            schedule_hint: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_schedule_hint(mut self, hint: impl Into<String>) -> Self {
        self.schedule_hint = Some(hint.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Which hop of the extraction chain produced a stream URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedVia {
    /// Playable URL embedded directly in the event page.
    DirectPage,
    /// Base64 payload decoded from the embedded frame.
    FramePayload,
    /// Playable URL embedded directly in the frame.
    FrameDirect,
    /// Loose base64 string in the frame that decoded to a playlist URL.
    FrameBlob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub url: String,
    pub via: ResolvedVia,
}

/// Why an event could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnresolvedReason {
    #[error("fetching {url} failed: {error}")]
    Fetch { url: String, error: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an empty body")]
    EmptyBody { url: String },
    #[error("no embedded frame found")]
    NoFrame,
    #[error("embedded frame has no source")]
    MissingFrameSource,
    #[error("invalid frame url: {0}")]
    InvalidFrameUrl(String),
    #[error("no stream payload found in frame")]
    NoPayload,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
    #[error("payload is not valid utf-8")]
    InvalidUtf8,
    #[error("decoded payload is not a stream url: {0}")]
    NotAStreamUrl(String),
}

/// Terminal state of one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedStream),
    Unresolved(UnresolvedReason),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(stream) => Some(&stream.url),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn into_result(self) -> std::result::Result<ResolvedStream, UnresolvedReason> {
        match self {
            Resolution::Resolved(stream) => Ok(stream),
            Resolution::Unresolved(reason) => Err(reason),
        }
    }
}

impl From<std::result::Result<ResolvedStream, UnresolvedReason>> for Resolution {
    fn from(value: std::result::Result<ResolvedStream, UnresolvedReason>) -> Self {
        match value {
            Ok(stream) => Resolution::Resolved(stream),
            Err(reason) => Resolution::Unresolved(reason),
        }
    }
}
