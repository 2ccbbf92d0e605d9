//! Typed messages exchanged between the worker and its clients.
//!
//! On the wire every message is a JSON object whose `type` field names the
//! variant, e.g. `{"type": "REQUEST_SYNC", "timestamp": "..."}`.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Current time in the format pages produce with `toISOString()`.
#[must_use]
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Discriminant of a [`ClientMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SyncStarted,
    RequestSync,
    SyncResult,
    SkipWaiting,
    CacheNewVersion,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SyncStarted => "SYNC_STARTED",
            Self::RequestSync => "REQUEST_SYNC",
            Self::SyncResult => "SYNC_RESULT",
            Self::SkipWaiting => "SKIP_WAITING",
            Self::CacheNewVersion => "CACHE_NEW_VERSION",
        };
        f.write_str(name)
    }
}

/// A message between the worker and a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Worker → page: a sync attempt has begun.
    SyncStarted {
        #[serde(default = "timestamp_now")]
        timestamp: String,
    },
    /// Worker → page: drain the pending-operation queue. Page → worker:
    /// run a sync attempt now.
    RequestSync {
        #[serde(default = "timestamp_now")]
        timestamp: String,
    },
    /// Page → worker → every other page: outcome of a drain.
    SyncResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        /// Result fields reported by the page, passed through untouched.
        #[serde(flatten)]
        result: Map<String, Value>,
    },
    /// Page → worker: activate the waiting worker now.
    SkipWaiting,
    /// Page → worker: re-populate the static store from the manifest.
    CacheNewVersion,
}

impl ClientMessage {
    /// A `SYNC_STARTED` stamped with `timestamp`.
    #[must_use]
    pub fn sync_started(timestamp: impl Into<String>) -> Self {
        Self::SyncStarted {
            timestamp: timestamp.into(),
        }
    }

    /// A `REQUEST_SYNC` stamped with `timestamp`.
    #[must_use]
    pub fn request_sync(timestamp: impl Into<String>) -> Self {
        Self::RequestSync {
            timestamp: timestamp.into(),
        }
    }

    /// Returns the variant's discriminant.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        match self {
            Self::SyncStarted { .. } => MessageType::SyncStarted,
            Self::RequestSync { .. } => MessageType::RequestSync,
            Self::SyncResult { .. } => MessageType::SyncResult,
            Self::SkipWaiting => MessageType::SkipWaiting,
            Self::CacheNewVersion => MessageType::CacheNewVersion,
        }
    }

    /// Parses a message from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the `type` is unknown.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the message to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
