//! Shared types between the room server and its clients
//!
//! These types are used by both:
//! - the room actors and HTTP/WebSocket API (native Rust)
//! - browser clients (via the generated TypeScript bindings)
//!
//! Serializable with serde for JSON over WebSocket/HTTP and for the
//! on-disk history snapshots of durable rooms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

// ============================================================================
// Rooms
// ============================================================================

/// Kind of discussion surface a room is scoped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "generated.ts")]
pub enum RoomKind {
    Post,
    News,
    Video,
    Topic,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Post => "post",
            RoomKind::News => "news",
            RoomKind::Video => "video",
            RoomKind::Topic => "topic",
        }
    }

    /// Topic rooms keep their history across restarts; item rooms are ephemeral.
    pub fn is_durable(&self) -> bool {
        matches!(self, RoomKind::Topic)
    }

    /// Title shown until the content lookup for the subject resolves.
    pub fn placeholder_title(&self, subject: &str) -> String {
        match self {
            RoomKind::Post => "Post Discussion".to_string(),
            RoomKind::News => "News Discussion".to_string(),
            RoomKind::Video => "Video Discussion".to_string(),
            RoomKind::Topic => subject.to_string(),
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(RoomKind::Post),
            "news" => Ok(RoomKind::News),
            "video" => Ok(RoomKind::Video),
            // `chat_{topic}` is the historical spelling of topic rooms.
            "topic" | "chat" => Ok(RoomKind::Topic),
            other => Err(RoomIdError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomIdError {
    #[error("room id must look like {{kind}}_{{subject}}: {0}")]
    MissingSeparator(String),

    #[error("room id has an empty subject: {0}")]
    EmptySubject(String),

    #[error("unknown room kind: {0}")]
    UnknownKind(String),
}

/// Parsed `{kind}_{subject}` room identifier.
///
/// Parsed once at room creation and immutable afterwards. `as_str` is the
/// canonical spelling: `chat_X` parses to `topic_X`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId {
    raw: String,
    kind: RoomKind,
    subject: String,
}

impl RoomId {
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        let raw = raw.trim();
        let (kind, subject) = raw
            .split_once('_')
            .ok_or_else(|| RoomIdError::MissingSeparator(raw.to_string()))?;
        let kind = kind.parse::<RoomKind>()?;
        if subject.trim().is_empty() {
            return Err(RoomIdError::EmptySubject(raw.to_string()));
        }
        // Aliased prefixes collapse onto the canonical one, so `chat_Dev` and
        // `topic_Dev` are the same room.
        Ok(Self {
            raw: format!("{}_{subject}", kind.as_str()),
            kind,
            subject: subject.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// One message in a room's history.
///
/// This is both the server→client chat frame and the element type of the
/// persisted history array, so the field names are part of the wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct RoomMessage {
    /// User id of the author, or the reserved assistant identity
    #[serde(rename = "username")]
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "is_llm", default)]
    pub is_assistant: bool,
}

impl RoomMessage {
    pub fn user(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            timestamp: Utc::now(),
            is_assistant: false,
        }
    }

    pub fn assistant(identity: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: identity.into(),
            content: content.into(),
            timestamp: Utc::now(),
            is_assistant: true,
        }
    }
}

/// Membership snapshot sent whenever someone joins or leaves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct UserListFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub users: Vec<String>,
}

impl UserListFrame {
    pub fn new(users: Vec<String>) -> Self {
        Self {
            frame_type: "user_list".to_string(),
            users,
        }
    }
}

/// Client→server frame. Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct ClientFrame {
    #[serde(default)]
    pub content: String,
}

// ============================================================================
// HTTP payloads
// ============================================================================

/// Informational view of a single room (`GET /room?id=...`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct RoomInfo {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    #[serde(rename = "isRoom")]
    pub is_room: bool,
}

/// Topic list plus cached per-topic summaries (`GET /room` without an id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct TopicDirectory {
    pub topics: Vec<String>,
    pub summaries: BTreeMap<String, String>,
}

/// A price snapshot taken from the search index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct PriceQuote {
    pub symbol: String,
    pub name: String,
    pub price_usd: f64,
    pub change_24h_pct: Option<f64>,
    pub as_of: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
