//! JSON wire protocol for document synchronization.
//!
//! One JSON object per WebSocket text frame, tagged by `type`:
//!
//! | type       | direction | payload                                      |
//! |------------|-----------|----------------------------------------------|
//! | welcome    | s → c     | `{clientId, activeClients}`                  |
//! | sync-step1 | s → c     | `{stateVector}`                              |
//! | sync-step2 | c → s     | `{noteId, data: {stateVector}}` (request)    |
//! | sync-step2 | s → c     | `{update}` (authoritative diff reply)        |
//! | update     | both      | `{update}` / `{noteId, data: {update}}`      |
//! | awareness  | both      | cursor presence                              |
//! | user-left  | s → c     | `{clientId, userId, username}`               |
//!
//! `sync-step2` carries two different payloads depending on direction:
//! a state-vector announcement from the client, a diff reply from the
//! server. The asymmetry is kept as-is for wire compatibility; the two
//! enums below keep the directions apart in code.

use serde::{Deserialize, Serialize};

use crate::codec::WireBytes;

/// A cursor selection in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRange {
    pub from: u32,
    pub to: u32,
}

impl CursorRange {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// A collapsed selection (caret only).
    pub fn caret(at: u32) -> Self {
        Self { from: at, to: at }
    }
}

/// A participant entry in the server's welcome roster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub client_id: String,
    pub user_id: u64,
    pub username: String,
}

/// A frame received from the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Server attributed the socket and assigned a client id.
    #[serde(rename = "welcome", rename_all = "camelCase")]
    Welcome {
        client_id: String,
        #[serde(default)]
        active_clients: Vec<RosterEntry>,
    },

    /// Server announces its own state vector; the client must answer
    /// with a fresh vector announcement of its own. Never applied.
    #[serde(rename = "sync-step1", rename_all = "camelCase")]
    SyncStep1 {
        #[serde(default)]
        state_vector: Option<WireBytes>,
    },

    /// Authoritative diff reply to a vector announcement. The update
    /// may be absent or empty when the client is already caught up.
    #[serde(rename = "sync-step2")]
    SyncStep2 {
        #[serde(default)]
        update: Option<WireBytes>,
    },

    /// Incremental document update broadcast by another participant.
    #[serde(rename = "update")]
    Update {
        #[serde(default)]
        update: Option<WireBytes>,
    },

    /// Ephemeral cursor presence from another participant.
    #[serde(rename = "awareness", rename_all = "camelCase")]
    Awareness {
        client_id: String,
        user_id: u64,
        username: String,
        #[serde(default)]
        cursor: Option<CursorRange>,
        #[serde(default)]
        timestamp: i64,
    },

    /// A participant disconnected.
    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft {
        client_id: String,
        user_id: u64,
        username: String,
    },
}

impl ServerFrame {
    /// Parse a raw text frame. Unknown `type` values and malformed JSON
    /// are both parse errors; the caller drops the frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Parse(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub state_vector: WireBytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePayload {
    pub update: WireBytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct CursorPayload {
    pub cursor: CursorRange,
}

/// A frame sent to the server. Client frames wrap their payload in the
/// `{type, noteId, data: {…}}` envelope the server expects.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Announce the local state vector and request a diff.
    #[serde(rename = "sync-step2", rename_all = "camelCase")]
    SyncStep2 { note_id: u64, data: SyncRequest },

    /// Broadcast a local document update.
    #[serde(rename = "update", rename_all = "camelCase")]
    Update { note_id: u64, data: UpdatePayload },

    /// Broadcast the local cursor position.
    #[serde(rename = "awareness", rename_all = "camelCase")]
    Awareness { note_id: u64, data: CursorPayload },
}

impl ClientFrame {
    /// State-vector announcement (both the initial handshake step and
    /// the reply to an inbound `sync-step1`).
    pub fn sync_request(note_id: u64, state_vector: Vec<u8>) -> Self {
        Self::SyncStep2 {
            note_id,
            data: SyncRequest {
                state_vector: WireBytes::new(state_vector),
            },
        }
    }

    /// Local update broadcast.
    pub fn update(note_id: u64, update: Vec<u8>) -> Self {
        Self::Update {
            note_id,
            data: UpdatePayload {
                update: WireBytes::new(update),
            },
        }
    }

    /// Cursor presence broadcast.
    pub fn cursor(note_id: u64, from: u32, to: u32) -> Self {
        Self::Awareness {
            note_id,
            data: CursorPayload {
                cursor: CursorRange::new(from, to),
            },
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialize(String),
    Parse(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialize(e) => write!(f, "Failed to serialize frame: {e}"),
            Self::Parse(e) => write!(f, "Failed to parse frame: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
