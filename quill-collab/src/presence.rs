//! Participant presence: display colors and last-known cursors.
//!
//! Presence is ephemeral: nothing here is persisted and the registry is
//! rebuilt from scratch on every reconnect (the server is the source of
//! truth for who is currently in the document). Color assignments are the
//! one exception: a user keeps the same color for the life of the local
//! session, even across reconnects that hand out a fresh client id.

use std::collections::{BTreeMap, HashMap};

use crate::protocol::CursorRange;

/// Fixed palette of visually distinct participant colors.
pub const COLOR_PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8",
    "#F7DC6F", "#BB8FCE", "#85C1E2", "#F8B739", "#52B788",
];

/// A remote participant as last seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantPresence {
    pub client_id: String,
    pub user_id: u64,
    pub username: String,
    pub color: &'static str,
    pub cursor: Option<CursorRange>,
    /// Server timestamp of the last awareness message (unix seconds).
    pub last_seen: i64,
}

/// Tracks remote participants and their stable display colors.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// userId → color, stable for the session. Survives `clear()`.
    colors: HashMap<u64, &'static str>,
    next_color: usize,
    /// clientId → presence, ordered for deterministic snapshots.
    participants: BTreeMap<String, ParticipantPresence>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The display color for a user, allocated round-robin from the
    /// palette on first sight. Idempotent within a session; the palette
    /// wraps around once exhausted.
    pub fn color_for(&mut self, user_id: u64) -> &'static str {
        if let Some(color) = self.colors.get(&user_id) {
            return color;
        }
        let color = COLOR_PALETTE[self.next_color % COLOR_PALETTE.len()];
        self.next_color += 1;
        self.colors.insert(user_id, color);
        color
    }

    /// Create or refresh a participant from an awareness message.
    /// Returns the resulting entry.
    pub fn upsert(
        &mut self,
        client_id: &str,
        user_id: u64,
        username: &str,
        cursor: Option<CursorRange>,
        timestamp: i64,
    ) -> ParticipantPresence {
        let color = self.color_for(user_id);
        let presence = ParticipantPresence {
            client_id: client_id.to_string(),
            user_id,
            username: username.to_string(),
            color,
            cursor,
            last_seen: timestamp,
        };
        self.participants
            .insert(client_id.to_string(), presence.clone());
        presence
    }

    /// Remove a departed participant.
    pub fn remove(&mut self, client_id: &str) -> Option<ParticipantPresence> {
        self.participants.remove(client_id)
    }

    /// Snapshot of current participants, ordered by client id.
    pub fn participants(&self) -> Vec<ParticipantPresence> {
        self.participants.values().cloned().collect()
    }

    pub fn get(&self, client_id: &str) -> Option<&ParticipantPresence> {
        self.participants.get(client_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Drop all participants (reconnect: the server will re-announce
    /// whoever is still present). Color assignments are kept.
    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
