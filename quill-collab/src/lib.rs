//! # quill-collab — Real-time collaborative editing client
//!
//! Client-side sync layer for multiplayer note editing: CRDT document
//! synchronization, cursor presence, and general notifications over
//! JSON WebSocket frames.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   doc changes   ┌──────────────┐
//! │ TextDocument │ ───────────────► │ CollabClient │
//! │ (yrs doc)    │ ◄─────────────── │ (engine)     │
//! └──────────────┘  remote updates └──────┬───────┘
//!                                         │ JSON frames
//!                                         ▼
//!                                  ┌──────────────┐
//!                                  │   Channel    │ ──► relay server
//!                                  │ (reconnect)  │
//!                                  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`codec`] — Binary payloads as base64 strings (int arrays accepted)
//! - [`protocol`] — JSON wire frames, both directions
//! - [`document`] — CRDT document abstraction and the yrs-backed default
//! - [`presence`] — Participant registry with stable color assignment
//! - [`transport`] — Supervised WebSocket channel with reconnect policies
//! - [`client`] — The sync protocol engine
//! - [`notify`] — User-scoped notification channel with listener keys

pub mod client;
pub mod codec;
pub mod document;
pub mod notify;
pub mod presence;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use client::{CollabClient, CollabEvent, SessionConfig, SyncState};
pub use codec::{CodecError, WireBytes};
pub use document::{DocChange, DocumentError, Origin, ReplicatedDocument, TextDocument};
pub use notify::{ListenerId, NotifyChannel};
pub use presence::{ParticipantPresence, PresenceRegistry, COLOR_PALETTE};
pub use protocol::{ClientFrame, CursorRange, ProtocolError, RosterEntry, ServerFrame};
pub use transport::{Channel, ChannelConfig, ChannelEvent, ReconnectPolicy};
