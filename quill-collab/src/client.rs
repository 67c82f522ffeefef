//! Collaboration client: the sync protocol engine.
//!
//! [`CollabClient`] ties one [`ReplicatedDocument`] to one note's
//! collaboration socket. A single engine task owns all protocol state
//! and processes, in arrival order, both inbound server frames and
//! local document changes. Consumers watch the session through the
//! [`CollabEvent`] stream.
//!
//! Two gates keep the protocol sound:
//!
//! * an update is only broadcast once the session has reached
//!   [`SyncState::Synced`], so pre-handshake edits ride inside the
//!   state vector announcement instead of racing it;
//! * a change whose origin is [`Origin::Remote`] is never broadcast,
//!   which is what prevents update loops between replicas.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, RwLock};

use crate::document::{DocChange, Origin, ReplicatedDocument, TextDocument};
use crate::presence::{ParticipantPresence, PresenceRegistry};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::transport::{collab_url, Channel, ChannelConfig, ChannelEvent, ReconnectPolicy};

/// Identity of one editing session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Collaboration endpoint base URL, e.g. `ws://host:3000/ws/collab`.
    pub server_url: String,
    pub note_id: u64,
    pub user_id: u64,
    pub username: String,
}

/// Connection lifecycle, strictly ordered: a session only broadcasts
/// local edits at `Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncState {
    Disconnected,
    Connecting,
    /// Socket open, state vector announced, diff not yet received.
    Connected,
    Syncing,
    /// Handshake complete; local edits are broadcast.
    Synced,
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum CollabEvent {
    /// Socket opened and the handshake was initiated.
    Connected,
    /// Socket lost; a reconnect is underway.
    Disconnected,
    /// Handshake complete. Carries the merged document text.
    Synced(String),
    /// A remote update was merged. Carries the merged document text.
    Updated(String),
    /// A participant's cursor presence changed.
    Awareness(ParticipantPresence),
    /// A participant left the session.
    UserLeft {
        client_id: String,
        user_id: u64,
        username: String,
    },
}

/// Client handle. Cloneable; all clones share the same session.
#[derive(Clone)]
pub struct CollabClient<D: ReplicatedDocument + Clone = TextDocument> {
    config: SessionConfig,
    document: D,
    state: Arc<RwLock<SyncState>>,
    client_id: Arc<RwLock<Option<String>>>,
    registry: Arc<StdMutex<PresenceRegistry>>,
    channel: Arc<StdMutex<Option<Channel>>>,
    event_tx: mpsc::Sender<CollabEvent>,
    event_rx: Arc<StdMutex<Option<mpsc::Receiver<CollabEvent>>>>,
}

impl CollabClient {
    /// Client over a fresh yrs-backed text document.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_document(config, TextDocument::new())
    }
}

impl<D: ReplicatedDocument + Clone> CollabClient<D> {
    /// Client over a caller-provided document, which may already hold
    /// offline edits.
    pub fn with_document(config: SessionConfig, document: D) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            config,
            document,
            state: Arc::new(RwLock::new(SyncState::Disconnected)),
            client_id: Arc::new(RwLock::new(None)),
            registry: Arc::new(StdMutex::new(PresenceRegistry::new())),
            channel: Arc::new(StdMutex::new(None)),
            event_tx,
            event_rx: Arc::new(StdMutex::new(Some(event_rx))),
        }
    }

    /// Take the event receiver. Can only be taken once.
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<CollabEvent>> {
        self.event_rx.lock().ok().and_then(|mut guard| guard.take())
    }

    /// Open the collaboration socket and start the engine. The channel
    /// reconnects forever at a fixed interval; each reopen restarts the
    /// sync handshake from scratch.
    pub async fn connect(&self) {
        let url = collab_url(
            &self.config.server_url,
            self.config.note_id,
            self.config.user_id,
            &self.config.username,
        );

        {
            let mut guard = match self.channel.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.is_some() {
                log::debug!("already connected to note {}", self.config.note_id);
                return;
            }

            match self.state.try_write() {
                Ok(mut state) => *state = SyncState::Connecting,
                Err(_) => return,
            }

            let (channel, channel_rx) = Channel::connect(ChannelConfig {
                url,
                reconnect: ReconnectPolicy::fixed(),
            });
            *guard = Some(channel.clone());

            let (doc_tx, doc_rx) = mpsc::unbounded_channel();
            if let Err(e) = self.document.subscribe(doc_tx) {
                log::error!("document subscription failed: {e}");
            }

            let engine = Engine {
                note_id: self.config.note_id,
                document: self.document.clone(),
                channel: channel.clone(),
                state: self.state.clone(),
                client_id: self.client_id.clone(),
                registry: self.registry.clone(),
                events: self.event_tx.clone(),
            };
            tokio::spawn(engine.run(channel_rx, doc_rx));
        }
    }

    /// Close the socket and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        if let Ok(mut guard) = self.channel.lock() {
            if let Some(channel) = guard.take() {
                channel.close();
            }
        }
        *self.state.write().await = SyncState::Disconnected;
        *self.client_id.write().await = None;
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear();
        }
    }

    /// Broadcast the local cursor. Dropped silently until the session
    /// is synced; a cursor over unsynced text would be meaningless to
    /// peers.
    pub async fn send_cursor(&self, from: u32, to: u32) {
        if *self.state.read().await != SyncState::Synced {
            return;
        }
        let frame = ClientFrame::cursor(self.config.note_id, from, to);
        match frame.encode() {
            Ok(text) => {
                if let Ok(guard) = self.channel.lock() {
                    if let Some(channel) = guard.as_ref() {
                        channel.send(text);
                    }
                }
            }
            Err(e) => log::error!("failed to encode cursor frame: {e}"),
        }
    }

    pub async fn state(&self) -> SyncState {
        *self.state.read().await
    }

    /// Server-assigned client id, once welcomed.
    pub async fn client_id(&self) -> Option<String> {
        self.client_id.read().await.clone()
    }

    /// Snapshot of the participants currently present.
    pub fn participants(&self) -> Vec<ParticipantPresence> {
        self.registry
            .lock()
            .map(|registry| registry.participants())
            .unwrap_or_default()
    }

    pub fn document(&self) -> &D {
        &self.document
    }
}

/// Single-task protocol engine. Owns frame handling and the broadcast
/// gates; everything runs in arrival order on one task.
struct Engine<D: ReplicatedDocument> {
    note_id: u64,
    document: D,
    channel: Channel,
    state: Arc<RwLock<SyncState>>,
    client_id: Arc<RwLock<Option<String>>>,
    registry: Arc<StdMutex<PresenceRegistry>>,
    events: mpsc::Sender<CollabEvent>,
}

impl<D: ReplicatedDocument> Engine<D> {
    async fn run(
        self,
        mut channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        mut doc_rx: mpsc::UnboundedReceiver<DocChange>,
    ) {
        loop {
            tokio::select! {
                event = channel_rx.recv() => match event {
                    Some(event) => {
                        if !self.on_channel_event(event).await {
                            break;
                        }
                    }
                    None => break,
                },
                change = doc_rx.recv() => match change {
                    Some(change) => self.on_doc_change(change).await,
                    None => {
                        // Document dropped its sender; keep serving
                        // inbound frames for presence.
                        while let Some(event) = channel_rx.recv().await {
                            if !self.on_channel_event(event).await {
                                break;
                            }
                        }
                        break;
                    }
                },
            }
        }
        log::debug!("engine for note {} stopped", self.note_id);
    }

    /// Returns false once the channel has terminated.
    async fn on_channel_event(&self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Opened => self.on_opened().await,
            ChannelEvent::Frame(text) => match ServerFrame::parse(&text) {
                Ok(frame) => self.on_frame(frame).await,
                Err(e) => log::warn!("dropping unparseable frame: {e}"),
            },
            ChannelEvent::Closed => {
                *self.state.write().await = SyncState::Disconnected;
                *self.client_id.write().await = None;
                if let Ok(mut registry) = self.registry.lock() {
                    registry.clear();
                }
                self.emit(CollabEvent::Disconnected).await;
            }
            ChannelEvent::Terminated => return false,
        }
        true
    }

    /// Socket open (first connect or reconnect): announce our state
    /// vector and wait for the diff. Offline edits are not replayed as
    /// updates; they are implied by the vector.
    async fn on_opened(&self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear();
        }
        *self.client_id.write().await = None;
        *self.state.write().await = SyncState::Connected;

        let frame = ClientFrame::sync_request(self.note_id, self.document.encode_state_vector());
        match frame.encode() {
            Ok(text) => {
                self.channel.send(text);
                *self.state.write().await = SyncState::Syncing;
            }
            Err(e) => log::error!("failed to encode sync request: {e}"),
        }
        self.emit(CollabEvent::Connected).await;
    }

    async fn on_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Welcome {
                client_id,
                active_clients,
            } => {
                log::debug!("welcomed as client {client_id}");
                *self.client_id.write().await = Some(client_id);
                // Assign colors in roster order so every replica that
                // receives the same roster agrees on them.
                if let Ok(mut registry) = self.registry.lock() {
                    for entry in &active_clients {
                        registry.color_for(entry.user_id);
                    }
                }
            }

            // The server wants our vector again. Announce, never apply:
            // the payload describes the server's state, not a diff.
            ServerFrame::SyncStep1 { .. } => {
                let frame =
                    ClientFrame::sync_request(self.note_id, self.document.encode_state_vector());
                match frame.encode() {
                    Ok(text) => self.channel.send(text),
                    Err(e) => log::error!("failed to encode sync request: {e}"),
                }
            }

            // Diff reply: exactly one per handshake. An empty diff
            // still completes the handshake.
            ServerFrame::SyncStep2 { update } => {
                if let Some(update) = update.filter(|u| !u.is_empty()) {
                    if let Err(e) = self.document.apply_update(update.as_slice(), Origin::Remote) {
                        log::warn!("discarding undecodable sync diff: {e}");
                    }
                }
                *self.state.write().await = SyncState::Synced;
                self.emit(CollabEvent::Synced(self.document.current_text()))
                    .await;
            }

            ServerFrame::Update { update } => {
                let Some(update) = update.filter(|u| !u.is_empty()) else {
                    return;
                };
                match self.document.apply_update(update.as_slice(), Origin::Remote) {
                    Ok(()) => {
                        self.emit(CollabEvent::Updated(self.document.current_text()))
                            .await;
                    }
                    Err(e) => log::warn!("discarding undecodable update: {e}"),
                }
            }

            ServerFrame::Awareness {
                client_id,
                user_id,
                username,
                cursor,
                timestamp,
            } => {
                if self.client_id.read().await.as_deref() == Some(client_id.as_str()) {
                    return;
                }
                let presence = match self.registry.lock() {
                    Ok(mut registry) => {
                        registry.upsert(&client_id, user_id, &username, cursor, timestamp)
                    }
                    Err(_) => return,
                };
                self.emit(CollabEvent::Awareness(presence)).await;
            }

            ServerFrame::UserLeft {
                client_id,
                user_id,
                username,
            } => {
                if let Ok(mut registry) = self.registry.lock() {
                    registry.remove(&client_id);
                }
                self.emit(CollabEvent::UserLeft {
                    client_id,
                    user_id,
                    username,
                })
                .await;
            }
        }
    }

    /// Local document change. Broadcast only once synced and only for
    /// local origins; remote-origin changes are the ones we just
    /// applied and must not loop back.
    async fn on_doc_change(&self, change: DocChange) {
        if change.origin == Origin::Remote {
            return;
        }
        if *self.state.read().await != SyncState::Synced {
            return;
        }
        let frame = ClientFrame::update(self.note_id, change.update);
        match frame.encode() {
            Ok(text) => self.channel.send(text),
            Err(e) => log::error!("failed to encode update frame: {e}"),
        }
    }

    async fn emit(&self, event: CollabEvent) {
        if self.events.send(event).await.is_err() {
            log::debug!("event receiver dropped, continuing without it");
        }
    }
}
