//! General notification channel.
//!
//! Separate from the collaboration channel: one socket per user (not
//! per note) carrying JSON frames of the shape `{"type": ..,
//! "action": .., ..}`. Consumers register callbacks against event
//! keys; each inbound frame is dispatched to the `"{type}_{action}"`
//! listeners first, then to the bare `"{type}"` listeners. Socket
//! lifecycle is surfaced on the reserved `"connected"` and
//! `"disconnected"` keys with a null payload.
//!
//! Unlike the collaboration channel this one gives up: after ten
//! consecutive failed attempts it stays down until `connect` is
//! called again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::transport::{notify_url, Channel, ChannelConfig, ChannelEvent, ReconnectPolicy};

/// Consecutive failures tolerated before the channel stays down.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listener registry, keyed by event name.
#[derive(Default)]
struct Listeners {
    by_key: HashMap<String, Vec<(ListenerId, Callback)>>,
    next_id: u64,
}

impl Listeners {
    fn add(&mut self, key: &str, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.by_key
            .entry(key.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    fn remove(&mut self, key: &str, id: ListenerId) {
        if let Some(entries) = self.by_key.get_mut(key) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                self.by_key.remove(key);
            }
        }
    }

    fn emit(&self, key: &str, payload: &Value) {
        if let Some(entries) = self.by_key.get(key) {
            for (_, callback) in entries {
                callback(payload);
            }
        }
    }

    /// Route one decoded frame: specific `type_action` listeners fire
    /// before the catch-all `type` listeners.
    fn dispatch(&self, frame: &Value) {
        let Some(kind) = frame.get("type").and_then(Value::as_str) else {
            log::warn!("notification frame without a type field: {frame}");
            return;
        };
        if let Some(action) = frame.get("action").and_then(Value::as_str) {
            self.emit(&format!("{kind}_{action}"), frame);
        }
        self.emit(kind, frame);
    }
}

/// User-scoped notification socket with an event-key listener registry.
#[derive(Clone)]
pub struct NotifyChannel {
    listeners: Arc<Mutex<Listeners>>,
    channel: Arc<Mutex<Option<Channel>>>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

impl Default for NotifyChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyChannel {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners::default())),
            channel: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the socket for `user_id`. A second call while a channel is
    /// already running is ignored, matching the one-socket-per-user
    /// contract.
    pub fn connect(&self, base_url: &str, user_id: u64) {
        {
            let mut guard = match self.channel.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.is_some() {
                log::debug!("notification channel already connected, ignoring");
                return;
            }

            let config = ChannelConfig {
                url: notify_url(base_url, user_id),
                reconnect: ReconnectPolicy::Bounded {
                    delay: ReconnectPolicy::DEFAULT_DELAY,
                    max_attempts: MAX_RECONNECT_ATTEMPTS,
                },
            };
            let (channel, rx) = Channel::connect(config);
            *guard = Some(channel);

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(pump(
                rx,
                self.listeners.clone(),
                self.channel.clone(),
                self.connected.clone(),
                self.generation.clone(),
                generation,
            ));
        }
    }

    /// Close the socket and cancel any pending reconnect. Listeners
    /// stay registered for a later `connect`.
    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.channel.lock() {
            if let Some(channel) = guard.take() {
                channel.close();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Register a callback for an event key (`"{type}_{action}"`,
    /// `"{type}"`, `"connected"` or `"disconnected"`).
    pub fn on<F>(&self, key: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.add(key, Arc::new(callback)),
            Err(_) => ListenerId(u64::MAX),
        }
    }

    /// Unregister a previously registered callback.
    pub fn off(&self, key: &str, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(key, id);
        }
    }

    /// Send a JSON frame if the socket is open; silently dropped
    /// otherwise.
    pub fn send(&self, frame: &Value) {
        if let Ok(guard) = self.channel.lock() {
            if let Some(channel) = guard.as_ref() {
                channel.send(frame.to_string());
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn pump(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ChannelEvent>,
    listeners: Arc<Mutex<Listeners>>,
    channel: Arc<Mutex<Option<Channel>>>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
) {
    let emit = |key: &str| {
        if let Ok(listeners) = listeners.lock() {
            listeners.emit(key, &Value::Null);
        }
    };

    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::Opened => {
                connected.store(true, Ordering::SeqCst);
                emit("connected");
            }
            ChannelEvent::Frame(text) => match serde_json::from_str::<Value>(&text) {
                Ok(frame) => {
                    if let Ok(listeners) = listeners.lock() {
                        listeners.dispatch(&frame);
                    }
                }
                Err(e) => log::warn!("discarding malformed notification frame: {e}"),
            },
            ChannelEvent::Closed => {
                connected.store(false, Ordering::SeqCst);
                emit("disconnected");
            }
            ChannelEvent::Terminated => break,
        }
    }

    // Drop the dead handle so a later connect() can start fresh, but
    // only if no newer channel has replaced this one in the meantime.
    if generation.load(Ordering::SeqCst) == my_generation {
        if let Ok(mut guard) = channel.lock() {
            *guard = None;
        }
    }
    connected.store(false, Ordering::SeqCst);
}
