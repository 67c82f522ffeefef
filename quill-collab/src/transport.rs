//! WebSocket channel: socket lifecycle and automatic reconnect.
//!
//! A [`Channel`] owns exactly one socket at a time. A supervisor task
//! connects, pumps frames in socket order, and on close schedules one
//! reconnect attempt after the policy delay, unless the close was
//! user-initiated or a bounded policy has run out of attempts.
//!
//! Two policies are in use: the collaboration channel retries forever
//! at a fixed interval (collaboration must eventually reconnect), the
//! generic notification channel gives up after a bounded number of
//! consecutive failures and surfaces [`ChannelEvent::Terminated`].
//!
//! `send()` is a silent no-op while the socket is not open: nothing is
//! queued or retried across a reconnect. The sync handshake restarts
//! from scratch instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// How a channel behaves after losing its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Retry forever at a fixed interval.
    FixedInterval { delay: Duration },
    /// Retry at a fixed interval, giving up after `max_attempts`
    /// consecutive failures.
    Bounded { delay: Duration, max_attempts: u32 },
}

impl ReconnectPolicy {
    /// Default delay before a reconnect attempt.
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

    /// Unbounded retries at the default 3 s interval.
    pub fn fixed() -> Self {
        Self::FixedInterval {
            delay: Self::DEFAULT_DELAY,
        }
    }

    /// Bounded retries at the default interval.
    pub fn bounded(max_attempts: u32) -> Self {
        Self::Bounded {
            delay: Self::DEFAULT_DELAY,
            max_attempts,
        }
    }

    fn delay(&self) -> Duration {
        match self {
            Self::FixedInterval { delay } => *delay,
            Self::Bounded { delay, .. } => *delay,
        }
    }

    /// Whether another attempt may be scheduled after `attempts`
    /// consecutive closes.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        match self {
            Self::FixedInterval { .. } => true,
            Self::Bounded { max_attempts, .. } => attempts < *max_attempts,
        }
    }
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Full connection URL, session identity included as query params.
    pub url: String,
    pub reconnect: ReconnectPolicy,
}

/// Events emitted by a channel, in socket order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Socket opened (initial connect or reconnect).
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// Socket closed or a connect attempt failed. A reconnect may
    /// follow per policy.
    Closed,
    /// The channel gave up: bounded policy exhausted. No further
    /// events follow.
    Terminated,
}

/// Handle to a supervised WebSocket connection.
#[derive(Clone)]
pub struct Channel {
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    open: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Channel {
    /// Spawn the supervisor and start connecting. Events arrive on the
    /// returned receiver until the channel terminates.
    pub fn connect(config: ChannelConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let outgoing = Arc::new(Mutex::new(None));
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(supervise(
            config,
            event_tx,
            outgoing.clone(),
            open.clone(),
            shutdown_rx,
        ));

        (
            Self {
                outgoing,
                open,
                shutdown: Arc::new(shutdown_tx),
            },
            event_rx,
        )
    }

    /// Send a text frame. Silently dropped if the socket is not open;
    /// never queued, never retried.
    pub fn send(&self, text: impl Into<String>) {
        if !self.open.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(guard) = self.outgoing.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(text.into());
            }
        }
    }

    /// Whether the socket is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// User-initiated close: cancels any pending reconnect and stops
    /// the supervisor. No events are emitted after the shutdown takes
    /// effect.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn supervise(
    config: ChannelConfig,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    open: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let opened = run_socket(&config, &event_tx, &outgoing, &open, &mut shutdown).await;
        if *shutdown.borrow() {
            return;
        }
        if opened {
            attempts = 0;
        }

        let _ = event_tx.send(ChannelEvent::Closed);

        if !config.reconnect.allows_retry(attempts) {
            log::warn!(
                "giving up on {} after {attempts} consecutive failed attempts",
                config.url
            );
            let _ = event_tx.send(ChannelEvent::Terminated);
            return;
        }
        attempts += 1;

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect.delay()) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Run one socket session. Returns whether the socket ever opened.
async fn run_socket(
    config: &ChannelConfig,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
    outgoing: &Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    open: &Arc<AtomicBool>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let ws = tokio::select! {
        result = tokio_tungstenite::connect_async(&config.url) => match result {
            Ok((ws, _)) => ws,
            Err(e) => {
                log::warn!("connect to {} failed: {e}", config.url);
                return false;
            }
        },
        _ = shutdown.changed() => return false,
    };

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    if let Ok(mut guard) = outgoing.lock() {
        *guard = Some(out_tx);
    }
    open.store(true, Ordering::SeqCst);
    let _ = event_tx.send(ChannelEvent::Opened);

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = event_tx.send(ChannelEvent::Frame(text.to_string()));
                }
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    log::warn!("socket error on {}: {e}", config.url);
                    break;
                }
                Some(Ok(_)) => {} // binary/pong frames are not part of this protocol
            },
            out = out_rx.recv() => match out {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    if let Ok(mut guard) = outgoing.lock() {
        *guard = None;
    }
    true
}

/// Connection URL for the collaboration endpoint. Session identity
/// rides in the query string so the server can attribute the socket
/// before any frame is exchanged.
pub fn collab_url(base: &str, note_id: u64, user_id: u64, username: &str) -> String {
    format!(
        "{base}?userId={user_id}&username={}&noteId={note_id}",
        urlencoding::encode(username)
    )
}

/// Connection URL for the generic notification endpoint.
pub fn notify_url(base: &str, user_id: u64) -> String {
    format!("{base}?userId={user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn test_fixed_policy_always_allows_retry() {
        let policy = ReconnectPolicy::fixed();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(10_000));
    }

    #[test]
    fn test_bounded_policy_stops_at_max() {
        let policy = ReconnectPolicy::bounded(10);
        assert!(policy.allows_retry(9));
        assert!(!policy.allows_retry(10));
        assert!(!policy.allows_retry(11));
    }

    #[test]
    fn test_default_delay_is_three_seconds() {
        assert_eq!(ReconnectPolicy::fixed().delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_collab_url_escapes_username() {
        let url = collab_url("ws://localhost:3000/ws/collab", 42, 7, "Ada Lovelace");
        assert_eq!(
            url,
            "ws://localhost:3000/ws/collab?userId=7&username=Ada%20Lovelace&noteId=42"
        );
    }

    #[test]
    fn test_notify_url() {
        assert_eq!(
            notify_url("ws://localhost:3000/ws", 7),
            "ws://localhost:3000/ws?userId=7"
        );
    }

    #[tokio::test]
    async fn test_send_is_noop_while_disconnected() {
        // Nothing listens on this port; the socket never opens.
        let config = ChannelConfig {
            url: "ws://127.0.0.1:1/collab".to_string(),
            reconnect: ReconnectPolicy::Bounded {
                delay: Duration::from_millis(10),
                max_attempts: 1,
            },
        };
        let (channel, _rx) = Channel::connect(config);
        assert!(!channel.is_open());
        channel.send("dropped on the floor");
        channel.close();
    }

    #[tokio::test]
    async fn test_bounded_policy_terminates() {
        let config = ChannelConfig {
            url: "ws://127.0.0.1:1/collab".to_string(),
            reconnect: ReconnectPolicy::Bounded {
                delay: Duration::from_millis(5),
                max_attempts: 3,
            },
        };
        let (_channel, mut rx) = Channel::connect(config);

        let mut closed = 0;
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("channel should settle quickly")
                .expect("event stream should not end before Terminated");
            match event {
                ChannelEvent::Closed => closed += 1,
                ChannelEvent::Terminated => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        // Initial attempt plus three scheduled retries, all refused.
        assert_eq!(closed, 4);
        assert!(rx.recv().await.is_none(), "no events after Terminated");
    }

    #[tokio::test]
    async fn test_unbounded_policy_keeps_retrying() {
        let config = ChannelConfig {
            url: "ws://127.0.0.1:1/collab".to_string(),
            reconnect: ReconnectPolicy::FixedInterval {
                delay: Duration::from_millis(5),
            },
        };
        let (channel, mut rx) = Channel::connect(config);

        let mut closed = 0;
        while closed < 5 {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(ChannelEvent::Closed)) => closed += 1,
                Ok(Some(ChannelEvent::Terminated)) => {
                    panic!("unbounded policy must not terminate")
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => panic!("channel stopped retrying"),
            }
        }
        channel.close();
    }

    #[tokio::test]
    async fn test_close_stops_events() {
        let config = ChannelConfig {
            url: "ws://127.0.0.1:1/collab".to_string(),
            reconnect: ReconnectPolicy::FixedInterval {
                delay: Duration::from_secs(60),
            },
        };
        let (channel, mut rx) = Channel::connect(config);

        // First failed attempt surfaces as Closed.
        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first, Some(ChannelEvent::Closed));

        // Close while the 60 s reconnect timer is pending: the timer is
        // cancelled and the event stream ends.
        channel.close();
        let next = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(next, None);
    }
}
