//! Broadcast hub: viewer session registry, channel membership and fan-out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use crate::metrics;
use crate::tally::Tally;

pub type SessionId = u64;

/// Greeting sent to every new session.
pub const WELCOME: &str = "Welcome!";

/// Outbound messages queued per session before new ones are dropped.
const SESSION_BUFFER: usize = 64;

/// Event sent from the server to a viewer.
///
/// Serialized as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    Message { text: String },
    /// The tally, JSON-stringified.
    Scores(String),
}

/// Result of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

struct SessionEntry {
    tx: mpsc::Sender<ServerEvent>,
    channels: HashSet<String>,
}

struct HubInner {
    sessions: DashMap<SessionId, SessionEntry>,
    channels: DashMap<String, DashSet<SessionId>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Shared registry of live viewer sessions.
///
/// Every published tally goes to every registered session. Channel
/// membership is recorded on subscribe but does not narrow delivery.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_buffer(SESSION_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: DashMap::new(),
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Add a session and queue its welcome message.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        // Fresh channel with capacity >= 1, cannot be full
        let _ = tx.try_send(ServerEvent::Message {
            text: WELCOME.to_string(),
        });

        self.inner.sessions.insert(
            id,
            SessionEntry {
                tx,
                channels: HashSet::new(),
            },
        );
        metrics::set_viewers(self.session_count());
        info!(session_id = id, viewers = self.session_count(), "viewer connected");
        (id, rx)
    }

    /// Join a channel, creating it on first use.
    ///
    /// Returns false when the session was already a member or is unknown.
    /// Joining a second channel keeps the first.
    pub fn subscribe(&self, id: SessionId, channel: &str) -> bool {
        let Some(mut session) = self.inner.sessions.get_mut(&id) else {
            return false;
        };
        if !session.channels.insert(channel.to_string()) {
            return false;
        }

        // Still holding the session entry: a concurrent remove waits for this
        // insert and then clears it.
        self.inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id);
        drop(session);
        debug!(session_id = id, channel, "viewer subscribed");
        true
    }

    /// Drop a session and every membership record it holds.
    pub fn remove(&self, id: SessionId) {
        let Some((_, session)) = self.inner.sessions.remove(&id) else {
            return;
        };
        for channel in &session.channels {
            if let Some(members) = self.inner.channels.get(channel) {
                members.remove(&id);
            }
        }
        metrics::set_viewers(self.session_count());
        info!(session_id = id, viewers = self.session_count(), "viewer disconnected");
    }

    /// Send the tally to every connected session.
    ///
    /// Fire-and-forget: a session whose queue is full or closed misses this
    /// tally and nothing is retried.
    pub fn publish(&self, tally: &Tally) -> Delivery {
        let payload = tally.to_json();
        let mut delivery = Delivery::default();

        for session in self.inner.sessions.iter() {
            match session.tx.try_send(ServerEvent::Scores(payload.clone())) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(session_id = *session.key(), "viewer queue full, dropping scores");
                    delivery.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => delivery.dropped += 1,
            }
        }

        metrics::add_scores_sent(delivery.delivered, delivery.dropped);
        delivery
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Sessions currently joined to a channel, sorted.
    pub fn channel_members(&self, channel: &str) -> Vec<SessionId> {
        let mut members: Vec<SessionId> = self
            .inner
            .channels
            .get(channel)
            .map(|set| set.iter().map(|id| *id).collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    /// Channels a session has joined, sorted.
    pub fn channels_of(&self, id: SessionId) -> Vec<String> {
        let mut channels: Vec<String> = self
            .inner
            .sessions
            .get(&id)
            .map(|s| s.channels.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Channels ever created. Channels are never destroyed.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::{normalize, RawRow};

    fn tally(a: u64, b: u64) -> Tally {
        normalize(&[RawRow::new("a", a), RawRow::new("b", b)])
    }

    fn welcome() -> ServerEvent {
        ServerEvent::Message {
            text: WELCOME.to_string(),
        }
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_string(&welcome()).unwrap();
        assert_eq!(json, r#"{"event":"message","data":{"text":"Welcome!"}}"#);

        let json = serde_json::to_string(&ServerEvent::Scores(tally(4, 2).to_json())).unwrap();
        assert_eq!(json, r#"{"event":"scores","data":"{\"a\":4,\"b\":2}"}"#);
    }

    #[tokio::test]
    async fn test_register_sends_welcome() {
        let hub = Hub::new();
        let (_, mut rx) = hub.register();
        assert_eq!(rx.recv().await, Some(welcome()));
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_sessions_regardless_of_channel() {
        let hub = Hub::new();
        let (first, mut rx1) = hub.register();
        let (_second, mut rx2) = hub.register();
        assert!(hub.subscribe(first, "X"));

        let delivery = hub.publish(&tally(4, 2));
        assert_eq!(delivery, Delivery { delivered: 2, dropped: 0 });

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.recv().await, Some(welcome()));
            assert_eq!(
                rx.recv().await,
                Some(ServerEvent::Scores(r#"{"a":4,"b":2}"#.to_string()))
            );
        }
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();
        assert!(hub.subscribe(id, "X"));
        assert!(!hub.subscribe(id, "X"));
        assert_eq!(hub.channel_members("X"), vec![id]);
    }

    #[test]
    fn test_subscribe_second_channel_adds() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();
        hub.subscribe(id, "X");
        hub.subscribe(id, "Y");
        assert_eq!(hub.channels_of(id), vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(hub.channel_members("Y"), vec![id]);
    }

    #[test]
    fn test_subscribe_unknown_session() {
        let hub = Hub::new();
        assert!(!hub.subscribe(42, "X"));
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_remove_clears_memberships() {
        let hub = Hub::new();
        let (a, _rxa) = hub.register();
        let (b, _rxb) = hub.register();
        hub.subscribe(a, "X");
        hub.subscribe(b, "X");
        hub.subscribe(a, "Y");

        hub.remove(a);

        assert_eq!(hub.session_count(), 1);
        assert_eq!(hub.channel_members("X"), vec![b]);
        assert!(hub.channel_members("Y").is_empty());
        // Channels outlive their members
        assert_eq!(hub.channel_count(), 2);
        assert!(hub.channels_of(a).is_empty());
    }

    #[test]
    fn test_remove_racing_subscribe_leaves_no_member() {
        let hub = Hub::new();
        for _ in 0..200 {
            let (id, _rx) = hub.register();
            let subscriber = {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    hub.subscribe(id, "X");
                })
            };
            let remover = {
                let hub = hub.clone();
                std::thread::spawn(move || hub.remove(id))
            };
            subscriber.join().unwrap();
            remover.join().unwrap();

            assert!(hub.channel_members("X").is_empty(), "stale member {}", id);
        }
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn test_slow_session_drops_without_blocking() {
        let hub = Hub::with_buffer(2);
        let (_, _rx) = hub.register(); // welcome takes one slot

        assert_eq!(hub.publish(&tally(1, 0)).delivered, 1);
        let delivery = hub.publish(&tally(2, 0));
        assert_eq!(delivery, Delivery { delivered: 0, dropped: 1 });
    }

    #[test]
    fn test_closed_session_counts_as_dropped() {
        let hub = Hub::new();
        let (_, rx) = hub.register();
        drop(rx);
        assert_eq!(hub.publish(&tally(1, 1)).dropped, 1);
    }
}
