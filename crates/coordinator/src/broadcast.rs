//! Progress event fan-out.
//!
//! Every subscriber to a session's channel receives every event
//! independently; delivery is at-most-once per subscriber connection
//! and there is no durable queue. Channels are namespaced
//! `progress:{session_id}`.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use cortex_common::ProgressEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Channel name for a session's progress stream.
pub fn channel_name(session_id: &str) -> String {
    format!("progress:{}", session_id)
}

/// A subscriber's view of one session's progress stream.
///
/// `backlog` holds replayed events (empty for the plain channel
/// broadcaster); live events follow in publish order.
pub struct Subscription {
    backlog: VecDeque<ProgressEvent>,
    rx: broadcast::Receiver<ProgressEvent>,
}

impl Subscription {
    /// Next event, or `None` once the channel is closed and drained.
    /// A lagged subscriber skips the overwritten events and keeps going.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, events dropped");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

/// Fan-out seam between the session coordinator and its observers.
///
/// Two in-process implementations ship; a multi-process broker-backed
/// one would implement the same trait.
pub trait Broadcaster: Send + Sync {
    /// Best-effort, non-blocking publish. Dropped events (no
    /// subscribers, full ring) are not an error.
    fn publish(&self, event: &ProgressEvent);

    /// Open an independent event stream for a session.
    fn subscribe(&self, session_id: &str) -> Subscription;

    /// Forget a session's channel (called on session eviction).
    fn drop_session(&self, session_id: &str);
}

/// Pure fan-out: a subscriber connecting after an event was published
/// never sees it.
#[derive(Default)]
pub struct ChannelBroadcaster {
    channels: DashMap<String, broadcast::Sender<ProgressEvent>>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, session_id: &str) -> broadcast::Sender<ProgressEvent> {
        self.channels
            .entry(channel_name(session_id))
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: &ProgressEvent) {
        let sender = self.sender(&event.session_id);
        // No receivers is fine: at-most-once, best-effort.
        let receivers = sender.send(event.clone()).unwrap_or(0);
        debug!(
            channel = %channel_name(&event.session_id),
            event_type = ?event.event_type,
            receivers,
            "Published progress event"
        );
    }

    fn subscribe(&self, session_id: &str) -> Subscription {
        Subscription {
            backlog: VecDeque::new(),
            rx: self.sender(session_id).subscribe(),
        }
    }

    fn drop_session(&self, session_id: &str) {
        self.channels.remove(&channel_name(session_id));
    }
}

/// Fan-out plus a short bounded replay buffer: a late subscriber first
/// receives the last `capacity` events already published to the
/// session, then the live stream.
pub struct ReplayBroadcaster {
    inner: ChannelBroadcaster,
    replay: DashMap<String, Mutex<VecDeque<ProgressEvent>>>,
    capacity: usize,
}

impl ReplayBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ChannelBroadcaster::new(),
            replay: DashMap::new(),
            capacity,
        }
    }
}

impl ReplayBroadcaster {
    fn buffer(
        &self,
        session_id: &str,
    ) -> dashmap::mapref::one::RefMut<'_, String, Mutex<VecDeque<ProgressEvent>>> {
        self.replay
            .entry(channel_name(session_id))
            .or_insert_with(|| Mutex::new(VecDeque::new()))
    }
}

impl Broadcaster for ReplayBroadcaster {
    fn publish(&self, event: &ProgressEvent) {
        let buffer = self.buffer(&event.session_id);
        let mut buffer = buffer.lock();
        buffer.push_back(event.clone());
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
        // Send while the buffer lock is held: a concurrent subscribe
        // sees the event in its backlog or on the live channel, never
        // both and never neither.
        self.inner.publish(event);
    }

    fn subscribe(&self, session_id: &str) -> Subscription {
        let buffer = self.buffer(session_id);
        let buffer = buffer.lock();
        let mut subscription = self.inner.subscribe(session_id);
        subscription.backlog = buffer.clone();
        subscription
    }

    fn drop_session(&self, session_id: &str) {
        self.replay.remove(&channel_name(session_id));
        self.inner.drop_session(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(session_id: &str, to: &str) -> ProgressEvent {
        ProgressEvent::state_change(session_id, "planning", to)
    }

    #[tokio::test]
    async fn test_fanout_to_multiple_subscribers() {
        let broadcaster = ChannelBroadcaster::new();
        let mut sub_a = broadcaster.subscribe("s1");
        let mut sub_b = broadcaster.subscribe("s1");

        broadcaster.publish(&event("s1", "executing"));

        // Every subscriber receives the event independently.
        assert_eq!(sub_a.recv().await.unwrap().payload["to"], "executing");
        assert_eq!(sub_b.recv().await.unwrap().payload["to"], "executing");
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let broadcaster = ChannelBroadcaster::new();
        broadcaster.publish(&event("s1", "executing"));

        let mut sub = broadcaster.subscribe("s1");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let broadcaster = ChannelBroadcaster::new();
        let mut sub = broadcaster.subscribe("s1");

        broadcaster.publish(&event("s2", "executing"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_replay_delivers_backlog_then_live() {
        let broadcaster = ReplayBroadcaster::new(8);
        broadcaster.publish(&event("s1", "executing"));
        broadcaster.publish(&event("s1", "validating"));

        let mut sub = broadcaster.subscribe("s1");
        broadcaster.publish(&event("s1", "learning"));

        assert_eq!(sub.recv().await.unwrap().payload["to"], "executing");
        assert_eq!(sub.recv().await.unwrap().payload["to"], "validating");
        assert_eq!(sub.recv().await.unwrap().payload["to"], "learning");
    }

    #[tokio::test]
    async fn test_replay_buffer_is_bounded() {
        let broadcaster = ReplayBroadcaster::new(2);
        for to in ["a", "b", "c"] {
            broadcaster.publish(&event("s1", to));
        }

        let mut sub = broadcaster.subscribe("s1");
        assert_eq!(sub.try_recv().unwrap().payload["to"], "b");
        assert_eq!(sub.try_recv().unwrap().payload["to"], "c");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_zero_capacity_replay_keeps_no_backlog() {
        let broadcaster = ReplayBroadcaster::new(0);
        for to in ["a", "b", "c"] {
            broadcaster.publish(&event("s1", to));
        }

        let mut sub = broadcaster.subscribe("s1");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mid_stream_subscriber_sees_each_event_once() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let broadcaster = Arc::new(ReplayBroadcaster::new(64));
        let publisher = {
            let broadcaster = Arc::clone(&broadcaster);
            tokio::spawn(async move {
                for i in 0..64 {
                    broadcaster.publish(&event("s1", &format!("state{}", i)));
                    tokio::task::yield_now().await;
                }
            })
        };

        // Subscribe while the publisher is mid-stream: every event must
        // arrive exactly once, from the backlog or the live channel.
        tokio::task::yield_now().await;
        let mut sub = broadcaster.subscribe("s1");
        publisher.await.unwrap();

        let mut seen = HashSet::new();
        let mut last = None;
        while let Some(received) = sub.try_recv() {
            let to = received.payload["to"].as_str().unwrap().to_string();
            assert!(seen.insert(to.clone()), "event {} delivered twice", to);
            last = Some(to);
        }
        assert_eq!(last.as_deref(), Some("state63"));
    }

    #[tokio::test]
    async fn test_drop_session_clears_replay() {
        let broadcaster = ReplayBroadcaster::new(8);
        broadcaster.publish(&event("s1", "executing"));
        broadcaster.drop_session("s1");

        let mut sub = broadcaster.subscribe("s1");
        assert!(sub.try_recv().is_none());
    }
}
