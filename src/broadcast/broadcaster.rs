//! Per-stream fan-out with a bounded queue per subscriber.
//!
//! Deliberately not built on `tokio::sync::broadcast`: that primitive
//! drops the *oldest* pending message for every lagging subscriber when
//! any one of them falls behind, which is a global effect. Here, each
//! subscriber gets its own bounded `mpsc` channel, so a slow subscriber
//! only ever loses its own queued events, never another subscriber's.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::domain::event::Event;

/// Default bound on a subscriber's pending-event queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

struct SubscriberEntry {
    id: u64,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// Fans events out to all subscribers of a stream. The subscriber map
/// is held under a short-lived read lock during `publish` (cloning the
/// sender list, not holding the lock across delivery) and a short-lived
/// write lock during `subscribe`/`unsubscribe`.
pub struct Broadcaster {
    queue_depth: usize,
    subscribers: RwLock<HashMap<String, Vec<SubscriberEntry>>>,
    next_id: AtomicU64,
}

/// A live subscription to one stream. Dropping it unsubscribes.
pub struct Subscription {
    stream: String,
    id: u64,
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Number of events dropped for this subscription due to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.stream, self.id);
    }
}

impl Broadcaster {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to `stream`. Returns a handle that must be held alive
    /// for as long as the subscriber wants to keep receiving events.
    pub fn subscribe(self: &Arc<Self>, stream: impl Into<String>) -> Subscription {
        let stream = stream.into();
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers
            .write()
            .entry(stream.clone())
            .or_default()
            .push(SubscriberEntry { id, tx, dropped: dropped.clone() });
        Subscription {
            stream,
            id,
            rx,
            dropped,
            broadcaster: self.clone(),
        }
    }

    fn unsubscribe(&self, stream: &str, id: u64) {
        let mut map = self.subscribers.write();
        if let Some(list) = map.get_mut(stream) {
            list.retain(|e| e.id != id);
            if list.is_empty() {
                map.remove(stream);
            }
        }
    }

    /// Deliver `event` to every current subscriber of its stream. A
    /// subscriber whose queue is full simply misses this event; the
    /// drop is recorded against that subscriber only.
    pub fn publish(&self, event: Event) {
        let senders: Vec<(mpsc::Sender<Event>, Arc<AtomicU64>)> = {
            let map = self.subscribers.read();
            match map.get(&event.stream) {
                Some(list) => list.iter().map(|e| (e.tx.clone(), e.dropped.clone())).collect(),
                None => return,
            }
        };
        for (tx, dropped) in senders {
            if tx.try_send(event.clone()).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of live subscribers on `stream`, for diagnostics and tests.
    pub fn subscriber_count(&self, stream: &str) -> usize {
        self.subscribers.read().get(stream).map(Vec::len).unwrap_or(0)
    }

    /// Drop all subscriptions, closing every subscriber's channel so
    /// pending `recv()` calls resolve to `None`.
    pub fn shutdown(&self) {
        self.subscribers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Actor, EventType};

    fn sample(stream: &str) -> Event {
        Event::new(stream, EventType::Say, Actor::character("alice"), b"{}".to_vec())
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let b = Arc::new(Broadcaster::new(4));
        let mut sub = b.subscribe("room:1");
        b.publish(sample("room:1"));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.stream, "room:1");
    }

    #[tokio::test]
    async fn publish_to_unknown_stream_is_a_no_op() {
        let b = Arc::new(Broadcaster::new(4));
        b.publish(sample("nobody:home"));
    }

    #[tokio::test]
    async fn drop_only_affects_the_slow_subscriber() {
        let b = Arc::new(Broadcaster::new(1));
        let mut slow = b.subscribe("room:1");
        let mut fast = b.subscribe("room:1");

        // First event fills both one-deep queues.
        b.publish(sample("room:1"));
        // Fast drains immediately and keeps up; slow never drains.
        let first = fast.recv().await.unwrap();
        assert_eq!(first.stream, "room:1");

        // Second event: slow's queue is still full and overflows, fast's
        // queue is empty and accepts it.
        b.publish(sample("room:1"));

        assert_eq!(slow.dropped_count(), 1);
        assert_eq!(fast.dropped_count(), 0);

        let _ = slow.recv().await;
    }

    #[tokio::test]
    async fn dropping_subscription_removes_it_from_the_map() {
        let b = Arc::new(Broadcaster::new(4));
        {
            let _sub = b.subscribe("room:1");
            assert_eq!(b.subscriber_count("room:1"), 1);
        }
        assert_eq!(b.subscriber_count("room:1"), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_pending_receivers() {
        let b = Arc::new(Broadcaster::new(4));
        let mut sub = b.subscribe("room:1");
        b.shutdown();
        assert_eq!(sub.recv().await, None);
    }
}
