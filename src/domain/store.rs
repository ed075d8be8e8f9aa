//! Append-only per-stream event log with replay.

use dashmap::DashMap;
use parking_lot::RwLock;

use super::event::{Event, EventId};

/// A stream's event log is append-only: events are never removed or
/// reordered once appended, so a read snapshot taken under the lock is
/// always a valid prefix of the eventual full history.
pub trait EventStore: Send + Sync {
    /// Append `event` to `stream`, returning the event as stored. The
    /// id `event` already carries is discarded and replaced with one
    /// minted while the stream's append lock is held, so that two
    /// concurrent appends to the same stream can never be stored in an
    /// order that disagrees with their id order.
    fn append(&self, event: Event) -> Event;

    /// Up to `limit` events in `stream` with id strictly greater than
    /// `after` (or from the oldest retained event if `after` is
    /// `None`), in append order. `limit = None` returns every matching
    /// event.
    fn replay(&self, stream: &str, after: Option<EventId>, limit: Option<usize>) -> Vec<Event>;

    /// Number of events currently stored for `stream`.
    fn len(&self, stream: &str) -> usize;
}

/// The in-memory event store: one `Vec<Event>` per stream, each guarded
/// by its own lock so that unrelated streams never contend. Streams
/// materialize lazily on first append, matching the sharded-map idiom
/// used elsewhere in this codebase for per-key counters.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: DashMap<String, RwLock<Vec<Event>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, mut event: Event) -> Event {
        let entry = self.streams.entry(event.stream.clone()).or_default();
        let mut log = entry.write();
        // Minted here, under the same lock that pushes below, so the
        // id this event is given and the position it lands in the log
        // are decided atomically with respect to every other append
        // to this stream.
        event.id = EventId::new();
        event.timestamp = event.id.timestamp_millis();
        log.push(event.clone());
        event
    }

    fn replay(&self, stream: &str, after: Option<EventId>, limit: Option<usize>) -> Vec<Event> {
        let Some(entry) = self.streams.get(stream) else {
            return Vec::new();
        };
        // Snapshot under the read lock so a concurrent append never
        // produces a torn read of a partially-appended event.
        let log = entry.read();
        let matching = log.iter().filter(|e| after.is_none_or(|cursor| e.id > cursor));
        match limit {
            Some(n) => matching.take(n).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    fn len(&self, stream: &str) -> usize {
        self.streams.get(stream).map(|e| e.read().len()).unwrap_or(0)
    }
}
