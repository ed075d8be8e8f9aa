//! The engine ties the event store and broadcaster together and exposes
//! the small set of mutating operations sessions and plugins drive.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::broadcast::Broadcaster;
use crate::domain::event::{Actor, Event, EventId, EventType};
use crate::domain::store::EventStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stream name must not be empty")]
    EmptyStream,
    #[error("payload exceeds maximum size")]
    PayloadTooLarge,
}

/// The narrow interface plugins emit events through. Kept separate from
/// `Engine` itself so that `plugin::subscriber` can depend on this trait
/// rather than on `domain::engine` directly — `Engine` implements
/// `Emitter`, and the subscriber holds an `Arc<dyn Emitter>`, breaking
/// what would otherwise be a cyclic module dependency (engine -> plugin
/// subscriber -> engine).
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, stream: &str, event_type: EventType, actor: Actor, payload: Vec<u8>) -> Result<Event, EngineError>;
}

/// Maximum payload size accepted by the engine, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// A secondary consumer of every emitted event, notified after the
/// store append and broadcast have both happened. Defined here rather
/// than in `plugin::subscriber` so `Engine` can hold sinks without
/// `domain` depending on `plugin` — `plugin::subscriber` implements
/// this trait instead, and `app` wires the two together.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

pub struct Engine {
    store: Arc<dyn EventStore>,
    broadcaster: Arc<Broadcaster>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn EventStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_sink(self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.write().push(sink);
        self
    }

    /// Register a sink on an already-shared engine. Lets a sink whose
    /// own construction needs an `Arc<dyn Emitter>` back onto this same
    /// engine be wired up after the engine is wrapped in an `Arc`,
    /// without resorting to a back-pointer or placeholder.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Append `event_type` on `stream` from `actor`, then fan it out to
    /// subscribers and sinks. Appending happens before broadcasting so
    /// that any subscriber waking up to read the store's replay log
    /// mid-broadcast never observes a gap.
    pub async fn emit(&self, stream: &str, event_type: EventType, actor: Actor, payload: Vec<u8>) -> Result<Event, EngineError> {
        if stream.is_empty() {
            return Err(EngineError::EmptyStream);
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(EngineError::PayloadTooLarge);
        }
        let event = Event::new(stream, event_type, actor, payload);
        let stored = self.store.append(event);
        self.broadcaster.publish(stored.clone());
        for sink in self.sinks.read().iter() {
            sink.on_event(&stored);
        }
        Ok(stored)
    }

    /// Subscribe to `stream` on the engine's broadcaster. Exposed here
    /// rather than handing callers the broadcaster directly, so a
    /// session always subscribes to the same broadcaster its `emit`
    /// calls publish to.
    pub fn subscribe(&self, stream: impl Into<String>) -> crate::broadcast::Subscription {
        self.broadcaster.subscribe(stream)
    }

    /// Pass-through to the store, scoped to the requesting character.
    /// `character` is accepted per spec.md §4.3's
    /// `replay(character, stream, limit)` signature so the permission
    /// check this spec calls out as a stub has a place to land; no
    /// such check exists yet, so every caller currently sees the full
    /// stream regardless of `character`.
    pub fn replay(&self, _character: &str, stream: &str, after: Option<EventId>, limit: Option<usize>) -> Vec<Event> {
        self.store.replay(stream, after, limit)
    }
}

#[async_trait]
impl Emitter for Engine {
    async fn emit(&self, stream: &str, event_type: EventType, actor: Actor, payload: Vec<u8>) -> Result<Event, EngineError> {
        Engine::emit(self, stream, event_type, actor, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::domain::store::InMemoryEventStore;

    fn engine() -> Engine {
        Engine::new(Arc::new(InMemoryEventStore::new()), Arc::new(Broadcaster::new(16)))
    }

    #[tokio::test]
    async fn emit_rejects_empty_stream() {
        let e = engine();
        let err = e.emit("", EventType::Say, Actor::character("a"), vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyStream));
    }

    #[tokio::test]
    async fn emit_rejects_oversized_payload() {
        let e = engine();
        let payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let err = e.emit("room:1", EventType::Say, Actor::character("a"), payload).await.unwrap_err();
        assert!(matches!(err, EngineError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn emit_then_replay_sees_the_event() {
        let e = engine();
        let sent = e.emit("room:1", EventType::Say, Actor::character("a"), b"{}".to_vec()).await.unwrap();
        let events = e.replay("a", "room:1", None, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, sent.id);
    }
}
