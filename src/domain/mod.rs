pub mod engine;
pub mod event;
pub mod store;

pub use engine::{Emitter, Engine, EngineError};
pub use event::{Actor, ActorKind, Event, EventId, EventType};
pub use store::{EventStore, InMemoryEventStore};
