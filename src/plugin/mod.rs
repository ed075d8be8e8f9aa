pub mod host;
pub mod subscriber;
pub mod wire;

pub use host::{PluginError, PluginHost};
pub use subscriber::{PluginSubscriber, DEFAULT_DELIVERY_TIMEOUT_MS};
pub use wire::{PluginEmission, PluginEventWire, PluginResponseWire};
