pub mod broadcaster;

pub use broadcaster::{Broadcaster, Subscription, DEFAULT_QUEUE_DEPTH};
