//! Session-layer error taxonomy, scoped to the connection handler.

use thiserror::Error;

use crate::domain::engine::EngineError;
use crate::session::registry::AlreadyConnected;

/// Errors the connection loop itself distinguishes. None of these ever
/// propagate out of `handle_connection` — everything inside a session
/// is handled locally — they exist so the loop's internal branches
/// have a single typed shape instead of ad hoc string matching.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("command rejected by the engine: {0}")]
    EngineRejected(#[from] EngineError),

    #[error("character is already connected from another session")]
    AlreadyConnected(#[from] AlreadyConnected),

    #[error("socket closed or errored")]
    Disconnected,
}
