//! Turns a stored [`Event`] into the line of text a connected client sees.

use serde::Deserialize;

use crate::domain::event::{Event, EventType};

#[derive(Deserialize)]
struct SayPayload {
    message: String,
}

#[derive(Deserialize)]
struct PosePayload {
    action: String,
}

#[derive(Deserialize)]
struct SystemPayload {
    #[serde(default)]
    message: Option<String>,
}

/// Render `event` as a single display line. Any payload that fails to
/// deserialize into the shape its `event_type` expects falls back to a
/// `<corrupted …>` marker rather than propagating an error to the
/// connection loop — a malformed payload must never take a session down.
pub fn render(event: &Event) -> String {
    let short = event.actor.short();
    match event.event_type {
        EventType::Say => match serde_json::from_slice::<SayPayload>(&event.payload) {
            Ok(p) => format!("[{short}] {short} says, \"{}\"", p.message),
            Err(_) => corrupted(event),
        },
        EventType::Pose => match serde_json::from_slice::<PosePayload>(&event.payload) {
            Ok(p) => format!("[{short}] {short} {}", p.action),
            Err(_) => corrupted(event),
        },
        EventType::Arrive => format!("[{short}] {short} has arrived."),
        EventType::Leave => format!("[{short}] {short} has left."),
        EventType::System => match serde_json::from_slice::<SystemPayload>(&event.payload) {
            Ok(SystemPayload { message: Some(m) }) => format!("[{short}] *** {m} ***"),
            _ => format!("[{short}] <event: {}>", event.event_type.as_str()),
        },
    }
}

fn corrupted(event: &Event) -> String {
    format!("<corrupted {} event from {}>", event.event_type.as_str(), event.actor.short())
}
