//! Wire shapes exchanged with guest plugin modules. These mirror the
//! event wire format in spirit but use plain integers for actor kind
//! and a raw string for the payload so a guest written in any language
//! with a WASM target can decode them without a shared enum or
//! nested-JSON convention.

use serde::{Deserialize, Serialize};

use crate::domain::event::Event;

#[derive(Debug, Clone, Serialize)]
pub struct PluginEventWire {
    pub id: String,
    pub stream: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: u64,
    pub actor_kind: i32,
    pub actor_id: String,
    /// The original payload bytes, carried as a UTF-8 string. The
    /// payload is itself a JSON object shaped by `event_type`, but it
    /// crosses the wire as a string rather than nested JSON so a
    /// malformed payload never breaks parsing of the envelope around it.
    pub payload: String,
}

impl PluginEventWire {
    pub fn from_event(event: &Event) -> Self {
        let payload = String::from_utf8_lossy(&event.payload).into_owned();
        Self {
            id: event.id.encode(),
            stream: event.stream.clone(),
            event_type: event.event_type.as_str().to_string(),
            timestamp: event.timestamp,
            actor_kind: event.actor.kind.as_wire_code(),
            actor_id: event.actor.id.clone(),
            payload,
        }
    }
}

/// A new event a plugin wants emitted back into the engine, in response
/// to the event it was just handed.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEmission {
    pub stream: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: String,
}

/// A guest's response to one `handle_event` call: `{"events": [...]}`.
/// Empty output (no bytes at all) is handled by the host before JSON
/// parsing is even attempted; an empty/absent `events` array parses to
/// an empty `Vec`.
#[derive(Debug, Default, Deserialize)]
pub struct PluginResponseWire {
    #[serde(default, rename = "events")]
    pub emissions: Vec<PluginEmission>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Actor, EventType};

    #[test]
    fn wire_event_carries_integer_actor_kind_and_string_payload() {
        let event = Event::new("room:1", EventType::Say, Actor::plugin("greeter"), br#"{"message":"hi"}"#.to_vec());
        let wire = PluginEventWire::from_event(&event);
        assert_eq!(wire.actor_kind, 2);
        assert_eq!(wire.event_type, "say");
        assert_eq!(wire.payload, r#"{"message":"hi"}"#);
    }

    #[test]
    fn response_with_no_events_field_defaults_to_empty() {
        let parsed: PluginResponseWire = serde_json::from_str("{}").unwrap();
        assert!(parsed.emissions.is_empty());
    }

    #[test]
    fn response_parses_events_array_under_its_wire_name() {
        let parsed: PluginResponseWire = serde_json::from_str(r#"{"events":[{"stream":"location:lobby","type":"say","payload":"Echo: hi"}]}"#).unwrap();
        assert_eq!(parsed.emissions.len(), 1);
        assert_eq!(parsed.emissions[0].payload, "Echo: hi");
    }
}
