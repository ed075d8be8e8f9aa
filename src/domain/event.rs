//! Event record, actor, and the lexicographically sortable event id.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Crockford base32 alphabet used by [`EventId`]'s textual form.
const CROCKFORD_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// 128-bit lexicographically sortable identifier: high 48 bits are a
/// millisecond timestamp, low 80 bits are random.
///
/// Within one stream, ids are strictly increasing in insertion order:
/// `InMemoryEventStore::append` mints the id while holding the
/// stream's write lock, rather than trusting whatever id the event
/// already carried, so two concurrent appends to the same stream can
/// never interleave mint-then-push out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId([u8; 16]);

impl EventId {
    /// Mint a new id from the current wall-clock time and a random tail.
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0) as u64;
        Self::from_parts(millis, rand::thread_rng().next_u64(), rand::thread_rng().next_u32())
    }

    /// Build from explicit parts; used by tests to construct deterministic,
    /// strictly increasing ids.
    pub fn from_parts(millis: u64, rand_hi: u64, rand_lo: u32) -> Self {
        let mut bytes = [0u8; 16];
        // High 48 bits: timestamp.
        bytes[0] = (millis >> 40) as u8;
        bytes[1] = (millis >> 32) as u8;
        bytes[2] = (millis >> 24) as u8;
        bytes[3] = (millis >> 16) as u8;
        bytes[4] = (millis >> 8) as u8;
        bytes[5] = millis as u8;
        // Low 80 bits: random tail (64 bits + 16 bits).
        bytes[6] = (rand_hi >> 56) as u8;
        bytes[7] = (rand_hi >> 48) as u8;
        bytes[8] = (rand_hi >> 40) as u8;
        bytes[9] = (rand_hi >> 32) as u8;
        bytes[10] = (rand_hi >> 24) as u8;
        bytes[11] = (rand_hi >> 16) as u8;
        bytes[12] = (rand_hi >> 8) as u8;
        bytes[13] = rand_hi as u8;
        bytes[14] = (rand_lo >> 8) as u8;
        bytes[15] = rand_lo as u8;
        Self(bytes)
    }

    pub fn timestamp_millis(&self) -> u64 {
        let b = &self.0;
        (b[0] as u64) << 40
            | (b[1] as u64) << 32
            | (b[2] as u64) << 24
            | (b[3] as u64) << 16
            | (b[4] as u64) << 8
            | (b[5] as u64)
    }

    /// 26-character Crockford base32 textual form.
    pub fn encode(&self) -> String {
        let mut bits = 0u128;
        for b in self.0 {
            bits = (bits << 8) | b as u128;
        }
        let mut out = vec![0u8; 26];
        for (i, slot) in out.iter_mut().enumerate() {
            let shift = 125 - i * 5;
            let idx = ((bits >> shift) & 0x1F) as usize;
            *slot = CROCKFORD_ALPHABET[idx];
        }
        // 128 bits / 5 = 25.6, so the first symbol only carries 3 bits;
        // shifting by 125 on the first iteration reads bits [127..125] plus
        // two zero pad bits above — safe because `bits` is zero-extended.
        String::from_utf8(out).expect("crockford alphabet is ASCII")
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for EventId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        decode_crockford(&s).ok_or_else(|| serde::de::Error::custom("invalid event id"))
    }
}

fn decode_crockford(s: &str) -> Option<EventId> {
    if s.len() != 26 {
        return None;
    }
    let mut bits: u128 = 0;
    for c in s.bytes() {
        let val = CROCKFORD_ALPHABET.iter().position(|&a| a == c.to_ascii_uppercase())?;
        bits = (bits << 5) | val as u128;
    }
    let bytes_full = bits.to_be_bytes();
    // `bits` holds 130 significant bits after 26*5 shifts but the type is
    // 128 bits wide, so the top 2 bits were already shifted out; the
    // remaining 128 bits are exactly our id.
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes_full[0..16]);
    Some(EventId(out))
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Character,
    System,
    Plugin,
}

impl ActorKind {
    /// Integer encoding used by the plugin wire format.
    pub fn as_wire_code(self) -> i32 {
        match self {
            ActorKind::Character => 0,
            ActorKind::System => 1,
            ActorKind::Plugin => 2,
        }
    }

    pub fn from_wire_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ActorKind::Character),
            1 => Some(ActorKind::System),
            2 => Some(ActorKind::Plugin),
            _ => None,
        }
    }
}

/// `{kind, id}` pair identifying the producer of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn character(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Character,
            id: id.into(),
        }
    }

    pub fn system() -> Self {
        Self {
            kind: ActorKind::System,
            id: "system".to_string(),
        }
    }

    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Plugin,
            id: name.into(),
        }
    }

    /// First 8 characters of the actor id, or the full id if shorter.
    /// Splits on a char boundary, never a raw byte index.
    pub fn short(&self) -> &str {
        let end = self.id.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// Closed event type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Say,
    Pose,
    Arrive,
    Leave,
    System,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Say => "say",
            EventType::Pose => "pose",
            EventType::Arrive => "arrive",
            EventType::Leave => "leave",
            EventType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "say" => Some(EventType::Say),
            "pose" => Some(EventType::Pose),
            "arrive" => Some(EventType::Arrive),
            "leave" => Some(EventType::Leave),
            "system" => Some(EventType::System),
            _ => None,
        }
    }
}

/// An immutable event record. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub stream: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: u64,
    pub actor: Actor,
    /// Opaque JSON payload bytes, shaped by `event_type`.
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(stream: impl Into<String>, event_type: EventType, actor: Actor, payload: Vec<u8>) -> Self {
        let id = EventId::new();
        let timestamp = id.timestamp_millis();
        Self {
            id,
            stream: stream.into(),
            event_type,
            timestamp,
            actor,
            payload,
        }
    }
}
