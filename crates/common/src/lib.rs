// ================
// common/src/lib.rs
// ================
//! Wire protocol shared by the Slang room client and the room server.
//!
//! Outbound frames are `{"type": ..., "payload": {...}}` objects. Inbound
//! frames are decoded per context: the handshake reads a [`HandshakeReply`],
//! the live channel reads a [`LiveEvent`]. The server reuses the `join` tag
//! for both the handshake acknowledgment and the roster snapshot, so the two
//! contexts never share a decoder.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Maximum number of participants the server admits into one room
pub const ROOM_CAPACITY: usize = 10;

/// Sender email used for locally generated join/leave announcements
pub const SYSTEM_SENDER: &str = "system";

/// Error text the server sends when a room does not (or no longer) exist
pub const ROOM_NOT_FOUND: &str = "Room not found";

/// Epoch milliseconds
pub type Millis = i64;

/// Server timestamp in epoch milliseconds, kept exactly as received.
///
/// Whole values compare as integers, so `1000` and `1000.0` are equal.
/// Fractional values compare by their exact bits, so `1000.2` and `1000.7`
/// stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp(Repr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Repr {
    Whole(i64),
    Fractional(u64),
}

impl Timestamp {
    /// `None` for NaN and infinities
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
        if value.fract() == 0.0 && in_range {
            Some(Self(Repr::Whole(value as i64)))
        } else {
            Some(Self(Repr::Fractional(value.to_bits())))
        }
    }

    /// Whole milliseconds, rounded down
    pub fn as_millis(&self) -> Millis {
        match self.0 {
            Repr::Whole(millis) => millis,
            Repr::Fractional(bits) => f64::from_bits(bits).floor() as Millis,
        }
    }
}

impl From<Millis> for Timestamp {
    fn from(millis: Millis) -> Self {
        Self(Repr::Whole(millis))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Repr::Whole(millis) => serializer.serialize_i64(millis),
            Repr::Fractional(bits) => serializer.serialize_f64(f64::from_bits(bits)),
        }
    }
}

/// Frames sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Create a new room; the creator is its admin
    Create(CreateRoom),
    /// Handshake join, or the presence announcement on the live channel
    Join(JoinRoom),
    /// Chat message for everyone in the room
    Chat(ChatSend),
}

impl ClientFrame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub room_id: String,
    pub room_title: String,
    pub email: String,
    pub full_name: String,
    pub is_admin: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    pub email: String,
    pub full_name: String,
    pub is_admin: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSend {
    pub room_id: String,
    pub email: String,
    pub message: String,
}

/// A member of a room roster. Unique by `email` within a room.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub email: String,
    #[serde(rename = "fullName", default)]
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Payload of a `user_left` broadcast
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub email: String,
    #[serde(rename = "fullName", default)]
    pub display_name: Option<String>,
}

/// Payload of a `chat` broadcast
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub email: String,
    pub message: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<Timestamp>,
}

/// Terminal replies to a `create` or handshake `join` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    /// `success`: the room was created
    Created { room_title: Option<String> },
    /// `join`: membership was granted
    Joined { room_title: Option<String> },
    /// `limit`: the room is at capacity
    Limit,
    /// `error`: the request was rejected, e.g. "Room not found"
    Rejected { message: Option<String> },
    /// Anything else; not terminal
    Unrecognized(String),
}

impl HandshakeReply {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        let frame = RawFrame::parse(text)?;
        Ok(match frame.kind.as_str() {
            "success" => Self::Created {
                room_title: frame.field("roomTitle"),
            },
            "join" | "joined" => Self::Joined {
                room_title: frame.field("roomTitle"),
            },
            "limit" => Self::Limit,
            "error" => Self::Rejected {
                message: frame.field("message"),
            },
            _ => Self::Unrecognized(frame.kind),
        })
    }

    /// Whether this reply settles the pending handshake
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

/// Server-pushed events on the live room channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Full roster, sent once in answer to the presence announcement
    RosterSnapshot(Vec<Participant>),
    Chat(ChatLine),
    UserJoined(Participant),
    UserLeft(Departure),
    Error { message: Option<String> },
    /// Unknown tag, or a `join` without a participant list
    Unrecognized(String),
}

impl LiveEvent {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        let frame = RawFrame::parse(text)?;
        Ok(match frame.kind.as_str() {
            "join" | "roster" => match frame.field("participants") {
                Some(participants) => Self::RosterSnapshot(participants),
                None => Self::Unrecognized(frame.kind),
            },
            "chat" => Self::Chat(frame.body()?),
            "user_joined" => Self::UserJoined(frame.body()?),
            "user_left" => Self::UserLeft(frame.body()?),
            "error" => Self::Error {
                message: frame.field("message"),
            },
            _ => Self::Unrecognized(frame.kind),
        })
    }
}

/// Whether an error text from the server means the room is gone
pub fn is_room_not_found(message: &str) -> bool {
    message.trim().eq_ignore_ascii_case(ROOM_NOT_FOUND)
}

/// Undecoded inbound frame. The server places some fields in `payload` and
/// others at the top level, so lookups try both.
#[derive(Deserialize, Debug)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl RawFrame {
    fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Optional field lookup. A value of the wrong shape reads as absent;
    /// only the `type` tag decides what a frame means.
    fn field<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self
            .payload
            .as_ref()
            .and_then(|payload| payload.get(name))
            .or_else(|| self.rest.get(name))?;

        T::deserialize(value).ok()
    }

    fn body<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.payload {
            Some(payload @ Value::Object(_)) => T::deserialize(payload),
            _ => T::deserialize(&Value::Object(self.rest.clone())),
        }
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(millis) => Some(Timestamp::from(millis)),
            None => n.as_f64().and_then(Timestamp::from_f64),
        },
        _ => None,
    })
}
