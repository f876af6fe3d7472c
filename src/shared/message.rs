/**
 * Wire Protocol
 *
 * This module defines the message envelope exchanged over a collaboration
 * connection and the payload carried by each message kind.
 *
 * Every frame on the wire is one JSON object:
 *
 * ```json
 * {"type": "op-patch", "senderId": "user-1", "payload": {...}, "ts": 1700000000000}
 * ```
 *
 * The `type` field selects the payload shape. Decoding happens exactly once,
 * into the closed `MessageBody` enum, so every consumer matches on a typed
 * variant instead of re-inspecting raw JSON.
 *
 * # Criticality
 *
 * Edit patches, full syncs, acknowledgements and errors are critical: a
 * recipient that cannot keep up with them is disconnected rather than left
 * silently out of sync. Cursor updates and presence notices are ephemeral and
 * may be dropped under backpressure.
 */
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::shared::document::Version;
use crate::shared::error::SharedError;

/// Sentinel sender id for server-originated messages
pub const SERVER_SENDER: &str = "server";

/// Enumerated message kind, serialized as the envelope's `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Incremental RFC 6902 edit
    #[serde(rename = "op-patch")]
    EditPatch,
    /// Ephemeral cursor or selection position
    #[serde(rename = "cursor-move")]
    CursorUpdate,
    /// A participant attached to the session
    #[serde(rename = "user-join")]
    ParticipantJoined,
    /// A participant left or was evicted
    #[serde(rename = "user-leave")]
    ParticipantLeft,
    /// Complete snapshot sent to a newly joined participant
    #[serde(rename = "sync")]
    FullSync,
    /// Acknowledgement of an accepted edit
    #[serde(rename = "ack")]
    Ack,
    /// Structured error
    #[serde(rename = "error")]
    Error,
}

impl MessageKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EditPatch => "op-patch",
            Self::CursorUpdate => "cursor-move",
            Self::ParticipantJoined => "user-join",
            Self::ParticipantLeft => "user-leave",
            Self::FullSync => "sync",
            Self::Ack => "ack",
            Self::Error => "error",
        }
    }

    /// Whether a recipient that cannot accept this kind must be disconnected
    pub fn is_critical(&self) -> bool {
        match self {
            Self::EditPatch | Self::FullSync | Self::Ack | Self::Error => true,
            Self::CursorUpdate | Self::ParticipantJoined | Self::ParticipantLeft => false,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a message's sender
///
/// Serialized as a plain string; the reserved value `"server"` marks
/// messages the engine itself produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SenderId {
    /// Server-originated message
    Server,
    /// Message from an authenticated user
    User(String),
}

impl SenderId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Server => SERVER_SENDER,
            Self::User(id) => id,
        }
    }
}

impl Default for SenderId {
    fn default() -> Self {
        Self::Server
    }
}

impl Serialize for SenderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SenderId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw == SERVER_SENDER {
            Self::Server
        } else {
            Self::User(raw)
        })
    }
}

/// Stable error codes carried by `error` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Expected version did not match; carries current and expected versions
    VersionConflict,
    /// Patch body is malformed or uses an unknown operation
    PatchInvalid,
    /// Patch is well-formed but cannot be applied to the document
    PatchFailed,
    /// No live session exists for the document
    SessionNotFound,
    /// The session is shutting down; the client should retry
    SessionClosing,
    /// The document was deleted; terminal for the client
    DocumentDeleted,
    /// Authentication failed
    Unauthorized,
    /// Anything else
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::PatchInvalid => "PATCH_INVALID",
            Self::PatchFailed => "PATCH_FAILED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionClosing => "SESSION_CLOSING",
            Self::DocumentDeleted => "DOCUMENT_DELETED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic participant information shown to peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub user_name: String,
    /// Cursor colour, stable per user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

const PARTICIPANT_COLORS: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
];

impl Participant {
    /// Create a participant with a colour derived from the user id
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let color = color_for_user(&user_id).to_string();
        Self {
            user_id,
            user_name: user_name.into(),
            color: Some(color),
        }
    }
}

/// Pick a palette colour for a user id
///
/// The same id always maps to the same colour, so a participant keeps
/// their cursor colour across reconnects.
pub fn color_for_user(user_id: &str) -> &'static str {
    let hash = user_id
        .chars()
        .fold(0u64, |hash, c| hash.wrapping_mul(31).wrapping_add(c as u64));
    PARTICIPANT_COLORS[(hash % PARTICIPANT_COLORS.len() as u64) as usize]
}

/// `op-patch` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditPatch {
    /// RFC 6902 operation list, kept as raw JSON until the session parses it
    pub patches: serde_json::Value,
    /// Version the sender believes the document is at
    pub version: Version,
}

/// `sync` payload, sent only to a newly joined participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSync {
    /// Complete document snapshot
    pub schema: serde_json::Value,
    /// Authoritative version of `schema`
    pub version: Version,
    /// Other participants attached at the time of joining
    pub users: Vec<Participant>,
}

/// `ack` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Version produced by the acknowledged edit
    pub version: Version,
}

/// `error` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<Version>,
}

/// Kind-specific message content
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    EditPatch(EditPatch),
    /// Opaque position/selection data; never validated against the document
    CursorUpdate(serde_json::Value),
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    FullSync(FullSync),
    Ack(Ack),
    Error(ErrorPayload),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::EditPatch(_) => MessageKind::EditPatch,
            Self::CursorUpdate(_) => MessageKind::CursorUpdate,
            Self::ParticipantJoined(_) => MessageKind::ParticipantJoined,
            Self::ParticipantLeft(_) => MessageKind::ParticipantLeft,
            Self::FullSync(_) => MessageKind::FullSync,
            Self::Ack(_) => MessageKind::Ack,
            Self::Error(_) => MessageKind::Error,
        }
    }
}

/// Message envelope
///
/// # Example
/// ```rust
/// use pagecollab::shared::message::{Envelope, ErrorCode};
///
/// let envelope = Envelope::error(ErrorCode::SessionClosing, "retry shortly");
/// let text = envelope.encode().unwrap();
/// assert!(text.contains("SESSION_CLOSING"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender: SenderId,
    pub body: MessageBody,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(rename = "senderId", default)]
    sender: SenderId,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    ts: i64,
}

#[derive(Serialize)]
struct WireEnvelopeRef<'a, P: Serialize> {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(rename = "senderId")]
    sender: &'a SenderId,
    payload: &'a P,
    ts: i64,
}

impl Envelope {
    /// Create an envelope stamped with the current time
    pub fn new(sender: SenderId, body: MessageBody) -> Self {
        Self {
            sender,
            body,
            timestamp: now_millis(),
        }
    }

    /// Create a server-originated envelope
    pub fn from_server(body: MessageBody) -> Self {
        Self::new(SenderId::Server, body)
    }

    pub fn full_sync(schema: serde_json::Value, version: Version, users: Vec<Participant>) -> Self {
        Self::from_server(MessageBody::FullSync(FullSync {
            schema,
            version,
            users,
        }))
    }

    pub fn ack(version: Version) -> Self {
        Self::from_server(MessageBody::Ack(Ack { version }))
    }

    pub fn participant_joined(participant: Participant) -> Self {
        Self::from_server(MessageBody::ParticipantJoined(participant))
    }

    pub fn participant_left(participant: Participant) -> Self {
        Self::from_server(MessageBody::ParticipantLeft(participant))
    }

    /// Server error without version information
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::from_server(MessageBody::Error(ErrorPayload {
            code,
            message: message.into(),
            current_version: None,
            expected_version: None,
        }))
    }

    /// `VERSION_CONFLICT` error carrying both versions
    pub fn version_conflict(current: Version, expected: Version) -> Self {
        Self::from_server(MessageBody::Error(ErrorPayload {
            code: ErrorCode::VersionConflict,
            message: format!("current: {}, expected: {}", current, expected),
            current_version: Some(current),
            expected_version: Some(expected),
        }))
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_critical(&self) -> bool {
        self.kind().is_critical()
    }

    /// Replace the sender, keeping kind, payload and timestamp
    pub fn with_sender(mut self, sender: SenderId) -> Self {
        self.sender = sender;
        self
    }

    /// Encode to the JSON wire format
    pub fn encode(&self) -> Result<String, SharedError> {
        let encoded = match &self.body {
            MessageBody::EditPatch(payload) => self.encode_with(payload),
            MessageBody::CursorUpdate(payload) => self.encode_with(payload),
            MessageBody::ParticipantJoined(payload) => self.encode_with(payload),
            MessageBody::ParticipantLeft(payload) => self.encode_with(payload),
            MessageBody::FullSync(payload) => self.encode_with(payload),
            MessageBody::Ack(payload) => self.encode_with(payload),
            MessageBody::Error(payload) => self.encode_with(payload),
        }?;
        Ok(encoded)
    }

    fn encode_with<P: Serialize>(&self, payload: &P) -> serde_json::Result<String> {
        serde_json::to_string(&WireEnvelopeRef {
            kind: self.kind(),
            sender: &self.sender,
            payload,
            ts: self.timestamp,
        })
    }

    /// Decode one wire frame
    ///
    /// Fails with `SerializationError` when the frame is not a JSON envelope
    /// or names an unknown kind, and with `PayloadError` when the payload does
    /// not match the announced kind.
    pub fn decode(text: &str) -> Result<Self, SharedError> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        let kind = wire.kind;
        let payload = wire.payload;
        let invalid = |e: serde_json::Error| SharedError::payload(kind, e.to_string());

        let body = match kind {
            MessageKind::EditPatch => {
                MessageBody::EditPatch(serde_json::from_value(payload).map_err(invalid)?)
            }
            MessageKind::CursorUpdate => MessageBody::CursorUpdate(payload),
            MessageKind::ParticipantJoined => {
                MessageBody::ParticipantJoined(serde_json::from_value(payload).map_err(invalid)?)
            }
            MessageKind::ParticipantLeft => {
                MessageBody::ParticipantLeft(serde_json::from_value(payload).map_err(invalid)?)
            }
            MessageKind::FullSync => {
                MessageBody::FullSync(serde_json::from_value(payload).map_err(invalid)?)
            }
            MessageKind::Ack => MessageBody::Ack(serde_json::from_value(payload).map_err(invalid)?),
            MessageKind::Error => {
                MessageBody::Error(serde_json::from_value(payload).map_err(invalid)?)
            }
        };

        Ok(Self {
            sender: wire.sender,
            body,
            timestamp: wire.ts,
        })
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
