//! Pub/sub envelopes carried over the persistent connection.
//!
//! Every frame on the wire is one JSON object: the envelope fields, a `type`
//! tag, and a protocol version field `v`. Destination-specific payloads travel
//! as JSON text in `body` and are decoded by the layer that owns the
//! destination. Use [`encode`] and [`decode`] rather than calling `serde_json`
//! directly so the version check is never skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Current wire-protocol version, written into every envelope as `v`.
pub const PROTOCOL_VERSION: u64 = 1;

/// Name of the version field inside the JSON object.
const VERSION_FIELD: &str = "v";

/// Client-chosen identifier tying `Message` deliveries to a `Subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

/// One frame of the pub/sub protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    // --- Session ---
    /// Client opens a session. `heartbeat_ms` is the interval the client
    /// wants in both directions.
    Connect {
        /// Login name the session is opened under.
        login: String,
        /// Requested heartbeat interval.
        heartbeat_ms: u64,
    },
    /// Server accepts the session and states the negotiated interval.
    Connected {
        /// Negotiated heartbeat interval.
        heartbeat_ms: u64,
    },
    /// Client closes the session gracefully.
    Disconnect,

    // --- Messaging ---
    /// Publish `body` to an application destination.
    Send {
        /// Target destination, e.g. `/app/move`.
        destination: String,
        /// JSON text of the destination schema.
        body: String,
    },
    /// Start receiving messages published to `destination`.
    Subscribe {
        /// Client-side handle for the subscription.
        id: SubscriptionId,
        /// Topic or queue to follow.
        destination: String,
    },
    /// Stop a subscription.
    Unsubscribe {
        /// Handle passed to the matching `Subscribe`.
        id: SubscriptionId,
    },
    /// Server delivers a message for an active subscription.
    Message {
        /// Subscription the message is routed to.
        subscription: SubscriptionId,
        /// Destination it was published on.
        destination: String,
        /// JSON text of the destination schema.
        body: String,
    },

    // --- System ---
    /// Liveness signal, sent by both sides every heartbeat interval.
    Heartbeat,
    /// Server-side failure report.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl Envelope {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Connect { .. } => "CONNECT",
            Envelope::Connected { .. } => "CONNECTED",
            Envelope::Disconnect => "DISCONNECT",
            Envelope::Send { .. } => "SEND",
            Envelope::Subscribe { .. } => "SUBSCRIBE",
            Envelope::Unsubscribe { .. } => "UNSUBSCRIBE",
            Envelope::Message { .. } => "MESSAGE",
            Envelope::Heartbeat => "HEARTBEAT",
            Envelope::Error { .. } => "ERROR",
        }
    }
}

/// Serialize an envelope into versioned JSON text.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let mut value = serde_json::to_value(envelope)
        .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;
    match value.as_object_mut() {
        Some(fields) => {
            fields.insert(VERSION_FIELD.to_string(), Value::from(PROTOCOL_VERSION));
        }
        None => {
            return Err(ProtocolError::MalformedEnvelope(
                "envelope did not serialize to an object".to_string(),
            ));
        }
    }
    serde_json::to_vec(&value).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
}

/// Parse versioned JSON text into an envelope.
///
/// A missing `v` field is treated as malformed; a present but different
/// version is [`ProtocolError::UnsupportedVersion`].
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    let value: Value =
        serde_json::from_slice(data).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;

    let version = value
        .get(VERSION_FIELD)
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::MalformedEnvelope("missing version field".to_string()))?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
}
