//! Error taxonomy shared by the transport and everything layered on it.

use std::time::Duration;

/// Transport-level failure: the server could not be reached, the handshake
/// was refused, or an established link went silent.
///
/// Cloneable so that every caller awaiting the same in-flight connect
/// receives the same outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// The socket could not be opened.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server rejected or garbled the `Connect` exchange.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No frame arrived within the heartbeat window.
    #[error("no heartbeat from server for {0:?}")]
    HeartbeatTimeout(Duration),

    /// A bounded wait expired.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The link closed underneath us.
    #[error("connection closed")]
    Closed,

    /// An operation needed a live connection and there was none.
    #[error("not connected")]
    NotConnected,

    /// `disconnect` was called while the attempt was in flight.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Every configured attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        last: Box<ConnectionError>,
    },
}

impl ConnectionError {
    /// Whether this error is worth another attempt with the same identity.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ConnectionError::Cancelled | ConnectionError::RetriesExhausted { .. }
        )
    }
}

/// A frame or message body that could not be understood.
///
/// Never fatal for inbound broadcasts: the offending message is discarded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// The envelope carried a version this client does not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u64),

    /// The envelope itself was not valid JSON or lacked required fields.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A destination body did not match its schema.
    #[error("malformed body on {destination}: {reason}")]
    MalformedBody {
        /// Destination the body arrived on.
        destination: String,
        /// Decoder diagnostic.
        reason: String,
    },
}

/// A bounded wait that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{operation} timed out after {after:?}")]
pub struct TimeoutError {
    /// What was being waited for.
    pub operation: &'static str,
    /// The bound that was exceeded.
    pub after: Duration,
}
