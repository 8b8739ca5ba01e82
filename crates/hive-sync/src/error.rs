//! Room and client errors.

use hive_net::{ConnectionError, ProtocolError, TimeoutError};

/// A room operation failed.
///
/// Surfaced to the caller immediately; room errors are never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoomError {
    /// The server does not know this room.
    #[error("room {0} does not exist")]
    InvalidRoom(String),

    /// No established connection to send the request over.
    #[error("not connected")]
    NotConnected,

    /// The server answered but refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The link failed while the request was in flight.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The reply could not be understood.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No reply arrived in time.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

/// Failure of a [`SyncClient`](crate::SyncClient) operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Connecting failed after every retry.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Room(#[from] RoomError),
}

impl SyncError {
    /// One human-readable reason, suitable for showing to the user as is.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::Connection(ConnectionError::Cancelled) => "Connection was cancelled.",
            SyncError::Connection(_) | SyncError::Room(RoomError::Connection(_)) => {
                "Could not reach the server. Check your connection and try again."
            }
            SyncError::Room(RoomError::InvalidRoom(_)) => "Room not found. Check the room code and try again.",
            SyncError::Room(RoomError::NotConnected) => "Not connected to the server.",
            SyncError::Room(RoomError::Rejected(_)) => "The server could not set up the room. Please try again.",
            SyncError::Room(RoomError::Timeout(_)) => "The server did not respond in time. Please try again.",
            SyncError::Room(RoomError::Protocol(_)) => "The server sent an unexpected response.",
        }
    }

    /// Whether this is the "room not found" case.
    pub fn is_invalid_room(&self) -> bool {
        matches!(self, SyncError::Room(RoomError::InvalidRoom(_)))
    }
}
