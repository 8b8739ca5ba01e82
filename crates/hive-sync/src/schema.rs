//! Typed bodies for every room destination.
//!
//! Bodies travel as JSON text inside [`hive_net::Envelope`]. Field names are
//! the wire contract and stay camelCase. [`decode_body`] is the only way
//! inbound bodies are parsed, so a bad body always becomes a
//! [`ProtocolError::MalformedBody`] naming its destination.

use std::collections::BTreeMap;

use hive_net::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::player::PlayerState;

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Publish a [`CreateRoomRequest`].
pub const CREATE_ROOM: &str = "/app/createRoom";
/// Reply queue for [`RoomCreated`].
pub const ROOM_CREATED: &str = "/queue/roomCreated";
/// Publish a [`JoinRoomRequest`].
pub const JOIN_ROOM: &str = "/app/joinRoom";
/// Reply queue for [`JoinResult`].
pub const JOIN_RESULT: &str = "/queue/joinResult";
/// Publish the local [`PlayerState`] once after subscribing.
pub const REGISTER: &str = "/app/register";
/// Publish the local [`PlayerState`] on movement.
pub const MOVE: &str = "/app/move";

/// Broadcast topic carrying [`PlayersSnapshot`]s for `room_id`.
pub fn players_topic(room_id: &str) -> String {
    format!("/topic/rooms/{room_id}/players")
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub username: String,
}

/// Reply to [`CreateRoomRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub success: bool,
    /// Present when `success` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub username: String,
    pub room_id: String,
}

/// Reply to [`JoinRoomRequest`]. `success: false` means the room is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Full room view broadcast by the server: entity id to state.
///
/// Not a delta. An id missing here has left.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayersSnapshot(pub BTreeMap<String, PlayerState>);

impl PlayersSnapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PlayerState> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }
}

impl FromIterator<PlayerState> for PlayersSnapshot {
    fn from_iter<I: IntoIterator<Item = PlayerState>>(iter: I) -> Self {
        Self(iter.into_iter().map(|p| (p.id.clone(), p)).collect())
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Serialize a body for publishing.
pub fn encode_body<T: Serialize>(destination: &str, body: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(body).map_err(|e| ProtocolError::MalformedBody {
        destination: destination.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a body received on `destination`.
pub fn decode_body<T: DeserializeOwned>(destination: &str, body: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(body).map_err(|e| ProtocolError::MalformedBody {
        destination: destination.to_string(),
        reason: e.to_string(),
    })
}
