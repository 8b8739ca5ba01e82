//! Room membership on top of a connection.
//!
//! A [`RoomSession`] creates or joins one room at a time, follows the room's
//! broadcast topic and registers the local participant. It borrows send
//! capability from the [`ConnectionManager`] for the lifetime of one
//! membership and gives it back on [`leave`](RoomSession::leave).

use std::sync::Arc;
use std::time::Duration;

use glam::DVec2;
use hive_config::SyncConfig;
use hive_net::{
    ConnectionError, ConnectionHandle, ConnectionManager, Connector, ProtocolError, Subscription,
    TimeoutError, TryRecvError,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::Clock;
use crate::error::RoomError;
use crate::player::PlayerState;
use crate::schema::{self, CreateRoomRequest, JoinResult, JoinRoomRequest, PlayersSnapshot, RoomCreated};
use crate::throttle::MovementUpdate;

/// Session timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Pause between subscribing to the room topic and registering.
    pub settle_delay: Duration,
    /// Bound on waiting for a create or join reply.
    pub reply_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&SyncConfig> for SessionConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
        }
    }
}

struct Membership {
    room_id: String,
    local: PlayerState,
    handle: ConnectionHandle,
    players: Subscription,
    lost: bool,
}

/// One client's membership in at most one room.
pub struct RoomSession<C: Connector> {
    connection: ConnectionManager<C>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    membership: Option<Membership>,
}

impl<C: Connector> RoomSession<C> {
    /// Session outside any room, sending over `connection`.
    pub fn new(connection: ConnectionManager<C>, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            connection,
            config,
            clock,
            membership: None,
        }
    }

    /// Ask the server for a new room, then enter it.
    ///
    /// Fails fast with [`RoomError::NotConnected`] when there is no link.
    pub async fn create_room(&mut self, username: &str, spawn: DVec2) -> Result<String, RoomError> {
        let handle = self.connection.handle().map_err(|_| RoomError::NotConnected)?;
        self.leave();

        let request = CreateRoomRequest {
            username: username.to_string(),
        };
        let reply: RoomCreated = self
            .request(&handle, schema::CREATE_ROOM, &request, schema::ROOM_CREATED, "create room reply")
            .await?;
        let room_id = match reply {
            RoomCreated {
                success: true,
                room_id: Some(room_id),
            } => room_id,
            _ => return Err(RoomError::Rejected("server refused to create a room".to_string())),
        };

        tracing::info!(%room_id, username, "room created");
        self.enter(handle, room_id.clone(), username, spawn).await?;
        Ok(room_id)
    }

    /// Join an existing room.
    ///
    /// An unknown `room_id` yields [`RoomError::InvalidRoom`] and leaves no
    /// subscription behind.
    pub async fn join_room(&mut self, username: &str, room_id: &str, spawn: DVec2) -> Result<(), RoomError> {
        let handle = self.connection.handle().map_err(|_| RoomError::NotConnected)?;
        self.leave();

        let request = JoinRoomRequest {
            username: username.to_string(),
            room_id: room_id.to_string(),
        };
        let reply: JoinResult = self
            .request(&handle, schema::JOIN_ROOM, &request, schema::JOIN_RESULT, "join room reply")
            .await?;
        if !reply.success {
            tracing::info!(room_id, reason = reply.message.as_deref().unwrap_or(""), "join refused");
            return Err(RoomError::InvalidRoom(room_id.to_string()));
        }

        tracing::info!(room_id, username, "room joined");
        self.enter(handle, room_id.to_string(), username, spawn).await
    }

    /// Publish `body` and wait for one reply on `reply_queue`.
    ///
    /// The reply queue is subscribed before publishing so the answer cannot
    /// race past us; the subscription is dropped on every exit path.
    async fn request<Req: Serialize, Reply: DeserializeOwned>(
        &self,
        handle: &ConnectionHandle,
        destination: &str,
        body: &Req,
        reply_queue: &str,
        operation: &'static str,
    ) -> Result<Reply, RoomError> {
        let mut replies = handle.subscribe(reply_queue)?;
        handle.publish(destination, schema::encode_body(destination, body)?)?;

        let delivery = tokio::time::timeout(self.config.reply_timeout, replies.recv())
            .await
            .map_err(|_| TimeoutError {
                operation,
                after: self.config.reply_timeout,
            })?
            .ok_or(ConnectionError::Closed)?;
        Ok(schema::decode_body(reply_queue, &delivery.body)?)
    }

    /// Subscribe to the room topic, settle, then register.
    async fn enter(
        &mut self,
        handle: ConnectionHandle,
        room_id: String,
        username: &str,
        spawn: DVec2,
    ) -> Result<(), RoomError> {
        let players = handle.subscribe(&schema::players_topic(&room_id))?;

        // Registration must not overtake the subscription.
        tokio::time::sleep(self.config.settle_delay).await;

        let now = self.clock.now_ms();
        let mut local = PlayerState::spawn(format!("{username}-{now}"), username.to_string(), spawn, now);
        local.room_id = Some(room_id.clone());
        handle.publish(schema::REGISTER, schema::encode_body(schema::REGISTER, &local)?)?;

        tracing::debug!(%room_id, id = %local.id, "registered");
        self.membership = Some(Membership {
            room_id,
            local,
            handle,
            players,
            lost: false,
        });
        Ok(())
    }

    /// Publish a throttled movement update for the local participant.
    pub fn publish_movement(&mut self, update: &MovementUpdate) -> Result<(), RoomError> {
        let membership = self.membership.as_mut().ok_or(RoomError::NotConnected)?;
        membership
            .local
            .apply(update.position, update.direction, update.is_moving, update.timestamp);

        let body = schema::encode_body(schema::MOVE, &membership.local)?;
        if let Err(err) = membership.handle.publish(schema::MOVE, body) {
            membership.lost = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Next broadcast snapshot without waiting.
    ///
    /// `None` when nothing is queued. A body that fails to decode comes back
    /// as an error and is otherwise discarded; the next call continues with
    /// the following message.
    pub fn try_next_snapshot(&mut self) -> Option<Result<PlayersSnapshot, ProtocolError>> {
        let membership = self.membership.as_mut()?;
        match membership.players.try_recv() {
            Ok(delivery) => Some(schema::decode_body(&delivery.destination, &delivery.body)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !membership.lost {
                    tracing::warn!(room_id = %membership.room_id, "room subscription lost");
                    membership.lost = true;
                }
                None
            }
        }
    }

    /// Wait for the next broadcast snapshot. `None` once the subscription is
    /// gone.
    pub async fn next_snapshot(&mut self) -> Option<Result<PlayersSnapshot, ProtocolError>> {
        let membership = self.membership.as_mut()?;
        match membership.players.recv().await {
            Some(delivery) => Some(schema::decode_body(&delivery.destination, &delivery.body)),
            None => {
                membership.lost = true;
                None
            }
        }
    }

    /// Whether the room subscription died with its link and must be
    /// re-established.
    pub fn is_subscription_lost(&self) -> bool {
        self.membership
            .as_ref()
            .is_some_and(|m| m.lost || !m.handle.is_live())
    }

    /// Unsubscribe and forget the room. Safe to call repeatedly.
    pub fn leave(&mut self) {
        if let Some(membership) = self.membership.take() {
            tracing::info!(room_id = %membership.room_id, "left room");
            // Dropping the subscription unsubscribes; dropping the handle
            // gives up send capability.
            drop(membership);
        }
    }

    /// Room currently entered, if any.
    pub fn current_room(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.room_id.as_str())
    }

    /// Local participant as last registered or moved.
    pub fn local_player(&self) -> Option<&PlayerState> {
        self.membership.as_ref().map(|m| &m.local)
    }

    /// Connection the session sends over.
    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }
}
