//! Per-session client tying connection, room, throttling and interpolation
//! together.
//!
//! Everything runs on the caller's task: `pump` and `render_tick` are cheap,
//! synchronous and meant to be driven from the caller's frame loop or from
//! `tokio::time::interval`s. The only suspension points are connecting, the
//! create/join round-trips and the settle delay inside them.

use std::sync::Arc;
use std::time::Duration;

use glam::DVec2;
use hive_config::Config;
use hive_net::{
    ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState, Connector, Identity,
    RetryPolicy,
};
use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::error::{RoomError, SyncError};
use crate::interpolation::{InboundStateInterpolator, InterpolatorConfig, PlayerRegistrySnapshot};
use crate::player::{MovementIntent, PlayerState};
use crate::session::{RoomSession, SessionConfig};
use crate::throttle::{MovementUpdate, OutboundMovementThrottler, ThrottleConfig};

/// Tuning for every component of a [`SyncClient`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub session: SessionConfig,
    pub throttle: ThrottleConfig,
    pub interpolation: InterpolatorConfig,
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        let net = &config.network;
        Self {
            connection: ConnectionConfig {
                retry: RetryPolicy {
                    max_attempts: net.retry_attempts,
                    delay: Duration::from_millis(net.retry_delay_ms),
                    backoff_multiplier: net.retry_backoff_multiplier,
                    jitter: net.retry_jitter,
                    ..RetryPolicy::default()
                },
                connect_timeout: Duration::from_millis(net.connect_timeout_ms),
                heartbeat_tolerance: net.heartbeat_tolerance,
            },
            session: SessionConfig::from(&config.sync),
            throttle: ThrottleConfig::from(&config.sync),
            interpolation: InterpolatorConfig::from(&config.sync),
        }
    }
}

/// What one [`SyncClient::pump`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Movement messages published.
    pub published: usize,
    /// Snapshots taken off the room topic.
    pub received: usize,
    /// Undecodable broadcasts dropped.
    pub discarded: usize,
    /// Snapshots applied to the registry.
    pub applied: usize,
}

#[derive(Debug, Clone)]
struct Rejoin {
    username: String,
    room_id: String,
}

/// One participant's synchronization session.
pub struct SyncClient<C: Connector> {
    connection: ConnectionManager<C>,
    session: RoomSession<C>,
    throttler: OutboundMovementThrottler,
    interpolator: InboundStateInterpolator,
    clock: Arc<dyn Clock>,
    players: watch::Sender<PlayerRegistrySnapshot>,
    rejoin: Option<Rejoin>,
}

impl<C: Connector> SyncClient<C> {
    /// Client on the system clock.
    pub fn new(connector: C, config: ClientConfig) -> Self {
        Self::with_clock(connector, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(connector: C, config: ClientConfig, clock: Arc<dyn Clock>) -> Self {
        let connection = ConnectionManager::new(connector, config.connection);
        let session = RoomSession::new(connection.clone(), config.session, Arc::clone(&clock));
        let (players, _) = watch::channel(PlayerRegistrySnapshot::default());
        Self {
            connection,
            session,
            throttler: OutboundMovementThrottler::new(config.throttle),
            interpolator: InboundStateInterpolator::new(config.interpolation),
            clock,
            players,
            rejoin: None,
        }
    }

    /// Connect as `username` if needed, then create a room and enter it.
    pub async fn create_room(&mut self, username: &str, spawn: DVec2) -> Result<String, SyncError> {
        self.connection.connect(Identity::new(username)).await?;
        self.reset_room_state();
        let room_id = self.session.create_room(username, spawn).await?;
        self.entered(username, &room_id);
        Ok(room_id)
    }

    /// Connect as `username` if needed, then join `room_id`.
    pub async fn join_room(&mut self, username: &str, room_id: &str, spawn: DVec2) -> Result<(), SyncError> {
        self.connection.connect(Identity::new(username)).await?;
        self.reset_room_state();
        self.session.join_room(username, room_id, spawn).await?;
        self.entered(username, room_id);
        Ok(())
    }

    fn entered(&mut self, username: &str, room_id: &str) {
        let local_id = self.session.local_player().map(|p| p.id.clone());
        self.interpolator.set_local_id(local_id);
        self.rejoin = Some(Rejoin {
            username: username.to_string(),
            room_id: room_id.to_string(),
        });
    }

    fn reset_room_state(&mut self) {
        self.throttler.reset();
        self.interpolator.clear();
        self.players.send_replace(PlayerRegistrySnapshot::default());
    }

    /// Feed one local movement sample. Returns whether a message went out.
    ///
    /// While the link is down or the room subscription has not been
    /// re-established, samples are dropped and `Ok(false)` comes back. An
    /// error is returned only once the connection has given up.
    pub fn submit_movement(&mut self, intent: MovementIntent) -> Result<bool, SyncError> {
        if self.session.current_room().is_none() {
            return Err(RoomError::NotConnected.into());
        }
        if self.session.is_subscription_lost() {
            return self.link_lost();
        }
        let now = self.clock.now_ms();
        match self.throttler.submit(intent, now) {
            Some(update) => self.publish(&update),
            None => Ok(false),
        }
    }

    /// Flush a due throttle window and take in every queued broadcast.
    ///
    /// Malformed broadcasts are logged and skipped. Never blocks.
    pub fn pump(&mut self) -> Result<PumpReport, SyncError> {
        let now = self.clock.now_ms();
        let mut report = PumpReport::default();

        if let Some(update) = self.throttler.poll(now)
            && self.publish(&update)?
        {
            report.published += 1;
        }

        while let Some(result) = self.session.try_next_snapshot() {
            match result {
                Ok(snapshot) => {
                    report.received += 1;
                    self.interpolator.receive(snapshot, now);
                }
                Err(err) => {
                    report.discarded += 1;
                    tracing::warn!(error = %err, "discarding malformed broadcast");
                }
            }
        }

        if self.interpolator.poll(now).is_some() {
            report.applied += 1;
        }
        Ok(report)
    }

    fn publish(&mut self, update: &MovementUpdate) -> Result<bool, SyncError> {
        match self.session.publish_movement(update) {
            Ok(()) => Ok(true),
            Err(RoomError::Connection(err)) => {
                tracing::debug!(error = %err, "movement dropped, link is down");
                self.link_lost()
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Outcome of a send attempted without a usable link: silent while the
    /// connection manager is still working on it, an error once it is not.
    fn link_lost(&mut self) -> Result<bool, SyncError> {
        self.throttler.reset();
        match self.connection.state() {
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting => {
                Ok(false)
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                Err(ConnectionError::NotConnected.into())
            }
        }
    }

    /// Sample every remote entity for this frame and publish the result.
    pub fn render_tick(&mut self) -> PlayerRegistrySnapshot {
        let frame = self.interpolator.tick(self.clock.now_ms());
        self.players.send_replace(frame.clone());
        frame
    }

    /// Per-frame view of the remote entities.
    pub fn players(&self) -> watch::Receiver<PlayerRegistrySnapshot> {
        self.players.subscribe()
    }

    /// Whether the room subscription was lost to a reconnect.
    pub fn needs_rejoin(&self) -> bool {
        self.session.is_subscription_lost()
    }

    /// Re-enter the last room after the connection was re-established.
    ///
    /// Waits for an in-flight reconnect, then joins again at the local
    /// participant's last known position under a fresh id.
    pub async fn rejoin(&mut self) -> Result<(), SyncError> {
        let target = self.rejoin.clone().ok_or(RoomError::NotConnected)?;
        let spawn = self
            .session
            .local_player()
            .map(PlayerState::position)
            .unwrap_or(DVec2::ZERO);

        tracing::info!(room_id = %target.room_id, "rejoining room");
        self.session.leave();
        self.join_room(&target.username, &target.room_id, spawn).await
    }

    /// Leave the room but keep the connection for the next create or join.
    ///
    /// Releases the room subscription and send capability and clears the
    /// registry. Safe to call repeatedly.
    pub fn leave(&mut self) {
        self.throttler.reset();
        self.session.leave();
        self.interpolator.clear();
        self.interpolator.set_local_id(None);
        self.players.send_replace(PlayerRegistrySnapshot::default());
        self.rejoin = None;
    }

    /// Leave the room and close the connection.
    ///
    /// Stops throttling first, then releases the room subscription, clears
    /// the registry and finally drops the transport. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.throttler.reset();
        self.session.leave();
        self.interpolator.clear();
        self.interpolator.set_local_id(None);
        self.players.send_replace(PlayerRegistrySnapshot::default());
        self.connection.disconnect();
        self.rejoin = None;
    }

    /// Earliest time `pump` has work queued for, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.throttler.next_deadline(), self.interpolator.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn current_room(&self) -> Option<&str> {
        self.session.current_room()
    }

    pub fn local_player(&self) -> Option<&PlayerState> {
        self.session.local_player()
    }

    /// Number of remote entities currently tracked.
    pub fn remote_count(&self) -> usize {
        self.interpolator.registry().len()
    }
}
