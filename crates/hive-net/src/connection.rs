//! Connection lifecycle: connect with bounded retries, heartbeat supervision,
//! subscription routing, and teardown.
//!
//! [`ConnectionManager`] exclusively owns the transport. Consumers borrow send
//! capability through a [`ConnectionHandle`] tied to one link *epoch*; once
//! that link is gone (disconnect, or a reconnect after failure) the handle
//! and every [`Subscription`] opened through it stop working and must be
//! re-established by the caller. State transitions are broadcast via a
//! [`watch`] channel so any number of consumers can react without polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::envelope::{Envelope, SubscriptionId};
use crate::error::{ConnectionError, TimeoutError};
use crate::retry::{RetryPolicy, RetryState};
use crate::transport::{Connector, Identity, Link};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link and nothing in flight.
    Disconnected,
    /// First connection attempt (or its retries) in progress.
    Connecting,
    /// Link established and supervised.
    Connected,
    /// An established link failed; re-running the retry path.
    Reconnecting,
    /// Retries exhausted. Terminal until the next `connect`.
    Failed,
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Set the state, notifying subscribers only on an actual change.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

/// Timing knobs for [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Attempts and delays for both the initial connect and reconnects.
    pub retry: RetryPolicy,
    /// Wall-clock bound on a single attempt. Default: 5 s.
    pub connect_timeout: Duration,
    /// Silence tolerated on a link, in heartbeat intervals. Default: 2.5.
    pub heartbeat_tolerance: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            heartbeat_tolerance: 2.5,
        }
    }
}

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Destination the message was published on.
    pub destination: String,
    /// Raw JSON body.
    pub body: String,
}

type Outcome = Option<Result<(), ConnectionError>>;

struct ActiveLink {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Envelope>,
    routes: HashMap<SubscriptionId, mpsc::UnboundedSender<Delivery>>,
}

#[derive(Default)]
struct Inner {
    identity: Option<Identity>,
    /// Outcome of the attempt in flight, shared with concurrent callers.
    pending: Option<watch::Receiver<Outcome>>,
    active: Option<ActiveLink>,
    supervisor: Option<JoinHandle<()>>,
    epoch: u64,
    /// Bumped by every `disconnect`; attempts started under an older value
    /// discard their result.
    session: u64,
    next_subscription: u64,
}

struct Shared<C> {
    connector: C,
    config: ConnectionConfig,
    state: ConnectionStateWatch,
    inner: Mutex<Inner>,
    cancel: Notify,
}

/// Routing surface used by handles and subscriptions, kept object-safe so
/// they need not carry the connector type.
trait LinkTable: Send + Sync {
    fn send(&self, epoch: u64, env: Envelope) -> Result<(), ConnectionError>;
    fn open_route(
        &self,
        epoch: u64,
        destination: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Delivery>), ConnectionError>;
    fn close_route(&self, epoch: u64, id: SubscriptionId);
    fn is_live(&self, epoch: u64) -> bool;
}

/// Owns the single transport session of a client.
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Role {
    Lead(watch::Sender<Outcome>, u64),
    Follow(watch::Receiver<Outcome>),
}

impl<C: Connector> ConnectionManager<C> {
    /// Manager for `connector`; nothing is opened until [`connect`](Self::connect).
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                state: ConnectionStateWatch::new(),
                inner: Mutex::new(Inner::default()),
                cancel: Notify::new(),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    /// Subscribe to lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether a supervised link is up right now.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    /// Epoch of the live link, if any. Increments on every (re)connect.
    pub fn epoch(&self) -> Option<u64> {
        self.shared.lock().active.as_ref().map(|a| a.epoch)
    }

    /// Borrow send capability on the live link.
    pub fn handle(&self) -> Result<ConnectionHandle, ConnectionError> {
        let epoch = self.epoch().ok_or(ConnectionError::NotConnected)?;
        let table: Arc<dyn LinkTable> = self.shared.clone();
        Ok(ConnectionHandle { table, epoch })
    }

    /// Open the session for `identity`, retrying per the configured policy.
    ///
    /// Returns immediately if already connected. While an attempt is in
    /// flight, further callers await that attempt instead of starting
    /// another one.
    pub async fn connect(&self, identity: Identity) -> Result<(), ConnectionError> {
        let role = {
            let mut inner = self.shared.lock();
            if inner.active.is_some() {
                return Ok(());
            }
            match &inner.pending {
                Some(rx) => Role::Follow(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inner.pending = Some(rx);
                    inner.identity = Some(identity.clone());
                    Role::Lead(tx, inner.session)
                }
            }
        };

        match role {
            Role::Follow(mut rx) => {
                tracing::debug!("connect already in flight, awaiting its outcome");
                match rx.wait_for(Option::is_some).await {
                    Ok(outcome) => (*outcome).clone().unwrap_or(Err(ConnectionError::Closed)),
                    Err(_) => Err(ConnectionError::Cancelled),
                }
            }
            Role::Lead(tx, session) => {
                self.shared.state.set(ConnectionState::Connecting);
                let mut guard = AbandonGuard {
                    shared: &self.shared,
                    session,
                    armed: true,
                };
                let result = tokio::select! {
                    result = self.shared.establish(&identity) => result,
                    _ = self.shared.cancel.notified() => Err(ConnectionError::Cancelled),
                };
                guard.armed = false;
                self.shared.complete(session, result, &tx)
            }
        }
    }

    /// Tear the session down.
    ///
    /// Safe to call at any time, including when already disconnected. Stops
    /// the supervisor, cancels an attempt in flight, closes every
    /// subscription and releases the link before returning.
    pub fn disconnect(&self) {
        let (active, supervisor) = {
            let mut inner = self.shared.lock();
            inner.session += 1;
            inner.identity = None;
            inner.pending = None;
            (inner.active.take(), inner.supervisor.take())
        };

        self.shared.cancel.notify_waiters();
        if let Some(task) = supervisor {
            task.abort();
        }
        if let Some(active) = active {
            let _ = active.outbound.send(Envelope::Disconnect);
            tracing::info!(
                epoch = active.epoch,
                subscriptions = active.routes.len(),
                "disconnected"
            );
        }
        self.shared.state.set(ConnectionState::Disconnected);
    }
}

/// Resets the in-flight marker if a leading `connect` future is dropped
/// before it completes.
struct AbandonGuard<'a, C: Connector> {
    shared: &'a Arc<Shared<C>>,
    session: u64,
    armed: bool,
}

impl<C: Connector> Drop for AbandonGuard<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let reset = {
            let mut inner = self.shared.lock();
            if inner.session == self.session && inner.active.is_none() {
                inner.pending = None;
                inner.identity = None;
                true
            } else {
                false
            }
        };
        if reset {
            self.shared.state.set(ConnectionState::Disconnected);
        }
    }
}

impl<C: Connector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run attempts until one succeeds or the policy is exhausted.
    async fn establish(&self, identity: &Identity) -> Result<Link, ConnectionError> {
        let mut retry = RetryState::new(self.config.retry.clone());
        loop {
            let attempt = retry.attempts() + 1;
            tracing::debug!(attempt, login = %identity.login, "connecting");

            let result = match tokio::time::timeout(
                self.config.connect_timeout,
                self.connector.connect(identity),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TimeoutError {
                    operation: "connect",
                    after: self.config.connect_timeout,
                }
                .into()),
            };

            let err = match result {
                Ok(link) => {
                    tracing::info!(attempt, login = %identity.login, "connected");
                    return Ok(link);
                }
                Err(err) => err,
            };

            match retry.next_delay() {
                Some(delay) if err.is_transient() => {
                    tracing::warn!(attempt, error = %err, ?delay, "connection attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    return Err(ConnectionError::RetriesExhausted {
                        attempts: retry.attempts(),
                        last: Box::new(err),
                    });
                }
            }
        }
    }

    /// Publish the outcome of an attempt started under `session`.
    fn complete(
        self: &Arc<Self>,
        session: u64,
        result: Result<Link, ConnectionError>,
        tx: &watch::Sender<Outcome>,
    ) -> Result<(), ConnectionError> {
        let outcome = {
            let mut inner = self.lock();
            if inner.session != session {
                // Disconnected meanwhile; a late link is dropped right here.
                Err(ConnectionError::Cancelled)
            } else {
                inner.pending = None;
                match result {
                    Ok(link) => {
                        self.install(&mut inner, link);
                        Ok(())
                    }
                    Err(err) => {
                        inner.identity = None;
                        Err(err)
                    }
                }
            }
        };

        match &outcome {
            Ok(()) => self.state.set(ConnectionState::Connected),
            Err(ConnectionError::Cancelled) => {}
            Err(err) => {
                tracing::error!(error = %err, "connection failed");
                self.state.set(ConnectionState::Failed);
            }
        }
        let _ = tx.send(Some(outcome.clone()));
        outcome
    }

    fn install(self: &Arc<Self>, inner: &mut Inner, link: Link) {
        inner.epoch += 1;
        let epoch = inner.epoch;
        let Link {
            outbound,
            inbound,
            heartbeat,
        } = link;

        let supervisor = tokio::spawn(supervise(
            Arc::downgrade(self),
            epoch,
            inbound,
            heartbeat,
            self.config.heartbeat_tolerance,
        ));
        inner.active = Some(ActiveLink {
            epoch,
            outbound,
            routes: HashMap::new(),
        });
        // The previous handle, if any, belongs to a finished or recovering
        // task; dropping it just detaches.
        inner.supervisor = Some(supervisor);
    }

    /// Route one inbound envelope.
    fn dispatch(&self, epoch: u64, env: Envelope) {
        match env {
            Envelope::Message {
                subscription,
                destination,
                body,
            } => {
                let mut inner = self.lock();
                let Some(active) = inner.active.as_mut().filter(|a| a.epoch == epoch) else {
                    return;
                };
                let delivered = match active.routes.get(&subscription) {
                    Some(route) => route.send(Delivery { destination, body }).is_ok(),
                    None => {
                        tracing::debug!(?subscription, %destination, "dropping message for unknown subscription");
                        return;
                    }
                };
                if !delivered {
                    active.routes.remove(&subscription);
                }
            }
            Envelope::Heartbeat => tracing::trace!(epoch, "heartbeat received"),
            Envelope::Error { message } => {
                tracing::warn!(%message, "server reported an error");
            }
            other => tracing::debug!(kind = other.kind(), "ignoring unexpected frame"),
        }
    }

    /// Replace a failed link by re-running the retry path.
    async fn recover(self: &Arc<Self>, epoch: u64, failure: ConnectionError) {
        let retry = {
            let mut inner = self.lock();
            if inner.active.as_ref().map(|a| a.epoch) != Some(epoch) {
                return;
            }
            // Dropping the link closes the writer and every subscription.
            inner.active = None;
            match inner.identity.clone() {
                Some(identity) => {
                    let (tx, rx) = watch::channel(None);
                    inner.pending = Some(rx);
                    Some((identity, inner.session, tx))
                }
                None => None,
            }
        };

        let Some((identity, session, tx)) = retry else {
            self.state.set(ConnectionState::Disconnected);
            return;
        };

        tracing::warn!(epoch, error = %failure, "link lost, reconnecting");
        self.state.set(ConnectionState::Reconnecting);
        let result = tokio::select! {
            result = self.establish(&identity) => result,
            _ = self.cancel.notified() => Err(ConnectionError::Cancelled),
        };
        let _ = self.complete(session, result, &tx);
    }
}

impl<C: Connector> LinkTable for Shared<C> {
    fn send(&self, epoch: u64, env: Envelope) -> Result<(), ConnectionError> {
        let inner = self.lock();
        match inner.active.as_ref() {
            Some(active) if active.epoch == epoch => active
                .outbound
                .send(env)
                .map_err(|_| ConnectionError::Closed),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    fn open_route(
        &self,
        epoch: u64,
        destination: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Delivery>), ConnectionError> {
        let mut inner = self.lock();
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        let Some(active) = inner.active.as_mut().filter(|a| a.epoch == epoch) else {
            return Err(ConnectionError::NotConnected);
        };

        active
            .outbound
            .send(Envelope::Subscribe {
                id,
                destination: destination.to_string(),
            })
            .map_err(|_| ConnectionError::Closed)?;
        let (tx, rx) = mpsc::unbounded_channel();
        active.routes.insert(id, tx);
        tracing::debug!(?id, destination, "subscribed");
        Ok((id, rx))
    }

    fn close_route(&self, epoch: u64, id: SubscriptionId) {
        let mut inner = self.lock();
        if let Some(active) = inner.active.as_mut().filter(|a| a.epoch == epoch)
            && active.routes.remove(&id).is_some()
        {
            let _ = active.outbound.send(Envelope::Unsubscribe { id });
            tracing::debug!(?id, "unsubscribed");
        }
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.lock().active.as_ref().is_some_and(|a| a.epoch == epoch)
    }
}

/// Watch one link: route inbound frames, send heartbeats, and detect death.
async fn supervise<C: Connector>(
    shared: Weak<Shared<C>>,
    epoch: u64,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    heartbeat: Duration,
    tolerance: f64,
) {
    let window = heartbeat.mul_f64(tolerance);
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    let mut last_seen = Instant::now();

    let failure = loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(env) = frame else {
                    break ConnectionError::Closed;
                };
                last_seen = Instant::now();
                let Some(shared) = shared.upgrade() else { return };
                shared.dispatch(epoch, env);
            }
            _ = ticker.tick() => {
                if last_seen.elapsed() > window {
                    break ConnectionError::HeartbeatTimeout(window);
                }
                let Some(shared) = shared.upgrade() else { return };
                if shared.send(epoch, Envelope::Heartbeat).is_err() {
                    return;
                }
            }
        }
    };

    drop(inbound);
    if let Some(shared) = shared.upgrade() {
        shared.recover(epoch, failure).await;
    }
}

/// Send capability on one link epoch.
///
/// Cheap to clone. Stops working (returns [`ConnectionError::NotConnected`])
/// as soon as its link is torn down or replaced.
#[derive(Clone)]
pub struct ConnectionHandle {
    table: Arc<dyn LinkTable>,
    epoch: u64,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Link epoch this handle is bound to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the bound link is still the live one.
    pub fn is_live(&self) -> bool {
        self.table.is_live(self.epoch)
    }

    /// Publish `body` to `destination`.
    pub fn publish(&self, destination: &str, body: String) -> Result<(), ConnectionError> {
        self.table.send(
            self.epoch,
            Envelope::Send {
                destination: destination.to_string(),
                body,
            },
        )
    }

    /// Start receiving messages published to `destination`.
    pub fn subscribe(&self, destination: &str) -> Result<Subscription, ConnectionError> {
        let (id, receiver) = self.table.open_route(self.epoch, destination)?;
        Ok(Subscription {
            id,
            destination: destination.to_string(),
            epoch: self.epoch,
            receiver,
            table: Arc::downgrade(&self.table),
        })
    }
}

/// An active subscription. Dropping it unsubscribes.
///
/// The receiver closes when the link it was opened on goes away.
pub struct Subscription {
    id: SubscriptionId,
    destination: String,
    epoch: u64,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    table: Weak<dyn LinkTable>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Wire identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed destination.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Wait for the next delivery; `None` once the link is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Take the next delivery without waiting.
    pub fn try_recv(&mut self) -> Result<Delivery, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.close_route(self.epoch, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackConnector, ServerEnd};

    const HEARTBEAT: Duration = Duration::from_secs(4);

    fn manager() -> (
        ConnectionManager<LoopbackConnector>,
        LoopbackConnector,
        mpsc::UnboundedReceiver<ServerEnd>,
    ) {
        let (connector, accepted) = LoopbackConnector::new(HEARTBEAT);
        let manager = ConnectionManager::new(connector.clone(), ConnectionConfig::default());
        (manager, connector, accepted)
    }

    fn alice() -> Identity {
        Identity::new("alice")
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let (manager, _connector, mut accepted) = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect(alice()).await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.epoch(), Some(1));
        assert_eq!(accepted.recv().await.unwrap().login, "alice");
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let (manager, connector, _accepted) = manager();
        manager.connect(alice()).await.unwrap();
        manager.connect(alice()).await.unwrap();
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_share_one_attempt() {
        let (manager, connector, _accepted) = manager();
        connector.set_connect_delay(Duration::from_millis(200));

        let (a, b) = tokio::join!(manager.connect(alice()), manager.connect(alice()));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_server_fails_after_retries() {
        let (manager, connector, _accepted) = manager();
        connector.set_online(false);

        let started = Instant::now();
        let err = manager.connect(alice()).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(connector.attempts(), 3);
        // Two waits of two seconds between three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempts_time_out() {
        let (manager, connector, _accepted) = manager();
        connector.set_connect_delay(Duration::from_secs(30));

        let err = manager.connect(alice()).await.unwrap_err();
        match err {
            ConnectionError::RetriesExhausted { last, .. } => {
                assert!(matches!(*last, ConnectionError::Timeout(_)));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let (manager, _connector, _accepted) = manager();
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_releases_link_and_subscriptions() {
        let (manager, _connector, mut accepted) = manager();
        manager.connect(alice()).await.unwrap();
        let mut server = accepted.recv().await.unwrap();

        let handle = manager.handle().unwrap();
        let mut sub = handle.subscribe("/topic/rooms/R1/players").unwrap();
        manager.disconnect();

        assert!(!manager.is_connected());
        assert_eq!(sub.recv().await, None);
        assert_eq!(
            handle.publish("/app/move", "{}".to_string()),
            Err(ConnectionError::NotConnected)
        );

        assert!(matches!(
            server.from_client.recv().await,
            Some(Envelope::Subscribe { .. })
        ));
        assert_eq!(server.from_client.recv().await, Some(Envelope::Disconnect));
        assert_eq!(server.from_client.recv().await, None);
    }

    #[tokio::test]
    async fn test_messages_route_to_their_subscription() {
        let (manager, _connector, mut accepted) = manager();
        manager.connect(alice()).await.unwrap();
        let server = accepted.recv().await.unwrap();

        let handle = manager.handle().unwrap();
        let mut players = handle.subscribe("/topic/rooms/R1/players").unwrap();
        let mut replies = handle.subscribe("/queue/roomCreated").unwrap();

        for (sub, body) in [(players.id(), "p"), (SubscriptionId(99), "lost"), (replies.id(), "r")] {
            server
                .to_client
                .send(Envelope::Message {
                    subscription: sub,
                    destination: "d".to_string(),
                    body: body.to_string(),
                })
                .unwrap();
        }

        assert_eq!(players.recv().await.unwrap().body, "p");
        assert_eq!(replies.recv().await.unwrap().body, "r");
        assert!(matches!(players.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let (manager, _connector, mut accepted) = manager();
        manager.connect(alice()).await.unwrap();
        let mut server = accepted.recv().await.unwrap();

        let sub = manager.handle().unwrap().subscribe("/queue/joinResult").unwrap();
        let id = sub.id();
        drop(sub);

        assert!(matches!(
            server.from_client.recv().await,
            Some(Envelope::Subscribe { .. })
        ));
        assert_eq!(
            server.from_client.recv().await,
            Some(Envelope::Unsubscribe { id })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_silence_triggers_reconnect() {
        let (manager, connector, mut accepted) = manager();
        manager.connect(alice()).await.unwrap();
        let _silent = accepted.recv().await.unwrap();
        let mut sub = manager.handle().unwrap().subscribe("/topic/x").unwrap();

        // The silent server never answers; the supervisor gives up and redials.
        let fresh = accepted.recv().await.unwrap();
        assert_eq!(fresh.login, "alice");
        assert_eq!(connector.attempts(), 2);
        assert_eq!(sub.recv().await, None, "old subscriptions are invalidated");

        tokio::task::yield_now().await;
        assert_eq!(manager.epoch(), Some(2));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_link_alive() {
        let (manager, _connector, mut accepted) = manager();
        manager.connect(alice()).await.unwrap();
        let mut server = accepted.recv().await.unwrap();

        // Echo every heartbeat back for a while.
        let echo = tokio::spawn(async move {
            let mut seen = 0;
            while let Some(env) = server.from_client.recv().await {
                if env == Envelope::Heartbeat {
                    seen += 1;
                    let _ = server.to_client.send(Envelope::Heartbeat);
                }
                if seen == 5 {
                    break;
                }
            }
            (seen, server)
        });

        let (seen, _server) = echo.await.unwrap();
        assert_eq!(seen, 5);
        assert_eq!(manager.epoch(), Some(1));
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_link_with_server_gone_ends_failed() {
        let (manager, connector, mut accepted) = manager();
        manager.connect(alice()).await.unwrap();
        let server = accepted.recv().await.unwrap();
        let mut states = manager.watch_state();

        connector.set_online(false);
        drop(server);

        states
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .unwrap();
        assert!(!manager.is_connected());
        assert_eq!(connector.attempts(), 1 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_attempt_in_flight() {
        let (manager, connector, _accepted) = manager();
        connector.set_connect_delay(Duration::from_secs(3));

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(alice()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.disconnect();
        assert_eq!(pending.await.unwrap(), Err(ConnectionError::Cancelled));
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
