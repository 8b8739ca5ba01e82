//! In-memory [`Connector`] for tests.
//!
//! Every successful `connect` hands the server side of the new link to
//! whoever holds the accept receiver, so a test (or a simulated room server)
//! can play the broker without sockets. The connector can be taken offline
//! and slowed down to exercise the retry and timeout paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::ConnectionError;
use crate::transport::{Connector, Identity, Link, duration_ms};

/// Server side of one loopback session.
#[derive(Debug)]
pub struct ServerEnd {
    /// Login the client connected with.
    pub login: String,
    /// Envelopes the client sent.
    pub from_client: mpsc::UnboundedReceiver<Envelope>,
    /// Envelopes to deliver to the client. Dropping it closes the link.
    pub to_client: mpsc::UnboundedSender<Envelope>,
}

#[derive(Debug)]
struct LoopbackShared {
    online: AtomicBool,
    attempts: AtomicU32,
    connect_delay_ms: AtomicU64,
    heartbeat: Duration,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

/// Connector whose "network" is a pair of channels per session.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    shared: Arc<LoopbackShared>,
}

impl LoopbackConnector {
    /// New connector negotiating `heartbeat`, plus the receiver of accepted
    /// sessions.
    pub fn new(heartbeat: Duration) -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            shared: Arc::new(LoopbackShared {
                online: AtomicBool::new(true),
                attempts: AtomicU32::new(0),
                connect_delay_ms: AtomicU64::new(0),
                heartbeat,
                accepted,
            }),
        };
        (connector, accept_rx)
    }

    /// Make subsequent attempts succeed (`true`) or fail as unreachable.
    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::SeqCst);
    }

    /// Delay every attempt by `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.shared
            .connect_delay_ms
            .store(duration_ms(delay), Ordering::SeqCst);
    }

    /// Attempts made so far, successful or not.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for LoopbackConnector {
    async fn connect(&self, identity: &Identity) -> Result<Link, ConnectionError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.shared.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.shared.online.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable("loopback offline".to_string()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        self.shared
            .accepted
            .send(ServerEnd {
                login: identity.login.clone(),
                from_client,
                to_client,
            })
            .map_err(|_| ConnectionError::Unreachable("loopback listener gone".to_string()))?;

        Ok(Link {
            outbound: to_server,
            inbound: from_server,
            heartbeat: self.shared.heartbeat,
        })
    }
}
