//! Transport seam between the connection manager and the actual socket.
//!
//! A [`Connector`] opens one session and hands back a [`Link`]: a pair of
//! channels carrying decoded envelopes. The connection manager only ever talks
//! to the link, so tests can substitute an in-memory broker for
//! [`TcpConnector`].

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::ConnectionError;
use crate::framing::{FrameConfig, FrameError, read_envelope, write_envelope};

/// Who the connection is opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Login name sent in the `Connect` frame.
    pub login: String,
}

impl Identity {
    /// Identity for `login`.
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
        }
    }
}

/// An established session.
///
/// Dropping `outbound` lets the writer drain and close the socket; dropping
/// `inbound` stops the reader. Nothing else holds the socket.
#[derive(Debug)]
pub struct Link {
    /// Envelopes to send, in order.
    pub outbound: mpsc::UnboundedSender<Envelope>,
    /// Envelopes received, in arrival order. Closes when the peer goes away.
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
    /// Heartbeat interval agreed during the handshake.
    pub heartbeat: Duration,
}

/// Opens sessions against a room server.
pub trait Connector: Send + Sync + 'static {
    /// Open one session for `identity`, including the handshake.
    ///
    /// Called once per attempt; the connection manager owns retries and the
    /// attempt timeout.
    fn connect(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<Link, ConnectionError>> + Send;
}

/// Connector for the framed TCP protocol.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Server address.
    pub addr: SocketAddr,
    /// Frame size limits.
    pub frame: FrameConfig,
    /// Heartbeat interval requested from the server.
    pub heartbeat: Duration,
}

impl TcpConnector {
    /// Connector for `addr` with default framing and the given heartbeat.
    pub fn new(addr: SocketAddr, heartbeat: Duration) -> Self {
        Self {
            addr,
            frame: FrameConfig::default(),
            heartbeat,
        }
    }

    async fn handshake(
        &self,
        identity: &Identity,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
    ) -> Result<Duration, ConnectionError> {
        let hello = Envelope::Connect {
            login: identity.login.clone(),
            heartbeat_ms: duration_ms(self.heartbeat),
        };
        write_envelope(writer, &hello, &self.frame)
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        match read_envelope(reader, &self.frame).await {
            // The slower of the two sides wins, as in STOMP heart-beating.
            Ok(Envelope::Connected { heartbeat_ms }) => {
                Ok(self.heartbeat.max(Duration::from_millis(heartbeat_ms)))
            }
            Ok(Envelope::Error { message }) => Err(ConnectionError::Handshake(message)),
            Ok(other) => Err(ConnectionError::Handshake(format!(
                "expected CONNECTED, got {}",
                other.kind()
            ))),
            Err(e) => Err(ConnectionError::Handshake(e.to_string())),
        }
    }
}

impl Connector for TcpConnector {
    async fn connect(&self, identity: &Identity) -> Result<Link, ConnectionError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

        let (mut reader, mut writer) = stream.into_split();
        let heartbeat = self.handshake(identity, &mut reader, &mut writer).await?;
        tracing::debug!(addr = %self.addr, ?heartbeat, "session established");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, out_rx, self.frame.clone()));
        tokio::spawn(read_loop(reader, in_tx, self.frame.clone()));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
            heartbeat,
        })
    }
}

/// Forward queued envelopes to the socket until the sender side is dropped.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    frame: FrameConfig,
) {
    while let Some(env) = outbound.recv().await {
        if let Err(e) = write_envelope(&mut writer, &env, &frame).await {
            tracing::debug!(error = %e, "write failed, closing writer");
            break;
        }
    }
}

/// Decode frames into `inbound` until the peer closes or nobody listens.
async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Envelope>,
    frame: FrameConfig,
) {
    loop {
        tokio::select! {
            result = read_envelope(&mut reader, &frame) => match result {
                Ok(env) => {
                    if inbound.send(env).is_err() {
                        break;
                    }
                }
                Err(FrameError::Protocol(e)) => {
                    tracing::warn!(error = %e, "discarding undecodable frame");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "reader stopped");
                    break;
                }
            },
            _ = inbound.closed() => break,
        }
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
