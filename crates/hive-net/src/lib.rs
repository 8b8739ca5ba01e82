//! Client transport: framed pub/sub envelopes over TCP, connection lifecycle
//! with bounded retries and heartbeats, and subscription routing.

pub mod connection;
pub mod envelope;
pub mod error;
pub mod framing;
#[cfg(any(test, feature = "loopback"))]
pub mod loopback;
pub mod retry;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStateWatch,
    Delivery, Subscription,
};
pub use envelope::{Envelope, PROTOCOL_VERSION, SubscriptionId};
pub use error::{ConnectionError, ProtocolError, TimeoutError};
pub use framing::{FrameConfig, FrameError, read_envelope, read_frame, write_envelope, write_frame};
pub use retry::{RetryPolicy, RetryState};
pub use tokio::sync::mpsc::error::TryRecvError;
pub use transport::{Connector, Identity, Link, TcpConnector};
