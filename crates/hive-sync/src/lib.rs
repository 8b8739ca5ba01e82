//! Real-time state synchronization for a multiplayer 2D room.
//!
//! Local movement goes out through an [`OutboundMovementThrottler`] and a
//! [`RoomSession`]; room snapshots come back through the same session into an
//! [`InboundStateInterpolator`], which keeps the [`PlayerRegistry`] of remote
//! entities and renders them smoothly. [`SyncClient`] owns one of each.

pub mod client;
pub mod clock;
pub mod error;
pub mod interpolation;
pub mod player;
pub mod registry;
pub mod schema;
pub mod session;
pub mod throttle;

pub use client::{ClientConfig, PumpReport, SyncClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RoomError, SyncError};
pub use interpolation::{
    InboundStateInterpolator, Interpolation, InterpolatorConfig, PlayerRegistrySnapshot,
    RenderedPlayer, SnapshotDiff,
};
pub use player::{Direction, MovementIntent, PlayerState, animation_tag};
pub use registry::{PlayerRegistry, RegistryEntry, Upsert};
pub use schema::PlayersSnapshot;
pub use session::{RoomSession, SessionConfig};
pub use throttle::{MovementUpdate, OutboundMovementThrottler, ThrottleConfig};
