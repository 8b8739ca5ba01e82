//! Participant state as it travels on the wire and lives in memory.

use std::fmt;

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Facing of a participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Facing up.
    Up,
    /// Facing down (the spawn facing).
    #[default]
    Down,
    /// Facing left.
    Left,
    /// Facing right.
    Right,
}

impl Direction {
    /// Wire and animation name.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Animation tag for a facing and motion flag: `run-<dir>` or `idle-<dir>`.
pub fn animation_tag(direction: Direction, moving: bool) -> String {
    let verb = if moving { "run" } else { "idle" };
    format!("{verb}-{direction}")
}

/// One participant, as published on `/app/register` and `/app/move` and
/// carried in room snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unique within the room.
    pub id: String,
    /// Display name.
    pub username: String,
    /// World X coordinate.
    pub x: f64,
    /// World Y coordinate.
    pub y: f64,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub is_moving: bool,
    /// Derived from `direction` and `is_moving` by the sender.
    #[serde(default)]
    pub animation: String,
    /// Sender clock, milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
    /// Room the participant belongs to; only required on registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl PlayerState {
    /// Idle participant facing down at `position`.
    pub fn spawn(id: String, username: String, position: DVec2, now_ms: u64) -> Self {
        Self {
            id,
            username,
            x: position.x,
            y: position.y,
            direction: Direction::Down,
            is_moving: false,
            animation: animation_tag(Direction::Down, false),
            timestamp: now_ms,
            room_id: None,
        }
    }

    /// Coordinates as a vector.
    pub fn position(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    /// Overwrite position, facing and motion, re-deriving the animation tag.
    pub fn apply(&mut self, position: DVec2, direction: Direction, is_moving: bool, now_ms: u64) {
        self.x = position.x;
        self.y = position.y;
        self.direction = direction;
        self.is_moving = is_moving;
        self.animation = animation_tag(direction, is_moving);
        self.timestamp = now_ms;
    }
}

/// Local movement sampled once per simulation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementIntent {
    pub position: DVec2,
    pub direction: Direction,
    pub is_moving: bool,
}

impl MovementIntent {
    /// Moving sample at `(x, y)`.
    pub fn moving(x: f64, y: f64, direction: Direction) -> Self {
        Self {
            position: DVec2::new(x, y),
            direction,
            is_moving: true,
        }
    }

    /// Stationary sample at `(x, y)`.
    pub fn stopped(x: f64, y: f64, direction: Direction) -> Self {
        Self {
            position: DVec2::new(x, y),
            direction,
            is_moving: false,
        }
    }
}
