//! Scripted movement: walk the edges of a square, pausing at each corner.

use glam::DVec2;
use hive_sync::{Direction, MovementIntent};

/// Walks a square clockwise starting at its top-left corner.
#[derive(Debug, Clone)]
pub struct SquareWalk {
    origin: DVec2,
    side: f64,
    speed: f64,
    pause_ms: u64,
    leg: usize,
    travelled: f64,
    paused_ms: u64,
}

const LEGS: [(Direction, DVec2); 4] = [
    (Direction::Right, DVec2::new(1.0, 0.0)),
    (Direction::Down, DVec2::new(0.0, 1.0)),
    (Direction::Left, DVec2::new(-1.0, 0.0)),
    (Direction::Up, DVec2::new(0.0, -1.0)),
];

impl SquareWalk {
    /// `speed` in world units per second.
    pub fn new(origin: DVec2, side: f64, speed: f64, pause_ms: u64) -> Self {
        Self {
            origin,
            side,
            speed,
            pause_ms,
            leg: 0,
            travelled: 0.0,
            paused_ms: 0,
        }
    }

    fn corner(&self, leg: usize) -> DVec2 {
        LEGS[..leg % 4]
            .iter()
            .fold(self.origin, |at, (_, step)| at + *step * self.side)
    }

    /// Advance by `dt_ms` and return this tick's sample.
    pub fn step(&mut self, dt_ms: u64) -> MovementIntent {
        let (direction, unit) = LEGS[self.leg];

        if self.travelled >= self.side {
            // Standing at the corner.
            self.paused_ms += dt_ms;
            let at = self.corner(self.leg + 1);
            if self.paused_ms >= self.pause_ms {
                self.leg = (self.leg + 1) % 4;
                self.travelled = 0.0;
                self.paused_ms = 0;
            }
            return MovementIntent::stopped(at.x, at.y, direction);
        }

        self.travelled = (self.travelled + self.speed * dt_ms as f64 / 1000.0).min(self.side);
        let at = self.corner(self.leg) + unit * self.travelled;
        MovementIntent {
            position: at,
            direction,
            is_moving: true,
        }
    }
}
