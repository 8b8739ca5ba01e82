//! Outbound movement throttling.
//!
//! Local movement is sampled every simulation tick but transmitted at a fixed
//! cadence. Samples inside one transmit window are coalesced: the position is
//! the mean of the window, facing and motion flag come from the last sample.
//! A stop is sent at once, bypassing both the window and the epsilon filter,
//! so remote views never slide after the real player has stopped.

use glam::DVec2;
use hive_config::SyncConfig;

use crate::player::{Direction, MovementIntent};

/// Throttler tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    /// Length of one transmit window in milliseconds.
    pub cadence_ms: u64,
    /// Per-axis change below which a flush is suppressed.
    pub position_epsilon: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cadence_ms: 100,
            position_epsilon: 0.1,
        }
    }
}

impl From<&SyncConfig> for ThrottleConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            cadence_ms: config.transmit_cadence_ms,
            position_epsilon: config.position_epsilon,
        }
    }
}

/// One message worth of movement, ready to publish on `/app/move`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementUpdate {
    pub position: DVec2,
    pub direction: Direction,
    pub is_moving: bool,
    /// Sender timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Samples folded into this update.
    pub samples: u32,
}

/// Running mean over the current window.
#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at_ms: u64,
    sum: DVec2,
    count: u32,
    direction: Direction,
    is_moving: bool,
}

impl Window {
    fn open(intent: &MovementIntent, now_ms: u64) -> Self {
        Self {
            opened_at_ms: now_ms,
            sum: intent.position,
            count: 1,
            direction: intent.direction,
            is_moving: intent.is_moving,
        }
    }

    fn push(&mut self, intent: &MovementIntent) {
        self.sum += intent.position;
        self.count += 1;
        self.direction = intent.direction;
        self.is_moving = intent.is_moving;
    }

    fn mean(&self) -> DVec2 {
        self.sum / f64::from(self.count.max(1))
    }
}

#[derive(Debug, Clone, Copy)]
struct Sent {
    position: DVec2,
    direction: Direction,
    is_moving: bool,
}

/// Decides when and what to transmit about the local participant.
///
/// Purely synchronous: callers pass the current time and publish whatever
/// comes back. [`poll`](Self::poll) must be called regularly so a window
/// closes even when input stops arriving.
#[derive(Debug)]
pub struct OutboundMovementThrottler {
    config: ThrottleConfig,
    window: Option<Window>,
    last_sent: Option<Sent>,
    moving: bool,
}

impl OutboundMovementThrottler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            window: None,
            last_sent: None,
            moving: false,
        }
    }

    /// Feed one local sample.
    pub fn submit(&mut self, intent: MovementIntent, now_ms: u64) -> Option<MovementUpdate> {
        if !intent.is_moving {
            let was_moving = std::mem::replace(&mut self.moving, false);
            // Samples still in the window describe motion that already ended.
            self.window = None;
            if was_moving || self.last_sent.is_some_and(|s| s.is_moving) {
                tracing::trace!(x = intent.position.x, y = intent.position.y, "stop transmitted immediately");
                return Some(self.emit(intent.position, intent.direction, false, 1, now_ms));
            }
            return self.filtered(intent.position, intent.direction, false, 1, now_ms);
        }

        self.moving = true;
        match self.window.as_mut() {
            Some(window) => window.push(&intent),
            None => self.window = Some(Window::open(&intent, now_ms)),
        }
        self.poll(now_ms)
    }

    /// Close the window if its cadence has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Option<MovementUpdate> {
        let window = self.window?;
        if now_ms.saturating_sub(window.opened_at_ms) < self.config.cadence_ms {
            return None;
        }
        self.window = None;
        self.filtered(window.mean(), window.direction, window.is_moving, window.count, now_ms)
    }

    /// When the open window will be due, if one is open.
    pub fn next_deadline(&self) -> Option<u64> {
        self.window
            .map(|w| w.opened_at_ms.saturating_add(self.config.cadence_ms))
    }

    /// Samples waiting in the open window.
    pub fn pending_samples(&self) -> u32 {
        self.window.map_or(0, |w| w.count)
    }

    /// Drop pending samples and forget what was sent.
    pub fn reset(&mut self) {
        self.window = None;
        self.last_sent = None;
        self.moving = false;
    }

    fn filtered(
        &mut self,
        position: DVec2,
        direction: Direction,
        is_moving: bool,
        samples: u32,
        now_ms: u64,
    ) -> Option<MovementUpdate> {
        if let Some(last) = self.last_sent {
            let delta = (position - last.position).abs();
            let negligible = delta.x <= self.config.position_epsilon
                && delta.y <= self.config.position_epsilon;
            if negligible && last.direction == direction && last.is_moving == is_moving {
                return None;
            }
        }
        Some(self.emit(position, direction, is_moving, samples, now_ms))
    }

    fn emit(
        &mut self,
        position: DVec2,
        direction: Direction,
        is_moving: bool,
        samples: u32,
        now_ms: u64,
    ) -> MovementUpdate {
        self.last_sent = Some(Sent {
            position,
            direction,
            is_moving,
        });
        MovementUpdate {
            position,
            direction,
            is_moving,
            timestamp: now_ms,
            samples,
        }
    }
}
