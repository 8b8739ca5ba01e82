//! Inbound state interpolation.
//!
//! Room snapshots arrive sparsely and irregularly. Each remote entity is
//! blended linearly from its previous to its newest known position over a
//! fixed window; once the window has elapsed it holds at the target. There is
//! no extrapolation, so a rendered position always lies between the two most
//! recent snapshot positions.

use glam::DVec2;
use hive_config::SyncConfig;

use crate::player::{Direction, animation_tag};
use crate::registry::{PlayerRegistry, Upsert};
use crate::schema::PlayersSnapshot;

/// Blend from `start` to `target` over `window_ms`, starting at `started_at_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolation {
    pub start: DVec2,
    pub target: DVec2,
    pub started_at_ms: u64,
    pub window_ms: u64,
}

impl Interpolation {
    /// Zero-length blend: the entity appears at `position`.
    pub fn appear(position: DVec2, now_ms: u64, window_ms: u64) -> Self {
        Self {
            start: position,
            target: position,
            started_at_ms: now_ms,
            window_ms,
        }
    }

    /// Fraction of the window elapsed at `now_ms`, clamped to `[0, 1]`.
    pub fn progress(&self, now_ms: u64) -> f64 {
        if self.window_ms == 0 {
            return 1.0;
        }
        let elapsed = now_ms.saturating_sub(self.started_at_ms) as f64;
        (elapsed / self.window_ms as f64).clamp(0.0, 1.0)
    }

    /// Rendered position at `now_ms`.
    pub fn sample(&self, now_ms: u64) -> DVec2 {
        self.start.lerp(self.target, self.progress(now_ms))
    }

    /// Start a new blend towards `target`. The previous target becomes the
    /// new start; the previous blend is discarded, not merged.
    pub fn retarget(&mut self, target: DVec2, now_ms: u64) {
        self.start = self.target;
        self.target = target;
        self.started_at_ms = now_ms;
    }
}

/// Interpolator tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatorConfig {
    /// Blend duration in milliseconds.
    pub window_ms: u64,
    /// Snapshots closer together than this are coalesced into the newest.
    pub min_snapshot_interval_ms: u64,
    /// Per-axis rendered displacement per tick above which an entity is
    /// animated as moving.
    pub motion_epsilon: f64,
    /// Consecutive snapshots an id may be absent from before it is removed.
    pub leave_grace_snapshots: u32,
}

impl Default for InterpolatorConfig {
    fn default() -> Self {
        Self {
            window_ms: 100,
            min_snapshot_interval_ms: 33,
            motion_epsilon: 0.1,
            leave_grace_snapshots: 0,
        }
    }
}

impl From<&SyncConfig> for InterpolatorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            window_ms: config.interpolation_window_ms,
            min_snapshot_interval_ms: config.min_snapshot_interval_ms,
            motion_epsilon: config.motion_epsilon,
            leave_grace_snapshots: config.leave_grace_snapshots,
        }
    }
}

/// One remote entity as the renderer should draw it this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPlayer {
    pub id: String,
    pub username: String,
    pub position: DVec2,
    pub direction: Direction,
    /// Derived from rendered motion, not from the snapshot flag.
    pub is_moving: bool,
    pub animation: String,
}

/// Everything the renderer needs for one frame, sorted by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerRegistrySnapshot {
    pub taken_at_ms: u64,
    pub players: Vec<RenderedPlayer>,
}

impl PlayerRegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<&RenderedPlayer> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// Joins and leaves produced by applying one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub joined: Vec<String>,
    pub left: Vec<String>,
    pub updated: usize,
}

#[derive(Debug)]
struct Pending {
    snapshot: PlayersSnapshot,
    received_at_ms: u64,
    queued_since_ms: u64,
}

/// Turns room snapshots into per-tick rendered state.
#[derive(Debug)]
pub struct InboundStateInterpolator {
    config: InterpolatorConfig,
    registry: PlayerRegistry,
    pending: Option<Pending>,
    superseded: u64,
}

impl InboundStateInterpolator {
    pub fn new(config: InterpolatorConfig) -> Self {
        Self {
            config,
            registry: PlayerRegistry::new(config.window_ms),
            pending: None,
            superseded: 0,
        }
    }

    /// Exclude `id` (the local participant) from the registry.
    pub fn set_local_id(&mut self, id: Option<String>) {
        self.registry.set_local_id(id);
    }

    /// Read-only view of the registry.
    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    /// Queue a snapshot received at `now_ms`, superseding any queued one.
    pub fn receive(&mut self, snapshot: PlayersSnapshot, now_ms: u64) {
        let queued_since_ms = match self.pending.take() {
            Some(prev) => {
                self.superseded += 1;
                tracing::trace!(players = prev.snapshot.len(), "pending snapshot superseded");
                prev.queued_since_ms
            }
            None => now_ms,
        };
        self.pending = Some(Pending {
            snapshot,
            received_at_ms: now_ms,
            queued_since_ms,
        });
    }

    /// Apply the queued snapshot once the minimum interval since it was first
    /// queued has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Option<SnapshotDiff> {
        let due = self.pending.as_ref().is_some_and(|p| {
            now_ms.saturating_sub(p.queued_since_ms) >= self.config.min_snapshot_interval_ms
        });
        if !due {
            return None;
        }
        let pending = self.pending.take()?;
        Some(self.apply(pending.snapshot, pending.received_at_ms))
    }

    /// When the queued snapshot will be applied, if one is queued.
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| {
            p.queued_since_ms
                .saturating_add(self.config.min_snapshot_interval_ms)
        })
    }

    /// Snapshots dropped in favour of a newer one so far.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Diff `snapshot` against the registry: unseen ids join, existing ids
    /// retarget, absent ids leave.
    pub fn apply(&mut self, snapshot: PlayersSnapshot, received_at_ms: u64) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (id, state) in &snapshot.0 {
            match self.registry.upsert(id, state.clone(), received_at_ms) {
                Upsert::Joined => diff.joined.push(id.clone()),
                Upsert::Updated => diff.updated += 1,
                Upsert::Local => {}
            }
        }

        let absent: Vec<String> = self
            .registry
            .ids()
            .filter(|id| !snapshot.contains(id))
            .map(str::to_string)
            .collect();
        for id in absent {
            let missed = self.registry.mark_missed(&id);
            if missed > self.config.leave_grace_snapshots {
                self.registry.remove(&id);
                diff.left.push(id);
            }
        }

        if !diff.joined.is_empty() || !diff.left.is_empty() {
            tracing::debug!(joined = ?diff.joined, left = ?diff.left, "room membership changed");
        }
        diff
    }

    /// Sample every entity at `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> PlayerRegistrySnapshot {
        let epsilon = self.config.motion_epsilon;
        let players = self
            .registry
            .entries_mut()
            .map(|(id, entry)| {
                let position = entry.interpolation.sample(now_ms);
                let step = (position - entry.rendered).abs();
                let is_moving = step.x > epsilon || step.y > epsilon;
                entry.rendered = position;
                entry.rendered_moving = is_moving;

                let direction = entry.state.direction;
                RenderedPlayer {
                    id: id.to_string(),
                    username: entry.state.username.clone(),
                    position,
                    direction,
                    is_moving,
                    animation: animation_tag(direction, is_moving),
                }
            })
            .collect();

        PlayerRegistrySnapshot {
            taken_at_ms: now_ms,
            players,
        }
    }

    /// Forget all remote entities and any queued snapshot.
    pub fn clear(&mut self) {
        self.pending = None;
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerState;

    fn player(id: &str, x: f64, y: f64) -> PlayerState {
        PlayerState::spawn(id.to_string(), id.to_string(), DVec2::new(x, y), 0)
    }

    fn snapshot(players: impl IntoIterator<Item = PlayerState>) -> PlayersSnapshot {
        players.into_iter().collect()
    }

    fn interpolator() -> InboundStateInterpolator {
        InboundStateInterpolator::new(InterpolatorConfig::default())
    }

    #[test]
    fn test_progress_is_clamped() {
        let interp = Interpolation {
            start: DVec2::ZERO,
            target: DVec2::new(10.0, 0.0),
            started_at_ms: 100,
            window_ms: 100,
        };
        assert_eq!(interp.progress(50), 0.0);
        assert_eq!(interp.sample(100), DVec2::ZERO);
        assert_eq!(interp.progress(150), 0.5);
        assert_eq!(interp.sample(200), DVec2::new(10.0, 0.0));
        assert_eq!(interp.progress(10_000), 1.0);
    }

    #[test]
    fn test_retarget_starts_from_previous_target() {
        let mut interp = Interpolation::appear(DVec2::ZERO, 0, 100);
        interp.retarget(DVec2::new(10.0, 0.0), 0);
        // Halfway there when the next snapshot lands.
        interp.retarget(DVec2::new(20.0, 0.0), 50);
        assert_eq!(interp.start, DVec2::new(10.0, 0.0));
        assert_eq!(interp.sample(50), DVec2::new(10.0, 0.0));
    }

    #[test]
    fn test_zero_window_holds_target() {
        let interp = Interpolation {
            start: DVec2::ZERO,
            target: DVec2::ONE,
            started_at_ms: 0,
            window_ms: 0,
        };
        assert_eq!(interp.sample(0), DVec2::ONE);
    }

    #[test]
    fn test_join_appears_at_given_coordinates() {
        let mut i = interpolator();
        let diff = i.apply(snapshot([player("a", 5.0, 7.0)]), 0);
        assert_eq!(diff.joined, vec!["a".to_string()]);

        let frame = i.tick(0);
        let a = frame.get("a").unwrap();
        assert_eq!(a.position, DVec2::new(5.0, 7.0));
        assert!(!a.is_moving);
        assert_eq!(a.animation, "idle-down");
    }

    #[test]
    fn test_halfway_then_held() {
        let mut i = interpolator();
        i.apply(snapshot([player("A", 0.0, 0.0)]), 0);

        let mut moved = player("A", 100.0, 0.0);
        moved.is_moving = true;
        moved.direction = Direction::Right;
        i.apply(snapshot([moved]), 50);

        let x_at_100 = i.tick(100).get("A").unwrap().position.x;
        assert!((x_at_100 - 50.0).abs() < 1e-9);
        let held = i.tick(150);
        assert_eq!(held.get("A").unwrap().position.x, 100.0);
        assert_eq!(i.tick(400).get("A").unwrap().position.x, 100.0);
    }

    #[test]
    fn test_rendered_position_stays_between_snapshots() {
        let mut i = interpolator();
        i.apply(snapshot([player("a", 0.0, 0.0)]), 0);
        i.apply(snapshot([player("a", 40.0, -20.0)]), 10);
        for now in (0..200).step_by(7) {
            let p = i.tick(now).get("a").unwrap().position;
            assert!((0.0..=40.0).contains(&p.x), "x={} at {now}", p.x);
            assert!((-20.0..=0.0).contains(&p.y), "y={} at {now}", p.y);
        }
    }

    #[test]
    fn test_animation_follows_rendered_motion_not_flag() {
        let mut i = interpolator();
        i.apply(snapshot([player("a", 0.0, 0.0)]), 0);

        // Flag says idle, but the entity visibly moves.
        let mut far = player("a", 100.0, 0.0);
        far.direction = Direction::Right;
        i.apply(snapshot([far.clone()]), 0);
        let moving = i.tick(50);
        assert!(moving.get("a").unwrap().is_moving);
        assert_eq!(moving.get("a").unwrap().animation, "run-right");

        // Flag says moving, but the entity is standing still.
        far.is_moving = true;
        i.apply(snapshot([far]), 100);
        i.tick(200);
        let idle = i.tick(216);
        assert!(!idle.get("a").unwrap().is_moving);
        assert_eq!(idle.get("a").unwrap().animation, "idle-right");
    }

    #[test]
    fn test_absent_id_leaves_and_stays_gone() {
        let mut i = interpolator();
        i.apply(snapshot([player("a", 0.0, 0.0), player("b", 1.0, 1.0)]), 0);
        let diff = i.apply(snapshot([player("a", 0.0, 0.0)]), 50);
        assert_eq!(diff.left, vec!["b".to_string()]);

        assert!(i.tick(60).get("b").is_none());
        i.apply(snapshot([player("a", 1.0, 0.0)]), 100);
        assert!(i.tick(110).get("b").is_none());

        let back = i.apply(snapshot([player("a", 1.0, 0.0), player("b", 9.0, 9.0)]), 200);
        assert_eq!(back.joined, vec!["b".to_string()]);
        assert_eq!(i.tick(200).get("b").unwrap().position, DVec2::new(9.0, 9.0));
    }

    #[test]
    fn test_leave_grace_tolerates_dropped_broadcast() {
        let mut i = InboundStateInterpolator::new(InterpolatorConfig {
            leave_grace_snapshots: 1,
            ..Default::default()
        });
        i.apply(snapshot([player("a", 0.0, 0.0), player("b", 1.0, 1.0)]), 0);
        assert!(i.apply(snapshot([player("a", 0.0, 0.0)]), 50).left.is_empty());
        assert!(i.registry().contains("b"));

        // Seen again: the miss counter resets.
        i.apply(snapshot([player("a", 0.0, 0.0), player("b", 1.0, 1.0)]), 100);
        assert!(i.apply(snapshot([player("a", 0.0, 0.0)]), 150).left.is_empty());
        assert_eq!(i.apply(snapshot([player("a", 0.0, 0.0)]), 200).left, vec!["b".to_string()]);
    }

    #[test]
    fn test_local_id_is_never_tracked() {
        let mut i = interpolator();
        i.set_local_id(Some("me-1".to_string()));
        let diff = i.apply(snapshot([player("me-1", 0.0, 0.0), player("b", 1.0, 1.0)]), 0);
        assert_eq!(diff.joined, vec!["b".to_string()]);
        assert!(!i.registry().contains("me-1"));
        assert!(i.tick(10).get("me-1").is_none());
    }

    #[test]
    fn test_burst_of_snapshots_applies_only_newest() {
        let mut i = interpolator();
        i.receive(snapshot([player("a", 1.0, 0.0)]), 0);
        i.receive(snapshot([player("a", 2.0, 0.0)]), 10);
        i.receive(snapshot([player("a", 3.0, 0.0)]), 20);
        assert_eq!(i.superseded(), 2);

        assert_eq!(i.poll(32), None);
        assert_eq!(i.next_deadline(), Some(33));
        let diff = i.poll(33).unwrap();
        assert_eq!(diff.joined, vec!["a".to_string()]);
        assert_eq!(i.tick(33).get("a").unwrap().position.x, 3.0);
        assert_eq!(i.poll(100), None);
    }

    #[test]
    fn test_queued_snapshot_paces_from_receipt_time() {
        let mut i = interpolator();
        i.receive(snapshot([player("A", 0.0, 0.0)]), 0);
        i.poll(33);
        i.receive(snapshot([player("A", 100.0, 0.0)]), 50);
        i.poll(83);

        assert!((i.tick(100).get("A").unwrap().position.x - 50.0).abs() < 1e-9);
        assert_eq!(i.tick(150).get("A").unwrap().position.x, 100.0);
    }

    #[test]
    fn test_clear_drops_entities_and_queue() {
        let mut i = interpolator();
        i.apply(snapshot([player("a", 0.0, 0.0)]), 0);
        i.receive(snapshot([player("b", 0.0, 0.0)]), 5);
        i.clear();
        assert!(i.registry().is_empty());
        assert_eq!(i.poll(1_000), None);
    }
}
