//! Table of known remote entities.

use std::collections::BTreeMap;

use glam::DVec2;

use crate::interpolation::Interpolation;
use crate::player::PlayerState;

/// One remote entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    /// Latest state from the server.
    pub state: PlayerState,
    pub interpolation: Interpolation,
    /// Receipt time of the snapshot that last contained this id.
    pub last_seen_ms: u64,
    /// Position drawn on the previous tick.
    pub rendered: DVec2,
    /// Motion derived on the previous tick.
    pub rendered_moving: bool,
    /// Consecutive snapshots this id was absent from.
    pub missed_snapshots: u32,
}

/// Outcome of [`PlayerRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First sighting; the entity appears at its coordinates.
    Joined,
    /// Known entity retargeted.
    Updated,
    /// The id is the local participant and was not stored.
    Local,
}

/// Remote entities keyed by id. Never holds the local participant.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    window_ms: u64,
    local_id: Option<String>,
    entries: BTreeMap<String, RegistryEntry>,
}

impl PlayerRegistry {
    /// Empty registry blending over `window_ms`.
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            local_id: None,
            entries: BTreeMap::new(),
        }
    }

    /// Set the id to exclude, evicting it if it is already present.
    pub fn set_local_id(&mut self, id: Option<String>) {
        if let Some(id) = &id {
            self.entries.remove(id);
        }
        self.local_id = id;
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// Insert or refresh `id` from a snapshot received at `now_ms`.
    pub fn upsert(&mut self, id: &str, state: PlayerState, now_ms: u64) -> Upsert {
        if self.local_id.as_deref() == Some(id) {
            return Upsert::Local;
        }

        let target = state.position();
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.interpolation.retarget(target, now_ms);
                entry.state = state;
                entry.last_seen_ms = now_ms;
                entry.missed_snapshots = 0;
                Upsert::Updated
            }
            None => {
                self.entries.insert(
                    id.to_string(),
                    RegistryEntry {
                        state,
                        interpolation: Interpolation::appear(target, now_ms, self.window_ms),
                        last_seen_ms: now_ms,
                        rendered: target,
                        rendered_moving: false,
                        missed_snapshots: 0,
                    },
                );
                Upsert::Joined
            }
        }
    }

    /// Count one more snapshot without `id` and return the running total.
    pub fn mark_missed(&mut self, id: &str) -> u32 {
        self.entries.get_mut(id).map_or(0, |entry| {
            entry.missed_snapshots += 1;
            entry.missed_snapshots
        })
    }

    pub fn remove(&mut self, id: &str) -> Option<RegistryEntry> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Every entity and its latest state, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = (&str, &PlayerState)> {
        self.entries.iter().map(|(id, e)| (id.as_str(), &e.state))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = (&str, &mut RegistryEntry)> {
        self.entries.iter_mut().map(|(id, e)| (id.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str, x: f64) -> PlayerState {
        PlayerState::spawn(id.to_string(), "p".to_string(), DVec2::new(x, 0.0), 0)
    }

    #[test]
    fn test_upsert_then_update() {
        let mut reg = PlayerRegistry::new(100);
        assert_eq!(reg.upsert("a", state("a", 1.0), 0), Upsert::Joined);
        assert_eq!(reg.upsert("a", state("a", 5.0), 40), Upsert::Updated);

        let entry = reg.get("a").unwrap();
        assert_eq!(entry.interpolation.start, DVec2::new(1.0, 0.0));
        assert_eq!(entry.interpolation.target, DVec2::new(5.0, 0.0));
        assert_eq!(entry.last_seen_ms, 40);
    }

    #[test]
    fn test_local_id_is_refused() {
        let mut reg = PlayerRegistry::new(100);
        reg.set_local_id(Some("me".to_string()));
        assert_eq!(reg.upsert("me", state("me", 0.0), 0), Upsert::Local);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_setting_local_id_evicts_it() {
        let mut reg = PlayerRegistry::new(100);
        reg.upsert("me", state("me", 0.0), 0);
        reg.set_local_id(Some("me".to_string()));
        assert!(!reg.contains("me"));
    }

    #[test]
    fn test_missed_counter_resets_on_sighting() {
        let mut reg = PlayerRegistry::new(100);
        reg.upsert("a", state("a", 0.0), 0);
        assert_eq!(reg.mark_missed("a"), 1);
        assert_eq!(reg.mark_missed("a"), 2);
        reg.upsert("a", state("a", 0.0), 10);
        assert_eq!(reg.get("a").unwrap().missed_snapshots, 0);
        assert_eq!(reg.mark_missed("ghost"), 0);
    }

    #[test]
    fn test_all_is_ordered_by_id() {
        let mut reg = PlayerRegistry::new(100);
        reg.upsert("c", state("c", 0.0), 0);
        reg.upsert("a", state("a", 0.0), 0);
        reg.upsert("b", state("b", 0.0), 0);
        let ids: Vec<_> = reg.all().map(|(id, _)| id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        reg.remove("b");
        assert_eq!(reg.len(), 2);
    }
}
