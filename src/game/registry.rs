//! Authoritative per-participant state
//!
//! The registry owns both the participant records and the [`SpatialIndex`].
//! Every mutation goes through here, so a participant's stored cell and its
//! grid membership can never disagree between calls.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::{ParticipantId, ParticipantSnapshot, Profile, Rotation, Vec3};

use super::spatial::{CellId, SpatialIndex};
use super::SPAWN_POINT;

/// Server-side participant record
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub position: Vec3,
    pub rotation: Rotation,
    pub profile: Profile,
    /// Always equal to the grid cell holding this id
    pub cell_id: CellId,
    /// Refreshed by every accepted update, emote or interaction
    pub last_activity_at: Instant,
}

impl Participant {
    /// Wire representation
    pub fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            id: self.id,
            position: self.position,
            rotation: self.rotation,
            profile: self.profile.clone(),
        }
    }

    /// Activity strictly within the window ending at `now`
    pub fn is_active(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity_at) < timeout
    }
}

/// Result of a position update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellTransition {
    pub changed_cell: bool,
    pub old_cell: CellId,
    pub new_cell: CellId,
}

/// Registry errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),
}

/// Owns all participants and the spatial grid they are indexed in
#[derive(Debug)]
pub struct ParticipantRegistry {
    participants: HashMap<ParticipantId, Participant>,
    index: SpatialIndex,
}

impl ParticipantRegistry {
    pub fn new(cell_size: f32) -> Self {
        Self {
            participants: HashMap::new(),
            index: SpatialIndex::new(cell_size),
        }
    }

    /// Register a new participant at the spawn point.
    /// Returns a snapshot carrying the freshly allocated id.
    pub fn add(&mut self, profile: Profile, now: Instant) -> ParticipantSnapshot {
        let id = Uuid::new_v4();
        let cell_id = self.index.cell_id_for(SPAWN_POINT.x, SPAWN_POINT.z);

        let participant = Participant {
            id,
            position: SPAWN_POINT,
            rotation: Rotation::default(),
            profile,
            cell_id,
            last_activity_at: now,
        };
        let snapshot = participant.snapshot();

        self.index.insert(id, cell_id);
        self.participants.insert(id, participant);

        debug!(participant_id = %id, cell = %cell_id, "Participant registered");
        snapshot
    }

    /// Overwrite position and rotation, moving the participant between grid
    /// cells when needed. `position` must be finite.
    pub fn apply_update(
        &mut self,
        id: ParticipantId,
        position: Vec3,
        rotation: Rotation,
        now: Instant,
    ) -> Result<CellTransition, RegistryError> {
        debug_assert!(position.is_finite());

        let participant = self
            .participants
            .get_mut(&id)
            .ok_or(RegistryError::UnknownParticipant(id))?;

        let old_cell = participant.cell_id;
        let new_cell = self.index.cell_id_for(position.x, position.z);

        participant.position = position;
        participant.rotation = rotation;
        participant.last_activity_at = now;

        let changed_cell = old_cell != new_cell;
        if changed_cell {
            self.index.remove(id, old_cell);
            self.index.insert(id, new_cell);
            participant.cell_id = new_cell;
        }

        Ok(CellTransition {
            changed_cell,
            old_cell,
            new_cell,
        })
    }

    /// Refresh the activity timestamp without moving
    pub fn touch(&mut self, id: ParticipantId, now: Instant) -> Result<(), RegistryError> {
        let participant = self
            .participants
            .get_mut(&id)
            .ok_or(RegistryError::UnknownParticipant(id))?;
        participant.last_activity_at = now;
        Ok(())
    }

    /// Remove a participant from the grid and the registry.
    /// This is the only removal path.
    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let participant = self.participants.remove(&id)?;
        self.index.remove(id, participant.cell_id);
        debug!(participant_id = %id, cell = %participant.cell_id, "Participant removed");
        Some(participant)
    }

    /// Remove every participant idle for longer than `timeout`
    pub fn sweep_inactive(&mut self, now: Instant, timeout: Duration) -> Vec<Participant> {
        let stale: Vec<ParticipantId> = self
            .participants
            .values()
            .filter(|p| now.saturating_duration_since(p.last_activity_at) > timeout)
            .map(|p| p.id)
            .collect();

        stale.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Snapshots of everyone active within `timeout` of `now`
    pub fn active_snapshots(&self, now: Instant, timeout: Duration) -> Vec<ParticipantSnapshot> {
        self.participants
            .values()
            .filter(|p| p.is_active(now, timeout))
            .map(Participant::snapshot)
            .collect()
    }

    /// Participants registered in cells within `radius` of `cell`
    pub fn neighbors(&self, cell: CellId, radius: u32) -> HashSet<ParticipantId> {
        self.index.neighbors(cell, radius)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Every participant sits in exactly the cell it records, and the grid
    /// holds nobody else. O(participants x cells); meant for tests.
    pub fn is_consistent(&self) -> bool {
        if self.index.total_members() != self.participants.len() {
            return false;
        }
        self.participants
            .values()
            .all(|p| self.index.cells_containing(p.id) == vec![p.cell_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn registry() -> ParticipantRegistry {
        ParticipantRegistry::new(100.0)
    }

    #[test]
    fn test_add_places_at_spawn() {
        let mut reg = registry();
        let now = Instant::now();
        let snapshot = reg.add(Profile::default(), now);

        assert_eq!(snapshot.position, SPAWN_POINT);
        assert_eq!(snapshot.rotation, Rotation::default());
        let participant = reg.get(snapshot.id).unwrap();
        assert_eq!(participant.cell_id, CellId::new(0, 0));
        assert!(reg.is_consistent());
    }

    #[test]
    fn test_apply_update_same_cell() {
        let mut reg = registry();
        let now = Instant::now();
        let id = reg.add(Profile::default(), now).id;

        let transition = reg
            .apply_update(id, Vec3::new(50.0, 1.7, 50.0), Rotation::new(1.0), now)
            .unwrap();
        assert!(!transition.changed_cell);
        assert_eq!(transition.old_cell, transition.new_cell);

        let participant = reg.get(id).unwrap();
        assert_eq!(participant.position, Vec3::new(50.0, 1.7, 50.0));
        assert_eq!(participant.rotation, Rotation::new(1.0));
    }

    #[test]
    fn test_apply_update_crosses_cell() {
        let mut reg = registry();
        let now = Instant::now();
        let id = reg.add(Profile::default(), now).id;

        let transition = reg
            .apply_update(id, Vec3::new(150.0, 1.7, -20.0), Rotation::default(), now)
            .unwrap();
        assert!(transition.changed_cell);
        assert_eq!(transition.old_cell, CellId::new(0, 0));
        assert_eq!(transition.new_cell, CellId::new(1, -1));
        assert_eq!(reg.get(id).unwrap().cell_id, CellId::new(1, -1));
        assert!(reg.index().members(CellId::new(0, 0)).is_none());
        assert!(reg.is_consistent());
    }

    #[test]
    fn test_apply_update_refreshes_activity() {
        let mut reg = registry();
        let start = Instant::now();
        let id = reg.add(Profile::default(), start).id;

        let later = start + Duration::from_secs(30);
        reg.apply_update(id, SPAWN_POINT, Rotation::default(), later)
            .unwrap();
        assert_eq!(reg.get(id).unwrap().last_activity_at, later);
    }

    #[test]
    fn test_apply_update_unknown_participant() {
        let mut reg = registry();
        let ghost = Uuid::new_v4();
        let result = reg.apply_update(ghost, SPAWN_POINT, Rotation::default(), Instant::now());
        assert_eq!(result, Err(RegistryError::UnknownParticipant(ghost)));
    }

    #[test]
    fn test_remove_clears_index() {
        let mut reg = registry();
        let now = Instant::now();
        let id = reg.add(Profile::default(), now).id;

        let removed = reg.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(!reg.contains(id));
        assert_eq!(reg.index().occupied_cells(), 0);
        assert!(reg.remove(id).is_none());
    }

    #[test]
    fn test_sweep_inactive_removes_only_stale() {
        let mut reg = registry();
        let start = Instant::now();
        let timeout = Duration::from_secs(60);

        let stale = reg.add(Profile::default(), start).id;
        let fresh = reg.add(Profile::default(), start).id;
        reg.touch(fresh, start + Duration::from_secs(50)).unwrap();

        let now = start + Duration::from_secs(61);
        let swept = reg.sweep_inactive(now, timeout);

        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, stale);
        assert!(!reg.contains(stale));
        assert!(reg.contains(fresh));
        assert!(reg.is_consistent());
    }

    #[test]
    fn test_sweep_twice_same_now_is_noop() {
        let mut reg = registry();
        let start = Instant::now();
        let timeout = Duration::from_secs(60);
        for _ in 0..5 {
            reg.add(Profile::default(), start);
        }

        let now = start + Duration::from_secs(120);
        assert_eq!(reg.sweep_inactive(now, timeout).len(), 5);
        assert!(reg.sweep_inactive(now, timeout).is_empty());
    }

    #[test]
    fn test_active_snapshots_window() {
        let mut reg = registry();
        let start = Instant::now();
        let timeout = Duration::from_secs(60);

        let idle = reg.add(Profile::default(), start).id;
        let busy = reg.add(Profile::default(), start).id;
        reg.touch(busy, start + Duration::from_secs(40)).unwrap();

        let now = start + Duration::from_secs(60);
        let active: Vec<_> = reg
            .active_snapshots(now, timeout)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(active, vec![busy]);
        // Not active, but not yet past the sweep threshold either
        assert!(reg.contains(idle));
    }

    #[test]
    fn test_random_operations_keep_index_consistent() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(99);
        let now = Instant::now();
        let mut ids = Vec::new();

        for _ in 0..500 {
            match rng.gen_range(0..10) {
                0..=1 => ids.push(reg.add(Profile::default(), now).id),
                2 if !ids.is_empty() => {
                    let victim = ids.swap_remove(rng.gen_range(0..ids.len()));
                    reg.remove(victim);
                }
                _ if !ids.is_empty() => {
                    let id = ids[rng.gen_range(0..ids.len())];
                    let position = Vec3::new(
                        rng.gen_range(-500.0..500.0),
                        1.7,
                        rng.gen_range(-500.0..500.0),
                    );
                    reg.apply_update(id, position, Rotation::default(), now)
                        .unwrap();
                }
                _ => {}
            }
            assert!(reg.is_consistent());
        }
        assert_eq!(reg.len(), ids.len());
    }
}
