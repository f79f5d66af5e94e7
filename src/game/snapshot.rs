//! Full active-participant snapshots for `initialize` and `proximityUpdate`

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ws::protocol::{ParticipantSnapshot, ServerMsg};

use super::registry::ParticipantRegistry;

/// Builds the "everyone active" snapshots sent on join and on cell change.
///
/// These are full lists rather than neighbourhood deltas; see DESIGN.md for
/// the scaling trade-off.
#[derive(Debug)]
pub struct SnapshotBuilder {
    /// Participants idle longer than this are left out
    activity_window: Duration,
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new(activity_window: Duration) -> Self {
        Self {
            activity_window,
            stats: SnapshotStats::default(),
        }
    }

    /// Reply to a join: the joiner's id and spawn point plus every active
    /// participant keyed by id (the joiner included).
    pub fn initialize(
        &mut self,
        registry: &ParticipantRegistry,
        joined: &ParticipantSnapshot,
        now: Instant,
    ) -> ServerMsg {
        let players: HashMap<_, _> = registry
            .active_snapshots(now, self.activity_window)
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        self.stats.record(players.len());

        ServerMsg::Initialize {
            id: joined.id,
            position: joined.position,
            players,
        }
    }

    /// Sent to a participant that just crossed into a new cell
    pub fn proximity_update(&mut self, registry: &ParticipantRegistry, now: Instant) -> ServerMsg {
        let players = registry.active_snapshots(now, self.activity_window);
        self.stats.record(players.len());

        ServerMsg::ProximityUpdate { players }
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Snapshot size stats for the status endpoint
#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize) {
        self.total_snapshots += 1;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}
