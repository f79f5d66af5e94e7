//! Uniform grid over the ground plane for proximity queries
//!
//! Maps cell id -> set of participant ids. Only occupied cells are stored,
//! so memory is bounded by the populated region rather than world size.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ws::protocol::ParticipantId;

/// Default grid cell edge length (world units)
pub const DEFAULT_CELL_SIZE: f32 = 100.0;

/// Default neighbourhood radius in cells (5x5 block)
pub const DEFAULT_PROXIMITY_RADIUS: u32 = 2;

/// Grid cell coordinates: `floor(x / S)`, `floor(z / S)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub x: i32,
    pub z: i32,
}

impl CellId {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chebyshev distance in cells
    pub fn chebyshev_distance(&self, other: CellId) -> u32 {
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).unsigned_abs();
        dx.max(dz) as u32
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.x, self.z)
    }
}

/// Smallest cell radius whose neighbourhood is guaranteed to contain every
/// point within `distance` of any point in the centre cell.
pub fn radius_covering(cell_size: f32, distance: f32) -> u32 {
    if cell_size <= 0.0 || !cell_size.is_finite() {
        return u32::MAX;
    }
    (distance.max(0.0) / cell_size).ceil() as u32
}

/// Spatial hash grid keyed by participant id
#[derive(Debug)]
pub struct SpatialIndex {
    /// Cell size in world units
    cell_size: f32,
    /// Occupied cells only; empty sets are removed eagerly
    cells: HashMap<CellId, HashSet<ParticipantId>>,
}

impl SpatialIndex {
    /// Create an empty grid. `cell_size` must be finite and positive;
    /// the config layer rejects anything else before we get here.
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Map a ground-plane position to its cell. Callers must pass finite
    /// coordinates.
    #[inline]
    pub fn cell_id_for(&self, x: f32, z: f32) -> CellId {
        CellId {
            x: (x / self.cell_size).floor() as i32,
            z: (z / self.cell_size).floor() as i32,
        }
    }

    /// Add a participant to a cell. Returns false if it was already there.
    pub fn insert(&mut self, id: ParticipantId, cell: CellId) -> bool {
        self.cells.entry(cell).or_default().insert(id)
    }

    /// Remove a participant from a cell, dropping the cell once empty.
    /// Returns false if the participant was not in that cell.
    pub fn remove(&mut self, id: ParticipantId, cell: CellId) -> bool {
        let Some(members) = self.cells.get_mut(&cell) else {
            return false;
        };

        let removed = members.remove(&id);
        if members.is_empty() {
            self.cells.remove(&cell);
        }
        removed
    }

    /// Union of all members of cells within `radius` (Chebyshev, inclusive)
    /// of `center`. Each id appears once.
    pub fn neighbors(&self, center: CellId, radius: u32) -> HashSet<ParticipantId> {
        let mut nearby = HashSet::new();
        let r = i64::from(radius);

        // Walk whichever is smaller: the block of cells or the occupied set
        let block = (2 * r + 1).saturating_mul(2 * r + 1);
        if block as usize > self.cells.len() {
            for (cell, members) in &self.cells {
                if cell.chebyshev_distance(center) <= radius {
                    nearby.extend(members.iter().copied());
                }
            }
            return nearby;
        }

        for dx in -r..=r {
            for dz in -r..=r {
                let (Ok(x), Ok(z)) = (
                    i32::try_from(i64::from(center.x) + dx),
                    i32::try_from(i64::from(center.z) + dz),
                ) else {
                    continue;
                };
                if let Some(members) = self.cells.get(&CellId { x, z }) {
                    nearby.extend(members.iter().copied());
                }
            }
        }

        nearby
    }

    /// Members of one cell, if occupied
    pub fn members(&self, cell: CellId) -> Option<&HashSet<ParticipantId>> {
        self.cells.get(&cell)
    }

    /// Every cell whose member set contains `id`
    pub fn cells_containing(&self, id: ParticipantId) -> Vec<CellId> {
        self.cells
            .iter()
            .filter(|(_, members)| members.contains(&id))
            .map(|(cell, _)| *cell)
            .collect()
    }

    /// Number of occupied cells
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Total number of memberships across all cells
    pub fn total_members(&self) -> usize {
        self.cells.values().map(HashSet::len).sum()
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}
