//! Shared-world synchronization: spatial grid, participant registry,
//! protocol state machine and the actor that serializes it all

pub mod registry;
pub mod service;
pub mod snapshot;
pub mod spatial;
pub mod sync;

pub use registry::{Participant, ParticipantRegistry, RegistryError};
pub use service::{SyncCommand, SyncHandle, SyncService};
pub use spatial::{CellId, SpatialIndex};
pub use sync::{ConnectionId, ConnectionState, Envelope, SyncSettings, SyncState, SyncStats};

use crate::util::vec3::Vec3;

/// Where every participant enters the world (eye height above the origin)
pub const SPAWN_POINT: Vec3 = Vec3 {
    x: 0.0,
    y: 1.7,
    z: 0.0,
};

/// Positions are clamped so `y` never drops below this
pub const GROUND_HEIGHT: f32 = 0.0;
