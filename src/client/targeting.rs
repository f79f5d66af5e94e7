//! Facing-direction interaction targeting

use std::cmp::Ordering;

use crate::util::vec3::ground_facing;
use crate::ws::protocol::{ParticipantId, Vec3};

use super::mirror::RemoteMirror;

/// Targeting reach on the ground plane (world units)
pub const DEFAULT_INTERACTION_RADIUS: f32 = 5.0;

/// Minimum cosine between facing and candidate direction (about 45 degrees)
pub const DEFAULT_INTERACTION_THRESHOLD: f32 = 0.7;

/// Pick the candidate the local participant is facing most directly.
///
/// Candidates must be strictly within `radius` on the ground plane and have
/// an alignment strictly above `threshold`. Ties on alignment go to the
/// closer candidate, then to the smaller id. A candidate standing exactly on
/// the local position has no direction and is skipped.
pub fn select_target<I>(
    origin: Vec3,
    yaw: f32,
    candidates: I,
    radius: f32,
    threshold: f32,
) -> Option<ParticipantId>
where
    I: IntoIterator<Item = (ParticipantId, Vec3)>,
{
    let (fx, fz) = ground_facing(yaw);

    candidates
        .into_iter()
        .filter_map(|(id, position)| {
            let distance = origin.horizontal_distance_to(position);
            if distance >= radius || distance <= f32::EPSILON {
                return None;
            }
            let dx = (position.x - origin.x) / distance;
            let dz = (position.z - origin.z) / distance;
            let alignment = fx * dx + fz * dz;
            (alignment > threshold).then_some((id, alignment, distance))
        })
        .max_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
                .then_with(|| b.0.cmp(&a.0))
        })
        .map(|(id, _, _)| id)
}

/// Change of the selected target between two frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetChange {
    pub previous: Option<ParticipantId>,
    pub current: Option<ParticipantId>,
}

/// Holds the single current target; at most one is active
#[derive(Debug, Clone)]
pub struct InteractionTargeter {
    radius: f32,
    threshold: f32,
    current: Option<ParticipantId>,
}

impl InteractionTargeter {
    pub fn new(radius: f32, threshold: f32) -> Self {
        Self {
            radius,
            threshold,
            current: None,
        }
    }

    /// Re-evaluate against the latest network positions in `mirror`
    pub fn update(&mut self, origin: Vec3, yaw: f32, mirror: &RemoteMirror) -> Option<TargetChange> {
        let selected = select_target(
            origin,
            yaw,
            mirror.iter().map(|a| (a.id, a.target_position)),
            self.radius,
            self.threshold,
        );

        if selected == self.current {
            return None;
        }
        let change = TargetChange {
            previous: self.current,
            current: selected,
        };
        self.current = selected;
        Some(change)
    }

    pub fn current(&self) -> Option<ParticipantId> {
        self.current
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

impl Default for InteractionTargeter {
    fn default() -> Self {
        Self::new(DEFAULT_INTERACTION_RADIUS, DEFAULT_INTERACTION_THRESHOLD)
    }
}
