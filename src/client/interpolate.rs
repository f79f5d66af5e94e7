//! Exponential smoothing of remote avatars between network updates

use super::mirror::{RemoteAvatarState, RemoteMirror};

/// Fraction of the remaining distance covered per frame
pub const DEFAULT_DAMPING: f32 = 0.3;

/// Below this distance the rendered position lands on the target
pub const SNAP_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct AvatarInterpolator {
    damping: f32,
}

impl AvatarInterpolator {
    /// `damping` is clamped into (0, 1]; anything outside would overshoot
    /// or never move.
    pub fn new(damping: f32) -> Self {
        let damping = if damping.is_finite() {
            damping.clamp(f32::EPSILON, 1.0)
        } else {
            DEFAULT_DAMPING
        };
        Self { damping }
    }

    pub fn damping(&self) -> f32 {
        self.damping
    }

    /// Advance one avatar by one frame. Rotation is not smoothed.
    pub fn step(&self, avatar: &mut RemoteAvatarState) {
        let remaining = avatar.rendered_position.distance_to(avatar.target_position);
        avatar.rendered_position = if remaining <= SNAP_EPSILON {
            avatar.target_position
        } else {
            avatar
                .rendered_position
                .lerp(avatar.target_position, self.damping)
        };
        avatar.rendered_rotation = avatar.target_rotation;
    }

    /// Advance every mirrored avatar by one frame
    pub fn apply(&self, mirror: &mut RemoteMirror) {
        for avatar in mirror.iter_mut() {
            self.step(avatar);
        }
    }
}

impl Default for AvatarInterpolator {
    fn default() -> Self {
        Self::new(DEFAULT_DAMPING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{ParticipantSnapshot, Profile, Rotation, Vec3};
    use uuid::Uuid;

    fn avatar_at(position: Vec3) -> RemoteAvatarState {
        RemoteAvatarState::from_snapshot(ParticipantSnapshot {
            id: Uuid::new_v4(),
            position,
            rotation: Rotation::default(),
            profile: Profile::default(),
        })
    }

    #[test]
    fn test_converges_without_overshoot() {
        let interpolator = AvatarInterpolator::new(0.3);
        let mut avatar = avatar_at(Vec3::new(0.0, 1.7, 0.0));
        let target = Vec3::new(10.0, 1.7, -4.0);
        avatar.target_position = target;

        let mut previous = avatar.rendered_position.distance_to(target);
        let mut ticks = 0;
        while avatar.rendered_position != target {
            interpolator.step(&mut avatar);
            let remaining = avatar.rendered_position.distance_to(target);
            assert!(remaining <= previous, "moved away from the target");
            // Never past the target along the x axis
            assert!(avatar.rendered_position.x <= target.x + 1e-4);
            previous = remaining;
            ticks += 1;
            assert!(ticks < 100, "did not converge");
        }
        // 0.7^n * 10.8 <= 1e-3 needs about 26 ticks
        assert!(ticks <= 30);
    }

    #[test]
    fn test_still_when_target_reached() {
        let interpolator = AvatarInterpolator::default();
        let mut avatar = avatar_at(Vec3::new(3.0, 1.7, 3.0));
        for _ in 0..5 {
            interpolator.step(&mut avatar);
            assert_eq!(avatar.rendered_position, Vec3::new(3.0, 1.7, 3.0));
        }
    }

    #[test]
    fn test_rotation_applied_directly() {
        let interpolator = AvatarInterpolator::default();
        let mut avatar = avatar_at(Vec3::ZERO);
        avatar.target_rotation = Rotation::new(2.5);

        interpolator.step(&mut avatar);
        assert_eq!(avatar.rendered_rotation, Rotation::new(2.5));
    }

    #[test]
    fn test_damping_clamped() {
        assert_eq!(AvatarInterpolator::new(4.0).damping(), 1.0);
        assert_eq!(AvatarInterpolator::new(f32::NAN).damping(), DEFAULT_DAMPING);
        assert!(AvatarInterpolator::new(-1.0).damping() > 0.0);
    }
}
