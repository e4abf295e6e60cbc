//! Viewer poses as reported on the wire and as handed to the host.

use glam::{Quat, Vec3};

/// A viewer's reported head position and view direction, in grid space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub position: Vec3,
    pub direction: Vec3,
}

impl PoseSample {
    pub fn new(position: Vec3, direction: Vec3) -> Self {
        Self {
            position,
            direction,
        }
    }
}

/// A viewer pose expressed relative to the grid centre, ready for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientPose {
    pub translation: Vec3,
    /// Rotation taking the `-Z` axis onto the view direction.
    pub rotation: Quat,
}

impl ClientPose {
    /// Centre `sample` on the grid and orient it along its view direction.
    ///
    /// A zero direction leaves the rotation at identity.
    pub fn from_sample(sample: &PoseSample, grid_offset: Vec3) -> Self {
        let direction = sample.direction.normalize_or_zero();
        let rotation = if direction == Vec3::ZERO {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_arc(Vec3::NEG_Z, direction)
        };
        Self {
            translation: sample.position - grid_offset,
            rotation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_is_centred_on_grid() {
        let sample = PoseSample::new(Vec3::new(10.0, 5.0, 2.0), Vec3::NEG_Z);
        let pose = ClientPose::from_sample(&sample, Vec3::new(8.0, 4.0, 0.0));
        assert_eq!(pose.translation, Vec3::new(2.0, 1.0, 2.0));
        assert!(pose.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn test_rotation_maps_neg_z_onto_direction() {
        let direction = Vec3::new(1.0, 2.0, -0.5);
        let sample = PoseSample::new(Vec3::ZERO, direction * 3.0);
        let pose = ClientPose::from_sample(&sample, Vec3::ZERO);
        let mapped = pose.rotation * Vec3::NEG_Z;
        assert!(mapped.abs_diff_eq(direction.normalize(), 1e-5), "{mapped:?}");
    }

    #[test]
    fn test_opposite_direction_is_half_turn() {
        let sample = PoseSample::new(Vec3::ZERO, Vec3::Z);
        let pose = ClientPose::from_sample(&sample, Vec3::ZERO);
        assert!((pose.rotation * Vec3::NEG_Z).abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn test_zero_direction_is_identity() {
        let sample = PoseSample::new(Vec3::ONE, Vec3::ZERO);
        let pose = ClientPose::from_sample(&sample, Vec3::ZERO);
        assert_eq!(pose.rotation, Quat::IDENTITY);
    }
}
