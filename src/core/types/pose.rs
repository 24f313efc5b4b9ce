//! 3D rigid-body pose.
//!
//! A pose is a rotation plus a translation. Composition follows the usual
//! convention: `a.compose(&b)` applies `b` in the frame of `a`.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid transform in 3D.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pose3 {
    /// Translation component (meters).
    pub translation: Vector3<f64>,

    /// Rotation component.
    pub rotation: UnitQuaternion<f64>,
}

impl Pose3 {
    /// Identity pose.
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from translation and rotation.
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Create a pure translation with identity rotation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            translation: Vector3::new(x, y, z),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Compose this pose with another: `self * other`.
    pub fn compose(&self, other: &Pose3) -> Pose3 {
        Pose3 {
            translation: self.translation + self.rotation * other.translation,
            rotation: self.rotation * other.rotation,
        }
    }

    /// Inverse transform.
    pub fn inverse(&self) -> Pose3 {
        let inv_rot = self.rotation.inverse();
        Pose3 {
            translation: -(inv_rot * self.translation),
            rotation: inv_rot,
        }
    }

    /// Relative transform from `self` to `other`: `self^-1 * other`.
    pub fn between(&self, other: &Pose3) -> Pose3 {
        self.inverse().compose(other)
    }

    /// Euclidean distance between the translation components.
    pub fn translation_distance(&self, other: &Pose3) -> f64 {
        (self.translation - other.translation).norm()
    }
}

impl Default for Pose3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_compose_with_identity() {
        let pose = Pose3::from_translation(1.0, 2.0, 3.0);
        let composed = pose.compose(&Pose3::identity());

        assert_relative_eq!(composed.translation.x, 1.0);
        assert_relative_eq!(composed.translation.y, 2.0);
        assert_relative_eq!(composed.translation.z, 3.0);
    }

    #[test]
    fn test_compose_applies_rotation() {
        let rot = UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2);
        let a = Pose3::new(Vector3::zeros(), rot);
        let b = Pose3::from_translation(1.0, 0.0, 0.0);

        let c = a.compose(&b);

        assert_relative_eq!(c.translation.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(c.translation.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let rot = UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3);
        let pose = Pose3::new(Vector3::new(1.0, -2.0, 0.5), rot);

        let round = pose.compose(&pose.inverse());

        assert_relative_eq!(round.translation.norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(round.rotation.angle(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_between() {
        let a = Pose3::from_translation(1.0, 0.0, 0.0);
        let b = Pose3::from_translation(3.0, 0.0, 0.0);

        let rel = a.between(&b);

        assert_relative_eq!(rel.translation.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(a.compose(&rel).translation.x, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_translation_distance() {
        let a = Pose3::from_translation(0.0, 0.0, 0.0);
        let b = Pose3::from_translation(3.0, 4.0, 0.0);

        assert_relative_eq!(a.translation_distance(&b), 5.0);
    }
}
