use nalgebra::{IsometryMatrix3, Matrix3, Point3, Rotation3, Translation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{CalibError, Result};

/// Rigid transform from the camera space of one stream to another.
///
/// The direction is part of the identity: the extrinsics from A to B map a
/// point expressed in A's camera space to B's camera space and are the
/// [inverse](Extrinsics::inverse) of the extrinsics from B to A.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[repr(C)]
pub struct Extrinsics {
    /// Column-major 3x3 rotation matrix.
    pub rotation: [f32; 9],
    /// Translation in meters.
    pub translation: [f32; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self::from_parts(&Matrix3::identity(), &Vector3::zeros())
    }

    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut r = [0.0f32; 9];
        // nalgebra storage is column-major
        for (dest, src) in r.iter_mut().zip(rotation.iter()) {
            *dest = *src as f32;
        }
        Self {
            rotation: r,
            translation: [
                translation.x as f32,
                translation.y as f32,
                translation.z as f32,
            ],
        }
    }

    pub fn from_isometry(iso: &IsometryMatrix3<f64>) -> Self {
        Self::from_parts(iso.rotation.matrix(), &iso.translation.vector)
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_iterator(self.rotation.iter().map(|v| f64::from(*v)))
    }

    pub fn translation_vector(&self) -> Vector3<f64> {
        Vector3::from_iterator(self.translation.iter().map(|v| f64::from(*v)))
    }

    /// Transform `point`: `R * p + t`.
    pub fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation_matrix() * point + self.translation_vector()
    }

    /// The transform in the opposite direction: `R' = Rᵀ`, `t' = -Rᵀ t`.
    pub fn inverse(&self) -> Self {
        let rt = self.rotation_matrix().transpose();
        let t = -(rt * self.translation_vector());
        Self::from_parts(&rt, &t)
    }

    /// Compose `self` (A to B) with `next` (B to C), giving A to C.
    pub fn then(&self, next: &Extrinsics) -> Self {
        let r1 = self.rotation_matrix();
        let r2 = next.rotation_matrix();
        let t = r2 * self.translation_vector() + next.translation_vector();
        Self::from_parts(&(r2 * r1), &t)
    }

    /// Check that the rotation is orthonormal with determinant +1.
    ///
    /// The reported error is the largest absolute deviation of `RᵀR` from the
    /// identity or of `det R` from one.
    pub fn validate(&self, tolerance: f64) -> Result<()> {
        if !self.translation.iter().all(|t| t.is_finite()) {
            return Err(CalibError::NonFiniteTranslation {
                translation: self.translation,
            });
        }
        let r = self.rotation_matrix();
        let ortho = (r.transpose() * r - Matrix3::identity()).amax();
        let det = (r.determinant() - 1.0).abs();
        let error = ortho.max(det);
        if !error.is_finite() || error > tolerance {
            return Err(CalibError::NonOrthonormalRotation { error });
        }
        Ok(())
    }

    /// Validate and convert to an isometry.
    ///
    /// The rotation is re-orthonormalized, removing the rounding of the
    /// stored `f32` values.
    pub fn to_isometry(&self, tolerance: f64) -> Result<IsometryMatrix3<f64>> {
        self.validate(tolerance)?;
        let rotation = Rotation3::from_matrix_eps(
            &self.rotation_matrix(),
            f64::EPSILON,
            100,
            Rotation3::identity(),
        );
        Ok(IsometryMatrix3::from_parts(
            Translation3::from(self.translation_vector()),
            rotation,
        ))
    }
}
