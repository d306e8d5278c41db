use nalgebra::{Matrix3, Matrix3x4, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::{MotionType, SampleFlags, TimestampDomain};

/// Affine correction of an inertial sensor with noise metadata.
///
/// `data` holds the rows of a 3x4 matrix `[S | b]` where `S` combines
/// per-axis scale and cross-axis terms and `b` is the bias.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[repr(C)]
pub struct MotionDeviceIntrinsics {
    pub data: [[f32; 4]; 3],
    pub noise_variances: [f32; 3],
    pub bias_variances: [f32; 3],
}

impl Default for MotionDeviceIntrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

impl MotionDeviceIntrinsics {
    /// No correction and zero variances.
    pub fn identity() -> Self {
        Self {
            data: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            noise_variances: [0.0; 3],
            bias_variances: [0.0; 3],
        }
    }

    pub fn matrix(&self) -> Matrix3x4<f64> {
        Matrix3x4::from_fn(|r, c| f64::from(self.data[r][c]))
    }

    /// Scale and cross-axis block.
    pub fn scale_matrix(&self) -> Matrix3<f64> {
        self.matrix().fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn bias(&self) -> Vector3<f64> {
        self.matrix().column(3).into_owned()
    }

    pub fn noise_variances(&self) -> Vector3<f64> {
        Vector3::from_iterator(self.noise_variances.iter().map(|v| f64::from(*v)))
    }

    pub fn bias_variances(&self) -> Vector3<f64> {
        Vector3::from_iterator(self.bias_variances.iter().map(|v| f64::from(*v)))
    }

    /// Apply the correction to a raw sample: `M [raw; 1]`.
    pub fn correct(&self, raw: &Vector3<f64>) -> Vector3<f64> {
        self.matrix() * Vector4::new(raw.x, raw.y, raw.z, 1.0)
    }
}

/// One reading of an accelerometer or gyroscope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub motion_type: MotionType,
    /// Milliseconds in `domain`.
    pub timestamp: f64,
    pub domain: TimestampDomain,
    #[serde(default)]
    pub flags: SampleFlags,
    pub data: [f32; 3],
}

impl MotionSample {
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.data[0].into(), self.data[1].into(), self.data[2].into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn accel() -> MotionDeviceIntrinsics {
        MotionDeviceIntrinsics {
            data: [
                [1.02, 0.01, 0.0, -0.05],
                [0.0, 0.98, 0.0, 0.1],
                [0.0, 0.0, 1.0, 0.25],
            ],
            noise_variances: [0.01, 0.02, 0.03],
            bias_variances: [0.001, 0.002, 0.003],
        }
    }

    #[test]
    fn test_identity() {
        let raw = Vector3::new(0.1, -9.81, 0.3);
        assert_relative_eq!(MotionDeviceIntrinsics::identity().correct(&raw), raw);
    }

    #[test]
    fn test_correct() {
        let m = accel();
        let raw = Vector3::new(1.0, 2.0, 3.0);
        let expected = Vector3::new(
            1.02 * 1.0 + 0.01 * 2.0 - 0.05,
            0.98 * 2.0 + 0.1,
            3.0 + 0.25,
        );
        assert_relative_eq!(m.correct(&raw), expected, epsilon = 1e-6);
        assert_relative_eq!(
            m.scale_matrix() * raw + m.bias(),
            expected,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_metadata() {
        let m = accel();
        assert_relative_eq!(m.bias(), Vector3::new(-0.05, 0.1, 0.25), epsilon = 1e-7);
        assert_relative_eq!(
            m.noise_variances(),
            Vector3::new(0.01, 0.02, 0.03),
            epsilon = 1e-7
        );
        assert_relative_eq!(
            m.bias_variances(),
            Vector3::new(0.001, 0.002, 0.003),
            epsilon = 1e-7
        );
    }
}
