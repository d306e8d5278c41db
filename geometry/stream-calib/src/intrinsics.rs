use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::{CalibError, Distortion, DistortionConfig, DistortionType, Result};

/// Pinhole camera parameters of one stream, with a distortion model.
///
/// This is the fixed-size record exchanged with devices and calibration
/// files. All pixel quantities are in pixel units of the unrotated sensor.
/// For projection and deprojection build a [`StreamIntrinsics`], which
/// validates the record once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[repr(C)]
pub struct Intrinsics {
    /// Width of the image in pixels.
    pub width: i32,
    /// Height of the image in pixels.
    pub height: i32,
    /// Horizontal coordinate of the principal point, as a pixel offset from
    /// the left edge.
    pub ppx: f32,
    /// Vertical coordinate of the principal point, as a pixel offset from the
    /// top edge.
    pub ppy: f32,
    /// Focal length of the image plane, as a multiple of pixel width.
    pub fx: f32,
    /// Focal length of the image plane, as a multiple of pixel height.
    pub fy: f32,
    #[serde(default)]
    pub model: DistortionType,
    /// Distortion coefficients. Entries past
    /// [`DistortionType::coefficient_count`] are zero.
    #[serde(default)]
    pub coeffs: [f32; 5],
}

/// Field of view in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fov {
    pub horizontal: f64,
    pub vertical: f64,
}

impl Intrinsics {
    /// Intrinsics without lens distortion.
    pub fn pinhole(width: i32, height: i32, fx: f32, fy: f32, ppx: f32, ppy: f32) -> Self {
        Self {
            width,
            height,
            ppx,
            ppy,
            fx,
            fy,
            model: DistortionType::None,
            coeffs: [0.0; 5],
        }
    }

    /// Set the distortion model. Coefficients not used by `model` are zeroed.
    pub fn with_distortion(mut self, model: DistortionType, coeffs: [f32; 5]) -> Self {
        let n = model.coefficient_count();
        self.model = model;
        self.coeffs = [0.0; 5];
        self.coeffs[..n].copy_from_slice(&coeffs[..n]);
        self
    }

    /// The same pinhole parameters with the distortion model removed.
    pub fn undistorted(&self) -> Self {
        self.with_distortion(DistortionType::None, [0.0; 5])
    }

    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(CalibError::InvalidDimensions {
                width: self.width.into(),
                height: self.height.into(),
            });
        }
        let (fx, fy) = (self.fx, self.fy);
        if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
            return Err(CalibError::InvalidFocalLength {
                fx: fx.into(),
                fy: fy.into(),
            });
        }
        if !(self.ppx.is_finite() && self.ppy.is_finite()) {
            return Err(CalibError::InvalidPrincipalPoint {
                ppx: self.ppx.into(),
                ppy: self.ppy.into(),
            });
        }
        let n = self.model.coefficient_count();
        for (index, c) in self.coeffs.iter().enumerate() {
            if !c.is_finite() || (index >= n && *c != 0.0) {
                return Err(CalibError::InvalidCoefficients {
                    model: self.model,
                    index,
                });
            }
        }
        Ok(())
    }

    /// Field of view of the pinhole model, measured across the full extent
    /// of the pixels on both sides of the principal point.
    pub fn fov(&self) -> Fov {
        let (ppx, ppy) = (f64::from(self.ppx), f64::from(self.ppy));
        let (fx, fy) = (f64::from(self.fx), f64::from(self.fy));
        let (w, h) = (f64::from(self.width), f64::from(self.height));
        let horizontal = (ppx + 0.5).atan2(fx) + (w - (ppx + 0.5)).atan2(fx);
        let vertical = (ppy + 0.5).atan2(fy) + (h - (ppy + 0.5)).atan2(fy);
        Fov {
            horizontal: horizontal.to_degrees(),
            vertical: vertical.to_degrees(),
        }
    }

    /// True if `pixel` lies within `[0, width) x [0, height)`.
    pub fn contains(&self, pixel: &Point2<f64>) -> bool {
        pixel.x >= 0.0
            && pixel.y >= 0.0
            && pixel.x < f64::from(self.width)
            && pixel.y < f64::from(self.height)
    }

    pub fn distortion(&self, config: DistortionConfig) -> Distortion {
        let mut coeffs = [0.0; 5];
        for (dest, src) in coeffs.iter_mut().zip(self.coeffs.iter()) {
            *dest = f64::from(*src);
        }
        Distortion::new(self.model, coeffs, config)
    }
}

/// Validated intrinsics of one stream, ready for projection.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamIntrinsics {
    intrinsics: Intrinsics,
    fx: f64,
    fy: f64,
    ppx: f64,
    ppy: f64,
    distortion: Distortion,
}

impl StreamIntrinsics {
    pub fn new(intrinsics: &Intrinsics, config: DistortionConfig) -> Result<Self> {
        intrinsics.validate()?;
        if intrinsics.model == DistortionType::FTheta && intrinsics.coeffs[0] == 0.0 {
            tracing::warn!("f-theta intrinsics with zero coefficient act as a pinhole model");
        }
        Ok(Self {
            intrinsics: *intrinsics,
            fx: intrinsics.fx.into(),
            fy: intrinsics.fy.into(),
            ppx: intrinsics.ppx.into(),
            ppy: intrinsics.ppy.into(),
            distortion: intrinsics.distortion(config),
        })
    }

    #[inline]
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    #[inline]
    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.intrinsics.width as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.intrinsics.height as usize
    }

    /// Project a point in this stream's camera space to a pixel.
    ///
    /// The resulting pixel may lie outside of the image.
    pub fn project(&self, point: &Point3<f64>) -> Result<Point2<f64>> {
        let z = point.z;
        if !z.is_finite() || z <= 0.0 {
            return Err(CalibError::InvalidDepth { depth: z });
        }
        let normalized = Point2::new(point.x / z, point.y / z);
        let distorted = self.distortion.distort(&normalized)?;
        Ok(Point2::new(
            distorted.x * self.fx + self.ppx,
            distorted.y * self.fy + self.ppy,
        ))
    }

    /// Deproject a pixel with known depth (in meters) to this stream's
    /// camera space.
    pub fn deproject(&self, pixel: &Point2<f64>, depth: f64) -> Result<Point3<f64>> {
        if !self.intrinsics.contains(pixel) {
            return Err(CalibError::OutOfBounds {
                x: pixel.x,
                y: pixel.y,
                width: self.width(),
                height: self.height(),
            });
        }
        if !depth.is_finite() || depth <= 0.0 {
            return Err(CalibError::InvalidDepth { depth });
        }
        let distorted = Point2::new(
            (pixel.x - self.ppx) / self.fx,
            (pixel.y - self.ppy) / self.fy,
        );
        let normalized = self.distortion.undistort(&distorted)?;
        Ok(Point3::new(
            normalized.x * depth,
            normalized.y * depth,
            depth,
        ))
    }
}

/// Project `point` with `intrinsics` using the default distortion limits.
pub fn project(point: &Point3<f64>, intrinsics: &Intrinsics) -> Result<Point2<f64>> {
    StreamIntrinsics::new(intrinsics, DistortionConfig::default())?.project(point)
}

/// Deproject `pixel` at `depth` with `intrinsics` using the default
/// distortion limits.
pub fn deproject(pixel: &Point2<f64>, depth: f64, intrinsics: &Intrinsics) -> Result<Point3<f64>> {
    StreamIntrinsics::new(intrinsics, DistortionConfig::default())?.deproject(pixel, depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn vga() -> Intrinsics {
        Intrinsics::pinhole(640, 480, 525.0, 525.0, 320.0, 240.0)
    }

    #[test]
    fn test_principal_point() {
        let intr = vga();
        let pixel = project(&Point3::new(0.0, 0.0, 1.0), &intr).unwrap();
        assert_eq!(pixel, Point2::new(320.0, 240.0));
        let point = deproject(&Point2::new(320.0, 240.0), 2.0, &intr).unwrap();
        assert_eq!(point, Point3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn test_off_axis() {
        let cam = StreamIntrinsics::new(&vga(), DistortionConfig::default()).unwrap();
        let pixel = cam.project(&Point3::new(0.5, -0.25, 2.5)).unwrap();
        assert_relative_eq!(pixel, Point2::new(425.0, 187.5), epsilon = 1e-9);
        let point = cam.deproject(&pixel, 2.5).unwrap();
        assert_relative_eq!(point, Point3::new(0.5, -0.25, 2.5), epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_depth() {
        let cam = StreamIntrinsics::new(&vga(), DistortionConfig::default()).unwrap();
        for z in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                cam.project(&Point3::new(0.0, 0.0, z)),
                Err(CalibError::InvalidDepth { .. })
            ));
            assert!(matches!(
                cam.deproject(&Point2::new(10.0, 10.0), z),
                Err(CalibError::InvalidDepth { .. })
            ));
        }
    }

    #[test]
    fn test_out_of_bounds() {
        let cam = StreamIntrinsics::new(&vga(), DistortionConfig::default()).unwrap();
        for (x, y) in [(640.0, 0.0), (0.0, 480.0), (-0.5, 10.0), (10.0, -0.01)] {
            assert!(matches!(
                cam.deproject(&Point2::new(x, y), 1.0),
                Err(CalibError::OutOfBounds { .. })
            ));
        }
        cam.deproject(&Point2::new(639.9, 479.9), 1.0).unwrap();
        // projection outside the image is not an error
        let pixel = cam.project(&Point3::new(10.0, 0.0, 1.0)).unwrap();
        assert!(!cam.intrinsics().contains(&pixel));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            Intrinsics::pinhole(0, 480, 525.0, 525.0, 320.0, 240.0).validate(),
            Err(CalibError::InvalidDimensions {
                width: 0,
                height: 480
            })
        ));
        assert!(matches!(
            Intrinsics::pinhole(640, 480, 0.0, 525.0, 320.0, 240.0).validate(),
            Err(CalibError::InvalidFocalLength { .. })
        ));
        for (ppx, ppy) in [(f32::NAN, 240.0), (320.0, f32::INFINITY)] {
            assert!(matches!(
                Intrinsics::pinhole(640, 480, 525.0, 525.0, ppx, ppy).validate(),
                Err(CalibError::InvalidPrincipalPoint { .. })
            ));
        }
        let mut intr = vga().with_distortion(DistortionType::FTheta, [0.9, 0.0, 0.0, 0.0, 0.0]);
        intr.validate().unwrap();
        intr.coeffs[3] = 0.1;
        assert!(matches!(
            intr.validate(),
            Err(CalibError::InvalidCoefficients { index: 3, .. })
        ));
    }

    #[test]
    fn test_with_distortion_zero_fills() {
        let intr = vga().with_distortion(DistortionType::FTheta, [0.9, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(intr.coeffs, [0.9, 0.0, 0.0, 0.0, 0.0]);
        let intr = intr.undistorted();
        assert_eq!(intr.model, DistortionType::None);
        assert_eq!(intr.coeffs, [0.0; 5]);
    }

    #[test]
    fn test_fov() {
        let fov = vga().fov();
        let expected_h = 2.0 * (320.0f64 / 525.0).atan().to_degrees();
        let expected_v = 2.0 * (240.0f64 / 525.0).atan().to_degrees();
        assert_relative_eq!(fov.horizontal, expected_h, epsilon = 0.01);
        assert_relative_eq!(fov.vertical, expected_v, epsilon = 0.01);
    }

    #[test]
    fn test_yaml_defaults() {
        let buf = "width: 4\nheight: 3\nppx: 2.0\nppy: 1.5\nfx: 10.0\nfy: 10.0\n";
        let intr: Intrinsics = serde_yaml::from_str(buf).unwrap();
        assert_eq!(intr.model, DistortionType::None);
        assert_eq!(intr.coeffs, [0.0; 5]);
    }
}
