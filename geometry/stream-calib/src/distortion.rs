//! Lens distortion models operating on normalized image coordinates.
//!
//! Normalized coordinates are camera space coordinates divided by depth,
//! before the focal length and principal point are applied. "Undistorted"
//! coordinates follow the ideal pinhole model, "distorted" coordinates are
//! where the lens actually images a point.
//!
//! Each model has one direction with a closed form. The other direction is
//! found with a bounded number of Newton iterations, see
//! [`DistortionConfig`].

use nalgebra::{Matrix2, Point2, Vector2};

use crate::{CalibError, DistortionConfig, DistortionType, Result};

/// Step used for the central difference Jacobian of the inverted models.
const JACOBIAN_STEP: f64 = 1e-7;

/// F-theta coefficients smaller than this are treated as the identity model.
const MIN_FTHETA_COEFF: f64 = 1e-12;

/// A distortion model with its coefficients.
///
/// For the Brown-Conrady variants the coefficients are `[k1, k2, p1, p2, k3]`.
/// For f-theta only the first coefficient (the field of view parameter `w`)
/// is used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distortion {
    kind: DistortionType,
    coeffs: [f64; 5],
    config: DistortionConfig,
}

impl Distortion {
    pub fn new(kind: DistortionType, coeffs: [f64; 5], config: DistortionConfig) -> Self {
        Self {
            kind,
            coeffs,
            config,
        }
    }

    /// The identity model.
    pub fn none() -> Self {
        Self::new(DistortionType::None, [0.0; 5], DistortionConfig::default())
    }

    #[inline]
    pub fn kind(&self) -> DistortionType {
        self.kind
    }

    #[inline]
    pub fn coeffs(&self) -> &[f64; 5] {
        &self.coeffs
    }

    #[inline]
    pub fn config(&self) -> &DistortionConfig {
        &self.config
    }

    /// True if distorted and undistorted coordinates are identical.
    pub fn is_linear(&self) -> bool {
        match self.kind {
            DistortionType::None => true,
            DistortionType::FTheta => self.coeffs[0].abs() < MIN_FTHETA_COEFF,
            DistortionType::ModifiedBrownConrady | DistortionType::InverseBrownConrady => {
                self.coeffs.iter().all(|c| *c == 0.0)
            }
        }
    }

    /// Map an undistorted normalized point to where the lens images it.
    pub fn distort(&self, undistorted: &Point2<f64>) -> Result<Point2<f64>> {
        match self.kind {
            DistortionType::None => Ok(*undistorted),
            DistortionType::ModifiedBrownConrady => {
                self.check_radius(undistorted)?;
                Ok(self.modified_brown_conrady(undistorted))
            }
            DistortionType::InverseBrownConrady => {
                self.check_radius(undistorted)?;
                self.invert(undistorted, |p| self.brown_conrady(p))
            }
            DistortionType::FTheta => Ok(self.ftheta_distort(undistorted)),
        }
    }

    /// Map an observed normalized point back to the ideal pinhole model.
    pub fn undistort(&self, distorted: &Point2<f64>) -> Result<Point2<f64>> {
        match self.kind {
            DistortionType::None => Ok(*distorted),
            DistortionType::ModifiedBrownConrady => {
                self.check_radius(distorted)?;
                self.invert(distorted, |p| self.modified_brown_conrady(p))
            }
            DistortionType::InverseBrownConrady => {
                self.check_radius(distorted)?;
                Ok(self.brown_conrady(distorted))
            }
            DistortionType::FTheta => self.ftheta_undistort(distorted),
        }
    }

    fn check_radius(&self, p: &Point2<f64>) -> Result<()> {
        let radius_squared = p.coords.norm_squared();
        if !radius_squared.is_finite() || radius_squared > self.config.max_radius_squared {
            return Err(CalibError::DivergentDistortion {
                model: self.kind,
                radius_squared,
            });
        }
        Ok(())
    }

    #[inline]
    fn radial_scale(&self, r2: f64) -> f64 {
        let [k1, k2, _, _, k3] = self.coeffs;
        1.0 + r2 * (k1 + r2 * (k2 + r2 * k3))
    }

    /// Radial scaling followed by tangential terms evaluated on the radially
    /// scaled point.
    fn modified_brown_conrady(&self, p: &Point2<f64>) -> Point2<f64> {
        let [_, _, p1, p2, _] = self.coeffs;
        let r2 = p.coords.norm_squared();
        let f = self.radial_scale(r2);
        let x = p.x * f;
        let y = p.y * f;
        Point2::new(
            x + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y),
        )
    }

    /// The classic radial plus tangential polynomial.
    fn brown_conrady(&self, p: &Point2<f64>) -> Point2<f64> {
        let [_, _, p1, p2, _] = self.coeffs;
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let f = self.radial_scale(r2);
        Point2::new(
            x * f + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * f + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y),
        )
    }

    fn ftheta_distort(&self, p: &Point2<f64>) -> Point2<f64> {
        let w = self.coeffs[0];
        let r = p.coords.norm();
        if w.abs() < MIN_FTHETA_COEFF || r < f64::EPSILON {
            return *p;
        }
        let rd = (2.0 * r * (w / 2.0).tan()).atan() / w;
        Point2::from(p.coords * (rd / r))
    }

    fn ftheta_undistort(&self, p: &Point2<f64>) -> Result<Point2<f64>> {
        let w = self.coeffs[0];
        let rd = p.coords.norm();
        if w.abs() < MIN_FTHETA_COEFF || rd < f64::EPSILON {
            return Ok(*p);
        }
        if (w * rd).abs() >= std::f64::consts::FRAC_PI_2 {
            return Err(CalibError::DivergentDistortion {
                model: self.kind,
                radius_squared: rd * rd,
            });
        }
        let r = (w * rd).tan() / (2.0 * (w / 2.0).tan());
        Ok(Point2::from(p.coords * (r / rd)))
    }

    /// Solve `forward(u) == target` for `u` with Newton iterations.
    fn invert<F>(&self, target: &Point2<f64>, forward: F) -> Result<Point2<f64>>
    where
        F: Fn(&Point2<f64>) -> Point2<f64>,
    {
        let mut u = *target;
        for _ in 0..self.config.max_iterations {
            let residual: Vector2<f64> = forward(&u) - target;
            if residual.norm() <= self.config.tolerance {
                return Ok(u);
            }
            let jacobian = numeric_jacobian(&forward, &u);
            // A singular Jacobian falls back to a fixed point step.
            let step = match jacobian.try_inverse() {
                Some(inv) => inv * residual,
                None => residual,
            };
            u = u - step;
            self.check_radius(&u)?;
        }
        let residual = (forward(&u) - target).norm();
        if residual <= self.config.tolerance {
            Ok(u)
        } else {
            tracing::trace!(
                "{} inversion did not converge, residual {residual:e}",
                self.kind
            );
            Err(CalibError::DivergentDistortion {
                model: self.kind,
                radius_squared: u.coords.norm_squared(),
            })
        }
    }
}

impl Default for Distortion {
    fn default() -> Self {
        Self::none()
    }
}

fn numeric_jacobian<F>(forward: &F, at: &Point2<f64>) -> Matrix2<f64>
where
    F: Fn(&Point2<f64>) -> Point2<f64>,
{
    let dx = Vector2::new(JACOBIAN_STEP, 0.0);
    let dy = Vector2::new(0.0, JACOBIAN_STEP);
    let col_x = (forward(&(at + dx)) - forward(&(at - dx))) / (2.0 * JACOBIAN_STEP);
    let col_y = (forward(&(at + dy)) - forward(&(at - dy))) / (2.0 * JACOBIAN_STEP);
    Matrix2::from_columns(&[col_x, col_y])
}
