use serde::{Deserialize, Serialize};

use crate::Result;

/// The default value for [DistortionConfig::max_iterations].
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// The default value for [DistortionConfig::tolerance].
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// The default value for [DistortionConfig::max_radius_squared].
pub const DEFAULT_MAX_RADIUS_SQUARED: f64 = 4.0;

/// The default value for [AlignmentConfig::depth_scale].
pub const DEFAULT_DEPTH_SCALE: f64 = 0.001;

/// The default value for [AlignmentConfig::rotation_tolerance].
pub const DEFAULT_ROTATION_TOLERANCE: f64 = 1e-3;

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_max_radius_squared() -> f64 {
    DEFAULT_MAX_RADIUS_SQUARED
}

fn default_depth_scale() -> f64 {
    DEFAULT_DEPTH_SCALE
}

fn default_disparity_scale() -> f64 {
    1.0
}

fn default_rotation_tolerance() -> f64 {
    DEFAULT_ROTATION_TOLERANCE
}

/// Numeric limits of the distortion models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistortionConfig {
    /// Upper bound on iterations when a distortion model has to be inverted
    /// numerically.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Convergence threshold on the residual norm, in normalized image
    /// coordinates.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Normalized points with a squared radius above this value are outside
    /// the calibrated field of view of the polynomial models and are
    /// rejected.
    #[serde(default = "default_max_radius_squared")]
    pub max_radius_squared: f64,
}

impl Default for DistortionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            max_radius_squared: default_max_radius_squared(),
        }
    }
}

/// Configuration of calibration loading and stream alignment.
///
/// Usually read from a `.toml` file with [parse_config_file]. Every field
/// has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlignmentConfig {
    /// Meters per unit of a `z16` depth sample.
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f64,
    /// Depth in meters of a `disparity16` sample is `disparity_scale / raw`.
    #[serde(default = "default_disparity_scale")]
    pub disparity_scale: f64,
    /// Raw depth value marking a missing measurement. Such samples are never
    /// deprojected.
    #[serde(default)]
    pub invalid_depth: u16,
    /// Tolerance of the orthonormality check on extrinsic rotations.
    #[serde(default = "default_rotation_tolerance")]
    pub rotation_tolerance: f64,
    #[serde(default)]
    pub distortion: DistortionConfig,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            depth_scale: default_depth_scale(),
            disparity_scale: default_disparity_scale(),
            invalid_depth: 0,
            rotation_tolerance: default_rotation_tolerance(),
            distortion: DistortionConfig::default(),
        }
    }
}

impl AlignmentConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Parse a `.toml` file and return an [AlignmentConfig] structure.
pub fn parse_config_file<P: AsRef<std::path::Path>>(fname: P) -> Result<AlignmentConfig> {
    use std::io::Read;

    let mut file = std::fs::File::open(fname.as_ref())?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let cfg = AlignmentConfig::from_toml_str(&contents)?;
    tracing::debug!("parsed alignment config {}", fname.as_ref().display());
    Ok(cfg)
}
