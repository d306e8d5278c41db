//! Geometric calibration and stream alignment for depth cameras.
//!
//! This crate relates pixels of the streams of a depth camera (depth, color,
//! infrared, fisheye) to each other and to 3D space. It provides:
//!
//! - Lens distortion models ([`Distortion`]) mapping between ideal and
//!   observed normalized image coordinates.
//! - Pinhole projection and deprojection with distortion
//!   ([`StreamIntrinsics`], [`project`], [`deproject`]).
//! - Rigid transforms between stream camera spaces ([`Extrinsics`]).
//! - Affine correction of inertial samples ([`MotionDeviceIntrinsics`]).
//! - An immutable, shareable calibration snapshot ([`CalibrationSet`]) and a
//!   [`Resolver`] which uses it to synthesize aligned streams such as
//!   depth-aligned-to-color or a point cloud.
//!
//! ## Coordinate systems
//!
//! - **Camera space**: 3D, meters, X right, Y down, Z forward along the optical
//!   axis of one stream.
//! - **Normalized coordinates**: camera space divided by Z.
//! - **Pixel coordinates**: origin at the top-left, X right, Y down.
//!
//! ## Example
//!
//! ```rust
//! use nalgebra::{Point2, Point3};
//! use stream_calib::{deproject, project, Intrinsics};
//!
//! let intrinsics = Intrinsics::pinhole(640, 480, 525.0, 525.0, 320.0, 240.0);
//!
//! let pixel = project(&Point3::new(0.0, 0.0, 1.0), &intrinsics)?;
//! assert_eq!(pixel, Point2::new(320.0, 240.0));
//!
//! let point = deproject(&Point2::new(320.0, 240.0), 2.0, &intrinsics)?;
//! assert_eq!(point, Point3::new(0.0, 0.0, 2.0));
//! # Ok::<(), stream_calib::CalibError>(())
//! ```
#![deny(rust_2018_idioms)]

use thiserror::Error;

pub use depth_stream_types::{
    Derivation, DeviceInfo, DistortionType, ImageInfo, MotionType, PixelFormat, Rotation,
    SampleFlags, StreamType, TimestampDomain,
};

#[derive(Error, Debug)]
pub enum CalibError {
    #[error("invalid depth {depth}, must be positive and finite")]
    InvalidDepth { depth: f64 },
    #[error("pixel ({x}, {y}) outside {width}x{height} image")]
    OutOfBounds {
        x: f64,
        y: f64,
        width: usize,
        height: usize,
    },
    #[error("missing calibration for {from} -> {to}")]
    MissingCalibration { from: StreamType, to: StreamType },
    #[error("calibration of {0} is derived from other streams and cannot be supplied")]
    DerivedCalibration(StreamType),
    #[error("no calibration for {0} motion sensor")]
    MissingMotionCalibration(MotionType),
    #[error("distortion model {model} diverges (squared radius {radius_squared})")]
    DivergentDistortion {
        model: DistortionType,
        radius_squared: f64,
    },
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },
    #[error("invalid focal length fx={fx}, fy={fy}")]
    InvalidFocalLength { fx: f64, fy: f64 },
    #[error("invalid principal point ppx={ppx}, ppy={ppy}")]
    InvalidPrincipalPoint { ppx: f64, ppy: f64 },
    #[error("distortion model {model} does not use coefficient {index}, which must be zero")]
    InvalidCoefficients { model: DistortionType, index: usize },
    #[error("rotation matrix is not orthonormal (error {error:e})")]
    NonOrthonormalRotation { error: f64 },
    #[error("translation {translation:?} is not finite")]
    NonFiniteTranslation { translation: [f32; 3] },
    #[error("pixel format {format} cannot be used for stream {stream}")]
    InconsistentPixelFormat {
        stream: StreamType,
        format: PixelFormat,
    },
    #[error("pixel format {0} is not supported here")]
    UnsupportedPixelFormat(PixelFormat),
    #[error("stream {0} is not a synthetic stream")]
    NotSynthetic(StreamType),
    #[error("no frame supplied for stream {0}")]
    MissingFrame(StreamType),
    #[error("buffer of {len} bytes is smaller than the {required} bytes required")]
    BufferTooSmall { len: usize, required: usize },
    #[error("operation cancelled")]
    Cancelled,
    #[error("depth_stream_types::Error: {source}")]
    Types {
        #[from]
        source: depth_stream_types::Error,
    },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("serde_yaml error: {source}")]
    SerdeYaml {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("serde_json error: {source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
    #[error("TOML deserialization error: {source}")]
    TomlDe {
        #[from]
        source: toml::de::Error,
    },
}

pub type Result<M> = std::result::Result<M, CalibError>;

mod config;
pub use crate::config::{parse_config_file, AlignmentConfig, DistortionConfig};

pub mod distortion;
pub use crate::distortion::Distortion;

mod intrinsics;
pub use crate::intrinsics::{deproject, project, Fov, Intrinsics, StreamIntrinsics};

mod extrinsics;
pub use crate::extrinsics::Extrinsics;

mod motion;
pub use crate::motion::{MotionDeviceIntrinsics, MotionSample};

mod calibration;
pub use crate::calibration::{
    CalibrationFile, CalibrationPublisher, CalibrationSet, CalibrationSetBuilder, ExtrinsicsEntry,
};

pub mod frame;
pub use crate::frame::{AlignedFrame, CancellationToken, FrameSet, ImageView};

mod align;
pub use crate::align::{AlignmentMapping, Resolver};
