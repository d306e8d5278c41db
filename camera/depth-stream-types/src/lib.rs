//! Plain data types shared by depth camera calibration and alignment code.
//!
//! Everything here is a closed enumeration or a small record describing
//! streams, pixel layouts and devices. The numeric discriminants of the
//! enumerations match the values used by device firmware and calibration
//! blobs, so they can be exchanged as raw `i32` values.
//!
//! ```rust
//! use depth_stream_types::{Derivation, PixelFormat, StreamType};
//!
//! let stream = StreamType::DepthAlignedToColor;
//! assert!(stream.is_synthetic());
//! assert_eq!(
//!     stream.derivation(),
//!     Some(Derivation::Align {
//!         values: StreamType::Depth,
//!         grid: StreamType::Color,
//!     })
//! );
//! assert!(PixelFormat::Z16.is_compatible_with(stream));
//! assert!(!PixelFormat::Rgb8.is_compatible_with(stream));
//! ```
#![deny(rust_2018_idioms)]

mod device;
mod image_info;
mod pixel_format;

pub use crate::device::{DeviceInfo, Rotation};
pub use crate::image_info::ImageInfo;
pub use crate::pixel_format::PixelFormat;

/// Error type for this crate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("value {value} is not a valid {type_name}")]
    UnknownValue { type_name: &'static str, value: i32 },
    #[error("cannot parse \"{value}\" as {type_name}")]
    ParseError {
        type_name: &'static str,
        value: String,
    },
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },
    #[error("pitch {pitch} is smaller than the {min_pitch} bytes needed per row")]
    PitchTooSmall { pitch: i32, min_pitch: usize },
    #[error("pixel format {0} has no whole number of bytes per pixel")]
    NotByteAddressable(PixelFormat),
    #[error("field {field} is {len} bytes long, at most {max} allowed")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Defines a fieldless `#[repr(i32)]` enum together with its string names
/// and conversions from and to raw integers.
macro_rules! define_int_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal => $s:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[repr(i32)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $s)]
                $variant = $value,
            )+
        }

        impl $name {
            /// All variants, in discriminant order.
            pub const fn variants() -> &'static [$name] {
                &[$($name::$variant),+]
            }

            /// The canonical lower case name.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s,)+
                }
            }

            /// The raw discriminant.
            pub const fn as_i32(&self) -> i32 {
                *self as i32
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;
            fn from_str(instr: &str) -> crate::Result<Self> {
                match instr {
                    $($s => Ok($name::$variant),)+
                    _ => Err(crate::Error::ParseError {
                        type_name: stringify!($name),
                        value: instr.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = crate::Error;
            fn try_from(value: i32) -> crate::Result<Self> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(crate::Error::UnknownValue {
                        type_name: stringify!($name),
                        value,
                    }),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(orig: $name) -> i32 {
                orig.as_i32()
            }
        }
    };
}
pub(crate) use define_int_enum;

define_int_enum! {
    /// Identity of a logical data stream.
    ///
    /// Native streams originate from a device. Synthetic streams are computed
    /// from one or two native streams, see [`StreamType::derivation`].
    StreamType {
        /// Depth data produced by the device.
        Depth = 0 => "depth",
        /// Color data captured by the device.
        Color = 1 => "color",
        /// Infrared data captured by the device.
        Infrared = 2 => "infrared",
        /// Infrared data captured from a second viewpoint.
        Infrared2 = 3 => "infrared2",
        /// Wide angle monochrome data.
        Fisheye = 4 => "fisheye",
        /// Point cloud generated by deprojecting the depth image.
        Points = 5 => "points",
        /// Undistorted color data with no extrinsic rotation from the depth
        /// stream.
        RectifiedColor = 6 => "rectified_color",
        /// Color data in the pixel grid of the depth stream.
        ColorAlignedToDepth = 7 => "color_aligned_to_depth",
        /// Second viewpoint infrared data in the pixel grid of the depth
        /// stream.
        Infrared2AlignedToDepth = 8 => "infrared2_aligned_to_depth",
        /// Depth data in the pixel grid of the color stream.
        DepthAlignedToColor = 9 => "depth_aligned_to_color",
        /// Depth data in the pixel grid of the rectified color stream.
        DepthAlignedToRectifiedColor = 10 => "depth_aligned_to_rectified_color",
        /// Depth data in the pixel grid of the second infrared stream.
        DepthAlignedToInfrared2 = 11 => "depth_aligned_to_infrared2",
    }
}

/// How a synthetic stream is computed from native streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Every valid depth pixel deprojected into the depth camera space.
    PointCloud { depth: StreamType },
    /// `source` resampled through a distortion free model sharing the
    /// optical center of `source`.
    Rectify { source: StreamType },
    /// Values of stream `values` resampled into the pixel grid of `grid`.
    Align { values: StreamType, grid: StreamType },
}

impl StreamType {
    /// True for streams produced directly by a device.
    pub const fn is_native(&self) -> bool {
        use StreamType::*;
        matches!(self, Depth | Color | Infrared | Infrared2 | Fisheye)
    }

    pub const fn is_synthetic(&self) -> bool {
        !self.is_native()
    }

    /// Describe how this stream is derived. `None` for native streams.
    pub const fn derivation(&self) -> Option<Derivation> {
        use StreamType::*;
        let d = match self {
            Depth | Color | Infrared | Infrared2 | Fisheye => return None,
            Points => Derivation::PointCloud { depth: Depth },
            RectifiedColor => Derivation::Rectify { source: Color },
            ColorAlignedToDepth => Derivation::Align {
                values: Color,
                grid: Depth,
            },
            Infrared2AlignedToDepth => Derivation::Align {
                values: Infrared2,
                grid: Depth,
            },
            DepthAlignedToColor => Derivation::Align {
                values: Depth,
                grid: Color,
            },
            DepthAlignedToRectifiedColor => Derivation::Align {
                values: Depth,
                grid: RectifiedColor,
            },
            DepthAlignedToInfrared2 => Derivation::Align {
                values: Depth,
                grid: Infrared2,
            },
        };
        Some(d)
    }

    /// The native stream whose pixel values this stream carries.
    ///
    /// Native streams return themselves. The point cloud is derived from
    /// depth and so returns [`StreamType::Depth`].
    pub const fn value_source(&self) -> StreamType {
        match self.derivation() {
            None => *self,
            Some(Derivation::PointCloud { depth }) => depth,
            Some(Derivation::Rectify { source }) => source,
            Some(Derivation::Align { values, .. }) => values,
        }
    }

    /// True if pixel values are depth or disparity samples.
    pub const fn carries_depth(&self) -> bool {
        matches!(self, StreamType::Depth)
            || matches!(
                self.derivation(),
                Some(Derivation::Align {
                    values: StreamType::Depth,
                    ..
                })
            )
    }
}

define_int_enum! {
    /// Lens distortion model of a stream.
    DistortionType {
        /// Rectilinear images, no distortion compensation required.
        None = 0 => "none",
        /// Brown-Conrady distortion where tangential distortion is applied to
        /// radially distorted points.
        ModifiedBrownConrady = 1 => "modified_brown_conrady",
        /// Brown-Conrady distortion with coefficients that undistort the image
        /// instead of distorting it.
        InverseBrownConrady = 2 => "inverse_brown_conrady",
        /// Angle based fisheye model.
        FTheta = 3 => "ftheta",
    }
}

impl DistortionType {
    /// Number of leading coefficients used by this model. The remaining
    /// entries of a coefficient array must be zero.
    pub const fn coefficient_count(&self) -> usize {
        match self {
            DistortionType::None => 0,
            DistortionType::ModifiedBrownConrady | DistortionType::InverseBrownConrady => 5,
            DistortionType::FTheta => 1,
        }
    }
}

impl Default for DistortionType {
    fn default() -> Self {
        DistortionType::None
    }
}

define_int_enum! {
    /// Kind of inertial sensor.
    MotionType {
        /// Accelerometer.
        Accel = 1 => "accel",
        /// Gyroscope.
        Gyro = 2 => "gyro",
    }
}

define_int_enum! {
    /// Clock that produced a sample timestamp.
    ///
    /// Timestamps from different domains are not directly comparable.
    TimestampDomain {
        Camera = 0 => "camera",
        Microcontroller = 1 => "microcontroller",
    }
}

impl TimestampDomain {
    /// Timestamps can only be compared within a single domain. Reconciling
    /// two domains needs an offset which is not modeled here.
    pub fn is_comparable_with(&self, other: TimestampDomain) -> bool {
        *self == other
    }
}

define_int_enum! {
    /// Origin flags of a sample.
    SampleFlags {
        None = 0 => "none",
        /// Sample generated by an external device (platform camera or
        /// external IMU).
        External = 1 => "external",
    }
}

impl Default for SampleFlags {
    fn default() -> Self {
        SampleFlags::None
    }
}
