use serde::{Deserialize, Serialize};

use crate::{Error, Result};

crate::define_int_enum! {
    /// How the camera device is physically mounted, as a clockwise rotation.
    Rotation {
        Deg0 = 0 => "rotation_0_degree",
        Deg90 = 90 => "rotation_90_degree",
        Deg180 = 180 => "rotation_180_degree",
        Deg270 = 270 => "rotation_270_degree",
        Invalid = -1 => "rotation_invalid_value",
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Rotation::Deg0
    }
}

impl Rotation {
    /// Size of a `width` x `height` image after applying this rotation.
    pub fn rotated_size(&self, width: usize, height: usize) -> Option<(usize, usize)> {
        match self {
            Rotation::Deg0 | Rotation::Deg180 => Some((width, height)),
            Rotation::Deg90 | Rotation::Deg270 => Some((height, width)),
            Rotation::Invalid => None,
        }
    }

    /// Location of pixel `(x, y)` of an unrotated `width` x `height` image
    /// after applying this rotation.
    ///
    /// The mounting rotation is applied on top of images produced with the
    /// stream intrinsics. Intrinsics and extrinsics always describe the
    /// unrotated sensor.
    pub fn rotate_pixel(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Option<(usize, usize)> {
        if x >= width || y >= height {
            return None;
        }
        match self {
            Rotation::Deg0 => Some((x, y)),
            Rotation::Deg90 => Some((height - 1 - y, x)),
            Rotation::Deg180 => Some((width - 1 - x, height - 1 - y)),
            Rotation::Deg270 => Some((y, width - 1 - x)),
            Rotation::Invalid => None,
        }
    }
}

/// Device details.
///
/// The string fields are limited to the fixed capacities of the device
/// record (including a terminating NUL byte).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub firmware: String,
    #[serde(default)]
    pub rotation: Rotation,
}

impl DeviceInfo {
    pub const NAME_CAPACITY: usize = 224;
    pub const SERIAL_CAPACITY: usize = 32;
    pub const FIRMWARE_CAPACITY: usize = 32;

    pub fn validate(&self) -> Result<()> {
        for (field, value, capacity) in [
            ("name", &self.name, Self::NAME_CAPACITY),
            ("serial", &self.serial, Self::SERIAL_CAPACITY),
            ("firmware", &self.firmware, Self::FIRMWARE_CAPACITY),
        ] {
            if value.len() >= capacity {
                return Err(Error::FieldTooLong {
                    field,
                    len: value.len(),
                    max: capacity - 1,
                });
            }
        }
        Ok(())
    }
}
