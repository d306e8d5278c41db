use serde::{Deserialize, Serialize};

use crate::{Error, PixelFormat, Result};

/// Memory layout of a frame buffer.
///
/// `pitch` is the number of bytes between the starts of two consecutive rows
/// (also called stride). It may exceed the bytes needed for `width` pixels
/// when rows are padded; every pixel address computation must use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct ImageInfo {
    pub width: i32,
    pub height: i32,
    pub format: PixelFormat,
    pub pitch: i32,
}

impl ImageInfo {
    /// Layout without row padding.
    pub fn packed(width: i32, height: i32, format: PixelFormat) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        let pitch = format.min_row_bytes(width as usize);
        let pitch = i32::try_from(pitch).map_err(|_| Error::InvalidDimensions { width, height })?;
        Ok(Self {
            width,
            height,
            format,
            pitch,
        })
    }

    /// Check that dimensions are positive and each row fits in `pitch`.
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let min_pitch = self.min_pitch();
        if self.pitch < 0 || (self.pitch as usize) < min_pitch {
            return Err(Error::PitchTooSmall {
                pitch: self.pitch,
                min_pitch,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width.max(0) as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height.max(0) as usize
    }

    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch.max(0) as usize
    }

    /// Bytes needed for one row of pixels, ignoring padding.
    pub fn min_pitch(&self) -> usize {
        self.format.min_row_bytes(self.width())
    }

    /// Minimal length of a buffer holding this image. The final row need not
    /// be padded.
    pub fn required_len(&self) -> usize {
        match self.height() {
            0 => 0,
            h => self.pitch() * (h - 1) + self.min_pitch(),
        }
    }

    /// Byte offset of pixel `(x, y)`, or `None` if outside the image.
    pub fn byte_offset(&self, x: usize, y: usize) -> Result<Option<usize>> {
        let bpp = self
            .format
            .bytes_per_pixel()
            .ok_or(Error::NotByteAddressable(self.format))?;
        if x >= self.width() || y >= self.height() {
            return Ok(None);
        }
        Ok(Some(y * self.pitch() + x * bpp))
    }
}
