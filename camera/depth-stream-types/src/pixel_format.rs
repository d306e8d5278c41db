//! Pixel encodings of stream data.

use crate::StreamType;

crate::define_int_enum! {
    /// Runtime description of a pixel encoding.
    PixelFormat {
        /// Unspecified, used when requesting a stream in whatever format the
        /// device prefers.
        Any = 0 => "any",
        /// 16 bit linear depth values. Depth in meters is the depth scale
        /// times the pixel value.
        Z16 = 1 => "z16",
        /// 16 bit linear disparity values. Depth in meters is the disparity scale
        /// divided by the pixel value.
        Disparity16 = 2 => "disparity16",
        /// 32 bit floating point 3D coordinates, 12 bytes per pixel.
        Xyz32f = 3 => "xyz32f",
        /// YUV 4:2:2, 2 bytes per pixel.
        Yuyv = 4 => "yuyv",
        Rgb8 = 5 => "rgb8",
        Bgr8 = 6 => "bgr8",
        Rgba8 = 7 => "rgba8",
        Bgra8 = 8 => "bgra8",
        /// Luminance, 1 byte per pixel.
        Y8 = 9 => "y8",
        /// Luminance, 2 bytes per pixel.
        Y16 = 10 => "y16",
        Raw8 = 11 => "raw8",
        /// Four 10-bit luminance values encoded into a 5-byte macropixel.
        Raw10 = 12 => "raw10",
        Raw16 = 13 => "raw16",
    }
}

impl PixelFormat {
    /// The average number of bits per pixel.
    pub const fn bits_per_pixel(&self) -> u8 {
        use PixelFormat::*;
        match self {
            Any => 0,
            Z16 | Disparity16 | Yuyv | Y16 | Raw16 => 16,
            Xyz32f => 96,
            Rgb8 | Bgr8 => 24,
            Rgba8 | Bgra8 => 32,
            Y8 | Raw8 => 8,
            Raw10 => 10,
        }
    }

    /// Bytes per pixel, if every pixel occupies a whole number of bytes.
    ///
    /// `None` for [`PixelFormat::Any`] and the packed [`PixelFormat::Raw10`].
    pub const fn bytes_per_pixel(&self) -> Option<usize> {
        let bits = self.bits_per_pixel();
        if bits == 0 || bits % 8 != 0 {
            None
        } else {
            Some(bits as usize / 8)
        }
    }

    /// Minimal number of bytes for one row of `width` pixels.
    pub const fn min_row_bytes(&self, width: usize) -> usize {
        (width * self.bits_per_pixel() as usize).div_ceil(8)
    }

    /// Whether data of this format can be carried by `stream`.
    ///
    /// [`PixelFormat::Any`] is compatible with every stream.
    pub fn is_compatible_with(&self, stream: StreamType) -> bool {
        use PixelFormat::*;
        if *self == Any {
            return true;
        }
        if stream == StreamType::Points {
            return *self == Xyz32f;
        }
        match stream.value_source() {
            StreamType::Depth => matches!(self, Z16 | Disparity16),
            StreamType::Color => matches!(
                self,
                Yuyv | Rgb8 | Bgr8 | Rgba8 | Bgra8 | Raw8 | Raw10 | Raw16
            ),
            StreamType::Infrared | StreamType::Infrared2 => {
                matches!(self, Y8 | Y16 | Raw8 | Raw10 | Raw16)
            }
            StreamType::Fisheye => matches!(self, Raw8 | Y8),
            // value_source() only returns native streams
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_roundtrip() {
        for fmt in PixelFormat::variants() {
            let fmt2: PixelFormat = fmt.as_str().parse().unwrap();
            assert_eq!(*fmt, fmt2);
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(PixelFormat::Z16.bytes_per_pixel(), Some(2));
        assert_eq!(PixelFormat::Xyz32f.bytes_per_pixel(), Some(12));
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Raw10.bytes_per_pixel(), None);
        assert_eq!(PixelFormat::Any.bytes_per_pixel(), None);
        // 4 pixels in a 5 byte macropixel
        assert_eq!(PixelFormat::Raw10.min_row_bytes(8), 10);
    }

    #[test]
    fn test_compatibility() {
        use PixelFormat::*;
        assert!(Xyz32f.is_compatible_with(StreamType::Points));
        assert!(!Z16.is_compatible_with(StreamType::Points));
        assert!(Z16.is_compatible_with(StreamType::Depth));
        assert!(Disparity16.is_compatible_with(StreamType::DepthAlignedToInfrared2));
        assert!(Rgb8.is_compatible_with(StreamType::ColorAlignedToDepth));
        assert!(Rgb8.is_compatible_with(StreamType::RectifiedColor));
        assert!(!Rgb8.is_compatible_with(StreamType::Infrared));
        assert!(Y8.is_compatible_with(StreamType::Infrared2AlignedToDepth));
        assert!(!Xyz32f.is_compatible_with(StreamType::Depth));
        for stream in StreamType::variants() {
            assert!(Any.is_compatible_with(*stream));
        }
    }
}
