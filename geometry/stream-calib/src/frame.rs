//! Borrowed input frames, synthesized output frames and cancellation.
//!
//! Multi-byte samples (`z16`, `disparity16`, `y16`, `xyz32f`, ...) are stored
//! little-endian.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{CalibError, ImageInfo, PixelFormat, Result, StreamType};

/// A frame buffer owned by the caller.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    info: ImageInfo,
    data: &'a [u8],
}

impl<'a> ImageView<'a> {
    /// Wrap `data`, checking that it covers the layout described by `info`.
    pub fn new(info: ImageInfo, data: &'a [u8]) -> Result<Self> {
        info.validate()?;
        let required = info.required_len();
        if data.len() < required {
            return Err(CalibError::BufferTooSmall {
                len: data.len(),
                required,
            });
        }
        Ok(Self { info, data })
    }

    #[inline]
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.info.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.info.height()
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.info.format
    }

    pub fn bytes_per_pixel(&self) -> Result<usize> {
        self.info
            .format
            .bytes_per_pixel()
            .ok_or(CalibError::UnsupportedPixelFormat(self.info.format))
    }

    /// Bytes of pixel `(x, y)`, honouring the row pitch.
    pub fn pixel(&self, x: usize, y: usize) -> Result<Option<&'a [u8]>> {
        let bpp = self.bytes_per_pixel()?;
        Ok(self
            .info
            .byte_offset(x, y)?
            .map(|offset| &self.data[offset..offset + bpp]))
    }

    /// 16 bit sample at `(x, y)`. The caller guarantees that the format has
    /// two bytes per pixel and the position is inside the image.
    #[inline]
    pub(crate) fn u16_at(&self, x: usize, y: usize) -> u16 {
        let offset = y * self.info.pitch() + x * 2;
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Pixel bytes at `(x, y)` for a format with `bpp` bytes per pixel,
    /// without bounds checks beyond slice indexing.
    #[inline]
    pub(crate) fn bytes_at(&self, x: usize, y: usize, bpp: usize) -> &'a [u8] {
        let offset = y * self.info.pitch() + x * bpp;
        &self.data[offset..offset + bpp]
    }
}

/// Input frames of one capture, by stream.
#[derive(Debug, Clone, Default)]
pub struct FrameSet<'a> {
    frames: BTreeMap<StreamType, ImageView<'a>>,
}

impl<'a> FrameSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the frame of `stream`. Its pixel format must suit the stream.
    pub fn insert(&mut self, stream: StreamType, view: ImageView<'a>) -> Result<()> {
        if !view.format().is_compatible_with(stream) {
            return Err(CalibError::InconsistentPixelFormat {
                stream,
                format: view.format(),
            });
        }
        self.frames.insert(stream, view);
        Ok(())
    }

    pub fn with(mut self, stream: StreamType, view: ImageView<'a>) -> Result<Self> {
        self.insert(stream, view)?;
        Ok(self)
    }

    pub fn get(&self, stream: StreamType) -> Result<&ImageView<'a>> {
        self.frames
            .get(&stream)
            .ok_or(CalibError::MissingFrame(stream))
    }

    pub fn streams(&self) -> impl Iterator<Item = StreamType> + '_ {
        self.frames.keys().copied()
    }
}

/// A synthesized frame with per-pixel validity.
///
/// Invalid pixels (holes) have all bytes zero.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFrame {
    pub info: ImageInfo,
    pub data: Vec<u8>,
    /// Row-major, one entry per pixel.
    pub valid: Vec<bool>,
}

impl AlignedFrame {
    /// A packed frame with every pixel invalid.
    pub(crate) fn empty(width: usize, height: usize, format: PixelFormat) -> Result<Self> {
        let (w, h) = match (i32::try_from(width), i32::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(CalibError::InvalidDimensions {
                    width: width as i64,
                    height: height as i64,
                })
            }
        };
        let info = ImageInfo::packed(w, h, format)?;
        Ok(Self {
            data: vec![0; info.required_len()],
            valid: vec![false; width * height],
            info,
        })
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            info: self.info,
            data: &self.data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.info.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.info.height()
    }

    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        x < self.width() && y < self.height() && self.valid[y * self.width() + x]
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    pub fn valid_fraction(&self) -> f64 {
        if self.valid.is_empty() {
            0.0
        } else {
            self.valid_count() as f64 / self.valid.len() as f64
        }
    }

    /// Depth or other 16 bit sample at `(x, y)`.
    pub fn u16_at(&self, x: usize, y: usize) -> Option<u16> {
        if self.info.format.bytes_per_pixel() != Some(2) {
            return None;
        }
        let bytes = self.view().pixel(x, y).ok()??;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Point of an `xyz32f` frame at `(x, y)`.
    pub fn xyz_at(&self, x: usize, y: usize) -> Option<[f32; 3]> {
        if self.info.format != PixelFormat::Xyz32f {
            return None;
        }
        let b = self.view().pixel(x, y).ok()??;
        let f = |i: usize| f32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        Some([f(0), f(4), f(8)])
    }
}

/// Cooperative cancellation of frame synthesis, checked once per row.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CalibError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_checks_length() {
        let info = ImageInfo::packed(4, 2, PixelFormat::Z16).unwrap();
        let buf = vec![0u8; 15];
        assert!(matches!(
            ImageView::new(info, &buf),
            Err(CalibError::BufferTooSmall {
                len: 15,
                required: 16
            })
        ));
        let buf = vec![0u8; 16];
        ImageView::new(info, &buf).unwrap();
    }

    #[test]
    fn test_view_honours_pitch() {
        let info = ImageInfo {
            width: 2,
            height: 2,
            format: PixelFormat::Z16,
            pitch: 8,
        };
        let mut buf = vec![0u8; 12];
        buf[8..10].copy_from_slice(&513u16.to_le_bytes());
        let view = ImageView::new(info, &buf).unwrap();
        assert_eq!(view.u16_at(0, 1), 513);
        assert_eq!(view.pixel(0, 1).unwrap(), Some(&buf[8..10]));
        assert_eq!(view.pixel(2, 1).unwrap(), None);
    }

    #[test]
    fn test_frame_set_format_check() {
        let info = ImageInfo::packed(2, 2, PixelFormat::Rgb8).unwrap();
        let buf = vec![0u8; 12];
        let view = ImageView::new(info, &buf).unwrap();
        let mut frames = FrameSet::new();
        assert!(matches!(
            frames.insert(StreamType::Depth, view),
            Err(CalibError::InconsistentPixelFormat { .. })
        ));
        frames.insert(StreamType::Color, view).unwrap();
        assert!(frames.get(StreamType::Color).is_ok());
        assert!(matches!(
            frames.get(StreamType::Depth),
            Err(CalibError::MissingFrame(StreamType::Depth))
        ));
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(CalibError::Cancelled)));
    }
}
