use std::sync::Arc;

use nalgebra::{IsometryMatrix3, Point2, Point3};
use rayon::prelude::*;

use crate::{
    AlignedFrame, AlignmentConfig, CalibError, CalibrationSet, CancellationToken, Derivation,
    FrameSet, ImageView, PixelFormat, Result, StreamIntrinsics, StreamType,
};

/// Everything needed to map pixels of `source` into `target`.
#[derive(Debug, Clone)]
pub struct AlignmentMapping {
    source: StreamType,
    target: StreamType,
    source_intrinsics: StreamIntrinsics,
    target_intrinsics: StreamIntrinsics,
    transform: IsometryMatrix3<f64>,
}

impl AlignmentMapping {
    #[inline]
    pub fn source(&self) -> StreamType {
        self.source
    }

    #[inline]
    pub fn target(&self) -> StreamType {
        self.target
    }

    #[inline]
    pub fn source_intrinsics(&self) -> &StreamIntrinsics {
        &self.source_intrinsics
    }

    #[inline]
    pub fn target_intrinsics(&self) -> &StreamIntrinsics {
        &self.target_intrinsics
    }

    /// Transform from the source camera space to the target camera space.
    #[inline]
    pub fn transform(&self) -> &IsometryMatrix3<f64> {
        &self.transform
    }

    /// Move a point from source camera space into target camera space.
    pub fn map_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.transform * point
    }

    /// Deproject a source pixel at `depth` meters, transform it and project
    /// it into the target image. The result may lie outside the target image.
    pub fn map_pixel(&self, pixel: &Point2<f64>, depth: f64) -> Result<Point2<f64>> {
        let point = self.source_intrinsics.deproject(pixel, depth)?;
        self.target_intrinsics.project(&self.map_point(&point))
    }
}

/// Synthesizes aligned streams from a calibration snapshot.
#[derive(Debug, Clone)]
pub struct Resolver {
    calibration: Arc<CalibrationSet>,
    config: AlignmentConfig,
}

impl Resolver {
    /// Depth units and the invalid sentinel are taken from `config`. The
    /// distortion limits are those the calibration set was built with.
    pub fn new(calibration: Arc<CalibrationSet>, config: AlignmentConfig) -> Self {
        Self {
            calibration,
            config,
        }
    }

    #[inline]
    pub fn calibration(&self) -> &Arc<CalibrationSet> {
        &self.calibration
    }

    #[inline]
    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    pub fn resolve(&self, source: StreamType, target: StreamType) -> Result<AlignmentMapping> {
        let cal = &self.calibration;
        let source_intrinsics = cal.stream_intrinsics(source)?.clone();
        let target_intrinsics = cal.stream_intrinsics(target)?.clone();
        let transform = cal.transform(source, target)?;
        Ok(AlignmentMapping {
            source,
            target,
            source_intrinsics,
            target_intrinsics,
            transform,
        })
    }

    /// Depth in meters of a raw sample, `None` for missing measurements.
    pub fn depth_meters(&self, raw: u16, format: PixelFormat) -> Option<f64> {
        if raw == self.config.invalid_depth {
            return None;
        }
        let meters = match format {
            PixelFormat::Z16 => f64::from(raw) * self.config.depth_scale,
            PixelFormat::Disparity16 => {
                if raw == 0 {
                    return None;
                }
                self.config.disparity_scale / f64::from(raw)
            }
            _ => return None,
        };
        if meters.is_finite() && meters > 0.0 {
            Some(meters)
        } else {
            None
        }
    }

    /// Compute the synthetic stream `target` from the native frames in
    /// `frames`.
    pub fn synthesize(
        &self,
        target: StreamType,
        frames: &FrameSet<'_>,
        cancel: &CancellationToken,
    ) -> Result<AlignedFrame> {
        let derivation = target
            .derivation()
            .ok_or(CalibError::NotSynthetic(target))?;
        let out = match derivation {
            Derivation::PointCloud { depth } => self.point_cloud(depth, frames, cancel)?,
            Derivation::Rectify { source } => self.rectify(source, target, frames, cancel)?,
            Derivation::Align { values, grid } if values == StreamType::Depth => {
                self.align_depth_to(grid, frames, cancel)?
            }
            Derivation::Align { values, grid } => {
                self.align_to_depth(values, grid, frames, cancel)?
            }
        };
        tracing::trace!(
            "synthesized {target}: {} of {} pixels invalid",
            out.valid.len() - out.valid_count(),
            out.valid.len()
        );
        Ok(out)
    }

    /// A depth frame checked against its intrinsics.
    fn depth_frame<'a>(
        &self,
        stream: StreamType,
        frames: &'a FrameSet<'a>,
    ) -> Result<(&'a ImageView<'a>, &StreamIntrinsics)> {
        let view = frames.get(stream)?;
        if !matches!(view.format(), PixelFormat::Z16 | PixelFormat::Disparity16) {
            return Err(CalibError::UnsupportedPixelFormat(view.format()));
        }
        let intr = self.calibration.stream_intrinsics(stream)?;
        check_dimensions(view, intr)?;
        Ok((view, intr))
    }

    /// A frame whose pixels are copied into the output.
    fn value_frame<'a>(
        &self,
        stream: StreamType,
        frames: &'a FrameSet<'a>,
    ) -> Result<(&'a ImageView<'a>, &StreamIntrinsics, usize)> {
        let view = frames.get(stream)?;
        // yuyv shares chroma between pixel pairs, a single pixel cannot be
        // copied on its own.
        if view.format() == PixelFormat::Yuyv {
            return Err(CalibError::UnsupportedPixelFormat(view.format()));
        }
        let bpp = view.bytes_per_pixel()?;
        let intr = self.calibration.stream_intrinsics(stream)?;
        check_dimensions(view, intr)?;
        Ok((view, intr, bpp))
    }

    fn point_cloud(
        &self,
        depth: StreamType,
        frames: &FrameSet<'_>,
        cancel: &CancellationToken,
    ) -> Result<AlignedFrame> {
        let (view, intr) = self.depth_frame(depth, frames)?;
        let (w, h) = (view.width(), view.height());
        let mut out = AlignedFrame::empty(w, h, PixelFormat::Xyz32f)?;
        let pitch = out.info.pitch();
        let format = view.format();

        out.data
            .par_chunks_mut(pitch)
            .zip(out.valid.par_chunks_mut(w))
            .enumerate()
            .try_for_each(|(y, (row, valid))| -> Result<()> {
                cancel.check()?;
                for x in 0..w {
                    let Some(meters) = self.depth_meters(view.u16_at(x, y), format) else {
                        continue;
                    };
                    let pixel = Point2::new(x as f64, y as f64);
                    let Ok(p) = intr.deproject(&pixel, meters) else {
                        continue;
                    };
                    let dest = &mut row[x * 12..(x + 1) * 12];
                    dest[0..4].copy_from_slice(&(p.x as f32).to_le_bytes());
                    dest[4..8].copy_from_slice(&(p.y as f32).to_le_bytes());
                    dest[8..12].copy_from_slice(&(p.z as f32).to_le_bytes());
                    valid[x] = true;
                }
                Ok(())
            })?;
        Ok(out)
    }

    /// Forward map every valid depth pixel into the grid of `grid`. When
    /// several depth pixels land on the same target pixel the nearest one
    /// wins.
    fn align_depth_to(
        &self,
        grid: StreamType,
        frames: &FrameSet<'_>,
        cancel: &CancellationToken,
    ) -> Result<AlignedFrame> {
        let (view, _) = self.depth_frame(StreamType::Depth, frames)?;
        let mapping = self.resolve(StreamType::Depth, grid)?;
        let target = mapping.target_intrinsics();
        let (tw, th) = (target.width(), target.height());
        let (sw, sh) = (view.width(), view.height());
        let format = view.format();

        let rows: Vec<Vec<Candidate>> = (0..sh)
            .into_par_iter()
            .map(|y| -> Result<Vec<Candidate>> {
                cancel.check()?;
                let mut row = Vec::new();
                for x in 0..sw {
                    let raw = view.u16_at(x, y);
                    let Some(meters) = self.depth_meters(raw, format) else {
                        continue;
                    };
                    let Ok(pixel) = mapping.map_pixel(&Point2::new(x as f64, y as f64), meters)
                    else {
                        continue;
                    };
                    if let Some((tx, ty)) = nearest_pixel(&pixel, tw, th) {
                        row.push(Candidate {
                            target: ty * tw + tx,
                            meters,
                            source: y * sw + x,
                            raw,
                        });
                    }
                }
                Ok(row)
            })
            .collect::<Result<_>>()?;

        let mut best: Vec<Option<Candidate>> = vec![None; tw * th];
        for candidate in rows.into_iter().flatten() {
            let replace = match &best[candidate.target] {
                Some(current) => candidate.is_nearer_than(current),
                None => true,
            };
            if replace {
                best[candidate.target] = Some(candidate);
            }
        }

        let mut out = AlignedFrame::empty(tw, th, format)?;
        let pitch = out.info.pitch();
        for (index, candidate) in best.iter().enumerate() {
            if let Some(c) = candidate {
                let (x, y) = (index % tw, index / tw);
                let offset = y * pitch + x * 2;
                out.data[offset..offset + 2].copy_from_slice(&c.raw.to_le_bytes());
                out.valid[index] = true;
            }
        }
        Ok(out)
    }

    /// For every valid depth pixel, sample `values` where that point is seen.
    fn align_to_depth(
        &self,
        values: StreamType,
        grid: StreamType,
        frames: &FrameSet<'_>,
        cancel: &CancellationToken,
    ) -> Result<AlignedFrame> {
        let (depth_view, _) = self.depth_frame(grid, frames)?;
        let (value_view, _, bpp) = self.value_frame(values, frames)?;
        let mapping = self.resolve(grid, values)?;
        let (w, h) = (depth_view.width(), depth_view.height());
        let (vw, vh) = (value_view.width(), value_view.height());
        let depth_format = depth_view.format();

        let mut out = AlignedFrame::empty(w, h, value_view.format())?;
        let pitch = out.info.pitch();
        out.data
            .par_chunks_mut(pitch)
            .zip(out.valid.par_chunks_mut(w))
            .enumerate()
            .try_for_each(|(y, (row, valid))| -> Result<()> {
                cancel.check()?;
                for x in 0..w {
                    let Some(meters) = self.depth_meters(depth_view.u16_at(x, y), depth_format)
                    else {
                        continue;
                    };
                    let Ok(pixel) = mapping.map_pixel(&Point2::new(x as f64, y as f64), meters)
                    else {
                        continue;
                    };
                    if let Some((vx, vy)) = nearest_pixel(&pixel, vw, vh) {
                        row[x * bpp..(x + 1) * bpp]
                            .copy_from_slice(value_view.bytes_at(vx, vy, bpp));
                        valid[x] = true;
                    }
                }
                Ok(())
            })?;
        Ok(out)
    }

    /// Resample `source` through the distortion free intrinsics of `target`,
    /// rotating each viewing ray into the source frame.
    fn rectify(
        &self,
        source: StreamType,
        target: StreamType,
        frames: &FrameSet<'_>,
        cancel: &CancellationToken,
    ) -> Result<AlignedFrame> {
        let (view, source_intr, bpp) = self.value_frame(source, frames)?;
        let rectified = self.calibration.stream_intrinsics(target)?;
        let rotation = self.calibration.transform(target, source)?.rotation;
        let (w, h) = (rectified.width(), rectified.height());
        let (sw, sh) = (view.width(), view.height());

        let mut out = AlignedFrame::empty(w, h, view.format())?;
        let pitch = out.info.pitch();
        out.data
            .par_chunks_mut(pitch)
            .zip(out.valid.par_chunks_mut(w))
            .enumerate()
            .try_for_each(|(y, (row, valid))| -> Result<()> {
                cancel.check()?;
                for x in 0..w {
                    let Ok(ray) = rectified.deproject(&Point2::new(x as f64, y as f64), 1.0) else {
                        continue;
                    };
                    let Ok(pixel) = source_intr.project(&(rotation * ray)) else {
                        continue;
                    };
                    if let Some((sx, sy)) = nearest_pixel(&pixel, sw, sh) {
                        row[x * bpp..(x + 1) * bpp].copy_from_slice(view.bytes_at(sx, sy, bpp));
                        valid[x] = true;
                    }
                }
                Ok(())
            })?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Row-major index in the target image.
    target: usize,
    meters: f64,
    /// Row-major index in the source image.
    source: usize,
    raw: u16,
}

impl Candidate {
    /// Nearer depth wins, ties go to the earlier source pixel.
    fn is_nearer_than(&self, other: &Candidate) -> bool {
        self.meters < other.meters || (self.meters == other.meters && self.source < other.source)
    }
}

/// Integer pixel nearest to `pixel`, if inside a `width` x `height` image.
fn nearest_pixel(pixel: &Point2<f64>, width: usize, height: usize) -> Option<(usize, usize)> {
    let (x, y) = (pixel.x.round(), pixel.y.round());
    if x >= 0.0 && y >= 0.0 && x < width as f64 && y < height as f64 {
        Some((x as usize, y as usize))
    } else {
        None
    }
}

fn check_dimensions(view: &ImageView<'_>, intr: &StreamIntrinsics) -> Result<()> {
    if view.width() != intr.width() || view.height() != intr.height() {
        return Err(CalibError::InvalidDimensions {
            width: view.width() as i64,
            height: view.height() as i64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Extrinsics, ImageInfo, Intrinsics};
    use nalgebra::Vector3;

    fn depth_bytes(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn small(width: i32, height: i32) -> Intrinsics {
        Intrinsics::pinhole(
            width,
            height,
            10.0,
            10.0,
            (width / 2) as f32,
            (height / 2) as f32,
        )
    }

    fn resolver(cal: CalibrationSet) -> Resolver {
        Resolver::new(Arc::new(cal), AlignmentConfig::default())
    }

    #[test]
    fn test_depth_meters() {
        let r = resolver(CalibrationSet::builder().build(&AlignmentConfig::default()).unwrap());
        assert_eq!(r.depth_meters(0, PixelFormat::Z16), None);
        assert_eq!(r.depth_meters(1500, PixelFormat::Z16), Some(1.5));
        assert_eq!(r.depth_meters(4, PixelFormat::Disparity16), Some(0.25));
        assert_eq!(r.depth_meters(4, PixelFormat::Rgb8), None);

        let config = AlignmentConfig {
            invalid_depth: 65535,
            ..Default::default()
        };
        let r = Resolver::new(r.calibration().clone(), config);
        assert_eq!(r.depth_meters(65535, PixelFormat::Z16), None);
        assert_eq!(r.depth_meters(0, PixelFormat::Disparity16), None);
    }

    #[test]
    fn test_nearest_wins() {
        // The color camera sits 1 m further back and sees both depth pixels
        // of the same row on one pixel at its principal point.
        let depth = Intrinsics::pinhole(2, 1, 1.0, 1.0, 0.5, 0.0);
        let color = Intrinsics::pinhole(1, 1, 1e-6, 1e-6, 0.0, 0.0);
        let cal = CalibrationSet::builder()
            .intrinsics(StreamType::Depth, depth)
            .intrinsics(StreamType::Color, color)
            .extrinsics(
                StreamType::Depth,
                StreamType::Color,
                Extrinsics::from_parts(&nalgebra::Matrix3::identity(), &Vector3::new(0.0, 0.0, 1.0)),
            )
            .build(&AlignmentConfig::default())
            .unwrap();
        let r = resolver(cal);
        let buf = depth_bytes(&[3000, 2000]);
        let view = ImageView::new(ImageInfo::packed(2, 1, PixelFormat::Z16).unwrap(), &buf).unwrap();
        let frames = FrameSet::new().with(StreamType::Depth, view).unwrap();
        let out = r
            .synthesize(StreamType::DepthAlignedToColor, &frames, &CancellationToken::new())
            .unwrap();
        assert_eq!(out.u16_at(0, 0), Some(2000));
        assert!(out.is_valid(0, 0));
    }

    #[test]
    fn test_point_cloud() {
        let cal = CalibrationSet::builder()
            .intrinsics(StreamType::Depth, small(4, 2))
            .build(&AlignmentConfig::default())
            .unwrap();
        let r = resolver(cal);
        let buf = depth_bytes(&[1000, 0, 2000, 1000, 1000, 1000, 1000, 0]);
        let view = ImageView::new(ImageInfo::packed(4, 2, PixelFormat::Z16).unwrap(), &buf).unwrap();
        let frames = FrameSet::new().with(StreamType::Depth, view).unwrap();
        let out = r
            .synthesize(StreamType::Points, &frames, &CancellationToken::new())
            .unwrap();
        assert_eq!(out.info.format, PixelFormat::Xyz32f);
        assert_eq!(out.valid_count(), 6);
        assert!(!out.is_valid(1, 0));
        assert_eq!(out.xyz_at(1, 0), Some([0.0, 0.0, 0.0]));
        // principal point at (2, 1)
        assert_eq!(out.xyz_at(2, 1), Some([0.0, 0.0, 1.0]));
        assert_eq!(out.xyz_at(2, 0), Some([0.0, -0.2, 2.0]));
    }

    #[test]
    fn test_not_synthetic() {
        let r = resolver(CalibrationSet::builder().build(&AlignmentConfig::default()).unwrap());
        assert!(matches!(
            r.synthesize(StreamType::Color, &FrameSet::new(), &CancellationToken::new()),
            Err(CalibError::NotSynthetic(StreamType::Color))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let cal = CalibrationSet::builder()
            .intrinsics(StreamType::Depth, small(4, 2))
            .build(&AlignmentConfig::default())
            .unwrap();
        let r = resolver(cal);
        let buf = depth_bytes(&[1000; 6]);
        let view = ImageView::new(ImageInfo::packed(3, 2, PixelFormat::Z16).unwrap(), &buf).unwrap();
        let frames = FrameSet::new().with(StreamType::Depth, view).unwrap();
        assert!(matches!(
            r.synthesize(StreamType::Points, &frames, &CancellationToken::new()),
            Err(CalibError::InvalidDimensions {
                width: 3,
                height: 2
            })
        ));
    }
}
