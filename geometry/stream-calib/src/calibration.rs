use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use nalgebra::{IsometryMatrix3, Rotation3, Translation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    AlignmentConfig, CalibError, Derivation, DeviceInfo, Extrinsics, Intrinsics,
    MotionDeviceIntrinsics, MotionSample, MotionType, Result, StreamIntrinsics, StreamType,
};

/// One supplied transform in a [`CalibrationFile`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtrinsicsEntry {
    pub from: StreamType,
    pub to: StreamType,
    /// Column-major rotation.
    pub rotation: [f32; 9],
    pub translation: [f32; 3],
}

impl ExtrinsicsEntry {
    pub fn new(from: StreamType, to: StreamType, extrinsics: &Extrinsics) -> Self {
        Self {
            from,
            to,
            rotation: extrinsics.rotation,
            translation: extrinsics.translation,
        }
    }

    pub fn extrinsics(&self) -> Extrinsics {
        Extrinsics {
            rotation: self.rotation,
            translation: self.translation,
        }
    }
}

/// Serialized form of a device calibration, stored as YAML or JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationFile {
    #[serde(default)]
    pub device: DeviceInfo,
    #[serde(default)]
    pub intrinsics: BTreeMap<StreamType, Intrinsics>,
    #[serde(default)]
    pub extrinsics: Vec<ExtrinsicsEntry>,
    #[serde(default)]
    pub motion: BTreeMap<MotionType, MotionDeviceIntrinsics>,
}

impl CalibrationFile {
    pub fn into_builder(self) -> CalibrationSetBuilder {
        let mut builder = CalibrationSetBuilder::new().device(self.device);
        for (stream, intrinsics) in self.intrinsics {
            builder = builder.intrinsics(stream, intrinsics);
        }
        for entry in self.extrinsics {
            builder = builder.extrinsics(entry.from, entry.to, entry.extrinsics());
        }
        for (motion_type, motion) in self.motion {
            builder = builder.motion(motion_type, motion);
        }
        builder
    }
}

/// Collects calibration supplied by a device or file. Nothing is checked
/// until [`CalibrationSetBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct CalibrationSetBuilder {
    device: DeviceInfo,
    intrinsics: BTreeMap<StreamType, Intrinsics>,
    extrinsics: Vec<ExtrinsicsEntry>,
    motion: BTreeMap<MotionType, MotionDeviceIntrinsics>,
}

impl CalibrationSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    pub fn intrinsics(mut self, stream: StreamType, intrinsics: Intrinsics) -> Self {
        self.intrinsics.insert(stream, intrinsics);
        self
    }

    /// Add the transform from `from`'s camera space to `to`'s camera space.
    /// The opposite direction is implied.
    pub fn extrinsics(mut self, from: StreamType, to: StreamType, extrinsics: Extrinsics) -> Self {
        self.extrinsics
            .push(ExtrinsicsEntry::new(from, to, &extrinsics));
        self
    }

    pub fn motion(mut self, motion_type: MotionType, intrinsics: MotionDeviceIntrinsics) -> Self {
        self.motion.insert(motion_type, intrinsics);
        self
    }

    /// Validate everything and derive the rectified color calibration.
    pub fn build(self, config: &AlignmentConfig) -> Result<CalibrationSet> {
        self.device.validate()?;

        let mut intrinsics = BTreeMap::new();
        for (stream, intr) in self.intrinsics.iter() {
            if !has_own_frame(*stream) {
                return Err(CalibError::DerivedCalibration(*stream));
            }
            intrinsics.insert(*stream, StreamIntrinsics::new(intr, config.distortion)?);
        }

        let mut set = CalibrationSet {
            device: self.device,
            intrinsics,
            edges: BTreeMap::new(),
            supplied_intrinsics: self.intrinsics,
            supplied: Vec::new(),
            motion: self.motion,
            config: config.clone(),
        };

        for entry in self.extrinsics.into_iter() {
            for stream in [entry.from, entry.to] {
                if !has_own_frame(stream) {
                    return Err(CalibError::DerivedCalibration(stream));
                }
            }
            let iso = entry.extrinsics().to_isometry(config.rotation_tolerance)?;
            set.add_edge(entry.from, entry.to, iso);
            set.supplied.push(entry);
        }

        set.derive_rectified_color(config)?;

        tracing::debug!(
            "built calibration for device \"{}\": {} streams, {} extrinsics, {} motion sensors",
            set.device.name,
            set.intrinsics.len(),
            set.supplied.len(),
            set.motion.len(),
        );
        Ok(set)
    }
}

/// True for streams that have their own intrinsics and camera space.
fn has_own_frame(stream: StreamType) -> bool {
    stream.is_native() || stream == StreamType::RectifiedColor
}

#[derive(Debug, Clone)]
struct Edge {
    to: StreamType,
    transform: IsometryMatrix3<f64>,
}

/// Validated, immutable calibration of one device session.
///
/// Share it as `Arc<CalibrationSet>`. When a device reports new calibration,
/// build a new set and publish it with a [`CalibrationPublisher`].
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    device: DeviceInfo,
    intrinsics: BTreeMap<StreamType, StreamIntrinsics>,
    /// Every supplied transform and its inverse, keyed by the source frame.
    edges: BTreeMap<StreamType, Vec<Edge>>,
    supplied_intrinsics: BTreeMap<StreamType, Intrinsics>,
    supplied: Vec<ExtrinsicsEntry>,
    motion: BTreeMap<MotionType, MotionDeviceIntrinsics>,
    config: AlignmentConfig,
}

impl CalibrationSet {
    pub fn builder() -> CalibrationSetBuilder {
        CalibrationSetBuilder::new()
    }

    pub fn from_file(file: CalibrationFile, config: &AlignmentConfig) -> Result<Self> {
        file.into_builder().build(config)
    }

    pub fn from_yaml_reader<R: std::io::Read>(rdr: R, config: &AlignmentConfig) -> Result<Self> {
        let file: CalibrationFile = serde_yaml::from_reader(rdr)?;
        Self::from_file(file, config)
    }

    pub fn from_json_reader<R: std::io::Read>(rdr: R, config: &AlignmentConfig) -> Result<Self> {
        let file: CalibrationFile = serde_json::from_reader(rdr)?;
        Self::from_file(file, config)
    }

    /// Load a calibration file. Files ending in `.json` are read as JSON,
    /// everything else as YAML.
    pub fn from_path<P: AsRef<std::path::Path>>(path: P, config: &AlignmentConfig) -> Result<Self> {
        let path = path.as_ref();
        let rdr = std::io::BufReader::new(std::fs::File::open(path)?);
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let result = if is_json {
            Self::from_json_reader(rdr, config)
        } else {
            Self::from_yaml_reader(rdr, config)
        };
        if result.is_ok() {
            tracing::debug!("loaded calibration {}", path.display());
        }
        result
    }

    /// The calibration as supplied, excluding derived entries.
    pub fn to_file(&self) -> CalibrationFile {
        CalibrationFile {
            device: self.device.clone(),
            intrinsics: self.supplied_intrinsics.clone(),
            extrinsics: self.supplied.clone(),
            motion: self.motion.clone(),
        }
    }

    pub fn to_yaml_writer<W: std::io::Write>(&self, wtr: W) -> Result<()> {
        serde_yaml::to_writer(wtr, &self.to_file())?;
        Ok(())
    }

    #[inline]
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Streams with stored intrinsics, including derived rectified color.
    pub fn streams(&self) -> impl Iterator<Item = StreamType> + '_ {
        self.intrinsics.keys().copied()
    }

    /// Transforms as supplied, before inversion and composition.
    pub fn supplied_extrinsics(&self) -> &[ExtrinsicsEntry] {
        &self.supplied
    }

    pub fn motion_types(&self) -> impl Iterator<Item = (MotionType, &MotionDeviceIntrinsics)> + '_ {
        self.motion.iter().map(|(k, v)| (*k, v))
    }

    /// Intrinsics of any stream.
    ///
    /// Synthetic streams use the intrinsics of the grid they are sampled in:
    /// `points` those of depth, `X_aligned_to_Y` those of `Y`.
    pub fn stream_intrinsics(&self, stream: StreamType) -> Result<&StreamIntrinsics> {
        let grid = match stream.derivation() {
            Some(Derivation::PointCloud { depth }) => depth,
            Some(Derivation::Align { grid, .. }) => grid,
            Some(Derivation::Rectify { .. }) | None => stream,
        };
        self.intrinsics
            .get(&grid)
            .ok_or(CalibError::MissingCalibration {
                from: stream,
                to: stream,
            })
    }

    /// The stream whose camera space `stream` is expressed in.
    pub fn frame_of(&self, stream: StreamType) -> StreamType {
        match stream.derivation() {
            Some(Derivation::PointCloud { depth }) => depth,
            Some(Derivation::Align { grid, .. }) => self.frame_of(grid),
            Some(Derivation::Rectify { .. }) | None => stream,
        }
    }

    /// Rigid transform from the camera space of `from` to that of `to`.
    ///
    /// Transforms which were not supplied directly are composed through
    /// intermediate streams, using the shortest chain.
    pub fn transform(&self, from: StreamType, to: StreamType) -> Result<IsometryMatrix3<f64>> {
        let start = self.frame_of(from);
        let goal = self.frame_of(to);
        if start == goal {
            return Ok(IsometryMatrix3::identity());
        }

        let mut visited: BTreeMap<StreamType, (IsometryMatrix3<f64>, usize)> = BTreeMap::new();
        visited.insert(start, (IsometryMatrix3::identity(), 0));
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            let (acc, hops) = match visited.get(&node) {
                Some((acc, hops)) => (*acc, *hops),
                None => continue,
            };
            for edge in self.edges.get(&node).into_iter().flatten() {
                if visited.contains_key(&edge.to) {
                    continue;
                }
                let composed = edge.transform * acc;
                if edge.to == goal {
                    if hops > 0 {
                        tracing::debug!(
                            "composed {start} -> {goal} through {} intermediate streams",
                            hops
                        );
                    }
                    return Ok(composed);
                }
                visited.insert(edge.to, (composed, hops + 1));
                queue.push_back(edge.to);
            }
        }
        Err(CalibError::MissingCalibration { from, to })
    }

    /// Like [`CalibrationSet::transform`] but returned as an [`Extrinsics`]
    /// record.
    pub fn extrinsics(&self, from: StreamType, to: StreamType) -> Result<Extrinsics> {
        Ok(Extrinsics::from_isometry(&self.transform(from, to)?))
    }

    pub fn motion_intrinsics(&self, motion_type: MotionType) -> Result<&MotionDeviceIntrinsics> {
        self.motion
            .get(&motion_type)
            .ok_or(CalibError::MissingMotionCalibration(motion_type))
    }

    /// Correct a raw inertial sample. Timestamp, domain and flags are kept.
    pub fn correct_motion(&self, sample: &MotionSample) -> Result<MotionSample> {
        let intr = self.motion_intrinsics(sample.motion_type)?;
        let corrected: Vector3<f64> = intr.correct(&sample.vector());
        Ok(MotionSample {
            data: [corrected.x as f32, corrected.y as f32, corrected.z as f32],
            ..*sample
        })
    }

    fn add_edge(&mut self, from: StreamType, to: StreamType, transform: IsometryMatrix3<f64>) {
        if from == to {
            return;
        }
        self.edges.entry(from).or_default().push(Edge { to, transform });
        self.edges.entry(to).or_default().push(Edge {
            to: from,
            transform: transform.inverse(),
        });
    }

    fn is_rectified_color_derived(&self) -> bool {
        !self
            .supplied
            .iter()
            .any(|e| e.from == StreamType::RectifiedColor || e.to == StreamType::RectifiedColor)
    }

    /// Rectified color uses the color intrinsics without distortion. Its frame
    /// has the depth orientation and the color optical center.
    fn derive_rectified_color(&mut self, config: &AlignmentConfig) -> Result<()> {
        let Some(color) = self.intrinsics.get(&StreamType::Color) else {
            return Ok(());
        };
        if !self.intrinsics.contains_key(&StreamType::RectifiedColor) {
            let rectified = color.intrinsics().undistorted();
            self.intrinsics.insert(
                StreamType::RectifiedColor,
                StreamIntrinsics::new(&rectified, config.distortion)?,
            );
        }
        if self.is_rectified_color_derived() {
            if let Ok(depth_to_color) = self.transform(StreamType::Depth, StreamType::Color) {
                // Same optical center as color, so rectified -> color is a
                // pure rotation.
                let offset = depth_to_color.rotation.inverse() * depth_to_color.translation.vector;
                let depth_to_rectified =
                    IsometryMatrix3::from_parts(Translation3::from(offset), Rotation3::identity());
                self.add_edge(
                    StreamType::Depth,
                    StreamType::RectifiedColor,
                    depth_to_rectified,
                );
            }
        }
        Ok(())
    }
}

/// Holds the current calibration snapshot.
///
/// Readers take an `Arc` of the current snapshot and keep using it even if a
/// newer one is published meanwhile.
#[derive(Debug)]
pub struct CalibrationPublisher {
    current: RwLock<Arc<CalibrationSet>>,
}

impl CalibrationPublisher {
    pub fn new(initial: CalibrationSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn current(&self) -> Arc<CalibrationSet> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// Replace the snapshot, returning the previous one.
    pub fn publish(&self, next: CalibrationSet) -> Arc<CalibrationSet> {
        tracing::debug!("publishing calibration for device \"{}\"", next.device.name);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DistortionType;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Rotation3};

    fn color_intrinsics() -> Intrinsics {
        Intrinsics::pinhole(640, 480, 615.0, 615.0, 321.0, 239.0).with_distortion(
            DistortionType::InverseBrownConrady,
            [0.05, -0.1, 0.001, 0.0005, 0.02],
        )
    }

    fn depth_to_color() -> Extrinsics {
        Extrinsics::from_parts(
            Rotation3::from_euler_angles(0.01, -0.02, 0.005).matrix(),
            &Vector3::new(0.015, 0.0002, -0.0003),
        )
    }

    fn example() -> CalibrationSet {
        let depth = Intrinsics::pinhole(640, 480, 385.0, 385.0, 320.0, 240.0);
        CalibrationSet::builder()
            .intrinsics(StreamType::Depth, depth)
            .intrinsics(StreamType::Infrared2, depth)
            .intrinsics(StreamType::Color, color_intrinsics())
            .extrinsics(StreamType::Depth, StreamType::Color, depth_to_color())
            .extrinsics(
                StreamType::Infrared2,
                StreamType::Depth,
                Extrinsics::from_parts(
                    &nalgebra::Matrix3::identity(),
                    &Vector3::new(0.05, 0.0, 0.0),
                ),
            )
            .motion(MotionType::Gyro, MotionDeviceIntrinsics::identity())
            .build(&AlignmentConfig::default())
            .unwrap()
    }

    #[test]
    fn test_synthetic_intrinsics() {
        let cal = example();
        let depth = *cal.stream_intrinsics(StreamType::Depth).unwrap().intrinsics();
        let color = *cal.stream_intrinsics(StreamType::Color).unwrap().intrinsics();
        let get = |s| *cal.stream_intrinsics(s).unwrap().intrinsics();
        assert_eq!(get(StreamType::Points), depth);
        assert_eq!(get(StreamType::ColorAlignedToDepth), depth);
        assert_eq!(get(StreamType::DepthAlignedToColor), color);
        assert_eq!(get(StreamType::RectifiedColor), color.undistorted());
        assert_eq!(get(StreamType::DepthAlignedToRectifiedColor), color.undistorted());
        assert!(matches!(
            cal.stream_intrinsics(StreamType::Fisheye),
            Err(CalibError::MissingCalibration { .. })
        ));
    }

    #[test]
    fn test_frames() {
        let cal = example();
        assert_eq!(cal.frame_of(StreamType::Points), StreamType::Depth);
        assert_eq!(cal.frame_of(StreamType::DepthAlignedToColor), StreamType::Color);
        assert_eq!(
            cal.frame_of(StreamType::DepthAlignedToRectifiedColor),
            StreamType::RectifiedColor
        );
        assert_eq!(cal.frame_of(StreamType::ColorAlignedToDepth), StreamType::Depth);
    }

    #[test]
    fn test_direct_and_inverse() {
        let cal = example();
        let p = Point3::new(0.1, -0.2, 1.5);
        let e = depth_to_color();
        let t = cal.transform(StreamType::Depth, StreamType::Color).unwrap();
        assert_relative_eq!(t * p, e.apply(&p), epsilon = 1e-5);
        let t = cal.transform(StreamType::Color, StreamType::Depth).unwrap();
        assert_relative_eq!(t * p, e.inverse().apply(&p), epsilon = 1e-5);
        let t = cal.transform(StreamType::Points, StreamType::Depth).unwrap();
        assert_eq!(t, IsometryMatrix3::identity());
    }

    #[test]
    fn test_composed_through_depth() {
        let cal = example();
        let p = Point3::new(0.1, -0.2, 1.5);
        let t = cal
            .transform(StreamType::Infrared2, StreamType::Color)
            .unwrap();
        let expected = depth_to_color().apply(&(p + Vector3::new(0.05, 0.0, 0.0)));
        assert_relative_eq!(t * p, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_rectified_frame() {
        let cal = example();
        let t = cal
            .transform(StreamType::Depth, StreamType::RectifiedColor)
            .unwrap();
        let e = depth_to_color();
        let p = Point3::new(0.3, 0.2, 1.0);
        let expected = p + e.rotation_matrix().transpose() * e.translation_vector();
        assert_relative_eq!(t * p, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_rectified_shares_color_center() {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.3);
        let cal = CalibrationSet::builder()
            .intrinsics(StreamType::Depth, Intrinsics::pinhole(640, 480, 385.0, 385.0, 320.0, 240.0))
            .intrinsics(StreamType::Color, color_intrinsics())
            .extrinsics(
                StreamType::Depth,
                StreamType::Color,
                Extrinsics::from_parts(rotation.matrix(), &Vector3::new(0.05, 0.0, 0.0)),
            )
            .build(&AlignmentConfig::default())
            .unwrap();
        let t = cal
            .transform(StreamType::RectifiedColor, StreamType::Color)
            .unwrap();
        assert!(t.translation.vector.norm() < 1e-6);
        assert_relative_eq!(*t.rotation.matrix(), *rotation.matrix(), epsilon = 1e-6);

        // rectified keeps the depth orientation
        let t = cal
            .transform(StreamType::Depth, StreamType::RectifiedColor)
            .unwrap();
        assert_relative_eq!(*t.rotation.matrix(), nalgebra::Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_missing_path() {
        let cal = example();
        assert!(matches!(
            cal.transform(StreamType::Fisheye, StreamType::Depth),
            Err(CalibError::MissingCalibration {
                from: StreamType::Fisheye,
                to: StreamType::Depth
            })
        ));
    }

    #[test]
    fn test_derived_rejected() {
        let depth = Intrinsics::pinhole(640, 480, 385.0, 385.0, 320.0, 240.0);
        let result = CalibrationSet::builder()
            .intrinsics(StreamType::DepthAlignedToColor, depth)
            .build(&AlignmentConfig::default());
        assert!(matches!(
            result,
            Err(CalibError::DerivedCalibration(StreamType::DepthAlignedToColor))
        ));
    }

    #[test]
    fn test_non_orthonormal_rejected() {
        let mut e = Extrinsics::identity();
        e.rotation[4] = 0.5;
        let result = CalibrationSet::builder()
            .extrinsics(StreamType::Depth, StreamType::Color, e)
            .build(&AlignmentConfig::default());
        assert!(matches!(
            result,
            Err(CalibError::NonOrthonormalRotation { .. })
        ));
    }

    #[test]
    fn test_motion() {
        let cal = example();
        let sample = MotionSample {
            motion_type: MotionType::Gyro,
            timestamp: 1234.5,
            domain: crate::TimestampDomain::Microcontroller,
            flags: crate::SampleFlags::External,
            data: [0.1, 0.2, 0.3],
        };
        assert_eq!(cal.correct_motion(&sample).unwrap(), sample);
        let accel = MotionSample {
            motion_type: MotionType::Accel,
            ..sample
        };
        assert!(matches!(
            cal.correct_motion(&accel),
            Err(CalibError::MissingMotionCalibration(MotionType::Accel))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let cal = example();
        let mut buf = Vec::new();
        cal.to_yaml_writer(&mut buf).unwrap();
        let cal2 = CalibrationSet::from_yaml_reader(&buf[..], &AlignmentConfig::default()).unwrap();
        assert_eq!(cal.to_file(), cal2.to_file());
        assert!(!cal2.to_file().intrinsics.contains_key(&StreamType::RectifiedColor));
    }

    #[test]
    fn test_publisher() {
        let publisher = CalibrationPublisher::new(example());
        let before = publisher.current();
        let mut next = example().to_file();
        next.device.name = "updated".into();
        let previous = publisher.publish(
            CalibrationSet::from_file(next, &AlignmentConfig::default()).unwrap(),
        );
        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(before.device().name, "");
        assert_eq!(publisher.current().device().name, "updated");
    }
}
