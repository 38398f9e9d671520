//! Multi-image chessboard calibration driver.
//!
//! [`CalibrationSweep`] walks a list of calibration images, asks a
//! [`CornerFinder`] for the chessboard corners of each one and collects the
//! object/image point pairs. It is an iterator of [`SweepEvent`]s so callers
//! can report progress or stop early by dropping it; [`CalibrationSweep::finish`]
//! hands the collected views to a [`CameraSolver`].

use std::path::{Path, PathBuf};

use image::GrayImage;
use log::{debug, info, warn};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::camera::CalibrationData;
use crate::image_list::list_images;
use crate::persist::CalibrationIoError;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum SweepError {
    #[error("no calibration images found in {0}")]
    NoImages(PathBuf),

    #[error("calibration needs at least {required} view(s) with detected corners, got {accepted}")]
    NotEnoughViews { accepted: usize, required: usize },

    #[error("corner finder failed: {0}")]
    CornerFinder(String),

    #[error("camera solver failed: {0}")]
    Solver(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Persist(#[from] CalibrationIoError),
}

/// Inner-corner layout of the printed chessboard.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChessboardPattern {
    pub inner_cols: u32,
    pub inner_rows: u32,
    /// Square edge in the unit the solver should report extrinsics in.
    pub square_size: f64,
}

impl Default for ChessboardPattern {
    fn default() -> Self {
        Self {
            inner_cols: 14,
            inner_rows: 12,
            square_size: 1.0,
        }
    }
}

impl ChessboardPattern {
    pub fn corner_count(&self) -> usize {
        self.inner_cols as usize * self.inner_rows as usize
    }

    /// Board-plane corner positions, row by row, on `z = 0`.
    pub fn object_points(&self) -> Vec<Point3<f32>> {
        let cols = self.inner_cols.max(1) as usize;
        let s = self.square_size as f32;
        (0..self.corner_count())
            .map(|k| Point3::new((k % cols) as f32 * s, (k / cols) as f32 * s, 0.0))
            .collect()
    }
}

/// Locates (and refines) the inner corners of a chessboard.
pub trait CornerFinder {
    /// `Ok(None)` when the full pattern is not visible. Returned corners must
    /// follow the row-major order of [`ChessboardPattern::object_points`].
    fn find_corners(
        &self,
        image: &GrayImage,
        pattern: &ChessboardPattern,
    ) -> Result<Option<Vec<Point2<f32>>>, SweepError>;
}

/// Solves intrinsics and distortion from accumulated views.
pub trait CameraSolver {
    fn solve(
        &self,
        views: &[CalibrationView],
        image_size: (u32, u32),
    ) -> Result<SolvedCalibration, SweepError>;
}

/// One accepted calibration image.
#[derive(Clone, Debug)]
pub struct CalibrationView {
    pub path: PathBuf,
    pub object_points: Vec<Point3<f32>>,
    pub image_points: Vec<Point2<f32>>,
}

#[derive(Clone, Debug)]
pub struct SolvedCalibration {
    pub calibration: CalibrationData,
    /// Reprojection RMS in pixels.
    pub rms_error: f64,
    pub image_size: (u32, u32),
}

/// Per-image progress of a sweep. `index` is zero-based within `total`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SweepEvent {
    Accepted {
        index: usize,
        total: usize,
        path: PathBuf,
        corners: usize,
    },
    NoCorners {
        index: usize,
        total: usize,
        path: PathBuf,
    },
    Skipped {
        index: usize,
        total: usize,
        path: PathBuf,
        reason: String,
    },
}

impl SweepEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Accepted { path, .. }
            | Self::NoCorners { path, .. }
            | Self::Skipped { path, .. } => path.as_path(),
        }
    }
}

/// Minimum number of views handed to the solver.
pub const MIN_VIEWS: usize = 1;

pub struct CalibrationSweep<F> {
    finder: F,
    pattern: ChessboardPattern,
    paths: Vec<PathBuf>,
    next: usize,
    views: Vec<CalibrationView>,
    image_size: Option<(u32, u32)>,
}

impl<F: CornerFinder> CalibrationSweep<F> {
    pub fn new(finder: F, pattern: ChessboardPattern, paths: Vec<PathBuf>) -> Self {
        Self {
            finder,
            pattern,
            paths,
            next: 0,
            views: Vec::new(),
            image_size: None,
        }
    }

    /// Sweep over every image in `dir` (see [`list_images`]).
    pub fn from_dir(
        finder: F,
        pattern: ChessboardPattern,
        dir: impl AsRef<Path>,
    ) -> Result<Self, SweepError> {
        let dir = dir.as_ref();
        let paths = list_images(dir)?;
        if paths.is_empty() {
            return Err(SweepError::NoImages(dir.to_path_buf()));
        }
        info!("calibration sweep over {} image(s) in {}", paths.len(), dir.display());
        Ok(Self::new(finder, pattern, paths))
    }

    pub fn total(&self) -> usize {
        self.paths.len()
    }

    pub fn views(&self) -> &[CalibrationView] {
        &self.views
    }

    /// Size of the first accepted image; later images must match it.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    fn process(&mut self, index: usize, path: PathBuf) -> SweepEvent {
        let total = self.paths.len();
        let skipped = |path: PathBuf, reason: String| {
            warn!("skipping {}: {reason}", path.display());
            SweepEvent::Skipped {
                index,
                total,
                path,
                reason,
            }
        };

        let gray = match image::open(&path) {
            Ok(img) => img.to_luma8(),
            Err(err) => return skipped(path, format!("cannot decode image: {err}")),
        };
        let dims = gray.dimensions();
        if let Some(expected) = self.image_size {
            if expected != dims {
                return skipped(
                    path,
                    format!(
                        "size {}x{} differs from {}x{}",
                        dims.0, dims.1, expected.0, expected.1
                    ),
                );
            }
        }

        let corners = match self.finder.find_corners(&gray, &self.pattern) {
            Ok(Some(c)) => c,
            Ok(None) => {
                debug!("no chessboard in {}", path.display());
                return SweepEvent::NoCorners { index, total, path };
            }
            Err(err) => return skipped(path, err.to_string()),
        };
        if corners.len() != self.pattern.corner_count() {
            return skipped(
                path,
                format!(
                    "found {} corners, pattern has {}",
                    corners.len(),
                    self.pattern.corner_count()
                ),
            );
        }

        self.image_size.get_or_insert(dims);
        let count = corners.len();
        self.views.push(CalibrationView {
            path: path.clone(),
            object_points: self.pattern.object_points(),
            image_points: corners,
        });
        SweepEvent::Accepted {
            index,
            total,
            path,
            corners: count,
        }
    }

    /// Process any remaining images, then solve.
    pub fn finish<S: CameraSolver + ?Sized>(
        mut self,
        solver: &S,
    ) -> Result<SolvedCalibration, SweepError> {
        for _ in self.by_ref() {}
        self.solve(solver)
    }

    /// Drive the sweep to completion, reporting each event to `on_event`.
    pub fn run<S: CameraSolver + ?Sized>(
        mut self,
        solver: &S,
        mut on_event: impl FnMut(&SweepEvent),
    ) -> Result<SolvedCalibration, SweepError> {
        for event in self.by_ref() {
            on_event(&event);
        }
        self.solve(solver)
    }

    fn solve<S: CameraSolver + ?Sized>(
        &self,
        solver: &S,
    ) -> Result<SolvedCalibration, SweepError> {
        let accepted = self.views.len();
        let image_size = match self.image_size {
            Some(size) if accepted >= MIN_VIEWS => size,
            _ => {
                return Err(SweepError::NotEnoughViews {
                    accepted,
                    required: MIN_VIEWS,
                })
            }
        };
        let solved = solver.solve(&self.views, image_size)?;
        info!(
            "calibrated from {accepted} view(s), rms {:.4} px",
            solved.rms_error
        );
        Ok(solved)
    }
}

impl<F: CornerFinder> Iterator for CalibrationSweep<F> {
    type Item = SweepEvent;

    fn next(&mut self) -> Option<SweepEvent> {
        let index = self.next;
        let path = self.paths.get(index)?.clone();
        self.next += 1;
        Some(self.process(index, path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.paths.len() - self.next;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use nalgebra::Matrix3;
    use std::cell::Cell;

    /// Reports a full grid whenever the top-left pixel is white.
    struct MarkerFinder;

    impl CornerFinder for MarkerFinder {
        fn find_corners(
            &self,
            image: &GrayImage,
            pattern: &ChessboardPattern,
        ) -> Result<Option<Vec<Point2<f32>>>, SweepError> {
            if image.get_pixel(0, 0)[0] < 128 {
                return Ok(None);
            }
            Ok(Some(
                pattern
                    .object_points()
                    .iter()
                    .map(|p| Point2::new(p.x * 2.0 + 1.0, p.y * 2.0 + 1.0))
                    .collect(),
            ))
        }
    }

    struct CountingSolver {
        calls: Cell<usize>,
    }

    impl CameraSolver for CountingSolver {
        fn solve(
            &self,
            views: &[CalibrationView],
            image_size: (u32, u32),
        ) -> Result<SolvedCalibration, SweepError> {
            self.calls.set(self.calls.get() + 1);
            let f = 100.0 * views.len() as f64;
            let m = Matrix3::new(
                f,
                0.0,
                image_size.0 as f64 / 2.0,
                0.0,
                f,
                image_size.1 as f64 / 2.0,
                0.0,
                0.0,
                1.0,
            );
            Ok(SolvedCalibration {
                calibration: CalibrationData::new(m, vec![0.0; 5])
                    .map_err(|e| SweepError::Solver(e.to_string()))?,
                rms_error: 0.25,
                image_size,
            })
        }
    }

    fn solver() -> CountingSolver {
        CountingSolver {
            calls: Cell::new(0),
        }
    }

    fn small_pattern() -> ChessboardPattern {
        ChessboardPattern {
            inner_cols: 3,
            inner_rows: 2,
            square_size: 5.0,
        }
    }

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, value: u8) {
        GrayImage::from_pixel(w, h, Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn default_pattern_is_fourteen_by_twelve() {
        let p = ChessboardPattern::default();
        let pts = p.object_points();
        assert_eq!(pts.len(), 168);
        assert_eq!(pts[13], Point3::new(13.0, 0.0, 0.0));
        assert_eq!(pts[14], Point3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn object_points_scale_with_square_size() {
        let pts = small_pattern().object_points();
        assert_eq!(pts[4], Point3::new(5.0, 5.0, 0.0));
    }

    #[test]
    fn sweep_reports_each_image_and_solves() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "cal1.png", 32, 24, 255);
        write_png(dir.path(), "cal2.png", 32, 24, 0);
        write_png(dir.path(), "cal3.png", 16, 16, 255);
        std::fs::write(dir.path().join("cal4.png"), b"not an image").unwrap();
        write_png(dir.path(), "cal10.png", 32, 24, 255);

        let sweep = CalibrationSweep::from_dir(MarkerFinder, small_pattern(), dir.path()).unwrap();
        assert_eq!(sweep.total(), 5);

        let mut events = Vec::new();
        let s = solver();
        let solved = sweep.run(&s, |e| events.push(e.clone())).unwrap();

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                SweepEvent::Accepted { .. } => "accepted",
                SweepEvent::NoCorners { .. } => "no_corners",
                SweepEvent::Skipped { .. } => "skipped",
            })
            .collect();
        assert_eq!(
            kinds,
            ["accepted", "no_corners", "skipped", "skipped", "accepted"]
        );
        assert!(events[4].path().ends_with("cal10.png"));
        assert_eq!(s.calls.get(), 1);
        assert_eq!(solved.calibration.camera_matrix()[(0, 0)], 200.0);
        assert_eq!(solved.calibration.camera_matrix()[(0, 2)], 16.0);
        assert_eq!(solved.image_size, (32, 24));
    }

    #[test]
    fn sweep_without_views_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "dark.png", 8, 8, 0);
        let sweep = CalibrationSweep::from_dir(MarkerFinder, small_pattern(), dir.path()).unwrap();
        let s = solver();
        let err = sweep.finish(&s).unwrap_err();
        assert!(matches!(
            err,
            SweepError::NotEnoughViews {
                accepted: 0,
                required: 1
            }
        ));
        assert_eq!(s.calls.get(), 0);
    }

    #[test]
    fn empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CalibrationSweep::from_dir(MarkerFinder, small_pattern(), dir.path()),
            Err(SweepError::NoImages(_))
        ));
    }

    #[test]
    fn iteration_can_stop_early() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            write_png(dir.path(), &format!("v{i}.png"), 8, 8, 255);
        }
        let mut sweep =
            CalibrationSweep::from_dir(MarkerFinder, small_pattern(), dir.path()).unwrap();
        assert!(matches!(sweep.next(), Some(SweepEvent::Accepted { index: 0, total: 3, .. })));
        assert_eq!(sweep.size_hint(), (2, Some(2)));
        assert_eq!(sweep.views().len(), 1);
        assert_eq!(sweep.image_size(), Some((8, 8)));
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let e = SweepEvent::NoCorners {
            index: 1,
            total: 4,
            path: PathBuf::from("a.png"),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "no_corners");
        assert_eq!(json["index"], 1);
    }
}
