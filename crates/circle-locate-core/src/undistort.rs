//! Lens undistortion: output intrinsics, valid-pixel ROI and remapping.
//!
//! The output camera is chosen from the undistorted image border, sampled on
//! a coarse grid. `alpha = 0` zooms in until every output pixel is backed by
//! source data; `alpha = 1` keeps every source pixel and leaves black corners,
//! which are then cropped away by the valid-pixel rectangle.

use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageBuffer, Pixel};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::camera::{CalibrationData, CalibrationError, Intrinsics};
use crate::sampling::sample_bilinear;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Border samples per image side used to bound the undistorted frame.
const BORDER_GRID: usize = 9;
/// Inversion steps per border sample; matches `cv::undistortPoints` defaults.
const BORDER_UNDISTORT_ITERS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum UndistortError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("alpha must lie in [0, 1], got {0}")]
    InvalidAlpha(f64),

    #[error("lens model cannot be inverted over the image border")]
    NonInvertible,

    #[error("valid-pixel region is empty after undistortion")]
    EmptyValidRegion,

    #[error("image size {got:?} does not match the undistortion map ({expected:?})")]
    SizeMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },

    #[error("undistortion backend failed: {0}")]
    Backend(String),
}

/// Output framing for [`UndistortMap`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortParams {
    /// Free scaling in `[0, 1]`.
    pub alpha: f64,
    /// Crop the output to the valid-pixel rectangle.
    pub crop_to_valid: bool,
}

impl Default for UndistortParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            crop_to_valid: true,
        }
    }
}

/// Axis-aligned integer pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug)]
struct Bounds {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Bounds {
    fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Undistorted normalized coordinates of a `BORDER_GRID`² lattice spanning the image.
fn undistorted_border_grid(
    calibration: &CalibrationData,
    width: u32,
    height: u32,
) -> Result<Vec<[f64; 2]>, UndistortError> {
    let k = calibration.intrinsics();
    let dist = calibration.distortion();
    let step_x = (width.saturating_sub(1)) as f64 / (BORDER_GRID - 1) as f64;
    let step_y = (height.saturating_sub(1)) as f64 / (BORDER_GRID - 1) as f64;

    let mut out = Vec::with_capacity(BORDER_GRID * BORDER_GRID);
    for gy in 0..BORDER_GRID {
        for gx in 0..BORDER_GRID {
            let p = [gx as f64 * step_x, gy as f64 * step_y];
            let d = k
                .pixel_to_normalized(p)
                .ok_or(UndistortError::NonInvertible)?;
            let n = dist.undistort_fixed(d, BORDER_UNDISTORT_ITERS);
            if !(n[0].is_finite() && n[1].is_finite()) {
                return Err(UndistortError::NonInvertible);
            }
            out.push(n);
        }
    }
    Ok(out)
}

/// Inner (inscribed) and outer (bounding) rectangles of a border lattice.
fn border_bounds(points: &[[f64; 2]]) -> (Bounds, Bounds) {
    let mut inner = Bounds {
        x0: f64::MIN,
        y0: f64::MIN,
        x1: f64::MAX,
        y1: f64::MAX,
    };
    let mut outer = Bounds {
        x0: f64::MAX,
        y0: f64::MAX,
        x1: f64::MIN,
        y1: f64::MIN,
    };
    for (idx, p) in points.iter().enumerate() {
        let (gx, gy) = (idx % BORDER_GRID, idx / BORDER_GRID);
        outer.x0 = outer.x0.min(p[0]);
        outer.y0 = outer.y0.min(p[1]);
        outer.x1 = outer.x1.max(p[0]);
        outer.y1 = outer.y1.max(p[1]);
        if gx == 0 {
            inner.x0 = inner.x0.max(p[0]);
        }
        if gx == BORDER_GRID - 1 {
            inner.x1 = inner.x1.min(p[0]);
        }
        if gy == 0 {
            inner.y0 = inner.y0.max(p[1]);
        }
        if gy == BORDER_GRID - 1 {
            inner.y1 = inner.y1.min(p[1]);
        }
    }
    (inner, outer)
}

/// Round each rectangle field independently (half to even), then intersect
/// with the image.
fn clip_to_image(b: Bounds, width: u32, height: u32) -> PixelRect {
    let x = b.x0.round_ties_even();
    let y = b.y0.round_ties_even();
    let x_end = (x + b.width().round_ties_even()).min(width as f64);
    let y_end = (y + b.height().round_ties_even()).min(height as f64);
    let x = x.max(0.0);
    let y = y.max(0.0);
    if !(x_end > x && y_end > y) {
        return PixelRect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
    }
    PixelRect {
        x: x as u32,
        y: y as u32,
        width: (x_end - x) as u32,
        height: (y_end - y) as u32,
    }
}

/// Choose output intrinsics for an undistorted `width x height` frame and
/// report the rectangle of output pixels backed by real source data.
pub fn optimal_new_intrinsics(
    calibration: &CalibrationData,
    width: u32,
    height: u32,
    alpha: f64,
) -> Result<(Intrinsics, PixelRect), UndistortError> {
    if width == 0 || height == 0 {
        return Err(UndistortError::EmptyImage { width, height });
    }
    if !(0.0..=1.0).contains(&alpha) {
        return Err(UndistortError::InvalidAlpha(alpha));
    }
    if width < 2 || height < 2 {
        return Err(UndistortError::NonInvertible);
    }

    let grid = undistorted_border_grid(calibration, width, height)?;
    let (inner, outer) = border_bounds(&grid);
    if !(inner.width() > 0.0 && inner.height() > 0.0 && outer.width() > 0.0) {
        return Err(UndistortError::NonInvertible);
    }

    // The border lattice spans pixel centres 0..=width-1.
    let (w, h) = ((width - 1) as f64, (height - 1) as f64);
    let fx0 = w / inner.width();
    let fy0 = h / inner.height();
    let fx1 = w / outer.width();
    let fy1 = h / outer.height();
    let blend = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;

    let new_k = Intrinsics {
        fx: blend(fx0, fx1),
        fy: blend(fy0, fy1),
        cx: blend(-fx0 * inner.x0, -fx1 * outer.x0),
        cy: blend(-fy0 * inner.y0, -fy1 * outer.y0),
        skew: 0.0,
    };

    let projected: Vec<[f64; 2]> = grid.iter().map(|n| new_k.normalized_to_pixel(*n)).collect();
    let (inner_px, _) = border_bounds(&projected);
    Ok((new_k, clip_to_image(inner_px, width, height)))
}

/// Precomputed source coordinates for undistorting images of one size.
///
/// Build once per calibration and frame size, then [`apply`](Self::apply) to
/// every image of a batch.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    source_size: (u32, u32),
    new_intrinsics: Intrinsics,
    valid_roi: PixelRect,
    region: PixelRect,
    coords: Vec<[f32; 2]>,
}

impl UndistortMap {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(calibration, params))
    )]
    pub fn new(
        calibration: &CalibrationData,
        width: u32,
        height: u32,
        params: &UndistortParams,
    ) -> Result<Self, UndistortError> {
        let (new_k, valid_roi) = optimal_new_intrinsics(calibration, width, height, params.alpha)?;
        let region = if params.crop_to_valid {
            valid_roi
        } else {
            PixelRect::full(width, height)
        };
        if region.is_empty() {
            return Err(UndistortError::EmptyValidRegion);
        }

        let k = calibration.intrinsics();
        let dist = calibration.distortion();
        let mut coords = Vec::with_capacity(region.width as usize * region.height as usize);
        for v in region.y..region.y + region.height {
            for u in region.x..region.x + region.width {
                let n = new_k
                    .pixel_to_normalized([u as f64, v as f64])
                    .ok_or(UndistortError::NonInvertible)?;
                let s = k.normalized_to_pixel(dist.distort(n));
                coords.push([s[0] as f32, s[1] as f32]);
            }
        }

        debug!(
            "undistort map {}x{} -> {}x{} at ({}, {}), fx'={:.2} fy'={:.2}",
            width, height, region.width, region.height, region.x, region.y, new_k.fx, new_k.fy
        );

        Ok(Self {
            source_size: (width, height),
            new_intrinsics: new_k,
            valid_roi,
            region,
            coords,
        })
    }

    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.region.width, self.region.height)
    }

    /// Intrinsics of the full (uncropped) undistorted frame.
    pub fn new_intrinsics(&self) -> Intrinsics {
        self.new_intrinsics
    }

    /// Valid-pixel rectangle in the full undistorted frame.
    pub fn valid_roi(&self) -> PixelRect {
        self.valid_roi
    }

    pub fn apply<P: Pixel<Subpixel = u8>>(
        &self,
        image: &ImageBuffer<P, Vec<u8>>,
    ) -> Result<ImageBuffer<P, Vec<u8>>, UndistortError> {
        let got = image.dimensions();
        if got != self.source_size {
            return Err(UndistortError::SizeMismatch {
                expected: self.source_size,
                got,
            });
        }
        let w = self.region.width;
        Ok(ImageBuffer::from_fn(w, self.region.height, |x, y| {
            let [sx, sy] = self.coords[(y * w + x) as usize];
            sample_bilinear(image, sx, sy)
        }))
    }

    pub fn apply_dynamic(&self, image: &DynamicImage) -> Result<DynamicImage, UndistortError> {
        Ok(match image {
            DynamicImage::ImageLuma8(img) => DynamicImage::ImageLuma8(self.apply(img)?),
            DynamicImage::ImageLumaA8(img) => DynamicImage::ImageLumaA8(self.apply(img)?),
            DynamicImage::ImageRgb8(img) => DynamicImage::ImageRgb8(self.apply(img)?),
            DynamicImage::ImageRgba8(img) => DynamicImage::ImageRgba8(self.apply(img)?),
            other => DynamicImage::ImageRgb8(self.apply(&other.to_rgb8())?),
        })
    }
}

/// Undistorts decoded frames for a calibration.
pub trait Undistorter {
    fn undistort(
        &self,
        calibration: &Arc<CalibrationData>,
        image: &DynamicImage,
        params: &UndistortParams,
    ) -> Result<DynamicImage, UndistortError>;
}

struct CachedMap {
    calibration: Arc<CalibrationData>,
    size: (u32, u32),
    params: UndistortParams,
    map: Arc<UndistortMap>,
}

/// [`UndistortMap`]-based undistorter that keeps the last map.
///
/// The map is rebuilt when the calibration record, frame size or framing
/// changes; a batch of same-sized frames under one calibration builds it once.
#[derive(Default)]
pub struct MapUndistorter {
    last: Mutex<Option<CachedMap>>,
}

impl MapUndistorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_for(
        &self,
        calibration: &Arc<CalibrationData>,
        size: (u32, u32),
        params: &UndistortParams,
    ) -> Result<Arc<UndistortMap>, UndistortError> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(c) = last.as_ref() {
            if c.size == size && c.params == *params && Arc::ptr_eq(&c.calibration, calibration) {
                return Ok(Arc::clone(&c.map));
            }
        }
        let map = Arc::new(UndistortMap::new(calibration, size.0, size.1, params)?);
        *last = Some(CachedMap {
            calibration: Arc::clone(calibration),
            size,
            params: *params,
            map: Arc::clone(&map),
        });
        Ok(map)
    }
}

impl Undistorter for MapUndistorter {
    fn undistort(
        &self,
        calibration: &Arc<CalibrationData>,
        image: &DynamicImage,
        params: &UndistortParams,
    ) -> Result<DynamicImage, UndistortError> {
        self.map_for(calibration, (image.width(), image.height()), params)?
            .apply_dynamic(image)
    }
}

/// Undistort with default framing. Without a calibration the image is returned untouched.
pub fn undistort<P: Pixel<Subpixel = u8>>(
    image: ImageBuffer<P, Vec<u8>>,
    calibration: Option<&CalibrationData>,
) -> Result<ImageBuffer<P, Vec<u8>>, UndistortError> {
    undistort_with(image, calibration, &UndistortParams::default())
}

pub fn undistort_with<P: Pixel<Subpixel = u8>>(
    image: ImageBuffer<P, Vec<u8>>,
    calibration: Option<&CalibrationData>,
    params: &UndistortParams,
) -> Result<ImageBuffer<P, Vec<u8>>, UndistortError> {
    let Some(calibration) = calibration else {
        return Ok(image);
    };
    let (w, h) = image.dimensions();
    UndistortMap::new(calibration, w, h, params)?.apply(&image)
}

/// [`undistort_with`] for decoded images of any 8-bit layout.
pub fn undistort_dynamic(
    image: DynamicImage,
    calibration: Option<&CalibrationData>,
    params: &UndistortParams,
) -> Result<DynamicImage, UndistortError> {
    let Some(calibration) = calibration else {
        return Ok(image);
    };
    UndistortMap::new(calibration, image.width(), image.height(), params)?.apply_dynamic(&image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use nalgebra::Matrix3;

    fn calibration(coeffs: Vec<f64>) -> CalibrationData {
        let m = Matrix3::new(180.0, 0.0, 100.0, 0.0, 180.0, 75.0, 0.0, 0.0, 1.0);
        CalibrationData::new(m, coeffs).unwrap()
    }

    #[test]
    fn absent_calibration_is_identity() {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]));
        let out = undistort(img.clone(), None).unwrap();
        assert_eq!(out.dimensions(), img.dimensions());
        assert_eq!(out.as_raw(), img.as_raw());
    }

    #[test]
    fn zero_distortion_drops_last_row_and_column() {
        let calib = calibration(vec![0.0; 5]);
        let (k, roi) = optimal_new_intrinsics(&calib, 200, 150, 1.0).unwrap();
        assert_relative_eq!(k.fx, 180.0, epsilon = 1e-9);
        assert_relative_eq!(k.cx, 100.0, epsilon = 1e-9);
        // Border samples span pixel centres, so the valid rectangle ends at w-1.
        assert_eq!(
            roi,
            PixelRect {
                x: 0,
                y: 0,
                width: 199,
                height: 149
            }
        );

        let img = GrayImage::from_pixel(200, 150, Luma([90]));
        let out = undistort(img, Some(&calib)).unwrap();
        assert_eq!(out.dimensions(), (199, 149));
        assert_eq!(out.get_pixel(100, 75), &Luma([90]));
    }

    #[test]
    fn roi_matches_opencv_rounding() {
        // Reference values from getOptimalNewCameraMatrix(alpha = 1): the
        // inner rectangle is (37.541, 58.083, 1923.872, 1382.854) and each
        // field is rounded on its own.
        let m = Matrix3::new(1450.0, 0.0, 1000.0, 0.0, 1450.0, 750.0, 0.0, 0.0, 1.0);
        let calib = CalibrationData::new(m, vec![-0.21, 0.08, 0.0, 0.0, 0.0]).unwrap();
        let (k, roi) = optimal_new_intrinsics(&calib, 2000, 1500, 1.0).unwrap();
        assert_relative_eq!(k.fx, 1263.0984, epsilon = 1e-3);
        assert_relative_eq!(k.fy, 1263.0846, epsilon = 1e-3);
        assert_relative_eq!(k.cx, 1000.0436, epsilon = 1e-3);
        assert_relative_eq!(k.cy, 750.0245, epsilon = 1e-3);
        assert_eq!(
            roi,
            PixelRect {
                x: 38,
                y: 58,
                width: 1924,
                height: 1383
            }
        );
    }

    #[test]
    fn barrel_distortion_crops_to_valid_region() {
        let calib = calibration(vec![-0.35, 0.12, 0.0, 0.0, 0.0]);
        let (_, roi) = optimal_new_intrinsics(&calib, 200, 150, 1.0).unwrap();
        assert!(roi.x > 0 && roi.y > 0, "roi {roi:?}");
        assert!(roi.width < 200 && roi.height < 150, "roi {roi:?}");
        assert!(roi.x + roi.width <= 200 && roi.y + roi.height <= 150);
        assert_eq!(
            roi,
            PixelRect {
                x: 8,
                y: 10,
                width: 183,
                height: 129
            }
        );

        let img = GrayImage::from_pixel(200, 150, Luma([120]));
        let out = undistort(img, Some(&calib)).unwrap();
        assert_eq!(out.dimensions(), (roi.width, roi.height));
        let (cw, ch) = (out.width() / 2, out.height() / 2);
        assert_eq!(out.get_pixel(cw, ch), &Luma([120]));
    }

    #[test]
    fn alpha_zero_fills_frame() {
        let calib = calibration(vec![-0.35, 0.12, 0.0, 0.0, 0.0]);
        let (_, roi) = optimal_new_intrinsics(&calib, 200, 150, 0.0).unwrap();
        assert_eq!((roi.width, roi.height), (199, 149), "roi {roi:?}");
    }

    #[test]
    fn uncropped_output_keeps_source_size() {
        let calib = calibration(vec![-0.35, 0.12, 0.0, 0.0, 0.0]);
        let params = UndistortParams {
            alpha: 1.0,
            crop_to_valid: false,
        };
        let map = UndistortMap::new(&calib, 200, 150, &params).unwrap();
        assert_eq!(map.output_size(), (200, 150));
        // The left edge of an alpha=1 frame lies outside the source away from the corners.
        let out = map
            .apply(&GrayImage::from_pixel(200, 150, Luma([255])))
            .unwrap();
        assert_eq!(out.get_pixel(0, 75), &Luma([0]));
        assert_eq!(out.get_pixel(100, 75), &Luma([255]));
    }

    #[test]
    fn map_rejects_other_sizes() {
        let calib = calibration(vec![]);
        let map = UndistortMap::new(&calib, 200, 150, &UndistortParams::default()).unwrap();
        let err = map.apply(&GrayImage::new(100, 100)).unwrap_err();
        assert!(matches!(err, UndistortError::SizeMismatch { .. }));
    }

    #[test]
    fn invalid_alpha_is_rejected() {
        let calib = calibration(vec![]);
        assert!(matches!(
            optimal_new_intrinsics(&calib, 10, 10, 1.5),
            Err(UndistortError::InvalidAlpha(_))
        ));
    }

    #[test]
    fn dynamic_images_keep_their_layout() {
        let calib = calibration(vec![-0.1, 0.0, 0.0, 0.0]);
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 150));
        let out = undistort_dynamic(img, Some(&calib), &UndistortParams::default()).unwrap();
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn map_undistorter_reuses_map_per_calibration() {
        let calib = Arc::new(calibration(vec![-0.35, 0.12, 0.0, 0.0, 0.0]));
        let params = UndistortParams::default();
        let undistorter = MapUndistorter::new();
        let a = undistorter.map_for(&calib, (200, 150), &params).unwrap();
        let b = undistorter.map_for(&calib, (200, 150), &params).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // An equal but newly published record gets its own map.
        let replaced = Arc::new(calibration(vec![-0.35, 0.12, 0.0, 0.0, 0.0]));
        let c = undistorter.map_for(&replaced, (200, 150), &params).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));

        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 150, Luma([60])));
        let out = undistorter.undistort(&replaced, &img, &params).unwrap();
        assert_eq!((out.width(), out.height()), c.output_size());
    }
}
