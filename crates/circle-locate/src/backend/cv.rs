//! OpenCV-backed circle detector, undistorter, chessboard corner finder and
//! camera solver.

use std::sync::Arc;

use image::{DynamicImage, GrayImage, RgbImage};
use log::debug;
use nalgebra::{Matrix3, Point2};
use opencv::core::{
    Mat, Point2f, Point3f, Rect, Scalar, Size, TermCriteria, TermCriteria_Type, Vec3f, Vector,
    CV_8UC1, CV_8UC3,
};
use opencv::prelude::*;
use opencv::{calib3d, imgproc};

use crate::core::{
    CalibrationData, CalibrationView, CameraSolver, ChessboardPattern, CornerFinder,
    SolvedCalibration, SweepError, UndistortError, UndistortParams, Undistorter,
};
use crate::fiducial::{CircleCandidate, CircleDetector, DetectionParams, DetectorError};

fn bytes_to_mat(width: u32, height: u32, typ: i32, raw: &[u8]) -> opencv::Result<Mat> {
    let mut mat =
        Mat::new_rows_cols_with_default(height as i32, width as i32, typ, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(raw);
    Ok(mat)
}

fn gray_to_mat(image: &GrayImage) -> opencv::Result<Mat> {
    bytes_to_mat(image.width(), image.height(), CV_8UC1, image.as_raw())
}

/// 8-bit gray stays single-channel; every other layout goes through RGB.
fn dynamic_to_mat(image: &DynamicImage) -> opencv::Result<Mat> {
    match image {
        DynamicImage::ImageLuma8(img) => gray_to_mat(img),
        other => {
            let rgb = other.to_rgb8();
            bytes_to_mat(rgb.width(), rgb.height(), CV_8UC3, rgb.as_raw())
        }
    }
}

fn mat_to_dynamic(mat: &Mat) -> Result<DynamicImage, UndistortError> {
    let backend = |e: opencv::Error| UndistortError::Backend(e.to_string());
    let (w, h) = (mat.cols() as u32, mat.rows() as u32);
    let raw = mat.data_bytes().map_err(backend)?.to_vec();
    let image = match mat.channels() {
        1 => GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8),
        _ => None,
    };
    image.ok_or_else(|| UndistortError::Backend(format!("unexpected {w}x{h} output layout")))
}

fn camera_matrix_to_mat(m: &Matrix3<f64>) -> opencv::Result<Mat> {
    let rows: [[f64; 3]; 3] = std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]));
    Mat::from_slice_2d(&rows)
}

fn coeffs_to_mat(coeffs: &[f64]) -> opencv::Result<Mat> {
    if coeffs.is_empty() {
        return Ok(Mat::default());
    }
    Mat::from_slice(coeffs)?.try_clone()
}

fn criteria(max_count: i32, epsilon: f64) -> opencv::Result<TermCriteria> {
    TermCriteria::new(
        TermCriteria_Type::COUNT as i32 + TermCriteria_Type::EPS as i32,
        max_count,
        epsilon,
    )
}

/// `cv::HoughCircles` with the gradient method.
#[derive(Clone, Copy, Debug, Default)]
pub struct HoughCircleDetector;

impl CircleDetector for HoughCircleDetector {
    fn detect(
        &self,
        image: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<CircleCandidate>, DetectorError> {
        let backend = |e: opencv::Error| DetectorError::Backend(e.to_string());
        let mat = gray_to_mat(image).map_err(backend)?;
        let mut circles = Vector::<Vec3f>::new();
        imgproc::hough_circles(
            &mat,
            &mut circles,
            imgproc::HOUGH_GRADIENT,
            params.dp,
            params.min_distance,
            params.param1,
            params.param2,
            params.min_radius,
            params.max_radius,
        )
        .map_err(backend)?;
        Ok(circles
            .iter()
            .map(|c| {
                let [x, y, r] = c.0;
                CircleCandidate::from_subpixel(x, y, r)
            })
            .collect())
    }
}

/// `cv::getOptimalNewCameraMatrix` plus `cv::undistort`, cropped to the valid ROI.
///
/// Color frames come back as RGB8.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenCvUndistorter;

impl OpenCvUndistorter {
    /// New camera matrix and valid-pixel rectangle for a `size` frame.
    pub fn optimal_camera(
        &self,
        calibration: &CalibrationData,
        size: (u32, u32),
        alpha: f64,
    ) -> Result<(Mat, Rect), UndistortError> {
        let backend = |e: opencv::Error| UndistortError::Backend(e.to_string());
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(UndistortError::EmptyImage { width, height });
        }
        if !(0.0..=1.0).contains(&alpha) {
            return Err(UndistortError::InvalidAlpha(alpha));
        }
        let k = camera_matrix_to_mat(calibration.camera_matrix()).map_err(backend)?;
        let dist = coeffs_to_mat(calibration.distortion_coeffs()).map_err(backend)?;
        let frame = Size::new(width as i32, height as i32);
        let mut roi = Rect::default();
        let new_k = calib3d::get_optimal_new_camera_matrix(
            &k,
            &dist,
            frame,
            alpha,
            frame,
            Some(&mut roi),
            false,
        )
        .map_err(backend)?;
        Ok((new_k, roi))
    }
}

impl Undistorter for OpenCvUndistorter {
    fn undistort(
        &self,
        calibration: &Arc<CalibrationData>,
        image: &DynamicImage,
        params: &UndistortParams,
    ) -> Result<DynamicImage, UndistortError> {
        let backend = |e: opencv::Error| UndistortError::Backend(e.to_string());
        let (new_k, roi) =
            self.optimal_camera(calibration, (image.width(), image.height()), params.alpha)?;
        let k = camera_matrix_to_mat(calibration.camera_matrix()).map_err(backend)?;
        let dist = coeffs_to_mat(calibration.distortion_coeffs()).map_err(backend)?;

        let src = dynamic_to_mat(image).map_err(backend)?;
        let mut dst = Mat::default();
        calib3d::undistort(&src, &mut dst, &k, &dist, &new_k).map_err(backend)?;

        if !params.crop_to_valid {
            return mat_to_dynamic(&dst);
        }
        if roi.width <= 0 || roi.height <= 0 {
            return Err(UndistortError::EmptyValidRegion);
        }
        debug!(
            "opencv undistort {}x{} -> {}x{} at ({}, {})",
            image.width(),
            image.height(),
            roi.width,
            roi.height,
            roi.x,
            roi.y
        );
        let cropped = Mat::roi(&dst, roi)
            .and_then(|view| view.try_clone())
            .map_err(backend)?;
        mat_to_dynamic(&cropped)
    }
}

/// `cv::findChessboardCorners` followed by `cv::cornerSubPix`.
#[derive(Clone, Copy, Debug)]
pub struct ChessboardCornerFinder {
    pub flags: i32,
    /// Half-size of the sub-pixel search window is `refine_window / 2`.
    pub refine_window: i32,
    pub refine_iterations: i32,
    pub refine_epsilon: f64,
}

impl Default for ChessboardCornerFinder {
    fn default() -> Self {
        Self {
            flags: calib3d::CALIB_CB_ADAPTIVE_THRESH + calib3d::CALIB_CB_NORMALIZE_IMAGE,
            refine_window: 11,
            refine_iterations: 30,
            refine_epsilon: 0.001,
        }
    }
}

impl CornerFinder for ChessboardCornerFinder {
    fn find_corners(
        &self,
        image: &GrayImage,
        pattern: &ChessboardPattern,
    ) -> Result<Option<Vec<Point2<f32>>>, SweepError> {
        let backend = |e: opencv::Error| SweepError::CornerFinder(e.to_string());
        let mat = gray_to_mat(image).map_err(backend)?;
        let size = Size::new(pattern.inner_cols as i32, pattern.inner_rows as i32);
        let mut corners = Vector::<Point2f>::new();
        let found = calib3d::find_chessboard_corners(&mat, size, &mut corners, self.flags)
            .map_err(backend)?;
        if !found {
            return Ok(None);
        }
        let win = self.refine_window;
        imgproc::corner_sub_pix(
            &mat,
            &mut corners,
            Size::new(win, win),
            Size::new(-1, -1),
            criteria(self.refine_iterations, self.refine_epsilon).map_err(backend)?,
        )
        .map_err(backend)?;
        Ok(Some(corners.iter().map(|p| Point2::new(p.x, p.y)).collect()))
    }
}

/// `cv::calibrateCamera` over all accepted views.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenCvCalibrator {
    pub flags: i32,
}

impl CameraSolver for OpenCvCalibrator {
    fn solve(
        &self,
        views: &[CalibrationView],
        image_size: (u32, u32),
    ) -> Result<SolvedCalibration, SweepError> {
        let backend = |e: opencv::Error| SweepError::Solver(e.to_string());

        let object_points: Vector<Vector<Point3f>> = views
            .iter()
            .map(|v| {
                v.object_points
                    .iter()
                    .map(|p| Point3f::new(p.x, p.y, p.z))
                    .collect()
            })
            .collect();
        let image_points: Vector<Vector<Point2f>> = views
            .iter()
            .map(|v| v.image_points.iter().map(|p| Point2f::new(p.x, p.y)).collect())
            .collect();

        let mut camera_matrix = Mat::default();
        let mut dist = Mat::default();
        let mut rvecs = Vector::<Mat>::new();
        let mut tvecs = Vector::<Mat>::new();
        let rms = calib3d::calibrate_camera(
            &object_points,
            &image_points,
            Size::new(image_size.0 as i32, image_size.1 as i32),
            &mut camera_matrix,
            &mut dist,
            &mut rvecs,
            &mut tvecs,
            self.flags,
            criteria(30, f64::EPSILON).map_err(backend)?,
        )
        .map_err(backend)?;

        let mut m = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                m[(r, c)] = *camera_matrix
                    .at_2d::<f64>(r as i32, c as i32)
                    .map_err(backend)?;
            }
        }
        let coeffs = (0..dist.total())
            .map(|i| dist.at::<f64>(i as i32).copied())
            .collect::<opencv::Result<Vec<f64>>>()
            .map_err(backend)?;
        debug!("solver returned {} distortion coefficient(s)", coeffs.len());

        let calibration =
            CalibrationData::new(m, coeffs).map_err(|e| SweepError::Solver(e.to_string()))?;
        Ok(SolvedCalibration {
            calibration,
            rms_error: rms,
            image_size,
        })
    }
}
