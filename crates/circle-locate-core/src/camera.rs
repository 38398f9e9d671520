//! Pinhole intrinsics, lens distortion and the calibration record.
//!
//! Coefficients follow the usual `(k1, k2, p1, p2[, k3[, k4, k5, k6]])`
//! ordering produced by multi-view calibration routines, so a calibration
//! computed elsewhere can be loaded without reshuffling.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-12;

/// Errors raised when a calibration record is structurally unusable.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("camera matrix contains non-finite entries")]
    NonFiniteCameraMatrix,

    #[error("camera matrix has degenerate focal lengths (fx={fx}, fy={fy})")]
    DegenerateFocalLength { fx: f64, fy: f64 },

    #[error("unsupported number of distortion coefficients: {0} (expected 0, 4, 5 or 8)")]
    UnsupportedDistortionLength(usize),

    #[error("distortion coefficient #{index} is not finite")]
    NonFiniteDistortion { index: usize },
}

/// Pinhole intrinsics extracted from a 3x3 camera matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl Intrinsics {
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self {
            fx: m[(0, 0)],
            fy: m[(1, 1)],
            cx: m[(0, 2)],
            cy: m[(1, 2)],
            skew: m[(0, 1)],
        }
    }

    pub fn to_matrix(self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Pixel -> normalized image plane. `None` for degenerate focal lengths.
    pub fn pixel_to_normalized(self, pixel: [f64; 2]) -> Option<[f64; 2]> {
        if self.fx.abs() < 1e-12 || self.fy.abs() < 1e-12 {
            return None;
        }
        let y = (pixel[1] - self.cy) / self.fy;
        let x = (pixel[0] - self.cx - self.skew * y) / self.fx;
        (x.is_finite() && y.is_finite()).then_some([x, y])
    }

    pub fn normalized_to_pixel(self, n: [f64; 2]) -> [f64; 2] {
        [
            self.fx * n[0] + self.skew * n[1] + self.cx,
            self.fy * n[1] + self.cy,
        ]
    }
}

/// Rational radial + tangential lens distortion.
///
/// With `k4 = k5 = k6 = 0` this is the plain Brown-Conrady model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl Distortion {
    /// Build from a coefficient slice of length 0, 4, 5 or 8.
    pub fn from_coeffs(coeffs: &[f64]) -> Result<Self, CalibrationError> {
        if !matches!(coeffs.len(), 0 | 4 | 5 | 8) {
            return Err(CalibrationError::UnsupportedDistortionLength(coeffs.len()));
        }
        if let Some(index) = coeffs.iter().position(|c| !c.is_finite()) {
            return Err(CalibrationError::NonFiniteDistortion { index });
        }
        let at = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
            k4: at(5),
            k5: at(6),
            k6: at(7),
        })
    }

    pub fn is_identity(&self) -> bool {
        [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6,
        ]
        .iter()
        .all(|c| *c == 0.0)
    }

    #[inline]
    fn radial(&self, r2: f64) -> f64 {
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let num = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let den = 1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6;
        num / den
    }

    #[inline]
    fn tangential(&self, x: f64, y: f64, r2: f64) -> [f64; 2] {
        [
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        ]
    }

    /// Ideal normalized point -> distorted normalized point.
    pub fn distort(&self, n: [f64; 2]) -> [f64; 2] {
        let [x, y] = n;
        let r2 = x * x + y * y;
        let radial = self.radial(r2);
        let [tx, ty] = self.tangential(x, y, r2);
        [x * radial + tx, y * radial + ty]
    }

    /// Distorted normalized point -> ideal normalized point (fixed-point inversion).
    pub fn undistort(&self, d: [f64; 2]) -> Option<[f64; 2]> {
        if self.is_identity() {
            return Some(d);
        }
        let [x0, y0] = d;
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = self.radial(r2);
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let [tx, ty] = self.tangential(x, y, r2);
            let xn = (x0 - tx) / radial;
            let yn = (y0 - ty) / radial;
            if !xn.is_finite() || !yn.is_finite() {
                return None;
            }
            let step = (xn - x).hypot(yn - y);
            x = xn;
            y = yn;
            if step <= UNDISTORT_EPS {
                break;
            }
        }
        Some([x, y])
    }

    /// Fixed-count inversion as done by multi-view calibration libraries when
    /// bounding the undistorted frame: no convergence test, and a negative
    /// radial factor falls back to the distorted point.
    pub fn undistort_fixed(&self, d: [f64; 2], iterations: usize) -> [f64; 2] {
        let [x0, y0] = d;
        let (mut x, mut y) = (x0, y0);
        for _ in 0..iterations {
            let r2 = x * x + y * y;
            let inv = 1.0 / self.radial(r2);
            if inv < 0.0 {
                return [x0, y0];
            }
            let [tx, ty] = self.tangential(x, y, r2);
            x = (x0 - tx) * inv;
            y = (y0 - ty) * inv;
        }
        [x, y]
    }
}

/// Lens calibration: camera matrix plus distortion coefficients.
///
/// Values are validated on construction and never mutated afterwards; a new
/// calibration run produces a new record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationData {
    camera_matrix: Matrix3<f64>,
    distortion_coeffs: Vec<f64>,
}

impl CalibrationData {
    pub fn new(
        camera_matrix: Matrix3<f64>,
        distortion_coeffs: Vec<f64>,
    ) -> Result<Self, CalibrationError> {
        if camera_matrix.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFiniteCameraMatrix);
        }
        let k = Intrinsics::from_matrix(&camera_matrix);
        if k.fx.abs() < 1e-12 || k.fy.abs() < 1e-12 {
            return Err(CalibrationError::DegenerateFocalLength { fx: k.fx, fy: k.fy });
        }
        Distortion::from_coeffs(&distortion_coeffs)?;
        Ok(Self {
            camera_matrix,
            distortion_coeffs,
        })
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion_coeffs(&self) -> &[f64] {
        &self.distortion_coeffs
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics::from_matrix(&self.camera_matrix)
    }

    pub fn distortion(&self) -> Distortion {
        // Coefficients were validated in `new`.
        Distortion::from_coeffs(&self.distortion_coeffs).unwrap_or_default()
    }

    /// Map a raw (distorted) pixel to its ideal pixel position under the same intrinsics.
    pub fn undistort_pixel(&self, pixel: [f64; 2]) -> Option<[f64; 2]> {
        let k = self.intrinsics();
        let n = self.distortion().undistort(k.pixel_to_normalized(pixel)?)?;
        Some(k.normalized_to_pixel(n))
    }

    /// Map an ideal pixel to where the lens actually images it.
    pub fn distort_pixel(&self, pixel: [f64; 2]) -> Option<[f64; 2]> {
        let k = self.intrinsics();
        let d = self.distortion().distort(k.pixel_to_normalized(pixel)?);
        Some(k.normalized_to_pixel(d))
    }
}
