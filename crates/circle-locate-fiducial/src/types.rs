use std::fmt;

use serde::{Deserialize, Serialize};

/// Circle reported by a detector, in pixels of the image it ran on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircleCandidate {
    pub center_x: i32,
    pub center_y: i32,
    pub radius: i32,
}

impl CircleCandidate {
    pub fn new(center_x: i32, center_y: i32, radius: i32) -> Self {
        Self {
            center_x,
            center_y,
            radius,
        }
    }

    /// Snap a sub-pixel detection to the pixel grid, rounding halves to even.
    ///
    /// Hough accumulators report centres at `(i + 0.5) * dp`.
    pub fn from_subpixel(x: f32, y: f32, radius: f32) -> Self {
        Self::new(
            x.round_ties_even() as i32,
            y.round_ties_even() as i32,
            radius.round_ties_even() as i32,
        )
    }

    pub fn center(&self) -> [i32; 2] {
        [self.center_x, self.center_y]
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("{name} must be a positive finite number, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: i32 },

    #[error("max_radius ({max}) is below min_radius ({min})")]
    RadiusRange { min: i32, max: i32 },

    #[error("window_size must be greater than zero")]
    ZeroWindow,
}

/// Hough-transform settings handed to the circle detector unchanged.
///
/// Defaults match a ~130 px radius fiducial on a 2-3 MP inspection camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Inverse accumulator resolution.
    pub dp: f64,
    /// Minimum distance between detected centers, px.
    pub min_distance: f64,
    /// Upper Canny threshold.
    pub param1: f64,
    /// Accumulator vote threshold.
    pub param2: f64,
    pub min_radius: i32,
    /// `0` leaves the radius unbounded.
    pub max_radius: i32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            dp: 1.0,
            min_distance: 75.0,
            param1: 110.0,
            param2: 20.0,
            min_radius: 125,
            max_radius: 135,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        for (name, value) in [
            ("dp", self.dp),
            ("min_distance", self.min_distance),
            ("param1", self.param1),
            ("param2", self.param2),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ParamError::NotPositive { name, value });
            }
        }
        for (name, value) in [("min_radius", self.min_radius), ("max_radius", self.max_radius)] {
            if value < 0 {
                return Err(ParamError::Negative { name, value });
            }
        }
        if self.max_radius > 0 && self.max_radius < self.min_radius {
            return Err(ParamError::RadiusRange {
                min: self.min_radius,
                max: self.max_radius,
            });
        }
        Ok(())
    }
}

/// Where to look: expected fiducial center and the side of the square
/// search window around it, both in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpec {
    pub approx_center: [i32; 2],
    pub window_size: u32,
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self {
            approx_center: [1820, 760],
            window_size: 250,
        }
    }
}

impl SearchSpec {
    pub fn new(approx_center: [i32; 2], window_size: u32) -> Self {
        Self {
            approx_center,
            window_size,
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.window_size == 0 {
            return Err(ParamError::ZeroWindow);
        }
        Ok(())
    }

    pub fn half_window(&self) -> f64 {
        self.window_size as f64 / 2.0
    }
}

/// Selected fiducial and its offset from the image center in millimetres.
///
/// `offset_mm[1]` grows upwards: a circle above the center has a positive
/// vertical offset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub center: [i32; 2],
    pub radius: i32,
    pub offset_mm: [f64; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// The detector returned nothing for the whole image.
    NoCandidates,
    /// Circles were found, none inside the search window.
    OutsideWindow,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCandidates => f.write_str("no circles detected in the image"),
            Self::OutsideWindow => f.write_str("no circle inside the search window"),
        }
    }
}

/// Result of one `locate` call. Not finding the fiducial is a normal outcome.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocateOutcome {
    Found(DetectionResult),
    NotFound {
        reason: NotFoundReason,
        /// Candidates the detector reported before window filtering.
        raw_candidates: usize,
    },
}

impl LocateOutcome {
    pub fn found(&self) -> Option<&DetectionResult> {
        match self {
            Self::Found(r) => Some(r),
            Self::NotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl fmt::Display for LocateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(r) => write!(
                f,
                "center ({}, {}), radius {}, offset dx={:.3} mm dy={:.3} mm",
                r.center[0], r.center[1], r.radius, r.offset_mm[0], r.offset_mm[1]
            ),
            Self::NotFound {
                reason,
                raw_candidates,
            } => write!(f, "not found: {reason} ({raw_candidates} raw candidate(s))"),
        }
    }
}
