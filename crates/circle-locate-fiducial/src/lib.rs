//! Circle fiducial localization.
//!
//! ## Quickstart
//!
//! ```
//! use circle_locate_fiducial::{
//!     CircleCandidate, CircleLocator, DetectionParams, FixedDetector, SearchSpec,
//! };
//! use image::{DynamicImage, GrayImage};
//!
//! let detector = FixedDetector::new(vec![CircleCandidate::new(1825, 762, 130)]);
//! let locator = CircleLocator::new(detector, 0.117).unwrap();
//! let image = DynamicImage::ImageLuma8(GrayImage::new(2000, 1500));
//! let outcome = locator
//!     .locate(&image, &SearchSpec::new([1820, 760], 250), &DetectionParams::default())
//!     .unwrap();
//! println!("{outcome}");
//! ```
//!
//! The detector itself is a plug-in ([`CircleDetector`]); everything after
//! detection ([`filter_by_window`], [`select_nearest`], [`offset_mm`]) is pure
//! and usable on its own.

mod annotate;
mod detector;
mod io;
mod locator;
mod offset;
mod preprocess;
mod result_log;
mod types;
mod window;

pub use annotate::{annotate, APPROX_COLOR, CENTER_COLOR, CIRCLE_COLOR, WINDOW_COLOR};
pub use detector::{CircleDetector, DetectorError, FixedDetector};
pub use io::{FiducialIoError, ImageReport, LocateConfig, LocateReport};
pub use locator::{locate_candidates, CircleLocator, LocateError};
pub use offset::{image_center, offset_mm};
pub use preprocess::{prepare_gray, smooth, BLUR_SIGMA};
pub use result_log::{format_line, ResultLog, ResultLogError};
pub use types::{
    CircleCandidate, DetectionParams, DetectionResult, LocateOutcome, NotFoundReason, ParamError,
    SearchSpec,
};
pub use window::{filter_by_window, select_nearest};
