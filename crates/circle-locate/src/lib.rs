//! Lens calibration and circle fiducial localization.
//!
//! This crate provides:
//! - re-exports of the calibration crate (`circle_locate::core`) and the
//!   locator crate (`circle_locate::fiducial`)
//! - end-to-end helpers that decode an image, undistort it with the current
//!   calibration, locate the fiducial and feed the result log and overlays
//! - (feature `opencv`) OpenCV implementations of the circle detector, the
//!   undistorter, the chessboard corner finder and the camera solver
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::path::Path;
//! use circle_locate::fiducial::{CircleCandidate, FixedDetector, LocateConfig};
//! use circle_locate::LocatePipeline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let detector = FixedDetector::new(vec![CircleCandidate::new(1825, 762, 130)]);
//! let pipeline = LocatePipeline::from_config(detector, LocateConfig::default())?;
//! let run = pipeline.process_path(Path::new("part.png"))?;
//! println!("{}", run.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `circle_locate::core`: calibration record, undistortion, calibration store and sweep.
//! - `circle_locate::fiducial`: window filter, nearest selection, metric offset, locator.
//! - `circle_locate::pipeline`: decode → undistort → locate → log/annotate.
//! - `circle_locate::backend` (feature `opencv`): OpenCV detector and calibration routines.

pub use circle_locate_core as core;
pub use circle_locate_fiducial as fiducial;

pub use circle_locate_core::{CalibrationData, CalibrationStore, MapUndistorter, Undistorter};
pub use circle_locate_fiducial::{
    CircleCandidate, CircleDetector, CircleLocator, DetectionParams, DetectionResult,
    LocateOutcome, SearchSpec,
};

pub mod pipeline;

pub use pipeline::{calibrate_dir, load_image, ImageRun, LocatePipeline, PipelineError};

#[cfg(feature = "opencv")]
pub mod backend;
