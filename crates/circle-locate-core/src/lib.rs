//! Lens calibration support for circle-locate.
//!
//! Holds the calibration record and its on-disk form, the distortion model,
//! pure-Rust undistortion, and the chessboard sweep that produces a new
//! calibration from a folder of images. Corner finding and the camera solver
//! are pluggable through [`CornerFinder`] and [`CameraSolver`].

mod camera;
mod image_list;
mod logger;
mod persist;
mod sampling;
mod store;
mod sweep;
mod undistort;

pub use camera::{CalibrationData, CalibrationError, Distortion, Intrinsics};
pub use image_list::{is_image_path, list_images, natural_cmp, IMAGE_EXTENSIONS};
pub use persist::{
    load_calibration, save_calibration, try_load_calibration, CalibrationFile, CalibrationIoError,
    DEFAULT_CALIBRATION_PATH,
};
pub use sampling::sample_bilinear;
pub use store::CalibrationStore;
pub use sweep::{
    CalibrationSweep, CalibrationView, CameraSolver, ChessboardPattern, CornerFinder,
    SolvedCalibration, SweepError, SweepEvent, MIN_VIEWS,
};
pub use undistort::{
    optimal_new_intrinsics, undistort, undistort_dynamic, undistort_with, MapUndistorter,
    PixelRect, UndistortError, UndistortMap, UndistortParams, Undistorter,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
