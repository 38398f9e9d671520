//! OpenCV implementations of the detector, undistortion and calibration seams.

mod cv;

pub use self::cv::{
    ChessboardCornerFinder, HoughCircleDetector, OpenCvCalibrator, OpenCvUndistorter,
};
