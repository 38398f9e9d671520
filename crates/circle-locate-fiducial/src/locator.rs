//! Circle fiducial localization.
//!
//! Pipeline for one image:
//! 1. Convert to grayscale and smooth (see [`crate::prepare_gray`]).
//! 2. Run the [`CircleDetector`] over the whole image.
//! 3. Drop candidates outside the square search window.
//! 4. Keep the candidate nearest to the approximate center.
//! 5. Convert its offset from the image center to millimetres.

use image::DynamicImage;
use log::debug;

use crate::detector::{CircleDetector, DetectorError};
use crate::offset::{image_center, offset_mm};
use crate::preprocess::prepare_gray;
use crate::types::{
    CircleCandidate, DetectionParams, DetectionResult, LocateOutcome, NotFoundReason, ParamError,
    SearchSpec,
};
use crate::window::{filter_by_window, select_nearest};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum LocateError {
    #[error("image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("mm_per_pixel must be a positive finite number, got {0}")]
    InvalidScale(f64),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Detector(#[from] DetectorError),
}

/// Turn raw detector output into an outcome for an image of `image_size`.
///
/// Pure and deterministic: the same inputs always give the same outcome.
pub fn locate_candidates(
    candidates: &[CircleCandidate],
    image_size: (u32, u32),
    search: &SearchSpec,
    mm_per_pixel: f64,
) -> LocateOutcome {
    if candidates.is_empty() {
        return LocateOutcome::NotFound {
            reason: NotFoundReason::NoCandidates,
            raw_candidates: 0,
        };
    }
    let in_window = filter_by_window(candidates, search);
    debug!(
        "{} of {} candidate(s) inside {}px window at ({}, {})",
        in_window.len(),
        candidates.len(),
        search.window_size,
        search.approx_center[0],
        search.approx_center[1]
    );
    let Some(best) = select_nearest(&in_window, search.approx_center) else {
        return LocateOutcome::NotFound {
            reason: NotFoundReason::OutsideWindow,
            raw_candidates: candidates.len(),
        };
    };
    let center = image_center(image_size.0, image_size.1);
    LocateOutcome::Found(DetectionResult {
        center: best.center(),
        radius: best.radius,
        offset_mm: offset_mm(best.center(), center, mm_per_pixel),
    })
}

/// Finds the fiducial circle nearest to an expected position.
#[derive(Clone, Debug)]
pub struct CircleLocator<D> {
    detector: D,
    mm_per_pixel: f64,
}

impl<D: CircleDetector> CircleLocator<D> {
    pub fn new(detector: D, mm_per_pixel: f64) -> Result<Self, LocateError> {
        if !(mm_per_pixel.is_finite() && mm_per_pixel > 0.0) {
            return Err(LocateError::InvalidScale(mm_per_pixel));
        }
        Ok(Self {
            detector,
            mm_per_pixel,
        })
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn mm_per_pixel(&self) -> f64 {
        self.mm_per_pixel
    }

    /// Every circle the detector finds in the smoothed image, unfiltered.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn detect_candidates(
        &self,
        image: &DynamicImage,
        params: &DetectionParams,
    ) -> Result<Vec<CircleCandidate>, LocateError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(LocateError::EmptyImage { width, height });
        }
        params.validate()?;
        let gray = prepare_gray(image);
        let candidates = self.detector.detect(&gray, params)?;
        debug!("detector returned {} circle(s)", candidates.len());
        Ok(candidates)
    }

    /// Locate the fiducial in `image`.
    ///
    /// `NotFound` is a regular outcome; errors are reserved for unusable input
    /// and detector failures.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image, params), fields(w = image.width(), h = image.height()))
    )]
    pub fn locate(
        &self,
        image: &DynamicImage,
        search: &SearchSpec,
        params: &DetectionParams,
    ) -> Result<LocateOutcome, LocateError> {
        search.validate()?;
        let candidates = self.detect_candidates(image, params)?;
        Ok(locate_candidates(
            &candidates,
            (image.width(), image.height()),
            search,
            self.mm_per_pixel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FixedDetector;
    use approx::assert_relative_eq;
    use image::{GrayImage, RgbImage};
    use std::cell::Cell;

    fn c(x: i32, y: i32, r: i32) -> CircleCandidate {
        CircleCandidate::new(x, y, r)
    }

    fn frame() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(2000, 1500))
    }

    #[test]
    fn reference_scene() {
        let locator =
            CircleLocator::new(FixedDetector::new(vec![c(1825, 762, 130), c(1700, 760, 50)]), 0.117)
                .unwrap();
        let outcome = locator
            .locate(&frame(), &SearchSpec::new([1820, 760], 250), &DetectionParams::default())
            .unwrap();
        let r = outcome.found().copied().unwrap();
        assert_eq!(r.center, [1825, 762]);
        assert_eq!(r.radius, 130);
        assert_relative_eq!(r.offset_mm[0], 96.525, epsilon = 1e-9);
        assert_relative_eq!(r.offset_mm[1], -1.404, epsilon = 1e-9);
    }

    #[test]
    fn no_circles_at_all() {
        let outcome = locate_candidates(&[], (100, 100), &SearchSpec::new([50, 50], 20), 0.1);
        assert_eq!(
            outcome,
            LocateOutcome::NotFound {
                reason: NotFoundReason::NoCandidates,
                raw_candidates: 0
            }
        );
    }

    #[test]
    fn all_outside_window() {
        let outcome = locate_candidates(
            &[c(10, 10, 3), c(90, 90, 3)],
            (100, 100),
            &SearchSpec::new([50, 50], 20),
            0.1,
        );
        assert_eq!(
            outcome,
            LocateOutcome::NotFound {
                reason: NotFoundReason::OutsideWindow,
                raw_candidates: 2
            }
        );
    }

    #[test]
    fn repeated_calls_agree() {
        let cands = [c(55, 48, 7), c(45, 52, 9), c(52, 55, 4)];
        let search = SearchSpec::new([50, 50], 30);
        let a = locate_candidates(&cands, (101, 99), &search, 0.05);
        let b = locate_candidates(&cands, (101, 99), &search, 0.05);
        assert_eq!(a, b);
    }

    #[test]
    fn offset_is_from_image_center_not_approx() {
        let outcome = locate_candidates(&[c(60, 40, 5)], (100, 100), &SearchSpec::new([58, 42], 10), 1.0);
        assert_eq!(outcome.found().unwrap().offset_mm, [10.0, 10.0]);
    }

    #[test]
    fn detector_sees_grayscale_frame() {
        let seen = Cell::new((0, 0));
        let detector = |img: &GrayImage, _p: &DetectionParams| {
            seen.set(img.dimensions());
            Ok::<_, DetectorError>(Vec::new())
        };
        let locator = CircleLocator::new(detector, 0.117).unwrap();
        let outcome = locator
            .locate(&frame(), &SearchSpec::default(), &DetectionParams::default())
            .unwrap();
        assert!(!outcome.is_found());
        assert_eq!(seen.get(), (2000, 1500));
    }

    #[test]
    fn invalid_inputs_are_errors() {
        assert!(matches!(
            CircleLocator::new(FixedDetector::default(), 0.0),
            Err(LocateError::InvalidScale(_))
        ));
        let locator = CircleLocator::new(FixedDetector::default(), 0.1).unwrap();
        let empty = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        assert!(matches!(
            locator.locate(&empty, &SearchSpec::default(), &DetectionParams::default()),
            Err(LocateError::EmptyImage { .. })
        ));
        assert!(matches!(
            locator.locate(&frame(), &SearchSpec::new([0, 0], 0), &DetectionParams::default()),
            Err(LocateError::Param(ParamError::ZeroWindow))
        ));
        let bad = DetectionParams {
            min_distance: -1.0,
            ..DetectionParams::default()
        };
        assert!(matches!(
            locator.locate(&frame(), &SearchSpec::default(), &bad),
            Err(LocateError::Param(ParamError::NotPositive { .. }))
        ));
    }

    #[test]
    fn detector_errors_propagate() {
        let failing =
            |_: &GrayImage, _: &DetectionParams| Err::<Vec<CircleCandidate>, _>(DetectorError::Backend("boom".into()));
        let locator = CircleLocator::new(failing, 0.1).unwrap();
        assert!(matches!(
            locator.locate(&frame(), &SearchSpec::default(), &DetectionParams::default()),
            Err(LocateError::Detector(_))
        ));
    }
}
