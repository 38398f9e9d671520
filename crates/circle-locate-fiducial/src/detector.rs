use image::GrayImage;

use crate::types::{CircleCandidate, DetectionParams};

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("circle detector backend failed: {0}")]
    Backend(String),
}

/// Circle detection over a whole grayscale image.
///
/// Implementations return every circle they find, in their own order and in
/// pixel coordinates of `image`. Selection happens in [`crate::CircleLocator`].
pub trait CircleDetector {
    fn detect(
        &self,
        image: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<CircleCandidate>, DetectorError>;
}

impl<F> CircleDetector for F
where
    F: Fn(&GrayImage, &DetectionParams) -> Result<Vec<CircleCandidate>, DetectorError>,
{
    fn detect(
        &self,
        image: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<CircleCandidate>, DetectorError> {
        self(image, params)
    }
}

/// Detector that always reports the same circles. Useful for replaying
/// recorded detections and in tests.
#[derive(Clone, Debug, Default)]
pub struct FixedDetector {
    pub candidates: Vec<CircleCandidate>,
}

impl FixedDetector {
    pub fn new(candidates: Vec<CircleCandidate>) -> Self {
        Self { candidates }
    }
}

impl CircleDetector for FixedDetector {
    fn detect(
        &self,
        _image: &GrayImage,
        _params: &DetectionParams,
    ) -> Result<Vec<CircleCandidate>, DetectorError> {
        Ok(self.candidates.clone())
    }
}
