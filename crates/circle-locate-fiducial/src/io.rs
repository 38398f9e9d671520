//! JSON configuration and report helpers for fiducial localization.

use std::{
    fs,
    path::{Path, PathBuf},
};

use circle_locate_core::{UndistortParams, DEFAULT_CALIBRATION_PATH};
use serde::{Deserialize, Serialize};

use crate::locator::LocateError;
use crate::types::{CircleCandidate, DetectionParams, LocateOutcome, SearchSpec};

#[derive(thiserror::Error, Debug)]
pub enum FiducialIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn default_mm_per_pixel() -> f64 {
    0.117
}

fn default_calibration_path() -> String {
    DEFAULT_CALIBRATION_PATH.to_string()
}

fn default_log_dir() -> Option<String> {
    Some("log".to_string())
}

/// Station configuration for locating the fiducial in a batch of images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocateConfig {
    /// Millimetres covered by one pixel of the undistorted image.
    #[serde(default = "default_mm_per_pixel", alias = "pixel_per_mm")]
    pub mm_per_pixel: f64,
    #[serde(default)]
    pub search: SearchSpec,
    #[serde(default)]
    pub detection: DetectionParams,
    #[serde(default = "default_calibration_path")]
    pub calibration_path: String,
    #[serde(default)]
    pub undistort: UndistortParams,
    /// Directory for the daily result log; `null` disables it.
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub annotate_dir: Option<String>,
    #[serde(default)]
    pub report_path: Option<String>,
}

impl Default for LocateConfig {
    fn default() -> Self {
        Self {
            mm_per_pixel: default_mm_per_pixel(),
            search: SearchSpec::default(),
            detection: DetectionParams::default(),
            calibration_path: default_calibration_path(),
            undistort: UndistortParams::default(),
            log_dir: default_log_dir(),
            annotate_dir: None,
            report_path: None,
        }
    }
}

impl LocateConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, FiducialIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), FiducialIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), LocateError> {
        if !(self.mm_per_pixel.is_finite() && self.mm_per_pixel > 0.0) {
            return Err(LocateError::InvalidScale(self.mm_per_pixel));
        }
        self.search.validate()?;
        self.detection.validate()?;
        Ok(())
    }

    /// Resolve the report path.
    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("circle_locate_report.json"))
    }
}

/// Outcome for one image, as written by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReport {
    pub image_path: String,
    pub image_size: [u32; 2],
    pub undistorted: bool,
    pub candidates: Vec<CircleCandidate>,
    pub outcome: LocateOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_path: Option<String>,
}

/// Batch report: the search that was run and one entry per image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocateReport {
    pub mm_per_pixel: f64,
    pub search: SearchSpec,
    pub detection: DetectionParams,
    pub images: Vec<ImageReport>,
}

impl LocateReport {
    pub fn new(config: &LocateConfig) -> Self {
        Self {
            mm_per_pixel: config.mm_per_pixel,
            search: config.search,
            detection: config.detection,
            images: Vec::new(),
        }
    }

    pub fn found_count(&self) -> usize {
        self.images.iter().filter(|r| r.outcome.is_found()).count()
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, FiducialIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), FiducialIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
