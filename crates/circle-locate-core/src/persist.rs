//! On-disk calibration record.

use std::{fs, path::Path};

use log::warn;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::camera::{CalibrationData, CalibrationError};

/// File the calibration sweep writes and the locator reads by default.
pub const DEFAULT_CALIBRATION_PATH: &str = "calibration_data.json";

#[derive(thiserror::Error, Debug)]
pub enum CalibrationIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid calibration record: {0}")]
    Invalid(#[from] CalibrationError),
}

/// JSON layout of a calibration file.
///
/// `camera_matrix` is row-major. `image_size` and `rms_error` describe the
/// sweep that produced the record and are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub camera_matrix: [[f64; 3]; 3],
    #[serde(default)]
    pub distortion_coeffs: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rms_error: Option<f64>,
}

impl CalibrationFile {
    pub fn from_calibration(
        calibration: &CalibrationData,
        image_size: Option<[u32; 2]>,
        rms_error: Option<f64>,
    ) -> Self {
        let m = calibration.camera_matrix();
        let row = |r: usize| [m[(r, 0)], m[(r, 1)], m[(r, 2)]];
        Self {
            camera_matrix: [row(0), row(1), row(2)],
            distortion_coeffs: calibration.distortion_coeffs().to_vec(),
            image_size,
            rms_error,
        }
    }

    pub fn to_calibration(&self) -> Result<CalibrationData, CalibrationError> {
        let [r0, r1, r2] = self.camera_matrix;
        let m = Matrix3::new(
            r0[0], r0[1], r0[2], //
            r1[0], r1[1], r1[2], //
            r2[0], r2[1], r2[2],
        );
        CalibrationData::new(m, self.distortion_coeffs.clone())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Read and validate a calibration file.
pub fn try_load_calibration(path: impl AsRef<Path>) -> Result<CalibrationData, CalibrationIoError> {
    Ok(CalibrationFile::load_json(path)?.to_calibration()?)
}

/// Read a calibration file, logging and returning `None` when it is missing
/// or unusable.
pub fn load_calibration(path: impl AsRef<Path>) -> Option<CalibrationData> {
    let path = path.as_ref();
    match try_load_calibration(path) {
        Ok(c) => Some(c),
        Err(err) => {
            warn!("no usable calibration at {}: {err}", path.display());
            None
        }
    }
}

/// Write `calibration` to `path` as pretty JSON, creating parent directories.
pub fn save_calibration(
    path: impl AsRef<Path>,
    calibration: &CalibrationData,
    image_size: Option<[u32; 2]>,
    rms_error: Option<f64>,
) -> Result<(), CalibrationIoError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    CalibrationFile::from_calibration(calibration, image_size, rms_error).write_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> CalibrationData {
        let m = Matrix3::new(1510.2, 0.0, 1012.5, 0.0, 1508.9, 748.1, 0.0, 0.0, 1.0);
        CalibrationData::new(m, vec![-0.21, 0.08, 0.0004, -0.0002, -0.015]).unwrap()
    }

    #[test]
    fn save_then_load_preserves_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CALIBRATION_PATH);
        save_calibration(&path, &calibration(), Some([2000, 1500]), Some(0.31)).unwrap();

        assert_eq!(try_load_calibration(&path).unwrap(), calibration());
        let file = CalibrationFile::load_json(&path).unwrap();
        assert_eq!(file.image_size, Some([2000, 1500]));
        assert_eq!(file.camera_matrix[1], [0.0, 1508.9, 748.1]);
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let raw = r#"{ "camera_matrix": [[800, 0, 320], [0, 800, 240], [0, 0, 1]] }"#;
        let file: CalibrationFile = serde_json::from_str(raw).unwrap();
        let c = file.to_calibration().unwrap();
        assert!(c.distortion_coeffs().is_empty());
        assert_eq!(c.intrinsics().cy, 240.0);
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_calibration(dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn invalid_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{ "camera_matrix": [[0, 0, 0], [0, 0, 0], [0, 0, 1]], "distortion_coeffs": [0.1] }"#,
        )
        .unwrap();
        assert!(matches!(
            try_load_calibration(&path),
            Err(CalibrationIoError::Invalid(_))
        ));
        assert!(load_calibration(&path).is_none());
    }
}
