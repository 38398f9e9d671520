//! Process-wide holder for the current lens calibration.

use std::path::Path;
use std::sync::{Arc, RwLock};

use log::{info, warn};

use crate::camera::CalibrationData;
use crate::persist::try_load_calibration;

/// Shared slot holding the active calibration, if any.
///
/// Readers get an `Arc` snapshot and never observe a half-written record;
/// writers publish a whole new value. Cloning a store is not supported; share
/// it behind an `Arc` instead.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    current: RwLock<Option<Arc<CalibrationData>>>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calibration(calibration: CalibrationData) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(calibration))),
        }
    }

    /// Store initialized from a calibration file. A missing or unreadable file
    /// leaves the store empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let store = Self::new();
        store.reload_from(path);
        store
    }

    /// Current calibration snapshot.
    pub fn load(&self) -> Option<Arc<CalibrationData>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_calibrated(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Publish a new calibration and return the one it replaced.
    pub fn replace(&self, calibration: CalibrationData) -> Option<Arc<CalibrationData>> {
        self.swap(Some(Arc::new(calibration)))
    }

    pub fn clear(&self) -> Option<Arc<CalibrationData>> {
        self.swap(None)
    }

    /// Re-read `path` and publish the result.
    ///
    /// On failure the store is emptied, so images are processed raw rather than
    /// with a calibration that no longer matches the file on disk. Returns
    /// whether a calibration is now active.
    pub fn reload_from(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match try_load_calibration(path) {
            Ok(calibration) => {
                info!("calibration loaded from {}", path.display());
                self.swap(Some(Arc::new(calibration)));
                true
            }
            Err(err) => {
                warn!(
                    "calibration unavailable ({}): {err}; continuing without undistortion",
                    path.display()
                );
                self.swap(None);
                false
            }
        }
    }

    fn swap(&self, next: Option<Arc<CalibrationData>>) -> Option<Arc<CalibrationData>> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}
