//! Daily text log of located fiducials.
//!
//! One file per calendar day (`YYYY_MM_DD.txt`), one line per detection:
//!
//! ```text
//! [14:03:27] [part_0412.png] Radius: 130.000, center: (1825.000, 762.000), offset(mm): dx=96.525, dy=-1.404
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};

use crate::types::DetectionResult;

#[derive(thiserror::Error, Debug)]
pub enum ResultLogError {
    #[error("result log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Render one log line (without trailing newline).
pub fn format_line(time: &NaiveDateTime, image_name: &str, result: &DetectionResult) -> String {
    format!(
        "[{}] [{}] Radius: {:.3}, center: ({:.3}, {:.3}), offset(mm): dx={:.3}, dy={:.3}",
        time.format("%H:%M:%S"),
        image_name,
        result.radius as f64,
        result.center[0] as f64,
        result.center[1] as f64,
        result.offset_mm[0],
        result.offset_mm[1]
    )
}

/// Appends detections to per-day files under one directory.
#[derive(Clone, Debug)]
pub struct ResultLog {
    dir: PathBuf,
}

impl ResultLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, time: &NaiveDateTime) -> PathBuf {
        self.dir
            .join(format!("{}.txt", time.format("%Y_%m_%d")))
    }

    /// Append `result` for `image_path` using the local wall clock.
    pub fn append(&self, image_path: &Path, result: &DetectionResult) -> Result<PathBuf, ResultLogError> {
        self.append_at(&Local::now().naive_local(), image_path, result)
    }

    /// Append with an explicit timestamp; returns the file written to.
    pub fn append_at(
        &self,
        time: &NaiveDateTime,
        image_path: &Path,
        result: &DetectionResult,
    ) -> Result<PathBuf, ResultLogError> {
        let path = self.path_for(time);
        let io_err = |source| ResultLogError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image_path.display().to_string());
        let line = format_line(time, &name, result);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        Ok(path)
    }
}
