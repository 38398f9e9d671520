//! End-to-end helpers: decode, undistort, locate, then log and annotate.
//!
//! Only decoding and invalid input abort an image. Writing the result log,
//! the overlay or a calibration file can fail without losing the computed
//! result; such failures are logged at `error` level.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageReader};
use log::{error, info, warn};

use crate::core::{
    save_calibration, CalibrationStore, CalibrationSweep, CameraSolver, ChessboardPattern,
    CornerFinder, MapUndistorter, SolvedCalibration, SweepError, SweepEvent, UndistortError,
    Undistorter,
};
use crate::fiducial::{
    annotate, locate_candidates, CircleCandidate, CircleDetector, CircleLocator, ImageReport,
    LocateConfig, LocateError, LocateOutcome, LocateReport, ResultLog,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Undistort(#[from] UndistortError),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Sweep(#[from] SweepError),
}

/// Decode an image file, guessing the format from its contents.
pub fn load_image(path: &Path) -> Result<DynamicImage, PipelineError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    reader.decode().map_err(|source| PipelineError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Everything known about one processed image.
#[derive(Clone, Debug)]
pub struct ImageRun {
    pub path: PathBuf,
    /// Size of the image the locator ran on (after undistortion).
    pub image_size: (u32, u32),
    pub undistorted: bool,
    pub candidates: Vec<CircleCandidate>,
    pub outcome: LocateOutcome,
    pub annotated_path: Option<PathBuf>,
}

impl ImageRun {
    pub fn to_report(&self) -> ImageReport {
        ImageReport {
            image_path: self.path.display().to_string(),
            image_size: [self.image_size.0, self.image_size.1],
            undistorted: self.undistorted,
            candidates: self.candidates.clone(),
            outcome: self.outcome,
            annotated_path: self.annotated_path.as_ref().map(|p| p.display().to_string()),
        }
    }
}

/// Configured locate station: detector, calibration and output sinks.
///
/// Frames are undistorted by `U`, the pure-Rust [`MapUndistorter`] unless
/// another one is installed with [`with_undistorter`](Self::with_undistorter).
pub struct LocatePipeline<D, U = MapUndistorter> {
    locator: CircleLocator<D>,
    config: LocateConfig,
    store: Arc<CalibrationStore>,
    result_log: Option<ResultLog>,
    undistorter: U,
}

impl<D: CircleDetector> LocatePipeline<D> {
    pub fn new(
        detector: D,
        config: LocateConfig,
        store: Arc<CalibrationStore>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let locator = CircleLocator::new(detector, config.mm_per_pixel)?;
        let result_log = config.log_dir.as_ref().map(ResultLog::new);
        Ok(Self {
            locator,
            config,
            store,
            result_log,
            undistorter: MapUndistorter::new(),
        })
    }

    /// Pipeline with a store loaded from `config.calibration_path`.
    pub fn from_config(detector: D, config: LocateConfig) -> Result<Self, PipelineError> {
        let store = Arc::new(CalibrationStore::open(&config.calibration_path));
        Self::new(detector, config, store)
    }
}

impl<D: CircleDetector, U: Undistorter> LocatePipeline<D, U> {
    pub fn with_undistorter<V: Undistorter>(self, undistorter: V) -> LocatePipeline<D, V> {
        LocatePipeline {
            locator: self.locator,
            config: self.config,
            store: self.store,
            result_log: self.result_log,
            undistorter,
        }
    }

    pub fn config(&self) -> &LocateConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CalibrationStore> {
        &self.store
    }

    pub fn locator(&self) -> &CircleLocator<D> {
        &self.locator
    }

    pub fn undistorter(&self) -> &U {
        &self.undistorter
    }

    /// Undistort with the store's current calibration; raw input when there is none.
    pub fn undistort(&self, image: DynamicImage) -> Result<(DynamicImage, bool), PipelineError> {
        let Some(calibration) = self.store.load() else {
            return Ok((image, false));
        };
        let out = self
            .undistorter
            .undistort(&calibration, &image, &self.config.undistort)?;
        Ok((out, true))
    }

    /// Run one decoded image through undistortion, localization and the output sinks.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image, path), fields(path = %path.display()))
    )]
    pub fn process_image(
        &self,
        image: DynamicImage,
        path: &Path,
    ) -> Result<ImageRun, PipelineError> {
        let (image, undistorted) = self.undistort(image)?;
        let size = (image.width(), image.height());

        let candidates = self
            .locator
            .detect_candidates(&image, &self.config.detection)?;
        let outcome = locate_candidates(
            &candidates,
            size,
            &self.config.search,
            self.locator.mm_per_pixel(),
        );

        match &outcome {
            LocateOutcome::Found(r) => {
                info!("{}: {outcome}", path.display());
                if let Some(log) = &self.result_log {
                    if let Err(err) = log.append(path, r) {
                        error!("{err}");
                    }
                }
            }
            LocateOutcome::NotFound { .. } => warn!("{}: {outcome}", path.display()),
        }

        let annotated_path = self
            .config
            .annotate_dir
            .as_ref()
            .and_then(|dir| self.write_overlay(Path::new(dir), path, &image, &outcome));

        Ok(ImageRun {
            path: path.to_path_buf(),
            image_size: size,
            undistorted,
            candidates,
            outcome,
            annotated_path,
        })
    }

    fn write_overlay(
        &self,
        dir: &Path,
        source: &Path,
        image: &DynamicImage,
        outcome: &LocateOutcome,
    ) -> Option<PathBuf> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let out = dir.join(format!("{stem}_annotated.png"));
        let overlay = annotate(image, &self.config.search, outcome);
        let saved = std::fs::create_dir_all(dir)
            .map_err(|e| e.to_string())
            .and_then(|_| overlay.save(&out).map_err(|e| e.to_string()));
        match saved {
            Ok(()) => Some(out),
            Err(err) => {
                error!("cannot write overlay {}: {err}", out.display());
                None
            }
        }
    }

    pub fn process_path(&self, path: &Path) -> Result<ImageRun, PipelineError> {
        let image = load_image(path)?;
        self.process_image(image, path)
    }

    /// Process every path, collecting a report. Images that fail are logged and
    /// left out of the report.
    pub fn process_paths<P: AsRef<Path>>(&self, paths: &[P]) -> LocateReport {
        let mut report = LocateReport::new(&self.config);
        for path in paths {
            let path = path.as_ref();
            match self.process_path(path) {
                Ok(run) => report.images.push(run.to_report()),
                Err(err) => error!("{err}"),
            }
        }
        info!(
            "located fiducial in {} of {} image(s)",
            report.found_count(),
            paths.len()
        );
        report
    }
}

/// Run a calibration sweep over `dir`, publish the result to `store` and
/// write it to `out_path`.
///
/// The new calibration is published even if writing the file fails.
pub fn calibrate_dir<F, S>(
    dir: &Path,
    pattern: ChessboardPattern,
    finder: F,
    solver: &S,
    store: &CalibrationStore,
    out_path: &Path,
    on_event: impl FnMut(&SweepEvent),
) -> Result<SolvedCalibration, PipelineError>
where
    F: CornerFinder,
    S: CameraSolver + ?Sized,
{
    let sweep = CalibrationSweep::from_dir(finder, pattern, dir)?;
    let solved = sweep.run(solver, on_event)?;

    let (w, h) = solved.image_size;
    match save_calibration(out_path, &solved.calibration, Some([w, h]), Some(solved.rms_error)) {
        Ok(()) => info!("calibration written to {}", out_path.display()),
        Err(err) => error!("cannot write calibration to {}: {err}", out_path.display()),
    }
    store.replace(solved.calibration.clone());
    Ok(solved)
}
