//! circle-locate CLI: locate the fiducial in images, or calibrate the lens.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::info;

use circle_locate::backend::{
    ChessboardCornerFinder, HoughCircleDetector, OpenCvCalibrator, OpenCvUndistorter,
};
use circle_locate::core::{
    list_images, CalibrationStore, ChessboardPattern, SweepEvent, DEFAULT_CALIBRATION_PATH,
};
use circle_locate::fiducial::LocateConfig;
use circle_locate::{calibrate_dir, LocatePipeline};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "circle-locate")]
#[command(about = "Locate a circular fiducial and report its offset from image center in mm")]
#[command(version)]
struct Cli {
    /// Log debug output.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate the fiducial in one image or every image of a folder.
    Locate(LocateArgs),

    /// Calibrate the lens from a folder of chessboard images.
    Calibrate(CalibrateArgs),

    /// Write a config file with the default station settings.
    InitConfig {
        #[arg(long, default_value = "circle_locate.json")]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct LocateArgs {
    /// Image file or folder of images.
    input: PathBuf,

    /// JSON config; command-line options override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Expected fiducial center x (px).
    #[arg(long)]
    approx_x: Option<i32>,

    /// Expected fiducial center y (px).
    #[arg(long)]
    approx_y: Option<i32>,

    /// Side of the square search window (px).
    #[arg(long)]
    window: Option<u32>,

    /// Millimetres per pixel.
    #[arg(long)]
    mm_per_pixel: Option<f64>,

    #[arg(long)]
    min_radius: Option<i32>,

    #[arg(long)]
    max_radius: Option<i32>,

    /// Calibration file (JSON).
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Folder for annotated overlays.
    #[arg(long)]
    annotate_dir: Option<PathBuf>,

    /// Where to write the JSON report.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not append to the daily result log.
    #[arg(long)]
    no_log: bool,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Folder of chessboard images.
    dir: PathBuf,

    /// Inner corners per row.
    #[arg(long, default_value_t = 14)]
    cols: u32,

    /// Inner corners per column.
    #[arg(long, default_value_t = 12)]
    rows: u32,

    #[arg(long, default_value_t = 1.0)]
    square_size: f64,

    #[arg(long, default_value = DEFAULT_CALIBRATION_PATH)]
    out: PathBuf,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_log)?;

    match cli.command {
        Commands::Locate(args) => run_locate(args),
        Commands::Calibrate(args) => run_calibrate(args),
        Commands::InitConfig { out } => {
            LocateConfig::default().write_json(&out)?;
            println!("wrote {}", out.display());
            Ok(())
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(_verbose: bool, json: bool) -> CliResult<()> {
    let _ = tracing_log::LogTracer::init();
    circle_locate::core::init_tracing(json);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool, _json: bool) -> CliResult<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    circle_locate::core::init_with_level(level)?;
    Ok(())
}

fn build_config(args: &LocateArgs) -> CliResult<LocateConfig> {
    let mut cfg = match &args.config {
        Some(path) => LocateConfig::load_json(path)?,
        None => LocateConfig::default(),
    };
    if let Some(x) = args.approx_x {
        cfg.search.approx_center[0] = x;
    }
    if let Some(y) = args.approx_y {
        cfg.search.approx_center[1] = y;
    }
    if let Some(w) = args.window {
        cfg.search.window_size = w;
    }
    if let Some(s) = args.mm_per_pixel {
        cfg.mm_per_pixel = s;
    }
    if let Some(r) = args.min_radius {
        cfg.detection.min_radius = r;
    }
    if let Some(r) = args.max_radius {
        cfg.detection.max_radius = r;
    }
    if let Some(p) = &args.calibration {
        cfg.calibration_path = p.display().to_string();
    }
    if let Some(d) = &args.annotate_dir {
        cfg.annotate_dir = Some(d.display().to_string());
    }
    if let Some(r) = &args.report {
        cfg.report_path = Some(r.display().to_string());
    }
    if args.no_log {
        cfg.log_dir = None;
    }
    Ok(cfg)
}

fn input_paths(input: &Path) -> CliResult<Vec<PathBuf>> {
    if input.is_dir() {
        let paths = list_images(input)?;
        if paths.is_empty() {
            return Err(format!("no images in {}", input.display()).into());
        }
        Ok(paths)
    } else {
        Ok(vec![input.to_path_buf()])
    }
}

fn run_locate(args: LocateArgs) -> CliResult<()> {
    let cfg = build_config(&args)?;
    let paths = input_paths(&args.input)?;
    let pipeline =
        LocatePipeline::from_config(HoughCircleDetector, cfg)?.with_undistorter(OpenCvUndistorter);

    let report = if let [single] = paths.as_slice() {
        // A single unreadable image is a hard error.
        let run = pipeline.process_path(single)?;
        println!("{}: {}", single.display(), run.outcome);
        let mut report = circle_locate::fiducial::LocateReport::new(pipeline.config());
        report.images.push(run.to_report());
        report
    } else {
        let report = pipeline.process_paths(&paths);
        for image in &report.images {
            println!("{}: {}", image.image_path, image.outcome);
        }
        report
    };

    let report_path = pipeline.config().report_path();
    report.write_json(&report_path)?;
    info!("report written to {}", report_path.display());
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> CliResult<()> {
    let pattern = ChessboardPattern {
        inner_cols: args.cols,
        inner_rows: args.rows,
        square_size: args.square_size,
    };
    let store = CalibrationStore::new();
    let mut accepted = 0usize;
    let solved = calibrate_dir(
        &args.dir,
        pattern,
        ChessboardCornerFinder::default(),
        &OpenCvCalibrator::default(),
        &store,
        &args.out,
        |event| {
            if matches!(event, SweepEvent::Accepted { .. }) {
                accepted += 1;
            }
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
        },
    )?;
    println!(
        "calibrated from {accepted} view(s) at {}x{} px, rms {:.4} px",
        solved.image_size.0, solved.image_size.1, solved.rms_error
    );
    Ok(())
}
