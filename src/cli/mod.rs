//! Command-line interface for the 4D-STEM pipeline.

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ndarray::Array2;

use crate::config::{BitDepth, PolarGeometry, SamplingMode};
use crate::core::loaders::FrameStack;
use crate::core::transforms::PolarGrid;
use crate::processors::ScanDims;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "stem-pipeline")]
#[command(about = "4D-STEM frame loading and polar transform pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List directory entries matching a shell-style pattern
    List {
        /// Directory to list
        directory: PathBuf,
        /// Shell-style pattern matched against entry names
        #[arg(short, long, default_value = crate::core::listing::DEFAULT_PATTERN)]
        pattern: String,
    },

    /// Print the shape of a .mib dataset
    Info {
        /// Input .mib file
        mib_file: PathBuf,
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        detector: DetectorArgs,
    },

    /// Polar transform every frame of a .mib file into an .npy array
    Polar {
        /// Input .mib file
        mib_file: PathBuf,
        /// Output .npy file
        output: PathBuf,
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        detector: DetectorArgs,
        #[command(flatten)]
        polar: PolarArgs,
    },

    /// Polar transform every matching file in a directory
    Batch {
        /// Directory containing .mib files
        input_dir: PathBuf,
        /// Output directory for <stem>_polar.npy files
        output_dir: PathBuf,
        /// Shell-style pattern matched against file names
        #[arg(short, long, default_value = "*.mib")]
        pattern: String,
        /// Fixed scan rows for every file
        #[arg(long, requires = "scan_cols")]
        scan_rows: Option<usize>,
        /// Fixed scan columns for every file
        #[arg(long, requires = "scan_rows")]
        scan_cols: Option<usize>,
        /// Extension of the companion scan file next to each input
        #[arg(long, default_value = "npy")]
        scan_ext: String,
        /// Limit number of files to process
        #[arg(long)]
        limit: Option<usize>,
        #[command(flatten)]
        detector: DetectorArgs,
        #[command(flatten)]
        polar: PolarArgs,
    },

    /// Render one frame, or the mean pattern, as a PNG
    Render {
        /// Input .mib file
        mib_file: PathBuf,
        /// Output PNG file
        output: PathBuf,
        /// Scan row of the frame (mean pattern if omitted)
        #[arg(long, requires = "col")]
        row: Option<usize>,
        /// Scan column of the frame
        #[arg(long, requires = "row")]
        col: Option<usize>,
        /// Render the polar transform instead of the raw frame
        #[arg(long)]
        polar: bool,
        /// Use a logarithmic intensity scale
        #[arg(long)]
        log: bool,
        /// Also write the polar image as CSV
        #[arg(long, requires = "polar")]
        csv: Option<PathBuf>,
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        detector: DetectorArgs,
        #[command(flatten)]
        polar_args: PolarArgs,
    },
}

/// Scan dimensions, given directly or through a scan file.
#[derive(Args)]
struct ScanArgs {
    /// Vertical scan dimension
    #[arg(long, requires = "scan_cols", conflicts_with = "scan_file")]
    scan_rows: Option<usize>,
    /// Horizontal scan dimension, flyback excluded
    #[arg(long, requires = "scan_rows")]
    scan_cols: Option<usize>,
    /// Scan file whose 2D shape gives the scan dimensions
    #[arg(long)]
    scan_file: Option<PathBuf>,
}

impl ScanArgs {
    fn dims(&self) -> Result<ScanDims> {
        match (self.scan_rows, self.scan_cols, &self.scan_file) {
            (Some(rows), Some(cols), None) => Ok(ScanDims::Fixed { rows, cols }),
            (None, None, Some(path)) => Ok(ScanDims::File(path.clone())),
            _ => bail!("Give either --scan-rows and --scan-cols, or --scan-file"),
        }
    }
}

/// Detector overrides on top of the config file.
#[derive(Args)]
struct DetectorArgs {
    /// Bits per pixel (12, 6 or 1)
    #[arg(long, value_parser = parse_bit_depth)]
    bit_depth: Option<BitDepth>,
    /// Flyback columns per scan row
    #[arg(long)]
    flyback: Option<usize>,
    /// Header bytes per frame record
    #[arg(long)]
    header_bytes: Option<usize>,
}

/// Polar geometry overrides on top of the config file.
#[derive(Args)]
struct PolarArgs {
    /// Centre row in frame pixels
    #[arg(long)]
    center_row: Option<f64>,
    /// Centre column in frame pixels
    #[arg(long)]
    center_col: Option<f64>,
    /// Inner radius (inclusive)
    #[arg(long)]
    r_min: Option<usize>,
    /// Outer radius (exclusive)
    #[arg(long)]
    r_max: Option<usize>,
    /// Number of azimuth segments
    #[arg(long)]
    segments: Option<usize>,
    /// Sampling mode (nearest or bilinear)
    #[arg(long, value_parser = parse_mode)]
    mode: Option<SamplingMode>,
}

fn parse_bit_depth(s: &str) -> std::result::Result<BitDepth, String> {
    let bits: u32 = s.parse().map_err(|e| format!("{}", e))?;
    BitDepth::try_from(bits).map_err(|e| e.to_string())
}

fn parse_mode(s: &str) -> std::result::Result<SamplingMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "nearest" => Ok(SamplingMode::Nearest),
        "bilinear" => Ok(SamplingMode::Bilinear),
        other => Err(format!("unknown mode '{}', expected nearest or bilinear", other)),
    }
}

/// Apply command-line overrides to a copy of `config`.
fn effective_config(
    config: &PipelineConfig,
    detector: &DetectorArgs,
    polar: Option<&PolarArgs>,
) -> PipelineConfig {
    let mut config = config.clone();
    if let Some(bit_depth) = detector.bit_depth {
        config.detector.bit_depth = bit_depth;
    }
    if let Some(flyback) = detector.flyback {
        config.detector.flyback = flyback;
    }
    if let Some(header_bytes) = detector.header_bytes {
        config.detector.header_bytes = header_bytes;
    }

    if let Some(polar) = polar {
        if polar.center_row.is_some() {
            config.polar.center_row = polar.center_row;
        }
        if polar.center_col.is_some() {
            config.polar.center_col = polar.center_col;
        }
        if let Some(r_min) = polar.r_min {
            config.polar.r_min = r_min;
        }
        if polar.r_max.is_some() {
            config.polar.r_max = polar.r_max;
        }
        if let Some(segments) = polar.segments {
            config.polar.segments = segments;
        }
        if let Some(mode) = polar.mode {
            config.polar.mode = mode;
        }
    }
    config
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a progress bar over `len` frames
fn create_progress(len: usize, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            let head: String = value.chars().take(36).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn describe_geometry(geometry: &PolarGeometry) -> String {
    format!(
        "c=({:.1}, {:.1}) r={}..{} n={}",
        geometry.center_row, geometry.center_col, geometry.r_min, geometry.r_max, geometry.segments
    )
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    let result = match cli.command {
        Commands::List { directory, pattern } => cmd_list(&directory, &pattern),
        Commands::Info { mib_file, scan, detector } => {
            cmd_info(&mib_file, &scan, &effective_config(&config, &detector, None))
        }
        Commands::Polar { mib_file, output, scan, detector, polar } => cmd_polar(
            &mib_file,
            &output,
            &scan,
            &effective_config(&config, &detector, Some(&polar)),
        ),
        Commands::Batch {
            input_dir,
            output_dir,
            pattern,
            scan_rows,
            scan_cols,
            scan_ext,
            limit,
            detector,
            polar,
        } => {
            let scan = match (scan_rows, scan_cols) {
                (Some(rows), Some(cols)) => ScanDims::Fixed { rows, cols },
                _ => ScanDims::Companion { extension: scan_ext },
            };
            cmd_batch(
                &input_dir,
                &output_dir,
                &pattern,
                &scan,
                limit,
                &effective_config(&config, &detector, Some(&polar)),
            )
        }
        Commands::Render {
            mib_file,
            output,
            row,
            col,
            polar,
            log,
            csv,
            scan,
            detector,
            polar_args,
        } => cmd_render(
            &mib_file,
            &output,
            row.zip(col),
            polar,
            log,
            csv.as_deref(),
            &scan,
            &effective_config(&config, &detector, Some(&polar_args)),
        ),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn cmd_list(directory: &Path, pattern: &str) -> Result<()> {
    let names = crate::core::listing::list_files(directory, pattern)
        .with_context(|| format!("Failed to list {}", directory.display()))?;

    for name in &names {
        println!("{}", name);
    }
    info!("{} entries match '{}'", names.len(), pattern);

    Ok(())
}

fn open_stack(mib_file: &Path, scan: &ScanArgs, config: &PipelineConfig) -> Result<FrameStack> {
    let dims = scan.dims()?;
    dims.open(mib_file, &config.detector)
        .with_context(|| format!("Failed to open {}", mib_file.display()))
}

fn cmd_info(mib_file: &Path, scan: &ScanArgs, config: &PipelineConfig) -> Result<()> {
    let stack = open_stack(mib_file, scan, config)?;
    let layout = stack.layout();

    print_summary(
        "Dataset",
        &[
            ("File", mib_file.display().to_string()),
            ("Shape", format!("{:?}", stack.shape())),
            ("Frames", stack.len().to_string()),
            ("Bit depth", config.detector.bit_depth.bits().to_string()),
            ("Record bytes", layout.record_bytes().to_string()),
            ("Flyback", config.detector.flyback.to_string()),
            ("Truncated", stack.is_truncated().to_string()),
        ],
    );

    Ok(())
}

fn cmd_polar(
    mib_file: &Path,
    output: &Path,
    scan: &ScanArgs,
    config: &PipelineConfig,
) -> Result<()> {
    use crate::core::writers;
    use crate::processors::polar;

    let start = Instant::now();

    let stack = open_stack(mib_file, scan, config)?;
    let geometry = config
        .polar
        .resolve(config.detector.frame_rows, config.detector.frame_cols);

    println!("Transforming {} frames...", stack.len());
    println!("Geometry: {}", describe_geometry(&geometry));

    let progress = create_progress(stack.len(), "Resampling");
    let data = polar::transform_stack_with(&stack, &geometry, || progress.inc(1));
    progress.finish_and_clear();
    let data = data.with_context(|| format!("Failed to transform {}", mib_file.display()))?;

    let spinner = create_spinner("Writing .npy...");
    let written = writers::write_npy(output, &data);
    spinner.finish_and_clear();
    written.with_context(|| format!("Failed to write {}", output.display()))?;

    print_summary(
        "Polar Transform Complete",
        &[
            ("Input file", mib_file.display().to_string()),
            ("Output file", output.display().to_string()),
            ("Output shape", format!("{:?}", data.shape())),
            ("Mode", format!("{:?}", geometry.mode)),
            ("Truncated", stack.is_truncated().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    Ok(())
}

fn cmd_batch(
    input_dir: &Path,
    output_dir: &Path,
    pattern: &str,
    scan: &ScanDims,
    limit: Option<usize>,
    config: &PipelineConfig,
) -> Result<()> {
    use crate::processors::batch;

    let start = Instant::now();

    println!("Converting .mib files in batch mode...");
    println!("Input directory: {}", input_dir.display());
    println!("Output directory: {}", output_dir.display());
    println!("Pattern: {}", pattern);

    if let Some(lim) = limit {
        println!("Processing limit: {} files", lim);
    }

    let spinner = create_spinner("Transforming files...");
    let report = batch::convert_directory(input_dir, output_dir, pattern, scan, limit, config);
    spinner.finish_and_clear();
    let report = report?;

    for (src, reason) in &report.failed {
        eprintln!("Failed: {}: {}", src.display(), reason);
    }

    print_summary(
        "Batch Conversion Complete",
        &[
            ("Input directory", input_dir.display().to_string()),
            ("Output directory", output_dir.display().to_string()),
            ("Converted", report.converted.len().to_string()),
            ("Truncated", report.truncated.to_string()),
            ("Failed", report.failed.len().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    if !report.failed.is_empty() {
        bail!(
            "{} of {} files failed",
            report.failed.len(),
            report.failed.len() + report.converted.len()
        );
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_render(
    mib_file: &Path,
    output: &Path,
    position: Option<(usize, usize)>,
    polar: bool,
    log_scale: bool,
    csv: Option<&Path>,
    scan: &ScanArgs,
    config: &PipelineConfig,
) -> Result<()> {
    use crate::core::writers;
    use crate::visualization;

    let start = Instant::now();

    let stack = open_stack(mib_file, scan, config)?;

    let spinner = create_spinner("Loading frame...");
    let frame: Result<Array2<f64>> = match position {
        Some((row, col)) => stack
            .frame(row, col)
            .map(|f| f.mapv(f64::from))
            .map_err(Into::into),
        None => stack.mean_frame().map_err(Into::into),
    };
    spinner.finish_and_clear();
    let frame = frame?;

    let (image, geometry) = if polar {
        let geometry = config
            .polar
            .resolve(config.detector.frame_rows, config.detector.frame_cols);
        let grid = PolarGrid::new(
            geometry.center_row,
            geometry.center_col,
            geometry.r_min,
            geometry.r_max,
            geometry.segments,
        );
        let image = grid
            .resample(frame.view(), geometry.mode)
            .context("Failed to resample frame")?;
        (image, Some(geometry))
    } else {
        (frame, None)
    };

    visualization::render_heatmap(output, image.view(), log_scale)
        .with_context(|| format!("Failed to render {}", output.display()))?;

    if let (Some(csv_path), Some(geometry)) = (csv, geometry.as_ref()) {
        let radii: Vec<usize> = (geometry.r_min..geometry.r_max).collect();
        writers::write_polar_csv(csv_path, &image, &radii)
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    }

    let source = match position {
        Some((row, col)) => format!("frame ({}, {})", row, col),
        None => "mean pattern".to_string(),
    };

    print_summary(
        "Render Complete",
        &[
            ("Input file", mib_file.display().to_string()),
            ("Source", source),
            ("Output PNG", output.display().to_string()),
            ("Image shape", format!("{:?}", image.shape())),
            (
                "Geometry",
                geometry.as_ref().map_or("raw".to_string(), describe_geometry),
            ),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bit_depth() {
        assert_eq!(parse_bit_depth("6"), Ok(BitDepth::Six));
        assert!(parse_bit_depth("8").is_err());
        assert!(parse_bit_depth("twelve").is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("Bilinear"), Ok(SamplingMode::Bilinear));
        assert_eq!(parse_mode("nearest"), Ok(SamplingMode::Nearest));
        assert!(parse_mode("cubic").is_err());
    }

    #[test]
    fn test_scan_args_dims() {
        let fixed = ScanArgs {
            scan_rows: Some(4),
            scan_cols: Some(5),
            scan_file: None,
        };
        assert_eq!(fixed.dims().unwrap(), ScanDims::Fixed { rows: 4, cols: 5 });

        let file = ScanArgs {
            scan_rows: None,
            scan_cols: None,
            scan_file: Some(PathBuf::from("scan.npy")),
        };
        assert_eq!(file.dims().unwrap(), ScanDims::File(PathBuf::from("scan.npy")));

        let missing = ScanArgs {
            scan_rows: None,
            scan_cols: None,
            scan_file: None,
        };
        assert!(missing.dims().is_err());
    }

    #[test]
    fn test_effective_config_overrides() {
        let cli = Cli::try_parse_from([
            "stem-pipeline",
            "polar",
            "in.mib",
            "out.npy",
            "--scan-rows",
            "2",
            "--scan-cols",
            "3",
            "--bit-depth",
            "1",
            "--segments",
            "90",
            "--mode",
            "bilinear",
            "--r-max",
            "50",
        ])
        .unwrap();

        let Commands::Polar { detector, polar, .. } = cli.command else {
            panic!("expected polar command");
        };
        let config = effective_config(&PipelineConfig::default(), &detector, Some(&polar));

        assert_eq!(config.detector.bit_depth, BitDepth::One);
        assert_eq!(config.detector.flyback, 1);
        assert_eq!(config.polar.segments, 90);
        assert_eq!(config.polar.mode, SamplingMode::Bilinear);
        assert_eq!(config.polar.r_max, Some(50));
        assert_eq!(config.polar.center_row, None);
    }

    #[test]
    fn test_scan_args_conflict() {
        let result = Cli::try_parse_from([
            "stem-pipeline",
            "info",
            "in.mib",
            "--scan-rows",
            "2",
            "--scan-cols",
            "3",
            "--scan-file",
            "scan.npy",
        ]);

        assert!(result.is_err());
    }
}
