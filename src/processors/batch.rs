//! Batch polar transforms over a directory of `.mib` files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::listing::list_files;
use crate::processors::polar::{transform_file, ScanDims, TransformSummary};

/// Work item for parallel batch conversion.
#[derive(Debug, Clone)]
struct BatchTask {
    idx: usize,
    src: PathBuf,
    dest: PathBuf,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Inputs that were written, with their output paths
    pub converted: Vec<(PathBuf, PathBuf)>,
    /// Inputs that failed, with the rendered error chain
    pub failed: Vec<(PathBuf, String)>,
    /// Number of converted inputs recovered from a truncated acquisition
    pub truncated: usize,
}

/// Output path for `src` inside `output_dir`: `<stem>_polar.npy`.
fn output_path(src: &Path, output_dir: &Path) -> PathBuf {
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}_polar.npy", stem))
}

/// Polar transform every matching file in `input_dir`.
///
/// Files are listed with [`list_files`] and converted in parallel with
/// rayon. A failing file is logged and recorded in the report; it does not
/// stop the other conversions.
///
/// # Arguments
///
/// * `input_dir` - Directory containing the `.mib` files
/// * `output_dir` - Directory for the `<stem>_polar.npy` outputs
/// * `pattern` - Shell-style pattern matched against file names
/// * `scan` - Source of each file's scan dimensions
/// * `limit` - Maximum number of files to process (None for all)
/// * `config` - Detector and transform settings
///
/// # Errors
///
/// Returns an error only if `input_dir` cannot be listed.
pub fn convert_directory(
    input_dir: &Path,
    output_dir: &Path,
    pattern: &str,
    scan: &ScanDims,
    limit: Option<usize>,
    config: &PipelineConfig,
) -> Result<BatchReport> {
    let names = list_files(input_dir, pattern)
        .with_context(|| format!("Failed to list {}", input_dir.display()))?;

    let tasks: Vec<BatchTask> = names
        .iter()
        .map(|name| input_dir.join(name))
        .filter(|path| path.is_file())
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(idx, src)| BatchTask {
            idx,
            dest: output_path(&src, output_dir),
            src,
        })
        .collect();

    info!(
        "Converting {} of {} entries matching '{}'",
        tasks.len(),
        names.len(),
        pattern
    );

    let results: Vec<(BatchTask, Result<TransformSummary>)> = tasks
        .into_par_iter()
        .map(|task| {
            let result = transform_file(
                &task.src,
                &task.dest,
                scan,
                &config.detector,
                &config.polar,
            );
            (task, result)
        })
        .collect();

    let mut report = BatchReport::default();
    for (task, result) in results {
        match result {
            Ok(summary) => {
                info!(
                    "[{:04}] {} -> {} {:?}",
                    task.idx,
                    task.src.display(),
                    task.dest.display(),
                    summary.shape
                );
                if summary.truncated {
                    report.truncated += 1;
                }
                report.converted.push((task.src, task.dest));
            }
            Err(e) => {
                error!("[{:04}] Failed to convert {}: {:#}", task.idx, task.src.display(), e);
                report.failed.push((task.src, format!("{:#}", e)));
            }
        }
    }

    Ok(report)
}
