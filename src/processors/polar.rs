//! Polar transforms of whole 4D datasets.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use ndarray::{s, Array2, Array4};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{DetectorConfig, PolarConfig, PolarGeometry};
use crate::core::loaders::{self, FrameStack, LoaderError};
use crate::core::transforms::{PolarError, PolarGrid};
use crate::core::writers::write_npy;

/// Errors that can occur while transforming a dataset.
#[derive(Debug, Error)]
pub enum StackTransformError {
    #[error("failed to read frame: {0}")]
    Frame(#[from] LoaderError),

    #[error("failed to resample frame ({row}, {col}): {source}")]
    Resample {
        row: usize,
        col: usize,
        #[source]
        source: PolarError,
    },
}

/// Where a dataset's scan dimensions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDims {
    /// Explicit `(rows, cols)`
    Fixed { rows: usize, cols: usize },
    /// Shape of an existing scan file
    File(PathBuf),
    /// Companion scan file next to the `.mib`, same stem, given extension
    Companion { extension: String },
}

impl ScanDims {
    /// Open `mib_path` with dimensions from this source.
    pub fn open(
        &self,
        mib_path: &Path,
        config: &DetectorConfig,
    ) -> std::result::Result<FrameStack, LoaderError> {
        match self {
            ScanDims::Fixed { rows, cols } => {
                loaders::read_frames(mib_path, *rows, *cols, config)
            }
            ScanDims::File(scan_file) => {
                loaders::read_frames_with_scan_file(scan_file, mib_path, config)
            }
            ScanDims::Companion { extension } => {
                let scan_file = mib_path.with_extension(extension);
                loaders::read_frames_with_scan_file(&scan_file, mib_path, config)
            }
        }
    }
}

/// Summary of a dataset transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSummary {
    /// Shape of the written array: scan rows, scan cols, segments, radii
    pub shape: [usize; 4],
    pub truncated: bool,
}

/// Transform every frame of `stack` onto the polar grid of `geometry`.
///
/// Frames are resampled in parallel. The result has shape
/// `(scan_rows, scan_cols, segments, radii)`.
pub fn transform_stack(
    stack: &FrameStack,
    geometry: &PolarGeometry,
) -> std::result::Result<Array4<f64>, StackTransformError> {
    transform_stack_with(stack, geometry, || {})
}

/// Like [`transform_stack`], calling `on_frame` after each frame finishes.
pub fn transform_stack_with<F>(
    stack: &FrameStack,
    geometry: &PolarGeometry,
    on_frame: F,
) -> std::result::Result<Array4<f64>, StackTransformError>
where
    F: Fn() + Sync,
{
    let grid = PolarGrid::new(
        geometry.center_row,
        geometry.center_col,
        geometry.r_min,
        geometry.r_max,
        geometry.segments,
    );
    let (segments, n_radii) = grid.output_shape();
    let positions: Vec<(usize, usize)> = stack.positions().collect();

    let polar_frames: Vec<Array2<f64>> = positions
        .par_iter()
        .map(|&(row, col)| {
            let frame = stack.frame(row, col)?;
            let polar = grid
                .resample(frame.view(), geometry.mode)
                .map_err(|source| StackTransformError::Resample { row, col, source })?;
            on_frame();
            Ok(polar)
        })
        .collect::<std::result::Result<_, StackTransformError>>()?;

    let mut out = Array4::<f64>::zeros((stack.scan_rows(), stack.scan_cols(), segments, n_radii));
    for (&(row, col), polar) in positions.iter().zip(&polar_frames) {
        out.slice_mut(s![row, col, .., ..]).assign(polar);
    }

    Ok(out)
}

/// Read a `.mib` file, polar transform every frame, and write an `.npy`.
///
/// # Arguments
///
/// * `input` - Path to the `.mib` file
/// * `output` - Path of the `.npy` file to write
/// * `scan` - Source of the scan dimensions
/// * `detector` - Frame record parameters
/// * `polar` - Transform geometry; unset centre and `r_max` are filled in
///   from the frame size
pub fn transform_file(
    input: &Path,
    output: &Path,
    scan: &ScanDims,
    detector: &DetectorConfig,
    polar: &PolarConfig,
) -> Result<TransformSummary> {
    let stack = scan
        .open(input, detector)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let geometry = polar.resolve(detector.frame_rows, detector.frame_cols);

    let data = transform_stack(&stack, &geometry)
        .with_context(|| format!("Failed to transform {}", input.display()))?;
    write_npy(output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let shape = [data.shape()[0], data.shape()[1], data.shape()[2], data.shape()[3]];
    info!("{} -> {} {:?}", input.display(), output.display(), shape);

    Ok(TransformSummary {
        shape,
        truncated: stack.is_truncated(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BitDepth, SamplingMode};
    use crate::core::loaders::tests::{small_config, write_mib};
    use crate::core::transforms::resample_polar;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn geometry(mode: SamplingMode) -> PolarGeometry {
        PolarGeometry {
            center_row: 1.5,
            center_col: 1.0,
            r_min: 0,
            r_max: 1,
            segments: 4,
            mode,
        }
    }

    #[test]
    fn test_transform_stack_shape_and_values() {
        let config = small_config(BitDepth::Twelve, 1);
        let file = write_mib(&config, 2 * 3);
        let stack = loaders::read_frames(file.path(), 2, 2, &config).unwrap();
        let geometry = PolarGeometry {
            r_max: 2,
            center_row: 1.5,
            ..geometry(SamplingMode::Nearest)
        };

        let data = transform_stack(&stack, &geometry).unwrap();

        assert_eq!(data.shape(), &[2, 2, 4, 2]);
        for (row, col) in stack.positions() {
            let frame = stack.frame(row, col).unwrap();
            let expected =
                resample_polar(frame.view(), 1.5, 1.0, 0, 2, 4, SamplingMode::Nearest).unwrap();
            assert_eq!(data.slice(s![row, col, .., ..]), expected);
        }
    }

    #[test]
    fn test_transform_stack_reports_progress() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let config = small_config(BitDepth::Six, 0);
        let file = write_mib(&config, 6);
        let stack = loaders::read_frames(file.path(), 2, 3, &config).unwrap();
        let done = AtomicUsize::new(0);

        transform_stack_with(&stack, &geometry(SamplingMode::Bilinear), || {
            done.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        assert_eq!(done.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_transform_stack_out_of_bounds() {
        let config = small_config(BitDepth::Six, 0);
        let file = write_mib(&config, 1);
        let stack = loaders::read_frames(file.path(), 1, 1, &config).unwrap();
        let geometry = PolarGeometry {
            r_max: 5,
            ..geometry(SamplingMode::Nearest)
        };

        let result = transform_stack(&stack, &geometry);

        assert!(matches!(
            result,
            Err(StackTransformError::Resample { row: 0, col: 0, .. })
        ));
    }

    #[test]
    fn test_transform_file_with_companion_scan() {
        let dir = TempDir::new().unwrap();
        let config = small_config(BitDepth::Twelve, 1);
        let mib = write_mib(&config, 2 * 3);
        let mib_path = dir.path().join("scan.mib");
        std::fs::copy(mib.path(), &mib_path).unwrap();
        ndarray_npy::write_npy(dir.path().join("scan.npy"), &Array2::<f32>::zeros((2, 2))).unwrap();

        let output = dir.path().join("out").join("scan_polar.npy");
        let polar = PolarConfig {
            segments: 8,
            ..PolarConfig::default()
        };
        let scan = ScanDims::Companion {
            extension: "npy".to_string(),
        };

        let summary = transform_file(&mib_path, &output, &scan, &config, &polar).unwrap();

        // 4x3 frames centred at (1.5, 1.0) leave no room for a full radius
        assert_eq!(summary.shape, [2, 2, 8, 0]);
        assert!(!summary.truncated);
        assert!(output.exists());
    }

    #[test]
    fn test_transform_file_truncated() {
        let dir = TempDir::new().unwrap();
        let config = small_config(BitDepth::Six, 1);
        let mib = write_mib(&config, 3 + 1);
        let output = dir.path().join("polar.npy");
        let polar = PolarConfig {
            center_row: Some(1.5),
            center_col: Some(1.0),
            r_max: Some(1),
            segments: 4,
            ..PolarConfig::default()
        };

        let summary = transform_file(
            mib.path(),
            &output,
            &ScanDims::Fixed { rows: 3, cols: 2 },
            &config,
            &polar,
        )
        .unwrap();

        assert_eq!(summary.shape, [1, 2, 4, 1]);
        assert!(summary.truncated);
    }
}
