//! Visualization tools for diffraction patterns and polar images.
//!
//! This module renders 2D arrays as grayscale PNG heatmaps using the
//! plotters library.

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty image")]
    EmptyImage,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Upper bound on the longer image side in output pixels.
const MAX_SIDE: u32 = 1024;

/// Scale `image` to `[0, 1]`.
///
/// With `log_scale`, values go through `ln(1 + max(v, 0))` first. A constant
/// image maps to zeros. Non-finite values map to zero.
pub fn normalize(image: ArrayView2<f64>, log_scale: bool) -> Array2<f64> {
    let scaled = if log_scale {
        image.mapv(|v| v.max(0.0).ln_1p())
    } else {
        image.to_owned()
    };

    let (lo, hi) = scaled
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;

    scaled.mapv(|v| {
        if v.is_finite() && span > 0.0 {
            (v - lo) / span
        } else {
            0.0
        }
    })
}

/// Render a 2D array as a grayscale PNG.
///
/// Each array element becomes a square block of output pixels; the block
/// size is chosen so the longer side stays within 1024 pixels. Row 0 is
/// drawn at the top.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `image` - Values to render, e.g. a diffraction frame or polar image
/// * `log_scale` - Compress the dynamic range with `ln(1 + v)`
pub fn render_heatmap(output_path: &Path, image: ArrayView2<f64>, log_scale: bool) -> Result<()> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Err(VisualizationError::EmptyImage);
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let longest = rows.max(cols) as u32;
    let block = (MAX_SIDE / longest).max(1);
    let width = cols as u32 * block;
    let height = rows as u32 * block;

    let levels = normalize(image, log_scale);

    let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
    root.fill(&BLACK)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    for ((row, col), &level) in levels.indexed_iter() {
        if level <= 0.0 {
            continue;
        }
        let gray = (level * 255.0).round() as u8;
        let x0 = (col as u32 * block) as i32;
        let y0 = (row as u32 * block) as i32;
        let cell = Rectangle::new(
            [(x0, y0), (x0 + block as i32, y0 + block as i32)],
            RGBColor(gray, gray, gray).filled(),
        );
        root.draw(&cell)
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    }

    root.present()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_linear() {
        let image = array![[1.0, 3.0], [5.0, 2.0]];
        let levels = normalize(image.view(), false);

        assert_eq!(levels, array![[0.0, 0.5], [1.0, 0.25]]);
    }

    #[test]
    fn test_normalize_constant_image() {
        let image = Array2::<f64>::from_elem((3, 3), 7.0);
        let levels = normalize(image.view(), true);

        assert!(levels.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_normalize_log_ignores_negatives_and_nan() {
        let image = array![[-4.0, 0.0], [f64::NAN, std::f64::consts::E - 1.0]];
        let levels = normalize(image.view(), true);

        assert_eq!(levels[[0, 0]], 0.0);
        assert_eq!(levels[[1, 0]], 0.0);
        assert!((levels[[1, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_render_heatmap_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plots").join("frame.png");
        let image = Array2::from_shape_fn((8, 16), |(r, c)| (r * c) as f64);

        render_heatmap(&path, image.view(), false).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[test]
    fn test_render_heatmap_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.png");
        let image = Array2::<f64>::zeros((0, 4));

        let result = render_heatmap(&path, image.view(), false);

        assert!(matches!(result, Err(VisualizationError::EmptyImage)));
    }
}
