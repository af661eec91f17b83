//! Data writers for polar transform results.
//!
//! This module provides functions for writing resampled data to:
//! - NumPy `.npy` files, for loading back into Python analysis tools
//! - CSV with one row per azimuth segment and one column per radius

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::{ArrayBase, Data, Dimension};
use ndarray_npy::{WritableElement, WriteNpyError, WriteNpyExt};
use thiserror::Error;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// NPY serialization error.
    #[error("NPY write error for '{path}': {source}")]
    NpyError {
        path: String,
        #[source]
        source: WriteNpyError,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Radius labels do not match the image width.
    #[error("radius mismatch: image has {columns} radial columns, {radii} radii given")]
    RadiusMismatch { columns: usize, radii: usize },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Write an array of any dimension to a `.npy` file.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `array` - Array to store, e.g. a polar image or a 4D polar stack
///
/// # Example
///
/// ```no_run
/// use ndarray::Array2;
/// use stem_pipeline::core::writers::write_npy;
/// use std::path::Path;
///
/// let polar = Array2::<f64>::zeros((360, 100));
/// write_npy(Path::new("polar.npy"), &polar).unwrap();
/// ```
pub fn write_npy<A, S, D>(path: &Path, array: &ArrayBase<S, D>) -> Result<()>
where
    A: WritableElement,
    S: Data<Elem = A>,
    D: Dimension,
{
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    array
        .write_npy(&mut writer)
        .map_err(|e| WriteError::NpyError {
            path: path_str.clone(),
            source: e,
        })?;

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write a polar image to CSV.
///
/// The header row is `segment` followed by one `r{radius}` column per radius;
/// each following row holds one azimuth segment.
///
/// # Errors
///
/// Returns an error if `radii` does not match the number of image columns,
/// or if the file cannot be created or written to.
pub fn write_polar_csv<S>(path: &Path, polar: &ArrayBase<S, ndarray::Ix2>, radii: &[usize]) -> Result<()>
where
    S: Data<Elem = f64>,
{
    if polar.ncols() != radii.len() {
        return Err(WriteError::RadiusMismatch {
            columns: polar.ncols(),
            radii: radii.len(),
        });
    }

    ensure_parent_dirs(path)?;
    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);

    let path_str = path.display().to_string();

    let header: Vec<String> = std::iter::once("segment".to_string())
        .chain(radii.iter().map(|r| format!("r{}", r)))
        .collect();
    csv_writer
        .write_record(&header)
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for (segment, row) in polar.rows().into_iter().enumerate() {
        let record: Vec<String> = std::iter::once(segment.to_string())
            .chain(row.iter().map(|v| format!("{:.6}", v)))
            .collect();
        csv_writer
            .write_record(&record)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
