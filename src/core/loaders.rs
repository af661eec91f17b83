//! Data loaders for Merlin `.mib` detector files and companion scan files.
//!
//! This module provides:
//! - A lazy, memory-mapped 4D view over `.mib` frame records
//! - Recovery of partially written acquisitions
//! - Scan dimension lookup from a companion scan image

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use memmap2::Mmap;
use ndarray::{s, Array2, Array4, ArrayD};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};
use thiserror::Error;

use crate::config::{DetectorConfig, ElementType, UnsupportedBitDepth};

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    UnsupportedBitDepth(#[from] UnsupportedBitDepth),

    #[error("'{path}' holds {file_len} bytes but {required} are needed for {scan_rows} scan rows")]
    ShortFile {
        path: PathBuf,
        file_len: u64,
        required: u64,
        scan_rows: usize,
    },

    #[error("record size overflows for {scan_cols} scan columns with {flyback} flyback")]
    SizeOverflow { scan_cols: usize, flyback: usize },

    #[error("frame ({row}, {col}) is outside the {rows}x{cols} scan")]
    FrameOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("scan file '{path}' has {ndim} dimensions, expected 2")]
    ScanShape { path: PathBuf, ndim: usize },

    #[error(
        "no scan shape loader for '{0}' (built in: .npy; DM3/DM4 survey images need a ScanShapeSource)"
    )]
    UnsupportedScanFile(PathBuf),

    #[error("failed to read NPY file '{path}': {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ReadNpyError,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Byte layout of one frame record: header, payload, footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub header_bytes: usize,
    pub frame_rows: usize,
    pub frame_cols: usize,
    pub element: ElementType,
    pub footer_bytes: usize,
}

impl FrameLayout {
    /// Build the record layout for a detector configuration.
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            header_bytes: config.header_bytes,
            frame_rows: config.frame_rows,
            frame_cols: config.frame_cols,
            element: config.bit_depth.element_type(),
            footer_bytes: config.footer_bytes,
        }
    }

    /// Samples per frame.
    #[inline]
    pub fn pixels(&self) -> usize {
        self.frame_rows * self.frame_cols
    }

    /// Payload size in bytes.
    #[inline]
    pub fn payload_bytes(&self) -> usize {
        self.pixels() * self.element.bytes()
    }

    /// Full record size in bytes.
    #[inline]
    pub fn record_bytes(&self) -> usize {
        self.header_bytes + self.payload_bytes() + self.footer_bytes
    }
}

/// Read-only 4D view over the frames of a `.mib` file.
///
/// Indexed as `(scan_row, scan_col, detector_row, detector_col)`. Frames are
/// decoded on demand from the memory map, which is released when the view is
/// dropped. The backing file must not be modified while the view is alive.
#[derive(Debug)]
pub struct FrameStack {
    mmap: Mmap,
    layout: FrameLayout,
    scan_rows: usize,
    scan_cols: usize,
    /// Records per scan row on disk, flyback included
    row_stride: usize,
    truncated: bool,
    source_path: PathBuf,
}

impl FrameStack {
    /// Shape as `[scan_rows, scan_cols, frame_rows, frame_cols]`.
    pub fn shape(&self) -> [usize; 4] {
        [
            self.scan_rows,
            self.scan_cols,
            self.layout.frame_rows,
            self.layout.frame_cols,
        ]
    }

    #[inline]
    pub fn scan_rows(&self) -> usize {
        self.scan_rows
    }

    #[inline]
    pub fn scan_cols(&self) -> usize {
        self.scan_cols
    }

    /// Number of usable frames.
    #[inline]
    pub fn len(&self) -> usize {
        self.scan_rows * self.scan_cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// True if fewer scan rows were recovered than requested.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Payload bytes of the frame at `(row, col)`.
    fn payload(&self, row: usize, col: usize) -> Result<&[u8]> {
        if row >= self.scan_rows || col >= self.scan_cols {
            return Err(LoaderError::FrameOutOfRange {
                row,
                col,
                rows: self.scan_rows,
                cols: self.scan_cols,
            });
        }

        let record = row * self.row_stride + col;
        let start = record * self.layout.record_bytes() + self.layout.header_bytes;
        // layout was validated against the file length when the stack was opened
        Ok(&self.mmap[start..start + self.layout.payload_bytes()])
    }

    /// Decode the diffraction pattern at scan position `(row, col)`.
    ///
    /// 1 and 6 bit samples are widened from `u8`; 12 bit samples are read as
    /// little-endian `u16`.
    pub fn frame(&self, row: usize, col: usize) -> Result<Array2<u16>> {
        let bytes = self.payload(row, col)?;
        let cols = self.layout.frame_cols;
        let shape = (self.layout.frame_rows, cols);

        let frame = match self.layout.element {
            ElementType::U8 => Array2::from_shape_fn(shape, |(r, c)| u16::from(bytes[r * cols + c])),
            ElementType::U16 => Array2::from_shape_fn(shape, |(r, c)| {
                let i = 2 * (r * cols + c);
                u16::from_le_bytes([bytes[i], bytes[i + 1]])
            }),
        };
        Ok(frame)
    }

    /// Iterate over `(row, col)` scan positions in raster order.
    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.scan_rows).flat_map(move |r| (0..self.scan_cols).map(move |c| (r, c)))
    }

    /// Copy the whole dataset into memory.
    pub fn to_array(&self) -> Result<Array4<u16>> {
        let mut data = Array4::<u16>::zeros(self.shape());
        for (row, col) in self.positions() {
            let frame = self.frame(row, col)?;
            data.slice_mut(s![row, col, .., ..]).assign(&frame);
        }
        Ok(data)
    }

    /// Mean diffraction pattern over all scan positions.
    ///
    /// Returns zeros for an empty stack.
    pub fn mean_frame(&self) -> Result<Array2<f64>> {
        let mut sum = Array2::<f64>::zeros((self.layout.frame_rows, self.layout.frame_cols));
        for (row, col) in self.positions() {
            let frame = self.frame(row, col)?;
            sum.zip_mut_with(&frame, |acc, &v| *acc += f64::from(v));
        }
        if !self.is_empty() {
            sum /= self.len() as f64;
        }
        Ok(sum)
    }
}

/// Read a Merlin `.mib` file into a lazy 4D view.
///
/// The file is treated as `scan_rows x (scan_cols + flyback)` fixed-size
/// records. When the file is shorter than that, the acquisition is assumed to
/// have stopped early and the number of scan rows is recomputed from the file
/// size as `floor(len / ((scan_cols + 1) * record_bytes))`. Flyback columns
/// are excluded from the returned view.
///
/// # Arguments
///
/// * `path` - Path to the `.mib` file
/// * `scan_rows` - Vertical scan dimension in pixels
/// * `scan_cols` - Horizontal scan dimension in pixels, flyback excluded
/// * `config` - Frame record parameters
///
/// # Errors
///
/// Returns an error if the file cannot be opened or mapped, or if the
/// recovered row count still does not fit in the file.
///
/// # Example
///
/// ```no_run
/// use stem_pipeline::config::DetectorConfig;
/// use stem_pipeline::core::loaders::read_frames;
///
/// let stack = read_frames("scan.mib", 128, 128, &DetectorConfig::default()).unwrap();
/// let dp = stack.frame(0, 0).unwrap();
/// ```
pub fn read_frames<P: AsRef<Path>>(
    path: P,
    scan_rows: usize,
    scan_cols: usize,
    config: &DetectorConfig,
) -> Result<FrameStack> {
    let path = path.as_ref();
    let layout = FrameLayout::from_config(config);
    let record_bytes = layout.record_bytes() as u64;
    let overflow = || LoaderError::SizeOverflow {
        scan_cols,
        flyback: config.flyback,
    };
    let row_stride = scan_cols.checked_add(config.flyback).ok_or_else(overflow)?;
    let row_bytes = (row_stride as u64)
        .checked_mul(record_bytes)
        .ok_or_else(overflow)?;

    let io_err = |e| LoaderError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let file = File::open(path).map_err(io_err)?;
    let file_len = file.metadata().map_err(io_err)?.len();

    debug!(
        "{}: {} bytes, record {} bytes ({} header, {} payload, {} footer)",
        path.display(),
        file_len,
        record_bytes,
        layout.header_bytes,
        layout.payload_bytes(),
        layout.footer_bytes
    );

    // an overflowing size can never fit in the file
    let expected = (scan_rows as u64).checked_mul(row_bytes);
    let (rows, truncated) = if expected.map_or(true, |expected| file_len < expected) {
        let per_row = (scan_cols as u64)
            .checked_add(1)
            .and_then(|cols| cols.checked_mul(record_bytes))
            .ok_or_else(overflow)?;
        let recovered = if per_row == 0 {
            0
        } else {
            usize::try_from(file_len / per_row).map_or(scan_rows, |r| r.min(scan_rows))
        };
        warn!(
            "{}: {} bytes are too few for {} scan rows, reading {}",
            path.display(),
            file_len,
            scan_rows,
            recovered
        );
        (recovered, true)
    } else {
        (scan_rows, false)
    };

    let required = (rows as u64).checked_mul(row_bytes).ok_or_else(overflow)?;
    if required > file_len {
        return Err(LoaderError::ShortFile {
            path: path.to_path_buf(),
            file_len,
            required,
            scan_rows: rows,
        });
    }

    // SAFETY: read-only mapping; callers must not modify the file while the
    // returned view is alive.
    let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;

    info!(
        "Opened {} as {}x{} frames of {}x{}",
        path.display(),
        rows,
        scan_cols,
        layout.frame_rows,
        layout.frame_cols
    );

    Ok(FrameStack {
        mmap,
        layout,
        scan_rows: rows,
        scan_cols,
        row_stride,
        truncated,
        source_path: path.to_path_buf(),
    })
}

/// Source of scan dimensions for a 4D acquisition.
///
/// Implementations read a companion file recorded alongside the detector
/// data (e.g. a survey image from the microscope control software) and report
/// its 2D shape as `(rows, cols)`.
pub trait ScanShapeSource {
    fn scan_shape(&self, path: &Path) -> Result<(usize, usize)>;
}

/// Scan shape from a NumPy `.npy` image of any common numeric dtype.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyScanShape;

impl NpyScanShape {
    fn try_read<T: ReadableElement>(path: &Path) -> Result<Option<Vec<usize>>> {
        let file = File::open(path).map_err(|e| LoaderError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        match ArrayD::<T>::read_npy(file) {
            Ok(array) => Ok(Some(array.shape().to_vec())),
            Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
            Err(e) => Err(LoaderError::Npy {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl ScanShapeSource for NpyScanShape {
    fn scan_shape(&self, path: &Path) -> Result<(usize, usize)> {
        let readers: [fn(&Path) -> Result<Option<Vec<usize>>>; 10] = [
            Self::try_read::<f32>,
            Self::try_read::<f64>,
            Self::try_read::<u8>,
            Self::try_read::<u16>,
            Self::try_read::<u32>,
            Self::try_read::<u64>,
            Self::try_read::<i8>,
            Self::try_read::<i16>,
            Self::try_read::<i32>,
            Self::try_read::<i64>,
        ];

        for read in readers {
            if let Some(shape) = read(path)? {
                return match shape.as_slice() {
                    [rows, cols] => Ok((*rows, *cols)),
                    _ => Err(LoaderError::ScanShape {
                        path: path.to_path_buf(),
                        ndim: shape.len(),
                    }),
                };
            }
        }

        Err(LoaderError::UnsupportedScanFile(path.to_path_buf()))
    }
}

/// Pick a scan shape loader from the file extension.
///
/// Only `.npy` is built in. DigitalMicrograph `.dm3`/`.dm4` survey images
/// need their own [`ScanShapeSource`] passed to
/// [`read_frames_with_scan_source`].
pub fn scan_shape_source_for(path: &Path) -> Result<Box<dyn ScanShapeSource>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("npy") => Ok(Box::new(NpyScanShape)),
        _ => Err(LoaderError::UnsupportedScanFile(path.to_path_buf())),
    }
}

/// Read a `.mib` file using scan dimensions from a companion scan file.
///
/// The loader is chosen from the scan file's extension; see
/// [`read_frames_with_scan_source`] to supply another one.
pub fn read_frames_with_scan_file<P, Q>(
    scan_file: P,
    frame_path: Q,
    config: &DetectorConfig,
) -> Result<FrameStack>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let scan_file = scan_file.as_ref();
    let source = scan_shape_source_for(scan_file)?;
    read_frames_with_scan_source(source.as_ref(), scan_file, frame_path, config)
}

/// Read a `.mib` file using scan dimensions reported by `source`.
pub fn read_frames_with_scan_source<Q: AsRef<Path>>(
    source: &dyn ScanShapeSource,
    scan_file: &Path,
    frame_path: Q,
    config: &DetectorConfig,
) -> Result<FrameStack> {
    let (scan_rows, scan_cols) = source.scan_shape(scan_file)?;
    info!(
        "Scan shape {}x{} from {}",
        scan_rows,
        scan_cols,
        scan_file.display()
    );
    read_frames(frame_path, scan_rows, scan_cols, config)
}
