//! Core data types and I/O operations.

pub mod listing;
pub mod loaders;
pub mod transforms;
pub mod writers;

pub use listing::{list_files, ListingError, NamePattern, DEFAULT_PATTERN};
pub use loaders::{
    read_frames, read_frames_with_scan_file, read_frames_with_scan_source, FrameLayout,
    FrameStack, LoaderError, NpyScanShape, ScanShapeSource,
};
pub use transforms::{polar_mesh, resample_polar, PolarError, PolarGrid, SamplingMode};
pub use writers::{write_npy, write_polar_csv, WriteError};
