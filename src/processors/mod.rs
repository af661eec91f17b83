//! Data processing modules.

pub mod batch;
pub mod polar;

// Re-export key types for convenience
pub use batch::{convert_directory, BatchReport};
pub use polar::{
    transform_file, transform_stack, transform_stack_with, ScanDims, StackTransformError,
    TransformSummary,
};
