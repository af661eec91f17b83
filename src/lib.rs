//! 4D-STEM diffraction data pipeline.
//!
//! This crate provides tools for:
//! - Listing acquisition files by shell-style pattern
//! - Memory-mapped reading of Merlin `.mib` frame stacks, including
//!   truncated acquisitions
//! - Resolving scan dimensions from companion scan files
//! - Polar resampling of diffraction patterns (nearest or bilinear, area
//!   weighted), per frame or over a whole dataset in parallel
//!
//! # Example
//!
//! ```no_run
//! use stem_pipeline::config::{DetectorConfig, SamplingMode};
//! use stem_pipeline::core::{read_frames, resample_polar};
//!
//! let stack = read_frames("scan.mib", 256, 256, &DetectorConfig::default()).unwrap();
//! let frame = stack.frame(0, 0).unwrap();
//! let polar = resample_polar(frame.view(), 127.5, 127.5, 0, 100, 360, SamplingMode::Bilinear)
//!     .unwrap();
//! assert_eq!(polar.dim(), (360, 100));
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{BitDepth, DetectorConfig, PipelineConfig, PolarConfig, SamplingMode};
pub use core::loaders::{FrameStack, ScanShapeSource};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
