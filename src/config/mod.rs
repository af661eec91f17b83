//! Configuration types for the 4D-STEM pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detector bit depth as selected in the Merlin acquisition software.
///
/// Only 1, 6 and 12 bit acquisitions are supported; 24 bit counting mode
/// writes a different record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BitDepth {
    One,
    Six,
    Twelve,
}

/// Storage type of one detector sample inside a frame record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    U8,
    U16,
}

impl ElementType {
    /// Width of one sample in bytes.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
        }
    }
}

impl BitDepth {
    /// Logical bit count.
    pub fn bits(self) -> u32 {
        match self {
            BitDepth::One => 1,
            BitDepth::Six => 6,
            BitDepth::Twelve => 12,
        }
    }

    /// Element type used to store samples of this depth.
    pub fn element_type(self) -> ElementType {
        match self {
            BitDepth::One | BitDepth::Six => ElementType::U8,
            BitDepth::Twelve => ElementType::U16,
        }
    }
}

/// Error returned for bit depths other than 1, 6 or 12.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unsupported bit depth {0}, expected 12, 6 or 1")]
pub struct UnsupportedBitDepth(pub u32);

impl TryFrom<u32> for BitDepth {
    type Error = UnsupportedBitDepth;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(BitDepth::One),
            6 => Ok(BitDepth::Six),
            12 => Ok(BitDepth::Twelve),
            other => Err(UnsupportedBitDepth(other)),
        }
    }
}

impl From<BitDepth> for u32 {
    fn from(depth: BitDepth) -> Self {
        depth.bits()
    }
}

/// Frame record parameters of a Merlin `.mib` acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detector rows per frame
    #[serde(default = "default_frame_size")]
    pub frame_rows: usize,

    /// Detector columns per frame
    #[serde(default = "default_frame_size")]
    pub frame_cols: usize,

    /// Extra scan columns recorded during flyback, dropped from the dataset
    #[serde(default = "default_flyback")]
    pub flyback: usize,

    /// Acquisition bit depth (1, 6 or 12)
    #[serde(default = "default_bit_depth")]
    pub bit_depth: BitDepth,

    /// Header bytes preceding every frame
    #[serde(default = "default_header_bytes")]
    pub header_bytes: usize,

    /// Footer bytes following every frame
    #[serde(default)]
    pub footer_bytes: usize,
}

fn default_frame_size() -> usize {
    256
}

fn default_flyback() -> usize {
    1
}

fn default_bit_depth() -> BitDepth {
    BitDepth::Twelve
}

fn default_header_bytes() -> usize {
    384
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            frame_rows: default_frame_size(),
            frame_cols: default_frame_size(),
            flyback: default_flyback(),
            bit_depth: default_bit_depth(),
            header_bytes: default_header_bytes(),
            footer_bytes: 0,
        }
    }
}

/// Sampling strategy used when reading the source image at polar grid points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Value of the nearest pixel
    #[default]
    Nearest,
    /// Weighted average of the four surrounding pixels
    Bilinear,
}

/// Geometry of the cartesian to polar transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolarConfig {
    /// Pattern centre along the detector row axis (defaults to the frame centre)
    #[serde(default)]
    pub center_row: Option<f64>,

    /// Pattern centre along the detector column axis (defaults to the frame centre)
    #[serde(default)]
    pub center_col: Option<f64>,

    /// Smallest radius in pixels
    #[serde(default)]
    pub r_min: usize,

    /// Radius upper bound in pixels, exclusive
    #[serde(default)]
    pub r_max: Option<usize>,

    /// Number of azimuthal segments
    #[serde(default = "default_segments")]
    pub segments: usize,

    #[serde(default)]
    pub mode: SamplingMode,
}

fn default_segments() -> usize {
    360
}

impl Default for PolarConfig {
    fn default() -> Self {
        Self {
            center_row: None,
            center_col: None,
            r_min: 0,
            r_max: None,
            segments: default_segments(),
            mode: SamplingMode::default(),
        }
    }
}

/// Polar geometry with every optional field filled in for a frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarGeometry {
    pub center_row: f64,
    pub center_col: f64,
    pub r_min: usize,
    pub r_max: usize,
    pub segments: usize,
    pub mode: SamplingMode,
}

impl PolarConfig {
    /// Fill in the centre and maximum radius for frames of the given shape.
    ///
    /// The default centre is the geometric frame centre. The default `r_max`
    /// is the largest radius whose bilinear neighbours all stay inside the
    /// frame: the distance from the centre to the nearest edge, less one for
    /// the forced far neighbour.
    pub fn resolve(&self, frame_rows: usize, frame_cols: usize) -> PolarGeometry {
        let center_row = self
            .center_row
            .unwrap_or((frame_rows as f64 - 1.0) / 2.0);
        let center_col = self
            .center_col
            .unwrap_or((frame_cols as f64 - 1.0) / 2.0);

        let r_max = self.r_max.unwrap_or_else(|| {
            let edge = center_row
                .min(center_col)
                .min(frame_rows as f64 - 1.0 - center_row)
                .min(frame_cols as f64 - 1.0 - center_col);
            if edge < 1.0 {
                0
            } else {
                // radius r is sampled up to floor(c + r) + 1, so r < edge - 1 is safe
                (edge - 1.0).floor() as usize
            }
        });

        PolarGeometry {
            center_row,
            center_col,
            r_min: self.r_min,
            r_max,
            segments: self.segments,
            mode: self.mode,
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub polar: PolarConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detector_config() {
        let config = DetectorConfig::default();
        assert_eq!(config.frame_rows, 256);
        assert_eq!(config.frame_cols, 256);
        assert_eq!(config.flyback, 1);
        assert_eq!(config.bit_depth, BitDepth::Twelve);
        assert_eq!(config.header_bytes, 384);
        assert_eq!(config.footer_bytes, 0);
    }

    #[test]
    fn test_bit_depth_element_types() {
        assert_eq!(BitDepth::Twelve.element_type(), ElementType::U16);
        assert_eq!(BitDepth::Six.element_type(), ElementType::U8);
        assert_eq!(BitDepth::One.element_type(), ElementType::U8);
        assert_eq!(ElementType::U16.bytes(), 2);
        assert_eq!(ElementType::U8.bytes(), 1);
    }

    #[test]
    fn test_bit_depth_try_from() {
        assert_eq!(BitDepth::try_from(12), Ok(BitDepth::Twelve));
        assert_eq!(BitDepth::try_from(6), Ok(BitDepth::Six));
        assert_eq!(BitDepth::try_from(1), Ok(BitDepth::One));
        assert_eq!(BitDepth::try_from(24), Err(UnsupportedBitDepth(24)));
    }

    #[test]
    fn test_unsupported_bit_depth_error() {
        let err: Box<dyn std::error::Error> = Box::new(UnsupportedBitDepth(8));
        assert_eq!(err.to_string(), "unsupported bit depth 8, expected 12, 6 or 1");

        let loader_err = crate::core::loaders::LoaderError::from(UnsupportedBitDepth(8));
        assert_eq!(loader_err.to_string(), err.to_string());
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = "detector:\n  bit_depth: 6\n  header_bytes: 0\npolar:\n  segments: 90\n  mode: bilinear\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.detector.bit_depth, BitDepth::Six);
        assert_eq!(config.detector.header_bytes, 0);
        assert_eq!(config.detector.frame_rows, 256);
        assert_eq!(config.polar.segments, 90);
        assert_eq!(config.polar.mode, SamplingMode::Bilinear);
    }

    #[test]
    fn test_yaml_rejects_bad_bit_depth() {
        let yaml = "detector:\n  bit_depth: 24\n";
        let result: Result<PipelineConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");

        let mut config = PipelineConfig::default();
        config.polar.r_max = Some(100);
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.polar.r_max, Some(100));
        assert_eq!(loaded.detector.bit_depth, BitDepth::Twelve);
    }

    #[test]
    fn test_resolve_defaults_to_frame_centre() {
        let geometry = PolarConfig::default().resolve(256, 256);

        assert!((geometry.center_row - 127.5).abs() < 1e-12);
        assert!((geometry.center_col - 127.5).abs() < 1e-12);
        assert_eq!(geometry.r_max, 126);
        assert_eq!(geometry.segments, 360);
    }

    #[test]
    fn test_resolve_keeps_explicit_values() {
        let config = PolarConfig {
            center_row: Some(10.0),
            center_col: Some(12.0),
            r_min: 2,
            r_max: Some(8),
            segments: 16,
            mode: SamplingMode::Bilinear,
        };
        let geometry = config.resolve(64, 64);

        assert_eq!(geometry.center_row, 10.0);
        assert_eq!(geometry.center_col, 12.0);
        assert_eq!(geometry.r_min, 2);
        assert_eq!(geometry.r_max, 8);
    }
}
