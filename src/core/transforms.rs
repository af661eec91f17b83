//! Cartesian to polar transforms of diffraction patterns.
//!
//! A regular (radius, azimuth) grid is mapped back into fractional cartesian
//! pixel coordinates, which are then used to look up intensities in the
//! source image. Rows increase downwards and azimuth is measured from the
//! column axis towards the negative row axis, so a point at `phi = pi/2` lies
//! above the centre.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, Array3, ArrayView2};
use thiserror::Error;

pub use crate::config::SamplingMode;

/// Errors that can occur while resampling an image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolarError {
    #[error("pixel ({row}, {col}) is outside the {rows}x{cols} image")]
    OutOfBounds {
        row: i64,
        col: i64,
        rows: usize,
        cols: usize,
    },
}

/// Result type for polar transform operations.
pub type Result<T> = std::result::Result<T, PolarError>;

/// Azimuth of every segment: `k * 2*pi / segments` for `k` in `0..segments`.
pub fn azimuths(segments: usize) -> Array1<f64> {
    let step = 2.0 * PI / segments as f64;
    Array1::from_shape_fn(segments, |k| k as f64 * step)
}

/// Arc length covered by one angular bin at each radius in `r_min..r_max`.
///
/// Used to weight polar samples by the area they represent in the source
/// image.
pub fn area_weights(r_min: usize, r_max: usize, segments: usize) -> Array1<f64> {
    (r_min..r_max)
        .map(|r| r as f64 * 2.0 * PI / segments as f64)
        .collect()
}

/// Fractional cartesian coordinates of a regular polar grid.
///
/// Returns an array of shape `(2, r_max - r_min, segments)` where index 0 of
/// the first axis holds row coordinates `center_row - r * sin(phi)` and index
/// 1 holds column coordinates `center_col + r * cos(phi)`. An empty radius
/// range yields zero radial samples.
///
/// With `r_min = 0` the first radial sample collapses onto the centre for
/// every azimuth.
///
/// # Example
///
/// ```
/// use stem_pipeline::core::transforms::polar_mesh;
///
/// let mesh = polar_mesh(10.0, 10.0, 5, 7, 4);
/// assert_eq!(mesh.shape(), &[2, 2, 4]);
/// ```
pub fn polar_mesh(
    center_row: f64,
    center_col: f64,
    r_min: usize,
    r_max: usize,
    segments: usize,
) -> Array3<f64> {
    let n_radii = r_max.saturating_sub(r_min);
    let phi = azimuths(segments);
    let sin_cos: Vec<(f64, f64)> = phi.iter().map(|p| p.sin_cos()).collect();

    Array3::from_shape_fn((2, n_radii, segments), |(axis, i, k)| {
        let r = (r_min + i) as f64;
        let (sin_phi, cos_phi) = sin_cos[k];
        if axis == 0 {
            center_row - r * sin_phi
        } else {
            center_col + r * cos_phi
        }
    })
}

/// Precomputed polar sampling grid.
///
/// Holds the mesh and area weights for one geometry so that many frames of a
/// 4D dataset can be transformed without rebuilding them.
#[derive(Debug, Clone)]
pub struct PolarGrid {
    mesh: Array3<f64>,
    weights: Array1<f64>,
    segments: usize,
}

impl PolarGrid {
    pub fn new(
        center_row: f64,
        center_col: f64,
        r_min: usize,
        r_max: usize,
        segments: usize,
    ) -> Self {
        Self {
            mesh: polar_mesh(center_row, center_col, r_min, r_max, segments),
            weights: area_weights(r_min, r_max, segments),
            segments,
        }
    }

    pub fn mesh(&self) -> &Array3<f64> {
        &self.mesh
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Output shape as `(segments, radii)`.
    pub fn output_shape(&self) -> (usize, usize) {
        (self.segments, self.weights.len())
    }

    /// Resample `image` onto this grid.
    ///
    /// The result has shape `(segments, radii)` with azimuth on the leading
    /// axis, and every column is multiplied by the area weight of its radius.
    ///
    /// # Errors
    ///
    /// Returns [`PolarError::OutOfBounds`] as soon as any sampled pixel,
    /// including the far neighbour forced on exact hits in bilinear mode,
    /// falls outside `image`. Out-of-range samples are never wrapped or
    /// clamped.
    pub fn resample<T>(&self, image: ArrayView2<'_, T>, mode: SamplingMode) -> Result<Array2<f64>>
    where
        T: Copy + Into<f64>,
    {
        let (segments, n_radii) = self.output_shape();
        let mut out = Array2::<f64>::zeros((segments, n_radii));
        let sampler = Sampler { image };

        for i in 0..n_radii {
            for k in 0..segments {
                let row = self.mesh[[0, i, k]];
                let col = self.mesh[[1, i, k]];
                let value = match mode {
                    SamplingMode::Nearest => sampler.nearest(row, col)?,
                    SamplingMode::Bilinear => sampler.bilinear(row, col)?,
                };
                out[[k, i]] = value;
            }
        }

        out *= &self.weights;
        Ok(out)
    }
}

/// Bounds-checked pixel lookups into a source image.
struct Sampler<'a, T> {
    image: ArrayView2<'a, T>,
}

impl<T: Copy + Into<f64>> Sampler<'_, T> {
    fn at(&self, row: i64, col: i64) -> Result<f64> {
        let (rows, cols) = self.image.dim();
        if row < 0 || col < 0 || row as usize >= rows || col as usize >= cols {
            return Err(PolarError::OutOfBounds {
                row,
                col,
                rows,
                cols,
            });
        }
        Ok(self.image[[row as usize, col as usize]].into())
    }

    /// Value of the nearest pixel, rounding halves to even.
    fn nearest(&self, row: f64, col: f64) -> Result<f64> {
        self.at(row.round_ties_even() as i64, col.round_ties_even() as i64)
    }

    /// Weighted mean of the four pixels surrounding `(row, col)`.
    ///
    /// On an exact integer hit the far neighbour is pushed one pixel out so
    /// there are always four distinct neighbours; its weight is then zero.
    fn bilinear(&self, row: f64, col: f64) -> Result<f64> {
        let top = row.floor();
        let mut bottom = row.ceil();
        if bottom == top {
            bottom += 1.0;
        }
        let left = col.floor();
        let mut right = col.ceil();
        if right == left {
            right += 1.0;
        }

        let w_top = 1.0 - (row - top);
        let w_bottom = 1.0 - (bottom - row);
        let w_left = 1.0 - (col - left);
        let w_right = 1.0 - (right - col);

        let (t, b, l, r) = (top as i64, bottom as i64, left as i64, right as i64);
        Ok(self.at(t, l)? * w_top * w_left
            + self.at(t, r)? * w_top * w_right
            + self.at(b, l)? * w_bottom * w_left
            + self.at(b, r)? * w_bottom * w_right)
    }
}

/// Transform a single diffraction pattern to polar coordinates.
///
/// Builds the polar mesh for the given centre, radius range `r_min..r_max`
/// and segment count, samples `image` with the requested `mode`, and weights
/// each radius by `r * 2*pi / segments`. The result has shape
/// `(segments, r_max - r_min)`.
///
/// Callers must choose the centre and `r_max` so that every sample lies
/// inside the image; otherwise [`PolarError::OutOfBounds`] is returned. Use
/// about `2*pi*r_max` segments to sample the outer radii properly.
///
/// # Example
///
/// ```
/// use ndarray::Array2;
/// use stem_pipeline::core::transforms::{resample_polar, SamplingMode};
///
/// let dp = Array2::<u16>::ones((32, 32));
/// let polar = resample_polar(dp.view(), 16.0, 16.0, 0, 10, 64, SamplingMode::Bilinear).unwrap();
/// assert_eq!(polar.dim(), (64, 10));
/// ```
pub fn resample_polar<T>(
    image: ArrayView2<'_, T>,
    center_row: f64,
    center_col: f64,
    r_min: usize,
    r_max: usize,
    segments: usize,
    mode: SamplingMode,
) -> Result<Array2<f64>>
where
    T: Copy + Into<f64>,
{
    PolarGrid::new(center_row, center_col, r_min, r_max, segments).resample(image, mode)
}
