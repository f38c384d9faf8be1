//! Root clouds to normalised density grids.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::solver::RootSet;

// =============================================================================
// CONFIGURATION
// =============================================================================
const LOWER_QUANTILE: f64 = 0.005;
const UPPER_QUANTILE: f64 = 0.995;
const PADDING: f64 = 0.05;
/// Side of the square used when every point sits at the same place.
const DEGENERATE_SPAN: f64 = 1.0;

/// Square plotting window in root coordinates (x real, y imaginary).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Bounds {
    /// Robust square window around the points: central 99% per axis,
    /// padded 5% on each side, widened to the larger axis span.
    pub fn around(xs: &[f64], ys: &[f64]) -> Self {
        let (x_lo, x_hi) = quantile_pair(xs);
        let (y_lo, y_hi) = quantile_pair(ys);
        let x_range = x_hi - x_lo;
        let y_range = y_hi - y_lo;

        let x_center = (x_lo + x_hi) / 2.0;
        let y_center = (y_lo + y_hi) / 2.0;
        let span = x_range.max(y_range) * (1.0 + 2.0 * PADDING);
        let bounds = Self::square(x_center, y_center, span);
        // a span lost to rounding counts as degenerate too
        if span.is_finite() && bounds.x_max > bounds.x_min && bounds.y_max > bounds.y_min {
            bounds
        } else {
            Self::square(x_center, y_center, DEGENERATE_SPAN)
        }
    }

    fn square(x_center: f64, y_center: f64, span: f64) -> Self {
        Bounds {
            x_min: x_center - span / 2.0,
            x_max: x_center + span / 2.0,
            y_min: y_center - span / 2.0,
            y_max: y_center + span / 2.0,
        }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    /// `values[[row, col]]`: row follows the imaginary axis, col the real axis.
    pub values: Array2<f64>,
    pub bounds: Bounds,
    /// Every finite root, including ones outside the window.
    pub total_roots: usize,
}

impl DensityGrid {
    pub fn resolution(&self) -> usize {
        self.values.nrows()
    }
}

/// Finite root coordinates pooled from every row.
#[derive(Debug, Clone, PartialEq)]
pub struct RootCloud {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl RootCloud {
    /// Drop empty sets and non-finite roots; fails if nothing is left.
    pub fn collect(root_sets: &[RootSet]) -> Result<Self> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = root_sets
            .iter()
            .flatten()
            .filter(|z| z.re.is_finite() && z.im.is_finite())
            .map(|z| (z.re, z.im))
            .unzip();
        if xs.is_empty() {
            return Err(Error::NoValidRoots);
        }
        Ok(RootCloud { xs, ys })
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Bin into a `resolution × resolution` grid with `log(1 + count)`
    /// compression, normalised to a peak of 1.
    pub fn density(&self, resolution: usize) -> Result<DensityGrid> {
        check_resolution(resolution)?;
        let bounds = Bounds::around(&self.xs, &self.ys);
        let mut counts = histogram(&self.xs, &self.ys, &bounds, resolution);
        counts.mapv_inplace(f64::ln_1p);
        let peak = counts.fold(0.0f64, |acc, &v| acc.max(v));
        if peak > 0.0 {
            counts /= peak;
        }
        Ok(DensityGrid { values: counts, bounds, total_roots: self.len() })
    }
}

/// [`RootCloud::collect`] followed by [`RootCloud::density`], with the
/// resolution checked before the roots are looked at.
pub fn aggregate(root_sets: &[RootSet], resolution: usize) -> Result<DensityGrid> {
    check_resolution(resolution)?;
    RootCloud::collect(root_sets)?.density(resolution)
}

pub(crate) fn check_resolution(resolution: usize) -> Result<()> {
    if resolution == 0 {
        return Err(Error::InvalidRequest("grid_resolution must be at least 1".to_string()));
    }
    Ok(())
}

// Closed on both ends: a point exactly on the upper edge goes in the last bin.
fn bin(value: f64, lo: f64, hi: f64, bins: usize) -> Option<usize> {
    if !(lo..=hi).contains(&value) {
        return None;
    }
    let index = ((value - lo) / (hi - lo) * bins as f64) as usize;
    Some(index.min(bins - 1))
}

fn histogram(xs: &[f64], ys: &[f64], bounds: &Bounds, bins: usize) -> Array2<f64> {
    let mut grid = Array2::<f64>::zeros((bins, bins));
    for (&x, &y) in xs.iter().zip(ys) {
        let cell = bin(x, bounds.x_min, bounds.x_max, bins).zip(bin(y, bounds.y_min, bounds.y_max, bins));
        if let Some((col, row)) = cell {
            grid[[row, col]] += 1.0;
        }
    }
    grid
}

fn quantile_pair(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.par_sort_unstable_by(f64::total_cmp);
    (quantile(&sorted, LOWER_QUANTILE), quantile(&sorted, UPPER_QUANTILE))
}

// Linear interpolation between closest ranks; `sorted` is non-empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let below = position.floor() as usize;
    let above = (below + 1).min(sorted.len() - 1);
    let fraction = position - below as f64;
    sorted[below] + (sorted[above] - sorted[below]) * fraction
}
