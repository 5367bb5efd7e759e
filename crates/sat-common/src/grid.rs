//! Regular lat/lon grids reconstructed from tabular records.

use serde::{Deserialize, Serialize};

use crate::error::SatError;

/// Tolerance used when comparing axis coordinates of two grids.
const AXIS_EPSILON: f64 = 1e-9;

/// One observation row of a payload table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub lat: f64,
    pub lon: f64,
    pub rate: f64,
}

impl RawRecord {
    pub fn new(lat: f64, lon: f64, rate: f64) -> Self {
        Self { lat, lon, rate }
    }
}

/// A 2-D grid of values over ascending latitude and longitude axes.
///
/// Values are stored row-major. Row 0 is the southernmost latitude; writers
/// that need the raster convention use [`Grid::north_first_rows`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    values: Vec<f64>,
    lat_axis: Vec<f64>,
    lon_axis: Vec<f64>,
}

impl Grid {
    /// Build a grid, checking that `values` covers `lat_axis × lon_axis`.
    pub fn from_parts(values: Vec<f64>, lat_axis: Vec<f64>, lon_axis: Vec<f64>) -> Result<Self, SatError> {
        let expected = lat_axis.len() * lon_axis.len();
        if values.len() != expected {
            return Err(SatError::shape_mismatch(
                "grid values",
                format!("{}x{} = {}", lat_axis.len(), lon_axis.len(), expected),
                format!("{} values", values.len()),
            ));
        }
        Ok(Self {
            values,
            lat_axis,
            lon_axis,
        })
    }

    pub fn rows(&self) -> usize {
        self.lat_axis.len()
    }

    pub fn cols(&self) -> usize {
        self.lon_axis.len()
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn lat_axis(&self) -> &[f64] {
        &self.lat_axis
    }

    pub fn lon_axis(&self) -> &[f64] {
        &self.lon_axis
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        self.values.get(row * self.cols() + col).copied()
    }

    /// Rows in data-model order (south first).
    pub fn rows_iter(&self) -> impl DoubleEndedIterator<Item = &[f64]> {
        // chunks_exact(0) panics; an empty grid has no rows anyway
        self.values.chunks_exact(self.cols().max(1))
    }

    /// Rows in raster order (north first).
    pub fn north_first_rows(&self) -> impl Iterator<Item = &[f64]> {
        self.rows_iter().rev()
    }

    /// Flatten back into records over `lat_axis × lon_axis`, lat-major.
    pub fn to_records(&self) -> Vec<RawRecord> {
        let mut records = Vec::with_capacity(self.values.len());
        for (r, lat) in self.lat_axis.iter().enumerate() {
            for (c, lon) in self.lon_axis.iter().enumerate() {
                records.push(RawRecord::new(*lat, *lon, self.values[r * self.cols() + c]));
            }
        }
        records
    }

    /// True when both grids have the same shape and the same axis coordinates.
    pub fn same_geometry(&self, other: &Grid) -> bool {
        self.shape() == other.shape()
            && axes_match(&self.lat_axis, &other.lat_axis)
            && axes_match(&self.lon_axis, &other.lon_axis)
    }

    /// Element-wise `self += other`.
    ///
    /// Grids of different geometry are never broadcast or truncated.
    pub fn accumulate(&mut self, other: &Grid, context: &str) -> Result<(), SatError> {
        if self.shape() != other.shape() {
            return Err(SatError::shape_mismatch(
                context,
                format!("{}x{}", self.rows(), self.cols()),
                format!("{}x{}", other.rows(), other.cols()),
            ));
        }
        if !self.same_geometry(other) {
            return Err(SatError::shape_mismatch(
                context,
                "identical lat/lon axes",
                "axes with different coordinates",
            ));
        }
        for (acc, v) in self.values.iter_mut().zip(other.values.iter()) {
            *acc += v;
        }
        Ok(())
    }

    /// Minimum and maximum of the finite values, if any.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

fn axes_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= AXIS_EPSILON)
}
