//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

use crate::error::SatError;

/// A geographic bounding box in degrees.
///
/// Bounds are inclusive on every side: a record sitting exactly on an edge is
/// inside the box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

/// Default extraction region covering Sri Lanka.
pub const SRI_LANKA: BoundingBox = BoundingBox {
    lat_min: 5.722969,
    lon_min: 79.52146,
    lat_max: 10.06425,
    lon_max: 82.18992,
};

impl Default for BoundingBox {
    fn default() -> Self {
        SRI_LANKA
    }
}

impl BoundingBox {
    /// Create a bounding box without validating it.
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        }
    }

    /// Create a bounding box, rejecting inverted or non-finite bounds.
    pub fn try_new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Result<Self, SatError> {
        let bbox = Self::new(lat_min, lon_min, lat_max, lon_max);
        bbox.validate()?;
        Ok(bbox)
    }

    /// Parse "lat_min,lon_min,lat_max,lon_max".
    pub fn from_arg_string(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let parse = |p: &str| {
            p.parse::<f64>()
                .map_err(|_| BboxParseError::InvalidNumber(p.to_string()))
        };

        Ok(Self {
            lat_min: parse(parts[0])?,
            lon_min: parse(parts[1])?,
            lat_max: parse(parts[2])?,
            lon_max: parse(parts[3])?,
        })
    }

    /// Check the ordering invariants `lat_min < lat_max` and `lon_min < lon_max`.
    pub fn validate(&self) -> Result<(), SatError> {
        let all_finite = [self.lat_min, self.lon_min, self.lat_max, self.lon_max]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(SatError::configuration(format!(
                "bounding box has non-finite bounds: {}",
                self
            )));
        }
        if self.lat_min >= self.lat_max {
            return Err(SatError::configuration(format!(
                "lat_min {} must be below lat_max {}",
                self.lat_min, self.lat_max
            )));
        }
        if self.lon_min >= self.lon_max {
            return Err(SatError::configuration(format!(
                "lon_min {} must be below lon_max {}",
                self.lon_min, self.lon_max
            )));
        }
        Ok(())
    }

    /// Extent in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    /// Extent in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    /// Check if a point is contained within this bbox (edges included).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    /// Compare two boxes after quantizing to the precision used in cache keys.
    pub fn same_region(&self, other: &BoundingBox) -> bool {
        self.cache_key() == other.cache_key()
    }

    /// Generate a cache key fragment for this bbox (quantized to avoid floating point issues).
    pub fn cache_key(&self) -> String {
        format!(
            "{:.6}_{:.6}_{:.6}_{:.6}",
            self.lat_min, self.lon_min, self.lat_max, self.lon_max
        )
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.lat_min, self.lon_min, self.lat_max, self.lon_max
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid bounding box format: {0}. Expected 'lat_min,lon_min,lat_max,lon_max'")]
    InvalidFormat(String),

    #[error("Invalid number in bounding box: {0}")]
    InvalidNumber(String),
}
