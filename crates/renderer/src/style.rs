//! Threshold ladders and colour schemes for precipitation maps.

use serde::{Deserialize, Serialize};

use crate::RenderError;

/// Levels (mm/h) used for hourly rain-rate maps.
pub const HOURLY_LEVELS: [f64; 21] = [
    0.0, 1.0, 2.5, 5.0, 7.5, 10.0, 15.0, 20.0, 30.0, 40.0, 50.0, 70.0, 100.0, 150.0, 200.0, 250.0,
    300.0, 400.0, 500.0, 600.0, 750.0,
];

/// Levels (mm) used for cumulative totals: ten times a coarse ladder.
pub const CUMULATIVE_LEVELS: [f64; 14] = [
    1.0, 5.0, 10.0, 20.0, 30.0, 50.0, 100.0, 150.0, 200.0, 250.0, 300.0, 500.0, 750.0, 1000.0,
];

/// Color value in RGBA format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub const fn transparent() -> Self {
        Self::new(255, 255, 255, 0)
    }

    pub fn as_tuple(&self) -> (u8, u8, u8, u8) {
        (self.r, self.g, self.b, self.a)
    }
}

/// Linear color interpolation
fn interpolate_color(color1: Color, color2: Color, t: f64) -> Color {
    let t = t.clamp(0.0, 1.0);
    let t_inv = 1.0 - t;
    let mix = |a: u8, b: u8| ((a as f64 * t_inv) + (b as f64 * t)).round() as u8;

    Color::new(
        mix(color1.r, color2.r),
        mix(color1.g, color2.g),
        mix(color1.b, color2.b),
        mix(color1.a, color2.a),
    )
}

/// Ascending boundaries splitting values into colour bands.
///
/// A value below the first level (or NaN) falls in no band and is drawn
/// transparent. Band `k` (1-based) holds `levels[k-1] <= v < levels[k]`; the
/// last band is open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLadder {
    levels: Vec<f64>,
}

impl ThresholdLadder {
    pub fn new(levels: Vec<f64>) -> Result<Self, RenderError> {
        if levels.is_empty() {
            return Err(RenderError::InvalidLadder("no levels".to_string()));
        }
        // one palette slot is reserved for the transparent background
        if levels.len() > 255 {
            return Err(RenderError::InvalidLadder(format!("{} levels exceed 255", levels.len())));
        }
        if levels.iter().any(|l| !l.is_finite()) {
            return Err(RenderError::InvalidLadder("non-finite level".to_string()));
        }
        if levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RenderError::InvalidLadder("levels must be strictly ascending".to_string()));
        }
        Ok(Self { levels })
    }

    /// Ladder for hourly rain rates.
    pub fn hourly() -> Self {
        Self {
            levels: HOURLY_LEVELS.to_vec(),
        }
    }

    /// Coarser, higher-magnitude ladder for cumulative totals.
    pub fn cumulative() -> Self {
        Self {
            levels: CUMULATIVE_LEVELS.to_vec(),
        }
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Number of colour bands (one per level).
    pub fn band_count(&self) -> usize {
        self.levels.len()
    }

    /// Band index for a value; 0 means "not drawn".
    pub fn classify(&self, value: f64) -> u8 {
        if value.is_nan() {
            return 0;
        }
        match self.levels.iter().rposition(|level| value >= *level) {
            Some(k) => (k + 1) as u8,
            None => 0,
        }
    }
}

/// Colour ramps available to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    /// Light-to-heavy precipitation ramp used for hourly maps.
    Precipitation,
    /// Classic blue-cyan-yellow-red ramp used for cumulative totals.
    Jet,
}

const PRECIPITATION_ANCHORS: [Color; 9] = [
    Color::rgb(235, 246, 255),
    Color::rgb(160, 210, 255),
    Color::rgb(64, 150, 255),
    Color::rgb(0, 200, 80),
    Color::rgb(255, 255, 0),
    Color::rgb(255, 150, 0),
    Color::rgb(255, 0, 0),
    Color::rgb(180, 0, 120),
    Color::rgb(120, 0, 200),
];

const JET_ANCHORS: [Color; 6] = [
    Color::rgb(0, 0, 128),
    Color::rgb(0, 0, 255),
    Color::rgb(0, 255, 255),
    Color::rgb(255, 255, 0),
    Color::rgb(255, 0, 0),
    Color::rgb(128, 0, 0),
];

impl ColorScheme {
    fn anchors(&self) -> &'static [Color] {
        match self {
            ColorScheme::Precipitation => &PRECIPITATION_ANCHORS,
            ColorScheme::Jet => &JET_ANCHORS,
        }
    }

    /// Sample the ramp at `t` in `[0, 1]`.
    pub fn sample(&self, t: f64) -> Color {
        let anchors = self.anchors();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let scaled = t * (anchors.len() - 1) as f64;
        let lower = (scaled.floor() as usize).min(anchors.len() - 1);
        let upper = (lower + 1).min(anchors.len() - 1);
        interpolate_color(anchors[lower], anchors[upper], scaled - lower as f64)
    }

    /// Palette for a ladder: entry 0 is transparent, then one colour per band.
    pub fn palette(&self, ladder: &ThresholdLadder) -> Vec<Color> {
        let bands = ladder.band_count();
        let mut palette = Vec::with_capacity(bands + 1);
        palette.push(Color::transparent());
        for band in 0..bands {
            let t = if bands > 1 {
                band as f64 / (bands - 1) as f64
            } else {
                0.0
            };
            palette.push(self.sample(t));
        }
        palette
    }
}
