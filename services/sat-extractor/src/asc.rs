//! ESRI ASCII grid output.
//!
//! ```text
//! ncols        26
//! nrows        43
//! xllcorner    79.6
//! yllcorner    5.8
//! cellsize     0.1
//! NODATA_value -99
//! <nrows lines, northernmost first>
//! ```

use std::fmt::Write as _;
use std::path::Path;

use sat_common::{Grid, SatError};

pub const NODATA_VALUE: i32 = -99;

/// Cell size used when the grid has a single point.
const DEFAULT_CELLSIZE: f64 = 0.1;

/// Spacing between the first two points of an axis, if it has two.
fn spacing(axis: &[f64]) -> Option<f64> {
    match axis {
        [a, b, ..] => Some(b - a),
        _ => None,
    }
}

/// Cell size: lon spacing, else lat spacing, else 0.1.
pub fn cellsize(grid: &Grid) -> f64 {
    spacing(grid.lon_axis())
        .or_else(|| spacing(grid.lat_axis()))
        .unwrap_or(DEFAULT_CELLSIZE)
}

/// Render a grid as ESRI ASCII text.
pub fn to_string(grid: &Grid) -> String {
    let mut out = String::with_capacity(grid.values().len() * 8 + 128);
    let xll = grid.lon_axis().first().copied().unwrap_or(0.0);
    let yll = grid.lat_axis().first().copied().unwrap_or(0.0);

    // writing into a String cannot fail
    let _ = writeln!(out, "ncols        {}", grid.cols());
    let _ = writeln!(out, "nrows        {}", grid.rows());
    let _ = writeln!(out, "xllcorner    {}", xll);
    let _ = writeln!(out, "yllcorner    {}", yll);
    let _ = writeln!(out, "cellsize     {}", cellsize(grid));
    let _ = writeln!(out, "NODATA_value {}", NODATA_VALUE);

    for row in grid.north_first_rows() {
        let line = row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Write the grid to `path` through a temp file and rename.
pub fn write(grid: &Grid, path: &Path) -> Result<(), SatError> {
    let tmp = path.with_extension("asc.tmp");
    std::fs::write(&tmp, to_string(grid)).map_err(|e| SatError::cache_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| SatError::cache_io(path, e))
}
