//! On-disk archive of raw grids.
//!
//! Each hour's grid is stored next to its ESRI ASCII output as
//! `<prefix>_<stamp>.asc.archive`: plain text, whitespace-delimited rows in
//! data-model order (south first), preceded by `#` lines recording the
//! bounding box and both axes:
//!
//! ```text
//! # bbox 5.72 79.52 10.06 82.19
//! # lat 5.8 5.9 ...
//! # lon 79.6 79.7 ...
//! 0 0.25 ...
//! ```
//!
//! A present, non-empty archive whose recorded box matches the key means the
//! hour is already computed. An archive made for another box is stale.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sat_common::{BoundingBox, Grid, SatError};
use tracing::{debug, warn};

use crate::planner::{append_extension, canonical_output_path};

pub const ARCHIVE_EXTENSION: &str = "archive";

/// Identity of one archived grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveKey {
    pub prefix: String,
    pub instant: DateTime<Utc>,
    pub bbox: BoundingBox,
}

impl ArchiveKey {
    pub fn new(prefix: impl Into<String>, instant: DateTime<Utc>, bbox: BoundingBox) -> Self {
        Self {
            prefix: prefix.into(),
            instant,
            bbox,
        }
    }
}

/// State of an archive on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveStatus {
    Missing,
    Empty,
    /// Written for another bounding box (or with an unreadable header).
    Stale,
    Valid,
}

/// Archive store rooted in the output directory.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    output_dir: PathBuf,
}

impl ArchiveCache {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<canonical output path>.archive`
    pub fn path_for(&self, key: &ArchiveKey) -> PathBuf {
        archive_path(&canonical_output_path(&self.output_dir, &key.prefix, key.instant))
    }

    pub fn status(&self, key: &ArchiveKey) -> ArchiveStatus {
        let path = self.path_for(key);
        match std::fs::metadata(&path) {
            Err(_) => ArchiveStatus::Missing,
            Ok(meta) if meta.len() == 0 => ArchiveStatus::Empty,
            Ok(_) => match read_recorded_bbox(&path) {
                Some(recorded) if recorded.same_region(&key.bbox) => ArchiveStatus::Valid,
                _ => ArchiveStatus::Stale,
            },
        }
    }

    /// True when the archive exists, is non-empty and matches the key's box.
    pub fn exists(&self, key: &ArchiveKey) -> bool {
        match self.status(key) {
            ArchiveStatus::Valid => true,
            ArchiveStatus::Stale => {
                warn!(
                    path = %self.path_for(key).display(),
                    bbox = %key.bbox,
                    "Archive was written for another bounding box; treating as absent"
                );
                false
            }
            ArchiveStatus::Missing | ArchiveStatus::Empty => false,
        }
    }

    /// Persist a grid (temp file + rename). Returns the archive path.
    pub fn write(&self, key: &ArchiveKey, grid: &Grid) -> Result<PathBuf, SatError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("archive.tmp");
        std::fs::write(&tmp, encode(grid, &key.bbox)).map_err(|e| SatError::cache_io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| SatError::cache_io(&path, e))?;
        debug!(path = %path.display(), "Archived grid");
        Ok(path)
    }

    /// Load an archived grid. The recorded box must match the key's.
    pub fn read(&self, key: &ArchiveKey) -> Result<Grid, SatError> {
        let path = self.path_for(key);
        let text = std::fs::read_to_string(&path).map_err(|e| SatError::cache_io(&path, e))?;
        let (bbox, grid) = decode(&text).map_err(|message| SatError::cache_io(&path, message))?;
        if !bbox.same_region(&key.bbox) {
            return Err(SatError::cache_io(
                &path,
                format!("archive is for bbox {}, expected {}", bbox, key.bbox),
            ));
        }
        Ok(grid)
    }
}

/// `<path>.archive`
pub fn archive_path(canonical: &Path) -> PathBuf {
    append_extension(canonical, ARCHIVE_EXTENSION)
}

fn join_values(values: &[f64]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

fn encode(grid: &Grid, bbox: &BoundingBox) -> String {
    let mut out = String::with_capacity(grid.values().len() * 6 + 256);
    let _ = writeln!(
        out,
        "# bbox {} {} {} {}",
        bbox.lat_min, bbox.lon_min, bbox.lat_max, bbox.lon_max
    );
    let _ = writeln!(out, "# lat {}", join_values(grid.lat_axis()));
    let _ = writeln!(out, "# lon {}", join_values(grid.lon_axis()));
    for row in grid.rows_iter() {
        out.push_str(&join_values(row));
        out.push('\n');
    }
    out
}

fn parse_numbers(s: &str) -> Result<Vec<f64>, String> {
    s.split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|_| format!("invalid number '{}'", t)))
        .collect()
}

fn header_values<'a>(line: Option<&'a str>, tag: &str) -> Result<&'a str, String> {
    line.and_then(|l| l.strip_prefix('#'))
        .map(str::trim_start)
        .and_then(|l| l.strip_prefix(tag))
        .ok_or_else(|| format!("missing '# {}' header", tag))
}

fn decode(text: &str) -> Result<(BoundingBox, Grid), String> {
    let mut lines = text.lines();
    let bbox = parse_numbers(header_values(lines.next(), "bbox")?)?;
    let [lat_min, lon_min, lat_max, lon_max] = bbox[..] else {
        return Err(format!("bbox header has {} values, expected 4", bbox.len()));
    };
    let lat_axis = parse_numbers(header_values(lines.next(), "lat")?)?;
    let lon_axis = parse_numbers(header_values(lines.next(), "lon")?)?;

    let mut values = Vec::with_capacity(lat_axis.len() * lon_axis.len());
    let mut rows = 0;
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let row = parse_numbers(line)?;
        if row.len() != lon_axis.len() {
            return Err(format!(
                "row {} has {} values, expected {}",
                rows,
                row.len(),
                lon_axis.len()
            ));
        }
        values.extend(row);
        rows += 1;
    }
    if rows != lat_axis.len() {
        return Err(format!("{} rows, expected {}", rows, lat_axis.len()));
    }

    let grid = Grid::from_parts(values, lat_axis, lon_axis).map_err(|e| e.to_string())?;
    Ok((BoundingBox::new(lat_min, lon_min, lat_max, lon_max), grid))
}

fn read_recorded_bbox(path: &Path) -> Option<BoundingBox> {
    use std::io::{BufRead, BufReader};

    let file = std::fs::File::open(path).ok()?;
    let mut first = String::new();
    BufReader::new(file).read_line(&mut first).ok()?;
    let numbers = parse_numbers(header_values(Some(first.trim_end()), "bbox").ok()?).ok()?;
    match numbers[..] {
        [a, b, c, d] => Some(BoundingBox::new(a, b, c, d)),
        _ => None,
    }
}
