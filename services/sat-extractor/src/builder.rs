//! Reconstruct a regular grid from a zipped GSMaP CSV table.
//!
//! Each payload is a zip archive holding one CSV table with at least the
//! columns `Lat`, `Lon` and `RainRate` (header names may be padded with
//! spaces). Rows inside the bounding box must form a complete lat/lon
//! lattice; anything else is a shape error rather than a silently
//! misaligned grid.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sat_common::{BoundingBox, Grid, RawRecord, SatError};
use tracing::debug;

const LAT_COLUMN: &str = "Lat";
const LON_COLUMN: &str = "Lon";
const RATE_COLUMN: &str = "RainRate";

/// Builds grids for one bounding box.
#[derive(Debug, Clone)]
pub struct GridBuilder {
    bbox: BoundingBox,
}

impl GridBuilder {
    pub fn new(bbox: BoundingBox) -> Self {
        Self { bbox }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Parse, filter, sort and reshape one payload.
    pub fn build(&self, payload: &Path) -> Result<Grid, SatError> {
        let records = read_payload(payload)?;
        let total = records.len();
        let filtered = self.filter(records);
        if filtered.is_empty() {
            return Err(SatError::NoData(payload.to_path_buf()));
        }
        let grid = reshape(filtered, &payload.display().to_string())?;
        debug!(
            path = %payload.display(),
            records = total,
            rows = grid.rows(),
            cols = grid.cols(),
            range = ?grid.value_range(),
            "Built grid"
        );
        Ok(grid)
    }

    /// Keep records inside the box (boundaries included).
    pub fn filter(&self, records: Vec<RawRecord>) -> Vec<RawRecord> {
        records
            .into_iter()
            .filter(|r| self.bbox.contains(r.lat, r.lon))
            .collect()
    }
}

/// Open the zip at `path` and parse its table.
///
/// The entry named like the archive without `.zip` is preferred; otherwise a
/// single-entry archive, or the first `.csv` entry, is used.
pub fn read_payload(path: &Path) -> Result<Vec<RawRecord>, SatError> {
    let file = File::open(path).map_err(|e| SatError::payload(path, e))?;
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| SatError::payload(path, e))?;

    let index = select_entry(&archive, path)?;
    let entry = archive.by_index(index).map_err(|e| SatError::payload(path, e))?;
    parse_csv(entry, path)
}

fn select_entry<R: Read + std::io::Seek>(archive: &zip::ZipArchive<R>, path: &Path) -> Result<usize, SatError> {
    let expected = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.strip_suffix(".zip").unwrap_or(n).to_string());

    if let Some(index) = expected.as_deref().and_then(|name| archive.index_for_name(name)) {
        return Ok(index);
    }
    if archive.len() == 1 {
        return Ok(0);
    }
    archive
        .file_names()
        .position(|n| n.to_ascii_lowercase().ends_with(".csv"))
        .ok_or_else(|| SatError::payload(path, "archive holds no CSV table"))
}

/// Parse a CSV table, locating the needed columns by header name.
pub fn parse_csv<R: Read>(reader: R, path: &Path) -> Result<Vec<RawRecord>, SatError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| SatError::payload(path, e))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| SatError::payload(path, format!("missing column '{}'", name)))
    };
    let lat_idx = column(LAT_COLUMN)?;
    let lon_idx = column(LON_COLUMN)?;
    let rate_idx = column(RATE_COLUMN)?;

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row.map_err(|e| SatError::payload(path, e))?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let field = |idx: usize, name: &str| -> Result<f64, SatError> {
            let raw = row
                .get(idx)
                .ok_or_else(|| SatError::payload(path, format!("line {}: missing {}", line, name)))?;
            raw.parse::<f64>()
                .map_err(|_| SatError::payload(path, format!("line {}: invalid {} '{}'", line, name, raw)))
        };
        records.push(RawRecord::new(
            field(lat_idx, LAT_COLUMN)?,
            field(lon_idx, LON_COLUMN)?,
            field(rate_idx, RATE_COLUMN)?,
        ));
    }
    Ok(records)
}

/// Sort records by (lat, lon) and reshape them into a grid.
///
/// The records must cover every `lat_axis × lon_axis` point exactly once.
pub fn reshape(mut records: Vec<RawRecord>, context: &str) -> Result<Grid, SatError> {
    records.sort_by(|a, b| a.lat.total_cmp(&b.lat).then(a.lon.total_cmp(&b.lon)));

    let mut lat_axis: Vec<f64> = records.iter().map(|r| r.lat).collect();
    lat_axis.dedup();
    let mut lon_axis: Vec<f64> = records.iter().map(|r| r.lon).collect();
    lon_axis.sort_by(f64::total_cmp);
    lon_axis.dedup();

    let ncols = lon_axis.len();
    let expected = lat_axis.len() * ncols;
    if records.len() != expected {
        return Err(SatError::shape_mismatch(
            context,
            format!("{}x{} lattice ({} points)", lat_axis.len(), ncols, expected),
            format!("{} records", records.len()),
        ));
    }

    if let Some((i, r)) = records
        .iter()
        .enumerate()
        .find(|(i, r)| r.lat != lat_axis[i / ncols] || r.lon != lon_axis[i % ncols])
    {
        return Err(SatError::shape_mismatch(
            context,
            format!("({}, {}) at record {}", lat_axis[i / ncols], lon_axis[i % ncols], i),
            format!("({}, {})", r.lat, r.lon),
        ));
    }

    let values = records.into_iter().map(|r| r.rate).collect();
    Grid::from_parts(values, lat_axis, lon_axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{fixtures, lattice_records, ragged_lattice, uniform_lattice, write_gsmap_zip, write_zip};

    fn payload_path(dir: &Path) -> std::path::PathBuf {
        dir.join("gsmap_nrt.20230101.0000.05_AsiaSS.csv.zip")
    }

    #[test]
    fn test_parse_csv_by_header_name() {
        let body = "  RainFlag,  Lon,  Lat,  RainRate\n0,80.10,6.00,1.5\n1,80.20,6.00,0\n";
        let records = parse_csv(body.as_bytes(), Path::new("t.csv")).unwrap();
        assert_eq!(records, vec![RawRecord::new(6.0, 80.1, 1.5), RawRecord::new(6.0, 80.2, 0.0)]);
    }

    #[test]
    fn test_parse_csv_missing_column() {
        let result = parse_csv("Lat,Lon\n6.0,80.0\n".as_bytes(), Path::new("t.csv"));
        match result {
            Err(SatError::Payload { message, .. }) => assert!(message.contains("RainRate")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_csv_bad_number() {
        let result = parse_csv("Lat,Lon,RainRate\n6.0,80.0,wet\n".as_bytes(), Path::new("t.csv"));
        assert!(matches!(result, Err(SatError::Payload { .. })));
    }

    #[test]
    fn test_reshape_unsorted_input() {
        let records = vec![
            RawRecord::new(6.1, 80.1, 4.0),
            RawRecord::new(6.0, 80.0, 1.0),
            RawRecord::new(6.1, 80.0, 3.0),
            RawRecord::new(6.0, 80.1, 2.0),
        ];
        let grid = reshape(records, "test").unwrap();
        assert_eq!(grid.shape(), (2, 2));
        assert_eq!(grid.values(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(grid.lat_axis(), &[6.0, 6.1]);
        assert_eq!(grid.lon_axis(), &[80.0, 80.1]);
    }

    #[test]
    fn test_reshape_rejects_ragged_lattice() {
        let records = vec![
            RawRecord::new(6.0, 80.0, 1.0),
            RawRecord::new(6.0, 80.1, 2.0),
            RawRecord::new(6.1, 80.0, 3.0),
        ];
        assert!(matches!(reshape(records, "test"), Err(SatError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_reshape_rejects_duplicate_with_hole() {
        // right count, wrong points: (6.1, 80.1) missing, (6.0, 80.0) twice
        let records = vec![
            RawRecord::new(6.0, 80.0, 1.0),
            RawRecord::new(6.0, 80.0, 1.0),
            RawRecord::new(6.0, 80.1, 2.0),
            RawRecord::new(6.1, 80.0, 3.0),
        ];
        assert!(matches!(reshape(records, "test"), Err(SatError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_build_filters_inclusive_bbox() {
        let dir = tempfile::tempdir().unwrap();
        let path = payload_path(dir.path());
        write_gsmap_zip(&path, &lattice_records(5.9, 79.9, 0.1, 5, 6, |r, c| (r * 10 + c) as f64));

        let grid = GridBuilder::new(fixtures::bbox::SMALL).build(&path).unwrap();
        // lat 6.0..=6.2, lon 80.0..=80.3
        assert_eq!(grid.shape(), (3, 4));
        assert_eq!(grid.lat_axis(), &[6.0, 6.1, 6.2]);
        assert_eq!(grid.lon_axis(), &[80.0, 80.1, 80.2, 80.3]);
        assert_eq!(grid.get(0, 0), Some(11.0));
        assert_eq!(grid.get(2, 3), Some(34.0));
    }

    #[test]
    fn test_build_round_trips_filtered_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = payload_path(dir.path());
        let records = lattice_records(5.0, 79.0, 0.1, 60, 40, |r, c| ((r * 7 + c * 3) % 11) as f64);
        write_gsmap_zip(&path, &records);

        let builder = GridBuilder::new(fixtures::bbox::SCENARIO);
        let grid = builder.build(&path).unwrap();
        let mut expected = builder.filter(records);
        expected.sort_by(|a, b| a.lat.total_cmp(&b.lat).then(a.lon.total_cmp(&b.lon)));
        assert_eq!(grid.to_records(), expected);
        assert_eq!(grid.rows(), grid.lat_axis().len());
        assert_eq!(grid.cols(), grid.lon_axis().len());
    }

    #[test]
    fn test_build_empty_selection_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = payload_path(dir.path());
        write_gsmap_zip(&path, &uniform_lattice(1.0));
        let result = GridBuilder::new(fixtures::bbox::OFFSHORE).build(&path);
        assert!(matches!(result, Err(SatError::NoData(_))));
    }

    #[test]
    fn test_build_ragged_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = payload_path(dir.path());
        write_gsmap_zip(&path, &ragged_lattice(1.0));
        let result = GridBuilder::new(fixtures::bbox::SCENARIO).build(&path);
        assert!(matches!(result, Err(SatError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_build_single_misnamed_entry_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = payload_path(dir.path());
        write_zip(&path, "other.csv", b"Lat,Lon,RainRate\n6.0,80.0,2.5\n");
        let grid = GridBuilder::new(fixtures::bbox::SMALL).build(&path).unwrap();
        assert_eq!(grid.values(), &[2.5]);
    }

    #[test]
    fn test_build_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = payload_path(dir.path());
        std::fs::write(&path, b"plain text").unwrap();
        let result = GridBuilder::new(fixtures::bbox::SMALL).build(&path);
        assert!(matches!(result, Err(SatError::Payload { .. })));
    }
}
