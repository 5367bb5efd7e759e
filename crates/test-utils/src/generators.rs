//! Generators for synthetic GSMaP text products.
//!
//! These produce CSV bodies and zip archives that look like the real
//! product: a header row with `Lat`, `Lon`, `RainRate` columns followed by
//! one row per lattice point, optionally with extra columns.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use sat_common::RawRecord;
use zip::write::SimpleFileOptions;

use crate::fixtures::lattice;

/// Records on a regular lattice, rows of constant latitude, south-first.
///
/// `rate` is called with `(row, col)` to produce each cell's value.
///
/// # Example
///
/// ```
/// use test_utils::lattice_records;
///
/// let records = lattice_records(5.0, 79.0, 0.1, 2, 3, |r, c| (r * 10 + c) as f64);
/// assert_eq!(records.len(), 6);
/// assert_eq!(records[4].rate, 11.0);
/// ```
pub fn lattice_records(
    lat0: f64,
    lon0: f64,
    step: f64,
    rows: usize,
    cols: usize,
    rate: impl Fn(usize, usize) -> f64,
) -> Vec<RawRecord> {
    let mut records = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            records.push(RawRecord::new(
                round_coord(lat0 + row as f64 * step),
                round_coord(lon0 + col as f64 * step),
                rate(row, col),
            ));
        }
    }
    records
}

/// The standard synthetic lattice covering the scenario region.
pub fn standard_lattice(rate: impl Fn(usize, usize) -> f64) -> Vec<RawRecord> {
    lattice_records(
        lattice::LAT_ORIGIN,
        lattice::LON_ORIGIN,
        lattice::STEP,
        lattice::ROWS,
        lattice::COLS,
        rate,
    )
}

/// The standard lattice filled with one value.
pub fn uniform_lattice(rate: f64) -> Vec<RawRecord> {
    standard_lattice(|_, _| rate)
}

/// A lattice with a hole: one point inside the scenario region is missing.
pub fn ragged_lattice(rate: f64) -> Vec<RawRecord> {
    let mut records = uniform_lattice(rate);
    // lat 7.0, lon 81.0 sits well inside the scenario box
    let row = 20;
    let col = 20;
    records.remove(row * lattice::COLS + col);
    records
}

/// Render records as a GSMaP-style CSV body.
///
/// The header carries padded column names and an extra flag column, as the
/// published product does.
pub fn gsmap_csv(records: &[RawRecord]) -> String {
    let mut out = String::with_capacity(records.len() * 32 + 64);
    out.push_str("  Lat,  Lon,  RainRate,  RainFlag\n");
    for r in records {
        out.push_str(&format!("{:.2},{:.2},{:.4},0\n", r.lat, r.lon, r.rate));
    }
    out
}

/// Write a zip archive at `path` holding one entry named `entry` with `body`.
pub fn write_zip(path: &Path, entry: &str, body: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create archive directory");
    }
    let file = File::create(path).expect("Failed to create zip file");
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    writer.start_file(entry, options).expect("Failed to start zip entry");
    writer.write_all(body).expect("Failed to write zip entry");
    writer.finish().expect("Failed to finish zip file");
}

/// Write a GSMaP zip at `path`; the inner entry is the file name minus `.zip`.
pub fn write_gsmap_zip(path: &Path, records: &[RawRecord]) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .expect("zip path must have a UTF-8 file name");
    let entry = name.strip_suffix(".zip").unwrap_or(name);
    write_zip(path, entry, gsmap_csv(records).as_bytes());
}

fn round_coord(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
