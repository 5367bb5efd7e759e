//! Prometheus metrics for a single extractor run.
//!
//! The extractor is a one-shot process, so instead of serving `/metrics` it
//! renders the exposition text into a file at exit for a node-exporter style
//! textfile collector.

use std::path::Path;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sat_common::SatError;

/// Outcome label values for `sat_fetch_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Failure,
    Cancelled,
}

impl FetchOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Success => "success",
            FetchOutcome::Failure => "failure",
            FetchOutcome::Cancelled => "cancelled",
        }
    }
}

pub fn record_fetch(outcome: FetchOutcome, elapsed: Duration) {
    counter!("sat_fetch_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("sat_fetch_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_grid_built() {
    counter!("sat_grids_built_total").increment(1);
}

/// An artifact was found on disk and not recomputed.
pub fn record_skipped(kind: &'static str) {
    counter!("sat_artifacts_skipped_total", "kind" => kind).increment(1);
}

pub fn record_cumulative(outcome: &'static str) {
    counter!("sat_cumulative_total", "outcome" => outcome).increment(1);
}

/// Install the global Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle, SatError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SatError::configuration(format!("Failed to install metrics recorder: {}", e)))
}

/// Write the current exposition text to `path` (temp file + rename).
pub fn write_exposition(handle: &PrometheusHandle, path: &Path) -> Result<(), SatError> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, handle.render()).map_err(|e| SatError::cache_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| SatError::cache_io(path, e))?;
    Ok(())
}
