//! End-to-end runs against a file-backed mirror of the product server.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use renderer::RasterRenderer;
use sat_common::time::parse_stamp;
use sat_common::{BoundingBox, RawRecord, SatError, TimeWindow};
use sat_extractor::accumulator::{cumulative_path, AccumulateOutcome};
use sat_extractor::cache::{ArchiveCache, ArchiveKey};
use sat_extractor::config::{ExtractorConfig, SourceConfig};
use sat_extractor::pipeline::{Pipeline, RunOptions};
use sat_extractor::planner::{RemoteObject, RemoteProduct};
use tempfile::TempDir;
use test_utils::{fixtures, ragged_lattice, standard_lattice, uniform_lattice, Mirror};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helpers
// ============================================================================

fn ts(stamp: &str) -> DateTime<Utc> {
    parse_stamp(stamp).unwrap()
}

fn scenario_window() -> TimeWindow {
    TimeWindow::new(ts(fixtures::time::SCENARIO_START), ts(fixtures::time::SCENARIO_END))
}

/// Long after the scenario, so every hour comes from the archival tree.
fn later() -> DateTime<Utc> {
    ts("2023-06-01_00:00")
}

fn publish(mirror: &Mirror, product: RemoteProduct, instant: DateTime<Utc>, records: &[RawRecord]) {
    let rel = RemoteObject::new(product, instant).relative_path(&SourceConfig::default());
    mirror.put(&rel, records);
}

fn publish_window(mirror: &Mirror, window: &TimeWindow, rate: impl Fn(usize) -> f64) {
    for (h, instant) in window.hours().into_iter().enumerate() {
        publish(mirror, RemoteProduct::Archival, instant, &uniform_lattice(rate(h)));
    }
}

fn pipeline(mirror: &Mirror) -> Pipeline {
    let mut config = ExtractorConfig::default();
    config.source.base_url = mirror.base_url();
    config.fetch.max_concurrent = Some(2);
    config.fetch.max_retries = 0;
    config.fetch.timeout_secs = 5;
    let renderer = RasterRenderer {
        scale: 2,
        frame_delay_ms: 100,
    };
    Pipeline::from_config(config, Arc::new(renderer)).unwrap()
}

struct Dirs {
    out: TempDir,
    work: TempDir,
}

impl Dirs {
    fn new() -> Self {
        Self {
            out: tempfile::tempdir().unwrap(),
            work: tempfile::tempdir().unwrap(),
        }
    }

    fn options(&self, window: TimeWindow, bbox: BoundingBox) -> RunOptions {
        RunOptions {
            window,
            output_dir: self.out.path().to_path_buf(),
            tmp_dir: self.work.path().join("tmp_jaxa"),
            bbox,
            cumulative: false,
            clean: false,
            rebuild: false,
            now: later(),
        }
    }

    fn out(&self, name: &str) -> std::path::PathBuf {
        self.out.path().join(name)
    }
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |x| x == ext))
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ============================================================================
// Scenario and idempotence
// ============================================================================

#[tokio::test]
async fn test_scenario_writes_three_hours() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    publish_window(&mirror, &scenario_window(), |h| h as f64);

    let opts = dirs.options(scenario_window(), fixtures::bbox::SCENARIO);
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.planned, 3);
    assert_eq!(report.written.len(), 3);
    assert!(report.fetch_failures.is_empty());
    assert!(report.is_success());
    let expected: Vec<String> = fixtures::time::SCENARIO_STAMPS
        .iter()
        .map(|stamp| format!("{}_{}.asc", fixtures::names::PREFIX, stamp))
        .collect();
    assert_eq!(files_with_extension(dirs.out.path(), "asc"), expected);
    assert!(!dirs.out("jaxa_sat_2023-01-01_03:00.asc").exists());
    assert_eq!(files_with_extension(dirs.out.path(), "png").len(), 3);
    for stamp in fixtures::time::SCENARIO_STAMPS {
        assert!(dirs.out(&format!("jaxa_sat_{}.asc.png", stamp)).exists());
    }
    assert!(dirs.out("jaxa_sat_today.gif").exists());
    // no archives without --cum
    assert!(files_with_extension(dirs.out.path(), "archive").is_empty());
}

#[tokio::test]
async fn test_asc_content_matches_filtered_lattice() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = TimeWindow::previous_hour(ts("2023-01-01_01:00"));
    publish(
        &mirror,
        RemoteProduct::Archival,
        window.start,
        &standard_lattice(|r, c| (r * 100 + c) as f64),
    );

    let opts = dirs.options(window, fixtures::bbox::SMALL);
    pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    let text = std::fs::read_to_string(dirs.out("jaxa_sat_2023-01-01_00:00.asc")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "ncols        4");
    assert_eq!(lines[1], "nrows        3");
    assert_eq!(lines[2], "xllcorner    80");
    assert_eq!(lines[3], "yllcorner    6");
    assert_eq!(lines[5], "NODATA_value -99");
    // north-first: lat 6.2 is lattice row 12, lon 80.0 is lattice column 10
    assert_eq!(lines[6], "1210 1211 1212 1213");
    assert_eq!(lines[8], "1010 1011 1012 1013");
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish_window(&mirror, &window, |_| 1.0);

    let opts = dirs.options(window, fixtures::bbox::SCENARIO);
    let first = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.written.len(), 3);

    // with the server emptied, any fetch would now fail
    for instant in window.hours() {
        let rel = RemoteObject::new(RemoteProduct::Archival, instant).relative_path(&SourceConfig::default());
        mirror.remove(&rel);
    }
    let modified = std::fs::metadata(dirs.out("jaxa_sat_2023-01-01_00:00.asc"))
        .unwrap()
        .modified()
        .unwrap();

    let second = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert_eq!(second.skipped.len(), 3);
    assert!(second.written.is_empty());
    assert!(second.fetch_failures.is_empty());
    assert!(second.is_success());
    assert_eq!(
        std::fs::metadata(dirs.out("jaxa_sat_2023-01-01_00:00.asc"))
            .unwrap()
            .modified()
            .unwrap(),
        modified
    );
}

#[tokio::test]
async fn test_rebuild_recomputes() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish_window(&mirror, &window, |_| 1.0);

    let mut opts = dirs.options(window, fixtures::bbox::SCENARIO);
    pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    opts.rebuild = true;
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert!(report.skipped.is_empty());
    assert_eq!(report.written.len(), 3);
}

#[tokio::test]
async fn test_empty_window_is_noop() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = TimeWindow::new(ts("2023-01-01_03:00"), ts("2023-01-01_03:00"));

    let opts = dirs.options(window, fixtures::bbox::SCENARIO);
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.planned, 0);
    assert!(report.written.is_empty());
    assert!(report.is_success());
}

// ============================================================================
// Partial failure and fatal errors
// ============================================================================

#[tokio::test]
async fn test_missing_hour_does_not_fail_run() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish(&mirror, RemoteProduct::Archival, ts("2023-01-01_00:00"), &uniform_lattice(1.0));
    publish(&mirror, RemoteProduct::Archival, ts("2023-01-01_02:00"), &uniform_lattice(1.0));

    let opts = dirs.options(window, fixtures::bbox::SCENARIO);
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.fetch_failures.len(), 1);
    assert_eq!(report.fetch_failures[0].0, ts("2023-01-01_01:00"));
    assert_eq!(report.written.len(), 2);
    assert!(report.is_success());
    assert_eq!(
        files_with_extension(dirs.out.path(), "asc"),
        vec!["jaxa_sat_2023-01-01_00:00.asc", "jaxa_sat_2023-01-01_02:00.asc"]
    );
}

#[tokio::test]
async fn test_ragged_payload_is_fatal() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish_window(&mirror, &window, |_| 1.0);
    publish(&mirror, RemoteProduct::Archival, ts("2023-01-01_01:00"), &ragged_lattice(1.0));

    let opts = dirs.options(window, fixtures::bbox::SCENARIO);
    let result = pipeline(&mirror).run(&opts, &CancellationToken::new()).await;

    assert!(matches!(result, Err(SatError::ShapeMismatch { .. })));
    // the build barrier fails the run before anything is persisted
    assert!(files_with_extension(dirs.out.path(), "asc").is_empty());
}

#[tokio::test]
async fn test_unreadable_payload_is_fatal() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = TimeWindow::previous_hour(ts("2023-01-01_01:00"));
    let rel = RemoteObject::new(RemoteProduct::Archival, window.start).relative_path(&SourceConfig::default());
    mirror.put_garbage(&rel);

    let opts = dirs.options(window, fixtures::bbox::SCENARIO);
    let result = pipeline(&mirror).run(&opts, &CancellationToken::new()).await;
    assert!(matches!(result, Err(SatError::Payload { .. })));
}

#[tokio::test]
async fn test_single_entry_with_unexpected_name_is_read() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = TimeWindow::previous_hour(ts("2023-01-01_01:00"));
    let rel = RemoteObject::new(RemoteProduct::Archival, window.start).relative_path(&SourceConfig::default());
    mirror.put_misnamed(&rel, &uniform_lattice(0.5));

    let opts = dirs.options(window, fixtures::bbox::SMALL);
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.written.len(), 1);
}

#[tokio::test]
async fn test_offshore_bbox_is_no_data() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = TimeWindow::previous_hour(ts("2023-01-01_01:00"));
    publish_window(&mirror, &window, |_| 1.0);

    let opts = dirs.options(window, fixtures::bbox::OFFSHORE);
    let result = pipeline(&mirror).run(&opts, &CancellationToken::new()).await;
    assert!(matches!(result, Err(SatError::NoData(_))));
}

#[tokio::test]
async fn test_invalid_bbox_rejected_before_io() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let bbox = BoundingBox::new(10.0, 80.0, 5.0, 82.0);

    let mut opts = dirs.options(scenario_window(), bbox);
    opts.output_dir = dirs.out("never_created");
    let result = pipeline(&mirror).run(&opts, &CancellationToken::new()).await;

    assert!(matches!(result, Err(SatError::Configuration(_))));
    assert!(!dirs.out("never_created").exists());
}

#[tokio::test]
async fn test_cancelled_run_skips_build() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    publish_window(&mirror, &scenario_window(), |_| 1.0);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let opts = dirs.options(scenario_window(), fixtures::bbox::SCENARIO);
    let report = pipeline(&mirror).run(&opts, &cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert!(files_with_extension(dirs.out.path(), "asc").is_empty());
}

// ============================================================================
// Near-real-time product
// ============================================================================

#[tokio::test]
async fn test_recent_hours_use_near_realtime_tree() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    for instant in window.hours() {
        publish(&mirror, RemoteProduct::NearRealTime, instant, &uniform_lattice(2.0));
    }

    let mut opts = dirs.options(window, fixtures::bbox::SCENARIO);
    opts.now = ts("2023-01-01_04:10");
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    assert!(report.fetch_failures.is_empty());
    assert_eq!(report.written.len(), 3);
}

// ============================================================================
// Cumulative totals
// ============================================================================

#[tokio::test]
async fn test_cumulative_sum_and_skip() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish_window(&mirror, &window, |h| (h + 1) as f64);

    let mut opts = dirs.options(window, fixtures::bbox::SCENARIO);
    opts.cumulative = true;
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    let cum = cumulative_path(dirs.out.path(), fixtures::names::PREFIX, &window);
    assert_eq!(report.cumulative, Some(AccumulateOutcome::Written(cum.clone())));
    assert!(cum.exists());
    assert_eq!(files_with_extension(dirs.out.path(), "archive").len(), 3);

    // archives hold exactly the hourly values, which add up to 1 + 2 + 3
    let cache = ArchiveCache::new(dirs.out.path());
    let total: f64 = window
        .hours()
        .into_iter()
        .map(|instant| {
            let grid = cache
                .read(&ArchiveKey::new("jaxa_sat", instant, fixtures::bbox::SCENARIO))
                .unwrap();
            grid.get(0, 0).unwrap()
        })
        .sum();
    test_utils::assert_approx_eq!(total, 6.0, 1e-9);

    let again = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert_eq!(again.skipped.len(), 3);
    assert_eq!(again.cumulative, Some(AccumulateOutcome::AlreadyExists(cum)));
}

#[tokio::test]
async fn test_cumulative_waits_for_missing_hour() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish(&mirror, RemoteProduct::Archival, ts("2023-01-01_00:00"), &uniform_lattice(1.0));
    publish(&mirror, RemoteProduct::Archival, ts("2023-01-01_02:00"), &uniform_lattice(1.0));

    let mut opts = dirs.options(window, fixtures::bbox::SCENARIO);
    opts.cumulative = true;
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.cumulative,
        Some(AccumulateOutcome::Incomplete {
            missing: vec!["2023-01-01_01:00".to_string()]
        })
    );
    assert!(!cumulative_path(dirs.out.path(), fixtures::names::PREFIX, &window).exists());

    // the hour shows up later; the next run fills it in and completes the total
    publish(&mirror, RemoteProduct::Archival, ts("2023-01-01_01:00"), &uniform_lattice(1.0));
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped.len(), 2);
    assert!(matches!(report.cumulative, Some(AccumulateOutcome::Written(_))));
}

#[tokio::test]
async fn test_rebuild_refreshes_archives_and_total() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish_window(&mirror, &window, |_| 1.0);

    let mut opts = dirs.options(window, fixtures::bbox::SCENARIO);
    opts.cumulative = true;
    pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    let cum = cumulative_path(dirs.out.path(), fixtures::names::PREFIX, &window);
    let first_total = std::fs::read(&cum).unwrap();

    // upstream republishes corrected values
    publish_window(&mirror, &window, |_| 9.0);
    opts.rebuild = true;
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.written.len(), 3);
    assert_eq!(report.cumulative, Some(AccumulateOutcome::Written(cum.clone())));

    let text = std::fs::read_to_string(dirs.out("jaxa_sat_2023-01-01_00:00.asc")).unwrap();
    assert!(text.lines().nth(6).unwrap().starts_with("9 9 9"));

    let cache = ArchiveCache::new(dirs.out.path());
    for instant in window.hours() {
        let grid = cache
            .read(&ArchiveKey::new(fixtures::names::PREFIX, instant, fixtures::bbox::SCENARIO))
            .unwrap();
        assert_eq!(grid.get(0, 0), Some(9.0));
    }
    assert_ne!(std::fs::read(&cum).unwrap(), first_total);
}

#[tokio::test]
async fn test_bbox_change_invalidates_archives() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish_window(&mirror, &window, |_| 1.0);

    let mut opts = dirs.options(window, fixtures::bbox::SCENARIO);
    opts.cumulative = true;
    pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    opts.bbox = fixtures::bbox::SMALL;
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert!(report.skipped.is_empty());
    assert_eq!(report.written.len(), 3);

    let cache = ArchiveCache::new(dirs.out.path());
    let key = ArchiveKey::new("jaxa_sat", window.start, fixtures::bbox::SMALL);
    assert_eq!(cache.read(&key).unwrap().shape(), (3, 4));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_midnight_run_rebuilds_yesterday() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let evening = TimeWindow::new(ts("2023-01-01_22:00"), ts("2023-01-02_00:00"));
    let night = TimeWindow::new(ts("2023-01-02_00:00"), ts("2023-01-02_02:00"));
    publish_window(&mirror, &evening, |_| 1.0);
    publish_window(&mirror, &night, |_| 3.0);

    let opts = dirs.options(evening, fixtures::bbox::SCENARIO);
    pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    // a stale composite from some earlier day
    std::fs::write(dirs.out("jaxa_sat_yesterday.gif"), b"stale").unwrap();

    let opts = dirs.options(night, fixtures::bbox::SCENARIO);
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());

    let yesterday = std::fs::read(dirs.out("jaxa_sat_yesterday.gif")).unwrap();
    assert_eq!(&yesterday[0..6], b"GIF89a");
    let today = std::fs::read(dirs.out("jaxa_sat_today.gif")).unwrap();
    assert_eq!(&today[0..6], b"GIF89a");
}

#[tokio::test]
async fn test_clean_removes_working_files() {
    let mirror = Mirror::new();
    let dirs = Dirs::new();
    let window = scenario_window();
    publish_window(&mirror, &window, |_| 1.0);

    let mut opts = dirs.options(window, fixtures::bbox::SCENARIO);
    opts.cumulative = true;
    opts.clean = true;
    let report = pipeline(&mirror).run(&opts, &CancellationToken::new()).await.unwrap();

    let cleanup = report.cleanup.unwrap();
    assert!(cleanup.tmp_dir_removed);
    assert_eq!(cleanup.archives_removed, 3);
    assert!(!opts.tmp_dir.exists());
    assert!(files_with_extension(dirs.out.path(), "archive").is_empty());
    // products stay
    assert_eq!(files_with_extension(dirs.out.path(), "asc").len(), 3);
    assert!(cumulative_path(dirs.out.path(), fixtures::names::PREFIX, &window).exists());
}

#[tokio::test]
async fn test_hourly_window_is_previous_hour() {
    let window = TimeWindow::previous_hour(ts("2023-01-01_05:42"));
    assert_eq!(window.start, ts("2023-01-01_04:00"));
    assert_eq!(window.end, ts("2023-01-01_05:00"));
    assert_eq!(window.end - window.start, Duration::hours(1));
}
