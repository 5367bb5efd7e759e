//! Turn a time window into per-hour fetch and output locations.
//!
//! The product server publishes two trees:
//! - archival: `realtime/txt/<region>/YYYY/MM/DD/gsmap_nrt.YYYYMMDD.HH00.<region>.csv.zip`
//! - near-real-time: `now/txt/<region>/gsmap_now.YYYYMMDD.HH00_HH59.<region>.csv.zip`
//!
//! Recent hours are only available in the near-real-time tree, so the tree is
//! chosen by the age of each instant relative to "now".

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use sat_common::time::format_stamp;
use sat_common::TimeWindow;

use crate::config::SourceConfig;

/// Which published product an instant is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteProduct {
    Archival,
    NearRealTime,
}

impl RemoteProduct {
    /// Archival once the instant is older than `threshold`.
    pub fn for_age(instant: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> Self {
        if now - instant > threshold {
            RemoteProduct::Archival
        } else {
            RemoteProduct::NearRealTime
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteProduct::Archival => "archival",
            RemoteProduct::NearRealTime => "near_realtime",
        }
    }
}

/// One hourly object on the product server, addressed by typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObject {
    pub product: RemoteProduct,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl RemoteObject {
    pub fn new(product: RemoteProduct, instant: DateTime<Utc>) -> Self {
        Self {
            product,
            year: instant.year(),
            month: instant.month(),
            day: instant.day(),
            hour: instant.hour(),
        }
    }

    fn date_compact(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
    }

    /// File name of the zipped CSV table.
    pub fn file_name(&self, region: &str) -> String {
        match self.product {
            RemoteProduct::Archival => format!(
                "gsmap_nrt.{}.{:02}00.{}.csv.zip",
                self.date_compact(),
                self.hour,
                region
            ),
            RemoteProduct::NearRealTime => format!(
                "gsmap_now.{}.{:02}00_{:02}59.{}.csv.zip",
                self.date_compact(),
                self.hour,
                self.hour,
                region
            ),
        }
    }

    /// Path relative to the server root, without a leading slash.
    pub fn relative_path(&self, source: &SourceConfig) -> String {
        let region = &source.region;
        match self.product {
            RemoteProduct::Archival => format!(
                "{}/{}/{:04}/{:02}/{:02}/{}",
                source.archival_root.trim_matches('/'),
                region,
                self.year,
                self.month,
                self.day,
                self.file_name(region)
            ),
            RemoteProduct::NearRealTime => format!(
                "{}/{}/{}",
                source.near_realtime_root.trim_matches('/'),
                region,
                self.file_name(region)
            ),
        }
    }
}

/// Everything needed to fetch, build and store one hour.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocator {
    pub instant: DateTime<Utc>,
    pub remote: RemoteObject,
    /// Path relative to the configured base URL.
    pub remote_path: String,
    pub local_temp_path: PathBuf,
    pub canonical_output_path: PathBuf,
}

impl SourceLocator {
    pub fn stamp(&self) -> String {
        format_stamp(self.instant)
    }

    /// Rendered image next to the canonical grid: `<canonical>.png`.
    pub fn image_path(&self) -> PathBuf {
        append_extension(&self.canonical_output_path, IMAGE_EXTENSION)
    }
}

pub const IMAGE_EXTENSION: &str = "png";

/// `<path>.<ext>`, keeping the existing extension.
pub fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// `<output_dir>/<prefix>_<YYYY-MM-DD_HH:MM>.asc`
pub fn canonical_output_path(output_dir: &Path, prefix: &str, instant: DateTime<Utc>) -> PathBuf {
    output_dir.join(format!("{}_{}.asc", prefix, format_stamp(instant)))
}

/// Builds locators for every hour of a window.
#[derive(Debug, Clone)]
pub struct TimeWindowPlanner {
    output_dir: PathBuf,
    tmp_dir: PathBuf,
    prefix: String,
    source: SourceConfig,
    near_realtime_threshold: Duration,
}

impl TimeWindowPlanner {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        source: SourceConfig,
        near_realtime_threshold: Duration,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            tmp_dir: tmp_dir.into(),
            prefix: prefix.into(),
            source,
            near_realtime_threshold,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// One locator per hour in `[start, end)`; empty when `start >= end`.
    pub fn plan(&self, window: &TimeWindow, now: DateTime<Utc>) -> Vec<SourceLocator> {
        window
            .hours()
            .into_iter()
            .map(|instant| self.locate(instant, now))
            .collect()
    }

    /// Locator for a single (already floored) instant.
    pub fn locate(&self, instant: DateTime<Utc>, now: DateTime<Utc>) -> SourceLocator {
        let product = RemoteProduct::for_age(instant, now, self.near_realtime_threshold);
        let remote = RemoteObject::new(product, instant);
        let remote_path = remote.relative_path(&self.source);
        let local_temp_path = self.tmp_dir.join(remote.file_name(&self.source.region));
        SourceLocator {
            instant,
            remote,
            remote_path,
            local_temp_path,
            canonical_output_path: canonical_output_path(&self.output_dir, &self.prefix, instant),
        }
    }
}
