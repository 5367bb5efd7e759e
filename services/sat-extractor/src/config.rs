//! Extractor configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional YAML file, then command-line flags applied by the binary.
//! Credentials for the product server are read from the environment when the
//! file does not carry them.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use sat_common::SatError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable holding the FTP user name.
pub const ENV_FTP_USER: &str = "GSMAP_FTP_USER";
/// Environment variable holding the FTP password.
pub const ENV_FTP_PASSWORD: &str = "GSMAP_FTP_PASSWORD";

/// Root configuration, usually loaded from `extractor.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub source: SourceConfig,
    pub fetch: FetchConfig,
    /// Instants older than this many hours are fetched from the archival tree.
    pub near_realtime_threshold_hours: u32,
    pub output: OutputConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            near_realtime_threshold_hours: 5,
            output: OutputConfig::default(),
        }
    }
}

/// Where and how the hourly products are published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// `ftp://`, `http(s)://` or `file://` root of the product tree.
    pub base_url: String,
    /// Regional subset tag, part of both the directory and the file name.
    pub region: String,
    /// Sub-root of the archival (gauge-adjusted, hourly) product.
    pub archival_root: String,
    /// Sub-root of the near-real-time product.
    pub near_realtime_root: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "ftp://hokusai.eorc.jaxa.jp/".to_string(),
            region: "05_AsiaSS".to_string(),
            archival_root: "realtime/txt".to_string(),
            near_realtime_root: "now/txt".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Fetch phase tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent downloads and build workers; defaults to available parallelism.
    pub max_concurrent: Option<usize>,
    pub timeout_secs: u64,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            timeout_secs: 120,
            max_retries: 2,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Effective worker count for both fan-out phases.
    pub fn worker_count(&self) -> usize {
        self.max_concurrent.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

/// Naming of the artifacts written to the output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: "jaxa_sat".to_string(),
        }
    }
}

impl ExtractorConfig {
    /// Load a configuration from a YAML file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self, SatError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SatError::configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)
            .map_err(|e| SatError::configuration(format!("{} ({})", e, path.display())))?;
        debug!(path = %path.display(), "Loaded extractor config");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SatError> {
        serde_yaml::from_str(content)
            .map_err(|e| SatError::configuration(format!("Failed to parse config: {}", e)))
    }

    /// Fill credentials the file left empty from the environment.
    pub fn with_env_credentials(mut self) -> Self {
        if self.source.username.is_none() {
            self.source.username = std::env::var(ENV_FTP_USER).ok().filter(|v| !v.is_empty());
        }
        if self.source.password.is_none() {
            self.source.password = std::env::var(ENV_FTP_PASSWORD).ok().filter(|v| !v.is_empty());
        }
        self
    }

    pub fn near_realtime_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.near_realtime_threshold_hours))
    }

    /// Parsed base URL, always ending in `/` so relative paths join under it.
    pub fn base_url(&self) -> Result<Url, SatError> {
        let mut raw = self.source.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| SatError::configuration(format!("Invalid base URL '{}': {}", raw, e)))?;
        match url.scheme() {
            "ftp" | "http" | "https" | "file" => Ok(url),
            other => Err(SatError::configuration(format!(
                "Unsupported URL scheme '{}' (expected ftp, http, https or file)",
                other
            ))),
        }
    }

    /// Check every value that can be wrong before any I/O happens.
    pub fn validate(&self) -> Result<(), SatError> {
        self.base_url()?;
        if self.source.region.trim().is_empty() {
            return Err(SatError::configuration("source.region must not be empty"));
        }
        if self.fetch.max_concurrent == Some(0) {
            return Err(SatError::configuration("fetch.max_concurrent must be at least 1"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(SatError::configuration("fetch.timeout_secs must be at least 1"));
        }
        let prefix = &self.output.prefix;
        if prefix.is_empty() || prefix.contains('/') || prefix.contains('\\') {
            return Err(SatError::configuration(format!(
                "output.prefix '{}' must be a non-empty file name fragment",
                prefix
            )));
        }
        Ok(())
    }
}
