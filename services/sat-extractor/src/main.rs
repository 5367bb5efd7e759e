//! Satellite precipitation extractor.
//!
//! Processes one window of hourly GSMaP snapshots per invocation:
//! - Fetches the hourly tables concurrently (FTP, HTTP or local mirror)
//! - Rebuilds grids over the bounding box and writes `.asc` + `.png`
//! - Optionally sums the window into a cumulative image
//! - Refreshes the today/yesterday animations

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use renderer::RasterRenderer;
use sat_common::time::{format_stamp, parse_stamp};
use sat_common::{BoundingBox, TimeWindow};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sat_extractor::config::ExtractorConfig;
use sat_extractor::metrics;
use sat_extractor::pipeline::{Pipeline, RunOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Plain,
}

#[derive(Parser, Debug)]
#[command(name = "sat-extractor")]
#[command(about = "Extract hourly GSMaP satellite rainfall over a bounding box")]
struct Args {
    /// Window start, UTC (YYYY-MM-DD_HH:MM). Default: one day and one hour ago
    #[arg(long, value_parser = parse_stamp)]
    start: Option<DateTime<Utc>>,

    /// Window end (exclusive), UTC (YYYY-MM-DD_HH:MM). Default: one hour ago
    #[arg(long, value_parser = parse_stamp)]
    end: Option<DateTime<Utc>>,

    /// Process only the hour before this instant (overrides --start/--end)
    #[arg(long, value_parser = parse_stamp, conflicts_with_all = ["start", "end"])]
    hourly_at: Option<DateTime<Utc>>,

    /// Output directory
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// File name prefix for every artifact (default: jaxa_sat)
    #[arg(long)]
    prefix: Option<String>,

    /// Remove the temp directory and archives after the run
    #[arg(long)]
    clean: bool,

    /// Archive hourly grids and render the window total
    #[arg(long)]
    cum: bool,

    #[arg(long, default_value_t = sat_common::bbox::SRI_LANKA.lat_min, allow_negative_numbers = true)]
    lat_min: f64,

    #[arg(long, default_value_t = sat_common::bbox::SRI_LANKA.lon_min, allow_negative_numbers = true)]
    lon_min: f64,

    #[arg(long, default_value_t = sat_common::bbox::SRI_LANKA.lat_max, allow_negative_numbers = true)]
    lat_max: f64,

    #[arg(long, default_value_t = sat_common::bbox::SRI_LANKA.lon_max, allow_negative_numbers = true)]
    lon_max: f64,

    /// YAML configuration file
    #[arg(long, env = "SAT_EXTRACTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory for downloads (default: a fresh tmp_jaxa* directory)
    #[arg(long)]
    tmp_dir: Option<PathBuf>,

    /// Maximum concurrent downloads and build workers
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Per-download timeout in seconds
    #[arg(long)]
    fetch_timeout_secs: Option<u64>,

    /// Maximum retry attempts per download
    #[arg(long)]
    max_retries: Option<u32>,

    /// Hours after which the archival product is used instead of near-real-time
    #[arg(long)]
    near_realtime_threshold_hours: Option<u32>,

    /// Recompute hours whose artifacts already exist
    #[arg(long)]
    rebuild: bool,

    /// Write Prometheus exposition text here at exit
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl Args {
    fn bbox(&self) -> Result<BoundingBox> {
        Ok(BoundingBox::try_new(self.lat_min, self.lon_min, self.lat_max, self.lon_max)?)
    }

    fn window(&self, now: DateTime<Utc>) -> Result<TimeWindow> {
        if let Some(ts) = self.hourly_at {
            return Ok(TimeWindow::previous_hour(ts));
        }
        let default = TimeWindow::default_relative_to(now);
        Ok(TimeWindow::try_new(
            self.start.unwrap_or(default.start),
            self.end.unwrap_or(default.end),
        )?)
    }

    /// File config (or defaults), then environment credentials, then flags.
    fn extractor_config(&self) -> Result<ExtractorConfig> {
        let mut config = match &self.config {
            Some(path) => ExtractorConfig::load(path)?,
            None => ExtractorConfig::default(),
        }
        .with_env_credentials();

        if let Some(prefix) = &self.prefix {
            config.output.prefix = prefix.clone();
        }
        if let Some(n) = self.max_concurrent {
            config.fetch.max_concurrent = Some(n);
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config.fetch.timeout_secs = secs;
        }
        if let Some(retries) = self.max_retries {
            config.fetch.max_retries = retries;
        }
        if let Some(hours) = self.near_realtime_threshold_hours {
            config.near_realtime_threshold_hours = hours;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Plain => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}

fn default_tmp_dir() -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("tmp_jaxa")
        .tempdir()
        .context("Failed to create temporary working directory")?;
    // removal is the job of --clean, not of drop
    Ok(dir.into_path())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format)?;

    // configuration errors surface before any I/O
    let config = args.extractor_config()?;
    let bbox = args.bbox()?;
    let now = Utc::now();
    let window = args.window(now)?;

    let prometheus = match &args.metrics_file {
        Some(_) => Some(metrics::install_recorder()?),
        None => None,
    };

    let tmp_dir = match &args.tmp_dir {
        Some(dir) => dir.clone(),
        None => default_tmp_dir()?,
    };

    info!(
        start = %format_stamp(window.start),
        end = %format_stamp(window.end),
        bbox = %bbox,
        output = %args.output.display(),
        tmp_dir = %tmp_dir.display(),
        prefix = %config.output.prefix,
        "Starting satellite rainfall extraction"
    );

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal; letting in-flight downloads finish");
            cancel_on_signal.cancel();
        }
    });

    let pipeline = Pipeline::from_config(config, Arc::new(RasterRenderer::default()))?;
    let opts = RunOptions {
        window,
        output_dir: args.output.clone(),
        tmp_dir,
        bbox,
        cumulative: args.cum,
        clean: args.clean,
        rebuild: args.rebuild,
        now,
    };

    let result = pipeline.run(&opts, &cancel).await;

    if let (Some(handle), Some(path)) = (&prometheus, &args.metrics_file) {
        if let Err(e) = metrics::write_exposition(handle, path) {
            warn!(error = %e, "Failed to write metrics file");
        }
    }

    let report = result.context("Extraction failed")?;
    for (instant, cause) in &report.fetch_failures {
        warn!(instant = %format_stamp(*instant), cause = %cause, "Hour not fetched");
    }
    for failure in &report.branch_failures {
        error!(error = %failure, "Artifact not produced");
    }

    if report.is_success() {
        info!(written = report.written.len(), skipped = report.skipped.len(), "Extraction complete");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            cancelled = report.cancelled,
            failures = report.branch_failures.len(),
            "Extraction finished with errors"
        );
        Ok(ExitCode::FAILURE)
    }
}
