//! Hourly satellite precipitation extractor.
//!
//! Downloads GSMaP rain-rate tables for a window of hours, rebuilds each
//! into a regular grid over a bounding box and maintains the derived
//! artifacts in an output directory:
//! - `<prefix>_<stamp>.asc` ESRI ASCII grids and `<prefix>_<stamp>.asc.png` images
//! - `<prefix>_<stamp>.asc.archive` raw grids for window totals
//! - `<prefix>_cum_rf_<start>-<end>.png` window totals
//! - `<prefix>_today.gif` / `<prefix>_yesterday.gif` daily animations
//!
//! Work already on disk is never redone unless a rebuild is requested.

pub mod accumulator;
pub mod asc;
pub mod builder;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod planner;

pub use accumulator::{AccumulateOutcome, Accumulator};
pub use builder::GridBuilder;
pub use cache::{ArchiveCache, ArchiveKey};
pub use config::ExtractorConfig;
pub use fetch::{FetchReport, ParallelFetcher, Transport};
pub use lifecycle::ArtifactLifecycleManager;
pub use pipeline::{Pipeline, RunOptions, RunReport};
pub use planner::{RemoteObject, RemoteProduct, SourceLocator, TimeWindowPlanner};
