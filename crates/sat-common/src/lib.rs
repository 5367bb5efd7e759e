//! Common types shared by the satellite precipitation extractor crates.

pub mod bbox;
pub mod error;
pub mod grid;
pub mod time;

pub use bbox::BoundingBox;
pub use error::SatError;
pub use grid::{Grid, RawRecord};
pub use time::TimeWindow;
