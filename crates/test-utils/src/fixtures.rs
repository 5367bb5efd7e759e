//! Common test fixtures for extractor tests.
//!
//! This module provides pre-defined test data that represents common
//! scenarios in satellite precipitation processing.

/// Common bounding box definitions for testing.
pub mod bbox {
    use sat_common::BoundingBox;

    /// Default extraction region (Sri Lanka).
    pub const SRI_LANKA: BoundingBox = sat_common::bbox::SRI_LANKA;

    /// Region used by the end-to-end scenarios, in the 0.1 degree lattice.
    pub const SCENARIO: BoundingBox = BoundingBox {
        lat_min: 5.72,
        lon_min: 79.52,
        lat_max: 10.06,
        lon_max: 82.19,
    };

    /// A small region covering a 3x4 block of the scenario lattice.
    pub const SMALL: BoundingBox = BoundingBox {
        lat_min: 6.0,
        lon_min: 80.0,
        lat_max: 6.2,
        lon_max: 80.3,
    };

    /// A region entirely outside the scenario lattice.
    pub const OFFSHORE: BoundingBox = BoundingBox {
        lat_min: -10.0,
        lon_min: 60.0,
        lat_max: -9.0,
        lon_max: 61.0,
    };
}

/// Lattice geometry of the synthetic product.
pub mod lattice {
    /// Spacing between lattice points, degrees.
    pub const STEP: f64 = 0.1;

    /// Southern-most latitude of the synthetic lattice.
    pub const LAT_ORIGIN: f64 = 5.0;

    /// Western-most longitude of the synthetic lattice.
    pub const LON_ORIGIN: f64 = 79.0;

    /// Lattice points along each axis.
    pub const ROWS: usize = 60;
    pub const COLS: usize = 40;
}

/// Common time values for testing.
pub mod time {
    /// Start of the reference scenario window.
    pub const SCENARIO_START: &str = "2023-01-01_00:00";

    /// End of the reference scenario window.
    pub const SCENARIO_END: &str = "2023-01-01_03:00";

    /// Instants covered by the reference scenario (end excluded).
    pub const SCENARIO_STAMPS: [&str; 3] = ["2023-01-01_00:00", "2023-01-01_01:00", "2023-01-01_02:00"];
}

/// Output naming used throughout the tests.
pub mod names {
    pub const PREFIX: &str = "jaxa_sat";
}
