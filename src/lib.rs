//! # enflow
//!
//! Calculation engine for energy-system optimization: takes a graph of
//! energy-conversion components (behind the [`model::EnergySystem`]
//! boundary), splits its global time axis into solvable windows, builds
//! one algebraic model per window and stitches the solved windows back
//! into one continuous result time series.
//!
//! Three strategies are available:
//!
//! - [`calculation::FullCalculation`] solves the whole horizon in one
//!   model.
//! - [`calculation::AggregatedCalculation`] compresses the inputs to
//!   representative periods (via an external [`aggregation::PeriodReducer`])
//!   and solves one model with the reconstructed series pinned.
//! - [`calculation::SegmentedCalculation`] sweeps overlapping windows over
//!   the horizon, carrying storage state forward through
//!   [`carry::CarryState`] and merging the kept slices with
//!   [`results::ResultMerger`].
//!
//! The component equations, the LP/MILP solver and the clustering
//! algorithm are external collaborators; the `sim` feature (default)
//! provides a small deterministic reference implementation of all three
//! boundaries.
//!
//! ```
//! use enflow::calculation::SegmentedCalculation;
//! use enflow::model::SolveOptions;
//! use enflow::sim::{SimSystem, StorageSpec};
//! use enflow::timegrid::Timeline;
//! use chrono::{TimeZone, Utc};
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let timeline = Timeline::hourly(start, 10).unwrap();
//! let mut system = SimSystem::new(
//!     timeline,
//!     vec![3.0; 10],            // demand, kW
//!     vec![5.0, 5.0, 5.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
//!     vec![1.0; 10],            // price per kWh
//! )
//! .with_storage(StorageSpec::default());
//!
//! let outcome = SegmentedCalculation::new("demo", 4, 3)
//!     .solve(&mut system, &SolveOptions::default())
//!     .unwrap();
//! assert_eq!(outcome.record.windows.len(), 4);
//! ```

pub mod aggregation;
pub mod calculation;
pub mod carry;
pub mod error;
pub mod model;
pub mod persist;
pub mod results;
pub mod telemetry;
pub mod timegrid;

#[cfg(feature = "sim")]
pub mod sim;

pub use error::{Error, Result};
