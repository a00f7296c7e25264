//! Deterministic reference system for tests and demos.
//!
//! [`SimSystem`] is a minimal energy system (renewable source, demand
//! sink, optional storage, grid connection) whose window models are solved
//! by a greedy merit-order dispatch instead of an external LP/MILP solver.
//! It exists to exercise the calculation strategies end to end and doubles
//! as executable documentation of the [`EnergySystem`](crate::model::EnergySystem)
//! and [`WindowModel`](crate::model::WindowModel) boundaries.

mod reducer;
mod system;

pub use reducer::NearestPeriodReducer;
pub use system::{DispatchModel, SimSystem, StorageSpec};
