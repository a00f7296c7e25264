//! Collaborator boundaries: the component graph, per-window models and the
//! solver behind them.
//!
//! The engine never sees component equations or solver matrices. It hands a
//! [`ModelRequest`] (time window, optional carry-over state, optional
//! override series, optional aggregation plan) to an [`EnergySystem`] and
//! gets back a [`WindowModel`] it can solve and read results from.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregation::{AggregationPlan, SeriesId, SeriesTable};
use crate::carry::{CarryState, VariableId};
use crate::error::{Error, Result};
use crate::results::ResultNode;
use crate::timegrid::{TimeGrid, Timeline};

/// Metadata of one result variable: where it lives in the result tree and
/// how its series behaves at window boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMeta {
    /// Stable identity, minted once at graph construction time.
    pub id: VariableId,
    /// Location in the nested result tree (element labels, quantity name).
    pub path: Vec<String>,
    /// The series has one extra boundary sample (value defined at both the
    /// start and end of each step, e.g. a storage charge level).
    pub end_inclusive: bool,
    /// The last kept value seeds the next window's first-step value.
    pub carries_state: bool,
}

/// Path-keyed lookup over the variables a window model reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableCatalog {
    by_path: BTreeMap<String, VariableMeta>,
}

impl VariableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, meta: VariableMeta) -> Result<()> {
        let key = meta.path.join(".");
        if let Some(existing) = self.by_path.get(&key) {
            return Err(Error::consistency(format!(
                "variables '{}' and '{}' both claim result path {key}",
                existing.id, meta.id
            )));
        }
        self.by_path.insert(key, meta);
        Ok(())
    }

    pub fn lookup(&self, path: &[String]) -> Option<&VariableMeta> {
        self.by_path.get(&path.join("."))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableMeta> {
        self.by_path.values()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Explicit per-series override values, keyed by input series id. Used by
/// the aggregated strategy to pin reconstructed series onto the model.
pub type OverrideSeries = BTreeMap<SeriesId, Vec<f64>>;

/// Everything a system needs to build one solvable window model.
#[derive(Debug)]
pub struct ModelRequest<'a> {
    /// Window label, used for solver logs and diagnostics.
    pub label: &'a str,
    /// Time data of the window.
    pub grid: &'a TimeGrid,
    /// Global indices the window covers.
    pub indices: &'a [usize],
    /// Carried state from the previous window. For each variable present
    /// here the model must initialize the first-step value to the carried
    /// scalar instead of treating it as free or applying a default initial
    /// condition.
    pub carry: Option<&'a CarryState>,
    /// Reconstructed input series that replace the originals.
    pub overrides: Option<&'a OverrideSeries>,
    /// Representative-period coupling, passed explicitly so the shared
    /// graph is never mutated for one window's build.
    pub aggregation: Option<&'a AggregationPlan>,
}

/// The component graph of an energy system, as seen by the engine.
pub trait EnergySystem {
    type Model: WindowModel;

    /// Global time axis of the system.
    fn timeline(&self) -> &Timeline;

    /// Lock the component graph against structural edits. Must be
    /// idempotent; structural violations (degrees of freedom, medium
    /// mismatches) surface here or in [`build_model`](Self::build_model)
    /// as [`Error::Structural`].
    fn finalize(&mut self) -> Result<()>;

    /// Number of investment-sizing features in the graph. Segment-local
    /// sizing decisions are not economically meaningful, so the segmented
    /// strategy refuses to run when this is non-zero.
    fn investment_feature_count(&self) -> usize {
        0
    }

    /// All array-valued input series over the given indices, with their
    /// clustering weights. Scalar series are excluded.
    fn series_table(&self, indices: &[usize]) -> SeriesTable;

    /// Build one solvable model for the requested window.
    fn build_model(&mut self, request: ModelRequest<'_>) -> Result<Self::Model>;
}

/// One built model instance covering one window.
pub trait WindowModel {
    /// Run the solver. Infeasibility is reported as [`Error::Infeasible`].
    fn solve(&mut self, options: &SolveOptions) -> Result<SolveStats>;

    /// Nested raw results of the solved model.
    fn results(&self) -> &ResultNode;

    /// Metadata for the variables in [`results`](Self::results).
    fn catalog(&self) -> &VariableCatalog;
}

/// Solver options handed through to the window models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Solver backend name, interpreted by the system implementation.
    pub solver: String,
    /// Relative MIP gap, if the backend supports one.
    pub mip_gap: Option<f64>,
    /// Wall-clock limit per window.
    pub time_limit: Option<Duration>,
    /// Directory for per-window solver logs; `None` disables logging.
    pub log_dir: Option<PathBuf>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            solver: "cbc".to_string(),
            mip_gap: None,
            time_limit: None,
            log_dir: None,
        }
    }
}

impl SolveOptions {
    /// The solver log target for one window, `<log_dir>/<label>_solver.log`.
    pub fn log_target(&self, label: &str) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{label}_solver.log")))
    }
}

/// Solver outcome of one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveStats {
    pub objective: Option<f64>,
    pub solve_time: Duration,
}
