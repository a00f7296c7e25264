//! Calculation over representative periods.
//!
//! Runs a black-box period reducer over the flattened table of all
//! array-valued input series, then builds one model spanning the original
//! full index range with the reconstructed series pinned as explicit
//! overrides (unless only binary decisions are coupled). The model itself
//! still covers every original timestep, so the raw results need no
//! trimming or decompression here.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{resolve_indices, CalculationOutcome, RunRecord, Timings, WindowBounds};
use crate::aggregation::{AggregationPlan, PeriodReducer, Reduction, ReductionRequest, SeriesId};
use crate::error::{Error, Result};
use crate::model::{EnergySystem, ModelRequest, OverrideSeries, SolveOptions, WindowModel};

/// Parameters of the representative-period reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationParams {
    /// Length of one period in hours; must be a multiple of the step width.
    pub hours_per_period: f64,
    pub nr_of_typical_periods: usize,
    /// Explicitly keep the periods containing the extremes of the pinned
    /// series.
    pub use_extreme_periods: bool,
    /// Also pin storage charge/discharge flows to aggregated values.
    pub fix_storage_flows: bool,
    /// Couple only discrete on/off decisions across equivalent periods; no
    /// override series are supplied then.
    pub fix_binary_vars_only: bool,
    /// Share of coupled values (0..=100) the solver may deviate.
    pub period_freedom_percent: f64,
    /// Cost charged per freed variable.
    pub cost_per_free_variable: f64,
    /// Series whose maximum-extreme period must be preserved verbatim.
    pub pinned_max: Vec<SeriesId>,
    /// Series whose minimum-extreme period must be preserved verbatim.
    pub pinned_min: Vec<SeriesId>,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            hours_per_period: 24.0,
            nr_of_typical_periods: 8,
            use_extreme_periods: false,
            fix_storage_flows: true,
            fix_binary_vars_only: false,
            period_freedom_percent: 0.0,
            cost_per_free_variable: 0.0,
            pinned_max: Vec::new(),
            pinned_min: Vec::new(),
        }
    }
}

impl AggregationParams {
    fn validate(&self) -> Result<()> {
        if self.nr_of_typical_periods == 0 {
            return Err(Error::config("nr_of_typical_periods must be at least 1"));
        }
        if self.hours_per_period <= 0.0 {
            return Err(Error::config(format!(
                "hours_per_period must be positive, got {}",
                self.hours_per_period
            )));
        }
        if !(0.0..=100.0).contains(&self.period_freedom_percent) {
            return Err(Error::config(format!(
                "period_freedom_percent must be within 0..=100, got {}",
                self.period_freedom_percent
            )));
        }
        Ok(())
    }
}

/// Builds one model over the full requested window, with inputs compressed
/// to representative periods by an external reducer.
pub struct AggregatedCalculation<R: PeriodReducer> {
    name: String,
    indices: Option<Vec<usize>>,
    params: AggregationParams,
    reducer: R,
}

impl<R: PeriodReducer> AggregatedCalculation<R> {
    pub fn new(name: impl Into<String>, params: AggregationParams, reducer: R) -> Self {
        Self { name: name.into(), indices: None, params, reducer }
    }

    /// Restrict the calculation to a subset of global indices.
    pub fn with_indices(mut self, indices: Vec<usize>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn solve<S: EnergySystem>(
        self,
        system: &mut S,
        options: &SolveOptions,
    ) -> Result<CalculationOutcome> {
        let started_at = Utc::now();
        let mut timings = Timings::default();
        self.params.validate()?;

        let indices = resolve_indices(system.timeline().len(), self.indices);
        let grid = system.timeline().grid(&indices)?;
        let hours_per_step = grid.require_equidistant()?;

        // lock the graph before reading its series, so structural
        // violations surface here and not as a panic in series_table
        system.finalize()?;

        let aggregation_start = Instant::now();
        let table = system.series_table(&indices);
        for id in self.params.pinned_max.iter().chain(&self.params.pinned_min) {
            if table.get(id).is_none() {
                return Err(Error::config(format!(
                    "pinned series '{id}' is not an array-valued series of the system"
                )));
            }
        }
        if self.params.use_extreme_periods
            && self.params.pinned_max.is_empty()
            && self.params.pinned_min.is_empty()
        {
            warn!("use_extreme_periods set but no series pinned, extremes cannot be preserved");
        }

        let request = ReductionRequest {
            table: &table,
            hours_per_step,
            hours_per_period: self.params.hours_per_period,
            nr_of_typical_periods: self.params.nr_of_typical_periods,
            use_extreme_periods: self.params.use_extreme_periods,
            pinned_max: &self.params.pinned_max,
            pinned_min: &self.params.pinned_min,
        };
        request.steps_per_period()?;

        info!(
            name = %self.name,
            steps = grid.len(),
            series = table.len(),
            periods = self.params.nr_of_typical_periods,
            "reducing input series to representative periods"
        );
        let reduction = self.reducer.reduce(request)?;
        check_reduction(&reduction, table.len(), grid.len())?;
        debug!(cluster_order = ?reduction.cluster_order, "periods assigned");
        timings.aggregation += aggregation_start.elapsed();

        // Unless only binaries are coupled, pin every clustered series to
        // its reconstructed values.
        let overrides: Option<OverrideSeries> = if self.params.fix_binary_vars_only {
            None
        } else {
            Some(reduction.reconstructed.clone())
        };
        let plan = AggregationPlan {
            cluster_order: reduction.cluster_order,
            index_vectors_of_clusters: reduction.index_vectors_of_clusters,
            fix_binary_vars_only: self.params.fix_binary_vars_only,
            fix_storage_flows: self.params.fix_storage_flows,
            period_freedom_percent: self.params.period_freedom_percent,
            cost_per_free_variable: self.params.cost_per_free_variable,
        };

        let build_start = Instant::now();
        let mut model = system.build_model(ModelRequest {
            label: &self.name,
            grid: &grid,
            indices: &indices,
            carry: None,
            overrides: overrides.as_ref(),
            aggregation: Some(&plan),
        })?;
        timings.modeling += build_start.elapsed();

        let stats = model.solve(options)?;
        timings.solving += stats.solve_time;
        info!(name = %self.name, objective = ?stats.objective, "aggregated model solved");

        let window = WindowBounds {
            label: self.name.clone(),
            first_index: indices[0],
            last_index: indices[indices.len() - 1],
            steps_kept: grid.len(),
            objective: stats.objective,
        };

        Ok(CalculationOutcome {
            record: RunRecord {
                id: Uuid::new_v4(),
                name: self.name,
                strategy: "aggregated".to_string(),
                started_at,
                finished_at: Utc::now(),
                step_count: grid.len(),
                windows: vec![window],
                timings,
            },
            results: model.results().clone(),
        })
    }
}

fn check_reduction(reduction: &Reduction, series_count: usize, window_len: usize) -> Result<()> {
    for (id, values) in &reduction.reconstructed {
        if values.len() != window_len {
            return Err(Error::consistency(format!(
                "reducer reconstructed {} samples for series '{id}', window has {window_len}",
                values.len()
            )));
        }
    }
    if reduction.reconstructed.len() != series_count {
        return Err(Error::consistency(format!(
            "reducer reconstructed {} series, table has {series_count}",
            reduction.reconstructed.len()
        )));
    }
    Ok(())
}
