//! One-shot calculation over the whole requested window.

use std::time::Instant;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{resolve_indices, CalculationOutcome, RunRecord, Timings, WindowBounds};
use crate::error::Result;
use crate::model::{EnergySystem, ModelRequest, SolveOptions, WindowModel};

/// Builds exactly one model covering every requested index, solves it once
/// and returns its raw results untouched.
#[derive(Debug)]
pub struct FullCalculation {
    name: String,
    indices: Option<Vec<usize>>,
}

impl FullCalculation {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), indices: None }
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

        let indices = resolve_indices(system.timeline().len(), self.indices);
        let grid = system.timeline().grid(&indices)?;
        system.finalize()?;

        info!(
            name = %self.name,
            steps = grid.len(),
            first_index = indices[0],
            last_index = indices[indices.len() - 1],
            "building full model"
        );

        let build_start = Instant::now();
        let mut model = system.build_model(ModelRequest {
            label: &self.name,
            grid: &grid,
            indices: &indices,
            carry: None,
            overrides: None,
            aggregation: None,
        })?;
        timings.modeling += build_start.elapsed();

        let stats = model.solve(options)?;
        timings.solving += stats.solve_time;
        info!(name = %self.name, objective = ?stats.objective, "full model solved");

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
                strategy: "full".to_string(),
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
