//! Calculation over overlapping time segments with carried state.
//!
//! The global index range is split into windows of `segment_length` steps
//! whose start advances by `steps_kept` each time, so consecutive windows
//! overlap by `segment_length - steps_kept` steps. The overlap exists only
//! to let state-carrying variables equilibrate before the kept boundary:
//! just the first `steps_kept` results of each window (the remainder, on
//! the last window) enter the merged output, and the storage state at the
//! last kept step seeds the next window's build. The kept sub-ranges
//! partition the horizon with no gaps and no double-counted steps.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{resolve_indices, CalculationOutcome, RunRecord, Timings, WindowBounds};
use crate::carry::CarryState;
use crate::error::{Error, Result};
use crate::model::{EnergySystem, ModelRequest, SolveOptions, WindowModel};
use crate::results::{ResultMerger, ResultNode};

/// Sweeps overlapping windows over the horizon, carrying storage state
/// forward and stitching the kept slices into one continuous result.
#[derive(Debug)]
pub struct SegmentedCalculation {
    name: String,
    indices: Option<Vec<usize>>,
    segment_length: usize,
    steps_kept: usize,
}

impl SegmentedCalculation {
    pub fn new(name: impl Into<String>, segment_length: usize, steps_kept: usize) -> Self {
        Self {
            name: name.into(),
            indices: None,
            segment_length,
            steps_kept,
        }
    }

    /// Restrict the calculation to a subset of global indices.
    pub fn with_indices(mut self, indices: Vec<usize>) -> Self {
        self.indices = Some(indices);
        self
    }

    fn check_preconditions<S: EnergySystem>(&self, system: &S, total_steps: usize) -> Result<()> {
        if self.steps_kept == 0 {
            return Err(Error::config("steps_kept must be at least 1"));
        }
        if self.steps_kept > self.segment_length {
            return Err(Error::config(format!(
                "steps_kept={} exceeds segment_length={}",
                self.steps_kept, self.segment_length
            )));
        }
        if self.segment_length > total_steps {
            return Err(Error::config(format!(
                "segment_length={} exceeds the {total_steps} steps of the calculation window",
                self.segment_length
            )));
        }
        let invest_features = system.investment_feature_count();
        if invest_features > 0 {
            return Err(Error::config(format!(
                "{invest_features} investment-sizing feature(s) present; sizing decisions are \
                 not meaningful within artificially short segments"
            )));
        }
        Ok(())
    }

    pub fn solve<S: EnergySystem>(
        self,
        system: &mut S,
        options: &SolveOptions,
    ) -> Result<CalculationOutcome> {
        let started_at = Utc::now();
        let mut timings = Timings::default();

        let indices = resolve_indices(system.timeline().len(), self.indices.clone());
        let total_steps = indices.len();
        self.check_preconditions(system, total_steps)?;
        system.finalize()?;

        let nr_of_segments = total_steps.div_ceil(self.steps_kept);
        info!(
            name = %self.name,
            first_index = indices[0],
            last_index = indices[total_steps - 1],
            segment_length = self.segment_length,
            steps_kept = self.steps_kept,
            segments = nr_of_segments,
            "starting segmented calculation"
        );

        let mut accumulated = ResultNode::group();
        let mut windows = Vec::with_capacity(nr_of_segments);
        let mut previous: Option<S::Model> = None;

        for segment in 0..nr_of_segments {
            let start_local = segment * self.steps_kept;
            let end_local = (start_local + self.segment_length).min(total_steps) - 1;
            let window_indices = &indices[start_local..=end_local];
            // the last segment keeps whatever steps remain
            let kept = if segment == nr_of_segments - 1 {
                end_local - start_local + 1
            } else {
                self.steps_kept
            };

            let label = format!("{}_seg{segment}", self.name);
            let grid = system.timeline().grid(window_indices)?;
            info!(
                segment,
                first_index = window_indices[0],
                last_index = window_indices[window_indices.len() - 1],
                steps = grid.len(),
                kept,
                "building segment"
            );

            let carry = match &previous {
                Some(prior) => {
                    let carry = CarryState::extract(
                        prior.catalog(),
                        prior.results(),
                        self.steps_kept - 1,
                        grid.timestamps()[0],
                    )?;
                    for (id, carried) in carry.iter() {
                        debug!(%id, value = carried.value, "carrying state into segment");
                    }
                    Some(carry)
                }
                None => None,
            };

            let build_start = Instant::now();
            let mut model = system
                .build_model(ModelRequest {
                    label: &label,
                    grid: &grid,
                    indices: window_indices,
                    carry: carry.as_ref(),
                    overrides: None,
                    aggregation: None,
                })
                .map_err(|e| in_segment(e, segment, window_indices))?;
            timings.modeling += build_start.elapsed();

            let stats = model
                .solve(options)
                .map_err(|e| in_segment(e, segment, window_indices))?;
            timings.solving += stats.solve_time;

            ResultMerger::new(model.catalog())
                .append(&mut accumulated, model.results(), kept, segment == 0)
                .map_err(|e| in_segment(e, segment, window_indices))?;

            windows.push(WindowBounds {
                label,
                first_index: window_indices[0],
                last_index: window_indices[window_indices.len() - 1],
                steps_kept: kept,
                objective: stats.objective,
            });
            previous = Some(model);
        }

        // previous always holds the last model here, nr_of_segments >= 1
        if let Some(model) = &previous {
            let last = nr_of_segments - 1;
            let bounds = [windows[last].first_index, windows[last].last_index];
            ResultMerger::new(model.catalog())
                .verify_lengths(&accumulated, total_steps)
                .map_err(|e| in_segment(e, last, &bounds))?;
        }

        info!(
            name = %self.name,
            segments = nr_of_segments,
            modeling = ?timings.modeling,
            solving = ?timings.solving,
            "segmented calculation finished"
        );

        Ok(CalculationOutcome {
            record: RunRecord {
                id: Uuid::new_v4(),
                name: self.name,
                strategy: "segmented".to_string(),
                started_at,
                finished_at: Utc::now(),
                step_count: total_steps,
                windows,
                timings,
            },
            results: accumulated,
        })
    }
}

/// Attach the segment index and its global index range to a propagated
/// build or solve failure.
fn in_segment(error: Error, segment: usize, window_indices: &[usize]) -> Error {
    let context = format!(
        "segment {segment} (indices {}..={})",
        window_indices[0],
        window_indices[window_indices.len() - 1]
    );
    match error {
        Error::Config(msg) => Error::Config(format!("{context}: {msg}")),
        Error::Consistency(msg) => Error::Consistency(format!("{context}: {msg}")),
        Error::Infeasible(msg) => Error::Infeasible(format!("{context}: {msg}")),
        Error::Structural(msg) => Error::Structural(format!("{context}: {msg}")),
        other => other,
    }
}
