//! Calculation strategies.
//!
//! A calculation takes an [`EnergySystem`](crate::model::EnergySystem) and a
//! subset of its global time indices and produces one merged result tree
//! plus an immutable [`RunRecord`]. Three strategies exist:
//!
//! - [`full::FullCalculation`]: one model over the whole window.
//! - [`aggregated::AggregatedCalculation`]: one model over the whole
//!   window, with inputs compressed to representative periods.
//! - [`segmented::SegmentedCalculation`]: a sweep of overlapping windows
//!   with storage state carried forward.
//!
//! Each strategy's `solve` consumes the calculation instance, so a second
//! finalize/solve sequence on the same instance is impossible by
//! construction. Windows are solved strictly in index order; any build or
//! solve failure aborts the whole calculation.

pub mod aggregated;
pub mod full;
pub mod segmented;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::results::ResultNode;

pub use aggregated::{AggregatedCalculation, AggregationParams};
pub use full::FullCalculation;
pub use segmented::SegmentedCalculation;

/// Accumulated wall-clock durations of one calculation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub aggregation: Duration,
    pub modeling: Duration,
    pub solving: Duration,
}

/// One window of a finished calculation, in global index terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub label: String,
    /// First global index covered by the window.
    pub first_index: usize,
    /// Last global index covered by the window, inclusive.
    pub last_index: usize,
    /// Leading steps of the window retained in the merged result.
    pub steps_kept: usize,
    pub objective: Option<f64>,
}

/// Immutable metadata of one finished calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub name: String,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Total number of timesteps in the merged result.
    pub step_count: usize,
    pub windows: Vec<WindowBounds>,
    pub timings: Timings,
}

/// Merged results and run metadata of one finished calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationOutcome {
    pub record: RunRecord,
    pub results: ResultNode,
}

impl CalculationOutcome {
    /// Sum of the per-window objectives, if every window reported one.
    pub fn total_objective(&self) -> Option<f64> {
        self.record
            .windows
            .iter()
            .map(|w| w.objective)
            .sum::<Option<f64>>()
    }
}

/// Resolve the requested index subset, defaulting to the full horizon.
fn resolve_indices(timeline_len: usize, requested: Option<Vec<usize>>) -> Vec<usize> {
    requested.unwrap_or_else(|| (0..timeline_len).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_indices_defaults_to_all() {
        assert_eq!(resolve_indices(4, None), vec![0, 1, 2, 3]);
        assert_eq!(resolve_indices(4, Some(vec![1, 2])), vec![1, 2]);
    }

    #[test]
    fn test_total_objective_requires_all_windows() {
        let mut outcome = CalculationOutcome {
            record: RunRecord {
                id: Uuid::new_v4(),
                name: "t".into(),
                strategy: "segmented".into(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                step_count: 2,
                windows: vec![
                    WindowBounds {
                        label: "t_seg0".into(),
                        first_index: 0,
                        last_index: 0,
                        steps_kept: 1,
                        objective: Some(1.5),
                    },
                    WindowBounds {
                        label: "t_seg1".into(),
                        first_index: 1,
                        last_index: 1,
                        steps_kept: 1,
                        objective: Some(2.5),
                    },
                ],
                timings: Timings::default(),
            },
            results: ResultNode::group(),
        };
        assert_eq!(outcome.total_objective(), Some(4.0));
        outcome.record.windows[1].objective = None;
        assert_eq!(outcome.total_objective(), None);
    }
}
