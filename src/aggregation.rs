//! Representative-period reduction boundary.
//!
//! The aggregated strategy flattens all array-valued input series into a
//! [`SeriesTable`] and hands it to a [`PeriodReducer`], a black-box
//! clustering service. The reducer returns which representative period
//! stands in for each original period and the reconstructed per-series
//! values; the strategy turns those into override series and an
//! [`AggregationPlan`] for the model build.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stable identifier of an input time series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(Arc<str>);

impl SeriesId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One array-valued input series over the calculation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesColumn {
    pub id: SeriesId,
    pub values: Vec<f64>,
    /// Clustering weight of the series, 1.0 by default.
    pub weight: f64,
}

/// The flattened table of all array-valued series in the component graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesTable {
    columns: Vec<SeriesColumn>,
}

impl SeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: SeriesColumn) {
        self.columns.push(column);
    }

    pub fn columns(&self) -> &[SeriesColumn] {
        &self.columns
    }

    pub fn get(&self, id: &SeriesId) -> Option<&SeriesColumn> {
        self.columns.iter().find(|c| &c.id == id)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Input contract of a period reducer.
#[derive(Debug)]
pub struct ReductionRequest<'a> {
    pub table: &'a SeriesTable,
    pub hours_per_step: f64,
    pub hours_per_period: f64,
    pub nr_of_typical_periods: usize,
    /// Explicitly keep the periods containing series extremes.
    pub use_extreme_periods: bool,
    /// Series whose maximum-extreme period must survive clustering.
    pub pinned_max: &'a [SeriesId],
    /// Series whose minimum-extreme period must survive clustering.
    pub pinned_min: &'a [SeriesId],
}

impl ReductionRequest<'_> {
    /// Number of steps per period; must divide the window evenly.
    pub fn steps_per_period(&self) -> Result<usize> {
        let ratio = self.hours_per_period / self.hours_per_step;
        if ratio.fract() != 0.0 || ratio < 1.0 {
            return Err(Error::config(format!(
                "period length of {} h is not a multiple of the step width of {} h",
                self.hours_per_period, self.hours_per_step
            )));
        }
        Ok(ratio as usize)
    }
}

/// Output of a period reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reduction {
    /// For each original period, the representative period standing in
    /// for it.
    pub cluster_order: Vec<usize>,
    /// For each representative period, the original time indices (local to
    /// the window) mapped onto it.
    pub index_vectors_of_clusters: Vec<Vec<usize>>,
    /// Reconstructed (decompressed) values per series, window length.
    pub reconstructed: BTreeMap<SeriesId, Vec<f64>>,
}

/// Black-box clustering service picking representative periods.
pub trait PeriodReducer {
    fn reduce(&self, request: ReductionRequest<'_>) -> Result<Reduction>;
}

/// Representative-period coupling passed explicitly to the model build.
///
/// How on/off decisions are equalized across equivalent periods belongs to
/// the external equation layer; this plan only carries the assignment and
/// the knobs controlling it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationPlan {
    pub cluster_order: Vec<usize>,
    pub index_vectors_of_clusters: Vec<Vec<usize>>,
    /// Only couple discrete on/off decisions; continuous series keep their
    /// original values and no override series are supplied.
    pub fix_binary_vars_only: bool,
    /// Also pin storage charge/discharge flows to the aggregated values.
    /// Mathematically redundant when all other flows are fixed.
    pub fix_storage_flows: bool,
    /// Share of coupled values (0..=100) the solver may deviate from the
    /// period coupling.
    pub period_freedom_percent: f64,
    /// Cost charged per freed variable.
    pub cost_per_free_variable: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SeriesTable {
        let mut t = SeriesTable::new();
        t.push(SeriesColumn {
            id: SeriesId::new("Heat.demand"),
            values: vec![1.0; 8],
            weight: 1.0,
        });
        t
    }

    #[test]
    fn test_steps_per_period() {
        let t = table();
        let request = ReductionRequest {
            table: &t,
            hours_per_step: 1.0,
            hours_per_period: 4.0,
            nr_of_typical_periods: 2,
            use_extreme_periods: false,
            pinned_max: &[],
            pinned_min: &[],
        };
        assert_eq!(request.steps_per_period().unwrap(), 4);
    }

    #[test]
    fn test_fractional_period_rejected() {
        let t = table();
        let request = ReductionRequest {
            table: &t,
            hours_per_step: 1.0,
            hours_per_period: 2.5,
            nr_of_typical_periods: 2,
            use_extreme_periods: false,
            pinned_max: &[],
            pinned_min: &[],
        };
        assert!(matches!(request.steps_per_period(), Err(Error::Config(_))));
    }
}
