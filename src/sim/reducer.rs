use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::aggregation::{PeriodReducer, Reduction, ReductionRequest, SeriesId};
use crate::error::{Error, Result};

/// Simple stand-in for an external clustering service.
///
/// Representatives are the periods containing pinned extremes (when
/// requested), padded with the leading periods of the window; every other
/// period is assigned to the representative with the smallest weighted
/// squared distance. With one period spanning the whole window this
/// reproduces the original series exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestPeriodReducer;

impl NearestPeriodReducer {
    fn extreme_period(
        request: &ReductionRequest<'_>,
        id: &SeriesId,
        steps_per_period: usize,
        maximum: bool,
    ) -> Result<usize> {
        let column = request.table.get(id).ok_or_else(|| {
            Error::config(format!("pinned series '{id}' is not part of the series table"))
        })?;
        let iter = column.values.iter().copied().map(OrderedFloat).enumerate();
        let index = if maximum {
            iter.max_by_key(|&(_, v)| v)
        } else {
            iter.min_by_key(|&(_, v)| v)
        };
        let (index, _) = index
            .ok_or_else(|| Error::consistency(format!("pinned series '{id}' is empty")))?;
        Ok(index / steps_per_period)
    }
}

impl PeriodReducer for NearestPeriodReducer {
    fn reduce(&self, request: ReductionRequest<'_>) -> Result<Reduction> {
        let steps_per_period = request.steps_per_period()?;
        let window_len = match request.table.columns().first() {
            Some(column) => column.values.len(),
            None => return Err(Error::config("cannot reduce an empty series table")),
        };
        for column in request.table.columns() {
            if column.values.len() != window_len {
                return Err(Error::consistency(format!(
                    "series '{}' has {} samples, expected {window_len}",
                    column.id,
                    column.values.len()
                )));
            }
        }
        if window_len % steps_per_period != 0 {
            return Err(Error::config(format!(
                "window of {window_len} steps does not divide into periods of {steps_per_period} steps"
            )));
        }
        let period_count = window_len / steps_per_period;

        // representatives: pinned extreme periods first, then leading periods
        let mut representatives: Vec<usize> = Vec::new();
        if request.use_extreme_periods {
            for id in request.pinned_max {
                let period = Self::extreme_period(&request, id, steps_per_period, true)?;
                if !representatives.contains(&period) {
                    representatives.push(period);
                }
            }
            for id in request.pinned_min {
                let period = Self::extreme_period(&request, id, steps_per_period, false)?;
                if !representatives.contains(&period) {
                    representatives.push(period);
                }
            }
        }
        // pinned extremes survive even past the requested period count
        let target = request
            .nr_of_typical_periods
            .min(period_count)
            .max(representatives.len());
        for period in 0..period_count {
            if representatives.len() >= target {
                break;
            }
            if !representatives.contains(&period) {
                representatives.push(period);
            }
        }

        let distance = |a: usize, b: usize| -> f64 {
            request
                .table
                .columns()
                .iter()
                .map(|column| {
                    let pa = &column.values[a * steps_per_period..(a + 1) * steps_per_period];
                    let pb = &column.values[b * steps_per_period..(b + 1) * steps_per_period];
                    column.weight
                        * pa.iter()
                            .zip(pb)
                            .map(|(x, y)| (x - y) * (x - y))
                            .sum::<f64>()
                })
                .sum()
        };

        let mut cluster_order = Vec::with_capacity(period_count);
        let mut index_vectors_of_clusters = vec![Vec::new(); representatives.len()];
        for period in 0..period_count {
            let (cluster, _) = representatives
                .iter()
                .enumerate()
                .min_by_key(|&(_, &rep)| OrderedFloat(distance(period, rep)))
                .ok_or_else(|| Error::consistency("no representative periods selected"))?;
            cluster_order.push(cluster);
            index_vectors_of_clusters[cluster]
                .extend(period * steps_per_period..(period + 1) * steps_per_period);
        }

        let mut reconstructed: BTreeMap<SeriesId, Vec<f64>> = BTreeMap::new();
        for column in request.table.columns() {
            let mut values = Vec::with_capacity(window_len);
            for &cluster in &cluster_order {
                let rep = representatives[cluster];
                values.extend_from_slice(
                    &column.values[rep * steps_per_period..(rep + 1) * steps_per_period],
                );
            }
            reconstructed.insert(column.id.clone(), values);
        }

        debug!(
            periods = period_count,
            representatives = representatives.len(),
            "series table reduced"
        );
        Ok(Reduction { cluster_order, index_vectors_of_clusters, reconstructed })
    }
}
