//! Time axis handling.
//!
//! A [`Timeline`] is the global timestamp series of an energy system plus
//! one trailing horizon-end boundary. A [`TimeGrid`] is the time data of a
//! single calculation window: the selected timestamps, the same sequence
//! with one trailing boundary stamp, the per-step durations in hours and
//! their sum.

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;

use crate::error::{Error, Result};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Global time axis of an energy system: `n` step-start timestamps plus the
/// end boundary of the last step. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    stamps_with_end: Vec<DateTime<Utc>>,
}

impl Timeline {
    /// Build a timeline from step-start timestamps and an explicit horizon
    /// end boundary.
    pub fn new(timestamps: Vec<DateTime<Utc>>, horizon_end: DateTime<Utc>) -> Result<Self> {
        if timestamps.is_empty() {
            return Err(Error::config("timeline must contain at least one timestamp"));
        }
        let mut stamps_with_end = timestamps;
        stamps_with_end.push(horizon_end);
        let timeline = Self { stamps_with_end };
        timeline.check_monotonic()?;
        Ok(timeline)
    }

    /// Build a timeline where the horizon end is derived from the duration
    /// of the very last step.
    pub fn with_last_step(timestamps: Vec<DateTime<Utc>>, last_step_hours: f64) -> Result<Self> {
        if last_step_hours <= 0.0 {
            return Err(Error::config(format!(
                "last step duration must be positive, got {last_step_hours} h"
            )));
        }
        let last = *timestamps
            .last()
            .ok_or_else(|| Error::config("timeline must contain at least one timestamp"))?;
        let end = last + Duration::seconds((last_step_hours * SECONDS_PER_HOUR).round() as i64);
        Self::new(timestamps, end)
    }

    /// Hourly timeline starting at `start` with `steps` steps.
    pub fn hourly(start: DateTime<Utc>, steps: usize) -> Result<Self> {
        let timestamps = (0..steps as i64).map(|i| start + Duration::hours(i)).collect();
        Self::with_last_step(timestamps, 1.0)
    }

    fn check_monotonic(&self) -> Result<()> {
        for (a, b) in self.stamps_with_end.iter().tuple_windows() {
            if b <= a {
                return Err(Error::config(format!(
                    "timestamps must be strictly increasing, found {a} followed by {b}"
                )));
            }
        }
        Ok(())
    }

    /// Number of steps in the full horizon.
    pub fn len(&self) -> usize {
        self.stamps_with_end.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        false // construction guarantees at least one step
    }

    /// Step-start timestamps (without the horizon end).
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.stamps_with_end[..self.stamps_with_end.len() - 1]
    }

    /// End boundary of step `index`. For the last step this is the horizon
    /// end; for every other step it is the next global timestamp, which is
    /// what lets windows be stitched without drift in elapsed time.
    pub fn end_boundary(&self, index: usize) -> Option<DateTime<Utc>> {
        self.stamps_with_end.get(index + 1).copied()
    }

    /// All indices of the horizon, the default window of a calculation.
    pub fn all_indices(&self) -> Vec<usize> {
        (0..self.len()).collect()
    }

    /// Derive the time data of one window.
    pub fn grid(&self, indices: &[usize]) -> Result<TimeGrid> {
        TimeGrid::from_timeline(self, indices)
    }
}

/// Time data of one calculation window. Pure function of the timeline and
/// the selected indices; immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    timestamps_with_end: Vec<DateTime<Utc>>,
    step_hours: Vec<f64>,
    total_hours: f64,
}

impl TimeGrid {
    /// Select `indices` (strictly increasing, not necessarily contiguous)
    /// out of the timeline. The trailing boundary stamp is the *global*
    /// successor of the last selected index.
    pub fn from_timeline(timeline: &Timeline, indices: &[usize]) -> Result<Self> {
        let last = match indices.last() {
            Some(&last) => last,
            None => return Err(Error::config("window must select at least one timestep")),
        };
        if last >= timeline.len() {
            return Err(Error::config(format!(
                "window index {last} out of range for timeline of {} steps",
                timeline.len()
            )));
        }

        let mut timestamps_with_end = Vec::with_capacity(indices.len() + 1);
        let mut previous: Option<usize> = None;
        for &index in indices {
            if let Some(prev) = previous {
                if index <= prev {
                    return Err(Error::config(format!(
                        "window indices must be strictly increasing, found {prev} followed by {index}"
                    )));
                }
            }
            timestamps_with_end.push(timeline.timestamps()[index]);
            previous = Some(index);
        }
        // end_boundary is always present: last < timeline.len() was checked.
        timestamps_with_end.push(
            timeline
                .end_boundary(last)
                .ok_or_else(|| Error::consistency("timeline missing end boundary"))?,
        );

        let step_hours: Vec<f64> = timestamps_with_end
            .iter()
            .tuple_windows()
            .map(|(a, b)| (*b - *a).num_seconds() as f64 / SECONDS_PER_HOUR)
            .collect();
        if let Some(bad) = step_hours.iter().find(|&&dt| dt <= 0.0) {
            return Err(Error::config(format!("non-positive step duration of {bad} h")));
        }
        let total_hours = step_hours.iter().sum();

        Ok(Self { timestamps_with_end, step_hours, total_hours })
    }

    /// Number of steps in this window.
    pub fn len(&self) -> usize {
        self.step_hours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_hours.is_empty()
    }

    /// Step-start timestamps of the window.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps_with_end[..self.timestamps_with_end.len() - 1]
    }

    /// Window timestamps including the trailing boundary stamp.
    pub fn timestamps_with_end(&self) -> &[DateTime<Utc>] {
        &self.timestamps_with_end
    }

    /// The trailing boundary stamp of the window.
    pub fn end_boundary(&self) -> DateTime<Utc> {
        *self.timestamps_with_end.last().unwrap()
    }

    /// Per-step durations in hours.
    pub fn step_hours(&self) -> &[f64] {
        &self.step_hours
    }

    /// Sum of all step durations in hours.
    pub fn total_hours(&self) -> f64 {
        self.total_hours
    }

    /// The single step width, if all steps agree. Required by aggregation.
    pub fn require_equidistant(&self) -> Result<f64> {
        let min = self.step_hours.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = self.step_hours.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if max - min != 0.0 {
            return Err(Error::config(format!(
                "aggregation requires equidistant steps, found durations from {min} h to {max} h"
            )));
        }
        Ok(min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_hourly_timeline() {
        let timeline = Timeline::hourly(t0(), 24).unwrap();
        assert_eq!(timeline.len(), 24);
        assert_eq!(timeline.end_boundary(23), Some(t0() + Duration::hours(24)));
    }

    #[test]
    fn test_grid_of_full_horizon() {
        let timeline = Timeline::hourly(t0(), 10).unwrap();
        let grid = timeline.grid(&timeline.all_indices()).unwrap();
        assert_eq!(grid.len(), 10);
        assert_eq!(grid.step_hours(), &[1.0; 10]);
        assert_eq!(grid.total_hours(), 10.0);
        assert_eq!(grid.end_boundary(), t0() + Duration::hours(10));
    }

    #[test]
    fn test_inner_window_boundary_is_global_successor() {
        let timeline = Timeline::hourly(t0(), 10).unwrap();
        let grid = timeline.grid(&[2, 3, 4]).unwrap();
        // boundary of the window is the global timestamp at index 5,
        // not a synthetic stamp
        assert_eq!(grid.end_boundary(), t0() + Duration::hours(5));
        assert_eq!(grid.total_hours(), 3.0);
    }

    #[test]
    fn test_grid_is_pure() {
        let timeline = Timeline::hourly(t0(), 8).unwrap();
        let a = timeline.grid(&[1, 2, 3]).unwrap();
        let b = timeline.grid(&[1, 2, 3]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let stamps = vec![t0(), t0() + Duration::hours(2), t0() + Duration::hours(1)];
        assert!(matches!(Timeline::with_last_step(stamps, 1.0), Err(Error::Config(_))));
    }

    #[test]
    fn test_non_equidistant_rejected() {
        let stamps = vec![t0(), t0() + Duration::hours(1), t0() + Duration::hours(3)];
        let timeline = Timeline::with_last_step(stamps, 2.0).unwrap();
        let grid = timeline.grid(&[0, 1, 2]).unwrap();
        let err = grid.require_equidistant().unwrap_err();
        assert!(err.to_string().contains("equidistant"));
    }

    #[test]
    fn test_equidistant_accepted() {
        let timeline = Timeline::hourly(t0(), 6).unwrap();
        let grid = timeline.grid(&timeline.all_indices()).unwrap();
        assert_eq!(grid.require_equidistant().unwrap(), 1.0);
    }

    #[test]
    fn test_out_of_range_index() {
        let timeline = Timeline::hourly(t0(), 4).unwrap();
        assert!(timeline.grid(&[2, 3, 4]).is_err());
    }

    #[test]
    fn test_empty_window_rejected() {
        let timeline = Timeline::hourly(t0(), 4).unwrap();
        assert!(timeline.grid(&[]).is_err());
    }

    #[test]
    fn test_gapped_window_spans_gap() {
        let timeline = Timeline::hourly(t0(), 10).unwrap();
        let grid = timeline.grid(&[0, 1, 4]).unwrap();
        // step from index 1 to index 4 spans three hours
        assert_eq!(grid.step_hours(), &[1.0, 3.0, 1.0]);
    }
}
