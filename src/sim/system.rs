use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregation::{SeriesColumn, SeriesId, SeriesTable};
use crate::carry::VariableId;
use crate::error::{Error, Result};
use crate::model::{
    EnergySystem, ModelRequest, SolveOptions, SolveStats, VariableCatalog, VariableMeta,
    WindowModel,
};
use crate::results::ResultNode;
use crate::timegrid::Timeline;

const POWER_EPSILON_KW: f64 = 1e-9;

/// Storage parameters of the simulated system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageSpec {
    pub capacity_kwh: f64,
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    /// Charge level at the very start of the horizon.
    pub initial_charge_kwh: f64,
    /// Charging efficiency; discharge is lossless.
    pub charge_efficiency: f64,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            capacity_kwh: 10.0,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            initial_charge_kwh: 0.0,
            charge_efficiency: 1.0,
        }
    }
}

/// A source + sink + optional storage system behind a priced grid
/// connection. Input series are per global timestep (kW, price per kWh).
#[derive(Debug, Clone)]
pub struct SimSystem {
    timeline: Timeline,
    demand_kw: Vec<f64>,
    generation_kw: Vec<f64>,
    price_per_kwh: Vec<f64>,
    storage: Option<StorageSpec>,
    grid_import_limit_kw: Option<f64>,
    sizing_enabled: bool,
    finalized: bool,
}

impl SimSystem {
    pub fn new(
        timeline: Timeline,
        demand_kw: Vec<f64>,
        generation_kw: Vec<f64>,
        price_per_kwh: Vec<f64>,
    ) -> Self {
        Self {
            timeline,
            demand_kw,
            generation_kw,
            price_per_kwh,
            storage: None,
            grid_import_limit_kw: None,
            sizing_enabled: false,
            finalized: false,
        }
    }

    pub fn with_storage(mut self, storage: StorageSpec) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_import_limit(mut self, limit_kw: f64) -> Self {
        self.grid_import_limit_kw = Some(limit_kw);
        self
    }

    /// Mark the storage capacity as an open sizing decision. Only used to
    /// exercise the segmented strategy's investment precondition.
    pub fn with_sizing(mut self) -> Self {
        self.sizing_enabled = true;
        self
    }

    pub fn demand_id() -> SeriesId {
        SeriesId::new("Sink.demand")
    }

    pub fn generation_id() -> SeriesId {
        SeriesId::new("Source.generation")
    }

    pub fn price_id() -> SeriesId {
        SeriesId::new("Grid.price")
    }

    pub fn charge_state_id() -> VariableId {
        VariableId::new("Storage.charge_state")
    }

    fn window_series(
        &self,
        base: &[f64],
        id: &SeriesId,
        request: &ModelRequest<'_>,
    ) -> Result<Vec<f64>> {
        if let Some(overrides) = request.overrides {
            if let Some(values) = overrides.get(id) {
                if values.len() != request.indices.len() {
                    return Err(Error::consistency(format!(
                        "override for '{id}' has {} samples, window has {}",
                        values.len(),
                        request.indices.len()
                    )));
                }
                return Ok(values.clone());
            }
        }
        Ok(request.indices.iter().map(|&i| base[i]).collect())
    }

    fn catalog(&self) -> Result<VariableCatalog> {
        let mut catalog = VariableCatalog::new();
        if self.storage.is_some() {
            catalog.register(VariableMeta {
                id: Self::charge_state_id(),
                path: vec!["Storage".into(), "charge_state".into()],
                end_inclusive: true,
                carries_state: true,
            })?;
            catalog.register(VariableMeta {
                id: VariableId::new("Storage.net_power"),
                path: vec!["Storage".into(), "net_power".into()],
                end_inclusive: false,
                carries_state: false,
            })?;
        }
        for (element, quantity) in [("Grid", "import"), ("Grid", "export"), ("Sink", "demand"), ("Source", "generation")] {
            catalog.register(VariableMeta {
                id: VariableId::new(format!("{element}.{quantity}")),
                path: vec![element.into(), quantity.into()],
                end_inclusive: false,
                carries_state: false,
            })?;
        }
        Ok(catalog)
    }
}

impl EnergySystem for SimSystem {
    type Model = DispatchModel;

    fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let steps = self.timeline.len();
        for (label, series) in [
            ("demand", &self.demand_kw),
            ("generation", &self.generation_kw),
            ("price", &self.price_per_kwh),
        ] {
            if series.len() != steps {
                return Err(Error::structural(format!(
                    "{label} series has {} samples, timeline has {steps} steps",
                    series.len()
                )));
            }
        }
        if let Some(storage) = &self.storage {
            if storage.initial_charge_kwh > storage.capacity_kwh {
                return Err(Error::structural(format!(
                    "initial charge of {} kWh exceeds storage capacity of {} kWh",
                    storage.initial_charge_kwh, storage.capacity_kwh
                )));
            }
        }
        self.finalized = true;
        Ok(())
    }

    fn investment_feature_count(&self) -> usize {
        usize::from(self.sizing_enabled)
    }

    fn series_table(&self, indices: &[usize]) -> SeriesTable {
        let mut table = SeriesTable::new();
        for (id, base) in [
            (Self::demand_id(), &self.demand_kw),
            (Self::generation_id(), &self.generation_kw),
            (Self::price_id(), &self.price_per_kwh),
        ] {
            table.push(SeriesColumn {
                id,
                values: indices.iter().map(|&i| base[i]).collect(),
                weight: 1.0,
            });
        }
        table
    }

    fn build_model(&mut self, request: ModelRequest<'_>) -> Result<Self::Model> {
        if !self.finalized {
            return Err(Error::consistency("build_model called before finalize"));
        }

        let initial_charge = match (&self.storage, request.carry) {
            (Some(storage), Some(carry)) => match carry.get(&Self::charge_state_id()) {
                Some(carried) => carried.value,
                None => storage.initial_charge_kwh,
            },
            (Some(storage), None) => storage.initial_charge_kwh,
            (None, _) => 0.0,
        };
        debug!(label = request.label, initial_charge, "building dispatch model");

        Ok(DispatchModel {
            label: request.label.to_string(),
            step_hours: request.grid.step_hours().to_vec(),
            demand_kw: self.window_series(&self.demand_kw, &Self::demand_id(), &request)?,
            generation_kw: self.window_series(
                &self.generation_kw,
                &Self::generation_id(),
                &request,
            )?,
            price_per_kwh: self.window_series(&self.price_per_kwh, &Self::price_id(), &request)?,
            storage: self.storage,
            initial_charge_kwh: initial_charge,
            grid_import_limit_kw: self.grid_import_limit_kw,
            catalog: self.catalog()?,
            results: ResultNode::group(),
        })
    }
}

/// Greedy merit-order dispatch of one window: generation covers demand
/// first, surplus charges the storage and spills to the grid, deficit
/// drains the storage before importing.
#[derive(Debug, Clone)]
pub struct DispatchModel {
    label: String,
    step_hours: Vec<f64>,
    demand_kw: Vec<f64>,
    generation_kw: Vec<f64>,
    price_per_kwh: Vec<f64>,
    storage: Option<StorageSpec>,
    initial_charge_kwh: f64,
    grid_import_limit_kw: Option<f64>,
    catalog: VariableCatalog,
    results: ResultNode,
}

impl WindowModel for DispatchModel {
    fn solve(&mut self, _options: &SolveOptions) -> Result<SolveStats> {
        let start = Instant::now();
        let steps = self.step_hours.len();

        let mut import_kw = Vec::with_capacity(steps);
        let mut export_kw = Vec::with_capacity(steps);
        let mut net_power_kw = Vec::with_capacity(steps);
        let mut charge_state = Vec::with_capacity(steps + 1);
        charge_state.push(self.initial_charge_kwh);

        let mut charge = self.initial_charge_kwh;
        let mut cost = 0.0;

        for t in 0..steps {
            let dt = self.step_hours[t];
            let direct = self.generation_kw[t].min(self.demand_kw[t]);
            let mut surplus = self.generation_kw[t] - direct;
            let mut deficit = self.demand_kw[t] - direct;

            let mut charge_power = 0.0;
            let mut discharge_power = 0.0;
            if let Some(storage) = &self.storage {
                if surplus > 0.0 {
                    let headroom_kw =
                        (storage.capacity_kwh - charge) / (dt * storage.charge_efficiency);
                    charge_power = surplus.min(storage.max_charge_kw).min(headroom_kw).max(0.0);
                    charge += charge_power * dt * storage.charge_efficiency;
                    surplus -= charge_power;
                } else if deficit > 0.0 {
                    let available_kw = charge / dt;
                    discharge_power =
                        deficit.min(storage.max_discharge_kw).min(available_kw).max(0.0);
                    charge -= discharge_power * dt;
                    deficit -= discharge_power;
                }
            }

            if let Some(limit) = self.grid_import_limit_kw {
                if deficit > limit + POWER_EPSILON_KW {
                    return Err(Error::infeasible(format!(
                        "step {t}: grid import of {deficit:.3} kW exceeds limit of {limit:.3} kW"
                    )));
                }
            }

            cost += deficit * dt * self.price_per_kwh[t];
            import_kw.push(deficit);
            export_kw.push(surplus);
            net_power_kw.push(charge_power - discharge_power);
            charge_state.push(charge);
        }

        let mut results = ResultNode::group();
        if self.storage.is_some() {
            results.insert(
                &["Storage".into(), "charge_state".into()],
                ResultNode::Leaf(charge_state),
            )?;
            results.insert(
                &["Storage".into(), "net_power".into()],
                ResultNode::Leaf(net_power_kw),
            )?;
        }
        results.insert(&["Grid".into(), "import".into()], ResultNode::Leaf(import_kw))?;
        results.insert(&["Grid".into(), "export".into()], ResultNode::Leaf(export_kw))?;
        results.insert(&["Grid".into(), "cost".into()], ResultNode::Scalar(cost))?;
        results.insert(&["Sink".into(), "demand".into()], ResultNode::Leaf(self.demand_kw.clone()))?;
        results.insert(
            &["Source".into(), "generation".into()],
            ResultNode::Leaf(self.generation_kw.clone()),
        )?;
        self.results = results;

        debug!(label = %self.label, cost, "dispatch solved");
        Ok(SolveStats {
            objective: Some(cost),
            solve_time: start.elapsed().max(Duration::from_nanos(1)),
        })
    }

    fn results(&self) -> &ResultNode {
        &self.results
    }

    fn catalog(&self) -> &VariableCatalog {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn timeline(steps: usize) -> Timeline {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Timeline::hourly(start, steps).unwrap()
    }

    fn solved(system: &mut SimSystem) -> DispatchModel {
        system.finalize().unwrap();
        let timeline = system.timeline().clone();
        let indices = timeline.all_indices();
        let grid = timeline.grid(&indices).unwrap();
        let mut model = system
            .build_model(ModelRequest {
                label: "test",
                grid: &grid,
                indices: &indices,
                carry: None,
                overrides: None,
                aggregation: None,
            })
            .unwrap();
        model.solve(&SolveOptions::default()).unwrap();
        model
    }

    #[test]
    fn test_surplus_charges_storage_before_export() {
        let mut system = SimSystem::new(
            timeline(2),
            vec![1.0, 1.0],
            vec![4.0, 4.0],
            vec![1.0, 1.0],
        )
        .with_storage(StorageSpec { capacity_kwh: 2.0, ..StorageSpec::default() });

        let model = solved(&mut system);
        let charge = model
            .results()
            .leaf_at(&["Storage".into(), "charge_state".into()])
            .unwrap();
        assert_eq!(charge, &vec![0.0, 2.0, 2.0]);
        let export = model.results().leaf_at(&["Grid".into(), "export".into()]).unwrap();
        // storage is full after the first step, second surplus is exported
        assert_eq!(export, &vec![1.0, 3.0]);
    }

    #[test]
    fn test_deficit_drains_storage_before_import() {
        let mut system = SimSystem::new(
            timeline(2),
            vec![3.0, 3.0],
            vec![0.0, 0.0],
            vec![2.0, 2.0],
        )
        .with_storage(StorageSpec {
            capacity_kwh: 10.0,
            initial_charge_kwh: 4.0,
            ..StorageSpec::default()
        });

        let model = solved(&mut system);
        let import = model.results().leaf_at(&["Grid".into(), "import".into()]).unwrap();
        // 4 kWh of storage cover the first step and a third of the second
        assert_eq!(import, &vec![0.0, 2.0]);
        let cost = model.results().get(&["Grid".into(), "cost".into()]).unwrap();
        assert_eq!(cost, &ResultNode::Scalar(4.0));
    }

    #[test]
    fn test_import_limit_is_infeasible() {
        let mut system = SimSystem::new(timeline(1), vec![9.0], vec![0.0], vec![1.0])
            .with_import_limit(5.0);
        system.finalize().unwrap();
        let timeline = system.timeline().clone();
        let indices = timeline.all_indices();
        let grid = timeline.grid(&indices).unwrap();
        let mut model = system
            .build_model(ModelRequest {
                label: "test",
                grid: &grid,
                indices: &indices,
                carry: None,
                overrides: None,
                aggregation: None,
            })
            .unwrap();
        let err = model.solve(&SolveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Infeasible(_)));
    }

    #[test]
    fn test_mismatched_series_is_structural_error() {
        let mut system = SimSystem::new(timeline(3), vec![1.0; 2], vec![0.0; 3], vec![1.0; 3]);
        let err = system.finalize().unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }
}
