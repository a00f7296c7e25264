//! Carry-over state between calculation windows.
//!
//! When a horizon is solved in overlapping segments, state-carrying
//! quantities (currently: storage charge levels) must start each window at
//! the value they reached at the last kept step of the previous window.
//! [`CarryState`] is that snapshot: a map from stable variable identifiers
//! to the carried scalar and the timestamp it corresponds to.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::VariableCatalog;
use crate::results::ResultNode;

/// Stable identifier of a state-carrying variable, minted once at graph
/// construction time. Keys carry-over maps across window boundaries so
/// that derived label strings can never collide silently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(Arc<str>);

impl VariableId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One carried scalar and the boundary timestamp it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarriedValue {
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// End-of-window snapshot of all state-carrying variables, consumed once
/// by the next window's model build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarryState {
    values: BTreeMap<VariableId, CarriedValue>,
}

impl CarryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one carried value. Each id may be set at most once per
    /// snapshot; a duplicate means two variables collapsed to the same id.
    pub fn insert(&mut self, id: VariableId, value: f64, at: DateTime<Utc>) -> Result<()> {
        if self.values.contains_key(&id) {
            return Err(Error::consistency(format!(
                "carry value for '{id}' already set, two variables share one id"
            )));
        }
        self.values.insert(id, CarriedValue { value, at });
        Ok(())
    }

    pub fn get(&self, id: &VariableId) -> Option<CarriedValue> {
        self.values.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariableId, &CarriedValue)> {
        self.values.iter()
    }

    /// Extract the carry-over snapshot from a solved window.
    ///
    /// `offset` is the zero-based index of the last kept step in the
    /// producing window's own index space. Regular state series are read at
    /// `offset`; end-inclusive series (one extra boundary sample) are read
    /// at `offset + 1`, which is the boundary value that starts the next
    /// window. `at` is the timestamp of that boundary.
    pub fn extract(
        catalog: &VariableCatalog,
        results: &ResultNode,
        offset: usize,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut carry = CarryState::new();
        for meta in catalog.iter().filter(|m| m.carries_state) {
            let leaf = results.leaf_at(&meta.path).ok_or_else(|| {
                Error::consistency(format!(
                    "state-carrying variable '{}' missing from results at {}",
                    meta.id,
                    meta.path.join(".")
                ))
            })?;
            let index = if meta.end_inclusive { offset + 1 } else { offset };
            let value = *leaf.get(index).ok_or_else(|| {
                Error::consistency(format!(
                    "state-carrying variable '{}' has {} samples, carry offset {index} out of range",
                    meta.id,
                    leaf.len()
                ))
            })?;
            carry.insert(meta.id.clone(), value, at)?;
        }
        Ok(carry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VariableMeta;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()
    }

    #[test]
    fn test_variable_id_serializes_as_plain_string() {
        let id = VariableId::new("Storage.charge_state");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""Storage.charge_state""#);
        let back: VariableId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut carry = CarryState::new();
        let id = VariableId::new("storage.charge_state");
        carry.insert(id.clone(), 4.2, at()).unwrap();
        let err = carry.insert(id, 1.0, at()).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn test_extract_reads_boundary_of_end_inclusive_series() {
        let mut catalog = VariableCatalog::new();
        catalog
            .register(VariableMeta {
                id: VariableId::new("storage.charge_state"),
                path: vec!["Storage".into(), "charge_state".into()],
                end_inclusive: true,
                carries_state: true,
            })
            .unwrap();

        let mut results = ResultNode::group();
        results
            .insert(
                &["Storage".into(), "charge_state".into()],
                ResultNode::Leaf(vec![0.0, 1.0, 2.0, 3.0, 4.0]),
            )
            .unwrap();

        // steps_kept = 3 -> offset 2, boundary value lives at index 3
        let carry = CarryState::extract(&catalog, &results, 2, at()).unwrap();
        let carried = carry.get(&VariableId::new("storage.charge_state")).unwrap();
        assert_eq!(carried.value, 3.0);
        assert_eq!(carried.at, at());
    }

    #[test]
    fn test_extract_out_of_range_is_consistency_error() {
        let mut catalog = VariableCatalog::new();
        catalog
            .register(VariableMeta {
                id: VariableId::new("storage.charge_state"),
                path: vec!["Storage".into(), "charge_state".into()],
                end_inclusive: true,
                carries_state: true,
            })
            .unwrap();

        let mut results = ResultNode::group();
        results
            .insert(
                &["Storage".into(), "charge_state".into()],
                ResultNode::Leaf(vec![0.0, 1.0]),
            )
            .unwrap();

        let err = CarryState::extract(&catalog, &results, 5, at()).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }
}
