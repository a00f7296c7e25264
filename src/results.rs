//! Result trees and segment merging.
//!
//! Solved window results are nested mappings from element labels to
//! quantity names to numeric sequences. [`ResultNode`] is that structure as
//! a tagged tree; [`ResultMerger`] appends per-window slices into one
//! cumulative tree, trimming the overlap steps and handling end-inclusive
//! series (one extra boundary sample, e.g. a storage charge level).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::VariableCatalog;

/// A node in a nested result tree.
///
/// Serializes untagged, so snapshots keep the plain nested-mapping shape
/// consumers of the persisted artifacts expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultNode {
    /// A single value, e.g. a total cost.
    Scalar(f64),
    /// One value per timestep (or one extra for end-inclusive series).
    Leaf(Vec<f64>),
    /// A compound element with named sub-results.
    Group(BTreeMap<String, ResultNode>),
}

impl ResultNode {
    /// An empty group node.
    pub fn group() -> Self {
        ResultNode::Group(BTreeMap::new())
    }

    pub fn get(&self, path: &[String]) -> Option<&ResultNode> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => match self {
                ResultNode::Group(map) => map.get(head)?.get(rest),
                _ => None,
            },
        }
    }

    /// The numeric sequence at `path`, if it is a leaf.
    pub fn leaf_at(&self, path: &[String]) -> Option<&Vec<f64>> {
        match self.get(path)? {
            ResultNode::Leaf(values) => Some(values),
            _ => None,
        }
    }

    /// Insert `node` at `path`, creating intermediate groups.
    pub fn insert(&mut self, path: &[String], node: ResultNode) -> Result<()> {
        let (head, rest) = path
            .split_first()
            .ok_or_else(|| Error::consistency("cannot insert at an empty result path"))?;
        let map = match self {
            ResultNode::Group(map) => map,
            _ => {
                return Err(Error::consistency(format!(
                    "result path segment '{head}' descends into a non-group node"
                )))
            }
        };
        if rest.is_empty() {
            map.insert(head.clone(), node);
            Ok(())
        } else {
            map.entry(head.clone())
                .or_insert_with(ResultNode::group)
                .insert(rest, node)
        }
    }
}

/// Appends per-window result slices into a cumulative tree.
///
/// The catalog decides, per leaf path, whether a series is end-inclusive:
/// those retain `steps_kept + 1` entries on the first window and drop the
/// duplicated first entry (equal to the previous window's retained last
/// entry) on every later window. Regular leaves retain exactly
/// `steps_kept`; scalar leaves are promoted to single-element sequences.
pub struct ResultMerger<'a> {
    catalog: &'a VariableCatalog,
}

impl<'a> ResultMerger<'a> {
    pub fn new(catalog: &'a VariableCatalog) -> Self {
        Self { catalog }
    }

    /// Append one window's trimmed results onto `accumulator`.
    pub fn append(
        &self,
        accumulator: &mut ResultNode,
        window_result: &ResultNode,
        steps_kept: usize,
        first_window: bool,
    ) -> Result<()> {
        let mut path = Vec::new();
        self.append_node(accumulator, window_result, &mut path, steps_kept, first_window)
    }

    fn append_node(
        &self,
        acc: &mut ResultNode,
        window: &ResultNode,
        path: &mut Vec<String>,
        steps_kept: usize,
        first: bool,
    ) -> Result<()> {
        match window {
            ResultNode::Group(children) => {
                let acc_map = match acc {
                    ResultNode::Group(map) => map,
                    _ => {
                        return Err(Error::consistency(format!(
                            "window result has a group at '{}' where the accumulator holds values",
                            path.join(".")
                        )))
                    }
                };
                for (key, child) in children {
                    path.push(key.clone());
                    if !first && !acc_map.contains_key(key) {
                        return Err(Error::consistency(format!(
                            "window result introduces '{}' absent from earlier windows",
                            path.join(".")
                        )));
                    }
                    let slot = acc_map
                        .entry(key.clone())
                        .or_insert_with(|| empty_like(child));
                    self.append_node(slot, child, path, steps_kept, first)?;
                    path.pop();
                }
                Ok(())
            }
            ResultNode::Leaf(values) => {
                let slice = self.trim(values, path, steps_kept, first)?;
                push_values(acc, slice, path)
            }
            // one value per window, promoted to a single-element sequence
            ResultNode::Scalar(value) => push_values(acc, vec![*value], path),
        }
    }

    fn trim(
        &self,
        values: &[f64],
        path: &[String],
        steps_kept: usize,
        first: bool,
    ) -> Result<Vec<f64>> {
        let end_inclusive = self
            .catalog
            .lookup(path)
            .map(|meta| meta.end_inclusive)
            .unwrap_or(false);
        let (from, to) = if end_inclusive {
            (usize::from(!first), steps_kept + 1)
        } else {
            (0, steps_kept)
        };
        if values.len() < to {
            return Err(Error::consistency(format!(
                "leaf '{}' has {} samples but {to} are needed to keep {steps_kept} steps",
                path.join("."),
                values.len()
            )));
        }
        Ok(values[from..to].to_vec())
    }

    /// Check the core correctness property after the last window: every
    /// cataloged leaf covers the whole horizon exactly once.
    pub fn verify_lengths(&self, accumulator: &ResultNode, total_kept: usize) -> Result<()> {
        for meta in self.catalog.iter() {
            let leaf = accumulator.leaf_at(&meta.path).ok_or_else(|| {
                Error::consistency(format!(
                    "merged result is missing variable '{}' at {}",
                    meta.id,
                    meta.path.join(".")
                ))
            })?;
            let expected = total_kept + usize::from(meta.end_inclusive);
            if leaf.len() != expected {
                return Err(Error::consistency(format!(
                    "merged leaf '{}' has {} samples, expected {expected}",
                    meta.path.join("."),
                    leaf.len()
                )));
            }
        }
        Ok(())
    }
}

fn empty_like(node: &ResultNode) -> ResultNode {
    match node {
        ResultNode::Group(_) => ResultNode::group(),
        _ => ResultNode::Leaf(Vec::new()),
    }
}

fn push_values(acc: &mut ResultNode, mut slice: Vec<f64>, path: &[String]) -> Result<()> {
    match acc {
        ResultNode::Leaf(existing) => {
            existing.append(&mut slice);
            Ok(())
        }
        _ => Err(Error::consistency(format!(
            "window result has values at '{}' where the accumulator holds a group",
            path.join(".")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carry::VariableId;
    use crate::model::VariableMeta;

    fn catalog_with_charge_state() -> VariableCatalog {
        let mut catalog = VariableCatalog::new();
        catalog
            .register(VariableMeta {
                id: VariableId::new("storage.charge_state"),
                path: vec!["Storage".into(), "charge_state".into()],
                end_inclusive: true,
                carries_state: true,
            })
            .unwrap();
        catalog
            .register(VariableMeta {
                id: VariableId::new("grid.import"),
                path: vec!["Grid".into(), "import".into()],
                end_inclusive: false,
                carries_state: false,
            })
            .unwrap();
        catalog
    }

    fn window(charge: Vec<f64>, import: Vec<f64>) -> ResultNode {
        let mut node = ResultNode::group();
        node.insert(&["Storage".into(), "charge_state".into()], ResultNode::Leaf(charge))
            .unwrap();
        node.insert(&["Grid".into(), "import".into()], ResultNode::Leaf(import))
            .unwrap();
        node
    }

    #[test]
    fn test_first_window_keeps_initial_boundary_value() {
        let catalog = catalog_with_charge_state();
        let merger = ResultMerger::new(&catalog);
        let mut acc = ResultNode::group();

        merger
            .append(&mut acc, &window(vec![5.0, 4.0, 3.0, 2.0, 1.0], vec![1.0; 4]), 3, true)
            .unwrap();

        let charge = acc.leaf_at(&["Storage".into(), "charge_state".into()]).unwrap();
        assert_eq!(charge, &vec![5.0, 4.0, 3.0, 2.0]);
        let import = acc.leaf_at(&["Grid".into(), "import".into()]).unwrap();
        assert_eq!(import.len(), 3);
    }

    #[test]
    fn test_later_windows_drop_duplicated_boundary_value() {
        let catalog = catalog_with_charge_state();
        let merger = ResultMerger::new(&catalog);
        let mut acc = ResultNode::group();

        merger
            .append(&mut acc, &window(vec![5.0, 4.0, 3.0, 2.0, 1.0], vec![1.0; 4]), 3, true)
            .unwrap();
        merger
            .append(&mut acc, &window(vec![2.0, 6.0, 7.0, 8.0, 9.0], vec![2.0; 4]), 3, false)
            .unwrap();

        let charge = acc.leaf_at(&["Storage".into(), "charge_state".into()]).unwrap();
        // first entry of window 2 (2.0) is the duplicate of window 1's last
        assert_eq!(charge, &vec![5.0, 4.0, 3.0, 2.0, 6.0, 7.0, 8.0]);
        merger.verify_lengths(&acc, 6).unwrap();
    }

    #[test]
    fn test_scenario_ten_steps_segment_four_kept_three() {
        let catalog = catalog_with_charge_state();
        let merger = ResultMerger::new(&catalog);
        let mut acc = ResultNode::group();

        // windows of 4, 4, 4 and 1 steps; kept 3, 3, 3, 1
        let kept = [3usize, 3, 3, 1];
        let lens = [4usize, 4, 4, 1];
        for (i, (&k, &n)) in kept.iter().zip(&lens).enumerate() {
            let w = window(vec![0.0; n + 1], vec![0.0; n]);
            merger.append(&mut acc, &w, k, i == 0).unwrap();
        }

        assert_eq!(acc.leaf_at(&["Grid".into(), "import".into()]).unwrap().len(), 10);
        assert_eq!(
            acc.leaf_at(&["Storage".into(), "charge_state".into()]).unwrap().len(),
            11
        );
        merger.verify_lengths(&acc, 10).unwrap();
    }

    #[test]
    fn test_scalar_promoted_to_single_element_sequence() {
        let catalog = VariableCatalog::new();
        let merger = ResultMerger::new(&catalog);
        let mut acc = ResultNode::group();

        let mut w = ResultNode::group();
        w.insert(&["Grid".into(), "cost".into()], ResultNode::Scalar(12.5)).unwrap();
        merger.append(&mut acc, &w, 3, true).unwrap();

        let mut w = ResultNode::group();
        w.insert(&["Grid".into(), "cost".into()], ResultNode::Scalar(7.5)).unwrap();
        merger.append(&mut acc, &w, 3, false).unwrap();

        assert_eq!(acc.leaf_at(&["Grid".into(), "cost".into()]).unwrap(), &vec![12.5, 7.5]);
    }

    #[test]
    fn test_short_leaf_is_consistency_error() {
        let catalog = catalog_with_charge_state();
        let merger = ResultMerger::new(&catalog);
        let mut acc = ResultNode::group();
        let err = merger
            .append(&mut acc, &window(vec![1.0, 2.0], vec![1.0; 4]), 3, true)
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn test_new_key_in_later_window_is_consistency_error() {
        let catalog = catalog_with_charge_state();
        let merger = ResultMerger::new(&catalog);
        let mut acc = ResultNode::group();
        merger
            .append(&mut acc, &window(vec![0.0; 5], vec![0.0; 4]), 3, true)
            .unwrap();

        let mut w = window(vec![0.0; 5], vec![0.0; 4]);
        w.insert(&["Boiler".into(), "heat".into()], ResultNode::Leaf(vec![0.0; 4]))
            .unwrap();
        let err = merger.append(&mut acc, &w, 3, false).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn test_untagged_serialization_keeps_nested_mapping_shape() {
        let node = window(vec![1.0, 2.0], vec![3.0]);
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(
            json,
            r#"{"Grid":{"import":[3.0]},"Storage":{"charge_state":[1.0,2.0]}}"#
        );
        let back: ResultNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
