//! Result snapshot artifacts.
//!
//! After a successful calculation the merged results and the run record
//! can be written as a pair of files: an opaque binary result snapshot and
//! a human-readable metadata sidecar. The schema here is owned by this
//! module, not by the calculation engine.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calculation::{CalculationOutcome, RunRecord};
use crate::error::Result;
use crate::results::ResultNode;

/// Locations of the files written by [`write_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    /// Bincode-encoded merged result tree.
    pub data: PathBuf,
    /// YAML-encoded [`RunRecord`].
    pub record: PathBuf,
}

/// Tagged mirror of [`ResultNode`] for the binary encoding. `ResultNode`
/// itself serializes untagged to keep the nested-mapping shape in
/// human-readable formats, which bincode cannot decode again.
#[derive(Serialize, Deserialize)]
enum SnapshotNode {
    Scalar(f64),
    Leaf(Vec<f64>),
    Group(BTreeMap<String, SnapshotNode>),
}

impl From<&ResultNode> for SnapshotNode {
    fn from(node: &ResultNode) -> Self {
        match node {
            ResultNode::Scalar(v) => SnapshotNode::Scalar(*v),
            ResultNode::Leaf(v) => SnapshotNode::Leaf(v.clone()),
            ResultNode::Group(map) => {
                SnapshotNode::Group(map.iter().map(|(k, v)| (k.clone(), v.into())).collect())
            }
        }
    }
}

impl From<SnapshotNode> for ResultNode {
    fn from(node: SnapshotNode) -> Self {
        match node {
            SnapshotNode::Scalar(v) => ResultNode::Scalar(v),
            SnapshotNode::Leaf(v) => ResultNode::Leaf(v),
            SnapshotNode::Group(map) => {
                ResultNode::Group(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Write `<stamp>_<name>_data.bin` and `<stamp>_<name>_run.yaml` into
/// `dir`, creating the directory if needed. The timestamp prefix keeps
/// repeated runs of the same calculation apart.
pub fn write_snapshot(dir: &Path, outcome: &CalculationOutcome) -> Result<SnapshotPaths> {
    fs::create_dir_all(dir)?;

    let stamp = Utc::now().format("%Y-%m-%d_%H%M%S");
    let stem = format!("{stamp}_{}", outcome.record.name.replace(' ', ""));

    let data = dir.join(format!("{stem}_data.bin"));
    fs::write(&data, bincode::serialize(&SnapshotNode::from(&outcome.results))?)?;

    let record = dir.join(format!("{stem}_run.yaml"));
    fs::write(&record, serde_yaml::to_string(&outcome.record)?)?;

    info!(
        name = %outcome.record.name,
        data = %data.display(),
        record = %record.display(),
        "calculation snapshot written"
    );
    Ok(SnapshotPaths { data, record })
}

/// Read back a snapshot pair written by [`write_snapshot`].
pub fn read_snapshot(paths: &SnapshotPaths) -> Result<CalculationOutcome> {
    let node: SnapshotNode = bincode::deserialize(&fs::read(&paths.data)?)?;
    let record: RunRecord = serde_yaml::from_str(&fs::read_to_string(&paths.record)?)?;
    Ok(CalculationOutcome { record, results: node.into() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::Timings;
    use uuid::Uuid;

    fn outcome() -> CalculationOutcome {
        let mut results = ResultNode::group();
        results
            .insert(&["Grid".into(), "import".into()], ResultNode::Leaf(vec![1.0, 2.0]))
            .unwrap();
        results
            .insert(&["Grid".into(), "cost".into()], ResultNode::Scalar(3.5))
            .unwrap();
        CalculationOutcome {
            record: RunRecord {
                id: Uuid::new_v4(),
                name: "snapshot test".into(),
                strategy: "full".into(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                step_count: 2,
                windows: Vec::new(),
                timings: Timings::default(),
            },
            results,
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = std::env::temp_dir().join(format!("enflow-test-{}", Uuid::new_v4()));
        let outcome = outcome();

        let paths = write_snapshot(&dir, &outcome).unwrap();
        assert!(paths
            .data
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("snapshottest"));

        let restored = read_snapshot(&paths).unwrap();
        assert_eq!(restored.results, outcome.results);
        assert_eq!(restored.record, outcome.record);

        fs::remove_dir_all(&dir).unwrap();
    }
}
