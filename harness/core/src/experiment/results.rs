//! Per-run result records and the oracle reachability computed post hoc.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet, VecDeque},
    fs, io,
    path::Path,
};

use serde::Serialize;
use thiserror::Error;

use super::schedule::RecordedChange;
use crate::topology::Topology;
use ride_harness_config::params::ExperimentParams;

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("failed to write results to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize results: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

/// Everything recorded about one trial. Paths are relative to the results
/// file's directory so the whole output tree can be moved as a unit.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunRecord {
    pub outputs_dir: String,
    pub logs_dir: Option<String>,
    pub quake_start_time: Option<f64>,
    pub data_path_changes: Vec<RecordedChange>,
    /// ip -> host name, as the clients identify themselves in logs.
    pub publishers: BTreeMap<String, String>,
    pub subscribers: BTreeMap<String, String>,
    pub failed_links: Vec<(String, String)>,
    pub failed_nodes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_edge_subs: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_edge_pubs: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_cloud_subs: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_cloud_pubs: Option<BTreeMap<String, bool>>,
}

#[derive(Debug, Serialize)]
pub struct ResultsFile<'a> {
    pub params: &'a ExperimentParams,
    pub runs: &'a [RunRecord],
}

pub fn write_results(path: &Path, results: &ResultsFile<'_>) -> Result<(), ResultsError> {
    let body = serde_json::to_string_pretty(results)
        .map_err(|source| ResultsError::Serialize { source })?;
    fs::write(path, body).map_err(|source| ResultsError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Whether each target can still reach `source` once the given nodes and
/// links are removed: the best any recovery scheme could possibly do.
#[must_use]
pub fn oracle_reachability(
    topo: &Topology,
    source: &str,
    targets: &[String],
    failed_nodes: &[String],
    failed_links: &[(String, String)],
    removed_nodes: &[String],
) -> BTreeMap<String, bool> {
    let dead_nodes: HashSet<&str> = failed_nodes
        .iter()
        .chain(removed_nodes)
        .map(String::as_str)
        .collect();
    let dead_links: HashSet<(&str, &str)> = failed_links
        .iter()
        .flat_map(|(a, b)| [(a.as_str(), b.as_str()), (b.as_str(), a.as_str())])
        .collect();

    let mut reachable = BTreeSet::new();
    if !dead_nodes.contains(source) && topo.contains(source) {
        let mut queue = VecDeque::from([source.to_owned()]);
        reachable.insert(source.to_owned());
        while let Some(node) = queue.pop_front() {
            for next in topo.neighbors(&node) {
                if dead_nodes.contains(next.as_str())
                    || dead_links.contains(&(node.as_str(), next.as_str()))
                    || reachable.contains(&next)
                {
                    continue;
                }
                reachable.insert(next.clone());
                queue.push_back(next);
            }
        }
    }

    targets
        .iter()
        .map(|t| (t.clone(), reachable.contains(t)))
        .collect()
}
