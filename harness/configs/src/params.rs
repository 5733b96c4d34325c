use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TREE_CHOOSING_HEURISTIC: &str = "importance";
pub const DEFAULT_TREE_CONSTRUCTION_ALGORITHM: &str = "steiner";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("unrecognized comparison mode: {0}")]
    UnknownComparison(String),
    #[error("at least one run is required")]
    NoRuns,
}

/// Replaces the Ride arm with a control configuration for evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    #[default]
    None,
    Unicast,
    Oracle,
}

impl FromStr for ComparisonMode {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "unicast" => Ok(Self::Unicast),
            "oracle" => Ok(Self::Oracle),
            other => Err(ParamsError::UnknownComparison(other.to_owned())),
        }
    }
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Unicast => write!(f, "unicast"),
            Self::Oracle => write!(f, "oracle"),
        }
    }
}

/// Everything that parameterises a whole experiment (all trials).
///
/// Serialised verbatim into the results file so a run is self-describing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentParams {
    pub topology_file: PathBuf,
    pub output_file: PathBuf,
    pub nruns: usize,
    pub npublishers: usize,
    pub nsubscribers: usize,
    pub ntrees: usize,
    pub tree_construction_algorithm: String,
    pub tree_choosing_heuristic: String,
    pub comparison: ComparisonMode,
    pub max_alert_retries: Option<u32>,
    /// Probability that any given link or node fails in the quake.
    pub failure_rate: f64,
    /// Loss percentage applied to every emulated link.
    pub error_rate: f64,
    pub n_traffic_generators: usize,
    pub traffic_generator_bandwidth_mbps: f64,
    pub with_cloud: bool,
    pub with_ride_c: bool,
    pub with_ride_d: bool,
    pub show_cli: bool,
    pub choice_rand_seed: u64,
    pub failure_rand_seed: u64,
    pub debug_level: String,
}

impl ExperimentParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.nruns == 0 {
            return Err(ParamsError::NoRuns);
        }
        Ok(())
    }

    /// The unicast arm is selected explicitly or implied by `ntrees == 0`,
    /// which makes unicast directly comparable against any number of trees.
    #[must_use]
    pub fn use_unicast(&self) -> bool {
        self.comparison == ComparisonMode::Unicast || self.ntrees == 0
    }

    #[must_use]
    pub fn use_multicast(&self) -> bool {
        !self.use_unicast()
    }

    /// Heuristic label used in file names; a comparison mode replaces it so
    /// control runs are distinguishable at a glance.
    #[must_use]
    pub fn heuristic_label(&self) -> String {
        match self.comparison {
            ComparisonMode::None => self.tree_choosing_heuristic.clone(),
            other => other.to_string(),
        }
    }

    /// `results_<params>_<heuristic>.json`, mirroring the naming the
    /// downstream analysis expects.
    #[must_use]
    pub fn default_results_file_name(&self, dirname: &Path) -> PathBuf {
        let name = format!(
            "results_{}t_{}p_{}s_{:.2}f_{}_{}.json",
            self.ntrees,
            self.npublishers,
            self.nsubscribers,
            self.failure_rate,
            self.tree_construction_algorithm,
            self.heuristic_label(),
        );
        dirname.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ExperimentParams {
        ExperimentParams {
            topology_file: PathBuf::from("topos/campus.json"),
            output_file: PathBuf::from("results/out.json"),
            nruns: 1,
            npublishers: 5,
            nsubscribers: 5,
            ntrees: 2,
            tree_construction_algorithm: "steiner".to_owned(),
            tree_choosing_heuristic: "importance".to_owned(),
            comparison: ComparisonMode::None,
            max_alert_retries: None,
            failure_rate: 0.1,
            error_rate: 0.0,
            n_traffic_generators: 0,
            traffic_generator_bandwidth_mbps: 10.0,
            with_cloud: false,
            with_ride_c: false,
            with_ride_d: true,
            show_cli: false,
            choice_rand_seed: 1,
            failure_rand_seed: 2,
            debug_level: "error".to_owned(),
        }
    }

    #[test]
    fn comparison_mode_round_trips() {
        for raw in ["none", "unicast", "oracle"] {
            let mode: ComparisonMode = raw.parse().expect("known mode");
            assert_eq!(mode.to_string(), raw);
        }
        assert!("broadcast".parse::<ComparisonMode>().is_err());
    }

    #[test]
    fn ntrees_zero_implies_unicast() {
        let mut p = params();
        p.ntrees = 0;
        assert!(p.use_unicast());
        assert!(!p.use_multicast());
    }

    #[test]
    fn comparison_replaces_heuristic_in_file_name() {
        let mut p = params();
        p.comparison = ComparisonMode::Unicast;
        let name = p.default_results_file_name(Path::new("results"));
        assert!(
            name.to_string_lossy().ends_with("_unicast.json"),
            "got {name:?}"
        );
    }

    #[test]
    fn validate_rejects_zero_runs() {
        let mut p = params();
        p.nruns = 0;
        assert_eq!(p.validate(), Err(ParamsError::NoRuns));
    }
}
