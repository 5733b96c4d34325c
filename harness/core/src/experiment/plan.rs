//! Per-trial randomized choices.
//!
//! Two independent seeded generators drive the plan: one for role choices
//! (publishers, subscribers, congestion generators), one for the failure
//! model. Re-running with the same seeds reproduces every trial exactly.

use rand::{Rng as _, SeedableRng as _, rngs::StdRng, seq::SliceRandom as _};

use crate::topology::{NodeKind, Topology};
use ride_harness_config::params::ExperimentParams;

/// Everything random about one trial, fixed before it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunPlan {
    pub publishers: Vec<String>,
    pub subscribers: Vec<String>,
    pub failed_links: Vec<(String, String)>,
    pub failed_nodes: Vec<String>,
    pub generators: Vec<String>,
}

pub struct RunPlanner {
    choice_rng: StdRng,
    failure_rng: StdRng,
}

impl RunPlanner {
    #[must_use]
    pub fn new(choice_seed: u64, failure_seed: u64) -> Self {
        Self {
            choice_rng: StdRng::seed_from_u64(choice_seed),
            failure_rng: StdRng::seed_from_u64(failure_seed),
        }
    }

    pub fn plan(&mut self, topo: &Topology, params: &ExperimentParams) -> RunPlan {
        let hosts = topo.hosts();

        let mut pick = |count: usize, rng: &mut StdRng| {
            let mut chosen: Vec<String> = hosts
                .choose_multiple(rng, count.min(hosts.len()))
                .cloned()
                .collect();
            chosen.sort();
            chosen
        };

        let publishers = pick(params.npublishers, &mut self.choice_rng);
        let subscribers = pick(params.nsubscribers, &mut self.choice_rng);
        let generators = pick(params.n_traffic_generators, &mut self.choice_rng);

        let rate = params.failure_rate.clamp(0.0, 1.0);
        let mut failed_links = Vec::new();
        for (a, b, _) in topo.links() {
            if self.exempt_from_quake(topo, &a) || self.exempt_from_quake(topo, &b) {
                continue;
            }
            if self.failure_rng.gen_bool(rate) {
                failed_links.push((a, b));
            }
        }

        // Only plain building switches fail as nodes; gateway failures are
        // the data-path schedule's job and the server/cloud must survive to
        // measure anything at all.
        let mut failed_nodes = Vec::new();
        for switch in topo.switches() {
            if topo.kind(&switch) != Some(NodeKind::Switch) {
                continue;
            }
            if self.failure_rng.gen_bool(rate) {
                failed_nodes.push(switch);
            }
        }

        RunPlan {
            publishers,
            subscribers,
            failed_links,
            failed_nodes,
            generators,
        }
    }

    fn exempt_from_quake(&self, topo: &Topology, name: &str) -> bool {
        matches!(
            topo.kind(name),
            Some(NodeKind::Server | NodeKind::Cloud | NodeKind::CloudGateway)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::testutil::campus;
    use ride_harness_config::params::ComparisonMode;
    use std::path::PathBuf;

    fn params() -> ExperimentParams {
        ExperimentParams {
            topology_file: PathBuf::new(),
            output_file: PathBuf::new(),
            nruns: 1,
            npublishers: 2,
            nsubscribers: 2,
            ntrees: 1,
            tree_construction_algorithm: "steiner".to_owned(),
            tree_choosing_heuristic: "importance".to_owned(),
            comparison: ComparisonMode::None,
            max_alert_retries: None,
            failure_rate: 0.5,
            error_rate: 0.0,
            n_traffic_generators: 1,
            traffic_generator_bandwidth_mbps: 10.0,
            with_cloud: true,
            with_ride_c: true,
            with_ride_d: true,
            show_cli: false,
            choice_rand_seed: 42,
            failure_rand_seed: 43,
            debug_level: "error".to_owned(),
        }
    }

    #[test]
    fn same_seeds_reproduce_the_same_plan() {
        let topo = campus();
        let params = params();
        let first = RunPlanner::new(42, 43).plan(&topo, &params);
        let second = RunPlanner::new(42, 43).plan(&topo, &params);
        assert_eq!(first, second);
    }

    #[test]
    fn quake_never_touches_server_cloud_or_gateways() {
        let topo = campus();
        let mut params = params();
        params.failure_rate = 1.0;
        let plan = RunPlanner::new(1, 2).plan(&topo, &params);

        for (a, b) in &plan.failed_links {
            for end in [a, b] {
                assert!(
                    !matches!(
                        topo.kind(end),
                        Some(NodeKind::Server | NodeKind::Cloud | NodeKind::CloudGateway)
                    ),
                    "quake must not plan {end}"
                );
            }
        }
        for node in &plan.failed_nodes {
            assert_eq!(topo.kind(node), Some(NodeKind::Switch));
        }
        // Rate 1.0 fails every eligible node.
        assert_eq!(plan.failed_nodes, vec!["a0", "a1", "c0"]);
    }

    #[test]
    fn role_choices_are_subsets_of_hosts() {
        let topo = campus();
        let plan = RunPlanner::new(7, 8).plan(&topo, &params());
        assert_eq!(plan.publishers.len(), 2);
        assert_eq!(plan.subscribers.len(), 2);
        for host in plan
            .publishers
            .iter()
            .chain(&plan.subscribers)
            .chain(&plan.generators)
        {
            assert_eq!(topo.kind(host), Some(NodeKind::Host));
        }
    }
}
