//! Adapter between the harness and the remote SDN controller.
//!
//! Only this module talks to the controller. Everything else hands it node
//! names or DPIDs and gets forwarding state installed (or counted) back.

pub mod dialect;
pub mod flows;
pub mod rest;

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

use petgraph::{
    graph::{NodeIndex, UnGraph},
    visit::EdgeRef as _,
};
use thiserror::Error;
use tracing::{debug, error, info};

pub use dialect::{ControllerDialect, DialectError};
pub use flows::{
    Action, FlowRule, GroupBucket, GroupIdAllocator, GroupRule, MatchSet, merge_paths,
};
pub use rest::{ControllerRestApi, GroupInfo, HostInfo, LinkInfo, RestError, SwitchInfo};

use crate::topology::{
    trees::MulticastTree,
    view::{TopologyView, ViewCounts, ViewError},
};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Rest(#[from] RestError),
    #[error(transparent)]
    Dialect(#[from] DialectError),
    #[error("node {0} is not in the controller's topology")]
    UnknownViewNode(String),
    #[error("no port from {from} toward {to} in the controller's topology")]
    MissingPort { from: String, to: String },
    #[error("controller reports no path from {src} to {dst}")]
    NoPath { src: String, dst: String },
}

/// How to reach and authenticate against the controller.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub ip: String,
    pub port: u16,
    pub auth: Option<(String, String)>,
    pub dialect: ControllerDialect,
}

#[derive(Clone, Debug)]
struct ViewNode {
    id: String,
    is_host: bool,
}

#[derive(Clone, Copy, Debug)]
struct ViewEdge {
    /// Ports keyed by the stored (source, target) orientation.
    src_port: u32,
    dst_port: u32,
    weight_micros: u64,
}

/// The controller's topology as last fetched: switches, hosts, and the
/// ports joining them. Mutated only by [`ControllerAdapter::refresh`].
#[derive(Clone, Debug, Default)]
pub struct ControllerView {
    graph: UnGraph<ViewNode, ViewEdge>,
    index: HashMap<String, NodeIndex>,
}

impl ControllerView {
    #[must_use]
    pub fn from_inventory(
        hosts: &[HostInfo],
        switches: &[SwitchInfo],
        links: &[LinkInfo],
    ) -> Self {
        let mut view = Self::default();

        for switch in switches {
            view.insert_node(&switch.id, false);
        }

        // The controller reports infrastructure links once per direction;
        // keep the first orientation seen.
        for link in links {
            let src = view.insert_node(&link.src, false);
            let dst = view.insert_node(&link.dst, false);
            if view.graph.find_edge(src, dst).is_none() {
                view.graph.add_edge(
                    src,
                    dst,
                    ViewEdge {
                        src_port: link.src_port,
                        dst_port: link.dst_port,
                        weight_micros: (link.weight * 1_000.0).max(1.0) as u64,
                    },
                );
            }
        }

        for host in hosts {
            let host_idx = view.insert_node(&host.id, true);
            let switch_idx = view.insert_node(&host.switch, false);
            if view.graph.find_edge(switch_idx, host_idx).is_none() {
                view.graph.add_edge(
                    switch_idx,
                    host_idx,
                    ViewEdge {
                        src_port: host.port,
                        dst_port: 0,
                        weight_micros: 1_000,
                    },
                );
            }
        }

        view
    }

    fn insert_node(&mut self, id: &str, is_host: bool) -> NodeIndex {
        if let Some(idx) = self.index.get(id) {
            if is_host {
                self.graph[*idx].is_host = true;
            }
            return *idx;
        }
        let idx = self.graph.add_node(ViewNode {
            id: id.to_owned(),
            is_host,
        });
        self.index.insert(id.to_owned(), idx);
        idx
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn is_host(&self, id: &str) -> bool {
        self.index
            .get(id)
            .is_some_and(|idx| self.graph[*idx].is_host)
    }

    #[must_use]
    pub fn host_count(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|idx| self.graph[*idx].is_host)
            .count()
    }

    #[must_use]
    pub fn switch_count(&self) -> usize {
        self.graph.node_count() - self.host_count()
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Output port on `from` that leads to its neighbor `to`.
    #[must_use]
    pub fn port_towards(&self, from: &str, to: &str) -> Option<u32> {
        let from_idx = *self.index.get(from)?;
        let to_idx = *self.index.get(to)?;
        let edge = self.graph.find_edge(from_idx, to_idx)?;
        let (src, _) = self.graph.edge_endpoints(edge)?;
        let weights = self.graph.edge_weight(edge)?;
        Some(if src == from_idx {
            weights.src_port
        } else {
            weights.dst_port
        })
    }

    /// Weighted shortest path between two identifiers in the controller's
    /// view, ties broken by identifier ordering.
    pub fn path(&self, src: &str, dst: &str) -> Result<Vec<String>, AdapterError> {
        let src_idx = *self
            .index
            .get(src)
            .ok_or_else(|| AdapterError::UnknownViewNode(src.to_owned()))?;
        let dst_idx = *self
            .index
            .get(dst)
            .ok_or_else(|| AdapterError::UnknownViewNode(dst.to_owned()))?;

        let mut dist: HashMap<NodeIndex, u64> = HashMap::from([(src_idx, 0)]);
        let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut heap = BinaryHeap::from([Reverse((0_u64, src.to_owned(), src_idx))]);

        while let Some(Reverse((d, _, node))) = heap.pop() {
            if dist.get(&node).is_some_and(|best| *best < d) {
                continue;
            }
            let mut edges: Vec<_> = self
                .graph
                .edges(node)
                .map(|e| {
                    let next = if e.source() == node {
                        e.target()
                    } else {
                        e.source()
                    };
                    (self.graph[next].id.clone(), next, e.weight().weight_micros)
                })
                .collect();
            edges.sort_by(|l, r| l.0.cmp(&r.0));

            for (id, next, weight) in edges {
                let candidate = d.saturating_add(weight);
                if dist.get(&next).is_none_or(|best| candidate < *best) {
                    dist.insert(next, candidate);
                    prev.insert(next, node);
                    heap.push(Reverse((candidate, id, next)));
                }
            }
        }

        if !dist.contains_key(&dst_idx) {
            return Err(AdapterError::NoPath {
                src: src.to_owned(),
                dst: dst.to_owned(),
            });
        }

        let mut path = vec![self.graph[dst_idx].id.clone()];
        let mut cursor = dst_idx;
        while cursor != src_idx {
            cursor = prev[&cursor];
            path.push(self.graph[cursor].id.clone());
        }
        path.reverse();
        Ok(path)
    }

    /// Expand a DPID path into one output rule per on-path switch.
    ///
    /// Host endpoints carry no forwarding state, so they produce no rules;
    /// the switch ahead of the destination host outputs on its attachment
    /// port.
    pub fn build_flow_rules_from_path(
        &self,
        path: &[String],
        matches: &MatchSet,
        priority: u16,
    ) -> Result<Vec<FlowRule>, AdapterError> {
        let mut rules = Vec::new();
        for window in path.windows(2) {
            let (cur, next) = (&window[0], &window[1]);
            if !self.contains(cur) {
                return Err(AdapterError::UnknownViewNode(cur.clone()));
            }
            if self.is_host(cur) {
                continue;
            }
            let port = self
                .port_towards(cur, next)
                .ok_or_else(|| AdapterError::MissingPort {
                    from: cur.clone(),
                    to: next.clone(),
                })?;
            rules.push(FlowRule {
                dpid: cur.clone(),
                priority,
                matches: matches.clone(),
                actions: vec![Action::Output { port }],
            });
        }
        Ok(rules)
    }

    /// Expand a multicast tree (nodes already DPID-named) into group rules
    /// at branch points and plain output rules elsewhere.
    pub fn build_flow_rules_from_multicast_tree(
        &self,
        tree: &MulticastTree,
        root: &str,
        matches: &MatchSet,
        priority: u16,
        group_ids: &mut GroupIdAllocator,
    ) -> Result<(Vec<GroupRule>, Vec<FlowRule>), AdapterError> {
        let mut groups = Vec::new();
        let mut flows = Vec::new();

        for (node, children) in tree.rooted_children(root) {
            if self.is_host(&node) || children.is_empty() {
                continue;
            }

            let mut ports = Vec::with_capacity(children.len());
            for child in &children {
                let port =
                    self.port_towards(&node, child)
                        .ok_or_else(|| AdapterError::MissingPort {
                            from: node.clone(),
                            to: child.clone(),
                        })?;
                ports.push(port);
            }
            // A shared tree prefix can reach the same port twice; a branch
            // point must not replicate onto one port more than once.
            ports.sort_unstable();
            ports.dedup();

            if ports.len() > 1 {
                let group_id = group_ids.next_id();
                groups.push(GroupRule {
                    dpid: node.clone(),
                    group_id,
                    buckets: ports
                        .iter()
                        .map(|port| GroupBucket {
                            actions: vec![Action::Output { port: *port }],
                        })
                        .collect(),
                });
                flows.push(FlowRule {
                    dpid: node.clone(),
                    priority,
                    matches: matches.clone(),
                    actions: vec![Action::Group { group_id }],
                });
            } else {
                flows.push(FlowRule {
                    dpid: node.clone(),
                    priority,
                    matches: matches.clone(),
                    actions: vec![Action::Output { port: ports[0] }],
                });
            }
        }

        Ok((groups, flows))
    }
}

/// Stateful adapter: REST client, dialect, and the last-fetched view.
pub struct ControllerAdapter {
    api: ControllerRestApi,
    dialect: ControllerDialect,
    hosts: Vec<HostInfo>,
    view: ControllerView,
}

impl ControllerAdapter {
    /// Connect and fetch an initial view.
    pub async fn connect(config: &ControllerConfig) -> Result<Self, AdapterError> {
        let api = ControllerRestApi::new(&config.ip, config.port, config.auth.clone())?;
        let mut adapter = Self {
            api,
            dialect: config.dialect,
            hosts: Vec::new(),
            view: ControllerView::default(),
        };
        adapter.refresh().await?;
        Ok(adapter)
    }

    /// Re-fetch hosts, switches, and links from the controller.
    pub async fn refresh(&mut self) -> Result<(), AdapterError> {
        let (hosts, switches, links) = futures::future::try_join3(
            self.api.get_hosts(),
            self.api.get_switches(),
            self.api.get_links(),
        )
        .await?;
        debug!(
            hosts = hosts.len(),
            switches = switches.len(),
            links = links.len(),
            "refreshed controller view"
        );
        self.view = ControllerView::from_inventory(&hosts, &switches, &links);
        self.hosts = hosts;
        Ok(())
    }

    #[must_use]
    pub const fn dialect(&self) -> ControllerDialect {
        self.dialect
    }

    #[must_use]
    pub fn hosts(&self) -> &[HostInfo] {
        &self.hosts
    }

    #[must_use]
    pub const fn view(&self) -> &ControllerView {
        &self.view
    }

    /// Install a batch of rules; failures are logged and reported as a
    /// single boolean because a missing rule shows up in the results as
    /// reduced reachability rather than aborting the trial.
    pub async fn install_flow_rules(&self, rules: &[FlowRule]) -> bool {
        let mut ok = true;
        for rule in rules {
            if !self.install_flow_rule(rule).await {
                ok = false;
            }
        }
        ok
    }

    pub async fn install_flow_rule(&self, rule: &FlowRule) -> bool {
        match self.api.install_flow(rule).await {
            Ok(()) => true,
            Err(err) => {
                error!(dpid = %rule.dpid, error = %err, "flow rule install failed");
                false
            }
        }
    }

    pub async fn install_group(&self, group: &GroupRule) -> bool {
        match self.api.install_group(group).await {
            Ok(()) => true,
            Err(err) => {
                error!(
                    dpid = %group.dpid,
                    group_id = group.group_id,
                    error = %err,
                    "group install failed"
                );
                false
            }
        }
    }

    pub async fn remove_all_flow_rules(&self) -> Result<(), AdapterError> {
        info!("removing all flow rules");
        Ok(self.api.delete_all_flows().await?)
    }

    pub async fn remove_all_groups(&self) -> Result<(), AdapterError> {
        info!("removing all groups");
        Ok(self.api.delete_all_groups().await?)
    }

    pub async fn get_groups(&self) -> Result<Vec<GroupInfo>, AdapterError> {
        Ok(self.api.get_groups().await?)
    }

    pub async fn get_hosts_live(&self) -> Result<Vec<HostInfo>, AdapterError> {
        Ok(self.api.get_hosts().await?)
    }

    pub async fn get_switches_live(&self) -> Result<Vec<SwitchInfo>, AdapterError> {
        Ok(self.api.get_switches().await?)
    }
}

#[async_trait::async_trait]
impl TopologyView for ControllerAdapter {
    async fn counts(&self) -> Result<ViewCounts, ViewError> {
        let (hosts, switches, links) = futures::future::try_join3(
            self.api.get_hosts(),
            self.api.get_switches(),
            self.api.get_links(),
        )
        .await
        .map_err(|err| ViewError::Query(err.to_string()))?;

        let view = ControllerView::from_inventory(&hosts, &switches, &links);
        Ok(ViewCounts {
            hosts: view.host_count(),
            switches: view.switch_count(),
            links: view.link_count(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A linear fragment `hs0 -- e0 -- c0 -- a0 -- {h1, h2, h3}` mirroring
    /// the emulated server edge plus one building switch.
    pub(crate) fn linear_view() -> ControllerView {
        let switches = vec![
            SwitchInfo { id: "of:e0".into() },
            SwitchInfo { id: "of:c0".into() },
            SwitchInfo { id: "of:a0".into() },
        ];
        let links = vec![
            LinkInfo {
                src: "of:e0".into(),
                src_port: 2,
                dst: "of:c0".into(),
                dst_port: 1,
                weight: 1.0,
            },
            LinkInfo {
                src: "of:c0".into(),
                src_port: 2,
                dst: "of:a0".into(),
                dst_port: 1,
                weight: 1.0,
            },
        ];
        let hosts = vec![
            HostInfo {
                id: "hs0".into(),
                ip: "10.255.0.1".parse().expect("ip"),
                mac: "00:00:0a:ff:00:01".into(),
                switch: "of:e0".into(),
                port: 1,
            },
            HostInfo {
                id: "h1".into(),
                ip: "10.131.0.1".parse().expect("ip"),
                mac: "00:00:0a:83:00:01".into(),
                switch: "of:a0".into(),
                port: 2,
            },
            HostInfo {
                id: "h2".into(),
                ip: "10.131.0.2".parse().expect("ip"),
                mac: "00:00:0a:83:00:02".into(),
                switch: "of:a0".into(),
                port: 3,
            },
            HostInfo {
                id: "h3".into(),
                ip: "10.131.0.3".parse().expect("ip"),
                mac: "00:00:0a:83:00:03".into(),
                switch: "of:a0".into(),
                port: 4,
            },
        ];
        ControllerView::from_inventory(&hosts, &switches, &links)
    }
}

#[cfg(test)]
mod tests {
    use super::{testutil::linear_view, *};

    #[test]
    fn counts_cover_hosts_switches_and_attachments() {
        let view = linear_view();
        assert_eq!(view.host_count(), 4);
        assert_eq!(view.switch_count(), 3);
        // Two infrastructure links plus four host attachment points.
        assert_eq!(view.link_count(), 6);
    }

    #[test]
    fn ports_are_directional() {
        let view = linear_view();
        assert_eq!(view.port_towards("of:e0", "of:c0"), Some(2));
        assert_eq!(view.port_towards("of:c0", "of:e0"), Some(1));
        assert_eq!(view.port_towards("of:a0", "h2"), Some(3));
    }

    #[test]
    fn path_rules_skip_host_endpoints() {
        let view = linear_view();
        let path = view.path("hs0", "h1").expect("path");
        assert_eq!(path, vec!["hs0", "of:e0", "of:c0", "of:a0", "h1"]);

        let matches = MatchSet::new().ipv4_dst("10.131.0.1".parse().expect("ip"));
        let rules = view
            .build_flow_rules_from_path(&path, &matches, 65_000)
            .expect("rules");
        // One rule per on-path switch, none for the two hosts.
        assert_eq!(rules.len(), 3);
        assert!(rules.iter().all(|r| r.dpid.starts_with("of:")));
        assert_eq!(rules[2].actions, vec![Action::Output { port: 2 }]);
    }

    #[test]
    fn multicast_tree_branches_into_one_group_with_deduped_buckets() {
        let view = linear_view();
        let mut tree = MulticastTree::default();
        for (a, b) in [
            ("of:e0", "of:c0"),
            ("of:c0", "of:a0"),
            ("of:a0", "h1"),
            ("of:a0", "h2"),
            ("of:a0", "h3"),
        ] {
            tree.nodes.insert(a.to_owned());
            tree.nodes.insert(b.to_owned());
            tree.edges.insert((a.to_owned(), b.to_owned()));
        }

        let matches = MatchSet::new()
            .ipv4_dst("224.0.1.100".parse().expect("ip"))
            .udp_src(5000);
        let mut alloc = GroupIdAllocator::new();
        let (groups, flows) = view
            .build_flow_rules_from_multicast_tree(&tree, "of:e0", &matches, 65_000, &mut alloc)
            .expect("expansion");

        // Only a0 fans out; it gets the single group with three buckets.
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].dpid, "of:a0");
        assert_eq!(groups[0].buckets.len(), 3);

        // Non-branching switches each get a single output rule, and the
        // branch switch's flow points at its group.
        assert_eq!(flows.len(), 3);
        let branch_flow = flows
            .iter()
            .find(|f| f.dpid == "of:a0")
            .expect("branch flow");
        assert_eq!(
            branch_flow.actions,
            vec![Action::Group {
                group_id: groups[0].group_id
            }]
        );
    }

    #[test]
    fn missing_ports_surface_as_errors() {
        let view = linear_view();
        let path = vec!["of:e0".to_owned(), "of:a0".to_owned()];
        let matches = MatchSet::new();
        let err = view
            .build_flow_rules_from_path(&path, &matches, 100)
            .expect_err("no direct edge");
        assert!(matches!(err, AdapterError::MissingPort { .. }));
    }
}
