//! Forwarding-state programming after convergence.
//!
//! Four rule families are installed before any application process starts:
//! static unicast subscriber routes (the unicast comparison arm), data-path
//! probe routes (forward and return, per gateway), static cloud-gateway to
//! subscriber routes, and group-based multicast trees. Building is pure so
//! every family can be checked without a controller; installing goes
//! through the adapter and tolerates partial failure.

use std::net::Ipv4Addr;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
    controller::{
        AdapterError, ControllerAdapter, ControllerDialect, ControllerView, DialectError,
        FlowRule, GroupIdAllocator, GroupRule, MatchSet, merge_paths,
    },
    topology::{
        Topology,
        identity::{self, IdentityError},
        paths::{Metric, PathError},
        trees::{MulticastTree, TreeAlgorithm, TreeError},
    },
};
use ride_harness_config::constants;

#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Dialect(#[from] DialectError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("node {0} is not in the topology")]
    UnknownNode(String),
    #[error("multicast address pool exhausted after {0} trees")]
    PoolExhausted(usize),
}

/// Ordered `(group address, udp source port)` pairs, one per tree.
///
/// Base address and port advance in lockstep, so both coordinates are
/// unique by construction; concurrent trees would otherwise overwrite each
/// other's rules.
#[derive(Clone, Debug)]
pub struct MulticastAddressPool {
    entries: Vec<(Ipv4Addr, u16)>,
}

impl MulticastAddressPool {
    pub fn new(base: Ipv4Addr, base_port: u16, ntrees: usize) -> Result<Self, ForwardingError> {
        let mut entries = Vec::with_capacity(ntrees);
        for i in 0..ntrees {
            let addr = u32::from(base)
                .checked_add(i as u32)
                .ok_or(ForwardingError::PoolExhausted(i))?;
            let port = base_port
                .checked_add(i as u16)
                .ok_or(ForwardingError::PoolExhausted(i))?;
            entries.push((Ipv4Addr::from(addr), port));
        }
        Ok(Self { entries })
    }

    /// Pool from the experiment-wide constants.
    pub fn for_trees(ntrees: usize) -> Result<Self, ForwardingError> {
        let base: Ipv4Addr = constants::MULTICAST_ADDRESS_BASE
            .parse()
            .expect("multicast base constant is a valid IPv4 address");
        Self::new(base, constants::MULTICAST_ALERT_BASE_SRC_PORT, ntrees)
    }

    #[must_use]
    pub fn entries(&self) -> &[(Ipv4Addr, u16)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn dpid_for_topology_node(
    topo: &Topology,
    dialect: ControllerDialect,
    name: &str,
) -> Result<String, ForwardingError> {
    let kind = topo
        .kind(name)
        .ok_or_else(|| ForwardingError::UnknownNode(name.to_owned()))?;
    Ok(dialect.dpid_for_node(name, kind)?)
}

/// (a) Static unicast routes from the server to each subscriber.
///
/// The route comes from the campus graph so it matches what every other
/// experiment arm computes, then gets translated to controller IDs. The
/// real server host is a late emulation addition not present in the graph,
/// so its DPID is prepended by hand.
pub fn build_unicast_subscriber_rules(
    topo: &Topology,
    view: &ControllerView,
    dialect: ControllerDialect,
    server: &str,
    subscribers: &[String],
    priority: u16,
) -> Result<Vec<FlowRule>, ForwardingError> {
    let server_host = identity::backing_host_name(server);
    let server_host_dpid = dialect.dpid_for_host(&server_host)?;

    let mut rules = Vec::new();
    for sub in subscribers {
        let names = topo.weighted_path(server, sub, Metric::Latency)?;
        let mut route = Vec::with_capacity(names.len() + 1);
        route.push(server_host_dpid.clone());
        for name in &names {
            route.push(dpid_for_topology_node(topo, dialect, name)?);
        }
        debug!(subscriber = %sub, ?route, "static unicast route");

        let matches = MatchSet::new().ipv4_dst(identity::host_identity(sub)?.ip);
        rules.extend(view.build_flow_rules_from_path(&route, &matches, priority)?);
    }
    Ok(rules)
}

/// (b) Probe routes per gateway: server -> gateway -> cloud forward, plus
/// the port-swapped reverse so echo replies ride the same data path.
///
/// Routing keys on the UDP source port alone, which is what lets several
/// data paths coexist; gateway order is fixed (ascending name) so port
/// assignment is reproducible.
pub fn build_probe_rules(
    topo: &Topology,
    view: &ControllerView,
    dialect: ControllerDialect,
    server: &str,
    cloud: &str,
    gateways: &[String],
    priority: u16,
) -> Result<Vec<(String, u16, Vec<FlowRule>)>, ForwardingError> {
    let server_host_dpid = dialect.dpid_for_host(&identity::backing_host_name(server))?;
    let cloud_host_dpid = dialect.dpid_for_host(&identity::backing_host_name(cloud))?;

    let mut per_gateway = Vec::with_capacity(gateways.len());
    for (i, gateway) in gateways.iter().enumerate() {
        let src_port = constants::PROBE_BASE_SRC_PORT + i as u16;
        let gw_dpid = dpid_for_topology_node(topo, dialect, gateway)?;

        let to_gateway = view.path(&server_host_dpid, &gw_dpid)?;
        let to_cloud = view.path(&gw_dpid, &cloud_host_dpid)?;
        let route = merge_paths(&to_gateway, &to_cloud);

        let forward = MatchSet::new()
            .udp_src(src_port)
            .udp_dst(constants::ECHO_SERVER_PORT);
        let mut rules = view.build_flow_rules_from_path(&route, &forward, priority)?;

        let mut reverse_route = route.clone();
        reverse_route.reverse();
        let reverse = forward.clone().with_swapped_udp_ports();
        rules.extend(view.build_flow_rules_from_path(&reverse_route, &reverse, priority)?);

        per_gateway.push((gateway.clone(), src_port, rules));
    }
    Ok(per_gateway)
}

/// (c) Static routes from each cloud gateway down to each subscriber,
/// keyed on `(cloud source, subscriber destination)`.
///
/// These exist so the controller cannot reactively reroute around the
/// quake before the recovery under study gets its chance. The cloud edge
/// switch is prepended as the path "source": the rule builder skips host
/// endpoints, and the gateway must be programmed from the cloud side.
pub fn build_cloud_to_subscriber_rules(
    topo: &Topology,
    view: &ControllerView,
    dialect: ControllerDialect,
    cloud: &str,
    gateways: &[String],
    subscribers: &[String],
    priority: u16,
) -> Result<Vec<(String, String, Vec<FlowRule>)>, ForwardingError> {
    let cloud_ip = identity::host_identity(&identity::backing_host_name(cloud))?.ip;
    let cloud_switch_dpid = dpid_for_topology_node(topo, dialect, cloud)?;

    let mut batches = Vec::new();
    for sub in subscribers {
        let matches = MatchSet::new()
            .ipv4_src(cloud_ip)
            .ipv4_dst(identity::host_identity(sub)?.ip);

        for gateway in gateways {
            let names = topo.weighted_path(gateway, sub, Metric::Latency)?;
            let mut route = Vec::with_capacity(names.len() + 1);
            route.push(cloud_switch_dpid.clone());
            for name in &names {
                route.push(dpid_for_topology_node(topo, dialect, name)?);
            }
            let rules = view.build_flow_rules_from_path(&route, &matches, priority)?;
            batches.push((sub.clone(), gateway.clone(), rules));
        }
    }
    Ok(batches)
}

/// (d) One multicast tree per pool entry, expanded into group tables at
/// branch points plus per-switch output rules.
pub fn build_multicast_rules(
    topo: &Topology,
    view: &ControllerView,
    dialect: ControllerDialect,
    server: &str,
    subscribers: &[String],
    algorithm: TreeAlgorithm,
    pool: &MulticastAddressPool,
    priority: u16,
    group_ids: &mut GroupIdAllocator,
) -> Result<Vec<(Vec<GroupRule>, Vec<FlowRule>)>, ForwardingError> {
    let trees = topo.multicast_trees(server, subscribers, algorithm, pool.len())?;
    let root = dpid_for_topology_node(topo, dialect, server)?;

    let mut expansions = Vec::with_capacity(trees.len());
    for (tree, (addr, src_port)) in trees.iter().zip(pool.entries()) {
        let mut dpid_tree = MulticastTree::default();
        for (a, b) in &tree.edges {
            let da = dpid_for_topology_node(topo, dialect, a)?;
            let db = dpid_for_topology_node(topo, dialect, b)?;
            dpid_tree.nodes.insert(da.clone());
            dpid_tree.nodes.insert(db.clone());
            dpid_tree.edges.insert((da, db));
        }

        let matches = MatchSet::new().ipv4_dst(*addr).udp_src(*src_port);
        expansions.push(view.build_flow_rules_from_multicast_tree(
            &dpid_tree, &root, &matches, priority, group_ids,
        )?);
    }
    Ok(expansions)
}

/// What to program for one trial.
pub struct ForwardingSpec {
    pub server: String,
    pub cloud: Option<String>,
    /// Ascending gateway names; index order fixes probe port assignment.
    pub gateways: Vec<String>,
    pub subscribers: Vec<String>,
    pub use_unicast: bool,
    pub with_ride_c: bool,
    pub use_multicast: bool,
    pub algorithm: TreeAlgorithm,
    pub pool: MulticastAddressPool,
}

/// Drives all four families against the controller. Install failures are
/// logged and swallowed: missing forwarding shows up in the results as
/// reduced reachability, which is the property under study.
pub struct ForwardingProgrammer<'a> {
    topo: &'a Topology,
    adapter: &'a ControllerAdapter,
    group_ids: GroupIdAllocator,
}

impl<'a> ForwardingProgrammer<'a> {
    #[must_use]
    pub fn new(topo: &'a Topology, adapter: &'a ControllerAdapter) -> Self {
        Self {
            topo,
            adapter,
            group_ids: GroupIdAllocator::new(),
        }
    }

    pub async fn program(&mut self, spec: &ForwardingSpec) -> Result<(), ForwardingError> {
        let priority = constants::STATIC_PATH_FLOW_RULE_PRIORITY;
        let dialect = self.adapter.dialect();
        let view = self.adapter.view();

        if spec.use_unicast {
            let rules = build_unicast_subscriber_rules(
                self.topo,
                view,
                dialect,
                &spec.server,
                &spec.subscribers,
                priority,
            )?;
            info!(rules = rules.len(), "installing static unicast subscriber routes");
            if !self.adapter.install_flow_rules(&rules).await {
                error!("problem installing batch of static subscriber flow rules");
            }
        }

        if let Some(cloud) = &spec.cloud {
            if spec.with_ride_c {
                let batches = build_probe_rules(
                    self.topo,
                    view,
                    dialect,
                    &spec.server,
                    cloud,
                    &spec.gateways,
                    priority,
                )?;
                for (gateway, src_port, rules) in &batches {
                    debug!(gateway = %gateway, src_port, rules = rules.len(), "installing probe route");
                    if !self.adapter.install_flow_rules(rules).await {
                        error!(gateway = %gateway, "problem installing probe flow rules");
                    }
                }
            }

            let batches = build_cloud_to_subscriber_rules(
                self.topo,
                view,
                dialect,
                cloud,
                &spec.gateways,
                &spec.subscribers,
                priority,
            )?;
            for (sub, gateway, rules) in &batches {
                if !self.adapter.install_flow_rules(rules).await {
                    error!(
                        subscriber = %sub,
                        gateway = %gateway,
                        "problem installing cloud-to-subscriber flow rules"
                    );
                }
            }
        }

        if spec.use_multicast && !spec.pool.is_empty() {
            let expansions = build_multicast_rules(
                self.topo,
                view,
                dialect,
                &spec.server,
                &spec.subscribers,
                spec.algorithm,
                &spec.pool,
                priority,
                &mut self.group_ids,
            )?;
            for (groups, flows) in &expansions {
                for group in groups {
                    if !self.adapter.install_group(group).await {
                        error!(dpid = %group.dpid, "problem installing multicast group");
                    }
                }
                if !self.adapter.install_flow_rules(flows).await {
                    error!("problem installing multicast flow rules");
                }
            }
            info!(trees = expansions.len(), "multicast trees installed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;
    use crate::{
        controller::{Action, HostInfo, LinkInfo, SwitchInfo},
        topology::{NodeKind, testutil::campus},
    };

    /// Controller view mirroring how the campus fixture is emulated:
    /// servers/clouds become edge switches with a backing host each.
    fn campus_view(topo: &Topology) -> ControllerView {
        let dialect = ControllerDialect::Onos;
        let mut ports: HashMap<String, u32> = HashMap::new();
        let mut next_port = |dpid: &str| {
            let counter = ports.entry(dpid.to_owned()).or_insert(0);
            *counter += 1;
            *counter
        };

        let dpid_of = |name: &str| {
            dpid_for_topology_node(topo, dialect, name).expect("fixture node derives")
        };

        let mut switches = Vec::new();
        for name in topo.switches() {
            switches.push(SwitchInfo { id: dpid_of(&name) });
        }
        for name in topo.servers().into_iter().chain(topo.clouds()) {
            switches.push(SwitchInfo { id: dpid_of(&name) });
        }

        let mut links = Vec::new();
        let mut hosts = Vec::new();
        for (a, b, _) in topo.links() {
            let host_side = topo.kind(&a) == Some(NodeKind::Host)
                || topo.kind(&b) == Some(NodeKind::Host);
            if host_side {
                let (host, switch) = if topo.kind(&a) == Some(NodeKind::Host) {
                    (a, b)
                } else {
                    (b, a)
                };
                let identity = identity::host_identity(&host).expect("fixture host derives");
                let switch_dpid = dpid_of(&switch);
                let port = next_port(&switch_dpid);
                hosts.push(HostInfo {
                    id: dialect.dpid_for_host(&host).expect("host dpid"),
                    ip: identity.ip,
                    mac: identity.mac,
                    switch: switch_dpid,
                    port,
                });
            } else {
                let (src, dst) = (dpid_of(&a), dpid_of(&b));
                let src_port = next_port(&src);
                let dst_port = next_port(&dst);
                links.push(LinkInfo {
                    src,
                    src_port,
                    dst,
                    dst_port,
                    weight: 1.0,
                });
            }
        }

        // Backing hosts for the server and the cloud hang off their edge
        // switches, exactly as the emulation realises them.
        for name in topo.servers().into_iter().chain(topo.clouds()) {
            let host = identity::backing_host_name(&name);
            let identity = identity::host_identity(&host).expect("backing host derives");
            let switch_dpid = dpid_of(&name);
            let port = next_port(&switch_dpid);
            hosts.push(HostInfo {
                id: dialect.dpid_for_host(&host).expect("host dpid"),
                ip: identity.ip,
                mac: identity.mac,
                switch: switch_dpid,
                port,
            });
        }

        ControllerView::from_inventory(&hosts, &switches, &links)
    }

    #[test]
    fn pool_entries_are_unique_in_both_coordinates() {
        let pool = MulticastAddressPool::for_trees(5).expect("pool builds");
        let addrs: HashSet<_> = pool.entries().iter().map(|(a, _)| *a).collect();
        let srcports: HashSet<_> = pool.entries().iter().map(|(_, p)| *p).collect();
        assert_eq!(addrs.len(), 5);
        assert_eq!(srcports.len(), 5);
    }

    #[test]
    fn unicast_routes_program_every_intermediate_switch_once() {
        let topo = campus();
        let view = campus_view(&topo);
        let subscribers = vec!["h0-b0".to_owned(), "h1-m1".to_owned()];

        let rules = build_unicast_subscriber_rules(
            &topo,
            &view,
            ControllerDialect::Onos,
            "s0",
            &subscribers,
            65_000,
        )
        .expect("rules build");

        for sub in &subscribers {
            let sub_ip = identity::host_identity(sub).expect("identity").ip;
            let path = topo
                .weighted_path("s0", sub, Metric::Latency)
                .expect("path");
            // Every on-path switch (plus the server edge switch the host
            // route enters through) carries exactly one matching rule.
            let matching: Vec<_> = rules
                .iter()
                .filter(|r| r.matches.ipv4_dst == Some(sub_ip))
                .collect();
            assert_eq!(matching.len(), path.len() - 1);

            let mut seen = HashSet::new();
            for rule in &matching {
                assert!(seen.insert(rule.dpid.clone()), "duplicate rule on {}", rule.dpid);
            }
        }
    }

    #[test]
    fn probe_rules_are_symmetric_under_port_swap() {
        let topo = campus();
        let view = campus_view(&topo);
        let gateways = topo.cloud_gateways();

        let batches = build_probe_rules(
            &topo,
            &view,
            ControllerDialect::Onos,
            "s0",
            "x0",
            &gateways,
            65_000,
        )
        .expect("probe rules build");

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1, constants::PROBE_BASE_SRC_PORT);
        assert_eq!(batches[1].1, constants::PROBE_BASE_SRC_PORT + 1);

        for (gateway, src_port, rules) in &batches {
            let forward: Vec<_> = rules
                .iter()
                .filter(|r| r.matches.udp_src == Some(*src_port))
                .collect();
            let reverse: Vec<_> = rules
                .iter()
                .filter(|r| r.matches.udp_dst == Some(*src_port))
                .collect();
            assert_eq!(
                forward.len(),
                reverse.len(),
                "asymmetric probe rules via {gateway}"
            );
            assert!(!forward.is_empty());

            let forward_switches: HashSet<_> = forward.iter().map(|r| &r.dpid).collect();
            let reverse_switches: HashSet<_> = reverse.iter().map(|r| &r.dpid).collect();
            assert_eq!(forward_switches, reverse_switches);

            for rule in &forward {
                assert_eq!(rule.matches.udp_dst, Some(constants::ECHO_SERVER_PORT));
            }
        }
    }

    #[test]
    fn cloud_routes_cover_every_subscriber_gateway_pair() {
        let topo = campus();
        let view = campus_view(&topo);
        let gateways = topo.cloud_gateways();
        let subscribers = vec!["h0-b0".to_owned(), "h0-m1".to_owned()];

        let batches = build_cloud_to_subscriber_rules(
            &topo,
            &view,
            ControllerDialect::Onos,
            "x0",
            &gateways,
            &subscribers,
            65_000,
        )
        .expect("cloud routes build");

        assert_eq!(batches.len(), subscribers.len() * gateways.len());
        let cloud_ip = identity::host_identity("hx0").expect("cloud host").ip;
        for (_, _, rules) in &batches {
            assert!(!rules.is_empty());
            for rule in rules {
                assert_eq!(rule.matches.ipv4_src, Some(cloud_ip));
            }
        }
    }

    #[test]
    fn multicast_rules_put_groups_only_at_branch_points() {
        let topo = campus();
        let view = campus_view(&topo);
        let subscribers = vec![
            "h0-b0".to_owned(),
            "h1-b0".to_owned(),
            "h0-m1".to_owned(),
        ];
        let pool = MulticastAddressPool::for_trees(1).expect("pool");
        let mut alloc = GroupIdAllocator::new();

        let expansions = build_multicast_rules(
            &topo,
            &view,
            ControllerDialect::Onos,
            "s0",
            &subscribers,
            TreeAlgorithm::SteinerApprox,
            &pool,
            65_000,
            &mut alloc,
        )
        .expect("expansion");

        assert_eq!(expansions.len(), 1);
        let (groups, flows) = &expansions[0];
        // a0 replicates toward its two hosts, c0 toward a0/a1.
        assert!(!groups.is_empty());
        for group in groups {
            assert!(group.buckets.len() >= 2);
        }
        for flow in flows {
            match &flow.actions[..] {
                [Action::Group { group_id }] => {
                    assert!(groups.iter().any(|g| g.group_id == *group_id && g.dpid == flow.dpid));
                }
                [Action::Output { .. }] => {}
                other => panic!("unexpected action shape: {other:?}"),
            }
        }
    }
}
