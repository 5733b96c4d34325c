pub mod identity;
pub mod paths;
pub mod trees;
pub mod view;

use std::{collections::BTreeMap, fs, io, path::Path};

use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Node classification used throughout the harness.
///
/// A cloud gateway is still a switch on the data plane; it is tagged
/// separately because probe routing and the fault schedule key off it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Switch,
    Host,
    Server,
    Cloud,
    CloudGateway,
}

impl NodeKind {
    /// True for anything realised as an OVS bridge in the emulation.
    #[must_use]
    pub const fn is_switch_like(self) -> bool {
        matches!(self, Self::Switch | Self::CloudGateway)
    }
}

/// Per-link traffic-control attributes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkAttrs {
    #[serde(alias = "bw", default = "default_bw")]
    pub bw_mbps: f64,
    #[serde(alias = "latency", default = "default_latency")]
    pub latency_ms: f64,
    #[serde(default = "default_jitter")]
    pub jitter_ms: f64,
    #[serde(default)]
    pub loss_pct: f64,
}

fn default_bw() -> f64 {
    10.0
}

fn default_latency() -> f64 {
    10.0
}

fn default_jitter() -> f64 {
    1.0
}

impl Default for LinkAttrs {
    fn default() -> Self {
        Self {
            bw_mbps: default_bw(),
            latency_ms: default_latency(),
            jitter_ms: default_jitter(),
            loss_pct: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeSpec {
    name: String,
    kind: NodeKind,
}

#[derive(Debug, Deserialize)]
struct LinkSpec {
    a: String,
    b: String,
    #[serde(flatten)]
    attrs: LinkAttrs,
}

/// On-disk shape of a topology file (JSON, or YAML by extension).
#[derive(Debug, Deserialize)]
struct TopologyFile {
    nodes: Vec<NodeSpec>,
    links: Vec<LinkSpec>,
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse topology file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),
    #[error("link {a}--{b} references unknown node {missing}")]
    UnknownEndpoint { a: String, b: String, missing: String },
    #[error("expected exactly one server, found {0}")]
    ServerCount(usize),
    #[error("expected zero or one cloud, found {0}")]
    CloudCount(usize),
    #[error("cloud gateway {0} is not adjacent to the cloud")]
    GatewayNotAdjacent(String),
    #[error("gateways present but no cloud in the topology")]
    GatewaysWithoutCloud,
    #[error("host {host} is unreachable from server {server}")]
    HostUnreachable { host: String, server: String },
}

#[derive(Clone, Debug)]
pub(crate) struct NodeRecord {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
}

/// The undirected campus graph read once per experiment, immutable after.
#[derive(Clone, Debug)]
pub struct Topology {
    pub(crate) graph: UnGraph<NodeRecord, LinkAttrs>,
    pub(crate) index: BTreeMap<String, NodeIndex>,
}

impl Topology {
    /// Load and validate a topology description, dispatching the parser on
    /// the file extension (`.yaml`/`.yml` vs. JSON).
    pub fn from_file(path: &Path) -> Result<Self, TopologyError> {
        let raw = fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        let file: TopologyFile = if is_yaml {
            serde_yaml::from_str(&raw).map_err(|err| TopologyError::Parse {
                path: path.display().to_string(),
                message: err.to_string(),
            })?
        } else {
            serde_json::from_str(&raw).map_err(|err| TopologyError::Parse {
                path: path.display().to_string(),
                message: err.to_string(),
            })?
        };

        let topo = Self::from_parts(file)?;
        topo.validate()?;

        debug!(
            nodes = topo.graph.node_count(),
            links = topo.graph.edge_count(),
            "topology loaded"
        );
        Ok(topo)
    }

    fn from_parts(file: TopologyFile) -> Result<Self, TopologyError> {
        let mut graph = UnGraph::default();
        let mut index = BTreeMap::new();

        for node in file.nodes {
            if index.contains_key(&node.name) {
                return Err(TopologyError::DuplicateNode(node.name));
            }
            let idx = graph.add_node(NodeRecord {
                name: node.name.clone(),
                kind: node.kind,
            });
            index.insert(node.name, idx);
        }

        for link in file.links {
            let a = *index
                .get(&link.a)
                .ok_or_else(|| TopologyError::UnknownEndpoint {
                    a: link.a.clone(),
                    b: link.b.clone(),
                    missing: link.a.clone(),
                })?;
            let b = *index
                .get(&link.b)
                .ok_or_else(|| TopologyError::UnknownEndpoint {
                    a: link.a.clone(),
                    b: link.b.clone(),
                    missing: link.b.clone(),
                })?;
            graph.add_edge(a, b, link.attrs);
        }

        Ok(Self { graph, index })
    }

    fn validate(&self) -> Result<(), TopologyError> {
        let servers = self.servers();
        if servers.len() != 1 {
            return Err(TopologyError::ServerCount(servers.len()));
        }
        let clouds = self.clouds();
        if clouds.len() > 1 {
            return Err(TopologyError::CloudCount(clouds.len()));
        }

        let gateways = self.cloud_gateways();
        if !gateways.is_empty() {
            let cloud = clouds
                .first()
                .ok_or(TopologyError::GatewaysWithoutCloud)?;
            for gw in &gateways {
                if !self.neighbors(gw).iter().any(|n| n == cloud) {
                    return Err(TopologyError::GatewayNotAdjacent(gw.clone()));
                }
            }
        }

        let server = &servers[0];
        for host in self.hosts() {
            self.weighted_path(server, &host, paths::Metric::Latency)
                .map_err(|_| TopologyError::HostUnreachable {
                    host: host.clone(),
                    server: server.clone(),
                })?;
        }

        Ok(())
    }

    fn names_where(&self, pred: impl Fn(NodeKind) -> bool) -> Vec<String> {
        // BTreeMap iteration keeps every listing sorted by name.
        self.index
            .iter()
            .filter(|(_, idx)| pred(self.graph[**idx].kind))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every data-plane switch, cloud gateways included.
    #[must_use]
    pub fn switches(&self) -> Vec<String> {
        self.names_where(NodeKind::is_switch_like)
    }

    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.names_where(|k| k == NodeKind::Host)
    }

    #[must_use]
    pub fn servers(&self) -> Vec<String> {
        self.names_where(|k| k == NodeKind::Server)
    }

    #[must_use]
    pub fn clouds(&self) -> Vec<String> {
        self.names_where(|k| k == NodeKind::Cloud)
    }

    #[must_use]
    pub fn cloud_gateways(&self) -> Vec<String> {
        self.names_where(|k| k == NodeKind::CloudGateway)
    }

    #[must_use]
    pub fn is_cloud_gateway(&self, name: &str) -> bool {
        self.kind(name) == Some(NodeKind::CloudGateway)
    }

    #[must_use]
    pub fn kind(&self, name: &str) -> Option<NodeKind> {
        self.index.get(name).map(|idx| self.graph[*idx].kind)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    #[must_use]
    pub fn neighbors(&self, name: &str) -> Vec<String> {
        let Some(idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .graph
            .neighbors(*idx)
            .map(|n| self.graph[n].name.clone())
            .collect();
        out.sort();
        out
    }

    /// All links as `(a, b, attrs)` with endpoints in name order.
    #[must_use]
    pub fn links(&self) -> Vec<(String, String, LinkAttrs)> {
        let mut out: Vec<(String, String, LinkAttrs)> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                let (mut a, mut b) = (self.graph[a].name.clone(), self.graph[b].name.clone());
                if a > b {
                    std::mem::swap(&mut a, &mut b);
                }
                Some((a, b, *self.graph.edge_weight(e)?))
            })
            .collect();
        out.sort_by(|l, r| (&l.0, &l.1).cmp(&(&r.0, &r.1)));
        out
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Two-building campus with a server, a cloud behind two gateways, and
    /// four hosts; used across the crate's unit tests.
    pub(crate) fn campus() -> Topology {
        let raw = serde_json::json!({
            "nodes": [
                {"name": "s0", "kind": "server"},
                {"name": "x0", "kind": "cloud"},
                {"name": "g0", "kind": "cloud_gateway"},
                {"name": "g1", "kind": "cloud_gateway"},
                {"name": "c0", "kind": "switch"},
                {"name": "a0", "kind": "switch"},
                {"name": "a1", "kind": "switch"},
                {"name": "h0-b0", "kind": "host"},
                {"name": "h1-b0", "kind": "host"},
                {"name": "h0-m1", "kind": "host"},
                {"name": "h1-m1", "kind": "host"}
            ],
            "links": [
                {"a": "s0", "b": "c0", "latency": 2.0},
                {"a": "c0", "b": "a0", "latency": 5.0},
                {"a": "c0", "b": "a1", "latency": 5.0},
                {"a": "a0", "b": "h0-b0", "latency": 1.0},
                {"a": "a0", "b": "h1-b0", "latency": 1.0},
                {"a": "a1", "b": "h0-m1", "latency": 1.0},
                {"a": "a1", "b": "h1-m1", "latency": 1.0},
                {"a": "c0", "b": "g0", "latency": 3.0},
                {"a": "c0", "b": "g1", "latency": 4.0},
                {"a": "g0", "b": "x0", "latency": 20.0},
                {"a": "g1", "b": "x0", "latency": 20.0}
            ]
        });
        let file: TopologyFile = serde_json::from_value(raw).expect("valid test topology");
        let topo = Topology::from_parts(file).expect("test topology builds");
        topo.validate().expect("test topology is valid");
        topo
    }
}

#[cfg(test)]
mod tests {
    use super::{testutil::campus, *};

    #[test]
    fn classification_queries() {
        let topo = campus();
        assert_eq!(topo.servers(), vec!["s0"]);
        assert_eq!(topo.clouds(), vec!["x0"]);
        assert_eq!(topo.cloud_gateways(), vec!["g0", "g1"]);
        assert_eq!(topo.hosts().len(), 4);
        // Gateways count as switches on the data plane.
        assert!(topo.switches().contains(&"g0".to_owned()));
        assert!(topo.is_cloud_gateway("g1"));
        assert!(!topo.is_cloud_gateway("a0"));
    }

    #[test]
    fn links_are_sorted_and_normalized() {
        let topo = campus();
        let links = topo.links();
        assert_eq!(links.len(), topo.edge_count());
        for (a, b, _) in &links {
            assert!(a < b, "expected normalized endpoints, got {a}--{b}");
        }
        let mut sorted = links.clone();
        sorted.sort_by(|l, r| (&l.0, &l.1).cmp(&(&r.0, &r.1)));
        assert_eq!(
            links.iter().map(|l| (&l.0, &l.1)).collect::<Vec<_>>(),
            sorted.iter().map(|l| (&l.0, &l.1)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn rejects_unknown_link_endpoint() {
        let raw = serde_json::json!({
            "nodes": [{"name": "s0", "kind": "server"}],
            "links": [{"a": "s0", "b": "ghost"}]
        });
        let file: TopologyFile = serde_json::from_value(raw).expect("shape parses");
        let err = Topology::from_parts(file).expect_err("missing endpoint");
        assert!(matches!(err, TopologyError::UnknownEndpoint { .. }));
    }

    #[test]
    fn link_attrs_defaults_apply() {
        let attrs: LinkAttrs = serde_json::from_value(serde_json::json!({})).expect("defaults");
        assert_eq!(attrs, LinkAttrs::default());
    }
}
