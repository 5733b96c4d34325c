//! Multicast tree construction.
//!
//! Trees are grown with the classic shortest-path Steiner heuristic: start
//! from the source and repeatedly splice in the terminal closest to the
//! current tree. Building several trees for the same group reuses the same
//! heuristic with the cost of already-used edges inflated, so later trees
//! route around earlier ones where the topology allows it.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    str::FromStr,
};

use thiserror::Error;

use super::{Topology, paths::Metric};

/// Edge-cost multiplier applied per prior use of an edge.
const STEINER_REUSE_PENALTY: u64 = 10;
/// The red-blue variant pushes much harder for disjointness.
const RED_BLUE_REUSE_PENALTY: u64 = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeAlgorithm {
    SteinerApprox,
    RedBlue,
    Ilp,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("unrecognized tree construction algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("tree construction algorithm '{0}' is not supported")]
    Unsupported(&'static str),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("terminal {terminal} cannot be reached from {src}")]
    UnreachableTerminal { src: String, terminal: String },
}

impl FromStr for TreeAlgorithm {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steiner" => Ok(Self::SteinerApprox),
            "red-blue" => Ok(Self::RedBlue),
            "ilp" => Ok(Self::Ilp),
            other => Err(TreeError::UnknownAlgorithm(other.to_owned())),
        }
    }
}

impl TreeAlgorithm {
    fn reuse_penalty(self) -> Result<u64, TreeError> {
        match self {
            Self::SteinerApprox => Ok(STEINER_REUSE_PENALTY),
            Self::RedBlue => Ok(RED_BLUE_REUSE_PENALTY),
            Self::Ilp => Err(TreeError::Unsupported("ilp")),
        }
    }
}

/// A multicast tree as a subgraph: node set plus normalized edge set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MulticastTree {
    pub nodes: BTreeSet<String>,
    pub edges: BTreeSet<(String, String)>,
}

impl MulticastTree {
    fn insert_edge(&mut self, a: String, b: String) {
        self.nodes.insert(a.clone());
        self.nodes.insert(b.clone());
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.edges.insert((a, b));
    }

    /// Child lists per node when the tree is rooted at `root`, in name
    /// order. Used to turn the tree into per-switch forwarding state.
    #[must_use]
    pub fn rooted_children(&self, root: &str) -> BTreeMap<String, Vec<String>> {
        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (a, b) in &self.edges {
            adjacency.entry(a).or_default().push(b);
            adjacency.entry(b).or_default().push(a);
        }

        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut queue = VecDeque::from([root.to_owned()]);
        let mut seen = BTreeSet::from([root.to_owned()]);
        while let Some(node) = queue.pop_front() {
            let mut kids = Vec::new();
            for next in adjacency.get(node.as_str()).into_iter().flatten() {
                if seen.insert((*next).to_owned()) {
                    kids.push((*next).to_owned());
                    queue.push_back((*next).to_owned());
                }
            }
            kids.sort();
            children.insert(node, kids);
        }
        children
    }
}

impl Topology {
    /// Build one multicast tree from `src` spanning `destinations`.
    pub fn multicast_tree(
        &self,
        src: &str,
        destinations: &[String],
        algorithm: TreeAlgorithm,
    ) -> Result<MulticastTree, TreeError> {
        let mut trees = self.multicast_trees(src, destinations, algorithm, 1)?;
        Ok(trees.remove(0))
    }

    /// Build `ntrees` trees for the same group, later ones steered away
    /// from edges the earlier ones already claimed.
    pub fn multicast_trees(
        &self,
        src: &str,
        destinations: &[String],
        algorithm: TreeAlgorithm,
        ntrees: usize,
    ) -> Result<Vec<MulticastTree>, TreeError> {
        let penalty = algorithm.reuse_penalty()?;

        let mut used: HashMap<petgraph::graph::EdgeIndex, u64> = HashMap::new();
        let mut trees = Vec::with_capacity(ntrees);
        for _ in 0..ntrees {
            let tree = self.grow_tree(src, destinations, penalty, &used)?;
            for (a, b) in &tree.edges {
                if let (Some(ia), Some(ib)) = (self.index.get(a), self.index.get(b)) {
                    if let Some(edge) = self.graph.find_edge(*ia, *ib) {
                        *used.entry(edge).or_insert(0) += 1;
                    }
                }
            }
            trees.push(tree);
        }
        Ok(trees)
    }

    fn grow_tree(
        &self,
        src: &str,
        destinations: &[String],
        penalty: u64,
        used: &HashMap<petgraph::graph::EdgeIndex, u64>,
    ) -> Result<MulticastTree, TreeError> {
        let src_idx = *self
            .index
            .get(src)
            .ok_or_else(|| TreeError::UnknownNode(src.to_owned()))?;

        let mut remaining: BTreeSet<String> = BTreeSet::new();
        for dest in destinations {
            if !self.index.contains_key(dest) {
                return Err(TreeError::UnknownNode(dest.clone()));
            }
            if dest != src {
                remaining.insert(dest.clone());
            }
        }

        let mut tree = MulticastTree::default();
        tree.nodes.insert(src.to_owned());
        let mut seeds = vec![src_idx];

        while !remaining.is_empty() {
            let scale = |edge: petgraph::graph::EdgeIndex| {
                1 + penalty * used.get(&edge).copied().unwrap_or(0)
            };
            let (dist, prev) = self.dijkstra(&seeds, Metric::Latency, scale);

            // Nearest remaining terminal, name-ordered on cost ties.
            let next = remaining
                .iter()
                .filter_map(|t| {
                    let idx = self.index[t];
                    dist.get(&idx).map(|d| (*d, t.clone(), idx))
                })
                .min();
            let Some((_, _, terminal_idx)) = next else {
                let terminal = remaining.first().cloned().unwrap_or_default();
                return Err(TreeError::UnreachableTerminal {
                    src: src.to_owned(),
                    terminal,
                });
            };

            // Splice the path from the terminal back to the current tree.
            let mut cursor = terminal_idx;
            while let Some(parent) = prev.get(&cursor) {
                let (a, b) = (self.graph[*parent].name.clone(), self.graph[cursor].name.clone());
                let reached_tree = tree.nodes.contains(&a);
                tree.insert_edge(a, b);
                if reached_tree {
                    break;
                }
                cursor = *parent;
            }

            for node in &tree.nodes {
                remaining.remove(node);
            }
            seeds = tree.nodes.iter().map(|n| self.index[n]).collect();
        }

        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::{super::testutil::campus, *};

    #[test]
    fn algorithm_tags_parse() {
        assert_eq!(
            "steiner".parse::<TreeAlgorithm>(),
            Ok(TreeAlgorithm::SteinerApprox)
        );
        assert_eq!("red-blue".parse::<TreeAlgorithm>(), Ok(TreeAlgorithm::RedBlue));
        assert!(matches!(
            "mst".parse::<TreeAlgorithm>(),
            Err(TreeError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn ilp_is_rejected_at_dispatch() {
        let topo = campus();
        let err = topo
            .multicast_tree("s0", &["h0-b0".to_owned()], TreeAlgorithm::Ilp)
            .expect_err("ilp unsupported");
        assert_eq!(err, TreeError::Unsupported("ilp"));
    }

    #[test]
    fn tree_spans_all_terminals() {
        let topo = campus();
        let dests = vec!["h0-b0".to_owned(), "h1-b0".to_owned(), "h0-m1".to_owned()];
        let tree = topo
            .multicast_tree("s0", &dests, TreeAlgorithm::SteinerApprox)
            .expect("tree builds");
        for dest in &dests {
            assert!(tree.nodes.contains(dest), "missing terminal {dest}");
        }
        assert!(tree.nodes.contains("s0"));
        // A tree has exactly |nodes| - 1 edges.
        assert_eq!(tree.edges.len(), tree.nodes.len() - 1);
    }

    #[test]
    fn rooted_children_identify_the_branch_point() {
        let topo = campus();
        let dests = vec!["h0-b0".to_owned(), "h1-b0".to_owned()];
        let tree = topo
            .multicast_tree("s0", &dests, TreeAlgorithm::SteinerApprox)
            .expect("tree builds");
        let children = tree.rooted_children("s0");
        // a0 fans out to both building hosts.
        assert_eq!(children["a0"], vec!["h0-b0".to_owned(), "h1-b0".to_owned()]);
        assert!(children["h0-b0"].is_empty());
    }

    #[test]
    fn successive_trees_avoid_reused_edges_when_possible() {
        let topo = campus();
        // Two gateway paths to the cloud exist; two trees toward x0 must
        // split across them under the red-blue penalty.
        let trees = topo
            .multicast_trees("s0", &["x0".to_owned()], TreeAlgorithm::RedBlue, 2)
            .expect("trees build");
        assert_ne!(trees[0].edges, trees[1].edges);
    }

    #[test]
    fn unreachable_terminal_errors() {
        let topo = campus();
        let err = topo
            .multicast_tree("s0", &["nope".to_owned()], TreeAlgorithm::SteinerApprox)
            .expect_err("unknown node");
        assert_eq!(err, TreeError::UnknownNode("nope".to_owned()));
    }
}
