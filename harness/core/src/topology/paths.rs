//! Weighted shortest paths over the campus graph.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

use petgraph::{graph::NodeIndex, visit::EdgeRef as _};
use thiserror::Error;

use super::Topology;

/// Edge weight used for routing decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Metric {
    /// Sum of per-link latency; the experiment's distance metric.
    #[default]
    Latency,
    /// Plain hop count.
    Hops,
}

impl Metric {
    pub(crate) fn cost_micros(self, attrs: &super::LinkAttrs) -> u64 {
        match self {
            // Integer microseconds keep the priority queue totally ordered.
            Self::Latency => (attrs.latency_ms * 1_000.0).max(0.0) as u64,
            Self::Hops => 1_000,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("no path from {src} to {dst}")]
    NoPath { src: String, dst: String },
}

impl Topology {
    /// Weighted shortest path between two nodes, endpoints included.
    ///
    /// Ties are broken by node name so repeated runs route identically.
    pub fn weighted_path(
        &self,
        src: &str,
        dst: &str,
        metric: Metric,
    ) -> Result<Vec<String>, PathError> {
        let src_idx = *self
            .index
            .get(src)
            .ok_or_else(|| PathError::UnknownNode(src.to_owned()))?;
        let dst_idx = *self
            .index
            .get(dst)
            .ok_or_else(|| PathError::UnknownNode(dst.to_owned()))?;

        let (dist, prev) = self.dijkstra(&[src_idx], metric, |_| 1);
        if !dist.contains_key(&dst_idx) {
            return Err(PathError::NoPath {
                src: src.to_owned(),
                dst: dst.to_owned(),
            });
        }

        let mut path = Vec::new();
        let mut cursor = dst_idx;
        path.push(self.graph[cursor].name.clone());
        while cursor != src_idx {
            cursor = prev[&cursor];
            path.push(self.graph[cursor].name.clone());
        }
        path.reverse();
        Ok(path)
    }

    /// Multi-source Dijkstra returning settled distances and predecessors.
    ///
    /// `edge_scale` multiplies each edge cost; the tree builders use it to
    /// penalise already-used edges. Equal-cost frontier entries pop in name
    /// order, which is what makes path selection deterministic.
    pub(crate) fn dijkstra(
        &self,
        seeds: &[NodeIndex],
        metric: Metric,
        edge_scale: impl Fn(petgraph::graph::EdgeIndex) -> u64,
    ) -> (HashMap<NodeIndex, u64>, HashMap<NodeIndex, NodeIndex>) {
        let mut dist: HashMap<NodeIndex, u64> = HashMap::new();
        let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut heap: BinaryHeap<Reverse<(u64, String, NodeIndex)>> = BinaryHeap::new();

        for seed in seeds {
            dist.insert(*seed, 0);
            heap.push(Reverse((0, self.graph[*seed].name.clone(), *seed)));
        }

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
                    (self.graph[next].name.clone(), next, e.id())
                })
                .collect();
            edges.sort_by(|l, r| l.0.cmp(&r.0));

            for (name, next, edge) in edges {
                let attrs = &self.graph[edge];
                let cost = metric.cost_micros(attrs).saturating_mul(edge_scale(edge));
                let candidate = d.saturating_add(cost);
                if dist.get(&next).is_none_or(|best| candidate < *best) {
                    dist.insert(next, candidate);
                    prev.insert(next, node);
                    heap.push(Reverse((candidate, name, next)));
                }
            }
        }

        (dist, prev)
    }
}

#[cfg(test)]
mod tests {
    use super::{super::testutil::campus, *};

    #[test]
    fn routes_follow_latency_weights() {
        let topo = campus();
        let path = topo
            .weighted_path("s0", "h0-b0", Metric::Latency)
            .expect("path exists");
        assert_eq!(path, vec!["s0", "c0", "a0", "h0-b0"]);
    }

    #[test]
    fn equal_cost_paths_resolve_deterministically() {
        let topo = campus();
        // h0-b0 and h0-m1 sit at symmetric positions; both routes must be
        // identical across repeated computations.
        for _ in 0..5 {
            assert_eq!(
                topo.weighted_path("s0", "h0-m1", Metric::Latency)
                    .expect("path"),
                vec!["s0", "c0", "a1", "h0-m1"]
            );
        }
    }

    #[test]
    fn unknown_and_disconnected_nodes_error() {
        let topo = campus();
        assert_eq!(
            topo.weighted_path("s0", "nope", Metric::Latency),
            Err(PathError::UnknownNode("nope".to_owned()))
        );
    }
}
