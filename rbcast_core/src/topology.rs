//! Topology model: node set, undirected neighbor adjacency and connectivity.
//!
//! A `Topology` is read-only once constructed. Every constructor checks that
//! the adjacency is symmetric, free of self loops and only references node
//! ids in `0..n`.

use rand::seq::SliceRandom;
use rand::Rng;
use rbcast_env::NodeId;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors raised while building or validating a topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("insufficient connectivity: node {node} has degree {degree}, required {required}")]
    InsufficientConnectivity {
        node: NodeId,
        degree: usize,
        required: usize,
    },

    #[error("edge {from} -> {to} has no reverse edge")]
    AsymmetricEdge { from: NodeId, to: NodeId },

    #[error("node {0} lists itself as a neighbor")]
    SelfLoop(NodeId),

    #[error("node {0} is outside the node range")]
    UnknownNode(NodeId),

    #[error("cannot generate a {degree}-regular graph on {nodes} nodes")]
    GenerationFailed { nodes: usize, degree: usize },
}

/// Undirected neighbor graph over nodes `0..n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Topology {
    /// Builds a topology from an adjacency list.
    ///
    /// The key set must be exactly `0..n`.
    pub fn from_adjacency(
        adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
    ) -> Result<Self, TopologyError> {
        let n = adjacency.len();

        if let Some((_, node)) = adjacency
            .keys()
            .enumerate()
            .find(|(idx, node)| node.index() != *idx)
        {
            return Err(TopologyError::UnknownNode(*node));
        }

        for (node, neighbors) in &adjacency {
            for neighbor in neighbors {
                if neighbor == node {
                    return Err(TopologyError::SelfLoop(*node));
                }
                if neighbor.index() >= n {
                    return Err(TopologyError::UnknownNode(*neighbor));
                }
                if !adjacency[neighbor].contains(node) {
                    return Err(TopologyError::AsymmetricEdge {
                        from: *node,
                        to: *neighbor,
                    });
                }
            }
        }

        Ok(Self { adjacency })
    }

    /// Builds a topology from an undirected edge list over `n` nodes.
    pub fn from_edges(
        n: usize,
        edges: impl IntoIterator<Item = (NodeId, NodeId)>,
    ) -> Result<Self, TopologyError> {
        let mut adjacency: BTreeMap<NodeId, BTreeSet<NodeId>> =
            NodeId::range(n).map(|id| (id, BTreeSet::new())).collect();

        for (a, b) in edges {
            if a == b {
                return Err(TopologyError::SelfLoop(a));
            }
            for id in [a, b] {
                if id.index() >= n {
                    return Err(TopologyError::UnknownNode(id));
                }
            }
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }

        Self::from_adjacency(adjacency)
    }

    /// Fully connected graph (degree `n - 1`).
    pub fn complete(n: usize) -> Self {
        let adjacency = NodeId::range(n)
            .map(|id| (id, NodeId::range(n).filter(|other| *other != id).collect()))
            .collect();
        Self { adjacency }
    }

    /// Ring where every node sees its two neighbors (degree 2).
    pub fn ring(n: usize) -> Self {
        Self::circulant(n, 2).unwrap_or_else(|_| Self::complete(n))
    }

    /// Harary-style k-connected circulant graph.
    ///
    /// Node `i` connects to `i ± j` for `j = 1..=k/2`; an odd `k` adds the
    /// diameter chord `i + n/2`, which needs an even `n`.
    pub fn circulant(n: usize, k: usize) -> Result<Self, TopologyError> {
        if k >= n || (k % 2 == 1 && n % 2 == 1) {
            return Err(TopologyError::GenerationFailed { nodes: n, degree: k });
        }

        let mut edges = Vec::new();
        for i in 0..n {
            for j in 1..=k / 2 {
                edges.push((NodeId(i as u32), NodeId(((i + j) % n) as u32)));
            }
            if k % 2 == 1 {
                edges.push((NodeId(i as u32), NodeId(((i + n / 2) % n) as u32)));
            }
        }

        Self::from_edges(n, edges)
    }

    /// Random `d`-regular graph drawn with the pairing model.
    ///
    /// Retries until a simple graph comes out; the result is deterministic
    /// for a seeded `rng`.
    pub fn random_regular<R: Rng + ?Sized>(
        n: usize,
        d: usize,
        rng: &mut R,
    ) -> Result<Self, TopologyError> {
        const MAX_ATTEMPTS: usize = 1000;

        if d >= n || (n * d) % 2 == 1 {
            return Err(TopologyError::GenerationFailed { nodes: n, degree: d });
        }

        let stubs: Vec<u32> = (0..n as u32)
            .flat_map(|id| std::iter::repeat(id).take(d))
            .collect();

        'attempt: for _ in 0..MAX_ATTEMPTS {
            let mut shuffled = stubs.clone();
            shuffled.shuffle(rng);

            let mut seen = BTreeSet::new();
            for pair in shuffled.chunks(2) {
                let (a, b) = (pair[0].min(pair[1]), pair[0].max(pair[1]));
                if a == b || !seen.insert((a, b)) {
                    continue 'attempt;
                }
            }

            return Self::from_edges(n, seen.into_iter().map(|(a, b)| (NodeId(a), NodeId(b))));
        }

        Err(TopologyError::GenerationFailed { nodes: n, degree: d })
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// All node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    /// Returns true if `node` is part of this topology.
    pub fn contains(&self, node: NodeId) -> bool {
        self.adjacency.contains_key(&node)
    }

    /// Neighbors of `node` in ascending id order (empty for unknown nodes).
    pub fn neighbors(&self, node: NodeId) -> &BTreeSet<NodeId> {
        static EMPTY: BTreeSet<NodeId> = BTreeSet::new();
        self.adjacency.get(&node).unwrap_or(&EMPTY)
    }

    /// Returns true if `a` and `b` share an edge.
    pub fn is_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.neighbors(a).contains(&b)
    }

    /// Degree of `node`.
    pub fn degree(&self, node: NodeId) -> usize {
        self.neighbors(node).len()
    }

    /// Minimum node degree.
    pub fn connectivity(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).min().unwrap_or(0)
    }

    /// Checks every node's degree against `min_connectivity`.
    pub fn validate(&self, min_connectivity: usize) -> Result<(), TopologyError> {
        match self
            .adjacency
            .iter()
            .find(|(_, neighbors)| neighbors.len() < min_connectivity)
        {
            Some((node, neighbors)) => Err(TopologyError::InsufficientConnectivity {
                node: *node,
                degree: neighbors.len(),
                required: min_connectivity,
            }),
            None => Ok(()),
        }
    }
}
