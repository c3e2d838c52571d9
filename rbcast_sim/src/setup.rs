//! Seeded setup of ad-hoc runs.
//!
//! Scenarios pin every node id. An ad-hoc run instead asks for counts
//! (n nodes, so many Byzantine nodes, so many broadcasters) and a topology
//! shape, and the seed picks the concrete graph and nodes.

use crate::error::SimError;
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rbcast_core::{RunConfig, Topology};
use rbcast_env::NodeId;
use std::str::FromStr;

/// Topology shape of an ad-hoc run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    Complete,
    Ring,
    /// Harary circulant of the given degree
    Circulant(usize),
    /// Random regular graph of the given degree
    RandomRegular(usize),
}

impl FromStr for TopologyKind {
    type Err = String;

    /// `complete`, `ring`, `circulant:<k>` or `regular:<d>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        let (shape, degree) = match lower.split_once(':') {
            Some((shape, degree)) => {
                let degree = degree
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid degree in topology: {}", s))?;
                (shape, Some(degree))
            }
            None => (lower.as_str(), None),
        };

        match (shape, degree) {
            ("complete", None) => Ok(TopologyKind::Complete),
            ("ring", None) => Ok(TopologyKind::Ring),
            ("circulant", Some(k)) => Ok(TopologyKind::Circulant(k)),
            ("regular" | "random_regular", Some(d)) => Ok(TopologyKind::RandomRegular(d)),
            _ => Err(format!("Unknown topology: {}", s)),
        }
    }
}

/// Counts and shape for an ad-hoc run. A `None` count keeps the node
/// list already present in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSetup {
    pub nodes: usize,
    pub topology: TopologyKind,
    pub byzantine: Option<usize>,
    pub broadcasters: Option<usize>,
}

impl RunSetup {
    /// Draws the topology, Byzantine nodes and broadcasters from
    /// `config.seed` and fills them into `config`.
    pub fn build(&self, mut config: RunConfig) -> Result<(Topology, RunConfig), SimError> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let topology = match self.topology {
            TopologyKind::Complete => Topology::complete(self.nodes),
            TopologyKind::Ring => Topology::ring(self.nodes),
            TopologyKind::Circulant(k) => Topology::circulant(self.nodes, k)?,
            TopologyKind::RandomRegular(d) => Topology::random_regular(self.nodes, d, &mut rng)?,
        };

        if let Some(count) = self.byzantine {
            config.byzantine_nodes = pick(&mut rng, self.nodes, count);
        }
        if let Some(count) = self.broadcasters {
            config.broadcasters = pick(&mut rng, self.nodes, count);
        }
        Ok((topology, config))
    }
}

/// `amount` distinct node ids out of `n`, ascending.
fn pick(rng: &mut ChaCha8Rng, n: usize, amount: usize) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = sample(rng, n, amount.min(n))
        .into_iter()
        .map(|i| NodeId(i as u32))
        .collect();
    nodes.sort();
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(topology: TopologyKind) -> RunSetup {
        RunSetup {
            nodes: 10,
            topology,
            byzantine: Some(1),
            broadcasters: Some(2),
        }
    }

    #[test]
    fn test_topology_kind_parsing() {
        assert_eq!("complete".parse(), Ok(TopologyKind::Complete));
        assert_eq!("Ring".parse(), Ok(TopologyKind::Ring));
        assert_eq!("circulant:4".parse(), Ok(TopologyKind::Circulant(4)));
        assert_eq!("regular:3".parse(), Ok(TopologyKind::RandomRegular(3)));
        assert!("regular".parse::<TopologyKind>().is_err());
        assert!("circulant:x".parse::<TopologyKind>().is_err());
    }

    #[test]
    fn test_same_seed_same_setup() {
        let config = RunConfig {
            seed: 77,
            ..Default::default()
        };
        let a = setup(TopologyKind::RandomRegular(4)).build(config.clone()).unwrap();
        let b = setup(TopologyKind::RandomRegular(4)).build(config).unwrap();

        assert_eq!(a.0, b.0);
        assert_eq!(a.1.byzantine_nodes, b.1.byzantine_nodes);
        assert_eq!(a.1.broadcasters.len(), 2);
        assert!(a.0.nodes().all(|id| a.0.degree(id) == 4));
    }

    #[test]
    fn test_missing_counts_keep_configured_nodes() {
        let config = RunConfig {
            byzantine_nodes: vec![NodeId(3)],
            broadcasters: vec![NodeId(1), NodeId(2)],
            ..Default::default()
        };
        let unchanged = RunSetup {
            byzantine: None,
            broadcasters: None,
            ..setup(TopologyKind::Complete)
        };

        let (_, built) = unchanged.build(config.clone()).unwrap();
        assert_eq!(built, config);
    }

    #[test]
    fn test_invalid_shape_is_an_error() {
        let result = setup(TopologyKind::RandomRegular(3)).build(RunConfig::default());
        assert!(result.is_ok());

        let odd = RunSetup {
            nodes: 9,
            ..setup(TopologyKind::RandomRegular(3))
        };
        assert!(matches!(odd.build(RunConfig::default()), Err(SimError::Topology(_))));
    }
}
