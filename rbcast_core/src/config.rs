//! Run configuration and its setup-time validation.
//!
//! Every configuration error is fatal and reported before any node runs.

use crate::byzantine::{ByzantineBehavior, Role};
use crate::topology::{Topology, TopologyError};
use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors detected before a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid fault configuration: {0}")]
    InvalidFaultConfiguration(String),

    #[error("unknown node {0} in run configuration")]
    UnknownNode(NodeId),

    #[error("invalid delay bounds: min {min_ms}ms > max {max_ms}ms")]
    InvalidDelayBounds { min_ms: u64, max_ms: u64 },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Active protocol selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    Dolev,
    Bracha,
    Rco,
}

impl ProtocolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolKind::Dolev => "dolev",
            ProtocolKind::Bracha => "bracha",
            ProtocolKind::Rco => "rco",
        }
    }

    /// Minimum node degree for `f` faults, the same for every protocol.
    ///
    /// All three protocols ride on Dolev reliable communication, which needs
    /// `2f + 1` vertex-disjoint routes between any pair of nodes.
    pub fn required_connectivity(faults: usize) -> usize {
        2 * faults + 1
    }

    /// Quorum protocols need `n > 3f`.
    pub fn requires_quorum(&self) -> bool {
        matches!(self, ProtocolKind::Bracha | ProtocolKind::Rco)
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dolev" => Ok(ProtocolKind::Dolev),
            "bracha" => Ok(ProtocolKind::Bracha),
            "rco" => Ok(ProtocolKind::Rco),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// Optional Bracha message optimizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrachaOptions {
    /// f+1 matching ECHOs or READYs trigger our ECHO if not sent yet
    pub echo_amplification: bool,

    /// Only a designated subset of nodes emits ECHO / READY
    pub reduced_messages: bool,

    /// SEND goes to direct neighbors only and is never relayed
    pub single_hop_send: bool,
}

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Active protocol
    pub protocol: ProtocolKind,

    /// Tolerated fault count `f`
    pub faults: usize,

    /// Nodes playing a Byzantine role
    pub byzantine_nodes: Vec<NodeId>,

    /// Behavior assigned to every Byzantine node
    pub behavior: ByzantineBehavior,

    /// Nodes that initiate broadcasts
    pub broadcasters: Vec<NodeId>,

    /// Broadcasts per broadcaster
    pub broadcasts: usize,

    /// Minimum per-message delay (ms)
    pub min_delay_ms: u64,

    /// Maximum per-message delay (ms)
    pub max_delay_ms: u64,

    /// Run timeout (ms of simulated time)
    pub timeout_ms: u64,

    /// Master seed
    pub seed: u64,

    /// Bracha optimizations (also used by RCO)
    pub bracha: BrachaOptions,

    /// 0 = silent, 1 = deliveries only, 2 = every event
    pub debug_level: u8,

    /// Runs on topologies below the `2f + 1` bound. Only meant for
    /// demonstrating why the bound exists.
    pub skip_connectivity_check: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::Dolev,
            faults: 0,
            byzantine_nodes: Vec::new(),
            behavior: ByzantineBehavior::PassThrough,
            broadcasters: vec![NodeId(0)],
            broadcasts: 1,
            min_delay_ms: 10,
            max_delay_ms: 100,
            timeout_ms: 60_000,
            seed: 42,
            bracha: BrachaOptions::default(),
            debug_level: 1,
            skip_connectivity_check: false,
        }
    }
}

impl RunConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `tracing` filter directive for `debug_level`.
    pub fn log_directive(&self) -> &'static str {
        match self.debug_level {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    /// Role of `node` under this configuration.
    pub fn role_of(&self, node: NodeId) -> Role {
        if self.byzantine_nodes.contains(&node) {
            Role::Byzantine(self.behavior)
        } else {
            Role::Correct
        }
    }

    /// Checks fault counts, node ids, delays and connectivity against the
    /// topology the run will use.
    pub fn validate(&self, topology: &Topology) -> Result<(), ConfigError> {
        let n = topology.node_count();

        if let Some(node) = self
            .byzantine_nodes
            .iter()
            .chain(&self.broadcasters)
            .find(|node| !topology.contains(**node))
        {
            return Err(ConfigError::UnknownNode(*node));
        }

        if self.byzantine_nodes.len() > self.faults {
            return Err(ConfigError::InvalidFaultConfiguration(format!(
                "{} byzantine nodes exceed the tolerated f = {}",
                self.byzantine_nodes.len(),
                self.faults
            )));
        }

        if self.protocol.requires_quorum() && n <= 3 * self.faults {
            return Err(ConfigError::InvalidFaultConfiguration(format!(
                "{} requires n > 3f, got n = {} and f = {}",
                self.protocol, n, self.faults
            )));
        }

        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidDelayBounds {
                min_ms: self.min_delay_ms,
                max_ms: self.max_delay_ms,
            });
        }

        if !self.skip_connectivity_check {
            topology.validate(ProtocolKind::required_connectivity(self.faults))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid_on_complete_graph() {
        let config = RunConfig::default();
        assert!(config.validate(&Topology::complete(4)).is_ok());
    }

    #[test]
    fn test_bracha_rejects_n_at_most_3f() {
        let config = RunConfig {
            protocol: ProtocolKind::Bracha,
            faults: 1,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(&Topology::complete(3)),
            Err(ConfigError::InvalidFaultConfiguration(_))
        ));
        assert!(config.validate(&Topology::complete(4)).is_ok());
    }

    #[test]
    fn test_too_many_byzantine_nodes() {
        let config = RunConfig {
            faults: 1,
            byzantine_nodes: vec![NodeId(1), NodeId(2)],
            ..Default::default()
        };

        assert!(matches!(
            config.validate(&Topology::complete(6)),
            Err(ConfigError::InvalidFaultConfiguration(_))
        ));
    }

    #[test]
    fn test_connectivity_is_checked_unless_skipped() {
        let mut config = RunConfig {
            faults: 1,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(&Topology::ring(6)),
            Err(ConfigError::Topology(TopologyError::InsufficientConnectivity { .. }))
        ));

        config.skip_connectivity_check = true;
        assert!(config.validate(&Topology::ring(6)).is_ok());
    }

    #[test]
    fn test_unknown_broadcaster_and_bad_delays() {
        let config = RunConfig {
            broadcasters: vec![NodeId(9)],
            ..Default::default()
        };
        assert_eq!(
            config.validate(&Topology::complete(4)),
            Err(ConfigError::UnknownNode(NodeId(9)))
        );

        let config = RunConfig {
            min_delay_ms: 50,
            max_delay_ms: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(&Topology::complete(4)),
            Err(ConfigError::InvalidDelayBounds { .. })
        ));
    }

    #[test]
    fn test_role_assignment() {
        let config = RunConfig {
            faults: 1,
            byzantine_nodes: vec![NodeId(2)],
            behavior: ByzantineBehavior::NoRelay,
            ..Default::default()
        };

        assert_eq!(config.role_of(NodeId(2)), Role::Byzantine(ByzantineBehavior::NoRelay));
        assert_eq!(config.role_of(NodeId(1)), Role::Correct);
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{ "protocol": "bracha", "faults": 1 }"#).unwrap();

        assert_eq!(config.protocol, ProtocolKind::Bracha);
        assert_eq!(config.faults, 1);
        assert_eq!(config.max_delay_ms, 100);
    }

    #[test]
    fn test_debug_level_from_json_selects_log_directive() {
        let quiet: RunConfig = serde_json::from_str(r#"{ "debug_level": 0 }"#).unwrap();
        let verbose: RunConfig = serde_json::from_str(r#"{ "debug_level": 2 }"#).unwrap();

        assert_eq!(quiet.log_directive(), "warn");
        assert_eq!(RunConfig::default().log_directive(), "info");
        assert_eq!(verbose.log_directive(), "debug");
    }

    #[test]
    fn test_single_hop_send_from_json() {
        let config: RunConfig =
            serde_json::from_str(r#"{ "bracha": { "single_hop_send": true } }"#).unwrap();

        assert!(config.bracha.single_hop_send);
        assert!(!config.bracha.echo_amplification);
    }

    #[test]
    fn test_required_connectivity_is_protocol_independent() {
        assert_eq!(ProtocolKind::required_connectivity(0), 1);
        assert_eq!(ProtocolKind::required_connectivity(2), 5);
    }
}
