//! Simulation errors.

use rbcast_core::{ConfigError, TopologyError};
use rbcast_env::{EnvError, NodeId};
use thiserror::Error;

/// Errors raised by the discrete-event network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Sender and receiver are not adjacent
    #[error("no edge between {from} and {to}")]
    InvalidEdge { from: NodeId, to: NodeId },
}

/// Anything that can stop a simulation before it produces a report.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("topology generation failed: {0}")]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("node task failed: {0}")]
    Task(String),
}
