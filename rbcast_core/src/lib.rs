//! # rbcast Core
//!
//! Byzantine reliable broadcast as sans-IO state machines.
//!
//! ## Protocols
//!
//! - **Dolev**: reliable communication over a partially connected graph via
//!   `f + 1` node-disjoint paths
//! - **Bracha**: SEND / ECHO / READY quorum broadcast, layered over Dolev
//! - **RCO**: causal-order broadcast with vector clocks, layered over Bracha
//!
//! ## Building blocks
//!
//! - [`topology`]: undirected graph model, generators and connectivity checks
//! - [`config`]: [`RunConfig`] and setup-time validation
//! - [`byzantine`]: outbound behaviors injected at a node's send boundary
//! - [`tracker`]: per-node broadcast instance bookkeeping
//! - [`node`]: [`BroadcastNode`], engine + role
//! - [`runtime`]: async loop driving a node over an environment transport

pub mod byzantine;
pub mod config;
pub mod engine;
pub mod events;
pub mod message;
pub mod node;
pub mod runtime;
pub mod topology;
pub mod tracker;
pub mod vector_clock;
pub mod wire;

pub use byzantine::{ByzantineBehavior, Role, INFLATION_STEP};
pub use config::{BrachaOptions, ConfigError, ProtocolKind, RunConfig};
pub use engine::{Delivery, EngineParams, Phase, ProtocolEngine};
pub use events::{millis, EventLog, EventSink, ProtocolEvent, TimedEvent, TracingSink};
pub use message::{InstanceId, Message, Payload};
pub use node::{BroadcastNode, NodeOutput};
pub use runtime::NodeRuntime;
pub use topology::{Topology, TopologyError};
pub use tracker::InstanceTracker;
pub use vector_clock::VectorClock;
pub use wire::WireError;
