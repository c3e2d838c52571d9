//! rbcast Deterministic Simulation Harness
//!
//! Runs the Dolev, Bracha and RCO engines from `rbcast_core` on a simulated
//! network and checks what correct nodes end up delivering.
//!
//! # Two ways to run
//!
//! - **Discrete-event** ([`SimWorld`]): a single thread, a virtual clock and
//!   a delivery queue ordered by `(deliver_at, sequence)`. A seed fully
//!   determines the run.
//! - **Actor** ([`ChannelCluster`]): one tokio task per node over
//!   [`ChannelNetwork`], with packets encoded on the wire.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimNetwork (virtual clock + delivery min-heap)       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼────┐                       │
//! │  │  Node   │◄────────────►│  Node   │     ...               │
//! │  │   #0    │  topology    │   #1    │                       │
//! │  └─────────┘   edges      └─────────┘                       │
//! │       │                        │                            │
//! │  ┌────▼────────────────────────▼────┐                       │
//! │  │            EventLog               │──► Oracle            │
//! │  └───────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rbcast_core::{ProtocolKind, RunConfig, Topology};
//! use rbcast_sim::SimWorld;
//!
//! let config = RunConfig {
//!     protocol: ProtocolKind::Bracha,
//!     faults: 1,
//!     ..Default::default()
//! };
//!
//! let mut world = SimWorld::new(Topology::complete(10), config)?;
//! let report = world.run();
//! assert!(report.all_delivered());
//! ```

mod channel;
mod cluster;
mod context;
mod error;
mod exporter;
mod network;
mod oracle;
mod runner;
mod setup;
mod world;
pub mod scenarios;

pub use channel::ChannelNetwork;
pub use cluster::ChannelCluster;
pub use context::SimContext;
pub use error::{NetworkError, SimError};
pub use exporter::SimExport;
pub use network::{NetworkStats, ScheduledDelivery, SimNetwork};
pub use oracle::{Oracle, Property, Violation};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use setup::{RunSetup, TopologyKind};
pub use world::{delay_seed, payload_for, InstanceOutcome, RunReport, SimWorld, StopReason};
