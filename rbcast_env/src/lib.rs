//! Reliable Broadcast Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the broadcast
//! engines to run both as **actors** over real channels (tokio) and inside the
//! **discrete-event simulator**.
//!
//! # Core Concept: The Reactor Pattern
//!
//! Protocol engines never touch I/O directly. Everything that would
//! introduce non-determinism is intercepted here:
//! - Time (`now()`, `sleep()`)
//! - Network (`send()`, `recv()`)
//! - Randomness (`sample_delay()`)
//!
//! By deriving all entropy from a single 64-bit seed, any run of the
//! simulator becomes reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use rbcast_env::{BroadcastContext, NetworkTransport};
//!
//! async fn node_loop<Ctx: BroadcastContext, Net: NetworkTransport>(
//!     ctx: &Ctx,
//!     net: &Net,
//! ) {
//!     while let Some((from, packet)) = net.recv().await {
//!         handle_packet(from, packet);
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::BroadcastContext;
pub use network::NetworkTransport;
pub use types::{NodeId, Packet};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
