//! Network transport abstraction for broadcast nodes.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{NodeId, Packet};

/// Abstraction for point-to-point network I/O between neighboring nodes.
///
/// # Implementations
///
/// - **Actor mode**: `ChannelNetwork` - tokio channels with randomized delay
/// - **Simulation**: the discrete-event `SimNetwork` drives nodes directly
///
/// # Packet Flow
///
/// ```text
/// Node A                     Network                    Node B
///   |                           |                          |
///   |-- send(B, packet) ------->|                          |
///   |                           |-- [uniform delay] ------>|
///   |                           |                          |-- recv() -> packet
/// ```
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// Sends a packet to a neighboring node.
    ///
    /// # Returns
    /// * `Ok(())` - Packet queued for delivery
    /// * `Err(EnvError::NodeUnreachable)` - `target` is not a neighbor
    /// * `Err(EnvError::NetworkError)` - The channel was closed
    ///
    /// # Note
    /// Success does not mean delivery happened yet - packets are delayed.
    async fn send(&self, target: NodeId, packet: Packet) -> Result<(), EnvError>;

    /// Receives the next packet addressed to this node.
    ///
    /// # Returns
    /// * `Some((sender, packet))` - A packet was received
    /// * `None` - The channel was closed (shutdown)
    async fn recv(&self) -> Option<(NodeId, Packet)>;

    /// Sends a packet to every neighbor.
    ///
    /// # Returns
    /// Number of neighbors the packet was queued for.
    async fn broadcast(&self, packet: Packet) -> usize;

    /// Returns this node's ID.
    fn local_id(&self) -> NodeId;
}
