//! Common types for the environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifier of a logical node, `0..N-1`.
///
/// Immutable for the duration of a run. Doubles as the index of the node's
/// entry in a vector clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the id as a vector index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Returns the ids `0..n`.
    pub fn range(n: usize) -> impl Iterator<Item = NodeId> {
        (0..n as u32).map(NodeId)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope for packets transmitted between nodes.
///
/// This is a transport-layer wrapper - the actual message is opaque bytes
/// that the receiving node decodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// The encoded protocol message
    pub payload: Vec<u8>,

    /// Timestamp when the packet was created (sender's clock)
    pub timestamp_ms: u64,
}

impl Packet {
    /// Creates a new packet from payload bytes.
    pub fn new(payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
