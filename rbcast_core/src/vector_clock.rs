//! Vector clocks for causal-order broadcast.

use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};

/// One monotonically non-decreasing counter per node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorClock(Vec<u64>);

impl VectorClock {
    /// All-zero clock for `n` nodes.
    pub fn new(n: usize) -> Self {
        Self(vec![0; n])
    }

    /// Builds a clock from raw entries.
    pub fn from_entries(entries: Vec<u64>) -> Self {
        Self(entries)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entry for `node` (0 when out of range).
    pub fn get(&self, node: NodeId) -> u64 {
        self.0.get(node.index()).copied().unwrap_or(0)
    }

    /// Increments the entry for `node` and returns the new value.
    pub fn increment(&mut self, node: NodeId) -> u64 {
        match self.0.get_mut(node.index()) {
            Some(entry) => {
                *entry += 1;
                *entry
            }
            None => 0,
        }
    }

    /// Raw entries.
    pub fn entries(&self) -> &[u64] {
        &self.0
    }

    /// Adds `step` to every entry.
    pub fn inflate(&mut self, step: u64) {
        for entry in &mut self.0 {
            *entry += step;
        }
    }

    /// Resets every entry to zero.
    pub fn deflate(&mut self) {
        self.0.iter_mut().for_each(|entry| *entry = 0);
    }

    /// Zeroes every entry except `node`'s.
    pub fn retain_only(&mut self, node: NodeId) {
        for (idx, entry) in self.0.iter_mut().enumerate() {
            if idx != node.index() {
                *entry = 0;
            }
        }
    }

    /// True when `message` from `sender` can never become deliverable here:
    /// our entry for `sender` already reached the message's.
    pub fn is_stale(&self, sender: NodeId, message: &VectorClock) -> bool {
        message.get(sender) <= self.get(sender)
    }

    /// Causal delivery precondition, evaluated on the receiver's clock.
    ///
    /// `message` is the sender's post-increment snapshot: its entry for
    /// `sender` must be exactly one ahead of ours, and every other entry
    /// must already be covered locally.
    pub fn can_deliver(&self, sender: NodeId, message: &VectorClock) -> bool {
        if message.len() != self.len() {
            return false;
        }

        self.0
            .iter()
            .zip(&message.0)
            .enumerate()
            .all(|(idx, (local, remote))| {
                if idx == sender.index() {
                    *remote == local + 1
                } else {
                    remote <= local
                }
            })
    }

    /// Returns true if every entry is `<=` the other's (same length).
    pub fn dominated_by(&self, other: &VectorClock) -> bool {
        self.len() == other.len() && self.0.iter().zip(&other.0).all(|(a, b)| a <= b)
    }

    /// Strict happened-before: dominated and not equal.
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.dominated_by(other) && self != other
    }
}

impl std::fmt::Display for VectorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
