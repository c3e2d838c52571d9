//! Discrete-event network simulator.
//!
//! Every send is turned into a [`ScheduledDelivery`] at
//! `now + uniform(min_delay, max_delay)` and kept in a min-heap ordered by
//! `(deliver_at, sequence)`. The sequence is the global issue counter, so
//! two deliveries due at the same instant come out in the order they were
//! sent and a fixed seed always replays the same run.

use crate::context::SimContext;
use crate::error::NetworkError;
use rbcast_core::{Message, Topology};
use rbcast_env::{BroadcastContext, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::trace;

/// A message in flight.
#[derive(Debug, Clone)]
pub struct ScheduledDelivery {
    pub deliver_at: Duration,
    pub sequence: u64,
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message,
}

impl ScheduledDelivery {
    fn key(&self) -> (Duration, u64) {
        (self.deliver_at, self.sequence)
    }
}

impl PartialEq for ScheduledDelivery {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledDelivery {}

impl PartialOrd for ScheduledDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledDelivery {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Point-to-point messages put in flight
    pub scheduled: u64,

    /// Messages handed to their receiver
    pub delivered: u64,

    /// Point-to-point messages removed by Byzantine behaviors
    pub suppressed: u64,
}

/// The simulated network: topology, delay model and delivery queue.
pub struct SimNetwork {
    topology: Topology,
    context: SimContext,
    min_delay: Duration,
    max_delay: Duration,
    queue: BinaryHeap<Reverse<ScheduledDelivery>>,
    next_sequence: u64,
    stats: NetworkStats,
}

impl SimNetwork {
    pub fn new(topology: Topology, context: SimContext, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            topology,
            context,
            min_delay,
            max_delay,
            queue: BinaryHeap::new(),
            next_sequence: 0,
            stats: NetworkStats::default(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.context.now()
    }

    /// Schedules `message` from `from` to its neighbor `to`. Returns the
    /// delivery time.
    pub fn send(&mut self, from: NodeId, to: NodeId, message: Message) -> Result<Duration, NetworkError> {
        if !self.topology.is_edge(from, to) {
            return Err(NetworkError::InvalidEdge { from, to });
        }

        let delay = self.context.sample_delay(self.min_delay, self.max_delay);
        let deliver_at = self.now() + delay;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        trace!("schedule #{} {} -> {} at {:?}", sequence, from, to, deliver_at);
        self.queue.push(Reverse(ScheduledDelivery {
            deliver_at,
            sequence,
            from,
            to,
            message,
        }));
        self.stats.scheduled += 1;
        Ok(deliver_at)
    }

    /// Counts point-to-point messages a Byzantine node chose not to send.
    pub fn record_suppressed(&mut self, count: usize) {
        self.stats.suppressed += count as u64;
    }

    /// Time of the next delivery, if any.
    pub fn peek_time(&self) -> Option<Duration> {
        self.queue.peek().map(|Reverse(next)| next.deliver_at)
    }

    /// Pops the earliest delivery and moves the clock to it.
    pub fn advance(&mut self) -> Option<ScheduledDelivery> {
        let Reverse(next) = self.queue.pop()?;
        self.context.set_time(next.deliver_at);
        self.stats.delivered += 1;
        Some(next)
    }

    /// Pops every delivery due at or before `now`, in order.
    pub fn deliver_due(&mut self, now: Duration) -> Vec<ScheduledDelivery> {
        let mut due = Vec::new();
        while self.peek_time().is_some_and(|at| at <= now) {
            if let Some(next) = self.advance() {
                due.push(next);
            }
        }
        self.context.set_time(now);
        due
    }

    /// Messages still in flight.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}
