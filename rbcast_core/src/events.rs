//! Structured protocol events.
//!
//! Nodes report what they did through an [`EventSink`]. The simulator
//! keeps an [`EventLog`] for the oracle and the exporter; interactive runs
//! render the same events through `tracing` with a [`TracingSink`].

use crate::config::ProtocolKind;
use crate::engine::{Delivery, Phase};
use crate::message::{InstanceId, Payload};
use crate::vector_clock::VectorClock;
use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Whole milliseconds in `at`, saturating at `u64::MAX`.
pub fn millis(at: Duration) -> u64 {
    u64::try_from(at.as_millis()).unwrap_or(u64::MAX)
}

/// One observable protocol step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    MessageSent {
        from: NodeId,
        to: NodeId,
        protocol: ProtocolKind,
        kind: String,
        instance: InstanceId,
    },
    MessageReceived {
        from: NodeId,
        to: NodeId,
        protocol: ProtocolKind,
        kind: String,
        instance: InstanceId,
    },
    Delivered {
        node: NodeId,
        instance: InstanceId,
        payload: Payload,
        clock: Option<VectorClock>,
    },
    PhaseTransition {
        node: NodeId,
        instance: InstanceId,
        phase: Phase,
    },
    /// A fan-out removed by the node's Byzantine behavior
    Suppressed {
        node: NodeId,
        targets: Vec<NodeId>,
        kind: String,
        instance: InstanceId,
    },
}

impl ProtocolEvent {
    pub fn delivered(node: NodeId, delivery: Delivery) -> Self {
        ProtocolEvent::Delivered {
            node,
            instance: delivery.instance,
            payload: delivery.payload,
            clock: delivery.clock,
        }
    }
}

/// An event stamped with (virtual or wall) time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: ProtocolEvent,
}

/// Destination for protocol events.
pub trait EventSink {
    fn record(&mut self, at: Duration, event: ProtocolEvent);
}

/// In-memory event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<TimedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Deliveries in log order: `(node, instance, payload, clock)`.
    pub fn deliveries(
        &self,
    ) -> impl Iterator<Item = (NodeId, InstanceId, &Payload, Option<&VectorClock>)> + '_ {
        self.events.iter().filter_map(|timed| match &timed.event {
            ProtocolEvent::Delivered {
                node,
                instance,
                payload,
                clock,
            } => Some((*node, *instance, payload, clock.as_ref())),
            _ => None,
        })
    }

    /// Number of `MessageSent` events.
    pub fn messages_sent(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.event, ProtocolEvent::MessageSent { .. }))
            .count()
    }

    pub fn extend(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }

    /// Stable sort by timestamp, used after merging per-node logs.
    pub fn sort_by_time(&mut self) {
        self.events.sort_by_key(|timed| timed.at_ms);
    }
}

impl EventSink for EventLog {
    fn record(&mut self, at: Duration, event: ProtocolEvent) {
        self.events.push(TimedEvent {
            at_ms: millis(at),
            event,
        });
    }
}

/// Renders events through `tracing`: deliveries at info, the rest at debug.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&mut self, at: Duration, event: ProtocolEvent) {
        let at_ms = millis(at);
        match event {
            ProtocolEvent::Delivered {
                node,
                instance,
                payload,
                clock,
            } => match clock {
                Some(clock) => info!(
                    "[{}ms] [DELIVER] Node {}: {} '{}' clock {}",
                    at_ms, node, instance, payload, clock
                ),
                None => info!("[{}ms] [DELIVER] Node {}: {} '{}'", at_ms, node, instance, payload),
            },
            ProtocolEvent::MessageSent {
                from,
                to,
                protocol,
                kind,
                instance,
            } => debug!(
                "[{}ms] [SEND] {} -> {}: {} {} {}",
                at_ms, from, to, protocol, kind, instance
            ),
            ProtocolEvent::MessageReceived {
                from,
                to,
                protocol,
                kind,
                instance,
            } => debug!(
                "[{}ms] [RECV] {} <- {}: {} {} {}",
                at_ms, to, from, protocol, kind, instance
            ),
            ProtocolEvent::PhaseTransition {
                node,
                instance,
                phase,
            } => debug!("[{}ms] [PHASE] Node {}: {} -> {:?}", at_ms, node, instance, phase),
            ProtocolEvent::Suppressed {
                node,
                targets,
                kind,
                instance,
            } => debug!(
                "[{}ms] [BYZANTINE] Node {} suppressed {} {} to {:?}",
                at_ms, node, kind, instance, targets
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_filters_deliveries() {
        let mut log = EventLog::new();
        let instance = InstanceId::new(NodeId(0), 0);

        log.record(
            Duration::from_millis(5),
            ProtocolEvent::MessageSent {
                from: NodeId(0),
                to: NodeId(1),
                protocol: ProtocolKind::Dolev,
                kind: "DOLEV".to_string(),
                instance,
            },
        );
        log.record(
            Duration::from_millis(20),
            ProtocolEvent::Delivered {
                node: NodeId(1),
                instance,
                payload: Payload::from("m"),
                clock: None,
            },
        );

        let deliveries: Vec<_> = log.deliveries().collect();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, NodeId(1));
        assert_eq!(log.messages_sent(), 1);
        assert_eq!(log.events()[1].at_ms, 20);
    }

    #[test]
    fn test_timed_event_serializes_flat() {
        let event = TimedEvent {
            at_ms: 3,
            event: ProtocolEvent::PhaseTransition {
                node: NodeId(2),
                instance: InstanceId::new(NodeId(0), 1),
                phase: Phase::Ready,
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "phase_transition");
        assert_eq!(json["phase"], "ready");
        assert_eq!(json["at_ms"], 3);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);

        let mut log = EventLog::new();
        log.record(
            Duration::MAX,
            ProtocolEvent::PhaseTransition {
                node: NodeId(0),
                instance: InstanceId::new(NodeId(0), 0),
                phase: Phase::Echo,
            },
        );
        assert_eq!(log.events()[0].at_ms, u64::MAX);
    }
}
