//! Property oracle.
//!
//! The oracle sees the whole run from outside: the delivery log of every
//! node and which nodes are correct. It checks the broadcast guarantees
//! that must hold for correct nodes regardless of what Byzantine nodes do.

use crate::world::RunReport;
use rbcast_core::{EventLog, InstanceId, Payload, VectorClock};
use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Guarantee checked by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// Correct nodes never deliver different payloads for one instance
    Agreement,
    /// Instances of correct broadcasters reach every correct node
    Validity,
    /// At most one delivery per node and instance, with the broadcast payload
    Integrity,
    /// RCO deliveries respect happened-before
    CausalOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub property: Property,
    pub detail: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.property, self.detail)
    }
}

type DeliveryRecord<'a> = (NodeId, InstanceId, &'a Payload, Option<&'a VectorClock>);

pub struct Oracle {
    correct: BTreeSet<NodeId>,
}

impl Oracle {
    pub fn new(correct: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            correct: correct.into_iter().collect(),
        }
    }

    pub fn is_correct(&self, node: NodeId) -> bool {
        self.correct.contains(&node)
    }

    /// Runs every check.
    pub fn check_all(&self, log: &EventLog, report: &RunReport) -> Vec<Violation> {
        let mut violations = self.check_agreement(log);
        violations.extend(self.check_validity(report));
        violations.extend(self.check_integrity(log));
        violations.extend(self.check_causal_order(log));
        violations
    }

    /// Deliveries by correct nodes, in log order.
    fn correct_deliveries<'a>(&self, log: &'a EventLog) -> Vec<DeliveryRecord<'a>> {
        log.deliveries()
            .filter(|(node, ..)| self.is_correct(*node))
            .collect()
    }

    pub fn check_agreement(&self, log: &EventLog) -> Vec<Violation> {
        let mut first: HashMap<InstanceId, (NodeId, &Payload)> = HashMap::new();
        let mut violations = Vec::new();

        for (node, instance, payload, _) in self.correct_deliveries(log) {
            let (other, agreed) = *first.entry(instance).or_insert((node, payload));
            if agreed != payload {
                violations.push(Violation {
                    property: Property::Agreement,
                    detail: format!(
                        "{}: node {} delivered '{}' but node {} delivered '{}'",
                        instance, other, agreed, node, payload
                    ),
                });
            }
        }
        violations
    }

    pub fn check_validity(&self, report: &RunReport) -> Vec<Violation> {
        report
            .outcomes
            .iter()
            .filter(|(instance, outcome)| self.is_correct(instance.broadcaster) && !outcome.is_delivered())
            .map(|(instance, outcome)| Violation {
                property: Property::Validity,
                detail: format!("{} from a correct broadcaster: {:?}", instance, outcome),
            })
            .collect()
    }

    /// No duplicate deliveries, and correct broadcasters' payloads arrive
    /// unchanged (the broadcaster's own delivery is the reference).
    pub fn check_integrity(&self, log: &EventLog) -> Vec<Violation> {
        let deliveries = self.correct_deliveries(log);
        let mut seen = BTreeSet::new();
        let mut violations = Vec::new();

        let originals: BTreeMap<InstanceId, &Payload> = deliveries
            .iter()
            .filter(|(node, instance, ..)| *node == instance.broadcaster)
            .map(|(_, instance, payload, _)| (*instance, *payload))
            .collect();

        for (node, instance, payload, _) in &deliveries {
            if !seen.insert((*node, *instance)) {
                violations.push(Violation {
                    property: Property::Integrity,
                    detail: format!("node {} delivered {} twice", node, instance),
                });
            }
            if let Some(original) = originals.get(instance) {
                if original != payload {
                    violations.push(Violation {
                        property: Property::Integrity,
                        detail: format!(
                            "node {} delivered '{}' for {}, broadcast was '{}'",
                            node, payload, instance, original
                        ),
                    });
                }
            }
        }
        violations
    }

    /// At every correct node, a message never comes after one whose clock
    /// it causally precedes. Deliveries without a clock are ignored.
    pub fn check_causal_order(&self, log: &EventLog) -> Vec<Violation> {
        let mut per_node: BTreeMap<NodeId, Vec<(InstanceId, &VectorClock)>> = BTreeMap::new();
        for (node, instance, _, clock) in self.correct_deliveries(log) {
            if let Some(clock) = clock {
                per_node.entry(node).or_default().push((instance, clock));
            }
        }

        let mut violations = Vec::new();
        for (node, delivered) in per_node {
            for (i, (earlier, earlier_clock)) in delivered.iter().enumerate() {
                for (later, later_clock) in &delivered[i + 1..] {
                    if later_clock.happened_before(earlier_clock) {
                        violations.push(Violation {
                            property: Property::CausalOrder,
                            detail: format!(
                                "node {} delivered {} {} before its cause {} {}",
                                node, earlier, earlier_clock, later, later_clock
                            ),
                        });
                    }
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkStats;
    use crate::world::{InstanceOutcome, StopReason};
    use rbcast_core::{EventSink, ProtocolEvent, ProtocolKind};
    use std::time::Duration;

    fn deliver(log: &mut EventLog, node: u32, broadcaster: u32, payload: &str, clock: Option<Vec<u64>>) {
        log.record(
            Duration::ZERO,
            ProtocolEvent::Delivered {
                node: NodeId(node),
                instance: InstanceId::new(NodeId(broadcaster), 0),
                payload: Payload::from(payload),
                clock: clock.map(VectorClock::from_entries),
            },
        );
    }

    fn oracle() -> Oracle {
        Oracle::new([0, 1, 2].map(NodeId))
    }

    #[test]
    fn test_agreement_violation() {
        let mut log = EventLog::new();
        deliver(&mut log, 0, 0, "a", None);
        deliver(&mut log, 1, 0, "a", None);
        deliver(&mut log, 2, 0, "b", None);
        // Byzantine node 3 is not judged
        deliver(&mut log, 3, 0, "c", None);

        let violations = oracle().check_agreement(&log);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].property, Property::Agreement);
    }

    #[test]
    fn test_integrity_catches_duplicates_and_tampering() {
        let mut log = EventLog::new();
        deliver(&mut log, 0, 0, "a", None);
        deliver(&mut log, 1, 0, "a", None);
        deliver(&mut log, 1, 0, "a", None);
        deliver(&mut log, 2, 0, "x", None);

        let violations = oracle().check_integrity(&log);
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_causal_order_violation() {
        let mut log = EventLog::new();
        // Node 2 delivers 1's message, which saw 0's, before 0's message
        deliver(&mut log, 2, 1, "reply", Some(vec![1, 1, 0]));
        log.record(
            Duration::ZERO,
            ProtocolEvent::Delivered {
                node: NodeId(2),
                instance: InstanceId::new(NodeId(0), 0),
                payload: Payload::from("cause"),
                clock: Some(VectorClock::from_entries(vec![1, 0, 0])),
            },
        );

        let violations = oracle().check_causal_order(&log);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].property, Property::CausalOrder);
    }

    #[test]
    fn test_validity_only_for_correct_broadcasters() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            InstanceId::new(NodeId(0), 0),
            InstanceOutcome::DeliveryTimeout {
                missing: vec![NodeId(2)],
            },
        );
        outcomes.insert(
            InstanceId::new(NodeId(3), 0),
            InstanceOutcome::DeliveryTimeout {
                missing: vec![NodeId(1)],
            },
        );
        let report = RunReport {
            protocol: ProtocolKind::Rco,
            seed: 1,
            outcomes,
            stop: StopReason::Quiescent,
            elapsed_ms: 0,
            stats: NetworkStats::default(),
        };

        let violations = oracle().check_validity(&report);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].detail.starts_with("0#0"));
    }
}
