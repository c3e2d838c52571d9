//! Reliable causal-order broadcast over Bracha.
//!
//! Every broadcast carries the sender's vector clock right after it
//! counted the broadcast. A Bracha-delivered message waits in `pending`
//! until everything it causally depends on was delivered locally.

use super::{BrachaEngine, Delivery, Effects, EngineParams, Phase};
use crate::message::{BrachaMessage, DolevMessage, InstanceId, Payload, RcoData};
use crate::tracker::InstanceTracker;
use crate::vector_clock::VectorClock;
use rbcast_env::NodeId;
use tracing::{debug, trace};

type Outbox = Effects<DolevMessage<BrachaMessage<RcoData>>>;

#[derive(Debug)]
pub struct RcoEngine {
    local: NodeId,
    nodes: usize,
    bracha: BrachaEngine<RcoData>,
    clock: VectorClock,
    pending: Vec<(InstanceId, RcoData)>,
    delivered: InstanceTracker<InstanceId, ()>,
}

impl RcoEngine {
    pub fn new(params: &EngineParams) -> Self {
        Self {
            local: params.local,
            nodes: params.nodes,
            bracha: BrachaEngine::new(params),
            clock: VectorClock::new(params.nodes),
            pending: Vec::new(),
            delivered: InstanceTracker::new(),
        }
    }

    /// Counts the broadcast, delivers it locally, then BRB-broadcasts it
    /// with the updated clock.
    pub fn broadcast(&mut self, payload: Payload, fx: &mut Outbox) -> InstanceId {
        self.clock.increment(self.local);
        let clock = self.clock.clone();
        debug!("Node {} RCO-broadcasting with clock {}", self.local, clock);

        let data = RcoData {
            clock: clock.clone(),
            payload: payload.clone(),
        };
        let (instance, delivered) = self.bracha.broadcast(data, fx);

        self.delivered.mark_delivered(instance);
        fx.deliver(Delivery {
            instance,
            payload,
            clock: Some(clock),
        });
        self.accept(delivered, fx);
        instance
    }

    pub fn on_message(
        &mut self,
        from: NodeId,
        message: DolevMessage<BrachaMessage<RcoData>>,
        fx: &mut Outbox,
    ) {
        let delivered = self.bracha.on_message(from, message, fx);
        self.accept(delivered, fx);
    }

    pub fn is_delivered(&self, instance: InstanceId) -> bool {
        self.delivered.is_delivered(&instance)
    }

    /// Local vector clock.
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Messages Bracha-delivered but still waiting on their causal past.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn accept(&mut self, delivered: Vec<(InstanceId, RcoData)>, fx: &mut Outbox) {
        if delivered.is_empty() {
            return;
        }

        for (instance, data) in delivered {
            if instance.broadcaster == self.local || self.delivered.is_delivered(&instance) {
                continue;
            }
            if data.clock.len() != self.nodes {
                debug!(
                    "Node {} discarding {}: clock has {} entries, expected {}",
                    self.local,
                    instance,
                    data.clock.len(),
                    self.nodes
                );
                continue;
            }
            if self.clock.is_stale(instance.broadcaster, &data.clock) {
                debug!(
                    "Node {} discarding {}: clock {} already covered by {}",
                    self.local, instance, data.clock, self.clock
                );
                continue;
            }
            trace!("Node {} buffering {} with clock {}", self.local, instance, data.clock);
            fx.transition(instance, Phase::Buffered);
            self.pending.push((instance, data));
        }

        self.deliver_pending(fx);
    }

    /// Delivers buffered messages until none satisfies the causal
    /// precondition any more.
    fn deliver_pending(&mut self, fx: &mut Outbox) {
        while let Some(idx) = self
            .pending
            .iter()
            .position(|(instance, data)| self.clock.can_deliver(instance.broadcaster, &data.clock))
        {
            let (instance, data) = self.pending.remove(idx);
            if !self.delivered.mark_delivered(instance) {
                continue;
            }
            self.clock.increment(instance.broadcaster);
            debug!("Node {} RCO-delivered {} clock {}", self.local, instance, self.clock);
            fx.deliver(Delivery {
                instance,
                payload: data.payload,
                clock: Some(data.clock),
            });
        }

        let clock = &self.clock;
        self.pending
            .retain(|(instance, data)| !clock.is_stale(instance.broadcaster, &data.clock));

        if !self.pending.is_empty() {
            trace!("Node {} holding {} pending", self.local, self.pending.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrachaOptions;
    use crate::message::SendClass;
    use crate::topology::Topology;
    use std::collections::VecDeque;

    type Wire = DolevMessage<BrachaMessage<RcoData>>;

    fn cluster(n: usize, faults: usize) -> Vec<RcoEngine> {
        let topology = Topology::complete(n);
        topology
            .nodes()
            .map(|node| {
                RcoEngine::new(&EngineParams {
                    local: node,
                    nodes: n,
                    faults,
                    neighbors: topology.neighbors(node).iter().copied().collect(),
                    bracha: BrachaOptions::default(),
                })
            })
            .collect()
    }

    fn enqueue(from: NodeId, fx: &mut Outbox, queue: &mut VecDeque<(NodeId, NodeId, Wire)>) {
        for send in fx.sends.drain(..) {
            for target in send.targets {
                queue.push_back((from, target, send.message.clone()));
            }
        }
    }

    /// Delivers queued messages in FIFO order; `deliveries[i]` collects
    /// node `i`'s application deliveries.
    fn pump(
        engines: &mut [RcoEngine],
        queue: &mut VecDeque<(NodeId, NodeId, Wire)>,
        deliveries: &mut [Vec<Delivery>],
    ) {
        while let Some((from, to, message)) = queue.pop_front() {
            let mut fx = Effects::new(SendClass::Relay);
            engines[to.index()].on_message(from, message, &mut fx);
            deliveries[to.index()].extend(fx.deliveries.drain(..));
            enqueue(to, &mut fx, queue);
        }
    }

    #[test]
    fn test_broadcast_delivers_locally_first() {
        let mut engines = cluster(4, 1);
        let mut fx = Effects::new(SendClass::Origin);

        let instance = engines[1].broadcast(Payload::from("m"), &mut fx);

        assert_eq!(fx.deliveries.len(), 1);
        assert_eq!(fx.deliveries[0].instance, instance);
        assert_eq!(
            fx.deliveries[0].clock.as_ref().map(|c| c.entries().to_vec()),
            Some(vec![0, 1, 0, 0])
        );
        assert!(engines[1].is_delivered(instance));
    }

    #[test]
    fn test_causal_chain_is_respected_everywhere() {
        let mut engines = cluster(4, 1);
        let mut deliveries = vec![Vec::new(); 4];
        let mut queue = VecDeque::new();

        let mut fx = Effects::new(SendClass::Origin);
        let first = engines[0].broadcast(Payload::from("a"), &mut fx);
        deliveries[0].extend(fx.deliveries.drain(..));
        enqueue(NodeId(0), &mut fx, &mut queue);
        pump(&mut engines, &mut queue, &mut deliveries);

        // Node 1 saw "a" before broadcasting "b"
        let mut fx = Effects::new(SendClass::Origin);
        let second = engines[1].broadcast(Payload::from("b"), &mut fx);
        deliveries[1].extend(fx.deliveries.drain(..));
        enqueue(NodeId(1), &mut fx, &mut queue);
        pump(&mut engines, &mut queue, &mut deliveries);

        for (node, log) in deliveries.iter().enumerate() {
            let order: Vec<InstanceId> = log.iter().map(|d| d.instance).collect();
            assert_eq!(order, vec![first, second], "node {}", node);
        }
        assert!(engines.iter().all(|e| e.pending_len() == 0));
        assert_eq!(engines[3].clock().entries(), &[1, 1, 0, 0]);
    }

    #[test]
    fn test_out_of_order_message_waits_in_pending() {
        let mut engine = cluster(3, 0).remove(2);
        let mut fx = Effects::new(SendClass::Relay);

        // Node 1's second broadcast arrives before its first
        let data = RcoData {
            clock: VectorClock::from_entries(vec![0, 2, 0]),
            payload: Payload::from("second"),
        };
        engine.accept(vec![(InstanceId::new(NodeId(1), 1), data)], &mut fx);
        assert_eq!(engine.pending_len(), 1);
        assert!(fx.deliveries.is_empty());

        let data = RcoData {
            clock: VectorClock::from_entries(vec![0, 1, 0]),
            payload: Payload::from("first"),
        };
        engine.accept(vec![(InstanceId::new(NodeId(1), 0), data)], &mut fx);

        let payloads: Vec<String> = fx.deliveries.iter().map(|d| d.payload.to_string()).collect();
        assert_eq!(payloads, vec!["first", "second"]);
        assert_eq!(engine.pending_len(), 0);
    }

    #[test]
    fn test_inflated_clock_stays_pending() {
        let mut engine = cluster(3, 0).remove(0);
        let mut fx = Effects::new(SendClass::Relay);

        let mut clock = VectorClock::from_entries(vec![0, 1, 0]);
        clock.inflate(10);
        let data = RcoData {
            clock,
            payload: Payload::from("inflated"),
        };
        engine.accept(vec![(InstanceId::new(NodeId(1), 0), data)], &mut fx);

        assert_eq!(engine.pending_len(), 1);
        assert!(fx.deliveries.is_empty());
        assert_eq!(fx.transitions, vec![(InstanceId::new(NodeId(1), 0), Phase::Buffered)]);
    }

    #[test]
    fn test_wrong_clock_length_is_discarded() {
        let mut engine = cluster(3, 0).remove(0);
        let mut fx = Effects::new(SendClass::Relay);

        let data = RcoData {
            clock: VectorClock::from_entries(vec![0, 1]),
            payload: Payload::from("short"),
        };
        engine.accept(vec![(InstanceId::new(NodeId(1), 0), data)], &mut fx);

        assert_eq!(engine.pending_len(), 0);
        assert!(fx.transitions.is_empty());
    }

    #[test]
    fn test_deflated_clock_is_dropped() {
        let mut engine = cluster(3, 0).remove(0);
        let mut fx = Effects::new(SendClass::Relay);

        let data = RcoData {
            clock: VectorClock::new(3),
            payload: Payload::from("deflated"),
        };
        engine.accept(vec![(InstanceId::new(NodeId(1), 0), data)], &mut fx);

        assert_eq!(engine.pending_len(), 0);
        assert!(fx.deliveries.is_empty());
        assert!(fx.transitions.is_empty());
        assert_eq!(engine.clock().entries(), &[0, 0, 0]);
    }

    #[test]
    fn test_second_copy_of_a_delivered_clock_slot_is_dropped() {
        let mut engine = cluster(3, 0).remove(0);
        let mut fx = Effects::new(SendClass::Relay);
        let data = |payload: &str| RcoData {
            clock: VectorClock::from_entries(vec![0, 1, 0]),
            payload: Payload::from(payload),
        };

        // Two instances from node 1 claiming the same clock slot
        engine.accept(
            vec![
                (InstanceId::new(NodeId(1), 0), data("first")),
                (InstanceId::new(NodeId(1), 1), data("twin")),
            ],
            &mut fx,
        );

        assert_eq!(fx.deliveries.len(), 1);
        assert_eq!(engine.pending_len(), 0);
        assert_eq!(engine.clock().entries(), &[0, 1, 0]);
    }

    #[test]
    fn test_duplicate_instance_does_not_advance_clock() {
        let mut engine = cluster(3, 0).remove(0);
        let mut fx = Effects::new(SendClass::Relay);
        let instance = InstanceId::new(NodeId(1), 0);
        let data = |entries: Vec<u64>| RcoData {
            clock: VectorClock::from_entries(entries),
            payload: Payload::from("m"),
        };

        engine.accept(
            vec![(instance, data(vec![0, 1, 0])), (instance, data(vec![0, 2, 0]))],
            &mut fx,
        );

        assert_eq!(fx.deliveries.len(), 1);
        assert_eq!(engine.clock().entries(), &[0, 1, 0]);
        assert_eq!(engine.pending_len(), 0);
    }
}
