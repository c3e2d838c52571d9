//! Dolev reliable communication over partially connected topologies.
//!
//! A payload is accepted once it arrived over `f + 1` node-disjoint routes,
//! so at most `f` Byzantine relays can never forge it. Bonomi et al.'s
//! optimizations are always on:
//!
//! - **MD.1** a payload received straight from its origin is delivered at once
//! - **MD.2** after delivering, a node announces itself with `path = [self]`
//! - **MD.3** a neighbor that announced is never relayed to again
//! - **MD.4** paths running through an announcer are ignored
//! - **MD.5** once delivered and announced, the instance ignores all traffic

use super::{Delivery, Effects, EngineParams};
use crate::message::{AppMessage, DolevMessage, InstanceId, Payload};
use crate::tracker::InstanceTracker;
use rbcast_env::NodeId;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, trace};

/// Per-(origin, payload) bookkeeping.
#[derive(Debug, Default)]
struct DolevState {
    /// Minimal intermediate node sets seen so far (no set contains another)
    sets: Vec<BTreeSet<NodeId>>,

    /// Neighbors known to have delivered
    delivered_neighbors: BTreeSet<NodeId>,

    announced: bool,
}

impl DolevState {
    /// Adds `set` unless a subset is already known; drops known supersets.
    /// Returns true when the collection changed.
    fn insert_minimal(&mut self, set: BTreeSet<NodeId>) -> bool {
        if self.sets.iter().any(|known| known.is_subset(&set)) {
            return false;
        }
        self.sets.retain(|known| !set.is_subset(known));
        self.sets.push(set);
        true
    }
}

/// Generic Dolev engine; `P` is whatever the upper layer sends.
#[derive(Debug)]
pub struct DolevEngine<P> {
    local: NodeId,
    nodes: usize,
    faults: usize,
    neighbors: Vec<NodeId>,
    instances: InstanceTracker<(NodeId, P), DolevState>,
}

impl<P> DolevEngine<P>
where
    P: Clone + Eq + Hash + Debug,
{
    pub fn new(params: &EngineParams) -> Self {
        Self {
            local: params.local,
            nodes: params.nodes,
            faults: params.faults,
            neighbors: params.neighbors.clone(),
            instances: InstanceTracker::new(),
        }
    }

    pub fn local(&self) -> NodeId {
        self.local
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Sends `payload` to every neighbor and delivers it locally.
    pub fn broadcast(
        &mut self,
        payload: P,
        fx: &mut Effects<DolevMessage<P>>,
    ) -> Option<(NodeId, P)> {
        let key = (self.local, payload.clone());
        if !self.instances.mark_delivered(key.clone()) {
            debug!("Node {} already broadcast {:?}", self.local, payload);
            return None;
        }
        self.instances.get_or_create(key).state.announced = true;

        fx.multicast(
            self.neighbors.clone(),
            DolevMessage {
                origin: self.local,
                payload: payload.clone(),
                path: vec![self.local],
            },
        );
        Some((self.local, payload))
    }

    /// Processes a message from neighbor `from`. Returns `(origin, payload)`
    /// the first time the payload becomes deliverable.
    pub fn on_message(
        &mut self,
        from: NodeId,
        message: DolevMessage<P>,
        fx: &mut Effects<DolevMessage<P>>,
    ) -> Option<(NodeId, P)> {
        if let Err(reason) = self.check_path(from, &message) {
            debug!(
                "Node {} discarding Dolev message from {}: {}",
                self.local, from, reason
            );
            return None;
        }

        let DolevMessage {
            origin,
            payload,
            path,
        } = message;
        let key = (origin, payload);
        let instance = self.instances.get_or_create(key.clone());

        // MD.5
        if instance.is_delivered() && instance.state.announced {
            return None;
        }

        // A single-element path is an announcement (or the original send):
        // the sender has delivered. MD.3
        if path.len() == 1 {
            instance.state.delivered_neighbors.insert(from);
        }

        // MD.4
        let announcers = &instance.state.delivered_neighbors;
        if path[..path.len() - 1]
            .iter()
            .any(|node| announcers.contains(node))
        {
            trace!("Node {} ignoring path {:?} through an announcer", self.local, path);
            return None;
        }

        let direct = from == origin && path.len() == 1;
        if !direct {
            let set: BTreeSet<NodeId> = path.iter().copied().filter(|n| *n != origin).collect();
            instance.state.insert_minimal(set);
        }

        let deliverable =
            direct || has_disjoint_sets(&instance.state.sets, self.faults + 1);

        if deliverable {
            self.instances.mark_delivered(key.clone());
            self.announce(key.clone(), fx);
            return Some(key);
        }

        self.relay(&key, path, fx);
        None
    }

    /// Returns true once `(origin, payload)` was delivered here.
    pub fn is_delivered(&self, origin: NodeId, payload: &P) -> bool {
        self.instances.is_delivered(&(origin, payload.clone()))
    }

    /// Number of minimal disjoint-candidate sets collected for a payload.
    pub fn collected_sets(&self, origin: NodeId, payload: &P) -> usize {
        self.instances
            .get(&(origin, payload.clone()))
            .map_or(0, |i| i.state.sets.len())
    }

    fn check_path(&self, from: NodeId, message: &DolevMessage<P>) -> Result<(), &'static str> {
        let path = &message.path;
        let Some(last) = path.last() else {
            return Err("empty path");
        };
        if *last != from {
            return Err("path does not end at the link sender");
        }
        if message.origin.index() >= self.nodes || path.iter().any(|n| n.index() >= self.nodes) {
            return Err("unknown node id");
        }
        if path.contains(&self.local) {
            return Err("path already visits this node");
        }
        let unique: BTreeSet<_> = path.iter().collect();
        if unique.len() != path.len() {
            return Err("duplicate node in path");
        }
        Ok(())
    }

    /// MD.2: tell every neighbor not known to have delivered.
    fn announce(&mut self, key: (NodeId, P), fx: &mut Effects<DolevMessage<P>>) {
        let (origin, payload) = key.clone();
        let instance = self.instances.get_or_create(key);
        let targets: Vec<NodeId> = self
            .neighbors
            .iter()
            .copied()
            .filter(|n| *n != origin && !instance.state.delivered_neighbors.contains(n))
            .collect();

        instance.state.announced = true;
        instance.state.sets.clear();

        trace!("Node {} announcing delivery from {} to {:?}", self.local, origin, targets);
        fx.multicast(
            targets,
            DolevMessage {
                origin,
                payload,
                path: vec![self.local],
            },
        );
    }

    fn relay(&mut self, key: &(NodeId, P), mut path: Vec<NodeId>, fx: &mut Effects<DolevMessage<P>>) {
        let (origin, payload) = key.clone();
        let Some(instance) = self.instances.get(key) else {
            return;
        };
        let targets: Vec<NodeId> = self
            .neighbors
            .iter()
            .copied()
            .filter(|n| {
                *n != origin
                    && !path.contains(n)
                    && !instance.state.delivered_neighbors.contains(n)
            })
            .collect();

        path.push(self.local);
        fx.multicast(
            targets,
            DolevMessage {
                origin,
                payload,
                path,
            },
        );
    }
}

/// Exact search for `k` pairwise-disjoint sets.
fn has_disjoint_sets(sets: &[BTreeSet<NodeId>], k: usize) -> bool {
    fn search(
        sets: &[BTreeSet<NodeId>],
        start: usize,
        k: usize,
        used: &mut BTreeSet<NodeId>,
    ) -> bool {
        if k == 0 {
            return true;
        }
        if sets.len() - start < k {
            return false;
        }
        for (i, set) in sets.iter().enumerate().skip(start) {
            if !set.is_disjoint(used) {
                continue;
            }
            used.extend(set.iter().copied());
            if search(sets, i + 1, k - 1, used) {
                return true;
            }
            for node in set {
                used.remove(node);
            }
        }
        false
    }

    search(sets, 0, k, &mut BTreeSet::new())
}

/// Dolev used directly as a broadcast protocol.
#[derive(Debug)]
pub struct DolevBroadcast {
    local: NodeId,
    engine: DolevEngine<AppMessage>,
    delivered: InstanceTracker<InstanceId, ()>,
    next_sequence: u64,
}

impl DolevBroadcast {
    pub fn new(params: &EngineParams) -> Self {
        Self {
            local: params.local,
            engine: DolevEngine::new(params),
            delivered: InstanceTracker::new(),
            next_sequence: 0,
        }
    }

    pub fn broadcast(
        &mut self,
        payload: Payload,
        fx: &mut Effects<DolevMessage<AppMessage>>,
    ) -> InstanceId {
        let instance = InstanceId::new(self.local, self.next_sequence);
        self.next_sequence += 1;

        if let Some((_, message)) = self.engine.broadcast(AppMessage { instance, payload }, fx) {
            self.deliver(message, fx);
        }
        instance
    }

    pub fn on_message(
        &mut self,
        from: NodeId,
        message: DolevMessage<AppMessage>,
        fx: &mut Effects<DolevMessage<AppMessage>>,
    ) {
        if message.origin != message.payload.instance.broadcaster {
            debug!(
                "Node {} discarding {} claiming origin {}",
                self.local, message.payload.instance, message.origin
            );
            return;
        }
        if let Some((_, message)) = self.engine.on_message(from, message, fx) {
            self.deliver(message, fx);
        }
    }

    pub fn is_delivered(&self, instance: InstanceId) -> bool {
        self.delivered.is_delivered(&instance)
    }

    fn deliver(&mut self, message: AppMessage, fx: &mut Effects<DolevMessage<AppMessage>>) {
        if self.delivered.mark_delivered(message.instance) {
            fx.deliver(Delivery {
                instance: message.instance,
                payload: message.payload,
                clock: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrachaOptions;
    use crate::message::SendClass;

    fn params(local: u32, nodes: usize, faults: usize, neighbors: &[u32]) -> EngineParams {
        EngineParams {
            local: NodeId(local),
            nodes,
            faults,
            neighbors: neighbors.iter().copied().map(NodeId).collect(),
            bracha: BrachaOptions::default(),
        }
    }

    fn msg(origin: u32, path: &[u32]) -> DolevMessage<&'static str> {
        DolevMessage {
            origin: NodeId(origin),
            payload: "m",
            path: path.iter().copied().map(NodeId).collect(),
        }
    }

    fn ids(ids: &[u32]) -> Vec<NodeId> {
        ids.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn test_broadcast_sends_origin_path_and_delivers() {
        let mut engine = DolevEngine::new(&params(0, 4, 1, &[1, 2, 3]));
        let mut fx = Effects::new(SendClass::Origin);

        assert_eq!(engine.broadcast("m", &mut fx), Some((NodeId(0), "m")));
        assert_eq!(fx.sends.len(), 1);
        assert_eq!(fx.sends[0].targets, ids(&[1, 2, 3]));
        assert_eq!(fx.sends[0].message.path, ids(&[0]));
        assert!(engine.is_delivered(NodeId(0), &"m"));
    }

    #[test]
    fn test_direct_receipt_delivers_and_announces() {
        let mut engine = DolevEngine::new(&params(1, 4, 1, &[0, 2, 3]));
        let mut fx = Effects::new(SendClass::Relay);

        let delivered = engine.on_message(NodeId(0), msg(0, &[0]), &mut fx);
        assert_eq!(delivered, Some((NodeId(0), "m")));

        // Announcement skips the origin
        assert_eq!(fx.sends.len(), 1);
        assert_eq!(fx.sends[0].targets, ids(&[2, 3]));
        assert_eq!(fx.sends[0].message.path, ids(&[1]));
    }

    #[test]
    fn test_disjoint_paths_required_for_indirect_delivery() {
        // Node 3 hears about 0's payload through 1 and through 2
        let mut engine = DolevEngine::new(&params(3, 5, 1, &[1, 2, 4]));
        let mut fx = Effects::new(SendClass::Relay);

        assert_eq!(engine.on_message(NodeId(1), msg(0, &[0, 1]), &mut fx), None);
        assert_eq!(fx.sends.len(), 1);
        assert_eq!(fx.sends[0].targets, ids(&[2, 4]));
        assert_eq!(fx.sends[0].message.path, ids(&[0, 1, 3]));

        let mut fx = Effects::new(SendClass::Relay);
        assert_eq!(
            engine.on_message(NodeId(2), msg(0, &[0, 2]), &mut fx),
            Some((NodeId(0), "m"))
        );
        assert_eq!(fx.sends[0].message.path, ids(&[3]));
    }

    #[test]
    fn test_overlapping_paths_do_not_deliver() {
        let mut engine = DolevEngine::new(&params(4, 6, 1, &[2, 3]));
        let mut fx = Effects::new(SendClass::Relay);

        assert_eq!(engine.on_message(NodeId(2), msg(0, &[0, 1, 2]), &mut fx), None);
        assert_eq!(engine.on_message(NodeId(3), msg(0, &[0, 1, 3]), &mut fx), None);
        assert!(!engine.is_delivered(NodeId(0), &"m"));
        assert_eq!(engine.collected_sets(NodeId(0), &"m"), 2);
    }

    #[test]
    fn test_superset_paths_are_replaced() {
        let mut engine = DolevEngine::new(&params(5, 6, 2, &[1, 2, 3]));
        let mut fx = Effects::new(SendClass::Relay);

        engine.on_message(NodeId(2), msg(0, &[0, 1, 2]), &mut fx);
        engine.on_message(NodeId(2), msg(0, &[0, 2]), &mut fx);
        assert_eq!(engine.collected_sets(NodeId(0), &"m"), 1);
    }

    #[test]
    fn test_malformed_paths_are_discarded() {
        let mut engine = DolevEngine::new(&params(3, 4, 0, &[1, 2]));
        let mut fx = Effects::new(SendClass::Relay);

        // Last hop is not the sender
        assert_eq!(engine.on_message(NodeId(2), msg(0, &[0, 1]), &mut fx), None);
        // Cycle through the local node
        assert_eq!(engine.on_message(NodeId(1), msg(0, &[0, 3, 1]), &mut fx), None);
        // Unknown node id
        assert_eq!(engine.on_message(NodeId(1), msg(0, &[9, 1]), &mut fx), None);
        // Empty path
        assert_eq!(engine.on_message(NodeId(1), msg(0, &[]), &mut fx), None);
        assert!(fx.sends.is_empty());
    }

    #[test]
    fn test_delivered_instance_ignores_traffic() {
        let mut engine = DolevEngine::new(&params(1, 4, 1, &[0, 2, 3]));
        let mut fx = Effects::new(SendClass::Relay);
        engine.on_message(NodeId(0), msg(0, &[0]), &mut fx);

        let mut fx = Effects::new(SendClass::Relay);
        assert_eq!(engine.on_message(NodeId(2), msg(0, &[0, 2]), &mut fx), None);
        assert!(fx.sends.is_empty());
    }

    #[test]
    fn test_announcers_are_not_relayed_to() {
        let mut engine = DolevEngine::new(&params(3, 6, 1, &[1, 2, 4]));
        let mut fx = Effects::new(SendClass::Relay);

        // Node 4 announced: it has delivered
        engine.on_message(NodeId(4), msg(0, &[4]), &mut fx);
        let mut fx = Effects::new(SendClass::Relay);
        engine.on_message(NodeId(1), msg(0, &[0, 1]), &mut fx);

        // {4} and {1} are disjoint: delivered, announcing to everyone but 4
        assert!(engine.is_delivered(NodeId(0), &"m"));
        assert_eq!(fx.sends[0].targets, ids(&[1, 2]));
    }

    #[test]
    fn test_exact_disjoint_search() {
        let set = |ids: &[u32]| ids.iter().copied().map(NodeId).collect::<BTreeSet<_>>();
        let sets = vec![set(&[1, 2]), set(&[2, 3]), set(&[3, 4])];

        assert!(has_disjoint_sets(&sets, 2));
        assert!(!has_disjoint_sets(&sets, 3));
        assert!(has_disjoint_sets(&[], 0));
    }

    #[test]
    fn test_dolev_broadcast_rejects_forged_origin() {
        let mut node = DolevBroadcast::new(&params(1, 4, 1, &[0, 2, 3]));
        let mut fx = Effects::new(SendClass::Relay);

        let forged = DolevMessage {
            origin: NodeId(2),
            payload: AppMessage {
                instance: InstanceId::new(NodeId(0), 0),
                payload: Payload::from("m"),
            },
            path: vec![NodeId(2)],
        };
        node.on_message(NodeId(2), forged, &mut fx);

        assert!(fx.deliveries.is_empty());
        assert!(!node.is_delivered(InstanceId::new(NodeId(0), 0)));
    }

    #[test]
    fn test_dolev_broadcast_allocates_sequences() {
        let mut node = DolevBroadcast::new(&params(0, 4, 1, &[1, 2, 3]));
        let mut fx = Effects::new(SendClass::Origin);

        let first = node.broadcast(Payload::from("a"), &mut fx);
        let second = node.broadcast(Payload::from("b"), &mut fx);

        assert_eq!(first, InstanceId::new(NodeId(0), 0));
        assert_eq!(second, InstanceId::new(NodeId(0), 1));
        assert_eq!(fx.deliveries.len(), 2);
        assert!(node.is_delivered(first));
    }
}
