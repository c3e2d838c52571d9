//! Bracha Byzantine reliable broadcast.
//!
//! Every Bracha message (SEND, ECHO, READY) travels over Dolev reliable
//! communication, so the Dolev origin of an ECHO or READY is the node that
//! emitted it. Tallies are deduplicated by that origin and bucketed by
//! payload value, so conflicting payloads never pool their votes.
//!
//! | trigger                           | action          |
//! |-----------------------------------|-----------------|
//! | SEND from the broadcaster         | ECHO once       |
//! | `⌈(n+f+1)/2⌉` matching ECHOs      | READY once      |
//! | `f+1` matching READYs             | READY once      |
//! | `2f+1` matching READYs            | deliver once    |
//!
//! With `single_hop_send` the SEND skips Dolev: it goes to direct neighbors
//! only, with `path = [broadcaster]`, and receivers never relay it. ECHO and
//! READY still travel over Dolev.

use super::{DolevEngine, Effects, EngineParams, Phase};
use crate::config::BrachaOptions;
use crate::message::{BrachaKind, BrachaMessage, DolevMessage, InstanceId};
use crate::tracker::InstanceTracker;
use rbcast_env::NodeId;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, trace};

#[derive(Debug)]
struct BrachaState<P> {
    echo_sent: bool,
    ready_sent: bool,
    echoes: HashMap<P, BTreeSet<NodeId>>,
    readies: HashMap<P, BTreeSet<NodeId>>,
}

impl<P> Default for BrachaState<P> {
    fn default() -> Self {
        Self {
            echo_sent: false,
            ready_sent: false,
            echoes: HashMap::new(),
            readies: HashMap::new(),
        }
    }
}

/// Bracha broadcast layered over [`DolevEngine`].
#[derive(Debug)]
pub struct BrachaEngine<P> {
    local: NodeId,
    nodes: usize,
    faults: usize,
    options: BrachaOptions,
    dolev: DolevEngine<BrachaMessage<P>>,
    instances: InstanceTracker<InstanceId, BrachaState<P>>,
    next_sequence: u64,
}

type Outbox<P> = Effects<DolevMessage<BrachaMessage<P>>>;

impl<P> BrachaEngine<P>
where
    P: Clone + Eq + Hash + Debug,
{
    pub fn new(params: &EngineParams) -> Self {
        Self {
            local: params.local,
            nodes: params.nodes,
            faults: params.faults,
            options: params.bracha,
            dolev: DolevEngine::new(params),
            instances: InstanceTracker::new(),
            next_sequence: 0,
        }
    }

    /// ECHOs needed before sending READY: `⌈(n+f+1)/2⌉`.
    pub fn echo_threshold(&self) -> usize {
        (self.nodes + self.faults + 1).div_ceil(2)
    }

    /// READYs needed before relaying READY.
    pub fn ready_threshold(&self) -> usize {
        self.faults + 1
    }

    /// READYs needed to deliver.
    pub fn delivery_threshold(&self) -> usize {
        2 * self.faults + 1
    }

    /// Starts a new instance. Returns its id plus anything delivered while
    /// processing our own messages.
    pub fn broadcast(&mut self, payload: P, fx: &mut Outbox<P>) -> (InstanceId, Vec<(InstanceId, P)>) {
        let instance = InstanceId::new(self.local, self.next_sequence);
        self.next_sequence += 1;
        debug!("Node {} BRB-broadcasting {}", self.local, instance);

        let mut queue = VecDeque::new();
        if self.options.single_hop_send {
            let message = BrachaMessage {
                kind: BrachaKind::Send,
                instance,
                payload,
            };
            fx.multicast(
                self.dolev.neighbors().to_vec(),
                DolevMessage {
                    origin: self.local,
                    payload: message.clone(),
                    path: vec![self.local],
                },
            );
            queue.push_back((self.local, message));
        } else {
            self.rc_broadcast(BrachaKind::Send, instance, payload, fx, &mut queue);
        }
        (instance, self.drain(queue, fx))
    }

    /// Processes one Dolev message from neighbor `from`.
    pub fn on_message(
        &mut self,
        from: NodeId,
        message: DolevMessage<BrachaMessage<P>>,
        fx: &mut Outbox<P>,
    ) -> Vec<(InstanceId, P)> {
        let mut queue = VecDeque::new();
        if self.options.single_hop_send && message.payload.kind == BrachaKind::Send {
            if message.origin != from || message.path != [from] {
                debug!(
                    "Node {} discarding single-hop SEND from {} with path {:?}",
                    self.local, from, message.path
                );
                return Vec::new();
            }
            queue.push_back((from, message.payload));
        } else if let Some(delivered) = self.dolev.on_message(from, message, fx) {
            queue.push_back(delivered);
        }
        self.drain(queue, fx)
    }

    pub fn is_delivered(&self, instance: InstanceId) -> bool {
        self.instances.is_delivered(&instance)
    }

    /// Processes Dolev deliveries until none are left. Our own ECHO and
    /// READY are Dolev-delivered locally and land back on the queue.
    fn drain(
        &mut self,
        mut queue: VecDeque<(NodeId, BrachaMessage<P>)>,
        fx: &mut Outbox<P>,
    ) -> Vec<(InstanceId, P)> {
        let mut delivered = Vec::new();
        while let Some((origin, message)) = queue.pop_front() {
            let instance = message.instance;
            let payload = message.payload.clone();
            for kind in self.step(origin, message, &mut delivered) {
                let phase = match kind {
                    BrachaKind::Echo => Phase::Echo,
                    _ => Phase::Ready,
                };
                fx.transition(instance, phase);
                self.rc_broadcast(kind, instance, payload.clone(), fx, &mut queue);
            }
        }
        delivered
    }

    /// Applies one Dolev-delivered message; returns what we must emit.
    fn step(
        &mut self,
        origin: NodeId,
        message: BrachaMessage<P>,
        delivered: &mut Vec<(InstanceId, P)>,
    ) -> Vec<BrachaKind> {
        let BrachaMessage {
            kind,
            instance,
            payload,
        } = message;
        trace!("Node {} got {} for {} from {}", self.local, kind.name(), instance, origin);

        let f = self.faults;
        let echo_threshold = self.echo_threshold();
        let ready_threshold = self.ready_threshold();
        let delivery_threshold = self.delivery_threshold();
        let may_echo = self.designated_echo(instance.broadcaster);
        let may_ready = self.designated_ready(instance.broadcaster);
        let amplify = self.options.echo_amplification;

        let mut emit = Vec::new();
        let entry = self.instances.get_or_create(instance);
        let state = &mut entry.state;

        match kind {
            BrachaKind::Send => {
                if origin != instance.broadcaster {
                    debug!(
                        "Node {} discarding SEND for {} forged by {}",
                        self.local, instance, origin
                    );
                    return emit;
                }
                if may_echo && !state.echo_sent {
                    state.echo_sent = true;
                    emit.push(BrachaKind::Echo);
                }
            }
            BrachaKind::Echo => {
                let votes = state.echoes.entry(payload.clone()).or_default();
                votes.insert(origin);
                let count = votes.len();

                if amplify && count > f && may_echo && !state.echo_sent {
                    state.echo_sent = true;
                    emit.push(BrachaKind::Echo);
                }
                if count >= echo_threshold && may_ready && !state.ready_sent {
                    state.ready_sent = true;
                    emit.push(BrachaKind::Ready);
                }
            }
            BrachaKind::Ready => {
                let votes = state.readies.entry(payload.clone()).or_default();
                votes.insert(origin);
                let count = votes.len();

                if count >= ready_threshold && may_ready && !state.ready_sent {
                    state.ready_sent = true;
                    if amplify {
                        state.echo_sent = true;
                    }
                    emit.push(BrachaKind::Ready);
                } else if amplify && count > f && may_echo && !state.echo_sent {
                    // f+1 matching READYs include a correct one
                    state.echo_sent = true;
                    emit.push(BrachaKind::Echo);
                }

                if count >= delivery_threshold && self.instances.mark_delivered(instance) {
                    debug!("Node {} BRB-delivered {}", self.local, instance);
                    delivered.push((instance, payload));
                }
            }
        }
        emit
    }

    fn rc_broadcast(
        &mut self,
        kind: BrachaKind,
        instance: InstanceId,
        payload: P,
        fx: &mut Outbox<P>,
        queue: &mut VecDeque<(NodeId, BrachaMessage<P>)>,
    ) {
        let message = BrachaMessage {
            kind,
            instance,
            payload,
        };
        if let Some(own) = self.dolev.broadcast(message, fx) {
            queue.push_back(own);
        }
    }

    /// Position of this node in the ring after `broadcaster` (1..=n).
    fn offset_after(&self, broadcaster: NodeId) -> usize {
        let n = self.nodes;
        match (self.local.index() + n - broadcaster.index() % n) % n {
            0 => n,
            offset => offset,
        }
    }

    /// With reduced messages only the `⌈(n+f+1)/2⌉ + f` nodes following
    /// the broadcaster emit ECHO.
    fn designated_echo(&self, broadcaster: NodeId) -> bool {
        !self.options.reduced_messages
            || self.offset_after(broadcaster) <= self.echo_threshold() + self.faults
    }

    /// With reduced messages only the `3f + 1` nodes following the
    /// broadcaster emit READY.
    fn designated_ready(&self, broadcaster: NodeId) -> bool {
        !self.options.reduced_messages || self.offset_after(broadcaster) <= 3 * self.faults + 1
    }
}
