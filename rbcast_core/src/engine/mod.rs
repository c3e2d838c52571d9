//! Protocol engines.
//!
//! Three sans-IO state machines behind one closed enum:
//!
//! ```text
//!            ┌──────────────┐
//!            │  RcoEngine   │  vector-clock causal buffering
//!            └──────┬───────┘
//!            ┌──────▼───────┐
//!            │ BrachaEngine │  SEND → ECHO → READY quorums
//!            └──────┬───────┘
//!            ┌──────▼───────┐
//!            │ DolevEngine  │  path-based reliable communication
//!            └──────────────┘
//! ```
//!
//! Engines never block: each call consumes one input and records what to
//! send, deliver and report in an [`Effects`] buffer.

mod bracha;
mod dolev;
mod rco;

pub use bracha::BrachaEngine;
pub use dolev::{DolevBroadcast, DolevEngine};
pub use rco::RcoEngine;

use crate::config::{BrachaOptions, ProtocolKind, RunConfig};
use crate::message::{InstanceId, Message, Multicast, Payload, SendClass};
use crate::topology::Topology;
use crate::vector_clock::VectorClock;
use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Payload handed to the application layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub instance: InstanceId,
    pub payload: Payload,

    /// Causal metadata (RCO only)
    pub clock: Option<VectorClock>,
}

/// Observable per-instance protocol phase changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// ECHO sent (Bracha)
    Echo,
    /// READY sent (Bracha)
    Ready,
    /// Waiting on the causal precondition (RCO)
    Buffered,
    /// Delivered to the application
    Delivered,
}

/// Output buffer of one engine step.
#[derive(Debug)]
pub struct Effects<M> {
    class: SendClass,
    pub sends: Vec<Multicast<M>>,
    pub deliveries: Vec<Delivery>,
    pub transitions: Vec<(InstanceId, Phase)>,
}

impl<M> Effects<M> {
    /// Empty buffer; every send recorded through it carries `class`.
    pub fn new(class: SendClass) -> Self {
        Self {
            class,
            sends: Vec::new(),
            deliveries: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn class(&self) -> SendClass {
        self.class
    }

    /// Records a fan-out. Empty target lists are dropped.
    pub fn multicast(&mut self, targets: Vec<NodeId>, message: M) {
        if targets.is_empty() {
            return;
        }
        self.sends.push(Multicast {
            targets,
            message,
            class: self.class,
        });
    }

    /// Records an application delivery.
    pub fn deliver(&mut self, delivery: Delivery) {
        self.transitions.push((delivery.instance, Phase::Delivered));
        self.deliveries.push(delivery);
    }

    pub fn transition(&mut self, instance: InstanceId, phase: Phase) {
        self.transitions.push((instance, phase));
    }

    /// Empty buffer of another message type with the same send class.
    pub fn nested<N>(&self) -> Effects<N> {
        Effects::new(self.class)
    }

    /// Moves everything from `inner` into `self`, wrapping its messages.
    pub fn absorb<N>(&mut self, inner: Effects<N>, wrap: impl Fn(N) -> M) {
        self.sends
            .extend(inner.sends.into_iter().map(|send| send.map(&wrap)));
        self.deliveries.extend(inner.deliveries);
        self.transitions.extend(inner.transitions);
    }
}

/// Static parameters every engine instance needs.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub local: NodeId,
    pub nodes: usize,
    pub faults: usize,
    /// Neighbors in ascending id order
    pub neighbors: Vec<NodeId>,
    pub bracha: BrachaOptions,
}

impl EngineParams {
    pub fn for_node(topology: &Topology, config: &RunConfig, local: NodeId) -> Self {
        Self {
            local,
            nodes: topology.node_count(),
            faults: config.faults,
            neighbors: topology.neighbors(local).iter().copied().collect(),
            bracha: config.bracha,
        }
    }
}

/// The closed set of broadcast protocols.
#[derive(Debug)]
pub enum ProtocolEngine {
    Dolev(DolevBroadcast),
    Bracha(BrachaEngine<Payload>),
    Rco(RcoEngine),
}

impl ProtocolEngine {
    pub fn new(kind: ProtocolKind, params: &EngineParams) -> Self {
        match kind {
            ProtocolKind::Dolev => ProtocolEngine::Dolev(DolevBroadcast::new(params)),
            ProtocolKind::Bracha => ProtocolEngine::Bracha(BrachaEngine::new(params)),
            ProtocolKind::Rco => ProtocolEngine::Rco(RcoEngine::new(params)),
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolEngine::Dolev(_) => ProtocolKind::Dolev,
            ProtocolEngine::Bracha(_) => ProtocolKind::Bracha,
            ProtocolEngine::Rco(_) => ProtocolKind::Rco,
        }
    }

    /// Starts a new broadcast of `payload` from this node.
    pub fn initiate(&mut self, payload: Payload, fx: &mut Effects<Message>) -> InstanceId {
        match self {
            ProtocolEngine::Dolev(engine) => {
                let mut inner = fx.nested();
                let instance = engine.broadcast(payload, &mut inner);
                fx.absorb(inner, Message::Dolev);
                instance
            }
            ProtocolEngine::Bracha(engine) => {
                let mut inner = fx.nested();
                let (instance, delivered) = engine.broadcast(payload, &mut inner);
                for (instance, payload) in delivered {
                    inner.deliver(Delivery {
                        instance,
                        payload,
                        clock: None,
                    });
                }
                fx.absorb(inner, Message::Bracha);
                instance
            }
            ProtocolEngine::Rco(engine) => {
                let mut inner = fx.nested();
                let instance = engine.broadcast(payload, &mut inner);
                fx.absorb(inner, Message::Rco);
                instance
            }
        }
    }

    /// Processes one message received from neighbor `from`.
    pub fn on_message(&mut self, from: NodeId, message: Message, fx: &mut Effects<Message>) {
        match (self, message) {
            (ProtocolEngine::Dolev(engine), Message::Dolev(msg)) => {
                let mut inner = fx.nested();
                engine.on_message(from, msg, &mut inner);
                fx.absorb(inner, Message::Dolev);
            }
            (ProtocolEngine::Bracha(engine), Message::Bracha(msg)) => {
                let mut inner = fx.nested();
                for (instance, payload) in engine.on_message(from, msg, &mut inner) {
                    inner.deliver(Delivery {
                        instance,
                        payload,
                        clock: None,
                    });
                }
                fx.absorb(inner, Message::Bracha);
            }
            (ProtocolEngine::Rco(engine), Message::Rco(msg)) => {
                let mut inner = fx.nested();
                engine.on_message(from, msg, &mut inner);
                fx.absorb(inner, Message::Rco);
            }
            (engine, message) => {
                debug!(
                    "Discarding {} message from {} on a {} node",
                    message.protocol(),
                    from,
                    engine.kind()
                );
            }
        }
    }

    /// Returns true once `instance` was delivered to the application.
    pub fn is_delivered(&self, instance: InstanceId) -> bool {
        match self {
            ProtocolEngine::Dolev(engine) => engine.is_delivered(instance),
            ProtocolEngine::Bracha(engine) => engine.is_delivered(instance),
            ProtocolEngine::Rco(engine) => engine.is_delivered(instance),
        }
    }
}
