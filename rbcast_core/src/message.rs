//! Protocol messages exchanged between nodes.
//!
//! Every protocol rides on Dolev reliable communication, so the wire
//! envelope is always a [`DolevMessage`] whose payload is protocol specific:
//!
//! ```text
//! Message::Dolev  ─► DolevMessage<AppMessage>
//! Message::Bracha ─► DolevMessage<BrachaMessage<Payload>>
//! Message::Rco    ─► DolevMessage<BrachaMessage<RcoData>>
//! ```
//!
//! Messages are never mutated in transit by correct nodes; the only code
//! that rewrites one is the Byzantine injector.

use crate::config::ProtocolKind;
use crate::vector_clock::VectorClock;
use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};

/// Identity of one logical broadcast: `(broadcaster, sequence)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    pub broadcaster: NodeId,
    pub sequence: u64,
}

impl InstanceId {
    pub fn new(broadcaster: NodeId, sequence: u64) -> Self {
        Self {
            broadcaster,
            sequence,
        }
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.broadcaster, self.sequence)
    }
}

/// Opaque application payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Anything that belongs to a broadcast instance.
pub trait Instanced {
    fn instance(&self) -> InstanceId;
}

/// Application message carried directly by Dolev broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppMessage {
    pub instance: InstanceId,
    pub payload: Payload,
}

impl Instanced for AppMessage {
    fn instance(&self) -> InstanceId {
        self.instance
    }
}

/// Path-tagged message of the Dolev reliable communication layer.
///
/// `path` lists the nodes the message traversed. It starts either at
/// `origin` (original broadcast) or at a node that already delivered the
/// payload (post-delivery announcement), and ends at the link sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DolevMessage<P> {
    pub origin: NodeId,
    pub payload: P,
    pub path: Vec<NodeId>,
}

/// Bracha phase marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrachaKind {
    /// Initial dissemination by the broadcaster
    Send,
    Echo,
    Ready,
}

impl BrachaKind {
    pub fn name(&self) -> &'static str {
        match self {
            BrachaKind::Send => "SEND",
            BrachaKind::Echo => "ECHO",
            BrachaKind::Ready => "READY",
        }
    }
}

/// Bracha protocol message about one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrachaMessage<P> {
    pub kind: BrachaKind,
    pub instance: InstanceId,
    pub payload: P,
}

impl<P> Instanced for BrachaMessage<P> {
    fn instance(&self) -> InstanceId {
        self.instance
    }
}

/// Causal-order payload: the sender's post-increment clock plus the data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RcoData {
    pub clock: VectorClock,
    pub payload: Payload,
}

/// Protocol-tagged wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "message", rename_all = "snake_case")]
pub enum Message {
    Dolev(DolevMessage<AppMessage>),
    Bracha(DolevMessage<BrachaMessage<Payload>>),
    Rco(DolevMessage<BrachaMessage<RcoData>>),
}

impl Message {
    /// Protocol this message belongs to.
    pub fn protocol(&self) -> ProtocolKind {
        match self {
            Message::Dolev(_) => ProtocolKind::Dolev,
            Message::Bracha(_) => ProtocolKind::Bracha,
            Message::Rco(_) => ProtocolKind::Rco,
        }
    }

    /// Broadcast instance the message is about.
    pub fn instance(&self) -> InstanceId {
        match self {
            Message::Dolev(m) => m.payload.instance(),
            Message::Bracha(m) => m.payload.instance(),
            Message::Rco(m) => m.payload.instance(),
        }
    }

    /// Short label for event logs (`DOLEV`, `ECHO`, ...).
    pub fn kind_label(&self) -> &'static str {
        match self {
            Message::Dolev(_) => "DOLEV",
            Message::Bracha(m) => m.payload.kind.name(),
            Message::Rco(m) => m.payload.kind.name(),
        }
    }

    /// Dolev path carried by the envelope.
    pub fn path(&self) -> &[NodeId] {
        match self {
            Message::Dolev(m) => &m.path,
            Message::Bracha(m) => &m.path,
            Message::Rco(m) => &m.path,
        }
    }

    /// Rewrites the vector clock of an RCO message about `broadcaster`'s
    /// own instance. Returns false when nothing was rewritten.
    pub fn rewrite_own_clock(&mut self, broadcaster: NodeId, rewrite: impl FnOnce(&mut VectorClock)) -> bool {
        match self {
            Message::Rco(m) if m.payload.instance.broadcaster == broadcaster => {
                rewrite(&mut m.payload.payload.clock);
                true
            }
            _ => false,
        }
    }

    /// A Dolev payload for the same instance that claims to come straight
    /// from the instance's broadcaster via `local`. Only forged off
    /// `local`'s post-delivery announcement of someone else's instance.
    pub fn forge_origin(&self, local: NodeId) -> Option<Message> {
        let Message::Dolev(m) = self else {
            return None;
        };
        let instance = m.payload.instance;
        if m.path != [local] || instance.broadcaster == local {
            return None;
        }
        Some(Message::Dolev(DolevMessage {
            origin: instance.broadcaster,
            payload: AppMessage {
                instance,
                payload: forged_payload(instance),
            },
            path: vec![instance.broadcaster, local],
        }))
    }

    /// Conflicting ECHO and READY that accompany `local`'s own ECHO.
    pub fn forge_votes(&self, local: NodeId) -> Vec<Message> {
        fn votes<P: Clone>(
            m: &DolevMessage<BrachaMessage<P>>,
            local: NodeId,
            forged: P,
        ) -> Option<[DolevMessage<BrachaMessage<P>>; 2]> {
            if m.origin != local || m.path != [local] || m.payload.kind != BrachaKind::Echo {
                return None;
            }
            let vote = |kind| DolevMessage {
                origin: local,
                payload: BrachaMessage {
                    kind,
                    instance: m.payload.instance,
                    payload: forged.clone(),
                },
                path: vec![local],
            };
            Some([vote(BrachaKind::Echo), vote(BrachaKind::Ready)])
        }

        match self {
            Message::Dolev(_) => Vec::new(),
            Message::Bracha(m) => votes(m, local, forged_payload(m.payload.instance))
                .map_or_else(Vec::new, |v| v.into_iter().map(Message::Bracha).collect()),
            Message::Rco(m) => {
                let forged = RcoData {
                    clock: m.payload.payload.clock.clone(),
                    payload: forged_payload(m.payload.instance),
                };
                votes(m, local, forged)
                    .map_or_else(Vec::new, |v| v.into_iter().map(Message::Rco).collect())
            }
        }
    }
}

/// Payload Byzantine nodes substitute for `instance`.
pub fn forged_payload(instance: InstanceId) -> Payload {
    Payload::from(format!("FORGED-{}", instance))
}

/// Why a node is sending: its own application broadcast, or protocol
/// propagation triggered by a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendClass {
    Origin,
    Relay,
}

/// One fan-out: the same message to several neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multicast<M> {
    pub targets: Vec<NodeId>,
    pub message: M,
    pub class: SendClass,
}

impl<M> Multicast<M> {
    pub fn map<N>(self, f: impl FnOnce(M) -> N) -> Multicast<N> {
        Multicast {
            targets: self.targets,
            message: f(self.message),
            class: self.class,
        }
    }
}
