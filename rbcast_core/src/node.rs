//! A protocol node: engine + role.
//!
//! The node is the send boundary. Every fan-out an engine produces passes
//! through the node's Byzantine behavior before it leaves; correct nodes
//! pass everything through.

use crate::byzantine::Role;
use crate::config::{ProtocolKind, RunConfig};
use crate::engine::{Delivery, EngineParams, Effects, Phase, ProtocolEngine};
use crate::events::{EventSink, ProtocolEvent};
use crate::message::{InstanceId, Message, Multicast, Payload, SendClass};
use crate::topology::Topology;
use rbcast_env::NodeId;
use std::time::Duration;
use tracing::trace;

/// Everything one node step produced, after the injector ran.
#[derive(Debug, Default)]
pub struct NodeOutput {
    pub sends: Vec<Multicast<Message>>,
    /// Fan-outs (or the part of them) dropped by the injector
    pub suppressed: Vec<Multicast<Message>>,
    pub deliveries: Vec<Delivery>,
    pub transitions: Vec<(InstanceId, Phase)>,
}

impl NodeOutput {
    /// Records suppressions, phase changes and deliveries of `node`.
    /// Sends are recorded by whoever puts them on the wire.
    pub fn report(&self, node: NodeId, at: Duration, sink: &mut impl EventSink) {
        for send in &self.suppressed {
            sink.record(
                at,
                ProtocolEvent::Suppressed {
                    node,
                    targets: send.targets.clone(),
                    kind: send.message.kind_label().to_string(),
                    instance: send.message.instance(),
                },
            );
        }
        for (instance, phase) in &self.transitions {
            if *phase == Phase::Delivered {
                continue;
            }
            sink.record(
                at,
                ProtocolEvent::PhaseTransition {
                    node,
                    instance: *instance,
                    phase: *phase,
                },
            );
        }
        for delivery in &self.deliveries {
            sink.record(at, ProtocolEvent::delivered(node, delivery.clone()));
        }
    }

    /// Total number of point-to-point messages to put on the wire.
    pub fn message_count(&self) -> usize {
        self.sends.iter().map(|send| send.targets.len()).sum()
    }
}

#[derive(Debug)]
pub struct BroadcastNode {
    id: NodeId,
    role: Role,
    engine: ProtocolEngine,
}

impl BroadcastNode {
    pub fn new(id: NodeId, role: Role, kind: ProtocolKind, params: &EngineParams) -> Self {
        Self {
            id,
            role,
            engine: ProtocolEngine::new(kind, params),
        }
    }

    /// Builds node `id` for a validated configuration.
    pub fn from_config(topology: &Topology, config: &RunConfig, id: NodeId) -> Self {
        let params = EngineParams::for_node(topology, config, id);
        Self::new(id, config.role_of(id), config.protocol, &params)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.engine.kind()
    }

    pub fn is_delivered(&self, instance: InstanceId) -> bool {
        self.engine.is_delivered(instance)
    }

    /// Application broadcast.
    pub fn broadcast(&mut self, payload: Payload) -> (InstanceId, NodeOutput) {
        let mut fx = Effects::new(SendClass::Origin);
        let instance = self.engine.initiate(payload, &mut fx);
        (instance, self.finish(fx))
    }

    /// Handles a message received from neighbor `from`.
    pub fn handle(&mut self, from: NodeId, message: Message) -> NodeOutput {
        let mut fx = Effects::new(SendClass::Relay);
        self.engine.on_message(from, message, &mut fx);
        self.finish(fx)
    }

    fn finish(&self, fx: Effects<Message>) -> NodeOutput {
        let behavior = self.role.behavior();
        let mut output = NodeOutput {
            deliveries: fx.deliveries,
            transitions: fx.transitions,
            ..Default::default()
        };

        for send in fx.sends {
            let forged = behavior.forgeries(self.id, &send);
            let original = send.targets.clone();
            let template = send.message.clone();
            let class = send.class;

            let kept = behavior.apply(self.id, send);
            let kept_targets = kept.as_ref().map(|s| s.targets.clone()).unwrap_or_default();
            let dropped: Vec<NodeId> = original
                .into_iter()
                .filter(|target| !kept_targets.contains(target))
                .collect();

            if !dropped.is_empty() {
                trace!("Node {} ({}) dropped {:?}", self.id, behavior, dropped);
                output.suppressed.push(Multicast {
                    targets: dropped,
                    message: template,
                    class,
                });
            }
            if let Some(send) = kept {
                output.sends.push(send);
            }
            if !forged.is_empty() {
                trace!("Node {} ({}) forging {} fan-outs", self.id, behavior, forged.len());
                output.sends.extend(forged);
            }
        }
        output
    }
}
