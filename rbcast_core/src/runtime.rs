//! Node Runtime - drives a [`BroadcastNode`] over an environment context.
//!
//! The runtime is the only place where protocol state meets I/O:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                     NodeRuntime                       │
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │  Context: BroadcastContext                      │  │
//! │  │  • now() → event timestamps                     │  │
//! │  └─────────────────────────────────────────────────┘  │
//! │  ┌──────────────┐   decode    ┌────────────────────┐  │
//! │  │ Network      │ ──────────► │  BroadcastNode     │  │
//! │  │ Transport    │ ◄────────── │  (engine + role)   │  │
//! │  └──────────────┘   encode    └────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Generic over the context, transport and event sink so the same loop
//! runs on tokio channels or on any other transport.

use crate::events::{millis, EventSink, ProtocolEvent};
use crate::message::{InstanceId, Payload};
use crate::node::{BroadcastNode, NodeOutput};
use crate::wire;
use rbcast_env::{BroadcastContext, EnvError, NetworkTransport, NodeId, Packet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct NodeRuntime<Ctx, Net, S>
where
    Ctx: BroadcastContext,
    Net: NetworkTransport,
    S: EventSink,
{
    node: BroadcastNode,
    context: Arc<Ctx>,
    network: Arc<Net>,
    sink: S,
    received: u64,
}

impl<Ctx, Net, S> NodeRuntime<Ctx, Net, S>
where
    Ctx: BroadcastContext,
    Net: NetworkTransport,
    S: EventSink + Send,
{
    pub fn new(node: BroadcastNode, context: Arc<Ctx>, network: Arc<Net>, sink: S) -> Self {
        Self {
            node,
            context,
            network,
            sink,
            received: 0,
        }
    }

    pub fn node(&self) -> &BroadcastNode {
        &self.node
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Packets processed so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Broadcasts `schedule` in order, then serves the transport until it
    /// reports shutdown.
    pub async fn run(&mut self, schedule: Vec<Payload>) -> Result<(), EnvError> {
        let id = self.node.id();
        info!(
            "Node {} starting ({}, {:?}, {} scheduled)",
            id,
            self.node.protocol(),
            self.node.role(),
            schedule.len()
        );

        for payload in schedule {
            self.broadcast(payload).await?;
        }

        while let Some((from, packet)) = self.network.recv().await {
            self.process_packet(from, packet).await?;
        }

        debug!("Node {} stopped after {} packets", id, self.received);
        Ok(())
    }

    /// Starts one application broadcast.
    pub async fn broadcast(&mut self, payload: Payload) -> Result<InstanceId, EnvError> {
        let (instance, output) = self.node.broadcast(payload);
        debug!("Node {} initiated {}", self.node.id(), instance);
        self.dispatch(output).await?;
        Ok(instance)
    }

    /// Decodes and handles one packet. Undecodable packets are dropped.
    pub async fn process_packet(&mut self, from: NodeId, packet: Packet) -> Result<(), EnvError> {
        self.received += 1;
        let message = match wire::decode(&packet) {
            Ok(message) => message,
            Err(err) => {
                warn!("Node {} dropping packet from {}: {}", self.node.id(), from, err);
                return Ok(());
            }
        };

        self.sink.record(
            self.context.now(),
            ProtocolEvent::MessageReceived {
                from,
                to: self.node.id(),
                protocol: message.protocol(),
                kind: message.kind_label().to_string(),
                instance: message.instance(),
            },
        );

        let output = self.node.handle(from, message);
        self.dispatch(output).await
    }

    async fn dispatch(&mut self, output: NodeOutput) -> Result<(), EnvError> {
        let id = self.node.id();
        let now = self.context.now();
        output.report(id, now, &mut self.sink);

        for send in output.sends {
            let packet = wire::encode(&send.message, millis(now))?;
            for target in send.targets {
                self.network.send(target, packet.clone()).await?;
                self.sink.record(
                    now,
                    ProtocolEvent::MessageSent {
                        from: id,
                        to: target,
                        protocol: send.message.protocol(),
                        kind: send.message.kind_label().to_string(),
                        instance: send.message.instance(),
                    },
                );
            }
        }
        Ok(())
    }
}
