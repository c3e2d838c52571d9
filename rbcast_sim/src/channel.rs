//! Channel network transport for actor mode.
//!
//! Every node owns an unbounded inbox. A send to a neighbor spawns a link
//! task that sleeps for a delay drawn from the context and then drops the
//! packet into the neighbor's inbox, so messages on one link may overtake
//! each other just like in the discrete-event network.

use async_trait::async_trait;
use rbcast_core::Topology;
use rbcast_env::{BroadcastContext, EnvError, NetworkTransport, NodeId, Packet};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::trace;

type Inbox = mpsc::UnboundedSender<(NodeId, Packet)>;

/// Channel-backed transport of one node.
pub struct ChannelNetwork<Ctx: BroadcastContext> {
    /// This node's ID
    local_id: NodeId,

    context: Arc<Ctx>,

    /// Inboxes of the neighbors, the only nodes this one can reach
    peers: BTreeMap<NodeId, Inbox>,

    /// Receiver for incoming packets (behind tokio mutex for async)
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(NodeId, Packet)>>,

    /// Flips to true when the cluster stops
    shutdown: watch::Receiver<bool>,

    min_delay: Duration,
    max_delay: Duration,
}

impl<Ctx: BroadcastContext> ChannelNetwork<Ctx> {
    /// Wires one transport per topology node. Dropping the returned sender
    /// or sending `true` on it makes every `recv` return `None`.
    pub fn mesh(
        topology: &Topology,
        context: Arc<Ctx>,
        min_delay: Duration,
        max_delay: Duration,
    ) -> (Vec<Arc<Self>>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (senders, receivers): (BTreeMap<NodeId, Inbox>, Vec<_>) = topology
            .nodes()
            .map(|id| {
                let (tx, rx) = mpsc::unbounded_channel();
                ((id, tx), rx)
            })
            .unzip();

        let networks = topology
            .nodes()
            .zip(receivers)
            .map(|(id, rx)| {
                let peers = topology
                    .neighbors(id)
                    .iter()
                    .filter_map(|peer| senders.get(peer).map(|tx| (*peer, tx.clone())))
                    .collect();
                Arc::new(Self {
                    local_id: id,
                    context: Arc::clone(&context),
                    peers,
                    rx: tokio::sync::Mutex::new(rx),
                    shutdown: shutdown_rx.clone(),
                    min_delay,
                    max_delay,
                })
            })
            .collect();

        (networks, shutdown_tx)
    }

    /// Neighbors this transport can reach.
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.peers.keys().copied()
    }
}

#[async_trait]
impl<Ctx: BroadcastContext> NetworkTransport for ChannelNetwork<Ctx> {
    async fn send(&self, target: NodeId, packet: Packet) -> Result<(), EnvError> {
        let inbox = self
            .peers
            .get(&target)
            .cloned()
            .ok_or_else(|| EnvError::unreachable(target))?;

        let delay = self.context.sample_delay(self.min_delay, self.max_delay);
        let context = Arc::clone(&self.context);
        let from = self.local_id;
        trace!("link {} -> {} in {:?}", from, target, delay);

        self.context.spawn("link", async move {
            context.sleep(delay).await;
            // A closed inbox means the receiver already stopped
            let _ = inbox.send((from, packet));
        });
        Ok(())
    }

    async fn recv(&self) -> Option<(NodeId, Packet)> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return None;
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            packet = rx.recv() => packet,
        }
    }

    async fn broadcast(&self, packet: Packet) -> usize {
        let mut sent = 0;
        for target in self.peers.keys().copied() {
            if self.send(target, packet.clone()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}
