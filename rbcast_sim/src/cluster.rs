//! Actor mode: one tokio task per node over [`ChannelNetwork`].
//!
//! The protocol engines are the same ones the discrete-event world drives.
//! Only the transport changes: packets are encoded, travel through channels
//! with a random delay, and each node task owns its engine state.

use crate::channel::ChannelNetwork;
use crate::error::SimError;
use crate::network::NetworkStats;
use crate::world::{payload_for, InstanceOutcome, RunReport, StopReason};

use rbcast_core::{
    millis, BroadcastNode, EventLog, EventSink, InstanceId, NodeRuntime, ProtocolEvent, RunConfig, Topology,
    TracingSink,
};
use rbcast_env::{BroadcastContext, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Event sink of one node task. Deliveries are also reported to the
/// cluster so it knows when to stop.
struct ClusterSink {
    log: EventLog,
    tracing: TracingSink,
    delivered: mpsc::UnboundedSender<(NodeId, InstanceId)>,
}

impl EventSink for ClusterSink {
    fn record(&mut self, at: Duration, event: ProtocolEvent) {
        if let ProtocolEvent::Delivered { node, instance, .. } = &event {
            let _ = self.delivered.send((*node, *instance));
        }
        self.tracing.record(at, event.clone());
        self.log.record(at, event);
    }
}

/// A validated cluster ready to run in actor mode.
pub struct ChannelCluster {
    topology: Topology,
    config: RunConfig,
}

impl ChannelCluster {
    pub fn new(topology: Topology, config: RunConfig) -> Result<Self, SimError> {
        config.validate(&topology)?;
        Ok(Self { topology, config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Scheduled instance ids, in broadcaster order.
    fn instances(&self) -> Vec<InstanceId> {
        self.config
            .broadcasters
            .iter()
            .flat_map(|b| (0..self.config.broadcasts as u64).map(move |i| InstanceId::new(*b, i)))
            .collect()
    }

    /// Runs every node until all scheduled instances are delivered at every
    /// correct node, or the configured timeout elapses in wall time.
    pub async fn run<Ctx: BroadcastContext>(&self, context: Arc<Ctx>) -> Result<(RunReport, EventLog), SimError> {
        let started = context.now();
        let (networks, shutdown) = ChannelNetwork::mesh(
            &self.topology,
            Arc::clone(&context),
            self.config.min_delay(),
            self.config.max_delay(),
        );
        let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();

        let correct: BTreeSet<NodeId> = self
            .topology
            .nodes()
            .filter(|id| self.config.role_of(*id).is_correct())
            .collect();
        let instances = self.instances();

        info!(
            "Starting {} actors for {} ({} instances)",
            networks.len(),
            self.config.protocol,
            instances.len()
        );

        let mut handles = Vec::with_capacity(networks.len());
        for (id, network) in self.topology.nodes().zip(networks) {
            let node = BroadcastNode::from_config(&self.topology, &self.config, id);
            let schedule: Vec<_> = if self.config.broadcasters.contains(&id) {
                (0..self.config.broadcasts).map(payload_for).collect()
            } else {
                Vec::new()
            };
            let sink = ClusterSink {
                log: EventLog::new(),
                tracing: TracingSink,
                delivered: delivered_tx.clone(),
            };
            let context = Arc::clone(&context);

            handles.push(tokio::spawn(async move {
                let mut runtime = NodeRuntime::new(node, context, network, sink);
                let result = runtime.run(schedule).await;
                (runtime.into_sink().log, result)
            }));
        }
        drop(delivered_tx);

        let mut outstanding: BTreeSet<(NodeId, InstanceId)> = correct
            .iter()
            .flat_map(|node| instances.iter().map(move |instance| (*node, *instance)))
            .collect();

        let wait = async {
            while !outstanding.is_empty() {
                match delivered_rx.recv().await {
                    Some(delivery) => {
                        outstanding.remove(&delivery);
                    }
                    None => break,
                }
            }
        };
        let waited = tokio::time::timeout(self.config.timeout(), wait).await;
        let stop = match waited {
            Ok(()) if outstanding.is_empty() => StopReason::Complete,
            Ok(()) => StopReason::Quiescent,
            Err(_) => StopReason::Timeout,
        };
        debug!("Cluster stopping ({:?}), {} deliveries outstanding", stop, outstanding.len());

        let _ = shutdown.send(true);

        let mut log = EventLog::new();
        for handle in handles {
            let (node_log, result) = handle.await.map_err(|e| SimError::Task(e.to_string()))?;
            if let Err(err) = &result {
                warn!("Node task ended with error: {}", err);
            }
            result?;
            log.extend(node_log);
        }
        log.sort_by_time();

        let outcomes = instances
            .iter()
            .map(|instance| {
                let missing: Vec<NodeId> = outstanding
                    .iter()
                    .filter(|(_, pending)| pending == instance)
                    .map(|(node, _)| *node)
                    .collect();
                let outcome = if missing.is_empty() {
                    InstanceOutcome::Delivered
                } else {
                    InstanceOutcome::DeliveryTimeout { missing }
                };
                (*instance, outcome)
            })
            .collect::<BTreeMap<_, _>>();

        let report = RunReport {
            protocol: self.config.protocol,
            seed: self.config.seed,
            outcomes,
            stop,
            elapsed_ms: millis(context.now().saturating_sub(started)),
            stats: stats_from_log(&log),
        };
        Ok((report, log))
    }
}

/// Traffic counters rebuilt from the merged event log.
fn stats_from_log(log: &EventLog) -> NetworkStats {
    let mut stats = NetworkStats::default();
    for timed in log.events() {
        match &timed.event {
            ProtocolEvent::MessageSent { .. } => stats.scheduled += 1,
            ProtocolEvent::MessageReceived { .. } => stats.delivered += 1,
            ProtocolEvent::Suppressed { targets, .. } => stats.suppressed += targets.len() as u64,
            _ => {}
        }
    }
    stats
}
