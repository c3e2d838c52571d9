//! SimWorld - the discrete-event simulation container.
//!
//! One world is one run: a validated configuration, one [`BroadcastNode`]
//! per topology node, a [`SimNetwork`] and the event log. Everything runs
//! on a single thread against the virtual clock.

use crate::context::SimContext;
use crate::error::SimError;
use crate::network::{NetworkStats, SimNetwork};

use rbcast_core::{
    millis, BroadcastNode, EventLog, EventSink, InstanceId, NodeOutput, Payload, ProtocolEvent, ProtocolKind,
    RunConfig, Topology, TracingSink,
};
use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seed of the link delay stream for a run seeded with `seed`.
pub fn delay_seed(seed: u64) -> u64 {
    seed.wrapping_mul(0x9e3779b97f4a7c15)
}

/// Application payload of broadcast number `index`.
pub fn payload_for(index: usize) -> Payload {
    Payload::from(format!("Message-{}", index))
}

/// Final state of one broadcast instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstanceOutcome {
    /// Every correct node delivered
    Delivered,

    /// The run ended before these correct nodes delivered
    DeliveryTimeout { missing: Vec<NodeId> },
}

impl InstanceOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, InstanceOutcome::Delivered)
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every scheduled instance delivered at every correct node
    Complete,
    /// No message left in flight
    Quiescent,
    /// Virtual time passed the configured timeout
    Timeout,
}

/// Result of [`SimWorld::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub protocol: ProtocolKind,
    pub seed: u64,
    pub outcomes: BTreeMap<InstanceId, InstanceOutcome>,
    pub stop: StopReason,
    pub elapsed_ms: u64,
    pub stats: NetworkStats,
}

impl RunReport {
    pub fn outcome(&self, instance: InstanceId) -> Option<&InstanceOutcome> {
        self.outcomes.get(&instance)
    }

    pub fn all_delivered(&self) -> bool {
        self.outcomes.values().all(InstanceOutcome::is_delivered)
    }

    /// Instances of `broadcaster`, in sequence order.
    pub fn instances_of(&self, broadcaster: NodeId) -> impl Iterator<Item = (&InstanceId, &InstanceOutcome)> {
        self.outcomes
            .iter()
            .filter(move |(instance, _)| instance.broadcaster == broadcaster)
    }
}

/// Records into the in-memory log and mirrors every event to `tracing`.
struct WorldSink {
    log: EventLog,
    tracing: TracingSink,
}

impl EventSink for WorldSink {
    fn record(&mut self, at: Duration, event: ProtocolEvent) {
        self.tracing.record(at, event.clone());
        self.log.record(at, event);
    }
}

/// The simulation world.
pub struct SimWorld {
    config: RunConfig,
    nodes: Vec<BroadcastNode>,
    network: SimNetwork,
    sink: WorldSink,
    scheduled: Vec<InstanceId>,
}

impl SimWorld {
    /// Validates `config` against `topology` and builds the nodes.
    pub fn new(topology: Topology, config: RunConfig) -> Result<Self, SimError> {
        config.validate(&topology)?;

        let nodes = topology
            .nodes()
            .map(|id| BroadcastNode::from_config(&topology, &config, id))
            .collect();
        let context = SimContext::new(delay_seed(config.seed));
        let network = SimNetwork::new(topology, context, config.min_delay(), config.max_delay());

        Ok(Self {
            config,
            nodes,
            network,
            sink: WorldSink {
                log: EventLog::new(),
                tracing: TracingSink,
            },
            scheduled: Vec::new(),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        self.network.topology()
    }

    pub fn log(&self) -> &EventLog {
        &self.sink.log
    }

    pub fn into_log(self) -> EventLog {
        self.sink.log
    }

    pub fn node(&self, id: NodeId) -> Option<&BroadcastNode> {
        self.nodes.get(id.index())
    }

    /// Ids of nodes playing the correct role.
    pub fn correct_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.role().is_correct())
            .map(|node| node.id())
            .collect()
    }

    /// Runs the broadcast schedule to completion, quiescence or timeout.
    pub fn run(&mut self) -> RunReport {
        info!(
            "Running {} on {} nodes (f={}, byzantine={:?} as {}, seed={})",
            self.config.protocol,
            self.nodes.len(),
            self.config.faults,
            self.config.byzantine_nodes,
            self.config.behavior,
            self.config.seed
        );

        self.initiate_schedule();

        let timeout = self.config.timeout();
        let stop = loop {
            if self.is_complete() {
                break StopReason::Complete;
            }
            match self.network.peek_time() {
                None => break StopReason::Quiescent,
                Some(at) if at > timeout => break StopReason::Timeout,
                Some(_) => {}
            }
            if let Some(delivery) = self.network.advance() {
                self.step(delivery.from, delivery.to, delivery.message);
            }
        };

        let report = RunReport {
            protocol: self.config.protocol,
            seed: self.config.seed,
            outcomes: self.outcomes(),
            stop,
            elapsed_ms: millis(self.network.now()),
            stats: self.network.stats(),
        };
        debug!("Run stopped ({:?}) at {}ms: {:?}", stop, report.elapsed_ms, report.stats);
        report
    }

    /// All broadcasts start at t=0, in broadcaster order.
    fn initiate_schedule(&mut self) {
        let broadcasters = self.config.broadcasters.clone();
        for broadcaster in broadcasters {
            for index in 0..self.config.broadcasts {
                let (instance, output) = self.nodes[broadcaster.index()].broadcast(payload_for(index));
                debug!("Node {} initiated {}", broadcaster, instance);
                self.scheduled.push(instance);
                self.dispatch(broadcaster, output);
            }
        }
    }

    fn step(&mut self, from: NodeId, to: NodeId, message: rbcast_core::Message) {
        let now = self.network.now();
        self.sink.record(
            now,
            ProtocolEvent::MessageReceived {
                from,
                to,
                protocol: message.protocol(),
                kind: message.kind_label().to_string(),
                instance: message.instance(),
            },
        );

        let output = self.nodes[to.index()].handle(from, message);
        self.dispatch(to, output);
    }

    fn dispatch(&mut self, from: NodeId, output: NodeOutput) {
        let now = self.network.now();
        output.report(from, now, &mut self.sink);

        let suppressed: usize = output.suppressed.iter().map(|s| s.targets.len()).sum();
        self.network.record_suppressed(suppressed);

        for send in output.sends {
            for target in send.targets {
                let event = ProtocolEvent::MessageSent {
                    from,
                    to: target,
                    protocol: send.message.protocol(),
                    kind: send.message.kind_label().to_string(),
                    instance: send.message.instance(),
                };
                match self.network.send(from, target, send.message.clone()) {
                    Ok(_) => self.sink.record(now, event),
                    Err(err) => warn!("Node {} send dropped: {}", from, err),
                }
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.scheduled.iter().all(|instance| {
            self.nodes
                .iter()
                .filter(|node| node.role().is_correct())
                .all(|node| node.is_delivered(*instance))
        })
    }

    fn outcomes(&self) -> BTreeMap<InstanceId, InstanceOutcome> {
        self.scheduled
            .iter()
            .map(|instance| {
                let missing: Vec<NodeId> = self
                    .nodes
                    .iter()
                    .filter(|node| node.role().is_correct() && !node.is_delivered(*instance))
                    .map(|node| node.id())
                    .collect();
                let outcome = if missing.is_empty() {
                    InstanceOutcome::Delivered
                } else {
                    InstanceOutcome::DeliveryTimeout { missing }
                };
                (*instance, outcome)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Oracle;
    use rbcast_core::{BrachaOptions, ByzantineBehavior, ConfigError};

    fn dolev_config(faults: usize) -> RunConfig {
        RunConfig {
            protocol: ProtocolKind::Dolev,
            faults,
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config_is_rejected_before_running() {
        let config = RunConfig {
            protocol: ProtocolKind::Bracha,
            faults: 1,
            ..Default::default()
        };

        let err = SimWorld::new(Topology::complete(3), config).err();
        assert!(matches!(
            err,
            Some(SimError::Config(ConfigError::InvalidFaultConfiguration(_)))
        ));
    }

    #[test]
    fn test_dolev_complete_graph_delivers_everywhere() {
        let mut world = SimWorld::new(Topology::complete(5), dolev_config(1)).unwrap();
        let report = world.run();

        assert_eq!(report.stop, StopReason::Complete);
        assert!(report.all_delivered());
        assert_eq!(world.log().deliveries().count(), 5);
        assert!(report.stats.scheduled > 0);
    }

    #[test]
    fn test_runs_are_reproducible() {
        let topology = Topology::circulant(8, 4).unwrap();
        let config = RunConfig {
            broadcasters: vec![NodeId(0), NodeId(3)],
            broadcasts: 2,
            ..dolev_config(1)
        };

        let mut a = SimWorld::new(topology.clone(), config.clone()).unwrap();
        let mut b = SimWorld::new(topology, config).unwrap();
        a.run();
        b.run();

        assert_eq!(a.log().events(), b.log().events());
    }

    #[test]
    fn test_sequences_are_per_broadcaster() {
        let config = RunConfig {
            broadcasters: vec![NodeId(1), NodeId(2)],
            broadcasts: 2,
            ..dolev_config(0)
        };
        let mut world = SimWorld::new(Topology::complete(3), config).unwrap();
        let report = world.run();

        let ids: Vec<InstanceId> = report.outcomes.keys().copied().collect();
        assert_eq!(
            ids,
            vec![
                InstanceId::new(NodeId(1), 0),
                InstanceId::new(NodeId(1), 1),
                InstanceId::new(NodeId(2), 0),
                InstanceId::new(NodeId(2), 1),
            ]
        );
    }

    #[test]
    fn test_timeout_reports_missing_nodes() {
        // Ring below the 2f+1 bound with a silent relay at node 2
        let config = RunConfig {
            faults: 1,
            byzantine_nodes: vec![NodeId(2)],
            behavior: ByzantineBehavior::NoRelay,
            skip_connectivity_check: true,
            ..dolev_config(1)
        };
        let mut world = SimWorld::new(Topology::ring(6), config).unwrap();
        let report = world.run();

        assert_eq!(report.stop, StopReason::Quiescent);
        match report.outcome(InstanceId::new(NodeId(0), 0)) {
            Some(InstanceOutcome::DeliveryTimeout { missing }) => assert!(!missing.is_empty()),
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(report.stats.suppressed > 0);
    }

    fn judged(world: &SimWorld, report: &RunReport) -> Vec<crate::oracle::Violation> {
        Oracle::new(world.correct_nodes()).check_all(world.log(), report)
    }

    fn forged_deliveries(world: &SimWorld) -> usize {
        let correct = world.correct_nodes();
        world
            .log()
            .deliveries()
            .filter(|(node, _, payload, _)| correct.contains(node) && payload.to_string().starts_with("FORGED"))
            .count()
    }

    #[test]
    fn test_forged_origin_is_never_delivered() {
        let config = RunConfig {
            byzantine_nodes: vec![NodeId(3)],
            behavior: ByzantineBehavior::ForgeSender,
            broadcasters: vec![NodeId(0), NodeId(1)],
            ..dolev_config(1)
        };
        let mut world = SimWorld::new(Topology::complete(5), config.clone()).unwrap();
        let report = world.run();

        assert!(report.all_delivered());
        assert!(judged(&world, &report).is_empty());
        assert_eq!(forged_deliveries(&world), 0);

        // The forgeries did go out
        let honest = RunConfig {
            behavior: ByzantineBehavior::PassThrough,
            ..config
        };
        let mut baseline = SimWorld::new(Topology::complete(5), honest).unwrap();
        assert!(report.stats.scheduled > baseline.run().stats.scheduled);
    }

    #[test]
    fn test_colluders_cannot_agree_on_a_forgery() {
        for echo_amplification in [false, true] {
            let config = RunConfig {
                protocol: ProtocolKind::Bracha,
                faults: 2,
                byzantine_nodes: vec![NodeId(5), NodeId(6)],
                behavior: ByzantineBehavior::Collude,
                bracha: BrachaOptions {
                    echo_amplification,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut world = SimWorld::new(Topology::complete(7), config).unwrap();
            let report = world.run();

            assert!(report.all_delivered(), "amplification {}", echo_amplification);
            assert!(judged(&world, &report).is_empty());
            assert_eq!(forged_deliveries(&world), 0);
        }
    }

    #[test]
    fn test_deflated_clocks_only_stall_the_deflater() {
        let config = RunConfig {
            protocol: ProtocolKind::Rco,
            faults: 1,
            byzantine_nodes: vec![NodeId(4)],
            behavior: ByzantineBehavior::VectorClockDeflation,
            broadcasters: vec![NodeId(0), NodeId(4)],
            broadcasts: 2,
            ..Default::default()
        };
        let mut world = SimWorld::new(Topology::complete(5), config).unwrap();
        let report = world.run();

        assert!(report.instances_of(NodeId(0)).all(|(_, outcome)| outcome.is_delivered()));
        for (_, outcome) in report.instances_of(NodeId(4)) {
            assert_eq!(
                outcome,
                &InstanceOutcome::DeliveryTimeout {
                    missing: NodeId::range(4).collect()
                }
            );
        }
        assert!(judged(&world, &report).is_empty());
    }

    #[test]
    fn test_dropped_dependencies_keep_everything_delivered() {
        let config = RunConfig {
            protocol: ProtocolKind::Rco,
            faults: 1,
            byzantine_nodes: vec![NodeId(4)],
            behavior: ByzantineBehavior::RcoDropMessages,
            broadcasters: vec![NodeId(0), NodeId(1), NodeId(4)],
            broadcasts: 2,
            ..Default::default()
        };
        let mut world = SimWorld::new(Topology::complete(5), config).unwrap();
        let report = world.run();

        assert!(report.all_delivered());
        assert_eq!(report.stop, StopReason::Complete);
        assert!(judged(&world, &report).is_empty());
    }
}
