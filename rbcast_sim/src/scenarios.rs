//! Broadcast scenarios.
//!
//! Each scenario fixes a topology and a run configuration, and states what
//! the run must show: either every property holds, or a specific liveness
//! failure is expected.

use rbcast_core::{BrachaOptions, ByzantineBehavior, ProtocolKind, RunConfig, Topology};
use rbcast_env::NodeId;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Bracha, n=10, f=1, no Byzantine node
    BrachaBaseline,

    /// Dolev, n=10, f=1, limited_broadcast configured but nobody Byzantine
    DolevLimitedNoop,

    /// RCO, n=5, f=1, a vc_inflation broadcaster next to a correct one
    RcoVcInflation,

    /// Dolev on a ring (connectivity 2f) with a no_relay node
    DolevConnectivityBoundary,

    // ═══════════════════════════════════════════════════
    // RESILIENCE SCENARIOS - within the fault bound
    // ═══════════════════════════════════════════════════

    /// Dolev, n=10, 4-connected, one no_relay node
    DolevNoRelay,

    /// Bracha over a partial topology with one no_relay node
    BrachaNoRelay,

    /// RCO, three broadcasters with two broadcasts each
    RcoCausal,
}

/// What a scenario must demonstrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Every instance delivered at every correct node, no violation
    AllDelivered,

    /// Some correct node never delivers the correct broadcaster's message
    CorrectNodeMissing,

    /// Correct broadcasters' instances delivered everywhere, every
    /// Byzantine broadcaster's instance delivered nowhere
    ByzantineStalled,
}

/// A fully specified run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: ScenarioId,
    pub topology: Topology,
    pub config: RunConfig,
    pub expectation: Expectation,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::BrachaBaseline,
            ScenarioId::DolevLimitedNoop,
            ScenarioId::RcoVcInflation,
            ScenarioId::DolevConnectivityBoundary,
            ScenarioId::DolevNoRelay,
            ScenarioId::BrachaNoRelay,
            ScenarioId::RcoCausal,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::BrachaBaseline => "bracha_baseline",
            ScenarioId::DolevLimitedNoop => "dolev_limited_noop",
            ScenarioId::RcoVcInflation => "rco_vc_inflation",
            ScenarioId::DolevConnectivityBoundary => "dolev_connectivity_boundary",
            ScenarioId::DolevNoRelay => "dolev_no_relay",
            ScenarioId::BrachaNoRelay => "bracha_no_relay",
            ScenarioId::RcoCausal => "rco_causal",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::BrachaBaseline => "Bracha n=10 f=1, one broadcast, all 10 nodes deliver",
            ScenarioId::DolevLimitedNoop => "limited_broadcast without Byzantine nodes has no effect",
            ScenarioId::RcoVcInflation => "inflated vector clocks stall only the Byzantine broadcaster",
            ScenarioId::DolevConnectivityBoundary => "connectivity 2f is not enough for Dolev",
            ScenarioId::DolevNoRelay => "Dolev tolerates f silent relays at connectivity 2f+1",
            ScenarioId::BrachaNoRelay => "Bracha over Dolev tolerates a silent relay",
            ScenarioId::RcoCausal => "concurrent RCO broadcasts respect causal order",
        }
    }

    /// Builds the scenario for `seed`.
    pub fn build(&self, seed: u64) -> Scenario {
        let base = RunConfig {
            seed,
            debug_level: 0,
            ..Default::default()
        };

        let (topology, config, expectation) = match self {
            ScenarioId::BrachaBaseline => (
                Topology::complete(10),
                RunConfig {
                    protocol: ProtocolKind::Bracha,
                    faults: 1,
                    ..base
                },
                Expectation::AllDelivered,
            ),
            ScenarioId::DolevLimitedNoop => (
                circulant(10, 4),
                RunConfig {
                    protocol: ProtocolKind::Dolev,
                    faults: 1,
                    behavior: ByzantineBehavior::LimitedBroadcast(2),
                    ..base
                },
                Expectation::AllDelivered,
            ),
            ScenarioId::RcoVcInflation => (
                Topology::complete(5),
                RunConfig {
                    protocol: ProtocolKind::Rco,
                    faults: 1,
                    byzantine_nodes: vec![NodeId(4)],
                    behavior: ByzantineBehavior::VectorClockInflation,
                    broadcasters: vec![NodeId(0), NodeId(4)],
                    ..base
                },
                Expectation::ByzantineStalled,
            ),
            ScenarioId::DolevConnectivityBoundary => (
                Topology::ring(10),
                RunConfig {
                    protocol: ProtocolKind::Dolev,
                    faults: 1,
                    byzantine_nodes: vec![NodeId(5)],
                    behavior: ByzantineBehavior::NoRelay,
                    skip_connectivity_check: true,
                    ..base
                },
                Expectation::CorrectNodeMissing,
            ),
            ScenarioId::DolevNoRelay => (
                circulant(10, 4),
                RunConfig {
                    protocol: ProtocolKind::Dolev,
                    faults: 1,
                    byzantine_nodes: vec![NodeId(5)],
                    behavior: ByzantineBehavior::NoRelay,
                    ..base
                },
                Expectation::AllDelivered,
            ),
            ScenarioId::BrachaNoRelay => (
                circulant(7, 4),
                RunConfig {
                    protocol: ProtocolKind::Bracha,
                    faults: 1,
                    byzantine_nodes: vec![NodeId(3)],
                    behavior: ByzantineBehavior::NoRelay,
                    bracha: BrachaOptions {
                        echo_amplification: true,
                        ..Default::default()
                    },
                    ..base
                },
                Expectation::AllDelivered,
            ),
            ScenarioId::RcoCausal => (
                Topology::complete(4),
                RunConfig {
                    protocol: ProtocolKind::Rco,
                    faults: 1,
                    broadcasters: vec![NodeId(0), NodeId(1), NodeId(2)],
                    broadcasts: 2,
                    ..base
                },
                Expectation::AllDelivered,
            ),
        };

        Scenario {
            id: *self,
            topology,
            config,
            expectation,
        }
    }
}

/// Circulant graph for parameters known to be valid.
fn circulant(n: usize, k: usize) -> Topology {
    Topology::circulant(n, k).unwrap_or_else(|_| Topology::complete(n))
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bracha_baseline" | "bracha" => Ok(ScenarioId::BrachaBaseline),
            "dolev_limited_noop" => Ok(ScenarioId::DolevLimitedNoop),
            "rco_vc_inflation" | "vc_inflation" => Ok(ScenarioId::RcoVcInflation),
            "dolev_connectivity_boundary" | "boundary" => Ok(ScenarioId::DolevConnectivityBoundary),
            "dolev_no_relay" => Ok(ScenarioId::DolevNoRelay),
            "bracha_no_relay" => Ok(ScenarioId::BrachaNoRelay),
            "rco_causal" | "rco" => Ok(ScenarioId::RcoCausal),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
        }
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_every_scenario_config_validates() {
        for id in ScenarioId::all() {
            let scenario = id.build(42);
            assert!(
                scenario.config.validate(&scenario.topology).is_ok(),
                "{} is invalid",
                id
            );
        }
    }

    #[test]
    fn test_boundary_scenario_is_below_the_bound() {
        let scenario = ScenarioId::DolevConnectivityBoundary.build(1);
        assert_eq!(scenario.topology.connectivity(), 2 * scenario.config.faults);
    }
}
