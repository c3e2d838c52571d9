//! JSON exporter for offline inspection of a run.
//!
//! Writes the event log together with per-instance outcomes, so a run can be
//! replayed step by step outside the simulator.

use crate::network::NetworkStats;
use crate::oracle::Violation;
use crate::runner::ScenarioResult;
use crate::world::{InstanceOutcome, RunReport, StopReason};

use rbcast_core::{EventLog, ProtocolKind, TimedEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Protocol that ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolKind>,

    /// Why the run stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,

    /// Virtual duration in milliseconds
    pub duration_ms: u64,

    /// Outcome per broadcast instance, keyed by `broadcaster#sequence`
    pub outcomes: BTreeMap<String, InstanceOutcome>,

    pub stats: NetworkStats,

    /// Every recorded event in order
    pub events: Vec<TimedEvent>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            protocol: None,
            stop: None,
            duration_ms: 0,
            outcomes: BTreeMap::new(),
            stats: NetworkStats::default(),
            events: Vec::new(),
            violations: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Builds the export of a finished scenario.
    pub fn from_result(result: &ScenarioResult) -> Self {
        let mut export = Self::new(result.scenario.name(), result.seed);
        if let Some(report) = &result.report {
            export.add_report(report);
        }
        export.add_events(&result.log);
        export.violations = result.violations.clone();
        export.finalize(result.passed, result.failure_reason.clone());
        export
    }

    /// Copies outcomes and counters from a run report.
    pub fn add_report(&mut self, report: &RunReport) {
        self.protocol = Some(report.protocol);
        self.stop = Some(report.stop);
        self.duration_ms = report.elapsed_ms;
        self.stats = report.stats;
        self.outcomes = report
            .outcomes
            .iter()
            .map(|(instance, outcome)| (instance.to_string(), outcome.clone()))
            .collect();
    }

    /// Appends the events of `log`.
    pub fn add_events(&mut self, log: &EventLog) {
        self.events.extend(log.events().iter().cloned());
        if let Some(last) = self.events.last() {
            self.duration_ms = self.duration_ms.max(last.at_ms);
        }
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
