//! rbcast Simulator CLI
//!
//! Runs the built-in scenarios, or an ad-hoc broadcast run described on the
//! command line (optionally on top of a JSON run configuration).

use clap::Parser;
use rbcast_core::{ByzantineBehavior, EventLog, ProtocolKind, RunConfig, Topology};
use rbcast_env::TokioContext;
use rbcast_sim::scenarios::ScenarioId;
use rbcast_sim::{
    ChannelCluster, InstanceOutcome, Oracle, RunReport, RunSetup, ScenarioResult, ScenarioRunner, SimError,
    SimExport, SimWorld, TopologyKind, Violation,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Reliable broadcast simulation CLI
#[derive(Parser, Debug)]
#[command(name = "rbcast-sim")]
#[command(about = "Simulate Dolev, Bracha and RCO broadcast under Byzantine faults", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of consecutive seeds to run (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Scenario to run (see --list), or "all"
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// List the available scenarios and exit
    #[arg(long)]
    list: bool,

    /// Run an ad-hoc configuration with this protocol (dolev, bracha, rco)
    #[arg(short, long)]
    protocol: Option<ProtocolKind>,

    /// JSON run configuration used as the base of an ad-hoc run
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of nodes
    #[arg(short, long, default_value = "10")]
    nodes: usize,

    /// Topology: complete, ring, circulant:<k>, regular:<d>
    #[arg(short, long, default_value = "complete")]
    topology: TopologyKind,

    /// Tolerated faults f
    #[arg(short, long)]
    faults: Option<usize>,

    /// Number of Byzantine nodes, picked by the seed
    #[arg(long)]
    byzantine: Option<usize>,

    /// Byzantine behavior (none, no_relay, limited_broadcast, vc_inflation,
    /// vc_deflation, rco_drop_messages, forge_sender, collude)
    #[arg(long, default_value = "none")]
    behavior: String,

    /// Neighbors kept by limited_broadcast
    #[arg(long, default_value = "1")]
    limited_neighbors: usize,

    /// Number of broadcasters, picked by the seed
    #[arg(long)]
    broadcasters: Option<usize>,

    /// Broadcasts per broadcaster
    #[arg(long)]
    broadcasts: Option<usize>,

    /// Minimum message delay (ms)
    #[arg(long)]
    min_delay: Option<u64>,

    /// Maximum message delay (ms)
    #[arg(long)]
    max_delay: Option<u64>,

    /// Run timeout (ms)
    #[arg(long)]
    timeout: Option<u64>,

    /// Bracha: echo amplification
    #[arg(long)]
    echo_amplification: bool,

    /// Bracha: designated ECHO / READY subsets
    #[arg(long)]
    reduced_messages: bool,

    /// Bracha: SEND to direct neighbors only
    #[arg(long)]
    single_hop_send: bool,

    /// Accept topologies below the 2f+1 connectivity bound
    #[arg(long)]
    skip_connectivity_check: bool,

    /// Run nodes as tokio tasks over channels instead of the discrete-event world
    #[arg(long)]
    actors: bool,

    /// 0 = silent, 1 = deliveries only, 2 = every event (overrides the config file)
    #[arg(short, long)]
    debug: Option<u8>,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the event log and outcomes to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn init_logging(config: &RunConfig, json: bool) {
    let level = if json { "warn" } else { config.log_directive() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// One finished ad-hoc run.
struct AdHocRun {
    seed: u64,
    report: RunReport,
    violations: Vec<Violation>,
    log: EventLog,
}

impl AdHocRun {
    fn passed(&self) -> bool {
        self.report.all_delivered() && self.violations.is_empty()
    }

    fn failure_reason(&self) -> Option<String> {
        if let Some(violation) = self.violations.first() {
            return Some(violation.to_string());
        }
        self.report
            .outcomes
            .iter()
            .find_map(|(instance, outcome)| match outcome {
                InstanceOutcome::DeliveryTimeout { missing } => {
                    Some(format!("{} missing at {:?}", instance, missing))
                }
                InstanceOutcome::Delivered => None,
            })
    }
}

fn base_config(args: &Args, seed: u64) -> Result<RunConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
            serde_json::from_str::<RunConfig>(&text).map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => RunConfig::default(),
    };

    config.seed = seed;
    if let Some(debug) = args.debug {
        config.debug_level = debug;
    }
    if let Some(protocol) = args.protocol {
        config.protocol = protocol;
    }
    if let Some(faults) = args.faults {
        config.faults = faults;
    }
    if args.behavior != "none" || args.config.is_none() {
        config.behavior = ByzantineBehavior::parse(&args.behavior, args.limited_neighbors)?;
    }
    if let Some(broadcasts) = args.broadcasts {
        config.broadcasts = broadcasts;
    }
    if let Some(min) = args.min_delay {
        config.min_delay_ms = min;
    }
    if let Some(max) = args.max_delay {
        config.max_delay_ms = max;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    config.bracha.echo_amplification |= args.echo_amplification;
    config.bracha.reduced_messages |= args.reduced_messages;
    config.bracha.single_hop_send |= args.single_hop_send;
    config.skip_connectivity_check |= args.skip_connectivity_check;
    Ok(config)
}

fn run_ad_hoc(args: &Args, topology: Topology, config: RunConfig) -> Result<AdHocRun, SimError> {
    let seed = config.seed;
    let (report, log, correct) = if args.actors {
        let cluster = ChannelCluster::new(topology.clone(), config.clone())?;
        let runtime = tokio::runtime::Runtime::new().map_err(|e| SimError::Task(e.to_string()))?;
        let (report, log) = runtime.block_on(cluster.run(TokioContext::shared()))?;
        let correct: Vec<_> = topology
            .nodes()
            .filter(|id| config.role_of(*id).is_correct())
            .collect();
        (report, log, correct)
    } else {
        let mut world = SimWorld::new(topology, config)?;
        let report = world.run();
        let correct = world.correct_nodes();
        (report, world.into_log(), correct)
    };

    let violations = Oracle::new(correct).check_all(&log, &report);
    Ok(AdHocRun {
        seed,
        report,
        violations,
        log,
    })
}

fn print_outcomes(report: &RunReport) {
    for (instance, outcome) in &report.outcomes {
        match outcome {
            InstanceOutcome::Delivered => info!("  {} delivered at every correct node", instance),
            InstanceOutcome::DeliveryTimeout { missing } => {
                info!("  {} DELIVERY TIMEOUT, missing {:?}", instance, missing)
            }
        }
    }
}

fn main() {
    let args = Args::parse();
    // Errors in the base configuration are reported by the run itself
    let logging = base_config(&args, args.seed).unwrap_or_default();
    init_logging(&logging, args.json);

    if args.list {
        for id in ScenarioId::all() {
            println!("{:<30} {}", id.name(), id.description());
        }
        return;
    }

    if !args.json {
        info!("rbcast Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(42)
    } else {
        args.seed
    };

    let failed = if args.protocol.is_some() || args.config.is_some() {
        run_ad_hoc_mode(&args, base_seed)
    } else {
        run_scenario_mode(&args, base_seed)
    };

    // Exit with proper code for CI
    if failed > 0 {
        std::process::exit(1);
    }
}

/// Returns the number of failed runs.
fn run_ad_hoc_mode(args: &Args, base_seed: u64) -> usize {
    let setup = RunSetup {
        nodes: args.nodes,
        topology: args.topology,
        byzantine: args.byzantine,
        broadcasters: args.broadcasters,
    };

    let mut runs = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let built = base_config(args, seed)
            .and_then(|config| setup.build(config).map_err(|e| e.to_string()))
            .and_then(|(topology, config)| run_ad_hoc(args, topology, config).map_err(|e| e.to_string()));

        match built {
            Ok(run) => {
                if !args.json {
                    let status = if run.passed() { "✓" } else { "✗" };
                    info!(
                        "{} {} seed={} stop={:?} elapsed={}ms sent={} suppressed={}",
                        status,
                        run.report.protocol,
                        seed,
                        run.report.stop,
                        run.report.elapsed_ms,
                        run.report.stats.scheduled,
                        run.report.stats.suppressed
                    );
                    print_outcomes(&run.report);
                    for violation in &run.violations {
                        error!("  {}", violation);
                    }
                }
                runs.push(run);
            }
            Err(e) => {
                error!("Error: {}", e);
                return 1;
            }
        }
    }

    if let (Some(path), Some(run)) = (&args.export, runs.last()) {
        let mut export = SimExport::new("ad_hoc", run.seed);
        export.add_report(&run.report);
        export.add_events(&run.log);
        export.violations = run.violations.clone();
        export.finalize(run.passed(), run.failure_reason());
        write_export(&export, path);
    }

    let failed = runs.iter().filter(|run| !run.passed()).count();
    if args.json {
        let summary = serde_json::json!({
            "total": runs.len(),
            "passed": runs.len() - failed,
            "failed": failed,
            "results": runs.iter().map(|run| {
                serde_json::json!({
                    "seed": run.seed,
                    "passed": run.passed(),
                    "report": run.report,
                    "violations": run.violations,
                    "failure_reason": run.failure_reason(),
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
    }
    failed
}

/// Returns the number of failed scenario runs.
fn run_scenario_mode(args: &Args, base_seed: u64) -> usize {
    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!(
                    "Available scenarios: {}, all",
                    ScenarioId::all().iter().map(|id| id.name()).collect::<Vec<_>>().join(", ")
                );
                std::process::exit(1);
            }
        }
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed, not 'all'");
        std::process::exit(1);
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    if let (Some(path), Some(result)) = (&args.export, all_results.first()) {
        write_export(&SimExport::from_result(result), path);
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "metrics": r.metrics,
                    "stop": r.report.as_ref().map(|report| report.stop),
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    failed_count
}

fn write_export(export: &SimExport, path: &str) {
    if let Err(e) = export.write_to_file(path) {
        error!("Failed to write export: {:?}", e);
    } else {
        info!("Exported {} events to {}", export.events.len(), path);
    }
}
