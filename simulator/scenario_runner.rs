// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/staged.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/staged.yaml --seed 0x1234...

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hs_rust::hs_arrival::StartTrigger;
use hs_rust::hs_config::{parse_seed_hex, GridConfig, OutputConfig, ProtocolParams, VersionRange};
use hs_rust::hs_metrics::{AnalysisCommand, ReconcileMode};
use hs_rust::{Simulation, SyncConfig, SyncMode};
use simple_logger::SimpleLogger;

/// Scenario file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    meta: ScenarioMeta,

    /// Configuration overrides on top of the mode's preset
    #[serde(default)]
    config: ScenarioConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
    hypothesis: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioConfig {
    #[serde(default)]
    mode: SyncMode,

    // Replaced wholesale; missing fields take their defaults
    grid: Option<GridConfig>,
    versions: Option<VersionRange>,
    protocol: Option<ProtocolParams>,
    output: Option<OutputConfig>,

    // Field-by-field overrides of the preset
    schedule: Option<ScheduleOverrides>,
    poll: Option<PollOverrides>,
    metrics: Option<MetricsOverrides>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScheduleOverrides {
    move_at: Option<f64>,
    move_stagger: Option<f64>,
    start: Option<StartTrigger>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct PollOverrides {
    interval: Option<f64>,
    entry_delay: Option<f64>,
    /// 0 polls forever
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct MetricsOverrides {
    /// Empty string disables the metrics file
    path: Option<String>,
    /// Empty program disables the analysis step
    analysis: Option<AnalysisCommand>,
    reconcile: Option<ReconcileMode>,
}

fn main() {
    SimpleLogger::new().init().unwrap();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED_HEX]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/staged.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/organic.yaml --seed 0x123456...", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);

    // Parse optional seed
    let seed: Option<[u8; 32]> = if args.len() >= 4 && args[2] == "--seed" {
        match parse_seed_hex(&args[3]) {
            Ok(seed) => Some(seed),
            Err(e) => {
                eprintln!("Invalid seed: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let ok = if path.is_file() {
        run_scenario_file(path, seed)
    } else if path.is_dir() {
        run_scenario_directory(path, seed)
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    };

    if !ok {
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<[u8; 32]>) -> bool {
    let mut scenarios: Vec<PathBuf> = Vec::new();

    // Find all .yaml files
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                 ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    let mut failed = 0;
    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        if !run_scenario_file(scenario_path, seed) {
            failed += 1;
        }
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    if failed == 0 {
        println!("║  All scenarios complete!                               ║");
    } else {
        println!("║  {} of {} scenarios failed", failed, scenarios.len());
    }
    println!("╚════════════════════════════════════════════════════════╝\n");

    failed == 0
}

fn run_scenario_file(path: &Path, seed: Option<[u8; 32]>) -> bool {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to read {}: {}", path.display(), e);
            return false;
        }
    };

    let scenario: ScenarioFile = match serde_yaml::from_str(&yaml_content) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("Failed to parse {}: {}", path.display(), e);
            return false;
        }
    };

    // Print scenario header
    println!("\n╔════════════════════════════════════════════════════════╗");
    match &scenario.meta.name {
        Some(name) => println!("║  {}", name),
        None => println!(
            "║  Scenario: {}",
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("unnamed")
        ),
    }
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }

    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let mut config = build_config(scenario.config);
    if seed.is_some() {
        config.seed = seed;
    }

    println!("Configuration:");
    println!("  Mode: {:?}", config.mode);
    println!("  Grid: {}x{} (pivot radius {})", config.grid.rows, config.grid.cols, config.grid.pivot_radius);
    println!("  Start: {:?}", config.schedule.start);
    println!("  Poll: every {}s, budget {:?}", config.poll.interval, config.poll.max_attempts);
    println!("  Reconcile: {:?}", config.metrics.reconcile);
    println!("\nStarting simulation...\n");

    let result = Simulation::new(config).and_then(|sim| sim.run());
    match result {
        Ok(result) => {
            result.print_summary();
            println!("\n✓ Scenario complete!\n");
            result.finished
        }
        Err(e) => {
            eprintln!("\n✗ Scenario failed: {}\n", e);
            false
        }
    }
}

fn build_config(scenario: ScenarioConfig) -> SyncConfig {
    let mut config = SyncConfig::for_mode(scenario.mode);

    if let Some(grid) = scenario.grid {
        config.grid = grid;
    }
    if let Some(versions) = scenario.versions {
        config.versions = versions;
    }
    if let Some(protocol) = scenario.protocol {
        config.protocol = protocol;
    }
    if let Some(output) = scenario.output {
        config.output = output;
    }

    if let Some(schedule) = scenario.schedule {
        if let Some(v) = schedule.move_at {
            config.schedule.move_at = v;
        }
        if let Some(v) = schedule.move_stagger {
            config.schedule.move_stagger = v;
        }
        if let Some(v) = schedule.start {
            config.schedule.start = v;
        }
    }

    if let Some(poll) = scenario.poll {
        if let Some(v) = poll.interval {
            config.poll.interval = v;
        }
        if let Some(v) = poll.entry_delay {
            config.poll.entry_delay = v;
        }
        if let Some(v) = poll.max_attempts {
            config.poll.max_attempts = (v > 0).then_some(v);
        }
    }

    if let Some(metrics) = scenario.metrics {
        if let Some(path) = metrics.path {
            config.metrics.path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(analysis) = metrics.analysis {
            config.metrics.analysis = (!analysis.program.is_empty()).then_some(analysis);
        }
        if let Some(v) = metrics.reconcile {
            config.metrics.reconcile = v;
        }
    }

    config
}
