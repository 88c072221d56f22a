//! Hierarchical sync simulation
//!
//! Run with: cargo run -- --mode=staged --interPubMsFast=600
//!
//! Options use `--name=value`; see `SyncConfig::apply_override` for names.

use std::env;

use hs_rust::hs_config::seed_to_hex;
use hs_rust::{Simulation, SyncConfig};
use log::{error, info};
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new().init().unwrap();

    let mut overrides = Vec::new();
    for arg in env::args().skip(1) {
        if arg == "--help" || arg == "-h" {
            print_usage();
            return;
        }
        match arg.strip_prefix("--").and_then(|a| a.split_once('=')) {
            Some((name, value)) => overrides.push((name.to_string(), value.to_string())),
            None => {
                eprintln!("Expected --name=value, got '{}'", arg);
                print_usage();
                std::process::exit(1);
            }
        }
    }

    let config = SyncConfig::from_overrides(overrides).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        Hierarchical Sync Simulator                     ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    info!("Configuration:");
    info!("  Mode: {:?}", config.mode);
    info!("  Grid: {}x{} (pivot radius {})", config.grid.rows, config.grid.cols, config.grid.pivot_radius);
    info!("  Versions: {}..={}", config.versions.min, config.versions.max);
    info!("  Start: {:?}", config.schedule.start);
    info!("  Poll: every {}s, first after {}s", config.poll.interval, config.poll.entry_delay);
    info!(
        "  Publishers: slow {} ms, fast {} ms",
        config.protocol.inter_pub_ms_slow, config.protocol.inter_pub_ms_fast
    );
    if let Some(seed) = &config.seed {
        info!("  Seed: {}", seed_to_hex(seed));
    }

    info!("Starting simulation...");

    let result = Simulation::new(config).and_then(|sim| sim.run());
    match result {
        Ok(result) => {
            result.print_summary();
            println!("\n✓ Simulation complete!\n");
        }
        Err(e) => {
            error!("simulation failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Usage: hierarchical-sync [--name=value ...]");
    eprintln!("\nCommon options:");
    eprintln!("  --mode=staged|organic");
    eprintln!("  --seed=0x1234...");
    eprintln!("  --rows=5 --cols=5 --pivotRadius=1");
    eprintln!("  --interPubMsSlow=1500 --interPubMsFast=800");
    eprintln!("  --nRecent=5 --nRandom=3 --dropRate=0.01 --frag=false");
    eprintln!("  --metricsFile=sync_metrics.txt --analysis='python3 analyze_tracer.py'");
    eprintln!("  --reconcile=verify|cosmetic --maxAttempts=2400 --logEvents=true");
}
