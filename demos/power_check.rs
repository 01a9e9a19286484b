//! NMA power check: generate → sample → fit → compare with ground truth
//!
//! 1. Run one simulation and print component recovery and arm ranks
//! 2. Repeat sampling and fitting to estimate bias, coverage and power
//!
//! Run with: cargo run --example power_check --release
//! Logging: RUST_LOG=nma_sim=debug cargo run --example power_check

use anyhow::Context;
use nma_sim::{Simulation, SimulationConfig};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const REPLICATES: usize = 20;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SimulationConfig::builder()
        .components(&['A', 'B', 'C', 'D', 'Z'], &[0.5, 0.25])
        .studies_per_comparison(100)
        .max_participants(1000)
        .sampled_studies(50)
        .seed(42)
        .build()
        .context("building simulation config")?;
    let simulation = Simulation::new(config)?;

    println!("┌─ STEP 1: SINGLE RUN ───────────────────────────────────────┐");
    let start = Instant::now();
    let outcome = simulation.run()?;
    let counts = outcome.report.counts();
    println!("│ Comparisons: {}", counts.comparisons);
    println!("│ Studies: {} ({} participants)", counts.studies, counts.participants);
    println!(
        "│ Sampled: {} studies, {} participants, {} skipped",
        counts.sampled_studies, counts.sampled_participants, counts.skipped_studies
    );
    println!("│ tau²: {:.4}", outcome.report.tau2().unwrap_or(f64::NAN));
    println!("│ Time: {:?}", start.elapsed());
    println!("│");
    println!("│ component  true   estimate  se      covered");
    for r in outcome.report.recovery() {
        println!(
            "│ {:<9}  {:>5.2}  {:>8.3}  {:>6.3}  {}",
            r.component, r.true_effect, r.estimate, r.std_error, r.covered
        );
    }
    println!("│");
    println!("│ arm   mean rank  P(best)  SUCRA");
    for s in outcome.report.ranks() {
        println!("│ {:<4}  {:>9.2}  {:>7.3}  {:>5.3}", s.arm, s.mean_rank, s.p_best, s.sucra);
    }
    println!("└────────────────────────────────────────────────────────────┘\n");

    println!("┌─ STEP 2: POWER CHECK ({REPLICATES} replicates) ──────────────────────┐");
    let start = Instant::now();
    let summary = simulation.power_check(REPLICATES)?;
    println!("│ Failed replicates: {}", summary.failed);
    println!("│ component  true   mean est  bias     coverage  power");
    for c in &summary.components {
        println!(
            "│ {:<9}  {:>5.2}  {:>8.3}  {:>7.3}  {:>8.2}  {:>5.2}",
            c.component, c.true_effect, c.mean_estimate, c.mean_bias, c.coverage, c.power
        );
    }
    println!("│ Time: {:?}", start.elapsed());
    println!("└────────────────────────────────────────────────────────────┘\n");

    println!("{}", outcome.report.to_json()?);
    Ok(())
}
