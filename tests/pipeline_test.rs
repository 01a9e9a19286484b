//! End-to-end tests: generation, sampling, fitting and recovery

use nma_sim::stats::meta::recovery_record_batch;
use nma_sim::population::columns;
use nma_sim::storage::int64_column;
use nma_sim::{
    ComponentId, Error, RunStatus, SampledSubset, Simulation, SimulationConfig, TruncationConfig,
};

fn config(seed: u64) -> SimulationConfig {
    SimulationConfig::builder()
        .studies_per_comparison(30)
        .max_participants(199)
        .sampled_studies(100)
        .rank_draws(300)
        .seed(seed)
        .build()
        .unwrap()
}

#[test]
fn test_same_seed_same_estimates() {
    let a = Simulation::new(config(11)).unwrap().run().unwrap();
    let b = Simulation::new(config(11)).unwrap().run().unwrap();

    assert_eq!(a.report.recovery(), b.report.recovery());
    assert_eq!(a.report.tau2(), b.report.tau2());
    assert_eq!(a.report.ranks(), b.report.ranks());
}

#[test]
fn test_component_effects_are_recovered() {
    let outcome = Simulation::new(config(5)).unwrap().run().unwrap();
    let recovery = outcome.report.recovery();

    let get = |id: char| {
        recovery
            .iter()
            .find(|r| r.component == ComponentId::new(id))
            .unwrap()
    };
    assert!((get('A').estimate - 0.5).abs() < 0.3, "A = {}", get('A').estimate);
    assert!((get('B').estimate - 0.25).abs() < 0.3, "B = {}", get('B').estimate);
    assert!(get('C').estimate.abs() < 0.3, "C = {}", get('C').estimate);

    // D is never in an arm so it never enters the model
    assert!(recovery.iter().all(|r| r.component != ComponentId::new('D')));

    let batch = recovery_record_batch(recovery).unwrap();
    assert_eq!(batch.num_rows(), recovery.len());
}

#[test]
fn test_run_report_serializes() {
    let outcome = Simulation::new(config(3)).unwrap().run().unwrap();
    assert_eq!(outcome.report.status(), RunStatus::Success);

    let json = outcome.report.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["config"]["seed"], 3);
    assert_eq!(value["counts"]["sampled_studies"], 100);
    assert!(value["recovery"].as_array().is_some_and(|r| !r.is_empty()));
}

#[test]
fn test_analysis_tables_line_up() {
    let simulation = Simulation::new(config(8)).unwrap();
    let outcome = simulation.run().unwrap();
    let replicate = &outcome.analysis.replicate;

    let subset = replicate.subset.to_record_batch().unwrap();
    assert_eq!(subset.num_rows(), replicate.subset.num_rows());
    assert_eq!(
        replicate.estimates.to_record_batch().unwrap().num_rows(),
        replicate.estimates.len()
    );
    assert_eq!(replicate.meta.studies(), replicate.estimates.len());
    assert_eq!(
        outcome.analysis.ranks.arms().len(),
        simulation.comparisons().treatment_arms().len()
    );
}

#[test]
fn test_power_check_detects_strong_effect() {
    let simulation = Simulation::new(config(17)).unwrap();
    let summary = simulation.power_check(5).unwrap();

    assert_eq!(summary.replicates, 5);
    let a = summary.component(ComponentId::new('A')).unwrap();
    assert!((a.true_effect - 0.5).abs() < 1e-12);
    assert!(a.power >= 0.6, "power for A = {}", a.power);
    assert!((0.0..=1.0).contains(&a.coverage));
    assert!((a.mean_bias - (a.mean_estimate - a.true_effect)).abs() < 1e-9);
}

#[test]
fn test_oversampling_is_rejected_up_front() {
    let config = SimulationConfig::builder()
        .studies_per_comparison(2)
        .sampled_studies(15)
        .build()
        .unwrap();
    let err = Simulation::new(config).unwrap_err();
    assert!(matches!(err, Error::SampleExceedsPopulation { requested: 15, available: 14 }));
}

#[test]
#[allow(clippy::cast_precision_loss)]
fn test_per_study_estimates_are_unbiased() {
    let config = SimulationConfig::builder()
        .studies_per_comparison(60)
        .max_participants(199)
        .sampled_studies(400)
        .seed(23)
        .build()
        .unwrap();
    let simulation = Simulation::new(config).unwrap();
    let mut rng = simulation.rng();
    let population = simulation.generate_population(&mut rng).unwrap();
    let replicate = simulation.fit_replicate(&population, &mut rng).unwrap();

    let estimates = replicate.estimates.estimates();
    assert!(estimates.len() >= 390);
    let total_bias: f64 = estimates
        .iter()
        .map(|e| e.estimate - simulation.comparisons().get(e.comparison_id).unwrap().true_effect)
        .sum();
    let mean_bias = total_bias / estimates.len() as f64;
    assert!(mean_bias.abs() < 0.08, "mean per-study bias {mean_bias}");
}

#[test]
fn test_large_studies_truncate_to_ceiling() {
    // 2000 rows per study; a far-right location pins every draw to the ceiling
    let config = SimulationConfig::builder()
        .studies_per_comparison(2)
        .max_participants(999)
        .sampled_studies(6)
        .truncation(TruncationConfig {
            location: 1.0e6,
            scale: 1.0,
            floor: 20,
            ceiling: 1000,
        })
        .build()
        .unwrap();
    let simulation = Simulation::new(config).unwrap();
    let mut rng = simulation.rng();
    let population = simulation.generate_population(&mut rng).unwrap();
    let subset = SampledSubset::draw(simulation.config(), &population, &mut rng).unwrap();

    for (study, batch) in subset.iter() {
        assert_eq!(population.study_participants(study.id).unwrap().num_rows(), 2000);
        assert_eq!(batch.num_rows(), 1000);
        let ids = int64_column(batch, columns::STUDY_ID).unwrap();
        assert!(ids.values().iter().all(|&id| id == study.id));
    }
    assert_eq!(subset.num_rows(), 6 * 1000);
}

#[test]
fn test_failed_run_report_is_returned() {
    let config = SimulationConfig::builder()
        .studies_per_comparison(5)
        .max_participants(99)
        .sampled_studies(3)
        .build()
        .unwrap();
    let failure = Simulation::new(config).unwrap().run().unwrap_err();
    assert_eq!(failure.report.status(), RunStatus::Failed);
    assert!(failure.report.error().is_some_and(|e| e.contains("Singular")));
    assert!(failure.report.recovery().is_empty());
}
