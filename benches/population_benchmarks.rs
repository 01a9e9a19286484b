//! Simulation stage benchmarks
//!
//! - Population generation
//! - Study sampling and truncation
//! - Per-study fitting and meta-regression

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nma_sim::sampling::SampledSubset;
use nma_sim::stats::{MetaRegression, StudyEstimates};
use nma_sim::{ComparisonTable, Population, SimulationConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn config(max_participants: usize) -> SimulationConfig {
    SimulationConfig::builder()
        .studies_per_comparison(20)
        .max_participants(max_participants)
        .sampled_studies(50)
        .build()
        .unwrap()
}

fn bench_population_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("population_generation");

    for max_participants in [99_usize, 499, 999] {
        let config = config(max_participants);
        let registry = config.registry().unwrap();
        let comparisons = ComparisonTable::from_config(&config, &registry).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(max_participants),
            &max_participants,
            |b, _| {
                b.iter(|| {
                    let mut rng = StdRng::seed_from_u64(42);
                    let population = Population::generate(&config, &comparisons, &mut rng).unwrap();
                    black_box(population);
                });
            },
        );
    }

    group.finish();
}

fn bench_sampling(c: &mut Criterion) {
    let config = config(999);
    let registry = config.registry().unwrap();
    let comparisons = ComparisonTable::from_config(&config, &registry).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let population = Population::generate(&config, &comparisons, &mut rng).unwrap();

    c.bench_function("sample_and_truncate_50_studies", |b| {
        b.iter(|| {
            let subset = SampledSubset::draw(&config, &population, &mut rng).unwrap();
            black_box(subset);
        });
    });
}

fn bench_fitting(c: &mut Criterion) {
    let config = config(999);
    let registry = config.registry().unwrap();
    let comparisons = ComparisonTable::from_config(&config, &registry).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let population = Population::generate(&config, &comparisons, &mut rng).unwrap();
    let subset = SampledSubset::draw(&config, &population, &mut rng).unwrap();

    c.bench_function("per_study_ols", |b| {
        b.iter(|| black_box(StudyEstimates::fit(&subset).unwrap()));
    });

    let estimates = StudyEstimates::fit(&subset).unwrap();
    c.bench_function("meta_regression", |b| {
        b.iter(|| {
            black_box(MetaRegression::fit(estimates.estimates(), &comparisons, &registry).unwrap())
        });
    });
}

criterion_group!(benches, bench_population_generation, bench_sampling, bench_fitting);
criterion_main!(benches);
