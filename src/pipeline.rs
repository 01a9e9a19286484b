//! End-to-end simulation
//!
//! ```text
//! SimulationConfig ──► ComparisonTable ──► Population
//!                                              │
//!                         ┌────────────────────┘
//!                         ▼
//!             SampledSubset ──► StudyEstimates ──► MetaRegression ──► ranks
//! ```
//!
//! One `StdRng` seeded from the config drives every stochastic stage, so a
//! run is reproducible from its seed.

use crate::config::SimulationConfig;
use crate::enumerate::ComparisonTable;
use crate::population::Population;
use crate::registry::{ComponentId, ComponentRegistry};
use crate::report::{RunCounts, SimulationReport};
use crate::sampling::SampledSubset;
use crate::stats::{ComponentRecovery, MetaRegression, RankDistribution, StudyEstimates};
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Significance level used for power.
pub const ALPHA: f64 = 0.05;

/// Stage 4 output for one subset of the population.
#[derive(Debug, Clone)]
pub struct Replicate {
    /// Sampled and truncated studies
    pub subset: SampledSubset,
    /// Per-study estimates
    pub estimates: StudyEstimates,
    /// Component-level fit
    pub meta: MetaRegression,
}

/// A replicate plus its comparison with ground truth and arm ranks.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Underlying fits
    pub replicate: Replicate,
    /// Component recovery
    pub recovery: Vec<ComponentRecovery>,
    /// Rank distribution of treatment arms
    pub ranks: RankDistribution,
}

/// Everything a full run produced.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    /// Generated population
    pub population: Population,
    /// Analysis of one sampled subset
    pub analysis: Analysis,
    /// Run record
    pub report: SimulationReport,
}

/// A run stopped by a failing stage, with its `Failed` report.
#[derive(Debug, thiserror::Error)]
#[error("Simulation run {} failed: {source}", .report.run_id())]
pub struct RunFailure {
    /// Error of the failing stage
    #[source]
    pub source: Error,
    /// Report with status `Failed` and the error message
    pub report: Box<SimulationReport>,
}

impl From<RunFailure> for Error {
    fn from(failure: RunFailure) -> Self {
        failure.source
    }
}

/// Aggregate over replicates for one component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentPower {
    /// Component
    pub component: ComponentId,
    /// Ground-truth effect
    pub true_effect: f64,
    /// Mean estimate
    pub mean_estimate: f64,
    /// Mean of `estimate - true_effect`
    pub mean_bias: f64,
    /// Fraction of confidence intervals covering the truth
    pub coverage: f64,
    /// Fraction of replicates with `p < ALPHA`
    pub power: f64,
    /// Replicates in which the component was estimated
    pub replicates: usize,
}

/// Result of [`Simulation::power_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSummary {
    /// Replicates attempted
    pub replicates: usize,
    /// Replicates whose fit failed
    pub failed: usize,
    /// Per-component aggregates, in component order
    pub components: Vec<ComponentPower>,
}

impl PowerSummary {
    /// Aggregate of one component.
    #[must_use]
    pub fn component(&self, id: ComponentId) -> Option<&ComponentPower> {
        self.components.iter().find(|c| c.component == id)
    }

    /// Arrow view: `component, true_effect, mean_estimate, mean_bias, coverage, power, replicates`.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let c = &self.components;
        let schema = Arc::new(Schema::new(vec![
            Field::new("component", DataType::Utf8, false),
            Field::new("true_effect", DataType::Float64, false),
            Field::new("mean_estimate", DataType::Float64, false),
            Field::new("mean_bias", DataType::Float64, false),
            Field::new("coverage", DataType::Float64, false),
            Field::new("power", DataType::Float64, false),
            Field::new("replicates", DataType::Int64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(c.iter().map(|p| p.component.to_string()))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|p| p.true_effect))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|p| p.mean_estimate))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|p| p.mean_bias))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|p| p.coverage))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|p| p.power))),
            Arc::new(Int64Array::from_iter_values(
                c.iter().map(|p| i64::try_from(p.replicates).unwrap_or(i64::MAX)),
            )),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

#[derive(Default)]
struct Tally {
    n: usize,
    estimate: f64,
    bias: f64,
    covered: usize,
    significant: usize,
}

/// A validated simulation with its registry and comparison table.
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
    registry: ComponentRegistry,
    comparisons: ComparisonTable,
}

impl Simulation {
    /// Validate `config` and enumerate the comparison network.
    ///
    /// # Errors
    ///
    /// Returns any configuration error, or
    /// [`Error::SampleExceedsPopulation`] if more studies would be sampled
    /// than are generated.
    #[instrument(skip_all, fields(seed = config.seed))]
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let registry = config.registry()?;
        let comparisons = ComparisonTable::from_config(&config, &registry)?;

        let available = config.total_studies(comparisons.len())?;
        if config.sampled_studies > available {
            return Err(Error::SampleExceedsPopulation {
                requested: config.sampled_studies,
                available,
            });
        }

        Ok(Self {
            config,
            registry,
            comparisons,
        })
    }

    /// Run parameters.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Component registry.
    #[must_use]
    pub const fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Comparison network.
    #[must_use]
    pub const fn comparisons(&self) -> &ComparisonTable {
        &self.comparisons
    }

    /// Fresh random source seeded from the config.
    #[must_use]
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.config.seed)
    }

    /// Stage 3: simulate the full population.
    ///
    /// # Errors
    ///
    /// Returns error if generation fails.
    pub fn generate_population(&self, rng: &mut StdRng) -> Result<Population> {
        Population::generate(&self.config, &self.comparisons, rng)
    }

    /// Stage 4 up to the meta-regression: sample, truncate and fit.
    ///
    /// # Errors
    ///
    /// Returns error if sampling fails or the meta-regression is singular.
    pub fn fit_replicate(&self, population: &Population, rng: &mut StdRng) -> Result<Replicate> {
        let subset = SampledSubset::draw(&self.config, population, rng)?;
        let estimates = StudyEstimates::fit(&subset)?;
        let meta = MetaRegression::fit(estimates.estimates(), &self.comparisons, &self.registry)?;
        Ok(Replicate {
            subset,
            estimates,
            meta,
        })
    }

    /// Full stage 4: fit, compare with ground truth and rank treatment arms.
    ///
    /// # Errors
    ///
    /// Returns error if any analysis step fails.
    #[instrument(skip_all)]
    pub fn analyze(&self, population: &Population, rng: &mut StdRng) -> Result<Analysis> {
        let replicate = self.fit_replicate(population, rng)?;
        let recovery = replicate.meta.recovery(&self.registry)?;
        let ranks = RankDistribution::sample(
            &replicate.meta,
            &self.comparisons.treatment_arms(),
            self.config.rank_draws,
            rng,
        )?;
        Ok(Analysis {
            replicate,
            recovery,
            ranks,
        })
    }

    /// Generate a population and analyze one sample of it.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] carrying the error of the first failing
    /// stage and the report marked `Failed`.
    #[instrument(skip_all, fields(seed = self.config.seed))]
    pub fn run(&self) -> std::result::Result<SimulationOutcome, RunFailure> {
        let run_id = format!(
            "nma-{}-{}",
            self.config.seed,
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f")
        );
        let mut report = SimulationReport::new(run_id, self.config.clone());
        report.start();

        let mut rng = self.rng();
        let stages = self
            .generate_population(&mut rng)
            .and_then(|population| {
                let analysis = self.analyze(&population, &mut rng)?;
                Ok((population, analysis))
            });

        let (population, analysis) = match stages {
            Ok(done) => done,
            Err(e) => {
                report.fail(e.to_string());
                error!(run_id = report.run_id(), error = %e, "simulation run failed");
                return Err(RunFailure {
                    source: e,
                    report: Box::new(report),
                });
            }
        };

        let replicate = &analysis.replicate;
        let counts = RunCounts {
            comparisons: self.comparisons.len(),
            studies: population.studies().len(),
            participants: population.participants().num_rows(),
            sampled_studies: replicate.subset.studies().len(),
            sampled_participants: replicate.subset.num_rows(),
            fitted_studies: replicate.estimates.len(),
            skipped_studies: replicate.estimates.skipped().len(),
        };
        report.complete(
            counts,
            replicate.meta.tau2(),
            analysis.recovery.clone(),
            analysis.ranks.summaries(),
        );
        info!(
            run_id = report.run_id(),
            studies = counts.studies,
            fitted = counts.fitted_studies,
            tau2 = replicate.meta.tau2(),
            "simulation run complete"
        );

        Ok(SimulationOutcome {
            population,
            analysis,
            report,
        })
    }

    /// Repeat sampling and fitting `replicates` times over one population.
    ///
    /// Replicates whose fit fails are logged and counted in
    /// [`PowerSummary::failed`]; they do not abort the check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for zero replicates, or an error if
    /// the population cannot be generated.
    #[instrument(skip_all, fields(replicates = replicates))]
    #[allow(clippy::cast_precision_loss)]
    pub fn power_check(&self, replicates: usize) -> Result<PowerSummary> {
        if replicates == 0 {
            return Err(Error::InvalidInput("power check needs at least one replicate".to_string()));
        }

        let mut rng = self.rng();
        let population = self.generate_population(&mut rng)?;

        let mut tallies: BTreeMap<ComponentId, Tally> = BTreeMap::new();
        let mut failed = 0;
        for replicate in 0..replicates {
            let fit = match self.fit_replicate(&population, &mut rng) {
                Ok(fit) => fit,
                Err(e) => {
                    warn!(replicate, error = %e, "replicate failed");
                    failed += 1;
                    continue;
                }
            };
            for r in fit.meta.recovery(&self.registry)? {
                let tally = tallies.entry(r.component).or_default();
                tally.n += 1;
                tally.estimate += r.estimate;
                tally.bias += r.bias;
                tally.covered += usize::from(r.covered);
                tally.significant += usize::from(r.p_value < ALPHA);
            }
            debug!(replicate, tau2 = fit.meta.tau2(), "replicate fitted");
        }

        let mut components = Vec::with_capacity(tallies.len());
        for (component, tally) in tallies {
            let n = tally.n as f64;
            components.push(ComponentPower {
                component,
                true_effect: self.registry.effect(component)?,
                mean_estimate: tally.estimate / n,
                mean_bias: tally.bias / n,
                coverage: tally.covered as f64 / n,
                power: tally.significant as f64 / n,
                replicates: tally.n,
            });
        }

        info!(replicates, failed, "power check complete");
        Ok(PowerSummary {
            replicates,
            failed,
            components,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunStatus;

    fn small_config() -> SimulationConfig {
        SimulationConfig::builder()
            .studies_per_comparison(10)
            .max_participants(99)
            .sampled_studies(40)
            .rank_draws(200)
            .seed(7)
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_rejects_oversampling() {
        let config = SimulationConfig::builder()
            .studies_per_comparison(1)
            .sampled_studies(8)
            .build()
            .unwrap();
        let err = Simulation::new(config).unwrap_err();
        assert!(matches!(
            err,
            Error::SampleExceedsPopulation { requested: 8, available: 7 }
        ));
    }

    #[test]
    fn test_run_completes_report() {
        let simulation = Simulation::new(small_config()).unwrap();
        let outcome = simulation.run().unwrap();

        let report = &outcome.report;
        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.counts().comparisons, 7);
        assert_eq!(report.counts().studies, 70);
        assert_eq!(report.counts().participants, 70 * 200);
        assert_eq!(report.counts().sampled_studies, 40);
        assert_eq!(
            report.counts().fitted_studies + report.counts().skipped_studies,
            40
        );
        assert_eq!(report.ranks().len(), 7);
        assert!(report.tau2().unwrap() >= 0.0);
    }

    #[test]
    fn test_failed_run_returns_failed_report() {
        // 3 studies cannot identify 4 component coefficients
        let config = SimulationConfig::builder()
            .studies_per_comparison(10)
            .max_participants(99)
            .sampled_studies(3)
            .build()
            .unwrap();
        let failure = Simulation::new(config).unwrap().run().unwrap_err();

        assert!(matches!(failure.source, Error::SingularDesign(_)));
        assert_eq!(failure.report.status(), RunStatus::Failed);
        assert!(failure.report.error().unwrap().contains("Singular meta-regression design"));
        assert!(failure.report.ended_at().is_some());
        assert!(failure.to_string().contains(failure.report.run_id()));

        let json: serde_json::Value = serde_json::from_str(&failure.report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "Failed");

        let error: Error = failure.into();
        assert!(matches!(error, Error::SingularDesign(_)));
    }

    #[test]
    fn test_study_count_overflow_rejected() {
        let config = SimulationConfig::builder()
            .studies_per_comparison(usize::MAX)
            .build()
            .unwrap();
        let err = Simulation::new(config).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_power_check_counts_replicates() {
        let simulation = Simulation::new(small_config()).unwrap();
        let summary = simulation.power_check(3).unwrap();
        assert_eq!(summary.replicates, 3);
        let a = summary.component(ComponentId::new('A')).unwrap();
        assert_eq!(a.replicates + summary.failed, 3);
        assert!((0.0..=1.0).contains(&a.coverage));
        assert_eq!(summary.to_record_batch().unwrap().num_rows(), summary.components.len());
    }

    #[test]
    fn test_power_check_rejects_zero_replicates() {
        let simulation = Simulation::new(small_config()).unwrap();
        assert!(simulation.power_check(0).is_err());
    }
}
