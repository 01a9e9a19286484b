//! Population data generator
//!
//! Draws studies from the comparison table with replacement, then expands
//! each study into participant records: participant indices `0..=max` in each
//! of the control (`treated = 0`) and treated (`treated = 1`) arms, with
//! outcome `Normal(true_effect * treated, 1)`.
//!
//! The mean always comes from the parent comparison. Studies that share a
//! comparison differ only by sampling noise.

use crate::config::SimulationConfig;
use crate::enumerate::ComparisonTable;
use crate::storage::StudyStore;
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tracing::{info, instrument};

/// Column names of the participant table
pub mod columns {
    /// Parent study id (`Int64`)
    pub const STUDY_ID: &str = "study_id";
    /// Participant index within its arm (`Int64`)
    pub const PARTICIPANT: &str = "participant";
    /// 0 = control, 1 = treated (`Int32`)
    pub const TREATED: &str = "treated";
    /// Continuous outcome (`Float64`)
    pub const OUTCOME: &str = "outcome";
}

/// Schema shared by every participant batch.
#[must_use]
pub fn participant_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(columns::STUDY_ID, DataType::Int64, false),
        Field::new(columns::PARTICIPANT, DataType::Int64, false),
        Field::new(columns::TREATED, DataType::Int32, false),
        Field::new(columns::OUTCOME, DataType::Float64, false),
    ]))
}

/// One simulated trial of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Study {
    /// Sequential id starting at 1
    pub id: i64,
    /// Parent comparison
    pub comparison_id: i64,
    /// Treated-arm participants
    pub n_treated: usize,
    /// Control-arm participants
    pub n_control: usize,
}

/// All generated studies in id order.
#[derive(Debug, Clone, Default)]
pub struct StudyTable {
    studies: Vec<Study>,
}

impl StudyTable {
    /// Number of studies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.studies.len()
    }

    /// Whether no study was generated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.studies.is_empty()
    }

    /// Studies in id order.
    #[must_use]
    pub fn studies(&self) -> &[Study] {
        &self.studies
    }

    /// Study by id.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Study> {
        // ids are 1-based and sequential
        id.checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| self.studies.get(i))
    }

    /// Arrow view: `study_id, comparison_id, n_treated, n_control`.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("study_id", DataType::Int64, false),
            Field::new("comparison_id", DataType::Int64, false),
            Field::new("n_treated", DataType::Int64, false),
            Field::new("n_control", DataType::Int64, false),
        ]));
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(self.studies.iter().map(|s| s.id))),
            Arc::new(Int64Array::from_iter_values(
                self.studies.iter().map(|s| s.comparison_id),
            )),
            Arc::new(Int64Array::from_iter_values(
                self.studies.iter().map(|s| count(s.n_treated)),
            )),
            Arc::new(Int64Array::from_iter_values(
                self.studies.iter().map(|s| count(s.n_control)),
            )),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// Generated studies and their participant records.
#[derive(Debug, Clone)]
pub struct Population {
    studies: StudyTable,
    participants: StudyStore,
}

impl Population {
    /// Run the data-generating process.
    ///
    /// Draws `studies_per_comparison * comparisons.len()` studies with
    /// replacement and simulates `2 * (max_participants + 1)` participants
    /// for each.
    ///
    /// # Errors
    ///
    /// Returns error if the comparison table is empty, the study count
    /// overflows, or a true effect is not finite.
    #[instrument(skip_all, fields(comparisons = comparisons.len()))]
    pub fn generate<R: Rng + ?Sized>(
        config: &SimulationConfig,
        comparisons: &ComparisonTable,
        rng: &mut R,
    ) -> Result<Self> {
        if comparisons.is_empty() {
            return Err(Error::InvalidInput("comparison table is empty".to_string()));
        }

        let n_studies = config.total_studies(comparisons.len())?;
        let per_arm = config.max_participants + 1;
        let control = Normal::new(0.0, 1.0)
            .map_err(|e| Error::InvalidInput(format!("control outcome distribution: {e}")))?;

        let mut studies = Vec::with_capacity(n_studies);
        let mut participants = StudyStore::new(participant_schema());
        for i in 0..n_studies {
            let id = i64::try_from(i + 1)
                .map_err(|e| Error::Other(format!("study id overflow: {e}")))?;
            let comparison = &comparisons.comparisons()[rng.gen_range(0..comparisons.len())];
            let treated = Normal::new(comparison.true_effect, 1.0).map_err(|e| {
                Error::InvalidInput(format!(
                    "treated outcome distribution for comparison {}: {e}",
                    comparison.id
                ))
            })?;

            let batch = simulate_study(id, per_arm, &control, &treated, rng)?;
            participants.append_batch(id, batch)?;
            studies.push(Study {
                id,
                comparison_id: comparison.id,
                n_treated: per_arm,
                n_control: per_arm,
            });
        }

        info!(
            studies = studies.len(),
            participants = participants.num_rows(),
            "generated population"
        );
        Ok(Self {
            studies: StudyTable { studies },
            participants,
        })
    }

    /// Study table.
    #[must_use]
    pub const fn studies(&self) -> &StudyTable {
        &self.studies
    }

    /// Participant store, one batch per study.
    #[must_use]
    pub const fn participants(&self) -> &StudyStore {
        &self.participants
    }

    /// Participant records of one study.
    #[must_use]
    pub fn study_participants(&self, study_id: i64) -> Option<&RecordBatch> {
        self.participants.study(study_id)
    }
}

/// Participant batch of one study: control rows first, then treated rows.
fn simulate_study<R: Rng + ?Sized>(
    study_id: i64,
    per_arm: usize,
    control: &Normal<f64>,
    treated: &Normal<f64>,
    rng: &mut R,
) -> Result<RecordBatch> {
    let rows = 2 * per_arm;
    let mut participant = Vec::with_capacity(rows);
    let mut flag = Vec::with_capacity(rows);
    let mut outcome = Vec::with_capacity(rows);

    for (treated_flag, dist) in [(0, control), (1, treated)] {
        for p in 0..per_arm {
            participant.push(
                i64::try_from(p).map_err(|e| Error::Other(format!("participant index overflow: {e}")))?,
            );
            flag.push(treated_flag);
            outcome.push(dist.sample(rng));
        }
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![study_id; rows])),
        Arc::new(Int64Array::from(participant)),
        Arc::new(Int32Array::from(flag)),
        Arc::new(Float64Array::from(outcome)),
    ];
    Ok(RecordBatch::try_new(participant_schema(), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{float64_column, int32_column, int64_column};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> SimulationConfig {
        SimulationConfig::builder()
            .studies_per_comparison(3)
            .max_participants(49)
            .build()
            .unwrap()
    }

    fn generate(config: &SimulationConfig, seed: u64) -> Population {
        let registry = config.registry().unwrap();
        let comparisons = ComparisonTable::from_config(config, &registry).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        Population::generate(config, &comparisons, &mut rng).unwrap()
    }

    #[test]
    fn test_study_ids_are_sequential() {
        let population = generate(&small_config(), 1);
        assert_eq!(population.studies().len(), 21);
        for (i, study) in population.studies().studies().iter().enumerate() {
            assert_eq!(study.id, i64::try_from(i + 1).unwrap());
            assert_eq!(population.studies().get(study.id), Some(study));
        }
        assert!(population.studies().get(0).is_none());
        assert!(population.studies().get(-5).is_none());
        assert!(population.studies().get(i64::MIN).is_none());
        assert!(population.studies().get(i64::MAX).is_none());
    }

    #[test]
    fn test_study_count_overflow_is_config_error() {
        let mut config = small_config();
        config.studies_per_comparison = usize::MAX;
        let registry = config.registry().unwrap();
        let comparisons = ComparisonTable::from_config(&config, &registry).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let err = Population::generate(&config, &comparisons, &mut rng).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_each_study_has_both_arms() {
        let config = small_config();
        let population = generate(&config, 2);
        for study in population.studies().studies() {
            let batch = population.study_participants(study.id).unwrap();
            assert_eq!(batch.num_rows(), config.participants_per_study());

            let treated = int32_column(&batch, columns::TREATED).unwrap();
            let n_treated = treated.values().iter().filter(|&&t| t == 1).count();
            assert_eq!(n_treated, study.n_treated);
            assert_eq!(batch.num_rows() - n_treated, study.n_control);

            let ids = int64_column(&batch, columns::STUDY_ID).unwrap();
            assert!(ids.values().iter().all(|&id| id == study.id));
        }
    }

    #[test]
    fn test_same_seed_same_population() {
        let config = small_config();
        let a = generate(&config, 99);
        let b = generate(&config, 99);
        assert_eq!(a.studies().studies(), b.studies().studies());
        assert_eq!(a.participants().concat().unwrap(), b.participants().concat().unwrap());
    }

    #[test]
    fn test_outcomes_are_finite() {
        let population = generate(&small_config(), 3);
        let all = population.participants().concat().unwrap();
        let outcome = float64_column(&all, columns::OUTCOME).unwrap();
        assert!(outcome.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_study_table_batch() {
        let population = generate(&small_config(), 4);
        let batch = population.studies().to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 21);
        assert_eq!(batch.schema().field(0).name(), "study_id");
    }
}
