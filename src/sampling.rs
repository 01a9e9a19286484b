//! Study sampling and participant truncation
//!
//! Emulates a realistic meta-analysis dataset from the full population:
//!
//! 1. pick `sampled_studies` distinct studies without replacement
//! 2. draw a heavy-tailed target size per study from
//!    Cauchy(location, scale), clipped to `[floor, ceiling]` and to the
//!    study's own size
//! 3. keep that many participant rows, chosen by a uniform random weight
//!
//! The weight is independent of the outcome, so truncation introduces no
//! selection bias. Do not replace it with anything outcome-ordered.

use crate::config::{SimulationConfig, TruncationConfig};
use crate::population::{participant_schema, Population, Study};
use crate::topk::TopKSelection;
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::Rng;
use rand_distr::{Cauchy, Distribution};
use std::sync::Arc;
use tracing::{debug, instrument};

const WEIGHT_COLUMN: &str = "selection_weight";

/// Pick `n` distinct studies without replacement, returned in id order.
///
/// # Errors
///
/// Returns [`Error::SampleExceedsPopulation`] if `n` exceeds the number of studies.
pub fn select_studies<R: Rng + ?Sized>(
    studies: &[Study],
    n: usize,
    rng: &mut R,
) -> Result<Vec<Study>> {
    if n > studies.len() {
        return Err(Error::SampleExceedsPopulation {
            requested: n,
            available: studies.len(),
        });
    }

    let mut picked: Vec<Study> = rand::seq::index::sample(rng, studies.len(), n)
        .into_iter()
        .map(|i| studies[i])
        .collect();
    picked.sort_by_key(|s| s.id);
    Ok(picked)
}

/// Heavy-tailed number of participant rows to keep for a study of `available` rows.
///
/// The result lies in `[floor, min(ceiling, available)]`.
///
/// # Errors
///
/// Returns [`Error::TruncationBelowFloor`] if the study has fewer rows than
/// the floor, or [`Error::InvalidConfig`] for a non-positive scale.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn truncation_target<R: Rng + ?Sized>(
    truncation: &TruncationConfig,
    available: usize,
    rng: &mut R,
) -> Result<usize> {
    let upper = truncation.ceiling.min(available);
    if upper < truncation.floor {
        return Err(Error::TruncationBelowFloor {
            target: upper,
            floor: truncation.floor,
        });
    }

    let cauchy = Cauchy::new(truncation.location, truncation.scale)
        .map_err(|e| Error::InvalidConfig(format!("truncation distribution: {e}")))?;
    let draw = cauchy.sample(rng).round();
    // clamp in f64 first: Cauchy tails overflow usize
    let clipped = draw.clamp(truncation.floor as f64, upper as f64);
    Ok(clipped as usize)
}

/// Keep `k` rows of `batch`, chosen by a uniform random weight.
///
/// # Errors
///
/// Returns error if `k` is zero or the batch cannot be rebuilt.
pub fn truncate_rows<R: Rng + ?Sized>(batch: &RecordBatch, k: usize, rng: &mut R) -> Result<RecordBatch> {
    let weights: Vec<f64> = (0..batch.num_rows()).map(|_| rng.gen::<f64>()).collect();

    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(WEIGHT_COLUMN, DataType::Float64, false));
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    columns.push(Arc::new(Float64Array::from(weights)));
    let weighted = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

    let kept = weighted.top_k(batch.num_columns(), k)?;
    let original: Vec<usize> = (0..batch.num_columns()).collect();
    Ok(kept.project(&original)?)
}

/// Truncated participant records of the sampled studies.
#[derive(Debug, Clone)]
pub struct SampledSubset {
    studies: Vec<Study>,
    batches: Vec<RecordBatch>,
}

impl SampledSubset {
    /// Select studies and truncate each one.
    ///
    /// # Errors
    ///
    /// Returns error if more studies are requested than exist, or a study
    /// cannot reach the truncation floor.
    #[instrument(skip_all, fields(requested = config.sampled_studies))]
    pub fn draw<R: Rng + ?Sized>(
        config: &SimulationConfig,
        population: &Population,
        rng: &mut R,
    ) -> Result<Self> {
        let studies = select_studies(population.studies().studies(), config.sampled_studies, rng)?;

        let mut batches = Vec::with_capacity(studies.len());
        for study in &studies {
            let batch = population.study_participants(study.id).ok_or_else(|| {
                Error::StorageError(format!("No participant records for study {}", study.id))
            })?;
            let k = truncation_target(&config.truncation, batch.num_rows(), rng)?;
            debug!(study_id = study.id, kept = k, of = batch.num_rows(), "truncated study");
            batches.push(truncate_rows(batch, k, rng)?);
        }

        Ok(Self { studies, batches })
    }

    /// Sampled studies in id order.
    #[must_use]
    pub fn studies(&self) -> &[Study] {
        &self.studies
    }

    /// `(study, truncated participant batch)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Study, &RecordBatch)> {
        self.studies.iter().zip(&self.batches)
    }

    /// Total participant rows kept.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// All kept rows in one participant-schema batch.
    ///
    /// # Errors
    ///
    /// Returns error if Arrow fails to concatenate.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        Ok(arrow::compute::concat_batches(&participant_schema(), &self.batches)?)
    }
}
