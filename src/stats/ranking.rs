//! Rank distributions of treatment arms
//!
//! Draws coefficient vectors from `N(beta, Cov)` of a fitted meta-regression,
//! scores every treatment arm as the sum of its components' coefficients,
//! and tallies which rank each arm takes per draw (rank 1 = largest effect).

use crate::arm::Arm;
use crate::stats::meta::MetaRegression;
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Per-arm summary of a rank distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankSummary {
    /// Arm key
    pub arm: String,
    /// Expected rank
    pub mean_rank: f64,
    /// Probability of rank 1
    pub p_best: f64,
    /// Surface under the cumulative ranking curve, in [0, 1]
    pub sucra: f64,
}

/// Rank counts of every arm over all draws.
#[derive(Debug, Clone)]
pub struct RankDistribution {
    arms: Vec<Arm>,
    // counts[arm][rank - 1]
    counts: Vec<Vec<u64>>,
    draws: usize,
}

impl RankDistribution {
    /// Sample `draws` coefficient vectors and rank `arms` in each.
    ///
    /// Components of an arm that did not enter the model contribute zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for zero draws or no arms, and
    /// [`Error::SingularDesign`] if the covariance has no Cholesky factor.
    #[instrument(skip_all, fields(arms = arms.len(), draws = draws))]
    pub fn sample<R: Rng + ?Sized>(
        meta: &MetaRegression,
        arms: &[Arm],
        draws: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if draws == 0 || arms.is_empty() {
            return Err(Error::InvalidInput(format!(
                "rank distribution needs draws and arms, got {draws} draws over {} arms",
                arms.len()
            )));
        }

        let lower = meta
            .covariance()
            .clone()
            .cholesky()
            .ok_or_else(|| Error::SingularDesign("coefficient covariance is not positive definite".to_string()))?
            .l();

        // Column of each arm component in the coefficient vector
        let columns: Vec<Vec<usize>> = arms
            .iter()
            .map(|arm| {
                arm.components()
                    .iter()
                    .filter_map(|&id| meta.components().iter().position(|c| c.component == id))
                    .collect()
            })
            .collect();

        let p = meta.coefficients().len();
        let mut counts = vec![vec![0_u64; arms.len()]; arms.len()];
        let mut order: Vec<usize> = (0..arms.len()).collect();
        for _ in 0..draws {
            let z = DVector::from_fn(p, |_, _| rng.sample::<f64, _>(StandardNormal));
            let beta = meta.coefficients() + &lower * z;
            let scores: Vec<f64> = columns
                .iter()
                .map(|cols| cols.iter().map(|&j| beta[j]).sum())
                .collect();

            order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            for (rank, &arm) in order.iter().enumerate() {
                counts[arm][rank] += 1;
            }
        }

        Ok(Self {
            arms: arms.to_vec(),
            counts,
            draws,
        })
    }

    /// Ranked arms.
    #[must_use]
    pub fn arms(&self) -> &[Arm] {
        &self.arms
    }

    /// Number of draws.
    #[must_use]
    pub const fn draws(&self) -> usize {
        self.draws
    }

    /// Times `arm` took 1-based `rank`.
    #[must_use]
    pub fn count(&self, arm: usize, rank: usize) -> u64 {
        rank.checked_sub(1)
            .and_then(|r| self.counts.get(arm).and_then(|row| row.get(r)))
            .copied()
            .unwrap_or(0)
    }

    /// Probability that `arm` takes 1-based `rank`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn probability(&self, arm: usize, rank: usize) -> f64 {
        self.count(arm, rank) as f64 / self.draws as f64
    }

    /// Expected rank of `arm`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_rank(&self, arm: usize) -> f64 {
        (1..=self.arms.len())
            .map(|rank| rank as f64 * self.probability(arm, rank))
            .sum()
    }

    /// SUCRA of `arm`: `(a - mean_rank) / (a - 1)` over `a` arms; 1 for a single arm.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sucra(&self, arm: usize) -> f64 {
        let a = self.arms.len() as f64;
        if self.arms.len() < 2 {
            return 1.0;
        }
        (a - self.mean_rank(arm)) / (a - 1.0)
    }

    /// One summary per arm, in arm order.
    #[must_use]
    pub fn summaries(&self) -> Vec<RankSummary> {
        (0..self.arms.len())
            .map(|i| RankSummary {
                arm: self.arms[i].key(),
                mean_rank: self.mean_rank(i),
                p_best: self.probability(i, 1),
                sucra: self.sucra(i),
            })
            .collect()
    }

    /// Arrow view in long format: `arm, rank, count, probability`.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let n = self.arms.len();
        let mut arm = Vec::with_capacity(n * n);
        let mut rank = Vec::with_capacity(n * n);
        let mut count = Vec::with_capacity(n * n);
        let mut probability = Vec::with_capacity(n * n);
        for i in 0..n {
            for r in 1..=n {
                arm.push(self.arms[i].key());
                rank.push(i64::try_from(r).map_err(|e| Error::Other(format!("rank overflow: {e}")))?);
                count.push(i64::try_from(self.count(i, r)).unwrap_or(i64::MAX));
                probability.push(self.probability(i, r));
            }
        }

        let schema = Arc::new(Schema::new(vec![
            Field::new("arm", DataType::Utf8, false),
            Field::new("rank", DataType::Int64, false),
            Field::new("count", DataType::Int64, false),
            Field::new("probability", DataType::Float64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(arm)),
            Arc::new(Int64Array::from(rank)),
            Arc::new(Int64Array::from(count)),
            Arc::new(Float64Array::from(probability)),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}
