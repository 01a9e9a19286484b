//! Per-study regression `outcome ~ treated`
//!
//! Two-parameter ordinary least squares. The slope on the treated flag is the
//! study's treatment-effect estimate; its standard error is
//! `sqrt(s² / Sxx)` with `s² = RSS / (n - 2)`.

use crate::population::{columns, Study};
use crate::sampling::SampledSubset;
use crate::storage::{float64_column, int32_column};
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Least-squares line `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    /// Intercept
    pub intercept: f64,
    /// Slope
    pub slope: f64,
    /// Standard error of the slope
    pub slope_se: f64,
    /// Residual variance `RSS / (n - 2)`
    pub residual_variance: f64,
    /// Observations
    pub n: usize,
}

/// Fit `y ~ x` by ordinary least squares.
///
/// Returns `None` with fewer than three points, mismatched lengths, or no
/// spread in `x`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fit_linear(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len();
    if n < 3 || y.len() != n {
        return None;
    }

    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;
    let (sxx, sxy) = x.iter().zip(y).fold((0.0, 0.0), |(sxx, sxy), (&xi, &yi)| {
        let dx = xi - mean_x;
        (sxx + dx * dx, sxy + dx * (yi - mean_y))
    });
    if sxx <= f64::EPSILON {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let rss: f64 = x
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| (yi - intercept - slope * xi).powi(2))
        .sum();
    let residual_variance = rss / (nf - 2.0);

    Some(LinearFit {
        intercept,
        slope,
        slope_se: (residual_variance / sxx).sqrt(),
        residual_variance,
        n,
    })
}

/// Treatment-effect estimate of one study.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudyEstimate {
    /// Study id
    pub study_id: i64,
    /// Parent comparison id
    pub comparison_id: i64,
    /// Coefficient of the treated flag
    pub estimate: f64,
    /// Its standard error
    pub std_error: f64,
    /// Treated rows in the subset
    pub n_treated: usize,
    /// Control rows in the subset
    pub n_control: usize,
}

/// Regress `outcome` on `treated` for one study's participant batch.
///
/// # Errors
///
/// Returns [`Error::DegenerateDesign`] if the batch has fewer than three
/// rows or only one treatment arm, or a column error if the batch is not in
/// participant schema.
pub fn estimate_study(study: &Study, batch: &RecordBatch) -> Result<StudyEstimate> {
    let treated = int32_column(batch, columns::TREATED)?;
    let outcome = float64_column(batch, columns::OUTCOME)?;

    let x: Vec<f64> = treated.values().iter().map(|&t| f64::from(t)).collect();
    let n_treated = treated.values().iter().filter(|&&t| t == 1).count();
    let n_control = x.len() - n_treated;

    let fit = fit_linear(&x, outcome.values()).ok_or_else(|| Error::DegenerateDesign {
        study_id: study.id,
        reason: format!("{n_treated} treated and {n_control} control rows"),
    })?;

    Ok(StudyEstimate {
        study_id: study.id,
        comparison_id: study.comparison_id,
        estimate: fit.slope,
        std_error: fit.slope_se,
        n_treated,
        n_control,
    })
}

/// Study-level estimates of a sampled subset.
#[derive(Debug, Clone, Default)]
pub struct StudyEstimates {
    estimates: Vec<StudyEstimate>,
    skipped: Vec<i64>,
}

impl StudyEstimates {
    /// Fit every study in the subset.
    ///
    /// Degenerate studies are skipped with a warning and listed in
    /// [`skipped`](Self::skipped).
    ///
    /// # Errors
    ///
    /// Returns error if a batch is not in participant schema.
    #[instrument(skip_all, fields(studies = subset.studies().len()))]
    pub fn fit(subset: &SampledSubset) -> Result<Self> {
        let mut out = Self::default();
        for (study, batch) in subset.iter() {
            match estimate_study(study, batch) {
                Ok(estimate) => out.estimates.push(estimate),
                Err(Error::DegenerateDesign { study_id, reason }) => {
                    warn!(study_id, %reason, "skipping study with degenerate design");
                    out.skipped.push(study_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Fitted studies.
    #[must_use]
    pub fn estimates(&self) -> &[StudyEstimate] {
        &self.estimates
    }

    /// Ids of studies that could not be fitted.
    #[must_use]
    pub fn skipped(&self) -> &[i64] {
        &self.skipped
    }

    /// Number of fitted studies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    /// Whether no study was fitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    /// Arrow view: `study_id, comparison_id, estimate, std_error, n_treated, n_control`.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("study_id", DataType::Int64, false),
            Field::new("comparison_id", DataType::Int64, false),
            Field::new("estimate", DataType::Float64, false),
            Field::new("std_error", DataType::Float64, false),
            Field::new("n_treated", DataType::Int64, false),
            Field::new("n_control", DataType::Int64, false),
        ]));
        let e = &self.estimates;
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(e.iter().map(|s| s.study_id))),
            Arc::new(Int64Array::from_iter_values(e.iter().map(|s| s.comparison_id))),
            Arc::new(Float64Array::from_iter_values(e.iter().map(|s| s.estimate))),
            Arc::new(Float64Array::from_iter_values(e.iter().map(|s| s.std_error))),
            Arc::new(Int64Array::from_iter_values(e.iter().map(|s| count(s.n_treated)))),
            Arc::new(Int64Array::from_iter_values(e.iter().map(|s| count(s.n_control)))),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::participant_schema;
    use arrow::array::Int32Array;

    fn participant_batch(treated: Vec<i32>, outcome: Vec<f64>) -> RecordBatch {
        let n = treated.len();
        RecordBatch::try_new(
            participant_schema(),
            vec![
                Arc::new(Int64Array::from(vec![1; n])),
                Arc::new(Int64Array::from_iter_values(0..i64::try_from(n).unwrap())),
                Arc::new(Int32Array::from(treated)),
                Arc::new(Float64Array::from(outcome)),
            ],
        )
        .unwrap()
    }

    fn study() -> Study {
        Study {
            id: 1,
            comparison_id: 0,
            n_treated: 3,
            n_control: 3,
        }
    }

    #[test]
    fn test_exact_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let fit = fit_linear(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!(fit.slope_se < 1e-6);
    }

    #[test]
    fn test_slope_se_matches_two_group_formula() {
        // Two groups of 3: slope = difference of means, se = s * sqrt(1/3 + 1/3)
        let x = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let y = [0.0, 1.0, 2.0, 1.0, 2.0, 3.0];
        let fit = fit_linear(&x, &y).unwrap();
        assert!((fit.slope - 1.0).abs() < 1e-12);
        // pooled variance: (2 + 2) / 4 = 1
        assert!((fit.residual_variance - 1.0).abs() < 1e-12);
        assert!((fit.slope_se - (2.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(fit_linear(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(fit_linear(&[0.0, 1.0], &[1.0, 2.0]).is_none());
        assert!(fit_linear(&[0.0, 1.0, 2.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_estimate_study() {
        let batch = participant_batch(
            vec![0, 0, 0, 1, 1, 1],
            vec![0.0, 1.0, 2.0, 1.0, 2.0, 3.0],
        );
        let estimate = estimate_study(&study(), &batch).unwrap();
        assert!((estimate.estimate - 1.0).abs() < 1e-12);
        assert_eq!(estimate.n_treated, 3);
        assert_eq!(estimate.n_control, 3);
    }

    #[test]
    fn test_single_arm_study_is_degenerate() {
        let batch = participant_batch(vec![1, 1, 1, 1], vec![0.1, 0.2, 0.3, 0.4]);
        let err = estimate_study(&study(), &batch).unwrap_err();
        assert!(matches!(err, Error::DegenerateDesign { study_id: 1, .. }));
    }
}
