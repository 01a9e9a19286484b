//! Random-effects meta-regression on component contrasts
//!
//! Second stage of the analysis. Each study contributes its estimate `y_i`
//! with standard error `se_i` and a contrast row `x_i` (`+1` for components
//! in the treatment arm, `-1` for components in the control arm). The model
//!
//! ```text
//! y_i = x_i' beta + u_i + e_i,   u_i ~ N(0, tau²),   e_i ~ N(0, se_i²)
//! ```
//!
//! is fitted by weighted least squares. `tau²` is the method-of-moments
//! residual heterogeneity (DerSimonian-Laird generalised to regressors),
//! truncated at zero. `u_i` is the per-study random intercept.

use crate::enumerate::ComparisonTable;
use crate::registry::{ComponentId, ComponentRegistry};
use crate::stats::ols::StudyEstimate;
use crate::{Error, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Two-sided confidence level of reported intervals.
pub const CONFIDENCE_LEVEL: f64 = 0.95;

/// One component coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentEstimate {
    /// Component
    pub component: ComponentId,
    /// Coefficient
    pub estimate: f64,
    /// Standard error
    pub std_error: f64,
    /// Wald statistic
    pub z: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Lower confidence bound
    pub ci_lower: f64,
    /// Upper confidence bound
    pub ci_upper: f64,
}

/// Coefficient paired with its ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecovery {
    /// Component
    pub component: ComponentId,
    /// Registered effect
    pub true_effect: f64,
    /// Fitted coefficient
    pub estimate: f64,
    /// Standard error
    pub std_error: f64,
    /// `estimate - true_effect`
    pub bias: f64,
    /// Whether the confidence interval contains the true effect
    pub covered: bool,
    /// Two-sided p-value against zero
    pub p_value: f64,
}

/// Fitted meta-regression.
#[derive(Debug, Clone)]
pub struct MetaRegression {
    components: Vec<ComponentEstimate>,
    coefficients: DVector<f64>,
    covariance: DMatrix<f64>,
    tau2: f64,
    q_e: f64,
    studies: usize,
}

impl MetaRegression {
    /// Fit study-level estimates against their comparisons' component contrasts.
    ///
    /// Only components that appear in at least one study become columns.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an unknown comparison or a non-positive standard error
    /// - [`Error::SingularDesign`] if there are no more studies than columns
    ///   or the weighted normal equations are not positive definite
    #[instrument(skip_all, fields(studies = estimates.len()))]
    pub fn fit(
        estimates: &[StudyEstimate],
        comparisons: &ComparisonTable,
        registry: &ComponentRegistry,
    ) -> Result<Self> {
        let mut rows = Vec::with_capacity(estimates.len());
        for e in estimates {
            if !(e.std_error.is_finite() && e.std_error > 0.0) {
                return Err(Error::InvalidInput(format!(
                    "study {} has standard error {}",
                    e.study_id, e.std_error
                )));
            }
            let comparison = comparisons.get(e.comparison_id).ok_or_else(|| {
                Error::InvalidInput(format!("study {} has unknown comparison {}", e.study_id, e.comparison_id))
            })?;
            rows.push(comparison.contrast());
        }

        let active: Vec<usize> = (0..registry.len())
            .filter(|&j| rows.iter().any(|row| row[j] != 0.0))
            .collect();
        let k = estimates.len();
        let p = active.len();
        if p == 0 || k <= p {
            return Err(Error::SingularDesign(format!(
                "{k} studies for {p} component coefficients"
            )));
        }

        let x = DMatrix::from_fn(k, p, |i, j| rows[i][active[j]]);
        let y = DVector::from_iterator(k, estimates.iter().map(|e| e.estimate));
        let variances: Vec<f64> = estimates.iter().map(|e| e.std_error.powi(2)).collect();

        // Fixed-effect pass for the heterogeneity statistic
        let w_fixed: Vec<f64> = variances.iter().map(|v| 1.0 / v).collect();
        let fixed = weighted_least_squares(&x, &y, &w_fixed)?;
        let residuals = &y - &x * &fixed.beta;
        let q_e: f64 = residuals
            .iter()
            .zip(&w_fixed)
            .map(|(r, w)| w * r * r)
            .sum();

        // tr(P) = tr(W) - tr((X'WX)^-1 X'W²X)
        let w2: Vec<f64> = w_fixed.iter().map(|w| w * w).collect();
        let xtw2x = weighted_gram(&x, &w2);
        let trace = w_fixed.iter().sum::<f64>() - (&fixed.inverse * xtw2x).trace();
        #[allow(clippy::cast_precision_loss)]
        let df = (k - p) as f64;
        let tau2 = if trace > 0.0 {
            ((q_e - df) / trace).max(0.0)
        } else {
            0.0
        };

        let w_random: Vec<f64> = variances.iter().map(|v| 1.0 / (v + tau2)).collect();
        let random = weighted_least_squares(&x, &y, &w_random)?;

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| Error::Other(format!("standard normal: {e}")))?;
        let z_crit = normal.inverse_cdf(0.5 + CONFIDENCE_LEVEL / 2.0);
        let ids: Vec<ComponentId> = registry.ids().collect();
        let components = active
            .iter()
            .enumerate()
            .map(|(j, &col)| {
                let estimate = random.beta[j];
                let std_error = random.inverse[(j, j)].max(0.0).sqrt();
                let z = estimate / std_error;
                ComponentEstimate {
                    component: ids[col],
                    estimate,
                    std_error,
                    z,
                    p_value: 2.0 * (1.0 - normal.cdf(z.abs())),
                    ci_lower: estimate - z_crit * std_error,
                    ci_upper: estimate + z_crit * std_error,
                }
            })
            .collect();

        debug!(tau2, q_e, k, p, "fitted meta-regression");
        Ok(Self {
            components,
            coefficients: random.beta,
            covariance: random.inverse,
            tau2,
            q_e,
            studies: k,
        })
    }

    /// Coefficients of the components that entered the model, in registry order.
    #[must_use]
    pub fn components(&self) -> &[ComponentEstimate] {
        &self.components
    }

    /// Coefficient of one component, if it entered the model.
    #[must_use]
    pub fn component(&self, id: ComponentId) -> Option<&ComponentEstimate> {
        self.components.iter().find(|c| c.component == id)
    }

    /// Coefficient vector, aligned with [`components`](Self::components).
    #[must_use]
    pub const fn coefficients(&self) -> &DVector<f64> {
        &self.coefficients
    }

    /// Covariance of the coefficient vector.
    #[must_use]
    pub const fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Residual between-study variance.
    #[must_use]
    pub const fn tau2(&self) -> f64 {
        self.tau2
    }

    /// Residual heterogeneity statistic of the fixed-effect fit.
    #[must_use]
    pub const fn q_e(&self) -> f64 {
        self.q_e
    }

    /// Studies in the fit.
    #[must_use]
    pub const fn studies(&self) -> usize {
        self.studies
    }

    /// Compare every coefficient with the registry's true effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if a fitted component is not registered.
    pub fn recovery(&self, registry: &ComponentRegistry) -> Result<Vec<ComponentRecovery>> {
        self.components
            .iter()
            .map(|c| {
                let true_effect = registry.effect(c.component)?;
                Ok(ComponentRecovery {
                    component: c.component,
                    true_effect,
                    estimate: c.estimate,
                    std_error: c.std_error,
                    bias: c.estimate - true_effect,
                    covered: c.ci_lower <= true_effect && true_effect <= c.ci_upper,
                    p_value: c.p_value,
                })
            })
            .collect()
    }

    /// Arrow view: `component, estimate, std_error, z, p_value, ci_lower, ci_upper`.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let c = &self.components;
        let schema = Arc::new(Schema::new(vec![
            Field::new("component", DataType::Utf8, false),
            Field::new("estimate", DataType::Float64, false),
            Field::new("std_error", DataType::Float64, false),
            Field::new("z", DataType::Float64, false),
            Field::new("p_value", DataType::Float64, false),
            Field::new("ci_lower", DataType::Float64, false),
            Field::new("ci_upper", DataType::Float64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(c.iter().map(|e| e.component.to_string()))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|e| e.estimate))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|e| e.std_error))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|e| e.z))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|e| e.p_value))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|e| e.ci_lower))),
            Arc::new(Float64Array::from_iter_values(c.iter().map(|e| e.ci_upper))),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// Arrow view of a recovery table: `component, true_effect, estimate, std_error, bias, covered`.
///
/// # Errors
///
/// Returns error if the batch cannot be assembled.
pub fn recovery_record_batch(recovery: &[ComponentRecovery]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("component", DataType::Utf8, false),
        Field::new("true_effect", DataType::Float64, false),
        Field::new("estimate", DataType::Float64, false),
        Field::new("std_error", DataType::Float64, false),
        Field::new("bias", DataType::Float64, false),
        Field::new("covered", DataType::Boolean, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(recovery.iter().map(|r| r.component.to_string()))),
        Arc::new(Float64Array::from_iter_values(recovery.iter().map(|r| r.true_effect))),
        Arc::new(Float64Array::from_iter_values(recovery.iter().map(|r| r.estimate))),
        Arc::new(Float64Array::from_iter_values(recovery.iter().map(|r| r.std_error))),
        Arc::new(Float64Array::from_iter_values(recovery.iter().map(|r| r.bias))),
        Arc::new(BooleanArray::from(recovery.iter().map(|r| r.covered).collect::<Vec<_>>())),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

struct WlsFit {
    beta: DVector<f64>,
    // (X'WX)^-1
    inverse: DMatrix<f64>,
}

/// `X' diag(w) X`
fn weighted_gram(x: &DMatrix<f64>, w: &[f64]) -> DMatrix<f64> {
    let p = x.ncols();
    DMatrix::from_fn(p, p, |a, b| {
        w.iter()
            .enumerate()
            .map(|(i, wi)| wi * x[(i, a)] * x[(i, b)])
            .sum()
    })
}

fn weighted_least_squares(x: &DMatrix<f64>, y: &DVector<f64>, w: &[f64]) -> Result<WlsFit> {
    let gram = weighted_gram(x, w);
    let xtwy = DVector::from_fn(x.ncols(), |a, _| {
        w.iter()
            .enumerate()
            .map(|(i, wi)| wi * x[(i, a)] * y[i])
            .sum()
    });
    let chol = gram.cholesky().ok_or_else(|| {
        Error::SingularDesign("weighted normal equations are not positive definite".to_string())
    })?;
    Ok(WlsFit {
        beta: chol.solve(&xtwy),
        inverse: chol.inverse(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::Arm;
    use crate::enumerate::{treatment_arms, ComparisonTable};

    fn setup() -> (ComponentRegistry, ComparisonTable) {
        let registry = ComponentRegistry::new(&['A', 'B', 'C', 'Z'], &[0.5, 0.25]).unwrap();
        let treatments = treatment_arms(&registry, 3).unwrap();
        let controls = vec![Arm::parse("Z", &registry).unwrap()];
        let table = ComparisonTable::build(&registry, &treatments, &controls).unwrap();
        (registry, table)
    }

    fn exact_estimates(table: &ComparisonTable, per_comparison: usize) -> Vec<StudyEstimate> {
        let mut out = Vec::new();
        let mut id = 1;
        for c in table.comparisons() {
            for _ in 0..per_comparison {
                out.push(StudyEstimate {
                    study_id: id,
                    comparison_id: c.id,
                    estimate: c.true_effect,
                    std_error: 0.1,
                    n_treated: 50,
                    n_control: 50,
                });
                id += 1;
            }
        }
        out
    }

    #[test]
    fn test_noise_free_estimates_recover_effects() {
        let (registry, table) = setup();
        let estimates = exact_estimates(&table, 2);
        let fit = MetaRegression::fit(&estimates, &table, &registry).unwrap();

        assert_eq!(fit.components().len(), 4);
        assert!(fit.tau2().abs() < 1e-9);
        for recovery in fit.recovery(&registry).unwrap() {
            assert!(recovery.bias.abs() < 1e-9, "{recovery:?}");
            assert!(recovery.covered);
        }
        let a = fit.component(ComponentId::new('A')).unwrap();
        assert!((a.estimate - 0.5).abs() < 1e-9);
        assert!(a.p_value < 1e-6);
    }

    #[test]
    fn test_heterogeneity_gives_positive_tau2() {
        let (registry, table) = setup();
        let mut estimates = exact_estimates(&table, 4);
        for (i, e) in estimates.iter_mut().enumerate() {
            e.estimate += if i % 2 == 0 { 0.8 } else { -0.8 };
        }
        let fit = MetaRegression::fit(&estimates, &table, &registry).unwrap();
        assert!(fit.tau2() > 0.1);
        assert!(fit.q_e() > 0.0);
    }

    #[test]
    fn test_too_few_studies_is_singular() {
        let (registry, table) = setup();
        let estimates: Vec<StudyEstimate> = exact_estimates(&table, 1).into_iter().take(3).collect();
        let err = MetaRegression::fit(&estimates, &table, &registry).unwrap_err();
        assert!(matches!(err, Error::SingularDesign(_)));
    }

    #[test]
    fn test_collinear_design_is_singular() {
        let (registry, table) = setup();
        // Only arm "AB": A and B columns are identical
        let ab = table
            .comparisons()
            .iter()
            .find(|c| c.treatment.key() == "AB")
            .unwrap()
            .id;
        let estimates: Vec<StudyEstimate> = exact_estimates(&table, 3)
            .into_iter()
            .filter(|e| e.comparison_id == ab)
            .collect();
        assert!(MetaRegression::fit(&estimates, &table, &registry).is_err());
    }

    #[test]
    fn test_non_positive_standard_error_rejected() {
        let (registry, table) = setup();
        let mut estimates = exact_estimates(&table, 2);
        estimates[0].std_error = 0.0;
        let err = MetaRegression::fit(&estimates, &table, &registry).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_record_batches() {
        let (registry, table) = setup();
        let fit = MetaRegression::fit(&exact_estimates(&table, 2), &table, &registry).unwrap();
        assert_eq!(fit.to_record_batch().unwrap().num_rows(), 4);
        let recovery = fit.recovery(&registry).unwrap();
        let batch = recovery_record_batch(&recovery).unwrap();
        assert_eq!(batch.num_columns(), 6);
    }
}
