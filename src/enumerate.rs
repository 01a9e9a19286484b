//! Combination enumerator
//!
//! Builds every treatment arm of up to `k` components as the size-`k`
//! combinations of the first `k` components plus `k - 1` padding slots.
//! Control arms are built the same way from the control components.
//! Padding is stripped, each combination is canonicalised by [`Arm`], and
//! duplicates collapse. For `k = 3` over `A B C` that is exactly the seven
//! nonempty subsets `A B C AB AC BC ABC`.
//!
//! Treatment arms crossed with control arms give the comparison table, each
//! row carrying its true effect and per-component membership flags.

use crate::arm::{Arm, Membership};
use crate::config::SimulationConfig;
use crate::registry::{ComponentId, ComponentRegistry};
use crate::{Error, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// All size-`k` combinations of `items`, in lexicographic index order.
///
/// Returns `C(n, k)` combinations; `k = 0` yields one empty combination and
/// `k > n` yields none.
#[must_use]
pub fn combinations<T: Clone>(items: &[T], k: usize) -> Vec<Vec<T>> {
    let n = items.len();
    if k > n {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.iter().map(|&i| items[i].clone()).collect());

        // Rightmost position that can still advance
        let Some(pos) = (0..k).rev().find(|&i| idx[i] != i + n - k) else {
            return out;
        };
        idx[pos] += 1;
        for j in pos + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// Unique arms of up to `size` components drawn from `pool`.
///
/// Arms are ordered by size, then canonically.
///
/// # Errors
///
/// Returns [`Error::ArmSizeExceedsAlphabet`] if `size` exceeds the pool, or
/// [`Error::InvalidConfig`] if `size` is zero.
pub fn enumerate_arms(pool: &[ComponentId], size: usize) -> Result<Vec<Arm>> {
    if size == 0 {
        return Err(Error::InvalidConfig("arm size must be at least 1".to_string()));
    }
    if size > pool.len() {
        return Err(Error::ArmSizeExceedsAlphabet {
            requested: size,
            available: pool.len(),
        });
    }

    let padded: Vec<Option<ComponentId>> = pool
        .iter()
        .copied()
        .map(Some)
        .chain(std::iter::repeat(None).take(size - 1))
        .collect();

    let mut unique = BTreeSet::new();
    for combo in combinations(&padded, size) {
        let ids: Vec<ComponentId> = combo.into_iter().flatten().collect();
        if let Ok(arm) = Arm::new(ids) {
            unique.insert(arm);
        }
    }

    let mut arms: Vec<Arm> = unique.into_iter().collect();
    arms.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    Ok(arms)
}

/// Treatment arms over the first `max_size` registered components.
///
/// # Errors
///
/// Returns [`Error::ArmSizeExceedsAlphabet`] if `max_size` exceeds the alphabet.
pub fn treatment_arms(registry: &ComponentRegistry, max_size: usize) -> Result<Vec<Arm>> {
    let pool: Vec<ComponentId> = registry.ids().take(max_size).collect();
    if max_size > registry.len() {
        return Err(Error::ArmSizeExceedsAlphabet {
            requested: max_size,
            available: registry.len(),
        });
    }
    enumerate_arms(&pool, max_size)
}

/// Control arms of up to `max_size` components drawn from `controls`.
///
/// # Errors
///
/// Returns [`Error::UnknownComponent`] for unregistered controls and
/// [`Error::ArmSizeExceedsAlphabet`] if `max_size` exceeds `controls`.
pub fn control_arms(
    registry: &ComponentRegistry,
    controls: &[ComponentId],
    max_size: usize,
) -> Result<Vec<Arm>> {
    if let Some(unknown) = controls.iter().find(|&&id| !registry.contains(id)) {
        return Err(Error::UnknownComponent(unknown.as_char()));
    }
    enumerate_arms(controls, max_size)
}

/// One treatment-vs-control pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Row id in the comparison table
    pub id: i64,
    /// Treatment arm
    pub treatment: Arm,
    /// Control arm
    pub control: Arm,
    /// Sum of treatment effects minus sum of control effects
    pub true_effect: f64,
    /// Per-component flags of the treatment arm
    pub membership: Membership,
    /// Per-component flags of the control arm
    pub control_membership: Membership,
}

impl Comparison {
    /// Pair two arms and derive the true effect and membership flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for unregistered components, or
    /// [`Error::InvalidConfig`] if the arms share a component.
    pub fn new(id: i64, treatment: Arm, control: Arm, registry: &ComponentRegistry) -> Result<Self> {
        if treatment.overlaps(&control) {
            return Err(Error::InvalidConfig(format!(
                "treatment arm {treatment} shares a component with control arm {control}"
            )));
        }
        let true_effect = treatment.effect(registry)? - control.effect(registry)?;
        let membership = Membership::of(&treatment, registry)?;
        let control_membership = Membership::of(&control, registry)?;
        Ok(Self {
            id,
            treatment,
            control,
            true_effect,
            membership,
            control_membership,
        })
    }

    /// Signed component contrast: `+1` in treatment, `-1` in control, `0` otherwise.
    #[must_use]
    pub fn contrast(&self) -> Vec<f64> {
        self.membership
            .flags()
            .iter()
            .zip(self.control_membership.flags())
            .map(|(&t, &c)| f64::from(u8::from(t)) - f64::from(u8::from(c)))
            .collect()
    }
}

/// Every treatment arm crossed with every control arm.
#[derive(Debug, Clone)]
pub struct ComparisonTable {
    component_ids: Vec<ComponentId>,
    comparisons: Vec<Comparison>,
}

impl ComparisonTable {
    /// Cross treatment and control arms.
    ///
    /// # Errors
    ///
    /// Returns error if an arm holds an unregistered component or a pair overlaps.
    pub fn build(registry: &ComponentRegistry, treatments: &[Arm], controls: &[Arm]) -> Result<Self> {
        let mut comparisons = Vec::with_capacity(treatments.len() * controls.len());
        for treatment in treatments {
            for control in controls {
                let id = i64::try_from(comparisons.len())
                    .map_err(|e| Error::Other(format!("comparison id overflow: {e}")))?;
                comparisons.push(Comparison::new(id, treatment.clone(), control.clone(), registry)?);
            }
        }
        Ok(Self {
            component_ids: registry.ids().collect(),
            comparisons,
        })
    }

    /// Enumerate treatment and control arms from a validated config.
    ///
    /// # Errors
    ///
    /// Returns error on any configuration problem in arm enumeration.
    #[instrument(skip_all, fields(max_tx = config.max_treatment_size, max_ctrl = config.max_control_size))]
    pub fn from_config(config: &SimulationConfig, registry: &ComponentRegistry) -> Result<Self> {
        let treatments = treatment_arms(registry, config.max_treatment_size)?;
        let controls = control_arms(registry, &config.control_pool(), config.max_control_size)?;
        let table = Self::build(registry, &treatments, &controls)?;
        debug!(
            treatments = treatments.len(),
            controls = controls.len(),
            comparisons = table.len(),
            "enumerated comparisons"
        );
        Ok(table)
    }

    /// Number of comparisons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.comparisons.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comparisons.is_empty()
    }

    /// All comparisons, ids matching positions.
    #[must_use]
    pub fn comparisons(&self) -> &[Comparison] {
        &self.comparisons
    }

    /// Comparison by id.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Comparison> {
        usize::try_from(id).ok().and_then(|i| self.comparisons.get(i))
    }

    /// Distinct treatment arms in table order.
    #[must_use]
    pub fn treatment_arms(&self) -> Vec<Arm> {
        let mut seen = BTreeSet::new();
        self.comparisons
            .iter()
            .filter(|c| seen.insert(c.treatment.clone()))
            .map(|c| c.treatment.clone())
            .collect()
    }

    /// Arrow view: `comparison_id, treatment, control, true_effect` and one
    /// boolean column per component.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![
            Field::new("comparison_id", DataType::Int64, false),
            Field::new("treatment", DataType::Utf8, false),
            Field::new("control", DataType::Utf8, false),
            Field::new("true_effect", DataType::Float64, false),
        ];
        fields.extend(
            self.component_ids
                .iter()
                .map(|id| Field::new(id.to_string(), DataType::Boolean, false)),
        );

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(self.comparisons.iter().map(|c| c.id))),
            Arc::new(StringArray::from_iter_values(
                self.comparisons.iter().map(|c| c.treatment.key()),
            )),
            Arc::new(StringArray::from_iter_values(
                self.comparisons.iter().map(|c| c.control.key()),
            )),
            Arc::new(Float64Array::from_iter_values(
                self.comparisons.iter().map(|c| c.true_effect),
            )),
        ];
        for i in 0..self.component_ids.len() {
            let flags: Vec<bool> = self.comparisons.iter().map(|c| c.membership.get(i)).collect();
            columns.push(Arc::new(BooleanArray::from(flags)));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}
