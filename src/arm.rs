//! Treatment and control arms
//!
//! An arm is an unordered set of components. It is stored sorted and
//! deduplicated so that two arms built from the same components in any order
//! compare equal and render the same key ("BA" and "AB" are both `AB`).

use crate::registry::{ComponentId, ComponentRegistry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical set of components forming one arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Arm {
    components: Vec<ComponentId>,
}

impl Arm {
    /// Build an arm from components in any order.
    ///
    /// # Errors
    ///
    /// Returns error if no components are given.
    pub fn new<I>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = ComponentId>,
    {
        let mut components: Vec<ComponentId> = components.into_iter().collect();
        components.sort_unstable();
        components.dedup();
        if components.is_empty() {
            return Err(Error::InvalidInput("an arm needs at least one component".to_string()));
        }
        Ok(Self { components })
    }

    /// Parse an arm key such as `"AC"`, checking every identifier against the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for identifiers outside the alphabet.
    pub fn parse(key: &str, registry: &ComponentRegistry) -> Result<Self> {
        let ids = key
            .chars()
            .map(|ch| {
                let id = ComponentId::new(ch);
                if registry.contains(id) {
                    Ok(id)
                } else {
                    Err(Error::UnknownComponent(ch))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(ids)
    }

    /// Components in canonical order.
    #[must_use]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// Number of components in the arm.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Always false; arms are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Whether the arm includes `id`.
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.binary_search(&id).is_ok()
    }

    /// Whether the two arms share any component.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.components.iter().any(|&id| other.contains(id))
    }

    /// Canonical string key, e.g. `"ABC"`.
    #[must_use]
    pub fn key(&self) -> String {
        self.components.iter().map(|id| id.as_char()).collect()
    }

    /// Sum of the true effects of the arm's components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if a component is not registered.
    pub fn effect(&self, registry: &ComponentRegistry) -> Result<f64> {
        self.components
            .iter()
            .map(|&id| registry.effect(id))
            .sum()
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in &self.components {
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// One flag per registered component, in registry order.
///
/// Built from the arm's component set, never from its string key, so the
/// flags cannot drift from the arm they describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    flags: Vec<bool>,
}

impl Membership {
    /// Flags for `arm` over every component of `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if the arm holds an unregistered component.
    pub fn of(arm: &Arm, registry: &ComponentRegistry) -> Result<Self> {
        let mut flags = vec![false; registry.len()];
        for &id in arm.components() {
            let i = registry
                .index_of(id)
                .ok_or(Error::UnknownComponent(id.as_char()))?;
            flags[i] = true;
        }
        Ok(Self { flags })
    }

    /// Flag at registry position `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    /// All flags in registry order.
    #[must_use]
    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    /// Number of set flags.
    #[must_use]
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn registry() -> ComponentRegistry {
        ComponentRegistry::new(&['A', 'B', 'C', 'D', 'Z'], &[0.5, 0.25]).unwrap()
    }

    fn ids(s: &str) -> Vec<ComponentId> {
        s.chars().map(ComponentId::new).collect()
    }

    #[test]
    fn test_arm_is_order_independent() {
        let ba = Arm::new(ids("BA")).unwrap();
        let ab = Arm::new(ids("AB")).unwrap();
        assert_eq!(ba, ab);
        assert_eq!(ba.key(), "AB");
        assert_eq!(ba.to_string(), "AB");
    }

    #[test]
    fn test_arm_dedups_components() {
        let arm = Arm::new(ids("CAAC")).unwrap();
        assert_eq!(arm.key(), "AC");
        assert_eq!(arm.len(), 2);
    }

    #[test]
    fn test_empty_arm_rejected() {
        assert!(Arm::new(Vec::new()).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_component() {
        let err = Arm::parse("AX", &registry()).unwrap_err();
        assert!(matches!(err, Error::UnknownComponent('X')));
    }

    #[test]
    fn test_arm_effect_sums_components() {
        let arm = Arm::parse("AB", &registry()).unwrap();
        assert_eq!(arm.effect(&registry()).unwrap(), 0.75);
    }

    #[test]
    fn test_membership_flags() {
        let reg = registry();
        let arm = Arm::parse("CA", &reg).unwrap();
        let membership = Membership::of(&arm, &reg).unwrap();
        assert_eq!(membership.flags(), &[true, false, true, false, false]);
        assert_eq!(membership.count(), arm.len());
    }

    #[test]
    fn test_overlap() {
        let reg = registry();
        let ab = Arm::parse("AB", &reg).unwrap();
        let bc = Arm::parse("BC", &reg).unwrap();
        let z = Arm::parse("Z", &reg).unwrap();
        assert!(ab.overlaps(&bc));
        assert!(!ab.overlaps(&z));
    }
}
