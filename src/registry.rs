//! Component effect registry
//!
//! Maps each atomic treatment component to its population effect size.
//! Built once from the configured alphabet and never mutated afterwards.

use crate::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single-character identifier of a treatment component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(char);

impl ComponentId {
    /// Wrap a character as a component identifier.
    #[must_use]
    pub const fn new(id: char) -> Self {
        Self(id)
    }

    /// The underlying character.
    #[must_use]
    pub const fn as_char(self) -> char {
        self.0
    }
}

impl From<char> for ComponentId {
    fn from(id: char) -> Self {
        Self(id)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered component and its true effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Identifier
    pub id: ComponentId,
    /// Population-level effect size
    pub effect: f64,
}

/// Ordered lookup from component identifier to effect size.
///
/// Order is the alphabet order given at construction; it fixes the column
/// order of membership vectors and of every per-component table.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    components: Vec<Component>,
    index: FxHashMap<ComponentId, usize>,
}

impl ComponentRegistry {
    /// Build a registry from an ordered alphabet and effect sizes.
    ///
    /// `effects[i]` belongs to `alphabet[i]`. Missing trailing effects
    /// default to zero.
    ///
    /// # Errors
    ///
    /// Returns error if the alphabet is empty, contains duplicates, or if
    /// more effects than identifiers are given.
    pub fn new(alphabet: &[char], effects: &[f64]) -> Result<Self> {
        if alphabet.is_empty() {
            return Err(Error::InvalidConfig("component alphabet is empty".to_string()));
        }
        if effects.len() > alphabet.len() {
            return Err(Error::InvalidConfig(format!(
                "{} effect sizes given for {} components",
                effects.len(),
                alphabet.len()
            )));
        }

        let mut components = Vec::with_capacity(alphabet.len());
        let mut index = FxHashMap::default();
        for (i, &ch) in alphabet.iter().enumerate() {
            let id = ComponentId(ch);
            if index.insert(id, i).is_some() {
                return Err(Error::DuplicateComponent(ch));
            }
            components.push(Component {
                id,
                effect: effects.get(i).copied().unwrap_or(0.0),
            });
        }

        Ok(Self { components, index })
    }

    /// Number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the registry has no components (never true once built).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Components in alphabet order.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Identifiers in alphabet order.
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.iter().map(|c| c.id)
    }

    /// Position of a component in the alphabet.
    #[must_use]
    pub fn index_of(&self, id: ComponentId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.index.contains_key(&id)
    }

    /// Effect size of a registered component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if `id` is not registered.
    pub fn effect(&self, id: ComponentId) -> Result<f64> {
        self.index_of(id)
            .map(|i| self.components[i].effect)
            .ok_or(Error::UnknownComponent(id.as_char()))
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_effects_default_to_zero() {
        let registry = ComponentRegistry::new(&['A', 'B', 'C', 'Z'], &[0.5, 0.25]).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.effect(ComponentId::new('A')).unwrap(), 0.5);
        assert_eq!(registry.effect(ComponentId::new('B')).unwrap(), 0.25);
        assert_eq!(registry.effect(ComponentId::new('C')).unwrap(), 0.0);
        assert_eq!(registry.effect(ComponentId::new('Z')).unwrap(), 0.0);
    }

    #[test]
    fn test_index_follows_alphabet_order() {
        let registry = ComponentRegistry::new(&['Q', 'A', 'M'], &[]).unwrap();
        assert_eq!(registry.index_of(ComponentId::new('Q')), Some(0));
        assert_eq!(registry.index_of(ComponentId::new('M')), Some(2));
        assert_eq!(registry.index_of(ComponentId::new('X')), None);
    }

    #[test]
    fn test_unknown_component_is_error() {
        let registry = ComponentRegistry::new(&['A'], &[1.0]).unwrap();
        let err = registry.effect(ComponentId::new('B')).unwrap_err();
        assert!(matches!(err, Error::UnknownComponent('B')));
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let err = ComponentRegistry::new(&['A', 'B', 'A'], &[]).unwrap_err();
        assert!(matches!(err, Error::DuplicateComponent('A')));
    }

    #[test]
    fn test_too_many_effects_rejected() {
        assert!(ComponentRegistry::new(&['A'], &[1.0, 2.0]).is_err());
        assert!(ComponentRegistry::new(&[], &[]).is_err());
    }
}
