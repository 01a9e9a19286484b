//! Simulation configuration
//!
//! All run parameters live in one immutable [`SimulationConfig`]. It is
//! validated once before any stage runs and embedded verbatim in the run
//! report, so a report always carries the parameters that produced it.

use crate::registry::{ComponentId, ComponentRegistry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Heavy-tailed per-study truncation: Cauchy(location, scale) clipped to `[floor, ceiling]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Cauchy location (median)
    pub location: f64,
    /// Cauchy scale (half-width at half-maximum)
    pub scale: f64,
    /// Smallest number of participant records kept per study
    pub floor: usize,
    /// Largest number of participant records kept per study
    pub ceiling: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            location: 100.0,
            scale: 100.0,
            floor: 20,
            ceiling: 1000,
        }
    }
}

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Ordered component alphabet (treatment and control components)
    pub alphabet: Vec<char>,
    /// True effect per alphabet entry; missing trailing entries are zero
    pub effects: Vec<f64>,
    /// Components control arms are built from
    pub control_components: Vec<char>,
    /// Treatment arms are drawn from the first `max_treatment_size` components
    pub max_treatment_size: usize,
    /// Largest control arm
    pub max_control_size: usize,
    /// Studies generated per comparison (on average; comparisons are drawn with replacement)
    pub studies_per_comparison: usize,
    /// Participant indices run over `0..=max_participants` in each arm
    pub max_participants: usize,
    /// Studies selected without replacement for analysis
    pub sampled_studies: usize,
    /// Per-study participant truncation
    pub truncation: TruncationConfig,
    /// Coefficient draws used for rank distributions
    pub rank_draws: usize,
    /// Seed of the injected random source
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            alphabet: vec!['A', 'B', 'C', 'D', 'Z'],
            effects: vec![0.5, 0.25],
            control_components: vec!['Z'],
            max_treatment_size: 3,
            max_control_size: 1,
            studies_per_comparison: 100,
            max_participants: 1000,
            sampled_studies: 50,
            truncation: TruncationConfig::default(),
            rank_draws: 1000,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// Start a builder from the defaults.
    #[must_use]
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::default()
    }

    /// Participant records per study (both arms).
    #[must_use]
    pub const fn participants_per_study(&self) -> usize {
        2 * (self.max_participants + 1)
    }

    /// Studies generated over `comparisons` comparisons.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the count overflows `usize`.
    pub fn total_studies(&self, comparisons: usize) -> Result<usize> {
        self.studies_per_comparison
            .checked_mul(comparisons)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "{} studies per comparison over {comparisons} comparisons overflows",
                    self.studies_per_comparison
                ))
            })
    }

    /// Build the component registry described by this config.
    ///
    /// # Errors
    ///
    /// Returns error if the alphabet is empty, has duplicates, or has fewer
    /// entries than `effects`.
    pub fn registry(&self) -> Result<ComponentRegistry> {
        ComponentRegistry::new(&self.alphabet, &self.effects)
    }

    /// Components treatment arms are enumerated from.
    #[must_use]
    pub fn treatment_pool(&self) -> Vec<ComponentId> {
        self.alphabet
            .iter()
            .take(self.max_treatment_size)
            .copied()
            .map(ComponentId::new)
            .collect()
    }

    /// Components control arms are enumerated from.
    #[must_use]
    pub fn control_pool(&self) -> Vec<ComponentId> {
        self.control_components
            .iter()
            .copied()
            .map(ComponentId::new)
            .collect()
    }

    /// Check every fatal configuration rule.
    ///
    /// # Errors
    ///
    /// - [`Error::ArmSizeExceedsAlphabet`] if an arm size exceeds its pool
    /// - [`Error::UnknownComponent`] if a control component is not registered
    /// - [`Error::TruncationBelowFloor`] if no study can reach the truncation floor
    /// - [`Error::InvalidConfig`] for zero counts, non-finite distribution
    ///   parameters, or control components overlapping the treatment pool
    pub fn validate(&self) -> Result<()> {
        let registry = self.registry()?;

        if self.max_treatment_size == 0 {
            return Err(Error::InvalidConfig("max_treatment_size must be at least 1".to_string()));
        }
        if self.max_treatment_size > registry.len() {
            return Err(Error::ArmSizeExceedsAlphabet {
                requested: self.max_treatment_size,
                available: registry.len(),
            });
        }

        let controls = self.control_pool();
        if controls.is_empty() {
            return Err(Error::InvalidConfig("at least one control component is required".to_string()));
        }
        for &id in &controls {
            if !registry.contains(id) {
                return Err(Error::UnknownComponent(id.as_char()));
            }
        }
        let pool = self.treatment_pool();
        if let Some(shared) = controls.iter().find(|id| pool.contains(*id)) {
            return Err(Error::InvalidConfig(format!(
                "control component '{shared}' is also in the treatment pool"
            )));
        }
        if self.max_control_size == 0 {
            return Err(Error::InvalidConfig("max_control_size must be at least 1".to_string()));
        }
        if self.max_control_size > controls.len() {
            return Err(Error::ArmSizeExceedsAlphabet {
                requested: self.max_control_size,
                available: controls.len(),
            });
        }

        if self.studies_per_comparison == 0 {
            return Err(Error::InvalidConfig("studies_per_comparison must be at least 1".to_string()));
        }
        if self.sampled_studies == 0 {
            return Err(Error::InvalidConfig("sampled_studies must be at least 1".to_string()));
        }
        if self.rank_draws == 0 {
            return Err(Error::InvalidConfig("rank_draws must be at least 1".to_string()));
        }
        if self.effects.iter().any(|e| !e.is_finite()) {
            return Err(Error::InvalidConfig("effect sizes must be finite".to_string()));
        }

        let t = &self.truncation;
        if !t.location.is_finite() || !t.scale.is_finite() || t.scale <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "truncation needs finite location and positive scale, got location={} scale={}",
                t.location, t.scale
            )));
        }
        if t.floor == 0 {
            return Err(Error::InvalidConfig("truncation floor must be at least 1".to_string()));
        }
        if t.ceiling < t.floor {
            return Err(Error::TruncationBelowFloor {
                target: t.ceiling,
                floor: t.floor,
            });
        }
        if self.participants_per_study() < t.floor {
            return Err(Error::TruncationBelowFloor {
                target: self.participants_per_study(),
                floor: t.floor,
            });
        }

        Ok(())
    }
}

/// Builder for [`SimulationConfig`].
#[derive(Debug, Default)]
pub struct SimulationConfigBuilder {
    config: SimulationConfig,
}

impl SimulationConfigBuilder {
    /// Set the alphabet and per-component effects.
    #[must_use]
    pub fn components(mut self, alphabet: &[char], effects: &[f64]) -> Self {
        self.config.alphabet = alphabet.to_vec();
        self.config.effects = effects.to_vec();
        self
    }

    /// Set the control components.
    #[must_use]
    pub fn control_components(mut self, controls: &[char]) -> Self {
        self.config.control_components = controls.to_vec();
        self
    }

    /// Set the treatment arm size.
    #[must_use]
    pub fn max_treatment_size(mut self, size: usize) -> Self {
        self.config.max_treatment_size = size;
        self
    }

    /// Set the control arm size.
    #[must_use]
    pub fn max_control_size(mut self, size: usize) -> Self {
        self.config.max_control_size = size;
        self
    }

    /// Set the number of studies per comparison.
    #[must_use]
    pub fn studies_per_comparison(mut self, n: usize) -> Self {
        self.config.studies_per_comparison = n;
        self
    }

    /// Set the participant index range `0..=n` per arm.
    #[must_use]
    pub fn max_participants(mut self, n: usize) -> Self {
        self.config.max_participants = n;
        self
    }

    /// Set the number of studies sampled for analysis.
    #[must_use]
    pub fn sampled_studies(mut self, n: usize) -> Self {
        self.config.sampled_studies = n;
        self
    }

    /// Set the truncation distribution.
    #[must_use]
    pub fn truncation(mut self, truncation: TruncationConfig) -> Self {
        self.config.truncation = truncation;
        self
    }

    /// Set the number of rank draws.
    #[must_use]
    pub fn rank_draws(mut self, n: usize) -> Self {
        self.config.rank_draws = n;
        self
    }

    /// Set the random seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Validate and return the config.
    ///
    /// # Errors
    ///
    /// See [`SimulationConfig::validate`].
    pub fn build(self) -> Result<SimulationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
